//! World façade: one object tying the value store, the LOD octree and the
//! update scheduler together.
//!
//! The façade speaks two coordinate languages. Continuous positions
//! (`DVec3`) are world space; integer coordinates (`VoxelCoord`) are voxel
//! space. Every publicly-taken world position goes through the transform
//! exactly once at the boundary.
//!
//! Per-frame driving contract: call [`VoxelWorld::update_camera_position`]
//! when the viewer moves and [`VoxelWorld::tick`] once per frame. Edits can
//! land at any time between ticks.

use std::sync::Arc;

use glam::DVec3;
use tracing::{debug, info};

use crate::chunk_octree::ChunkOctree;
use crate::coords::{VoxelBounds, VoxelCoord, WorldTransform};
use crate::diff::SyncPacket;
use crate::errors::{Result, VoxelError};
use crate::generator::GeneratorConfig;
use crate::save::WorldSave;
use crate::scheduler::{BuiltChunk, ChunkBuilder, UpdateScheduler};
use crate::types::{VoxelColor, VoxelValue};
use crate::value_octree::{LEAF_SIZE, MAX_DEPTH};
use crate::voxel_data::VoxelData;

/// Construction-time configuration. Validated once in [`VoxelWorld::new`];
/// immutable afterwards.
#[derive(Clone, Debug)]
pub struct WorldSettings {
  /// Octree depth, 0..=9. World width is `16 * 2^depth` voxels.
  pub depth: u8,
  /// Edge length of one voxel in world units.
  pub voxel_size: f64,
  /// World-space position of voxel (0, 0, 0).
  pub origin: DVec3,
  /// LOD aggressiveness: higher keeps fine detail further out.
  pub quality: f64,
  /// Distance from the camera always rendered at finest LOD.
  pub high_resolution_distance_offset: f64,
  /// Grace period in seconds before an out-of-scope chunk is destroyed.
  pub deletion_delay: f32,
  /// Re-mesh neighbors of differing LOD so seams stay stitched.
  pub rebuild_borders: bool,
  /// Emit sync packets on a fixed cadence from [`VoxelWorld::tick`].
  pub multiplayer: bool,
  /// Sync packets per second when `multiplayer` is on.
  pub multiplayer_fps: f32,
  pub generator: GeneratorConfig,
}

impl Default for WorldSettings {
  fn default() -> Self {
    Self {
      depth: 5,
      voxel_size: 1.0,
      origin: DVec3::ZERO,
      quality: 0.75,
      high_resolution_distance_offset: 32.0,
      deletion_delay: 0.1,
      rebuild_borders: true,
      multiplayer: false,
      multiplayer_fps: 15.0,
      generator: GeneratorConfig::Flat { ground_height: 0 },
    }
  }
}

impl WorldSettings {
  fn validate(&self) -> Result<()> {
    if self.depth > MAX_DEPTH {
      return Err(VoxelError::InvalidSettings(format!(
        "depth {} exceeds maximum {MAX_DEPTH}",
        self.depth
      )));
    }
    if !(self.voxel_size > 0.0) {
      return Err(VoxelError::InvalidSettings(format!(
        "voxel_size must be positive, got {}",
        self.voxel_size
      )));
    }
    if !(self.quality > 0.0) {
      return Err(VoxelError::InvalidSettings(format!(
        "quality must be positive, got {}",
        self.quality
      )));
    }
    if self.deletion_delay < 0.0 {
      return Err(VoxelError::InvalidSettings(format!(
        "deletion_delay must not be negative, got {}",
        self.deletion_delay
      )));
    }
    if self.multiplayer && !(self.multiplayer_fps > 0.0) {
      return Err(VoxelError::InvalidSettings(format!(
        "multiplayer_fps must be positive, got {}",
        self.multiplayer_fps
      )));
    }
    Ok(())
  }
}

/// What one frame of [`VoxelWorld::tick`] produced.
pub struct TickOutput<M> {
  /// Freshly accepted chunk representations, ready to display.
  pub built: Vec<BuiltChunk<M>>,
  /// Render-side ids whose representations must be destroyed now.
  pub dropped_chunks: Vec<u64>,
  /// Pending edits to broadcast, on the multiplayer cadence.
  pub sync: Option<SyncPacket>,
}

pub struct VoxelWorld<B: ChunkBuilder> {
  settings: WorldSettings,
  transform: WorldTransform,
  data: Arc<VoxelData>,
  chunks: ChunkOctree,
  scheduler: UpdateScheduler<B>,
  time_since_sync: f32,
}

impl<B: ChunkBuilder> VoxelWorld<B> {
  pub fn new(settings: WorldSettings, builder: B) -> Result<Self> {
    settings.validate()?;
    let transform = WorldTransform::new(settings.voxel_size, settings.origin);
    let data = Arc::new(VoxelData::new(settings.depth, settings.generator.clone()));
    let chunks = ChunkOctree::new(settings.depth);
    info!(
      depth = settings.depth,
      width = LEAF_SIZE << settings.depth,
      "created voxel world"
    );
    Ok(Self {
      settings,
      transform,
      data,
      chunks,
      scheduler: UpdateScheduler::new(builder),
      time_since_sync: 0.0,
    })
  }

  pub fn settings(&self) -> &WorldSettings {
    &self.settings
  }

  pub fn transform(&self) -> &WorldTransform {
    &self.transform
  }

  /// Shared handle to the value store. Rebuild tasks hold it weakly; a
  /// dropped world makes them abandon instead of reading freed data.
  pub fn data(&self) -> &Arc<VoxelData> {
    &self.data
  }

  pub fn chunks(&self) -> &ChunkOctree {
    &self.chunks
  }

  // ---------------------------------------------------------------------
  // Coordinate conversion
  // ---------------------------------------------------------------------

  /// World-space position to the voxel containing it.
  pub fn global_to_local(&self, position: DVec3) -> VoxelCoord {
    self.transform.world_to_voxel(position)
  }

  /// Voxel coordinate to its world-space minimum corner.
  pub fn local_to_global(&self, coord: VoxelCoord) -> DVec3 {
    self.transform.voxel_to_world(coord)
  }

  pub fn is_in_world(&self, coord: VoxelCoord) -> bool {
    self.data.is_in_world(coord)
  }

  // ---------------------------------------------------------------------
  // Reads and edits
  // ---------------------------------------------------------------------

  pub fn get_value(&self, coord: VoxelCoord) -> Result<VoxelValue> {
    self.data.get_value(coord)
  }

  pub fn get_color(&self, coord: VoxelCoord) -> Result<VoxelColor> {
    self.data.get_color(coord)
  }

  pub fn set_value(&mut self, coord: VoxelCoord, value: VoxelValue) -> Result<()> {
    self.data.set_value(coord, value)?;
    self.queue_region(VoxelBounds::cube(coord, 1));
    Ok(())
  }

  pub fn set_color(&mut self, coord: VoxelCoord, color: VoxelColor) -> Result<()> {
    self.data.set_color(coord, color)?;
    self.queue_region(VoxelBounds::cube(coord, 1));
    Ok(())
  }

  /// Raise the value at `coord` by `strength * EDIT_STRENGTH_SCALE`.
  pub fn add(&mut self, coord: VoxelCoord, strength: VoxelValue) -> Result<()> {
    self.data.add(coord, strength)?;
    self.queue_region(VoxelBounds::cube(coord, 1));
    Ok(())
  }

  /// Lower the value at `coord` by `strength * EDIT_STRENGTH_SCALE`.
  pub fn remove(&mut self, coord: VoxelCoord, strength: VoxelValue) -> Result<()> {
    self.data.remove(coord, strength)?;
    self.queue_region(VoxelBounds::cube(coord, 1));
    Ok(())
  }

  fn queue_region(&mut self, bounds: VoxelBounds) {
    let dirty = self.chunks.mark_region_dirty(bounds);
    self.scheduler.queue_updates(dirty);
  }

  // ---------------------------------------------------------------------
  // Update driving
  // ---------------------------------------------------------------------

  /// Queue a rebuild of the chunk rendering `coord` without flushing.
  pub fn queue_update(&mut self, coord: VoxelCoord) {
    if let Some(id) = self.chunks.node_at(coord) {
      if self.chunks.mark_dirty(id) {
        self.scheduler.queue_update(id);
      }
    }
  }

  /// Rebuild the chunk rendering `coord` right away. Synchronous mode
  /// returns the finished builds; asynchronous mode returns whatever was
  /// already done and delivers the rest through later ticks.
  pub fn update(&mut self, coord: VoxelCoord, asynchronous: bool) -> Vec<BuiltChunk<B::Output>> {
    self.queue_update(coord);
    self.apply_queued_updates(asynchronous)
  }

  /// Queue a rebuild of every rendered chunk.
  pub fn update_all(&mut self, asynchronous: bool) -> Vec<BuiltChunk<B::Output>> {
    let dirty = self.chunks.mark_all_dirty();
    self.scheduler.queue_updates(dirty);
    self.apply_queued_updates(asynchronous)
  }

  /// Flush the queue and collect whatever completed. In synchronous mode
  /// that is every queued rebuild, in deterministic order.
  pub fn apply_queued_updates(&mut self, asynchronous: bool) -> Vec<BuiltChunk<B::Output>> {
    self.scheduler.apply_queued_updates(
      &mut self.chunks,
      &self.data,
      self.settings.rebuild_borders,
      asynchronous,
    );
    self.scheduler.drain_completions(&mut self.chunks)
  }

  /// Re-resolve desired LOD from the viewer position and queue the nodes
  /// that now need building.
  pub fn update_camera_position(&mut self, position: DVec3) {
    let to_queue = self.chunks.update_camera_position(
      position,
      &self.transform,
      self.settings.quality,
      self.settings.high_resolution_distance_offset,
      self.settings.deletion_delay,
    );
    self.scheduler.queue_updates(to_queue);
  }

  /// Per-frame driver: flush queued rebuilds asynchronously, accept
  /// finished ones, advance deletion countdowns, and emit a sync packet on
  /// the multiplayer cadence.
  pub fn tick(&mut self, dt: f32) -> TickOutput<B::Output> {
    self.scheduler.apply_queued_updates(
      &mut self.chunks,
      &self.data,
      self.settings.rebuild_borders,
      true,
    );
    let built = self.scheduler.drain_completions(&mut self.chunks);
    let dropped_chunks = self.chunks.tick(dt);

    let mut sync = None;
    if self.settings.multiplayer {
      self.time_since_sync += dt;
      if self.time_since_sync >= 1.0 / self.settings.multiplayer_fps {
        self.time_since_sync = 0.0;
        sync = self.sync();
      }
    }

    TickOutput {
      built,
      dropped_chunks,
      sync,
    }
  }

  // ---------------------------------------------------------------------
  // Save / sync
  // ---------------------------------------------------------------------

  /// Snapshot the modified parts of the world. Compacts the pending diff
  /// lists: the snapshot supersedes them.
  pub fn get_save(&self) -> WorldSave {
    self.data.get_save()
  }

  /// Apply a snapshot and queue rebuilds for everything it touched.
  pub fn load_from_save(
    &mut self,
    save: &WorldSave,
    reset: bool,
    asynchronous: bool,
  ) -> Result<Vec<BuiltChunk<B::Output>>> {
    let touched = self.data.load_from_save(save, reset)?;
    debug!(?touched, reset, "loaded world snapshot");
    self.queue_region(touched);
    Ok(self.apply_queued_updates(asynchronous))
  }

  /// Drain pending edits into a packet for the other side, or `None` when
  /// there is nothing to send.
  pub fn sync(&mut self) -> Option<SyncPacket> {
    if !self.data.has_pending_diffs() {
      return None;
    }
    Some(self.data.drain_diffs())
  }

  /// Replay a remote packet and queue rebuilds for the touched region.
  pub fn apply_sync(&mut self, packet: &SyncPacket) {
    if let Some(touched) = self.data.apply_diffs(packet) {
      self.queue_region(touched);
    }
  }
}

#[cfg(test)]
#[path = "world_test.rs"]
mod world_test;
