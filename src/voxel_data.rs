//! Thread-safe façade over the value octree.
//!
//! Owns the single [`ValueOctree`] instance for a world, serializes access
//! to it, and appends every successful edit to the diff log. Shared as
//! `Arc<VoxelData>`; rebuild tasks hold a `Weak` so a torn-down world
//! simply makes their range read fail instead of keeping the store alive.
//!
//! # Locking
//!
//! One `RwLock` over the whole octree: edits take the write lock for a
//! single cell write (block materialization included), rebuild tasks take
//! the read lock for the duration of a range read. A rebuild can therefore
//! never observe a torn block write. The diff log has its own mutex; it is
//! only touched from the edit path.

use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, warn};

use crate::coords::{VoxelBounds, VoxelCoord};
use crate::diff::{DiffLog, SyncPacket};
use crate::errors::{Result, VoxelError};
use crate::generator::GeneratorConfig;
use crate::save::{SavedBlock, WorldSave};
use crate::types::{clamp_value, VoxelColor, VoxelSample, VoxelValue, EDIT_STRENGTH_SCALE};
use crate::value_octree::ValueOctree;

pub struct VoxelData {
  octree: RwLock<ValueOctree>,
  diff_log: Mutex<DiffLog>,
  generator_config: GeneratorConfig,
  depth: u8,
}

impl VoxelData {
  pub fn new(depth: u8, generator_config: GeneratorConfig) -> Self {
    let generator: Arc<dyn crate::generator::WorldGenerator> =
      Arc::from(generator_config.build());
    Self {
      octree: RwLock::new(ValueOctree::new(depth, generator)),
      diff_log: Mutex::new(DiffLog::new()),
      generator_config,
      depth,
    }
  }

  pub fn depth(&self) -> u8 {
    self.depth
  }

  pub fn generator_config(&self) -> &GeneratorConfig {
    &self.generator_config
  }

  pub fn bounds(&self) -> VoxelBounds {
    self.read().bounds()
  }

  pub fn is_in_world(&self, coord: VoxelCoord) -> bool {
    self.read().is_in_world(coord)
  }

  // Lock poisoning only happens if an edit or rebuild panicked; there is
  // no recovery story for a half-written block, so propagate the panic.
  fn read(&self) -> std::sync::RwLockReadGuard<'_, ValueOctree> {
    match self.octree.read() {
      Ok(guard) => guard,
      Err(poisoned) => panic!("value octree lock poisoned: {poisoned}"),
    }
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, ValueOctree> {
    match self.octree.write() {
      Ok(guard) => guard,
      Err(poisoned) => panic!("value octree lock poisoned: {poisoned}"),
    }
  }

  fn log(&self) -> std::sync::MutexGuard<'_, DiffLog> {
    match self.diff_log.lock() {
      Ok(guard) => guard,
      Err(poisoned) => panic!("diff log lock poisoned: {poisoned}"),
    }
  }

  pub fn get_sample(&self, coord: VoxelCoord) -> Result<VoxelSample> {
    self.read().get(coord)
  }

  pub fn get_value(&self, coord: VoxelCoord) -> Result<VoxelValue> {
    Ok(self.get_sample(coord)?.value)
  }

  pub fn get_color(&self, coord: VoxelCoord) -> Result<VoxelColor> {
    Ok(self.get_sample(coord)?.color)
  }

  /// Absolute value write. Appends one diff entry.
  pub fn set_value(&self, coord: VoxelCoord, value: VoxelValue) -> Result<()> {
    let value = clamp_value(value);
    let old = self.write().set_value(coord, value)?;
    self.log().push_value(coord, old, value);
    Ok(())
  }

  /// Absolute color write. Appends one diff entry.
  pub fn set_color(&self, coord: VoxelCoord, color: VoxelColor) -> Result<()> {
    let old = self.write().set_color(coord, color)?;
    self.log().push_color(coord, old, color);
    Ok(())
  }

  /// Relative edit: raise the value by `strength * EDIT_STRENGTH_SCALE`,
  /// clamped to the value range.
  pub fn add(&self, coord: VoxelCoord, strength: VoxelValue) -> Result<()> {
    self.apply_delta(coord, strength * EDIT_STRENGTH_SCALE)
  }

  /// Relative edit: lower the value by `strength * EDIT_STRENGTH_SCALE`.
  pub fn remove(&self, coord: VoxelCoord, strength: VoxelValue) -> Result<()> {
    self.apply_delta(coord, -strength * EDIT_STRENGTH_SCALE)
  }

  fn apply_delta(&self, coord: VoxelCoord, delta: VoxelValue) -> Result<()> {
    // Read-modify-write under one write guard so a concurrent range read
    // never lands between the read and the write.
    let old;
    let new;
    {
      let mut octree = self.write();
      let current = octree.get(coord)?.value;
      new = clamp_value(current + delta);
      old = octree.set_value(coord, new)?;
    }
    self.log().push_value(coord, old, new);
    Ok(())
  }

  /// Collect a range of samples under a single read guard, row-major.
  ///
  /// Out-of-world parts of the box are clipped, not errors: chunk padding
  /// at the world boundary routinely reaches outside.
  pub fn get_range(&self, bounds: VoxelBounds) -> Vec<VoxelSample> {
    self.read().range(bounds).collect()
  }

  /// Strided range read for LOD rebuilds, under a single read guard.
  /// Out-of-world lattice points are clamped to the boundary.
  pub fn get_range_strided(&self, bounds: VoxelBounds, stride: i32) -> Vec<VoxelSample> {
    self.read().range_strided(bounds, stride)
  }

  // ---------------------------------------------------------------------
  // Save / load
  // ---------------------------------------------------------------------

  /// Full snapshot of every materialized block plus generator parameters.
  /// Compacts the diff log: the snapshot supersedes the pending entries.
  pub fn get_save(&self) -> WorldSave {
    let octree = self.read();
    let blocks = octree
      .materialized_blocks()
      .into_iter()
      .map(|(min, samples)| SavedBlock::from_samples(min, samples))
      .collect::<Vec<_>>();
    debug!(blocks = blocks.len(), "taking world snapshot");
    drop(octree);

    self.log().clear();
    WorldSave {
      depth: self.depth,
      generator: self.generator_config.clone(),
      blocks,
    }
  }

  /// Apply a snapshot. `reset` discards current state first; without it
  /// the snapshot is laid over the existing octree (caller contract: the
  /// current state is unmodified).
  ///
  /// Malformed blocks are skipped with a warning; the rest of the batch
  /// still applies. Returns the region that needs re-dirtying.
  pub fn load_from_save(&self, save: &WorldSave, reset: bool) -> Result<VoxelBounds> {
    if save.depth != self.depth {
      return Err(VoxelError::CorruptSave(format!(
        "save depth {} does not match world depth {}",
        save.depth, self.depth
      )));
    }

    let mut octree = self.write();
    if reset {
      octree.clear();
    }
    for block in &save.blocks {
      let samples = match block.to_samples() {
        Ok(samples) => samples,
        Err(err) => {
          warn!(min = ?block.min, %err, "skipping malformed save block");
          continue;
        }
      };
      if let Err(err) = octree.insert_block(block.min.into(), samples) {
        warn!(min = ?block.min, %err, "skipping unplaceable save block");
      }
    }
    let bounds = octree.bounds();
    drop(octree);

    // The diff log described the pre-load state.
    self.log().clear();
    Ok(bounds)
  }

  // ---------------------------------------------------------------------
  // Sync
  // ---------------------------------------------------------------------

  /// One-shot consumption of the accumulated diff lists.
  pub fn drain_diffs(&self) -> SyncPacket {
    self.log().drain()
  }

  pub fn has_pending_diffs(&self) -> bool {
    !self.log().is_empty()
  }

  /// Replay a remote packet in order, without echoing into the local log.
  ///
  /// Out-of-bounds entries are skipped with a warning; the batch continues.
  /// Returns the touched region for re-dirtying, or `None` when nothing
  /// applied.
  pub fn apply_diffs(&self, packet: &SyncPacket) -> Option<VoxelBounds> {
    let mut touched: Option<VoxelBounds> = None;
    let mut extend = |coord: VoxelCoord, touched: &mut Option<VoxelBounds>| {
      let cell = VoxelBounds::cube(coord, 1);
      *touched = Some(match touched.take() {
        Some(bounds) => VoxelBounds::new(bounds.min.min(cell.min), bounds.max.max(cell.max)),
        None => cell,
      });
    };

    let mut octree = self.write();
    for diff in &packet.value_diffs {
      match octree.set_value(diff.coord, diff.new) {
        Ok(_) => extend(diff.coord, &mut touched),
        Err(err) => warn!(coord = ?diff.coord, %err, "skipping bad value diff"),
      }
    }
    for diff in &packet.color_diffs {
      match octree.set_color(diff.coord, diff.new) {
        Ok(_) => extend(diff.coord, &mut touched),
        Err(err) => warn!(coord = ?diff.coord, %err, "skipping bad color diff"),
      }
    }
    touched
  }
}

#[cfg(test)]
#[path = "voxel_data_test.rs"]
mod voxel_data_test;
