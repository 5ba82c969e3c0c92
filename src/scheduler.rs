//! Update scheduler: dirty chunk nodes in, rebuilt representations out.
//!
//! Following the stage pattern: queue → flush → drain completions.
//!
//! Queued nodes live in a set, so marking the same node dirty N times
//! before a flush yields exactly one rebuild task. A flush either spawns
//! one `rayon` task per node (bounded by the pool's worker count) or, in
//! synchronous mode, rebuilds on the calling thread in sorted-id order.
//! Completed builds come back over a channel and are accepted on the main
//! thread; anything stale is dropped there.
//!
//! Tasks hold only a `Weak` reference to the voxel data: a world torn down
//! mid-flight makes the task abandon silently and the node retries later.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;
use web_time::Instant;

use crate::chunk_octree::{BuildTicket, ChunkId, ChunkOctree, ChunkState, SeamMask};
use crate::coords::VoxelBounds;
use crate::types::VoxelSample;
use crate::voxel_data::VoxelData;

/// Sample lattice description handed to the builder.
///
/// The region is the node's bounds padded by one stride cell on every side
/// (seam data for neighbor stitching); samples are taken every `stride`
/// voxels, row-major, `samples_per_axis` per axis.
#[derive(Clone, Copy, Debug)]
pub struct ChunkRegion {
  /// Unpadded chunk bounds in voxel space.
  pub bounds: VoxelBounds,
  /// LOD of the chunk (0 = finest).
  pub lod: u8,
  /// Sampling stride: `2^lod` voxels between samples.
  pub stride: i32,
  /// Padded bounds actually sampled.
  pub padded_bounds: VoxelBounds,
  /// Samples per axis (chunk cells + 2 padding cells).
  pub samples_per_axis: i32,
}

impl ChunkRegion {
  pub fn for_ticket(ticket: &BuildTicket) -> Self {
    let stride = 1 << ticket.lod;
    let padded_bounds = ticket.bounds.expand(stride);
    Self {
      bounds: ticket.bounds,
      lod: ticket.lod,
      stride,
      padded_bounds,
      samples_per_axis: padded_bounds.size().x / stride,
    }
  }

  pub fn sample_count(&self) -> usize {
    (self.samples_per_axis as usize).pow(3)
  }
}

/// Render/mesh collaborator contract.
///
/// Consumes one chunk's sample lattice plus a seam descriptor and produces
/// an opaque representation. Must be pure per call: rebuilds are retried
/// freely and stale outputs are discarded.
pub trait ChunkBuilder: Send + Sync + 'static {
  type Output: Send + 'static;

  fn build(&self, region: &ChunkRegion, samples: &[VoxelSample], seams: SeamMask)
    -> Self::Output;
}

/// A rebuilt chunk accepted by the octree, ready for the render side.
pub struct BuiltChunk<M> {
  pub id: ChunkId,
  /// Render-side id assigned to this representation.
  pub chunk_ref: u64,
  /// Representation this build replaces, if any.
  pub replaced: Option<u64>,
  pub region: ChunkRegion,
  pub output: M,
  /// Raw build time in microseconds.
  pub build_time_us: u64,
}

enum TaskResult<M> {
  Done(M),
  /// The owning voxel data disappeared mid-task.
  Abandoned,
}

struct Completion<M> {
  id: ChunkId,
  epoch: u64,
  region: ChunkRegion,
  result: TaskResult<M>,
  build_time_us: u64,
}

pub struct UpdateScheduler<B: ChunkBuilder> {
  builder: Arc<B>,
  pending: Mutex<HashSet<ChunkId>>,
  tx: Sender<Completion<B::Output>>,
  rx: Receiver<Completion<B::Output>>,
}

impl<B: ChunkBuilder> UpdateScheduler<B> {
  pub fn new(builder: B) -> Self {
    let (tx, rx) = crossbeam_channel::unbounded();
    Self {
      builder: Arc::new(builder),
      pending: Mutex::new(HashSet::new()),
      tx,
      rx,
    }
  }

  fn pending_lock(&self) -> std::sync::MutexGuard<'_, HashSet<ChunkId>> {
    match self.pending.lock() {
      Ok(guard) => guard,
      Err(poisoned) => panic!("pending set lock poisoned: {poisoned}"),
    }
  }

  /// Add a node to the pending set. Idempotent under duplicates; does not
  /// itself start any work.
  pub fn queue_update(&self, id: ChunkId) {
    self.pending_lock().insert(id);
  }

  pub fn queue_updates(&self, ids: impl IntoIterator<Item = ChunkId>) {
    let mut pending = self.pending_lock();
    pending.extend(ids);
  }

  pub fn pending_count(&self) -> usize {
    self.pending_lock().len()
  }

  /// Drain the pending set and dispatch one rebuild per node.
  ///
  /// The set is swapped out under its lock: an insert racing the drain
  /// lands in the next flush instead of being lost. Returns the number of
  /// rebuilds dispatched.
  pub fn apply_queued_updates(
    &self,
    octree: &mut ChunkOctree,
    data: &Arc<VoxelData>,
    rebuild_borders: bool,
    asynchronous: bool,
  ) -> usize {
    let drained = std::mem::take(&mut *self.pending_lock());
    if drained.is_empty() {
      return 0;
    }

    let mut ids: Vec<ChunkId> = drained.into_iter().collect();

    // Border consistency: a rebuilt node's differently-LOD'd neighbors get
    // a seam-stitching rebuild of their own. Off = fewer rebuilds, visible
    // seams while the camera moves.
    if rebuild_borders {
      let mut extra = Vec::new();
      for &id in &ids {
        let Some(lod) = octree.get(id).map(|n| n.lod) else {
          continue;
        };
        for neighbor in octree.face_neighbors(id) {
          let differs = octree.get(neighbor).is_some_and(|n| n.lod != lod);
          if differs && octree.mark_dirty(neighbor) && !ids.contains(&neighbor) {
            extra.push(neighbor);
          }
        }
      }
      ids.extend(extra);
    }

    // Deterministic per-call order for the synchronous path.
    ids.sort();
    ids.dedup();

    let mut dispatched = 0;
    for id in ids {
      let Some(ticket) = octree.begin_build(id) else {
        continue;
      };
      let seams = if rebuild_borders {
        octree.seam_mask(id)
      } else {
        0
      };
      let region = ChunkRegion::for_ticket(&ticket);
      let weak = Arc::downgrade(data);
      let builder = Arc::clone(&self.builder);
      let tx = self.tx.clone();

      if asynchronous {
        rayon::spawn(move || {
          let completion = run_build(&ticket, region, seams, weak, builder.as_ref());
          // The receiver only disappears at world teardown.
          let _ = tx.send(completion);
        });
      } else {
        let completion = run_build(&ticket, region, seams, weak, builder.as_ref());
        let _ = tx.send(completion);
      }
      dispatched += 1;
    }
    trace!(dispatched, asynchronous, "flushed update queue");
    dispatched
  }

  /// Accept finished builds, drop stale ones, re-queue re-dirtied nodes.
  /// Main-thread only.
  pub fn drain_completions(&self, octree: &mut ChunkOctree) -> Vec<BuiltChunk<B::Output>> {
    let mut built = Vec::new();
    while let Ok(completion) = self.rx.try_recv() {
      match completion.result {
        TaskResult::Abandoned => {
          octree.fail_build(completion.id, completion.epoch);
          if octree
            .get(completion.id)
            .is_some_and(|n| n.state == ChunkState::Dirty)
          {
            self.queue_update(completion.id);
          }
        }
        TaskResult::Done(output) => {
          match octree.complete_build(completion.id, completion.epoch) {
            Some(accepted) => built.push(BuiltChunk {
              id: completion.id,
              chunk_ref: accepted.chunk_ref,
              replaced: accepted.replaced,
              region: completion.region,
              output,
              build_time_us: completion.build_time_us,
            }),
            None => {
              // Stale. If the node was re-dirtied mid-build it goes back
              // through the queue; a deleted node is simply gone.
              if octree
                .get(completion.id)
                .is_some_and(|n| n.state == ChunkState::Dirty)
              {
                self.queue_update(completion.id);
              }
            }
          }
        }
      }
    }
    built
  }

  /// True when no queued or in-flight work remains.
  pub fn is_idle(&self, octree: &ChunkOctree) -> bool {
    self.pending_lock().is_empty() && self.rx.is_empty() && !octree_has_building(octree)
  }
}

fn octree_has_building(octree: &ChunkOctree) -> bool {
  // Building nodes hold an outstanding completion.
  let mut stack = vec![octree.root()];
  while let Some(id) = stack.pop() {
    let Some(node) = octree.get(id) else { continue };
    if node.state == ChunkState::Building {
      return true;
    }
    stack.extend(octree.children_of(id));
  }
  false
}

fn run_build<B: ChunkBuilder>(
  ticket: &BuildTicket,
  region: ChunkRegion,
  seams: SeamMask,
  data: Weak<VoxelData>,
  builder: &B,
) -> Completion<B::Output> {
  let start = Instant::now();
  let result = match data.upgrade() {
    None => TaskResult::Abandoned,
    Some(data) => {
      let samples = data.get_range_strided(region.padded_bounds, region.stride);
      TaskResult::Done(builder.build(&region, &samples, seams))
    }
  };
  Completion {
    id: ticket.id,
    epoch: ticket.epoch,
    region,
    result,
    build_time_us: start.elapsed().as_micros() as u64,
  }
}

#[cfg(test)]
#[path = "scheduler_test.rs"]
mod scheduler_test;
