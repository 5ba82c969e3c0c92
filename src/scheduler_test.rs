use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::generator::GeneratorConfig;
use crate::types::VoxelColor;

/// Builder that records how many times it ran and returns the sample count.
struct CountingBuilder {
  builds: AtomicUsize,
}

impl CountingBuilder {
  fn new() -> Self {
    Self {
      builds: AtomicUsize::new(0),
    }
  }
}

impl ChunkBuilder for CountingBuilder {
  type Output = usize;

  fn build(&self, region: &ChunkRegion, samples: &[VoxelSample], _seams: SeamMask) -> usize {
    self.builds.fetch_add(1, Ordering::SeqCst);
    assert_eq!(samples.len(), region.sample_count());
    samples.len()
  }
}

fn test_world(depth: u8) -> Arc<VoxelData> {
  Arc::new(VoxelData::new(
    depth,
    GeneratorConfig::Constant {
      value: 1.0,
      color: VoxelColor::WHITE,
    },
  ))
}

fn drain_until_idle<B: ChunkBuilder>(
  scheduler: &UpdateScheduler<B>,
  octree: &mut ChunkOctree,
) -> Vec<BuiltChunk<B::Output>> {
  let mut built = Vec::new();
  for _ in 0..200 {
    built.extend(scheduler.drain_completions(octree));
    if scheduler.is_idle(octree) {
      return built;
    }
    std::thread::sleep(Duration::from_millis(5));
  }
  panic!("scheduler never went idle");
}

#[test]
fn duplicate_queues_dispatch_once() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(1);
  let data = test_world(1);

  let root = octree.root();
  for _ in 0..5 {
    scheduler.queue_update(root);
  }
  assert_eq!(scheduler.pending_count(), 1);

  let dispatched = scheduler.apply_queued_updates(&mut octree, &data, false, false);
  assert_eq!(dispatched, 1);

  let built = scheduler.drain_completions(&mut octree);
  assert_eq!(built.len(), 1);
  assert_eq!(octree.get(root).unwrap().state, ChunkState::Built);
}

#[test]
fn sync_flush_builds_padded_lattice() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(2); // root width 64, lod 2
  let data = test_world(2);

  scheduler.queue_update(octree.root());
  scheduler.apply_queued_updates(&mut octree, &data, false, false);
  let built = scheduler.drain_completions(&mut octree);

  assert_eq!(built.len(), 1);
  let chunk = &built[0];
  assert_eq!(chunk.region.lod, 2);
  assert_eq!(chunk.region.stride, 4);
  // 16 chunk cells plus one padding cell per side.
  assert_eq!(chunk.region.samples_per_axis, 18);
  assert_eq!(chunk.output, 18 * 18 * 18);
  assert!(chunk.replaced.is_none());
}

#[test]
fn rebuild_replaces_previous_representation() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(0);
  let data = test_world(0);
  let root = octree.root();

  scheduler.queue_update(root);
  scheduler.apply_queued_updates(&mut octree, &data, false, false);
  let first = scheduler.drain_completions(&mut octree);

  assert!(octree.mark_dirty(root));
  scheduler.queue_update(root);
  scheduler.apply_queued_updates(&mut octree, &data, false, false);
  let second = scheduler.drain_completions(&mut octree);

  assert_eq!(second.len(), 1);
  assert_eq!(second[0].replaced, Some(first[0].chunk_ref));
}

#[test]
fn dirtied_mid_build_result_is_discarded_and_requeued() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(0);
  let data = test_world(0);
  let root = octree.root();

  scheduler.queue_update(root);
  // Synchronous flush: the completion is sitting in the channel now.
  scheduler.apply_queued_updates(&mut octree, &data, false, false);

  // An edit lands before the completion is drained.
  assert!(octree.mark_dirty(root));

  let built = scheduler.drain_completions(&mut octree);
  assert!(built.is_empty());
  assert_eq!(octree.get(root).unwrap().chunk_ref, None);
  // The node went back through the queue.
  assert_eq!(scheduler.pending_count(), 1);

  scheduler.apply_queued_updates(&mut octree, &data, false, false);
  let built = scheduler.drain_completions(&mut octree);
  assert_eq!(built.len(), 1);
  assert_eq!(octree.get(root).unwrap().state, ChunkState::Built);
}

#[test]
fn abandoned_build_requeues_the_node() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(0);
  let root = octree.root();
  let ticket = octree.begin_build(root).unwrap();

  // A task whose world disappeared mid-flight reports no output.
  let completion = Completion {
    id: ticket.id,
    epoch: ticket.epoch,
    region: ChunkRegion::for_ticket(&ticket),
    result: TaskResult::Abandoned,
    build_time_us: 0,
  };
  scheduler.tx.send(completion).unwrap();

  let built = scheduler.drain_completions(&mut octree);
  assert!(built.is_empty());
  // The node goes back through the queue for the next flush.
  assert_eq!(octree.get(root).unwrap().state, ChunkState::Dirty);
  assert_eq!(scheduler.pending_count(), 1);
}

#[test]
fn async_flush_completes_on_worker_threads() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(1);
  let data = test_world(1);

  // Subdivide so more than one node needs building.
  let to_queue = octree.update_camera_position(
    glam::DVec3::ZERO,
    &crate::coords::WorldTransform::default(),
    1.0,
    1000.0,
    1.0,
  );
  assert!(to_queue.len() >= 8);
  scheduler.queue_updates(to_queue.iter().copied());

  let dispatched = scheduler.apply_queued_updates(&mut octree, &data, false, true);
  assert!(dispatched >= 8);

  let built = drain_until_idle(&scheduler, &mut octree);
  assert_eq!(built.len(), dispatched);
  for chunk in &built {
    assert_eq!(octree.get(chunk.id).unwrap().state, ChunkState::Built);
    assert_eq!(octree.get(chunk.id).unwrap().chunk_ref, Some(chunk.chunk_ref));
  }
}

#[test]
fn border_rebuilds_pull_in_coarser_neighbors() {
  let scheduler = UpdateScheduler::new(CountingBuilder::new());
  let mut octree = ChunkOctree::new(2); // width 64
  let data = test_world(2);

  // Camera at a corner: nodes near it refine, the rest stays coarse.
  let to_queue = octree.update_camera_position(
    glam::DVec3::splat(-32.0),
    &crate::coords::WorldTransform::default(),
    1.0,
    8.0,
    1.0,
  );
  scheduler.queue_updates(to_queue.iter().copied());
  scheduler.apply_queued_updates(&mut octree, &data, false, false);
  scheduler.drain_completions(&mut octree);
  assert!(scheduler.is_idle(&octree));

  // Dirty a fine leaf at the edge of the refined region; a border flush
  // must also rebuild its coarser face neighbors.
  let fine = octree.node_at(glam::IVec3::new(-1, -1, -1)).unwrap();
  let coarser_neighbors = octree
    .face_neighbors(fine)
    .iter()
    .filter(|&&n| octree.get(n).unwrap().lod > octree.get(fine).unwrap().lod)
    .count();
  assert!(coarser_neighbors > 0);

  assert!(octree.mark_dirty(fine));
  scheduler.queue_update(fine);
  let dispatched = scheduler.apply_queued_updates(&mut octree, &data, true, false);
  assert_eq!(dispatched, 1 + coarser_neighbors);
}
