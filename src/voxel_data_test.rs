use std::sync::Arc;

use glam::IVec3;

use super::*;
use crate::value_octree::LEAF_VOLUME;

fn solid_world(depth: u8) -> VoxelData {
  VoxelData::new(
    depth,
    GeneratorConfig::Constant {
      value: -1.0,
      color: VoxelColor::WHITE,
    },
  )
}

#[test]
fn add_moves_value_toward_ceiling() {
  // Depth 2 (width 64), all solid. Add(strength 5) raises the value by
  // 5 * EDIT_STRENGTH_SCALE from -1.
  let data = solid_world(2);
  data.add(IVec3::ZERO, 5.0).unwrap();

  let expected = -1.0 + 5.0 * EDIT_STRENGTH_SCALE;
  assert!((data.get_value(IVec3::ZERO).unwrap() - expected).abs() < 1e-6);

  // Untouched neighbor in the same (now materialized) block keeps the
  // generator-seeded sample.
  assert_eq!(data.get_value(IVec3::new(1, 1, 1)).unwrap(), -1.0);
  assert_eq!(data.get_save().blocks.len(), 1);
}

#[test]
fn add_clamps_at_ceiling() {
  let data = solid_world(1);
  data.add(IVec3::ZERO, 1000.0).unwrap();
  assert_eq!(data.get_value(IVec3::ZERO).unwrap(), 1.0);
}

#[test]
fn remove_lowers_value() {
  let data = solid_world(1);
  data.set_value(IVec3::ZERO, 0.5).unwrap();
  data.remove(IVec3::ZERO, 2.0).unwrap();
  let expected = 0.5 - 2.0 * EDIT_STRENGTH_SCALE;
  assert!((data.get_value(IVec3::ZERO).unwrap() - expected).abs() < 1e-6);
}

#[test]
fn edits_append_to_diff_log() {
  let data = solid_world(1);
  data.set_value(IVec3::ZERO, 0.3).unwrap();
  data.set_color(IVec3::ZERO, VoxelColor::BLACK).unwrap();
  data.add(IVec3::new(1, 0, 0), 1.0).unwrap();

  let packet = data.drain_diffs();
  assert_eq!(packet.value_diffs.len(), 2);
  assert_eq!(packet.color_diffs.len(), 1);
  assert_eq!(packet.value_diffs[0].old, -1.0);
  assert_eq!(packet.value_diffs[0].new, 0.3);

  // Drained, not snapshotted.
  assert!(!data.has_pending_diffs());
  assert!(data.drain_diffs().is_empty());
}

#[test]
fn failed_edit_appends_nothing() {
  let data = solid_world(1); // [-16, 16)
  assert!(data.set_value(IVec3::splat(100), 0.0).is_err());
  assert!(!data.has_pending_diffs());
}

#[test]
fn sync_packet_applies_on_peer_without_echo() {
  // SetValue((5,5,5), 0.3) -> sync -> peer applies: peer reads 0.3 and its
  // own diff log stays empty.
  let server = solid_world(2);
  server.set_value(IVec3::splat(5), 0.3).unwrap();

  let packet = server.drain_diffs();
  assert!(!server.has_pending_diffs());

  let peer = solid_world(2);
  let touched = peer.apply_diffs(&packet).unwrap();
  assert_eq!(peer.get_value(IVec3::splat(5)).unwrap(), 0.3);
  assert!(!peer.has_pending_diffs());
  assert!(touched.contains(IVec3::splat(5)));
}

#[test]
fn diff_replay_is_idempotent_and_last_write_wins() {
  let server = solid_world(1);
  server.set_value(IVec3::ZERO, 0.1).unwrap();
  server.set_value(IVec3::ZERO, 0.7).unwrap();
  let packet = server.drain_diffs();

  let peer = solid_world(1);
  peer.apply_diffs(&packet);
  assert_eq!(peer.get_value(IVec3::ZERO).unwrap(), 0.7);

  // Applying the same list twice yields the same final state.
  peer.apply_diffs(&packet);
  assert_eq!(peer.get_value(IVec3::ZERO).unwrap(), 0.7);
}

#[test]
fn bad_diff_entries_do_not_abort_the_batch() {
  let peer = solid_world(1); // [-16, 16)
  let packet = SyncPacket {
    value_diffs: vec![
      crate::diff::ValueDiff {
        coord: IVec3::splat(500), // out of bounds: skipped
        old: -1.0,
        new: 0.0,
      },
      crate::diff::ValueDiff {
        coord: IVec3::ZERO,
        old: -1.0,
        new: 0.4,
      },
    ],
    color_diffs: vec![],
  };
  let touched = peer.apply_diffs(&packet).unwrap();
  assert_eq!(peer.get_value(IVec3::ZERO).unwrap(), 0.4);
  assert!(touched.contains(IVec3::ZERO));
  assert!(!touched.contains(IVec3::splat(500)));
}

#[test]
fn save_roundtrip_reproduces_samples() {
  let data = solid_world(2);
  data.set_value(IVec3::new(3, 4, 5), 0.25).unwrap();
  data.set_color(IVec3::new(-7, 0, 9), VoxelColor::new(10, 20, 30, 255)).unwrap();

  let save = data.get_save();
  assert_eq!(save.blocks.len(), 2);
  // Taking the snapshot compacts the log.
  assert!(!data.has_pending_diffs());

  let restored = solid_world(2);
  restored.load_from_save(&save, true).unwrap();
  for coord in [
    IVec3::new(3, 4, 5),
    IVec3::new(-7, 0, 9),
    IVec3::new(0, 0, 0),
    IVec3::new(-32, -32, -32),
  ] {
    assert_eq!(
      restored.get_sample(coord).unwrap(),
      data.get_sample(coord).unwrap(),
      "mismatch at {coord:?}"
    );
  }
}

#[test]
fn load_reset_discards_previous_edits() {
  let data = solid_world(1);
  let clean_save = data.get_save();

  data.set_value(IVec3::ZERO, 0.9).unwrap();
  data.load_from_save(&clean_save, true).unwrap();
  assert_eq!(data.get_value(IVec3::ZERO).unwrap(), -1.0);
}

#[test]
fn load_without_reset_overlays_existing_state() {
  let source = solid_world(1);
  source.set_value(IVec3::new(-16, 0, 0), 0.5).unwrap();
  let save = source.get_save();

  // Fresh world (caller contract: unmodified) takes the overlay.
  let fresh = solid_world(1);
  fresh.load_from_save(&save, false).unwrap();
  assert_eq!(fresh.get_value(IVec3::new(-16, 0, 0)).unwrap(), 0.5);
}

#[test]
fn load_rejects_depth_mismatch() {
  let data = solid_world(1);
  let mut save = data.get_save();
  save.depth = 3;
  assert!(matches!(
    data.load_from_save(&save, true),
    Err(VoxelError::CorruptSave(_))
  ));
}

#[test]
fn malformed_save_block_is_skipped() {
  let data = solid_world(1);
  data.set_value(IVec3::ZERO, 0.6).unwrap();
  let mut save = data.get_save();
  // Corrupt one block, add a healthy duplicate of the original.
  let healthy = save.blocks[0].clone();
  save.blocks[0].values.truncate(3);
  save.blocks.push(healthy);

  let restored = solid_world(1);
  restored.load_from_save(&save, true).unwrap();
  assert_eq!(restored.get_value(IVec3::ZERO).unwrap(), 0.6);
}

#[test]
fn concurrent_range_reads_during_edits() {
  // Rebuild tasks read ranges while the main thread edits; the RwLock must
  // never let a reader see a torn block.
  let data = Arc::new(solid_world(1));
  let reader = {
    let data = Arc::clone(&data);
    std::thread::spawn(move || {
      let bounds = VoxelBounds::cube(IVec3::splat(-8), 16);
      for _ in 0..200 {
        let samples = data.get_range(bounds);
        assert_eq!(samples.len(), LEAF_VOLUME);
        for sample in samples {
          assert!((-1.0..=1.0).contains(&sample.value));
        }
      }
    })
  };
  for i in 0..200 {
    let coord = IVec3::new(i % 16 - 8, 0, 0);
    data.set_value(coord, (i % 3) as f32 * 0.3 - 0.3).unwrap();
  }
  reader.join().unwrap();
}
