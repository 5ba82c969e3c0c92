//! Diff log and sync payload.
//!
//! Every successful edit appends one before/after entry, segregated into a
//! value list and a color list. Entries are never deduplicated; replay
//! applies them in insertion order so the last write per coordinate wins.
//! `DiffLog::drain` is a one-shot consumption: taking a sync packet clears
//! the local log.

use serde::{Deserialize, Serialize};

use crate::coords::VoxelCoord;
use crate::errors::{Result, VoxelError};
use crate::types::{VoxelColor, VoxelValue};

/// One value change: `(coordinate, old, new)`.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct ValueDiff {
  pub coord: VoxelCoord,
  pub old: VoxelValue,
  pub new: VoxelValue,
}

/// One color change: `(coordinate, old, new)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct ColorDiff {
  pub coord: VoxelCoord,
  pub old: VoxelColor,
  pub new: VoxelColor,
}

/// Append-only record of changes since the last sync or full save.
#[derive(Default)]
pub struct DiffLog {
  values: Vec<ValueDiff>,
  colors: Vec<ColorDiff>,
}

impl DiffLog {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push_value(&mut self, coord: VoxelCoord, old: VoxelValue, new: VoxelValue) {
    self.values.push(ValueDiff { coord, old, new });
  }

  pub fn push_color(&mut self, coord: VoxelCoord, old: VoxelColor, new: VoxelColor) {
    self.colors.push(ColorDiff { coord, old, new });
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty() && self.colors.is_empty()
  }

  pub fn len(&self) -> usize {
    self.values.len() + self.colors.len()
  }

  /// Package and clear the accumulated entries. One-shot: a second drain
  /// without intervening edits yields an empty packet.
  pub fn drain(&mut self) -> SyncPacket {
    SyncPacket {
      value_diffs: std::mem::take(&mut self.values),
      color_diffs: std::mem::take(&mut self.colors),
    }
  }

  /// Discard all entries. Used when a full save snapshot supersedes them.
  pub fn clear(&mut self) {
    self.values.clear();
    self.colors.clear();
  }
}

/// Wire payload for one sync tick: every edit batched since the last one.
///
/// Transport and reliability are a collaborator's concern; this type only
/// defines the payload shape and its byte encoding.
#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct SyncPacket {
  pub value_diffs: Vec<ValueDiff>,
  pub color_diffs: Vec<ColorDiff>,
}

impl SyncPacket {
  pub fn is_empty(&self) -> bool {
    self.value_diffs.is_empty() && self.color_diffs.is_empty()
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    bincode::serialize(self).map_err(|e| VoxelError::CorruptSave(e.to_string()))
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    bincode::deserialize(bytes).map_err(|e| VoxelError::CorruptSave(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use glam::IVec3;

  use super::*;

  #[test]
  fn drain_is_one_shot() {
    let mut log = DiffLog::new();
    log.push_value(IVec3::ZERO, -1.0, 0.5);
    log.push_color(IVec3::ZERO, VoxelColor::WHITE, VoxelColor::BLACK);
    assert_eq!(log.len(), 2);

    let packet = log.drain();
    assert_eq!(packet.value_diffs.len(), 1);
    assert_eq!(packet.color_diffs.len(), 1);
    assert!(log.is_empty());
    assert!(log.drain().is_empty());
  }

  #[test]
  fn entries_keep_insertion_order() {
    let mut log = DiffLog::new();
    log.push_value(IVec3::ZERO, -1.0, 0.1);
    log.push_value(IVec3::ZERO, 0.1, 0.2);
    let packet = log.drain();
    // Replay in order: last write wins.
    assert_eq!(packet.value_diffs[0].new, 0.1);
    assert_eq!(packet.value_diffs[1].new, 0.2);
  }

  #[test]
  fn packet_byte_roundtrip() {
    let mut log = DiffLog::new();
    log.push_value(IVec3::new(5, 5, 5), -1.0, 0.3);
    let packet = log.drain();
    let bytes = packet.to_bytes().unwrap();
    assert_eq!(SyncPacket::from_bytes(&bytes).unwrap(), packet);
  }

  #[test]
  fn truncated_packet_is_corrupt() {
    let packet = SyncPacket::default();
    let bytes = packet.to_bytes().unwrap();
    assert!(SyncPacket::from_bytes(&bytes[..bytes.len() - 1]).is_err());
  }
}
