//! Full-world save snapshot.
//!
//! A snapshot records the world configuration (depth + generator
//! parameters) and every materialized block. Unmodified regions are not
//! stored; the generator parameters are enough to regenerate them.
//!
//! # Byte format
//!
//! 4-byte magic, little-endian u16 version, then a bincode body. The
//! version is checked on load; there are no forward-compatible fields yet,
//! so a mismatch is fatal.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VoxelError};
use crate::generator::GeneratorConfig;
use crate::types::{VoxelColor, VoxelSample, VoxelValue};
use crate::value_octree::LEAF_VOLUME;

pub const SAVE_MAGIC: [u8; 4] = *b"VOXW";
pub const SAVE_VERSION: u16 = 1;

/// One materialized 16³ block: leaf minimum corner plus dense sample data.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct SavedBlock {
  pub min: [i32; 3],
  pub values: Vec<VoxelValue>,
  pub colors: Vec<VoxelColor>,
}

impl SavedBlock {
  pub fn from_samples(min: glam::IVec3, samples: &[VoxelSample]) -> Self {
    Self {
      min: min.to_array(),
      values: samples.iter().map(|s| s.value).collect(),
      colors: samples.iter().map(|s| s.color).collect(),
    }
  }

  /// Reassemble the dense sample array, validating the block size.
  pub fn to_samples(&self) -> Result<Vec<VoxelSample>> {
    if self.values.len() != LEAF_VOLUME || self.colors.len() != LEAF_VOLUME {
      return Err(VoxelError::CorruptSave(format!(
        "block at {:?} has {} values / {} colors, expected {LEAF_VOLUME}",
        self.min,
        self.values.len(),
        self.colors.len()
      )));
    }
    Ok(
      self
        .values
        .iter()
        .zip(&self.colors)
        .map(|(&value, &color)| VoxelSample::new(value, color))
        .collect(),
    )
  }
}

/// Complete world snapshot, sufficient to exactly reconstruct the store
/// via `load_from_save(reset = true)`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct WorldSave {
  pub depth: u8,
  pub generator: GeneratorConfig,
  pub blocks: Vec<SavedBlock>,
}

impl WorldSave {
  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    let body =
      bincode::serialize(self).map_err(|e| VoxelError::CorruptSave(e.to_string()))?;
    let mut bytes = Vec::with_capacity(6 + body.len());
    bytes.extend_from_slice(&SAVE_MAGIC);
    bytes.extend_from_slice(&SAVE_VERSION.to_le_bytes());
    bytes.extend_from_slice(&body);
    Ok(bytes)
  }

  pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
    if bytes.len() < 6 {
      return Err(VoxelError::CorruptSave("truncated header".into()));
    }
    if bytes[0..4] != SAVE_MAGIC {
      return Err(VoxelError::CorruptSave("bad magic".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SAVE_VERSION {
      return Err(VoxelError::CorruptSave(format!(
        "unsupported save version {version} (expected {SAVE_VERSION})"
      )));
    }
    bincode::deserialize(&bytes[6..]).map_err(|e| VoxelError::CorruptSave(e.to_string()))
  }
}
