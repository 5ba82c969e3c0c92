//! Core voxel sample types.

use serde::{Deserialize, Serialize};

/// Scalar density value.
/// Negative = inside/solid, positive = outside/air.
pub type VoxelValue = f32;

/// Bounds of the value range. Every stored value stays inside
/// `[VALUE_MIN, VALUE_MAX]`; edits are clamped, never wrapped.
pub const VALUE_MIN: VoxelValue = -1.0;
pub const VALUE_MAX: VoxelValue = 1.0;

/// Linear mapping from edit `strength` to a value delta.
///
/// `add(coord, s)` applies `+s * EDIT_STRENGTH_SCALE`, `remove` applies the
/// negation, and the result is clamped to the value range. `strength = 10`
/// therefore spans half the full range in one edit.
pub const EDIT_STRENGTH_SCALE: VoxelValue = 0.1;

/// Clamp a value to the storable range.
#[inline(always)]
pub fn clamp_value(value: VoxelValue) -> VoxelValue {
  value.clamp(VALUE_MIN, VALUE_MAX)
}

/// RGBA material color attached to each voxel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct VoxelColor(pub [u8; 4]);

impl VoxelColor {
  pub const WHITE: Self = Self([255, 255, 255, 255]);
  pub const BLACK: Self = Self([0, 0, 0, 255]);

  pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
    Self([r, g, b, a])
  }
}

impl Default for VoxelColor {
  fn default() -> Self {
    Self::WHITE
  }
}

/// One voxel's worth of data: density value plus material color.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct VoxelSample {
  pub value: VoxelValue,
  pub color: VoxelColor,
}

impl VoxelSample {
  pub fn new(value: VoxelValue, color: VoxelColor) -> Self {
    Self {
      value: clamp_value(value),
      color,
    }
  }

  /// Fully solid sample with the default color.
  pub fn solid() -> Self {
    Self::new(VALUE_MIN, VoxelColor::default())
  }

  /// Fully empty sample with the default color.
  pub fn empty() -> Self {
    Self::new(VALUE_MAX, VoxelColor::default())
  }

  /// True if this sample lies inside the surface.
  #[inline]
  pub fn is_solid(&self) -> bool {
    self.value < 0.0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn clamp_value_bounds() {
    assert_eq!(clamp_value(-5.0), VALUE_MIN);
    assert_eq!(clamp_value(5.0), VALUE_MAX);
    assert_eq!(clamp_value(0.25), 0.25);
  }

  #[test]
  fn sample_constructor_clamps() {
    let s = VoxelSample::new(42.0, VoxelColor::WHITE);
    assert_eq!(s.value, VALUE_MAX);
    assert!(!s.is_solid());
    assert!(VoxelSample::solid().is_solid());
  }
}
