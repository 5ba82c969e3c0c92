//! World generator contract and built-in generators.
//!
//! The generator defines the base field before any edits. It must be pure
//! and deterministic for a fixed configuration: unmodified regions are
//! never stored, so the store re-queries the generator every time and
//! relies on getting the same answer back.

use serde::{Deserialize, Serialize};

use crate::coords::VoxelCoord;
use crate::types::{clamp_value, VoxelColor, VoxelSample, VoxelValue};

/// Base-field query contract.
///
/// `Send + Sync` so rebuild tasks can sample generator-backed regions on
/// worker threads.
pub trait WorldGenerator: Send + Sync {
  /// Base sample at a voxel coordinate, before any edits.
  fn generate(&self, coord: VoxelCoord) -> VoxelSample;
}

/// Serializable generator parameters, recorded in save snapshots so
/// unmodified regions can be regenerated on load.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GeneratorConfig {
  Constant { value: VoxelValue, color: VoxelColor },
  Flat { ground_height: i32 },
  Sphere { radius: f64, inverted: bool },
}

impl GeneratorConfig {
  /// Instantiate the generator described by this configuration.
  pub fn build(&self) -> Box<dyn WorldGenerator> {
    match *self {
      GeneratorConfig::Constant { value, color } => {
        Box::new(ConstantGenerator { value, color })
      }
      GeneratorConfig::Flat { ground_height } => Box::new(FlatGenerator { ground_height }),
      GeneratorConfig::Sphere { radius, inverted } => {
        Box::new(SphereGenerator { radius, inverted })
      }
    }
  }
}

/// Uniform field. Useful for tests and as an "all solid" or "all air" base.
#[derive(Clone, Copy, Debug)]
pub struct ConstantGenerator {
  pub value: VoxelValue,
  pub color: VoxelColor,
}

impl ConstantGenerator {
  pub fn solid() -> Self {
    Self {
      value: crate::types::VALUE_MIN,
      color: VoxelColor::WHITE,
    }
  }

  pub fn empty() -> Self {
    Self {
      value: crate::types::VALUE_MAX,
      color: VoxelColor::WHITE,
    }
  }
}

impl WorldGenerator for ConstantGenerator {
  fn generate(&self, _coord: VoxelCoord) -> VoxelSample {
    VoxelSample::new(self.value, self.color)
  }
}

/// Flat ground: solid below `ground_height`, air above, with a one-voxel
/// gradient band at the surface so meshing has a zero crossing to find.
#[derive(Clone, Copy, Debug)]
pub struct FlatGenerator {
  pub ground_height: i32,
}

impl WorldGenerator for FlatGenerator {
  fn generate(&self, coord: VoxelCoord) -> VoxelSample {
    let distance = (coord.y - self.ground_height) as VoxelValue;
    VoxelSample::new(clamp_value(distance), VoxelColor::WHITE)
  }
}

/// Sphere centered at the voxel origin. `inverted` flips inside/outside,
/// giving a hollow cavity instead of a ball.
#[derive(Clone, Copy, Debug)]
pub struct SphereGenerator {
  pub radius: f64,
  pub inverted: bool,
}

impl WorldGenerator for SphereGenerator {
  fn generate(&self, coord: VoxelCoord) -> VoxelSample {
    let distance = coord.as_dvec3().length() - self.radius;
    let value = if self.inverted { -distance } else { distance };
    VoxelSample::new(clamp_value(value as VoxelValue), VoxelColor::WHITE)
  }
}

#[cfg(test)]
mod tests {
  use glam::IVec3;

  use super::*;

  #[test]
  fn constant_generator_is_uniform() {
    let gen = ConstantGenerator::solid();
    assert_eq!(gen.generate(IVec3::ZERO), gen.generate(IVec3::splat(100)));
    assert!(gen.generate(IVec3::new(1, 2, 3)).is_solid());
  }

  #[test]
  fn flat_generator_surface_at_ground_height() {
    let gen = FlatGenerator { ground_height: 4 };
    assert!(gen.generate(IVec3::new(0, 0, 0)).is_solid());
    assert!(!gen.generate(IVec3::new(0, 8, 0)).is_solid());
    assert_eq!(gen.generate(IVec3::new(0, 4, 0)).value, 0.0);
  }

  #[test]
  fn sphere_generator_inside_outside() {
    let gen = SphereGenerator {
      radius: 10.0,
      inverted: false,
    };
    assert!(gen.generate(IVec3::ZERO).is_solid());
    assert!(!gen.generate(IVec3::new(20, 0, 0)).is_solid());

    let inverted = SphereGenerator {
      radius: 10.0,
      inverted: true,
    };
    assert!(!inverted.generate(IVec3::ZERO).is_solid());
  }

  #[test]
  fn config_roundtrips_to_generator() {
    let config = GeneratorConfig::Flat { ground_height: 2 };
    let gen = config.build();
    assert!(gen.generate(IVec3::new(5, -3, 5)).is_solid());
  }
}
