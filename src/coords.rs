//! Coordinate spaces and integer bounds.
//!
//! Voxel space is an integer lattice distinct from continuous world space.
//! A fixed affine transform (uniform scale + origin) converts between the
//! two; all octree logic works purely in voxel space.

use glam::{DVec3, IVec3};

/// Integer coordinate in voxel space.
pub type VoxelCoord = IVec3;

/// Affine world <-> voxel transform.
///
/// Double precision so huge worlds far from the origin do not lose voxel
/// addressing accuracy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorldTransform {
  /// Edge length of one voxel in world units.
  pub voxel_size: f64,
  /// World-space position of voxel (0, 0, 0).
  pub origin: DVec3,
}

impl WorldTransform {
  pub fn new(voxel_size: f64, origin: DVec3) -> Self {
    debug_assert!(voxel_size > 0.0, "voxel_size must be positive");
    Self { voxel_size, origin }
  }

  /// Convert a world-space position to the voxel containing it.
  #[inline]
  pub fn world_to_voxel(&self, position: DVec3) -> VoxelCoord {
    let local = (position - self.origin) / self.voxel_size;
    IVec3::new(
      local.x.floor() as i32,
      local.y.floor() as i32,
      local.z.floor() as i32,
    )
  }

  /// Convert a voxel coordinate to its world-space minimum corner.
  #[inline]
  pub fn voxel_to_world(&self, coord: VoxelCoord) -> DVec3 {
    self.origin + coord.as_dvec3() * self.voxel_size
  }

  /// World-space center of a voxel-space axis-aligned box.
  #[inline]
  pub fn bounds_center(&self, bounds: &VoxelBounds) -> DVec3 {
    let min = self.voxel_to_world(bounds.min);
    let max = self.voxel_to_world(bounds.max);
    (min + max) * 0.5
  }
}

impl Default for WorldTransform {
  fn default() -> Self {
    Self::new(1.0, DVec3::ZERO)
  }
}

/// Axis-aligned integer box: `min` inclusive, `max` exclusive.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VoxelBounds {
  pub min: VoxelCoord,
  pub max: VoxelCoord,
}

impl VoxelBounds {
  pub fn new(min: VoxelCoord, max: VoxelCoord) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "bounds min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Cube of edge `size` with the given minimum corner.
  pub fn cube(min: VoxelCoord, size: i32) -> Self {
    Self::new(min, min + IVec3::splat(size))
  }

  /// World extent for a given octree depth: width `16 * 2^depth`,
  /// centered on the voxel origin.
  pub fn world_extent(depth: u8, leaf_size: i32) -> Self {
    let half = (leaf_size << depth) / 2;
    Self::new(IVec3::splat(-half), IVec3::splat(half))
  }

  #[inline]
  pub fn contains(&self, coord: VoxelCoord) -> bool {
    coord.x >= self.min.x
      && coord.x < self.max.x
      && coord.y >= self.min.y
      && coord.y < self.max.y
      && coord.z >= self.min.z
      && coord.z < self.max.z
  }

  #[inline]
  pub fn intersects(&self, other: &VoxelBounds) -> bool {
    self.min.x < other.max.x
      && self.max.x > other.min.x
      && self.min.y < other.max.y
      && self.max.y > other.min.y
      && self.min.z < other.max.z
      && self.max.z > other.min.z
  }

  /// Grow the box by `amount` voxels on every side.
  pub fn expand(&self, amount: i32) -> Self {
    Self {
      min: self.min - IVec3::splat(amount),
      max: self.max + IVec3::splat(amount),
    }
  }

  /// Clip this box against another, returning the intersection.
  /// Returns `None` when the boxes do not overlap.
  pub fn clipped(&self, other: &VoxelBounds) -> Option<Self> {
    let min = self.min.max(other.min);
    let max = self.max.min(other.max);
    if min.x < max.x && min.y < max.y && min.z < max.z {
      Some(Self { min, max })
    } else {
      None
    }
  }

  #[inline]
  pub fn size(&self) -> IVec3 {
    self.max - self.min
  }

  pub fn volume(&self) -> usize {
    let s = self.size();
    (s.x as usize) * (s.y as usize) * (s.z as usize)
  }

  /// Row-major iteration: x outermost, z innermost.
  ///
  /// The order is part of the contract — the mesh collaborator relies on a
  /// deterministic sample order for deterministic output.
  pub fn iter_row_major(&self) -> RowMajorIter {
    RowMajorIter {
      bounds: *self,
      cursor: self.min,
      done: self.volume() == 0,
    }
  }
}

/// Deterministic iterator over the coordinates of a [`VoxelBounds`].
#[derive(Clone, Debug)]
pub struct RowMajorIter {
  bounds: VoxelBounds,
  cursor: VoxelCoord,
  done: bool,
}

impl Iterator for RowMajorIter {
  type Item = VoxelCoord;

  fn next(&mut self) -> Option<VoxelCoord> {
    if self.done {
      return None;
    }
    let current = self.cursor;

    self.cursor.z += 1;
    if self.cursor.z >= self.bounds.max.z {
      self.cursor.z = self.bounds.min.z;
      self.cursor.y += 1;
      if self.cursor.y >= self.bounds.max.y {
        self.cursor.y = self.bounds.min.y;
        self.cursor.x += 1;
        if self.cursor.x >= self.bounds.max.x {
          self.done = true;
        }
      }
    }

    Some(current)
  }
}

#[cfg(test)]
#[path = "coords_test.rs"]
mod coords_test;
