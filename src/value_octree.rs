//! Sparse octree over voxel values.
//!
//! The root covers the full world cube (width `16 * 2^depth`, centered on
//! the origin). Unmodified regions store nothing and defer to the world
//! generator; the first write inside a leaf materializes a dense 16³ block
//! seeded from the generator. Materialization is monotone: a block never
//! reverts to generator-only storage.
//!
//! # Octant convention
//!
//! Child octants use the bit layout of the LOD octree: bit 0 = +X,
//! bit 1 = +Y, bit 2 = +Z.

use std::sync::Arc;

use glam::IVec3;
use tracing::debug;

use crate::coords::{RowMajorIter, VoxelBounds, VoxelCoord};
use crate::errors::{Result, VoxelError};
use crate::generator::WorldGenerator;
use crate::types::{VoxelColor, VoxelSample, VoxelValue};

/// Edge length of a leaf block in voxels.
pub const LEAF_SIZE: i32 = 16;

/// Cells per leaf block.
pub const LEAF_VOLUME: usize = (LEAF_SIZE * LEAF_SIZE * LEAF_SIZE) as usize;

/// Maximum configurable world depth (width `16 * 2^9` = 8192).
pub const MAX_DEPTH: u8 = 9;

/// Dense 16³ sample block, allocated when a region is first edited.
struct Block {
  samples: Box<[VoxelSample]>,
}

impl Block {
  /// Seed a block from the generator over `bounds`.
  ///
  /// Re-samples the first cell after filling as a best-effort determinism
  /// check; a generator that disagrees with itself would silently corrupt
  /// every block-forgetting decision later.
  fn materialize(bounds: &VoxelBounds, generator: &dyn WorldGenerator) -> Result<Self> {
    let first_coord = bounds.min;
    let first = generator.generate(first_coord);

    let mut samples = Vec::with_capacity(LEAF_VOLUME);
    for coord in bounds.iter_row_major() {
      samples.push(generator.generate(coord));
    }

    if samples[0] != first {
      return Err(VoxelError::GeneratorInconsistency { coord: first_coord });
    }

    Ok(Self {
      samples: samples.into_boxed_slice(),
    })
  }

  #[inline]
  fn index(local: IVec3) -> usize {
    debug_assert!(local.min_element() >= 0 && local.max_element() < LEAF_SIZE);
    ((local.x * LEAF_SIZE + local.y) * LEAF_SIZE + local.z) as usize
  }
}

/// Node storage. `Implicit` regions are fully described by the generator.
enum Payload {
  Implicit,
  Children(Box<[Node; 8]>),
  Block(Block),
}

struct Node {
  min: VoxelCoord,
  depth: u8,
  payload: Payload,
}

impl Node {
  fn new(min: VoxelCoord, depth: u8) -> Self {
    Self {
      min,
      depth,
      payload: Payload::Implicit,
    }
  }

  /// Node width in voxels.
  #[inline]
  fn width(&self) -> i32 {
    LEAF_SIZE << self.depth
  }

  fn bounds(&self) -> VoxelBounds {
    VoxelBounds::cube(self.min, self.width())
  }

  /// Octant containing `coord`. Errors if this node is already a leaf.
  fn octant_of(&self, coord: VoxelCoord) -> Result<u8> {
    if self.depth == 0 {
      return Err(VoxelError::OutOfDepth);
    }
    let half = self.width() / 2;
    let local = coord - self.min;
    let mut octant = 0u8;
    if local.x >= half {
      octant |= 1;
    }
    if local.y >= half {
      octant |= 2;
    }
    if local.z >= half {
      octant |= 4;
    }
    Ok(octant)
  }

  /// Split an implicit interior node into 8 implicit children.
  fn subdivide(&mut self) {
    debug_assert!(self.depth > 0);
    let half = self.width() / 2;
    let children: Vec<Node> = (0..8u8)
      .map(|octant| {
        let offset = IVec3::new(
          (octant & 1) as i32,
          ((octant >> 1) & 1) as i32,
          ((octant >> 2) & 1) as i32,
        ) * half;
        Node::new(self.min + offset, self.depth - 1)
      })
      .collect();
    let children: Box<[Node; 8]> = match children.try_into() {
      Ok(array) => array,
      Err(_) => unreachable!("octant range always yields 8 children"),
    };
    self.payload = Payload::Children(children);
  }
}

/// Sparse value octree bounded to the world extent.
pub struct ValueOctree {
  root: Node,
  bounds: VoxelBounds,
  depth: u8,
  generator: Arc<dyn WorldGenerator>,
}

impl ValueOctree {
  /// Create an octree covering `16 * 2^depth` voxels per axis, centered on
  /// the origin. `depth` is clamped to [`MAX_DEPTH`].
  pub fn new(depth: u8, generator: Arc<dyn WorldGenerator>) -> Self {
    let depth = depth.min(MAX_DEPTH);
    let bounds = VoxelBounds::world_extent(depth, LEAF_SIZE);
    Self {
      root: Node::new(bounds.min, depth),
      bounds,
      depth,
      generator,
    }
  }

  pub fn depth(&self) -> u8 {
    self.depth
  }

  pub fn bounds(&self) -> VoxelBounds {
    self.bounds
  }

  pub fn is_in_world(&self, coord: VoxelCoord) -> bool {
    self.bounds.contains(coord)
  }

  /// Sample one coordinate. Override blocks win over the generator.
  pub fn get(&self, coord: VoxelCoord) -> Result<VoxelSample> {
    if !self.bounds.contains(coord) {
      return Err(VoxelError::OutOfBounds { coord });
    }
    Ok(self.sample(coord))
  }

  /// Bounds-unchecked sample. Callers guarantee `coord` is inside the world.
  fn sample(&self, coord: VoxelCoord) -> VoxelSample {
    debug_assert!(self.bounds.contains(coord));
    let mut node = &self.root;
    loop {
      match &node.payload {
        Payload::Implicit => return self.generator.generate(coord),
        Payload::Block(block) => {
          return block.samples[Block::index(coord - node.min)];
        }
        Payload::Children(children) => {
          // Interior nodes always have depth > 0, so octant_of cannot fail.
          let octant = match node.octant_of(coord) {
            Ok(octant) => octant,
            Err(_) => unreachable!("interior node at depth 0"),
          };
          node = &children[octant as usize];
        }
      }
    }
  }

  /// Write one value, materializing the owning leaf block on first write.
  /// Returns the previous value (the generator's, on a fresh block).
  pub fn set_value(&mut self, coord: VoxelCoord, value: VoxelValue) -> Result<VoxelValue> {
    let value = crate::types::clamp_value(value);
    let (block, local) = self.leaf_block_mut(coord)?;
    let cell = &mut block.samples[Block::index(local)];
    let previous = cell.value;
    cell.value = value;
    Ok(previous)
  }

  /// Write one color. Returns the previous color.
  pub fn set_color(&mut self, coord: VoxelCoord, color: VoxelColor) -> Result<VoxelColor> {
    let (block, local) = self.leaf_block_mut(coord)?;
    let cell = &mut block.samples[Block::index(local)];
    let previous = cell.color;
    cell.color = color;
    Ok(previous)
  }

  /// Descend to the leaf owning `coord`, subdividing implicit interior
  /// nodes and materializing the leaf block as needed.
  fn leaf_block_mut(&mut self, coord: VoxelCoord) -> Result<(&mut Block, IVec3)> {
    if !self.bounds.contains(coord) {
      return Err(VoxelError::OutOfBounds { coord });
    }

    let generator = Arc::clone(&self.generator);
    let mut node = &mut self.root;
    while node.depth > 0 {
      if matches!(node.payload, Payload::Implicit) {
        node.subdivide();
      }
      let octant = node.octant_of(coord)?;
      node = match &mut node.payload {
        Payload::Children(children) => &mut children[octant as usize],
        // A materialized block can only exist at depth 0.
        _ => unreachable!("interior node without children"),
      };
    }

    if matches!(node.payload, Payload::Implicit) {
      let bounds = node.bounds();
      debug!(min = ?bounds.min, "materializing block");
      node.payload = Payload::Block(Block::materialize(&bounds, generator.as_ref())?);
    }

    let local = coord - node.min;
    match &mut node.payload {
      Payload::Block(block) => Ok((block, local)),
      _ => unreachable!("leaf node without block after materialization"),
    }
  }

  /// Lazy, restartable, row-major sample sequence over `bounds` clipped to
  /// the world extent. The mesh collaborator depends on this ordering.
  pub fn range(&self, bounds: VoxelBounds) -> RangeIter<'_> {
    let clipped = bounds
      .clipped(&self.bounds)
      .unwrap_or_else(|| VoxelBounds::new(self.bounds.min, self.bounds.min));
    RangeIter {
      octree: self,
      coords: clipped.iter_row_major(),
    }
  }

  /// Strided sampling for LOD chunk rebuilds: one sample every `stride`
  /// voxels over `bounds`, row-major. Coordinates outside the world are
  /// clamped to the boundary so the result is always a full lattice.
  pub fn range_strided(&self, bounds: VoxelBounds, stride: i32) -> Vec<VoxelSample> {
    debug_assert!(stride >= 1);
    let world = self.bounds;
    let clamp = |coord: VoxelCoord| coord.clamp(world.min, world.max - IVec3::ONE);
    let mut out = Vec::new();
    let mut x = bounds.min.x;
    while x < bounds.max.x {
      let mut y = bounds.min.y;
      while y < bounds.max.y {
        let mut z = bounds.min.z;
        while z < bounds.max.z {
          out.push(self.sample(clamp(IVec3::new(x, y, z))));
          z += stride;
        }
        y += stride;
      }
      x += stride;
    }
    out
  }

  /// Visit every materialized block as `(block min corner, samples)`.
  /// Used by the save path.
  pub fn materialized_blocks(&self) -> Vec<(VoxelCoord, &[VoxelSample])> {
    let mut out = Vec::new();
    let mut stack = vec![&self.root];
    while let Some(node) = stack.pop() {
      match &node.payload {
        Payload::Implicit => {}
        Payload::Block(block) => out.push((node.min, block.samples.as_ref())),
        Payload::Children(children) => stack.extend(children.iter()),
      }
    }
    // Deterministic save output regardless of traversal order.
    out.sort_by_key(|(min, _)| (min.x, min.y, min.z));
    out
  }

  /// Install a dense block at its leaf (load path). The block's extent must
  /// be a leaf-aligned 16³ cube inside the world.
  pub fn insert_block(&mut self, min: VoxelCoord, samples: Vec<VoxelSample>) -> Result<()> {
    if samples.len() != LEAF_VOLUME {
      return Err(VoxelError::CorruptSave(format!(
        "block at {min:?} has {} samples, expected {LEAF_VOLUME}",
        samples.len()
      )));
    }
    if !self.bounds.contains(min) {
      return Err(VoxelError::OutOfBounds { coord: min });
    }

    let mut node = &mut self.root;
    while node.depth > 0 {
      if matches!(node.payload, Payload::Implicit) {
        node.subdivide();
      }
      let octant = node.octant_of(min)?;
      node = match &mut node.payload {
        Payload::Children(children) => &mut children[octant as usize],
        _ => unreachable!("interior node without children"),
      };
    }
    if node.min != min {
      return Err(VoxelError::CorruptSave(format!(
        "block min {min:?} is not leaf-aligned (owning leaf starts at {:?})",
        node.min
      )));
    }

    node.payload = Payload::Block(Block {
      samples: samples.into_boxed_slice(),
    });
    Ok(())
  }

  /// Discard every override, returning the octree to generator-only state.
  pub fn clear(&mut self) {
    self.root = Node::new(self.bounds.min, self.depth);
  }
}

/// Lazy row-major iterator over a clipped query box.
///
/// `Clone` makes the sequence restartable: the mesh collaborator may run
/// multiple passes over the same range.
#[derive(Clone)]
pub struct RangeIter<'a> {
  octree: &'a ValueOctree,
  coords: RowMajorIter,
}

impl Iterator for RangeIter<'_> {
  type Item = VoxelSample;

  fn next(&mut self) -> Option<VoxelSample> {
    self.coords.next().map(|coord| self.octree.sample(coord))
  }
}

#[cfg(test)]
#[path = "value_octree_test.rs"]
mod value_octree_test;
