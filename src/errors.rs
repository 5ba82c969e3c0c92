//! Error taxonomy for the voxel data surface.
//!
//! Boundary violations are recovered locally by the caller refusing the
//! single operation; they never abort a batch. Stale build results are an
//! internal condition (silently discarded by the scheduler) and have no
//! variant here.

use thiserror::Error;

use crate::coords::VoxelCoord;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VoxelError {
  /// Coordinate lies outside the configured world extent.
  #[error("coordinate {coord:?} is outside the world extent")]
  OutOfBounds { coord: VoxelCoord },

  /// A subdivision finer than the minimum leaf size was requested.
  /// Interior descent always stops at depth 0, so the public query
  /// surface never returns this; only direct octree walks can see it.
  #[error("octree descent below depth 0 (leaf size is fixed)")]
  OutOfDepth,

  /// The world generator returned different values for the same coordinate.
  /// Breaks the assumption that unmodified regions can be regenerated.
  #[error("world generator is not deterministic at {coord:?}")]
  GeneratorInconsistency { coord: VoxelCoord },

  /// A save snapshot or sync payload failed to decode.
  #[error("corrupt save data: {0}")]
  CorruptSave(String),

  /// World settings rejected at construction time.
  #[error("invalid world settings: {0}")]
  InvalidSettings(String),
}

pub type Result<T, E = VoxelError> = std::result::Result<T, E>;
