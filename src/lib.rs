//! voxel_world - Sparse voxel world core with LOD streaming
//!
//! This crate provides the data side of a smooth-voxel terrain system:
//! a sparse value octree over a signed density field, a camera-driven LOD
//! chunk octree, an asynchronous rebuild scheduler, and diff-based
//! save/sync. Rendering is pluggable: implement [`ChunkBuilder`] to turn
//! sample lattices into whatever representation the host engine wants.
//!
//! # Example
//!
//! ```ignore
//! use voxel_world::{
//!   ChunkBuilder, ChunkRegion, GeneratorConfig, SeamMask, VoxelSample,
//!   VoxelWorld, WorldSettings,
//! };
//!
//! struct MyMesher;
//!
//! impl ChunkBuilder for MyMesher {
//!   type Output = MyMesh;
//!   fn build(&self, region: &ChunkRegion, samples: &[VoxelSample],
//!            seams: SeamMask) -> MyMesh {
//!     // surface extraction of choice
//!   }
//! }
//!
//! let mut world = VoxelWorld::new(WorldSettings::default(), MyMesher)?;
//! world.update_camera_position(camera);
//! let frame = world.tick(dt);
//! for chunk in frame.built { /* display chunk.output */ }
//! ```

pub mod types;
pub use types::{
  clamp_value, VoxelColor, VoxelSample, VoxelValue, EDIT_STRENGTH_SCALE, VALUE_MAX, VALUE_MIN,
};

pub mod coords;
pub use coords::{VoxelBounds, VoxelCoord, WorldTransform};

pub mod errors;
pub use errors::{Result, VoxelError};

// Procedural base terrain
pub mod generator;
pub use generator::{GeneratorConfig, WorldGenerator};

// Sparse value storage
pub mod value_octree;
pub use value_octree::{ValueOctree, LEAF_SIZE, MAX_DEPTH};

// Thread-safe data facade with edit logging
pub mod voxel_data;
pub use voxel_data::VoxelData;

// Edit diffs and network sync payloads
pub mod diff;
pub use diff::{ColorDiff, DiffLog, SyncPacket, ValueDiff};

// Snapshot serialization
pub mod save;
pub use save::{SavedBlock, WorldSave, SAVE_MAGIC, SAVE_VERSION};

// Render-side LOD octree
pub mod chunk_octree;
pub use chunk_octree::{
  AcceptedBuild, BuildTicket, ChunkId, ChunkNode, ChunkOctree, ChunkState, SeamMask,
  FACE_OFFSETS,
};

// Asynchronous rebuild scheduling
pub mod scheduler;
pub use scheduler::{BuiltChunk, ChunkBuilder, ChunkRegion, UpdateScheduler};

// World facade
pub mod world;
pub use world::{TickOutput, VoxelWorld, WorldSettings};
