//! Render/LOD octree.
//!
//! A second octree over the same space as the value octree, tracking
//! render state per region instead of raw values. A node's depth is its
//! LOD: 0 = finest (one 16³ chunk), the root sits at the world depth.
//! Nodes closer to the camera subdivide; distant subtrees collapse.
//!
//! Nodes live in a generational arena. Handles (`ChunkId`) are weak:
//! resolving a stale handle yields `None`, so a destroyed node can never
//! be revived by a late scheduler task.
//!
//! # Per-node state machine
//!
//! `Unbuilt → Building → Built ⇄ Dirty`, with `PendingDeletion` reachable
//! from any rendered state when the camera no longer needs the node.
//! `Built/Dirty → Building` only happens when the scheduler dequeues the
//! node; a completion is accepted only in `Building` with a matching build
//! epoch — anything else is a stale result and is dropped.

use glam::DVec3;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::coords::{VoxelBounds, VoxelCoord, WorldTransform};
use crate::value_octree::LEAF_SIZE;

/// Face bits for seam masks: -X, +X, -Y, +Y, -Z, +Z.
pub const FACE_OFFSETS: [VoxelCoord; 6] = [
  VoxelCoord::new(-1, 0, 0),
  VoxelCoord::new(1, 0, 0),
  VoxelCoord::new(0, -1, 0),
  VoxelCoord::new(0, 1, 0),
  VoxelCoord::new(0, 0, -1),
  VoxelCoord::new(0, 0, 1),
];

/// 6-bit mask of faces whose neighbor renders at a coarser LOD.
/// Bit i corresponds to `FACE_OFFSETS[i]`.
pub type SeamMask = u8;

/// Generational handle to a chunk node. Stale handles resolve to `None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ChunkId {
  pub index: u32,
  pub generation: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ChunkState {
  /// No representation yet; a build is wanted.
  Unbuilt,
  /// A rebuild task is in flight.
  Building,
  /// Current representation matches the data.
  Built,
  /// Representation exists but no longer matches the data.
  Dirty,
  /// Falling out of scope; representation kept visible until the deletion
  /// delay expires so replacements have time to build.
  PendingDeletion,
}

pub struct ChunkNode {
  pub bounds: VoxelBounds,
  /// LOD level: 0 = finest, equals tree height below this node.
  pub lod: u8,
  pub state: ChunkState,
  /// Bumped on every dirty-mark; a completion with an older epoch is stale.
  pub build_epoch: u64,
  /// Render-side id of the accepted representation. Ownership of the
  /// representation itself lives with the render collaborator; this is
  /// relation + lookup only.
  pub chunk_ref: Option<u64>,
  parent: Option<ChunkId>,
  children: Option<[ChunkId; 8]>,
  /// Remaining seconds until this node's mesh (subdivided parent) or this
  /// node's child subtree (collapsed leaf) is destroyed.
  mesh_drop_countdown: Option<f32>,
  collapse_countdown: Option<f32>,
}

impl ChunkNode {
  fn new(bounds: VoxelBounds, lod: u8, parent: Option<ChunkId>) -> Self {
    Self {
      bounds,
      lod,
      state: ChunkState::Unbuilt,
      build_epoch: 0,
      chunk_ref: None,
      parent,
      children: None,
      mesh_drop_countdown: None,
      collapse_countdown: None,
    }
  }

  pub fn has_children(&self) -> bool {
    self.children.is_some()
  }

  /// A node renders itself when it has no live subdivision.
  fn is_leaf_role(&self) -> bool {
    self.children.is_none()
  }

  /// The node currently responsible for rendering its region: a leaf, or
  /// a collapse survivor whose children are on their way out. Dirty
  /// marking, point lookup and build admission all use this rule.
  pub fn renders_itself(&self) -> bool {
    self.children.is_none() || self.collapse_countdown.is_some()
  }
}

struct Slot {
  generation: u32,
  node: Option<ChunkNode>,
}

/// Outcome of accepting a completed build.
pub struct AcceptedBuild {
  /// Render-side id assigned to the new representation.
  pub chunk_ref: u64,
  /// Previous representation to drop, if the build replaced one.
  pub replaced: Option<u64>,
}

pub struct ChunkOctree {
  slots: Vec<Slot>,
  free: Vec<u32>,
  root: ChunkId,
  depth: u8,
  next_chunk_ref: u64,
}

impl ChunkOctree {
  pub fn new(depth: u8) -> Self {
    let bounds = VoxelBounds::world_extent(depth, LEAF_SIZE);
    let mut octree = Self {
      slots: Vec::new(),
      free: Vec::new(),
      root: ChunkId {
        index: 0,
        generation: 0,
      },
      depth,
      next_chunk_ref: 1,
    };
    octree.root = octree.alloc(ChunkNode::new(bounds, depth, None));
    octree
  }

  pub fn root(&self) -> ChunkId {
    self.root
  }

  pub fn depth(&self) -> u8 {
    self.depth
  }

  /// Number of live nodes.
  pub fn len(&self) -> usize {
    self.slots.iter().filter(|s| s.node.is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn get(&self, id: ChunkId) -> Option<&ChunkNode> {
    let slot = self.slots.get(id.index as usize)?;
    if slot.generation != id.generation {
      return None;
    }
    slot.node.as_ref()
  }

  pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut ChunkNode> {
    let slot = self.slots.get_mut(id.index as usize)?;
    if slot.generation != id.generation {
      return None;
    }
    slot.node.as_mut()
  }

  fn alloc(&mut self, node: ChunkNode) -> ChunkId {
    if let Some(index) = self.free.pop() {
      let slot = &mut self.slots[index as usize];
      slot.node = Some(node);
      ChunkId {
        index,
        generation: slot.generation,
      }
    } else {
      let index = self.slots.len() as u32;
      self.slots.push(Slot {
        generation: 0,
        node: Some(node),
      });
      ChunkId {
        index,
        generation: 0,
      }
    }
  }

  /// Free a slot. The generation bump is what invalidates stale handles.
  fn release(&mut self, id: ChunkId) -> Option<ChunkNode> {
    let slot = self.slots.get_mut(id.index as usize)?;
    if slot.generation != id.generation || slot.node.is_none() {
      return None;
    }
    slot.generation = slot.generation.wrapping_add(1);
    self.free.push(id.index);
    slot.node.take()
  }

  // ---------------------------------------------------------------------
  // Camera-driven LOD refinement
  // ---------------------------------------------------------------------

  /// Should `node` render at a finer LOD than its own?
  ///
  /// Distance threshold: subdivide while the camera is closer than
  /// `high_resolution_distance_offset + quality * node world size`.
  /// `quality` scales the distance-to-LOD curve; the offset is an additive
  /// radius held at finest LOD.
  fn wants_subdivision(
    node: &ChunkNode,
    camera: DVec3,
    transform: &WorldTransform,
    quality: f64,
    high_resolution_distance_offset: f64,
  ) -> bool {
    if node.lod == 0 {
      return false;
    }
    let center = transform.bounds_center(&node.bounds);
    let node_world_size = node.bounds.size().x as f64 * transform.voxel_size;
    camera.distance(center) < high_resolution_distance_offset + quality * node_world_size
  }

  /// Recompute desired LOD per node from the camera position.
  ///
  /// Returns nodes that now need a (re)build; the caller queues them on
  /// the scheduler. Nodes falling out of scope start their deletion-delay
  /// countdown instead of dying immediately.
  pub fn update_camera_position(
    &mut self,
    camera: DVec3,
    transform: &WorldTransform,
    quality: f64,
    high_resolution_distance_offset: f64,
    deletion_delay: f32,
  ) -> Vec<ChunkId> {
    let mut to_queue = Vec::new();
    let mut stack = vec![self.root];

    while let Some(id) = stack.pop() {
      let Some(node) = self.get(id) else { continue };
      let subdivide = Self::wants_subdivision(
        node,
        camera,
        transform,
        quality,
        high_resolution_distance_offset,
      );

      if subdivide {
        if node.has_children() {
          // Cancel a pending collapse; revive children that were dying.
          // The survivor's coarse mesh (or in-flight coarse build) is
          // superseded by the children again.
          if let Some(node) = self.get_mut(id) {
            if node.collapse_countdown.take().is_some() {
              if node.chunk_ref.is_some() && node.state != ChunkState::PendingDeletion {
                node.state = ChunkState::PendingDeletion;
                node.mesh_drop_countdown = Some(deletion_delay);
              } else if matches!(node.state, ChunkState::Building | ChunkState::Dirty) {
                node.state = ChunkState::Unbuilt;
                node.build_epoch += 1;
              }
            }
          }
          let children = self.children_of(id);
          for child in children {
            self.revive(child, false, &mut to_queue);
            stack.push(child);
          }
        } else {
          let children = self.subdivide(id);
          to_queue.extend_from_slice(&children);
          stack.extend_from_slice(&children);
          // The coarse mesh is phased out once the children replace it.
          if let Some(node) = self.get_mut(id) {
            if node.chunk_ref.is_some() && node.state != ChunkState::PendingDeletion {
              node.state = ChunkState::PendingDeletion;
              node.mesh_drop_countdown = Some(deletion_delay);
            } else if matches!(node.state, ChunkState::Building | ChunkState::Dirty) {
              // A coarse build in flight or queued is superseded by the
              // children; its completion must not be accepted.
              node.state = ChunkState::Unbuilt;
              node.build_epoch += 1;
            }
          }
        }
      } else {
        // Leaf role wanted here.
        if let Some(node) = self.get_mut(id) {
          node.mesh_drop_countdown = None;
          if node.has_children() && node.collapse_countdown.is_none() {
            trace!(?id, "collapsing subtree");
            node.collapse_countdown = Some(deletion_delay);
          }
        }
        if self.get(id).is_some_and(|n| n.has_children()) {
          self.mark_subtree_pending_deletion(id);
        }
        self.revive(id, true, &mut to_queue);
      }
    }

    to_queue
  }

  pub fn children_of(&self, id: ChunkId) -> SmallVec<[ChunkId; 8]> {
    self
      .get(id)
      .and_then(|n| n.children)
      .map(SmallVec::from)
      .unwrap_or_default()
  }

  /// Create 8 children for a node. The node must not already have them.
  fn subdivide(&mut self, id: ChunkId) -> SmallVec<[ChunkId; 8]> {
    let Some(node) = self.get(id) else {
      return SmallVec::new();
    };
    debug_assert!(node.lod > 0 && node.children.is_none());
    let min = node.bounds.min;
    let half = node.bounds.size().x / 2;
    let child_lod = node.lod - 1;

    let mut ids: SmallVec<[ChunkId; 8]> = SmallVec::new();
    for octant in 0..8u8 {
      let offset = VoxelCoord::new(
        (octant & 1) as i32,
        ((octant >> 1) & 1) as i32,
        ((octant >> 2) & 1) as i32,
      ) * half;
      let bounds = VoxelBounds::cube(min + offset, half);
      ids.push(self.alloc(ChunkNode::new(bounds, child_lod, Some(id))));
    }

    let children: [ChunkId; 8] = match ids.as_slice().try_into() {
      Ok(array) => array,
      Err(_) => unreachable!("octant range always yields 8 children"),
    };
    if let Some(node) = self.get_mut(id) {
      node.children = Some(children);
    }
    ids
  }

  /// Mark every descendant (not the node itself) as pending deletion.
  /// Their representations stay visible until the countdown expires.
  fn mark_subtree_pending_deletion(&mut self, id: ChunkId) {
    let mut stack = self.children_of(id).to_vec();
    while let Some(child) = stack.pop() {
      stack.extend(self.children_of(child));
      if let Some(node) = self.get_mut(child) {
        node.state = ChunkState::PendingDeletion;
      }
    }
  }

  /// Bring a node back into active service after (or instead of) deletion.
  /// A node with a representation is conservatively re-marked dirty: edits
  /// may have landed while it was out of scope.
  /// `target_leaf` marks the node as the one that should render its
  /// region now (true for collapse survivors even while their dying
  /// children still exist).
  fn revive(&mut self, id: ChunkId, target_leaf: bool, to_queue: &mut Vec<ChunkId>) {
    let Some(node) = self.get_mut(id) else { return };
    if node.state == ChunkState::PendingDeletion {
      node.mesh_drop_countdown = None;
      if node.chunk_ref.is_some() {
        node.state = ChunkState::Dirty;
        node.build_epoch += 1;
      } else {
        node.state = ChunkState::Unbuilt;
      }
      to_queue.push(id);
    } else if (target_leaf || node.is_leaf_role())
      && node.state == ChunkState::Unbuilt
      && node.chunk_ref.is_none()
    {
      // Fresh node that has never been queued.
      to_queue.push(id);
    }
  }

  // ---------------------------------------------------------------------
  // Dirty marking
  // ---------------------------------------------------------------------

  /// Mark every rendered node whose region intersects `bounds` (expanded
  /// by one voxel so border edits reach face-sharing neighbors and coarser
  /// ancestors) as needing a rebuild. Returns the nodes to queue.
  pub fn mark_region_dirty(&mut self, bounds: VoxelBounds) -> Vec<ChunkId> {
    let region = bounds.expand(1);
    let mut dirty = Vec::new();
    let mut stack = vec![self.root];
    while let Some(id) = stack.pop() {
      let Some(node) = self.get(id) else { continue };
      if !node.bounds.intersects(&region) {
        continue;
      }
      // A collapsing node is the render target even while its dying
      // children still exist; the edit must reach it, not them.
      if !node.renders_itself() {
        stack.extend(self.children_of(id));
        continue;
      }
      if self.mark_dirty(id) {
        dirty.push(id);
      }
    }
    dirty
  }

  /// Mark one node dirty. Returns true when the node should be queued.
  pub fn mark_dirty(&mut self, id: ChunkId) -> bool {
    let Some(node) = self.get_mut(id) else {
      return false;
    };
    match node.state {
      ChunkState::PendingDeletion => false,
      ChunkState::Building => {
        // In-flight result is now stale; it will be discarded on arrival
        // and the node rebuilt from the queue.
        node.state = ChunkState::Dirty;
        node.build_epoch += 1;
        true
      }
      ChunkState::Built => {
        node.state = ChunkState::Dirty;
        node.build_epoch += 1;
        true
      }
      ChunkState::Dirty | ChunkState::Unbuilt => true,
    }
  }

  /// Mark every leaf-role node dirty (full-world update).
  pub fn mark_all_dirty(&mut self) -> Vec<ChunkId> {
    self.mark_region_dirty(VoxelBounds::world_extent(self.depth, LEAF_SIZE))
  }

  /// Node currently responsible for rendering `coord`. Stops at a
  /// collapsing node rather than descending into its dying children.
  pub fn node_at(&self, coord: VoxelCoord) -> Option<ChunkId> {
    let mut id = self.root;
    loop {
      let node = self.get(id)?;
      if !node.bounds.contains(coord) {
        return None;
      }
      if node.renders_itself() {
        return Some(id);
      }
      let Some(children) = node.children else {
        return Some(id);
      };
      let half = node.bounds.size().x / 2;
      let local = coord - node.bounds.min;
      let mut octant = 0usize;
      if local.x >= half {
        octant |= 1;
      }
      if local.y >= half {
        octant |= 2;
      }
      if local.z >= half {
        octant |= 4;
      }
      id = children[octant];
    }
  }

  /// Faces of `id` whose rendering neighbor sits at a coarser LOD.
  /// The builder uses this to stitch seams when border rebuilds are on.
  pub fn seam_mask(&self, id: ChunkId) -> SeamMask {
    let Some(node) = self.get(id) else { return 0 };
    let size = node.bounds.size().x;
    let center = node.bounds.min + VoxelCoord::splat(size / 2);
    let mut mask = 0u8;
    for (face, offset) in FACE_OFFSETS.iter().enumerate() {
      // One voxel beyond the face center.
      let probe = center + *offset * (size / 2 + 1);
      if let Some(neighbor) = self.node_at(probe) {
        if self.get(neighbor).is_some_and(|n| n.lod > node.lod) {
          mask |= 1 << face;
        }
      }
    }
    mask
  }

  /// Face-adjacent leaf-role neighbors of `id` (for border rebuilds).
  pub fn face_neighbors(&self, id: ChunkId) -> SmallVec<[ChunkId; 6]> {
    let Some(node) = self.get(id) else {
      return SmallVec::new();
    };
    let size = node.bounds.size().x;
    let center = node.bounds.min + VoxelCoord::splat(size / 2);
    let mut out: SmallVec<[ChunkId; 6]> = SmallVec::new();
    for offset in FACE_OFFSETS {
      let probe = center + offset * (size / 2 + 1);
      if let Some(neighbor) = self.node_at(probe) {
        if neighbor != id && !out.contains(&neighbor) {
          out.push(neighbor);
        }
      }
    }
    out
  }

  // ---------------------------------------------------------------------
  // Scheduler integration
  // ---------------------------------------------------------------------

  /// Transition a queued node into `Building`, returning what the rebuild
  /// task needs. `None` means the node is gone or no longer wants a build.
  pub fn begin_build(&mut self, id: ChunkId) -> Option<BuildTicket> {
    let node = self.get_mut(id)?;
    // A subdivided node is rendered by its children, unless those children
    // are on their way out (collapse in progress).
    if !node.renders_itself() {
      return None;
    }
    match node.state {
      ChunkState::Unbuilt | ChunkState::Dirty => {
        node.state = ChunkState::Building;
        Some(BuildTicket {
          id,
          bounds: node.bounds,
          lod: node.lod,
          epoch: node.build_epoch,
        })
      }
      _ => None,
    }
  }

  /// A task abandoned its build (its world was torn down mid-read). The
  /// node goes back to `Dirty` and retries on the next flush.
  pub fn fail_build(&mut self, id: ChunkId, epoch: u64) {
    if let Some(node) = self.get_mut(id) {
      if node.state == ChunkState::Building && node.build_epoch == epoch {
        node.state = ChunkState::Dirty;
      }
    }
  }

  /// Accept a completed build if it is still current.
  ///
  /// Accepts only in `Building` with a matching epoch; a stale result is
  /// dropped and the (re-dirtied) node stays on its way back through the
  /// queue.
  pub fn complete_build(&mut self, id: ChunkId, epoch: u64) -> Option<AcceptedBuild> {
    let next_ref = self.next_chunk_ref;
    let node = self.get_mut(id)?;
    if node.state != ChunkState::Building || node.build_epoch != epoch {
      debug!(?id, epoch, "discarding stale build result");
      return None;
    }
    let replaced = node.chunk_ref.replace(next_ref);
    node.state = ChunkState::Built;
    self.next_chunk_ref += 1;
    Some(AcceptedBuild {
      chunk_ref: next_ref,
      replaced,
    })
  }

  // ---------------------------------------------------------------------
  // Deletion delay
  // ---------------------------------------------------------------------

  /// Advance deletion countdowns. Returns render-side chunk refs whose
  /// representations must be dropped now.
  pub fn tick(&mut self, dt: f32) -> Vec<u64> {
    let mut dropped = Vec::new();

    // Subdivided parents: drop only the coarse mesh, keep the node.
    let live_ids: Vec<ChunkId> = self
      .slots
      .iter()
      .enumerate()
      .filter_map(|(index, slot)| {
        slot.node.as_ref().map(|_| ChunkId {
          index: index as u32,
          generation: slot.generation,
        })
      })
      .collect();

    let mut expired_collapses = Vec::new();
    for id in live_ids {
      let Some(node) = self.get_mut(id) else { continue };
      if let Some(remaining) = &mut node.mesh_drop_countdown {
        *remaining -= dt;
        if *remaining <= 0.0 {
          node.mesh_drop_countdown = None;
          node.state = ChunkState::Unbuilt;
          node.build_epoch += 1;
          if let Some(chunk_ref) = node.chunk_ref.take() {
            dropped.push(chunk_ref);
          }
        }
      }
      if let Some(remaining) = &mut node.collapse_countdown {
        *remaining -= dt;
        if *remaining <= 0.0 {
          node.collapse_countdown = None;
          expired_collapses.push(id);
        }
      }
    }

    // Collapsed leaves: free the whole subtree below them.
    for id in expired_collapses {
      let children = self.children_of(id);
      for child in children {
        self.free_subtree(child, &mut dropped);
      }
      if let Some(node) = self.get_mut(id) {
        node.children = None;
      }
    }

    dropped
  }

  fn free_subtree(&mut self, id: ChunkId, dropped: &mut Vec<u64>) {
    let children = self.children_of(id);
    for child in children {
      self.free_subtree(child, dropped);
    }
    if let Some(node) = self.release(id) {
      if let Some(chunk_ref) = node.chunk_ref {
        dropped.push(chunk_ref);
      }
    }
  }
}

/// Everything a rebuild task needs to know about its node, captured at
/// dequeue time.
#[derive(Clone, Copy, Debug)]
pub struct BuildTicket {
  pub id: ChunkId,
  pub bounds: VoxelBounds,
  pub lod: u8,
  pub epoch: u64,
}

#[cfg(test)]
#[path = "chunk_octree_test.rs"]
mod chunk_octree_test;
