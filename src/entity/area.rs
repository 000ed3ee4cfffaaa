use glam::Vec3;
use log::debug;

use crate::error::WorldError;
use crate::world::block::Block;
use crate::world::cache::{ChunkCache, MAX_RENDER_DISTANCES};
use crate::world::chunk::CHUNK_SIZE;
use crate::world::coords::{AreaPos, GlobalPos};
use crate::world::Lod;

use super::octree::{Aabb, Octree};
use super::{Entity, EntityId, PrototypeRegistry};

/// Radius, in chunks, kept loaded at full detail around the viewer.
pub const LOAD_DISTANCE: i32 = MAX_RENDER_DISTANCES[Lod::Base as usize];

/// Side length of the active entity area cube, in blocks.
pub const ACTIVE_AREA_SIZE: u32 = CHUNK_SIZE * LOAD_DISTANCE as u32 * 2;

/// What to do with an entity whose re-insertion after a warp landed outside
/// the area cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OobAction {
    Destroy,
    Keep,
}

type OobHandler = Box<dyn Fn(&Entity) -> OobAction + Send>;

/// The cube of space around the viewer in which entities tick and collide.
/// Entity positions are relative to `origin`; the cube scrolls only via
/// `warp_space`, which translates every entity the opposite way.
pub struct ActiveArea {
    origin: GlobalPos,
    size: u32,
    slots: Vec<Option<Entity>>,
    free: Vec<u32>,
    order: Vec<EntityId>,
    tree: Octree<EntityId>,
    on_out_of_bounds: OobHandler,
}

impl ActiveArea {
    pub fn new(origin: GlobalPos, size: u32) -> Self {
        Self {
            origin,
            size,
            slots: Vec::new(),
            free: Vec::new(),
            order: Vec::new(),
            tree: Octree::new(size as f32),
            on_out_of_bounds: Box::new(|_| OobAction::Destroy),
        }
    }

    /// Replace the default destroy-on-exit handling of out-of-bounds
    /// entities.
    pub fn set_out_of_bounds_handler(&mut self, handler: OobHandler) {
        self.on_out_of_bounds = handler;
    }

    #[inline]
    pub fn origin(&self) -> GlobalPos {
        self.origin
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Spawn a prototype into the area at an area-relative position.
    pub fn spawn(
        &mut self,
        registry: &PrototypeRegistry,
        kind: &str,
        pos: AreaPos,
    ) -> Result<EntityId, WorldError> {
        let proto = registry
            .get(kind)
            .ok_or_else(|| WorldError::UnknownEntityType(kind.to_string()))?;
        self.insert(proto.instantiate(pos))
    }

    /// Add an already-built entity. Fails when its box misses the area cube.
    pub fn insert(&mut self, mut entity: Entity) -> Result<EntityId, WorldError> {
        entity.compute_bb();
        let id = match self.free.pop() {
            Some(slot) => EntityId(slot),
            None => {
                self.slots.push(None);
                EntityId(self.slots.len() as u32 - 1)
            }
        };
        if !self.tree.insert(id, &entity.bbox) {
            self.free.push(id.0);
            return Err(WorldError::OutOfArea);
        }
        self.slots[id.0 as usize] = Some(entity);
        self.order.push(id);
        Ok(id)
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.slots.get_mut(id.0 as usize)?.take()?;
        self.tree.remove(id);
        self.order.retain(|e| *e != id);
        self.free.push(id.0);
        Some(entity)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id.0 as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.slots.get_mut(id.0 as usize)?.as_mut()
    }

    /// Entity ids in insertion order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.order.clone()
    }

    pub fn tree(&self) -> &Octree<EntityId> {
        &self.tree
    }

    /// Re-seat an entity in the octree after its position changed.
    pub fn update_bounds(&mut self, id: EntityId) {
        let bbox = match self.get_mut(id) {
            Some(entity) => {
                entity.compute_bb();
                entity.bbox
            }
            None => return,
        };
        self.tree.remove(id);
        if !self.tree.insert(id, &bbox) {
            self.handle_out_of_bounds(id);
        }
    }

    /// The absolute position of an entity.
    pub fn global_pos(&self, id: EntityId) -> Option<GlobalPos> {
        let entity = self.get(id)?;
        Some(GlobalPos::from_area(self.origin, entity.pos))
    }

    /// The block at an entity's head, read from whatever the cache holds.
    pub fn head_block(&self, id: EntityId, cache: &ChunkCache) -> Block {
        let entity = match self.get(id) {
            Some(entity) => entity,
            None => return Block::VOID,
        };
        let rpos = GlobalPos::from_area(self.origin, entity.head_pos());
        let coa = cache.get_best_data(rpos.chunk());
        coa.get_block(rpos.chunk_index())
    }

    /// Entities whose cells intersect an area-relative region.
    pub fn entities_in(&self, region: &Aabb) -> Vec<EntityId> {
        self.tree.query(region)
    }

    /// Re-center space on the given entity. When it has left the central
    /// chunk, the whole-chunk part of its position is transferred to the
    /// area origin and subtracted from every entity, so each entity's
    /// absolute position is unchanged. Entities whose re-insertion falls
    /// outside the cube go to the out-of-bounds handler (destroyed by
    /// default). Returns the warp amount in chunks.
    pub fn warp_space(&mut self, center: EntityId) -> (i32, i32, i32) {
        let pos = match self.get(center) {
            Some(entity) => entity.pos,
            None => return (0, 0, 0),
        };
        let chunk = CHUNK_SIZE as f32;
        let wx = (pos.x / chunk).floor() as i32;
        let wy = (pos.y / chunk).floor() as i32;
        let wz = (pos.z / chunk).floor() as i32;
        if wx == 0 && wy == 0 && wz == 0 {
            return (0, 0, 0);
        }
        let shift = Vec3::new(
            (wx * CHUNK_SIZE as i32) as f32,
            (wy * CHUNK_SIZE as i32) as f32,
            (wz * CHUNK_SIZE as i32) as f32,
        );
        self.origin = self.origin.offset(
            (wx * CHUNK_SIZE as i32) as i64,
            (wy * CHUNK_SIZE as i32) as i64,
            (wz * CHUNK_SIZE as i32) as i64,
        );
        let mut escaped = Vec::new();
        for id in self.order.clone() {
            let bbox = {
                let entity = match self.get_mut(id) {
                    Some(entity) => entity,
                    None => continue,
                };
                entity.pos -= shift;
                entity.compute_bb();
                entity.bbox
            };
            self.tree.remove(id);
            if !self.tree.insert(id, &bbox) {
                escaped.push(id);
            }
        }
        for id in escaped {
            self.handle_out_of_bounds(id);
        }
        debug!("warped space by ({wx}, {wy}, {wz}) chunks; origin now {:?}", self.origin);
        (wx, wy, wz)
    }

    fn handle_out_of_bounds(&mut self, id: EntityId) {
        let action = match self.get(id) {
            Some(entity) => (self.on_out_of_bounds)(entity),
            None => return,
        };
        match action {
            OobAction::Destroy => {
                self.remove(id);
            }
            OobAction::Keep => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::coords::AreaPos;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn area() -> ActiveArea {
        ActiveArea::new(GlobalPos::ZERO, ACTIVE_AREA_SIZE)
    }

    fn registry() -> PrototypeRegistry {
        PrototypeRegistry::default()
    }

    #[test]
    fn spawn_inserts_into_list_and_tree() {
        let mut area = area();
        let registry = registry();
        let id = area
            .spawn(&registry, "player", AreaPos::new(1.0, 2.0, 3.0))
            .unwrap();
        assert_eq!(area.len(), 1);
        let entity = area.get(id).unwrap();
        assert_eq!(area.tree().occurrences(id), area.tree().intersecting_nodes(&entity.bbox));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let mut area = area();
        let registry = registry();
        let err = area.spawn(&registry, "basilisk", AreaPos::ZERO).unwrap_err();
        assert!(matches!(err, WorldError::UnknownEntityType(_)));
    }

    #[test]
    fn warp_moves_origin_and_every_entity_oppositely() {
        let mut area = area();
        let registry = registry();
        let player = area
            .spawn(&registry, "player", AreaPos::new(25.0, 0.0, 0.0))
            .unwrap();
        let other = area
            .spawn(&registry, "sparrow", AreaPos::new(4.0, 4.0, 4.0))
            .unwrap();

        let warp = area.warp_space(player);
        assert_eq!(warp, (1, 0, 0));
        assert_eq!(area.origin(), GlobalPos::new(16, 0, 0));
        assert!((area.get(player).unwrap().pos.x - 9.0).abs() < 1e-5);
        assert!((area.get(other).unwrap().pos.x - -12.0).abs() < 1e-5);
        // Absolute positions are unchanged.
        assert_eq!(area.global_pos(player).unwrap(), GlobalPos::new(25, 0, 0));
        assert_eq!(area.global_pos(other).unwrap(), GlobalPos::new(4, 4, 4));
    }

    #[test]
    fn warp_inside_the_central_chunk_is_identity() {
        let mut area = area();
        let registry = registry();
        let player = area
            .spawn(&registry, "player", AreaPos::new(3.0, 3.0, 3.0))
            .unwrap();
        assert_eq!(area.warp_space(player), (0, 0, 0));
        assert_eq!(area.origin(), GlobalPos::ZERO);
    }

    #[test]
    fn warp_round_trip_is_identity() {
        let mut area = area();
        let registry = registry();
        let player = area
            .spawn(&registry, "player", AreaPos::new(20.0, -20.0, 0.0))
            .unwrap();
        let before_origin = area.origin();
        let before_pos = area.get(player).unwrap().pos;
        let (wx, wy, wz) = area.warp_space(player);
        assert_ne!((wx, wy, wz), (0, 0, 0));
        // Drag the player back and warp again: everything returns.
        area.get_mut(player).unwrap().pos = before_pos
            + Vec3::new(
                -(wx * CHUNK_SIZE as i32 * 2) as f32,
                -(wy * CHUNK_SIZE as i32 * 2) as f32,
                -(wz * CHUNK_SIZE as i32 * 2) as f32,
            );
        area.warp_space(player);
        assert_eq!(area.origin(), before_origin);
    }

    #[test]
    fn entities_warped_out_of_the_cube_are_destroyed_by_default() {
        let mut area = area();
        let registry = registry();
        let edge = (ACTIVE_AREA_SIZE / 2) as f32 - 1.0;
        let player = area
            .spawn(&registry, "player", AreaPos::new(30.0, 0.0, 0.0))
            .unwrap();
        let doomed = area
            .spawn(&registry, "sparrow", AreaPos::new(-edge, 0.0, 0.0))
            .unwrap();
        area.warp_space(player);
        assert!(area.get(doomed).is_none());
        assert!(area.get(player).is_some());
    }

    #[test]
    fn out_of_bounds_handler_is_pluggable() {
        let mut area = area();
        let registry = registry();
        let fired = Arc::new(AtomicUsize::new(0));
        let observer = fired.clone();
        area.set_out_of_bounds_handler(Box::new(move |_| {
            observer.fetch_add(1, Ordering::SeqCst);
            OobAction::Keep
        }));
        let edge = (ACTIVE_AREA_SIZE / 2) as f32 - 1.0;
        let player = area
            .spawn(&registry, "player", AreaPos::new(30.0, 0.0, 0.0))
            .unwrap();
        let drifter = area
            .spawn(&registry, "sparrow", AreaPos::new(-edge, 0.0, 0.0))
            .unwrap();
        area.warp_space(player);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(area.get(drifter).is_some());
    }
}
