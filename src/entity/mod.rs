pub mod area;
pub mod octree;

use bitflags::bitflags;
use glam::Vec3;
use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::world::coords::AreaPos;
use octree::Aabb;

pub use area::{ActiveArea, OobAction, ACTIVE_AREA_SIZE, LOAD_DISTANCE};
pub use octree::{Octree, OCTREE_MAX_DEPTH, OCTREE_RESOLUTION};

bitflags! {
    /// Kinematic state bits maintained by physics each substep.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveFlags: u8 {
        const ON_GROUND = 0x01;
        const IN_LIQUID = 0x02;
        const CROUCHING = 0x04;
        const IN_VOID = 0x08;
    }
}

/// Handle to an entity within its active area.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u32);

/// A non-voxel object moving freely through the world. Positions are always
/// relative to the owning area's origin, so re-centering the area is a
/// translation rather than a rewrite of absolute coordinates.
#[derive(Debug, Clone)]
pub struct Entity {
    pub kind: String,
    /// Full extents of the bounding box.
    pub size: Vec3,
    /// Head position relative to the entity's position.
    pub head_offset: Vec3,

    pub mass: f32,
    pub walk: f32,
    pub jump: f32,
    pub leap: f32,
    pub swim: f32,
    pub buoyancy: f32,
    pub fly: f32,

    pub pos: AreaPos,
    pub yaw: f32,
    pub pitch: f32,
    pub move_flags: MoveFlags,

    /// Control inputs, fed by whatever drives this entity.
    pub control: Vec3,
    pub vel: Vec3,
    /// Net impulse applied and cleared each physics substep.
    pub impulse: Vec3,

    pub bbox: Aabb,
}

impl Entity {
    /// Refresh the bounding box from the current position and size.
    pub fn compute_bb(&mut self) {
        self.bbox = Aabb::centered(self.pos, self.size);
    }

    pub fn clear_kinetics(&mut self) {
        self.vel = Vec3::ZERO;
        self.impulse = Vec3::ZERO;
    }

    pub fn head_pos(&self) -> AreaPos {
        self.pos + self.head_offset
    }

    #[inline]
    pub fn on_ground(&self) -> bool {
        self.move_flags.contains(MoveFlags::ON_GROUND)
    }

    #[inline]
    pub fn in_liquid(&self) -> bool {
        self.move_flags.contains(MoveFlags::IN_LIQUID)
    }

    #[inline]
    pub fn crouching(&self) -> bool {
        self.move_flags.contains(MoveFlags::CROUCHING)
    }
}

/// Immutable template an entity is stamped from.
#[derive(Debug, Clone)]
pub struct EntityPrototype {
    pub kind: &'static str,
    pub size: Vec3,
    pub head_offset: Vec3,
    pub mass: f32,
    pub walk: f32,
    pub jump: f32,
    pub leap: f32,
    pub swim: f32,
    pub buoyancy: f32,
    pub fly: f32,
}

impl EntityPrototype {
    pub fn instantiate(&self, pos: AreaPos) -> Entity {
        let mut entity = Entity {
            kind: self.kind.to_string(),
            size: self.size,
            head_offset: self.head_offset,
            mass: self.mass,
            walk: self.walk,
            jump: self.jump,
            leap: self.leap,
            swim: self.swim,
            buoyancy: self.buoyancy,
            fly: self.fly,
            pos,
            yaw: 0.0,
            pitch: 0.0,
            move_flags: MoveFlags::empty(),
            control: Vec3::ZERO,
            vel: Vec3::ZERO,
            impulse: Vec3::ZERO,
            bbox: Aabb::centered(pos, self.size),
        };
        entity.compute_bb();
        entity
    }
}

// Movement numbers are impulses, not speeds; mass and drag turn them into
// equilibrium velocities.
static DEFAULT_PROTOTYPES: Lazy<Vec<EntityPrototype>> = Lazy::new(|| {
    vec![
        EntityPrototype {
            kind: "player",
            size: Vec3::new(0.7, 0.7, 1.8),
            head_offset: Vec3::new(0.0, 0.0, 0.7),
            mass: 45.0,
            walk: 1200.0,
            jump: 24000.0,
            leap: 4800.0,
            swim: 800.0,
            buoyancy: 0.7,
            fly: 30.0,
        },
        EntityPrototype {
            kind: "human",
            size: Vec3::new(0.8, 0.8, 1.6),
            head_offset: Vec3::new(0.0, 0.0, 0.6),
            mass: 70.0,
            walk: 200.0,
            jump: 24000.0,
            leap: 4800.0,
            swim: 200.0,
            buoyancy: 0.7,
            fly: 50.0,
        },
        EntityPrototype {
            kind: "sparrow",
            size: Vec3::new(0.2, 0.2, 0.2),
            head_offset: Vec3::new(0.0, 0.0, 0.0),
            mass: 0.03,
            walk: 3.0,
            jump: 50.0,
            leap: 10.0,
            swim: 1.0,
            buoyancy: 0.9,
            fly: 30.0,
        },
    ]
});

/// The set of spawnable entity types, keyed by name.
pub struct PrototypeRegistry {
    types: HashMap<&'static str, EntityPrototype>,
}

impl PrototypeRegistry {
    pub fn empty() -> Self {
        Self {
            types: HashMap::new(),
        }
    }

    pub fn add(&mut self, proto: EntityPrototype) {
        self.types.insert(proto.kind, proto);
    }

    pub fn get(&self, kind: &str) -> Option<&EntityPrototype> {
        self.types.get(kind)
    }
}

impl Default for PrototypeRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        for proto in DEFAULT_PROTOTYPES.iter() {
            registry.add(proto.clone());
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prototypes_stamp_entities_with_fresh_kinematics() {
        let registry = PrototypeRegistry::default();
        let proto = registry.get("player").expect("player prototype exists");
        let e = proto.instantiate(AreaPos::new(1.0, 2.0, 3.0));
        assert_eq!(e.kind, "player");
        assert_eq!(e.pos, AreaPos::new(1.0, 2.0, 3.0));
        assert_eq!(e.vel, Vec3::ZERO);
        assert_eq!(e.move_flags, MoveFlags::empty());
        // Bounding box is centered on the position.
        assert!((e.bbox.min.z - (3.0 - 1.8 / 2.0)).abs() < 1e-6);
    }

    #[test]
    fn unknown_types_are_absent() {
        let registry = PrototypeRegistry::default();
        assert!(registry.get("dragon").is_none());
    }

    #[test]
    fn bounding_box_follows_position() {
        let registry = PrototypeRegistry::default();
        let mut e = registry.get("sparrow").unwrap().instantiate(AreaPos::ZERO);
        e.pos = AreaPos::new(10.0, 0.0, 0.0);
        e.compute_bb();
        assert!((e.bbox.min.x - 9.9).abs() < 1e-6);
        assert!((e.bbox.max.x - 10.1).abs() < 1e-6);
    }
}
