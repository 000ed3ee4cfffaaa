//! Timberline voxel world core.
//!
//! The crate is three layers. Storage: chunks, LOD approximations, the
//! run-length diff overlay and the multi-level chunk cache. Derivation:
//! per-face exposure and mesh compilation. Live: the active entity area,
//! physics and the two-thread tick pipeline that keeps them all fed.

pub mod config;
pub mod engine;
pub mod entity;
pub mod error;
pub mod physics;
pub mod render;
pub mod world;

pub use error::WorldError;

/// Engine prelude.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::engine::{Engine, World, COMPILE_CAP, LOAD_CAP, TICKS_PER_SECOND};
    pub use crate::entity::{ActiveArea, Entity, EntityId, MoveFlags, PrototypeRegistry};
    pub use crate::error::WorldError;
    pub use crate::physics::BlockReader;
    pub use crate::render::{HeadlessRenderer, Layer, Renderer};
    pub use crate::world::{
        Block, BlockFlags, Chunk, ChunkCache, ChunkOrApprox, ChunkPos, ChunkStatus, Diff,
        DiffRegistry, GlobalPos, Lod, CHUNK_SIZE,
    };

    // Commonly used external types.
    pub use glam::{IVec3, Vec3};
    pub use parking_lot::{Mutex, RwLock};
}

/// Current engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
