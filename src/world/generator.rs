use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::world::block::Block;
use crate::world::coords::GlobalPos;

/// Procedural terrain: a pure function from world position to block. The
/// load pipeline overlays the diff on top of whatever this returns.
pub trait TerrainSource: Send + Sync {
    fn block_at(&self, pos: GlobalPos) -> Block;
}

/// Height-field terrain driven by fractal noise. Sub-seeds for the noise
/// layers are derived deterministically from the world seed.
pub struct NoiseTerrain {
    height: Fbm<Perlin>,
    detail: Perlin,
    base_height: f64,
    amplitude: f64,
    sea_level: i64,
}

impl NoiseTerrain {
    pub const DEFAULT_SEA_LEVEL: i64 = 0;

    pub fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let height = Fbm::<Perlin>::new(rng.next_u32())
            .set_octaves(4)
            .set_frequency(0.008)
            .set_persistence(0.5);
        let detail = Perlin::new(rng.next_u32());
        Self {
            height,
            detail,
            base_height: 8.0,
            amplitude: 24.0,
            sea_level: Self::DEFAULT_SEA_LEVEL,
        }
    }

    fn surface_at(&self, x: i64, y: i64) -> i64 {
        let broad = self.height.get([x as f64, y as f64]);
        let fine = self.detail.get([x as f64 * 0.05, y as f64 * 0.05]) * 2.0;
        (self.base_height + broad * self.amplitude + fine).floor() as i64
    }
}

impl TerrainSource for NoiseTerrain {
    fn block_at(&self, pos: GlobalPos) -> Block {
        let surface = self.surface_at(pos.x, pos.y);
        if pos.z < surface - 3 {
            Block::STONE
        } else if pos.z < surface {
            Block::DIRT
        } else if pos.z == surface {
            if surface <= self.sea_level + 1 {
                Block::SAND
            } else {
                Block::GRASS
            }
        } else if pos.z <= self.sea_level {
            Block::WATER
        } else {
            Block::AIR
        }
    }
}

/// Flat slab terrain: solid stone up to a fixed height, air above. Used by
/// tests and useful as a smoke-test world.
pub struct FlatTerrain {
    pub ground: i64,
}

impl FlatTerrain {
    pub fn new(ground: i64) -> Self {
        Self { ground }
    }
}

impl TerrainSource for FlatTerrain {
    fn block_at(&self, pos: GlobalPos) -> Block {
        if pos.z <= self.ground {
            Block::STONE
        } else {
            Block::AIR
        }
    }
}
