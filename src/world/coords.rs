use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::world::chunk::{CHUNK_BITS, CHUNK_SIZE, CH_MASK};

/// Canonical world block address. Signed 64-bit per axis; the grid is
/// unbounded for any practical purpose. The z axis is vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

/// Chunk address: a `GlobalPos` shifted down by `CHUNK_BITS`. This is the
/// cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkPos(pub IVec3);

/// Block address inside a chunk, `0..CHUNK_SIZE` per axis. Accessors mask
/// the components, so out-of-range values wrap instead of faulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndex {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Entity-space position: float blocks relative to the active area origin.
pub type AreaPos = Vec3;

impl GlobalPos {
    pub const ZERO: GlobalPos = GlobalPos { x: 0, y: 0, z: 0 };

    #[inline]
    pub fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    /// The chunk containing this block. Arithmetic shift, so negative
    /// coordinates round toward negative infinity.
    #[inline]
    pub fn chunk(self) -> ChunkPos {
        ChunkPos(IVec3::new(
            (self.x >> CHUNK_BITS) as i32,
            (self.y >> CHUNK_BITS) as i32,
            (self.z >> CHUNK_BITS) as i32,
        ))
    }

    /// The block's address within its chunk. Masking the two's-complement
    /// low bits wraps negative coordinates correctly.
    #[inline]
    pub fn chunk_index(self) -> ChunkIndex {
        ChunkIndex {
            x: (self.x & CH_MASK as i64) as u32,
            y: (self.y & CH_MASK as i64) as u32,
            z: (self.z & CH_MASK as i64) as u32,
        }
    }

    #[inline]
    pub fn offset(self, dx: i64, dy: i64, dz: i64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// Resolve an area-relative float position against an area origin.
    #[inline]
    pub fn from_area(origin: GlobalPos, pos: AreaPos) -> Self {
        Self::new(
            origin.x + pos.x.floor() as i64,
            origin.y + pos.y.floor() as i64,
            origin.z + pos.z.floor() as i64,
        )
    }
}

impl ChunkPos {
    #[inline]
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self(IVec3::new(x, y, z))
    }

    #[inline]
    pub fn x(self) -> i32 {
        self.0.x
    }

    #[inline]
    pub fn y(self) -> i32 {
        self.0.y
    }

    #[inline]
    pub fn z(self) -> i32 {
        self.0.z
    }

    /// The world position of this chunk's origin corner.
    #[inline]
    pub fn base(self) -> GlobalPos {
        GlobalPos::new(
            (self.0.x as i64) << CHUNK_BITS,
            (self.0.y as i64) << CHUNK_BITS,
            (self.0.z as i64) << CHUNK_BITS,
        )
    }

    /// The world position of a block inside this chunk.
    #[inline]
    pub fn block(self, idx: ChunkIndex) -> GlobalPos {
        let base = self.base();
        base.offset(idx.x as i64, idx.y as i64, idx.z as i64)
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self(self.0 + IVec3::new(dx, dy, dz))
    }

    /// Squared euclidean distance in chunk units.
    #[inline]
    pub fn dist_sq(self, other: ChunkPos) -> i64 {
        let d = self.0 - other.0;
        let (x, y, z) = (d.x as i64, d.y as i64, d.z as i64);
        x * x + y * y + z * z
    }

    /// Chebyshev distance in chunk units; the eviction metric.
    #[inline]
    pub fn chebyshev(self, other: ChunkPos) -> i32 {
        let d = (self.0 - other.0).abs();
        d.x.max(d.y).max(d.z)
    }
}

impl ChunkIndex {
    #[inline]
    pub fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x.wrapping_add_signed(dx),
            y: self.y.wrapping_add_signed(dy),
            z: self.z.wrapping_add_signed(dz),
        }
    }

    /// Whether this index sits on the given face of the chunk at the given
    /// sampling step (1 for full chunks, `2^detail` for approximations).
    #[inline]
    pub fn on_face(self, direction: usize, step: u32) -> bool {
        match direction {
            0 => self.z >= CHUNK_SIZE - step, // above
            1 => self.z < step,               // below
            2 => self.y >= CHUNK_SIZE - step, // north
            3 => self.y < step,               // south
            4 => self.x >= CHUNK_SIZE - step, // east
            5 => self.x < step,               // west
            _ => unreachable!("direction out of range"),
        }
    }
}

/// Unit offsets for the six axis directions, in flag-bit order:
/// above, below, north, south, east, west.
pub const DIRECTIONS: [(i32, i32, i32); 6] = [
    (0, 0, 1),
    (0, 0, -1),
    (0, 1, 0),
    (0, -1, 0),
    (1, 0, 0),
    (-1, 0, 0),
];
