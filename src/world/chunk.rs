use std::sync::atomic::{AtomicU16, Ordering};

use bitflags::bitflags;
use parking_lot::{Mutex, RwLock};

use crate::render::mesh::MeshBuffer;
use crate::render::N_LAYERS;
use crate::world::block::Block;
use crate::world::block_flags::BlockFlags;
use crate::world::coords::{ChunkIndex, ChunkPos};

pub const CHUNK_BITS: u32 = 4;
pub const CHUNK_SIZE: u32 = 1 << CHUNK_BITS;
pub const CH_MASK: u32 = CHUNK_SIZE - 1;
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

bitflags! {
    /// Chunk-level status bits. These live in an atomic header so the two
    /// threads can coordinate without taking the payload lock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ChunkStatus: u16 {
        const LOADED = 0x0001;
        const NEEDS_RELOAD = 0x0002;
        const NEEDS_RECOMPILE = 0x0004;
        const COMPILED = 0x0008;
    }
}

/// Atomic carrier for `ChunkStatus`. Sets publish with release ordering and
/// reads acquire, which is what makes "payload writes happen-before the flag
/// flip" hold across the thread boundary.
#[derive(Debug)]
pub struct StatusCell(AtomicU16);

impl StatusCell {
    pub fn new() -> Self {
        Self(AtomicU16::new(0))
    }

    /// Set the given bits. Returns true if any of them was newly set, which
    /// is how the mark operations stay idempotent.
    #[inline]
    pub fn insert(&self, status: ChunkStatus) -> bool {
        let prev = self.0.fetch_or(status.bits(), Ordering::Release);
        prev & status.bits() != status.bits()
    }

    #[inline]
    pub fn remove(&self, status: ChunkStatus) {
        self.0.fetch_and(!status.bits(), Ordering::Release);
    }

    #[inline]
    pub fn contains(&self, status: ChunkStatus) -> bool {
        ChunkStatus::from_bits_truncate(self.0.load(Ordering::Acquire)).contains(status)
    }

    #[inline]
    pub fn get(&self) -> ChunkStatus {
        ChunkStatus::from_bits_truncate(self.0.load(Ordering::Acquire))
    }
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Extended per-block data, keyed by the block's location in the chunk.
/// Blocks carrying one of these have `BlockFlags::HAS_ENTITY` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntity {
    pub idx: ChunkIndex,
    pub payload: u16,
}

/// The mutable interior of a chunk: the packed block and flag arrays plus
/// the block entity list. Lives behind the chunk's payload lock so hot loops
/// lock once and then run on plain arrays.
pub struct ChunkPayload {
    blocks: Box<[u16]>,
    flags: Box<[u8]>,
    pub block_entities: Vec<BlockEntity>,
}

#[inline]
fn linear(idx: ChunkIndex) -> usize {
    ((idx.x & CH_MASK) + ((idx.y & CH_MASK) << CHUNK_BITS) + ((idx.z & CH_MASK) << (CHUNK_BITS * 2)))
        as usize
}

impl ChunkPayload {
    pub fn new() -> Self {
        Self {
            blocks: vec![0u16; CHUNK_VOLUME].into_boxed_slice(),
            flags: vec![0u8; CHUNK_VOLUME].into_boxed_slice(),
            block_entities: Vec::new(),
        }
    }

    #[inline]
    pub fn get_block(&self, idx: ChunkIndex) -> Block {
        Block(self.blocks[linear(idx)])
    }

    #[inline]
    pub fn put_block(&mut self, idx: ChunkIndex, b: Block) {
        self.blocks[linear(idx)] = b.0;
    }

    #[inline]
    pub fn get_flags(&self, idx: ChunkIndex) -> BlockFlags {
        BlockFlags::from_bits_truncate(self.flags[linear(idx)])
    }

    #[inline]
    pub fn put_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        self.flags[linear(idx)] = flags.bits();
    }

    #[inline]
    pub fn set_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        self.flags[linear(idx)] |= flags.bits();
    }

    #[inline]
    pub fn clear_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        self.flags[linear(idx)] &= !flags.bits();
    }

    /// The six axis-adjacent blocks inside this chunk, in flag-bit order
    /// (above, below, north, south, east, west). Neighbors across the chunk
    /// boundary read as VOID; exposure substitutes the real neighbor chunk.
    pub fn get_neighbors(&self, idx: ChunkIndex) -> [Block; 6] {
        let mut out = [Block::VOID; 6];
        if idx.z < CHUNK_SIZE - 1 {
            out[0] = self.get_block(idx.offset(0, 0, 1));
        }
        if idx.z > 0 {
            out[1] = self.get_block(idx.offset(0, 0, -1));
        }
        if idx.y < CHUNK_SIZE - 1 {
            out[2] = self.get_block(idx.offset(0, 1, 0));
        }
        if idx.y > 0 {
            out[3] = self.get_block(idx.offset(0, -1, 0));
        }
        if idx.x < CHUNK_SIZE - 1 {
            out[4] = self.get_block(idx.offset(1, 0, 0));
        }
        if idx.x > 0 {
            out[5] = self.get_block(idx.offset(-1, 0, 0));
        }
        out
    }

    /// Raw views for bulk fills and exposure; blocks immutable, flags
    /// mutable.
    pub fn split_mut(&mut self) -> (&[u16], &mut [u8]) {
        (&self.blocks, &mut self.flags)
    }

    pub fn blocks_mut(&mut self) -> &mut [u16] {
        &mut self.blocks
    }

    /// Bit-identical block contents; used to decide whether GPU handles can
    /// be transferred on cache replacement.
    pub fn same_blocks(&self, other: &ChunkPayload) -> bool {
        self.blocks == other.blocks
    }

    /// Attach extended data to a block and mark it in the flag array.
    pub fn add_block_entity(&mut self, idx: ChunkIndex, payload: u16) {
        self.set_flags(idx, BlockFlags::HAS_ENTITY);
        self.block_entities.push(BlockEntity { idx, payload });
    }

    /// The extended data attached to a block, if any.
    pub fn block_entity(&self, idx: ChunkIndex) -> Option<&BlockEntity> {
        if !self.get_flags(idx).contains(BlockFlags::HAS_ENTITY) {
            return None;
        }
        self.block_entities.iter().find(|be| be.idx == idx)
    }
}

impl Default for ChunkPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// A 16x16x16 cube of blocks: the unit of loading, meshing and caching.
pub struct Chunk {
    pos: ChunkPos,
    pub status: StatusCell,
    pub payload: RwLock<ChunkPayload>,
    /// One compiled mesh per render layer. The mutex is the per-entry mesh
    /// lock: held only while staging is swapped in or handles move.
    pub layers: [Mutex<MeshBuffer>; N_LAYERS],
}

impl Chunk {
    pub fn new(pos: ChunkPos) -> Self {
        Self {
            pos,
            status: StatusCell::new(),
            payload: RwLock::new(ChunkPayload::new()),
            layers: [
                Mutex::new(MeshBuffer::new()),
                Mutex::new(MeshBuffer::new()),
                Mutex::new(MeshBuffer::new()),
            ],
        }
    }

    #[inline]
    pub fn pos(&self) -> ChunkPos {
        self.pos
    }

    #[inline]
    pub fn get_block(&self, idx: ChunkIndex) -> Block {
        self.payload.read().get_block(idx)
    }

    /// Write a block and flag the chunk for recompilation. The caller is
    /// responsible for enqueueing it (`ChunkCache::mark_for_recompile`).
    pub fn put_block(&self, idx: ChunkIndex, b: Block) {
        let mut payload = self.payload.write();
        payload.put_block(idx, b);
        let mut flags = payload.get_flags(idx) & !BlockFlags::ORIENTABLE;
        if b.is_orientable_kind() {
            flags |= BlockFlags::ORIENTABLE;
        }
        payload.put_flags(idx, flags);
        drop(payload);
        self.status.insert(ChunkStatus::NEEDS_RECOMPILE);
    }
}
