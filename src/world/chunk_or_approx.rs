use std::sync::Arc;

use parking_lot::Mutex;

use crate::render::mesh::MeshBuffer;
use crate::world::approx::{ApproxPayload, ChunkApprox, Lod};
use crate::world::block::Block;
use crate::world::block_flags::BlockFlags;
use crate::world::chunk::{Chunk, ChunkPayload, StatusCell};
use crate::world::coords::{ChunkIndex, ChunkPos};

/// Uniform block access over chunk and approximation payloads. Callers that
/// iterate a whole cube are generic over this instead of matching on the
/// carrier; the approximation implementation shifts indices by its detail.
pub trait BlockAccess {
    /// Sampling stride in blocks: 1 for full chunks, `2^detail` otherwise.
    fn step(&self) -> u32;
    fn get_block(&self, idx: ChunkIndex) -> Block;
    fn put_block(&mut self, idx: ChunkIndex, b: Block);
    fn get_flags(&self, idx: ChunkIndex) -> BlockFlags;
    fn put_flags(&mut self, idx: ChunkIndex, flags: BlockFlags);
    fn set_flags(&mut self, idx: ChunkIndex, flags: BlockFlags);
    fn clear_flags(&mut self, idx: ChunkIndex, flags: BlockFlags);
    fn get_neighbors(&self, idx: ChunkIndex) -> [Block; 6];
}

impl BlockAccess for ChunkPayload {
    #[inline]
    fn step(&self) -> u32 {
        1
    }

    #[inline]
    fn get_block(&self, idx: ChunkIndex) -> Block {
        ChunkPayload::get_block(self, idx)
    }

    #[inline]
    fn put_block(&mut self, idx: ChunkIndex, b: Block) {
        ChunkPayload::put_block(self, idx, b)
    }

    #[inline]
    fn get_flags(&self, idx: ChunkIndex) -> BlockFlags {
        ChunkPayload::get_flags(self, idx)
    }

    #[inline]
    fn put_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        ChunkPayload::put_flags(self, idx, flags)
    }

    #[inline]
    fn set_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        ChunkPayload::set_flags(self, idx, flags)
    }

    #[inline]
    fn clear_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        ChunkPayload::clear_flags(self, idx, flags)
    }

    #[inline]
    fn get_neighbors(&self, idx: ChunkIndex) -> [Block; 6] {
        ChunkPayload::get_neighbors(self, idx)
    }
}

impl BlockAccess for ApproxPayload {
    #[inline]
    fn step(&self) -> u32 {
        self.detail().step()
    }

    #[inline]
    fn get_block(&self, idx: ChunkIndex) -> Block {
        ApproxPayload::get_block(self, idx)
    }

    #[inline]
    fn put_block(&mut self, idx: ChunkIndex, b: Block) {
        ApproxPayload::put_block(self, idx, b)
    }

    #[inline]
    fn get_flags(&self, idx: ChunkIndex) -> BlockFlags {
        ApproxPayload::get_flags(self, idx)
    }

    #[inline]
    fn put_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        ApproxPayload::put_flags(self, idx, flags)
    }

    #[inline]
    fn set_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        ApproxPayload::set_flags(self, idx, flags)
    }

    #[inline]
    fn clear_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        ApproxPayload::clear_flags(self, idx, flags)
    }

    #[inline]
    fn get_neighbors(&self, idx: ChunkIndex) -> [Block; 6] {
        ApproxPayload::get_neighbors(self, idx)
    }
}

/// What the cache hands out for a chunk position: nothing yet, the full
/// chunk, or the best resident approximation. Callers use this instead of
/// switching on detail themselves.
#[derive(Clone)]
pub enum ChunkOrApprox {
    NotLoaded,
    Full(Arc<Chunk>),
    Approx(Arc<ChunkApprox>),
}

impl ChunkOrApprox {
    #[inline]
    pub fn is_loaded(&self) -> bool {
        !matches!(self, ChunkOrApprox::NotLoaded)
    }

    pub fn detail(&self) -> Option<Lod> {
        match self {
            ChunkOrApprox::NotLoaded => None,
            ChunkOrApprox::Full(_) => Some(Lod::Base),
            ChunkOrApprox::Approx(ca) => Some(ca.detail()),
        }
    }

    pub fn pos(&self) -> Option<ChunkPos> {
        match self {
            ChunkOrApprox::NotLoaded => None,
            ChunkOrApprox::Full(c) => Some(c.pos()),
            ChunkOrApprox::Approx(ca) => Some(ca.pos()),
        }
    }

    pub fn status(&self) -> Option<&StatusCell> {
        match self {
            ChunkOrApprox::NotLoaded => None,
            ChunkOrApprox::Full(c) => Some(&c.status),
            ChunkOrApprox::Approx(ca) => Some(&ca.status),
        }
    }

    /// Read a single block, taking the payload read lock for the duration of
    /// the call. Returns VOID when nothing is resident.
    pub fn get_block(&self, idx: ChunkIndex) -> Block {
        match self {
            ChunkOrApprox::NotLoaded => Block::VOID,
            ChunkOrApprox::Full(c) => c.get_block(idx),
            ChunkOrApprox::Approx(ca) => ca.get_block(idx),
        }
    }

    pub fn layer(&self, layer: usize) -> Option<&Mutex<MeshBuffer>> {
        match self {
            ChunkOrApprox::NotLoaded => None,
            ChunkOrApprox::Full(c) => Some(&c.layers[layer]),
            ChunkOrApprox::Approx(ca) => Some(&ca.layers[layer]),
        }
    }
}
