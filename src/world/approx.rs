use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::render::mesh::MeshBuffer;
use crate::render::N_LAYERS;
use crate::world::block::Block;
use crate::world::block_flags::BlockFlags;
use crate::world::chunk::{StatusCell, CHUNK_BITS, CHUNK_SIZE, CH_MASK};
use crate::world::coords::{ChunkIndex, ChunkPos};

pub const N_LODS: usize = 5;

/// Level of detail. `Base` is a full chunk; the rest are approximations
/// sampling every `2^detail` blocks per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Lod {
    Base = 0,
    Half = 1,
    Quarter = 2,
    Eighth = 3,
    Sixteenth = 4,
}

impl Lod {
    pub const ALL: [Lod; N_LODS] = [Lod::Base, Lod::Half, Lod::Quarter, Lod::Eighth, Lod::Sixteenth];

    #[inline]
    pub fn from_index(i: usize) -> Lod {
        Self::ALL[i]
    }

    /// Per-axis shift applied to indices at this detail.
    #[inline]
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Sampling stride in blocks.
    #[inline]
    pub fn step(self) -> u32 {
        1 << self.bits()
    }

    /// Side length of the reduced payload arrays.
    #[inline]
    pub fn side(self) -> u32 {
        CHUNK_SIZE >> self.bits()
    }

    #[inline]
    pub fn coarser(self) -> Option<Lod> {
        match self {
            Lod::Sixteenth => None,
            other => Some(Self::ALL[other as usize + 1]),
        }
    }
}

/// The reduced block and flag arrays of an approximation, in one contiguous
/// allocation sized from the detail level. Indices are full-chunk indices;
/// each accessor shifts them down by the detail bits.
pub struct ApproxPayload {
    detail: Lod,
    blocks: Box<[u16]>,
    flags: Box<[u8]>,
}

impl ApproxPayload {
    pub fn new(detail: Lod) -> Self {
        debug_assert!(detail != Lod::Base, "base detail is a full chunk");
        let volume = (detail.side() * detail.side() * detail.side()) as usize;
        Self {
            detail,
            blocks: vec![0u16; volume].into_boxed_slice(),
            flags: vec![0u8; volume].into_boxed_slice(),
        }
    }

    #[inline]
    pub fn detail(&self) -> Lod {
        self.detail
    }

    #[inline]
    fn linear(&self, idx: ChunkIndex) -> usize {
        let bits = self.detail.bits();
        let reduced = CHUNK_BITS - bits;
        (((idx.x & CH_MASK) >> bits)
            + (((idx.y & CH_MASK) >> bits) << reduced)
            + (((idx.z & CH_MASK) >> bits) << (reduced * 2))) as usize
    }

    #[inline]
    pub fn get_block(&self, idx: ChunkIndex) -> Block {
        Block(self.blocks[self.linear(idx)])
    }

    #[inline]
    pub fn put_block(&mut self, idx: ChunkIndex, b: Block) {
        self.blocks[self.linear(idx)] = b.0;
    }

    #[inline]
    pub fn get_flags(&self, idx: ChunkIndex) -> BlockFlags {
        BlockFlags::from_bits_truncate(self.flags[self.linear(idx)])
    }

    #[inline]
    pub fn put_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        self.flags[self.linear(idx)] = flags.bits();
    }

    #[inline]
    pub fn set_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        self.flags[self.linear(idx)] |= flags.bits();
    }

    #[inline]
    pub fn clear_flags(&mut self, idx: ChunkIndex, flags: BlockFlags) {
        self.flags[self.linear(idx)] &= !flags.bits();
    }

    /// The six axis-adjacent samples at this detail's stride, VOID across
    /// chunk faces, in flag-bit order.
    pub fn get_neighbors(&self, idx: ChunkIndex) -> [Block; 6] {
        let step = self.detail.step() as i32;
        let limit = CHUNK_SIZE - self.detail.step();
        let mut out = [Block::VOID; 6];
        if idx.z < limit {
            out[0] = self.get_block(idx.offset(0, 0, step));
        }
        if idx.z >= self.detail.step() {
            out[1] = self.get_block(idx.offset(0, 0, -step));
        }
        if idx.y < limit {
            out[2] = self.get_block(idx.offset(0, step, 0));
        }
        if idx.y >= self.detail.step() {
            out[3] = self.get_block(idx.offset(0, -step, 0));
        }
        if idx.x < limit {
            out[4] = self.get_block(idx.offset(step, 0, 0));
        }
        if idx.x >= self.detail.step() {
            out[5] = self.get_block(idx.offset(-step, 0, 0));
        }
        out
    }

    pub fn same_blocks(&self, other: &ApproxPayload) -> bool {
        self.detail == other.detail && self.blocks == other.blocks
    }
}

/// A lower-resolution stand-in for a chunk, used while the full-detail data
/// is still streaming in, or for far-away cache levels. Carries the same
/// status header and mesh layers as a chunk.
pub struct ChunkApprox {
    pos: ChunkPos,
    pub status: StatusCell,
    pub payload: RwLock<ApproxPayload>,
    pub layers: [Mutex<MeshBuffer>; N_LAYERS],
}

impl ChunkApprox {
    pub fn new(pos: ChunkPos, detail: Lod) -> Self {
        Self {
            pos,
            status: StatusCell::new(),
            payload: RwLock::new(ApproxPayload::new(detail)),
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
    pub fn detail(&self) -> Lod {
        self.payload.read().detail()
    }

    #[inline]
    pub fn get_block(&self, idx: ChunkIndex) -> Block {
        self.payload.read().get_block(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lod_geometry() {
        assert_eq!(Lod::Base.step(), 1);
        assert_eq!(Lod::Half.side(), 8);
        assert_eq!(Lod::Quarter.side(), 4);
        assert_eq!(Lod::Sixteenth.side(), 1);
        assert_eq!(Lod::Half.coarser(), Some(Lod::Quarter));
        assert_eq!(Lod::Sixteenth.coarser(), None);
    }

    #[test]
    fn shifted_indexing_aliases_a_whole_cell() {
        let mut payload = ApproxPayload::new(Lod::Quarter);
        payload.put_block(ChunkIndex::new(0, 0, 0), Block::STONE);
        // Every index inside the 4x4x4 cell resolves to the same sample.
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..4 {
                    assert_eq!(payload.get_block(ChunkIndex::new(x, y, z)), Block::STONE);
                }
            }
        }
        assert_eq!(payload.get_block(ChunkIndex::new(4, 0, 0)), Block::VOID);
    }

    #[test]
    fn approx_neighbors_step_at_detail_granularity() {
        let mut payload = ApproxPayload::new(Lod::Half);
        payload.put_block(ChunkIndex::new(2, 0, 0), Block::SAND);
        let nbrs = payload.get_neighbors(ChunkIndex::new(0, 0, 0));
        assert_eq!(nbrs[4], Block::SAND); // east neighbor is one stride away
        assert_eq!(nbrs[5], Block::VOID); // west face of the chunk
        assert_eq!(nbrs[1], Block::VOID); // below face of the chunk
    }

    #[test]
    fn flags_follow_the_same_reduction() {
        let mut payload = ApproxPayload::new(Lod::Eighth);
        payload.set_flags(ChunkIndex::new(0, 0, 0), BlockFlags::EXPOSED_ABOVE);
        assert!(payload
            .get_flags(ChunkIndex::new(7, 7, 7))
            .contains(BlockFlags::EXPOSED_ABOVE));
        assert!(!payload
            .get_flags(ChunkIndex::new(8, 0, 0))
            .contains(BlockFlags::EXPOSED_ABOVE));
    }
}
