use bitflags::bitflags;

bitflags! {
    /// The per-block flag byte, stored in an array parallel to the block
    /// array. Exposure bits are recomputed by the derivation layer; the
    /// orientable and has-entity bits are set at load/edit time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockFlags: u8 {
        const EXPOSED_ABOVE = 1 << 0;
        const EXPOSED_BELOW = 1 << 1;
        const EXPOSED_NORTH = 1 << 2;
        const EXPOSED_SOUTH = 1 << 3;
        const EXPOSED_EAST = 1 << 4;
        const EXPOSED_WEST = 1 << 5;
        const ORIENTABLE = 1 << 6;
        const HAS_ENTITY = 1 << 7;

        const EXPOSED_ANY = 0x3f;
    }
}

impl BlockFlags {
    /// The exposure bit for the face toward the given axis direction, in the
    /// order used everywhere else: above, below, north, south, east, west.
    #[inline]
    pub fn exposed_bit(direction: usize) -> BlockFlags {
        BlockFlags::from_bits_truncate(1 << direction)
    }

    #[inline]
    pub fn any_exposed(self) -> bool {
        self.intersects(BlockFlags::EXPOSED_ANY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposed_bits_cover_six_faces() {
        let mut all = BlockFlags::empty();
        for dir in 0..6 {
            all |= BlockFlags::exposed_bit(dir);
        }
        assert_eq!(all, BlockFlags::EXPOSED_ANY);
        assert!(!all.contains(BlockFlags::ORIENTABLE));
    }
}
