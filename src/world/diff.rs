use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::world::block::Block;
use crate::world::coords::{ChunkPos, GlobalPos};

pub const DIFF_SHIFT: u32 = 10;
pub const DIFF_SIZE: u32 = 1 << DIFF_SHIFT;
pub const DIFF_LENGTH: u64 = (DIFF_SIZE as u64) * (DIFF_SIZE as u64) * (DIFF_SIZE as u64);

/// One run of identical blocks. Runs live in an arena and link forward by
/// index, which keeps walks cache-friendly and sidesteps pointer chasing.
#[derive(Debug, Clone, Copy)]
struct Run {
    block: Block,
    length: u32,
    next: Option<u32>,
}

/// Authored edits over a fixed `DIFF_SIZE³` cube, stored run-length encoded.
/// `VOID` in a run means "no override": the terrain generator's block wins.
/// The run lengths always sum to exactly `DIFF_LENGTH`.
///
/// Reads during concurrent writes are not supported; callers either keep the
/// diff quiescent for the duration of a chunk load or hold the registry's
/// per-diff lock.
pub struct Diff {
    origin: GlobalPos,
    runs: Vec<Run>,
    head: u32,
}

impl Diff {
    pub fn new(origin: GlobalPos) -> Self {
        Self {
            origin,
            runs: vec![Run {
                block: Block::VOID,
                length: DIFF_LENGTH as u32,
                next: None,
            }],
            head: 0,
        }
    }

    #[inline]
    pub fn origin(&self) -> GlobalPos {
        self.origin
    }

    /// Linear index of a world position inside this diff, or None when the
    /// position falls outside the cube.
    pub fn index_of(&self, pos: GlobalPos) -> Option<u32> {
        let dx = pos.x.checked_sub(self.origin.x)?;
        let dy = pos.y.checked_sub(self.origin.y)?;
        let dz = pos.z.checked_sub(self.origin.z)?;
        let size = DIFF_SIZE as i64;
        if !(0..size).contains(&dx) || !(0..size).contains(&dy) || !(0..size).contains(&dz) {
            return None;
        }
        Some((dz + dy * size + dx * size * size) as u32)
    }

    /// The override at the given linear index, `VOID` for "none". Walks the
    /// run list accumulating lengths until the target falls inside a run.
    pub fn get_block(&self, target: u32) -> Block {
        let mut index: u64 = 0;
        let mut at = Some(self.head);
        while let Some(i) = at {
            let run = &self.runs[i as usize];
            index += run.length as u64;
            if index > target as u64 {
                return run.block;
            }
            at = run.next;
        }
        Block::VOID
    }

    pub fn get_block_at(&self, pos: GlobalPos) -> Block {
        match self.index_of(pos) {
            Some(target) => self.get_block(target),
            None => Block::VOID,
        }
    }

    /// Write an override, splitting or coalescing runs as needed. The total
    /// length is preserved exactly.
    pub fn put_block(&mut self, target: u32, b: Block) {
        let mut index: u64 = 0;
        let mut prev: Option<u32> = None;
        let mut at = Some(self.head);
        while let Some(i) = at {
            let run = self.runs[i as usize];
            if index + run.length as u64 > target as u64 {
                if run.block.is(b) {
                    return;
                }
                let start = index as u32;
                let original_len = run.length;
                // Every case below gives one unit of this run's length to
                // the new block, so shrink it up front.
                self.runs[i as usize].length -= 1;
                if original_len == 1 {
                    // Singleton run: overwrite in place.
                    self.runs[i as usize].block = b;
                    self.runs[i as usize].length = 1;
                } else if target == start {
                    // At the start: extend an equal predecessor, otherwise
                    // splice a fresh length-1 run in front.
                    match prev {
                        Some(p) if self.runs[p as usize].block == b => {
                            self.runs[p as usize].length += 1;
                        }
                        Some(p) => {
                            let fresh = self.alloc(Run {
                                block: b,
                                length: 1,
                                next: Some(i),
                            });
                            self.runs[p as usize].next = Some(fresh);
                        }
                        None => {
                            let fresh = self.alloc(Run {
                                block: b,
                                length: 1,
                                next: Some(i),
                            });
                            self.head = fresh;
                        }
                    }
                } else if target < start + original_len - 1 {
                    // Strict interior: prefix stays in place, then a
                    // length-1 run for the new block, then the suffix.
                    let prefix_len = target - start;
                    let suffix_len = original_len - 1 - prefix_len;
                    let suffix = self.alloc(Run {
                        block: run.block,
                        length: suffix_len,
                        next: run.next,
                    });
                    let fresh = self.alloc(Run {
                        block: b,
                        length: 1,
                        next: Some(suffix),
                    });
                    self.runs[i as usize].length = prefix_len;
                    self.runs[i as usize].next = Some(fresh);
                } else {
                    // At the end: extend an equal successor, otherwise
                    // splice a fresh length-1 run after this one.
                    match run.next {
                        Some(n) if self.runs[n as usize].block == b => {
                            self.runs[n as usize].length += 1;
                        }
                        next => {
                            let fresh = self.alloc(Run {
                                block: b,
                                length: 1,
                                next,
                            });
                            self.runs[i as usize].next = Some(fresh);
                        }
                    }
                }
                return;
            }
            index += run.length as u64;
            prev = Some(i);
            at = run.next;
        }
        unreachable!("diff index {target} not covered by run list");
    }

    pub fn put_block_at(&mut self, pos: GlobalPos, b: Block) -> bool {
        match self.index_of(pos) {
            Some(target) => {
                self.put_block(target, b);
                true
            }
            None => false,
        }
    }

    fn alloc(&mut self, run: Run) -> u32 {
        let i = self.runs.len() as u32;
        self.runs.push(run);
        i
    }

    /// Sum of all run lengths; invariantly `DIFF_LENGTH`.
    pub fn total_length(&self) -> u64 {
        let mut total = 0u64;
        let mut at = Some(self.head);
        while let Some(i) = at {
            let run = &self.runs[i as usize];
            total += run.length as u64;
            at = run.next;
        }
        total
    }

    /// Number of live runs (the arena may hold more).
    pub fn run_count(&self) -> usize {
        let mut count = 0;
        let mut at = Some(self.head);
        while let Some(i) = at {
            count += 1;
            at = self.runs[i as usize].next;
        }
        count
    }
}

/// Shared diffs keyed by their aligned origin. One diff spans exactly
/// `DIFF_SIZE³` blocks; `DIFF_SIZE` is a multiple of the chunk size, so a
/// chunk never straddles two diffs.
pub struct DiffRegistry {
    diffs: RwLock<HashMap<(i64, i64, i64), Arc<RwLock<Diff>>>>,
}

#[inline]
fn aligned_origin(pos: GlobalPos) -> (i64, i64, i64) {
    (
        (pos.x >> DIFF_SHIFT) << DIFF_SHIFT,
        (pos.y >> DIFF_SHIFT) << DIFF_SHIFT,
        (pos.z >> DIFF_SHIFT) << DIFF_SHIFT,
    )
}

impl DiffRegistry {
    pub fn new() -> Self {
        Self {
            diffs: RwLock::new(HashMap::new()),
        }
    }

    /// The diff covering the given chunk, if any edits exist there.
    pub fn diff_for(&self, chunk: ChunkPos) -> Option<Arc<RwLock<Diff>>> {
        let key = aligned_origin(chunk.base());
        self.diffs.read().get(&key).cloned()
    }

    /// The override at a world position; `VOID` when no diff covers it or
    /// the diff has no edit there.
    pub fn get_block(&self, pos: GlobalPos) -> Block {
        let key = aligned_origin(pos);
        match self.diffs.read().get(&key) {
            Some(diff) => diff.read().get_block_at(pos),
            None => Block::VOID,
        }
    }

    /// Record an edit, creating the covering diff on first use.
    pub fn put_block(&self, pos: GlobalPos, b: Block) {
        let key = aligned_origin(pos);
        let diff = {
            let mut diffs = self.diffs.write();
            diffs
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(RwLock::new(Diff::new(GlobalPos::new(key.0, key.1, key.2))))
                })
                .clone()
        };
        diff.write().put_block_at(pos, b);
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.read().is_empty()
    }
}

impl Default for DiffRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diff() -> Diff {
        Diff::new(GlobalPos::ZERO)
    }

    #[test]
    fn fresh_diff_is_one_void_run() {
        let d = diff();
        assert_eq!(d.run_count(), 1);
        assert_eq!(d.total_length(), DIFF_LENGTH);
        assert_eq!(d.get_block(0), Block::VOID);
        assert_eq!(d.get_block((DIFF_LENGTH - 1) as u32), Block::VOID);
    }

    #[test]
    fn put_then_get_round_trips() {
        let mut d = diff();
        for &target in &[0u32, 1, 512, (DIFF_LENGTH - 2) as u32, (DIFF_LENGTH - 1) as u32] {
            d.put_block(target, Block::STONE);
            assert_eq!(d.get_block(target), Block::STONE);
            assert_eq!(d.total_length(), DIFF_LENGTH);
        }
    }

    #[test]
    fn last_writer_wins() {
        let mut d = diff();
        d.put_block(77, Block::STONE);
        d.put_block(77, Block::SAND);
        assert_eq!(d.get_block(77), Block::SAND);
        assert_eq!(d.get_block(76), Block::VOID);
        assert_eq!(d.get_block(78), Block::VOID);
        assert_eq!(d.total_length(), DIFF_LENGTH);
    }

    #[test]
    fn interior_split_produces_prefix_mid_suffix() {
        let mut d = diff();
        d.put_block(100, Block::DIRT);
        // runs: void[0,100), dirt[100], void(100, ...]
        assert_eq!(d.run_count(), 3);
        assert_eq!(d.get_block(99), Block::VOID);
        assert_eq!(d.get_block(100), Block::DIRT);
        assert_eq!(d.get_block(101), Block::VOID);
        assert_eq!(d.total_length(), DIFF_LENGTH);
    }

    #[test]
    fn start_of_run_extends_equal_predecessor() {
        let mut d = diff();
        d.put_block(10, Block::STONE);
        // Writing at the start of the trailing void run, with a stone run
        // right before it: the stone run grows instead of a new run.
        d.put_block(11, Block::STONE);
        assert_eq!(d.run_count(), 3);
        assert_eq!(d.get_block(10), Block::STONE);
        assert_eq!(d.get_block(11), Block::STONE);
        assert_eq!(d.get_block(12), Block::VOID);
        assert_eq!(d.total_length(), DIFF_LENGTH);
    }

    #[test]
    fn end_of_run_extends_equal_successor() {
        let mut d = diff();
        d.put_block(10, Block::STONE);
        // Writing the last index of the leading void run, with the stone run
        // right after it: the stone run grows backwards.
        d.put_block(9, Block::STONE);
        assert_eq!(d.run_count(), 3);
        assert_eq!(d.get_block(8), Block::VOID);
        assert_eq!(d.get_block(9), Block::STONE);
        assert_eq!(d.get_block(10), Block::STONE);
        assert_eq!(d.total_length(), DIFF_LENGTH);
    }

    #[test]
    fn index_zero_creates_a_new_head() {
        let mut d = diff();
        d.put_block(0, Block::GRASS);
        assert_eq!(d.get_block(0), Block::GRASS);
        assert_eq!(d.get_block(1), Block::VOID);
        assert_eq!(d.total_length(), DIFF_LENGTH);
    }

    #[test]
    fn singleton_overwrite_keeps_length() {
        let mut d = diff();
        d.put_block(5, Block::STONE);
        d.put_block(5, Block::GLASS);
        assert_eq!(d.get_block(5), Block::GLASS);
        assert_eq!(d.get_block(4), Block::VOID);
        assert_eq!(d.get_block(6), Block::VOID);
        assert_eq!(d.total_length(), DIFF_LENGTH);
    }

    #[test]
    fn dense_scribble_preserves_the_length_invariant() {
        let mut d = diff();
        let blocks = [Block::STONE, Block::DIRT, Block::SAND, Block::STONE, Block::AIR];
        for i in 0..200u32 {
            d.put_block(i * 7 % 97, blocks[(i % 5) as usize]);
            assert_eq!(d.total_length(), DIFF_LENGTH);
        }
    }

    #[test]
    fn registry_maps_positions_to_aligned_diffs() {
        let reg = DiffRegistry::new();
        let pos = GlobalPos::new(100, 100, 60);
        assert_eq!(reg.get_block(pos), Block::VOID);
        reg.put_block(pos, Block::STONE);
        assert_eq!(reg.get_block(pos), Block::STONE);
        assert_eq!(reg.get_block(pos.offset(0, 0, 1)), Block::VOID);
        // The covering diff is visible through the chunk lookup.
        let diff = reg.diff_for(pos.chunk()).expect("diff should exist");
        assert_eq!(diff.read().get_block_at(pos), Block::STONE);
        // A chunk in a different diff-aligned region resolves to no diff.
        assert!(reg.diff_for(GlobalPos::new(5000, 0, 0).chunk()).is_none());
    }

    #[test]
    fn negative_region_alignment() {
        let reg = DiffRegistry::new();
        let pos = GlobalPos::new(-1, -1, -1);
        reg.put_block(pos, Block::TRUNK);
        assert_eq!(reg.get_block(pos), Block::TRUNK);
        let diff = reg.diff_for(pos.chunk()).expect("diff should exist");
        assert_eq!(diff.read().origin(), GlobalPos::new(-1024, -1024, -1024));
    }
}
