use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::Sender;
use log::debug;
use parking_lot::RwLock;

use crate::render::N_LAYERS;
use crate::world::approx::{ChunkApprox, Lod, N_LODS};
use crate::world::chunk::{Chunk, ChunkStatus};
use crate::world::chunk_or_approx::ChunkOrApprox;
use crate::world::coords::ChunkPos;

/// Radius, in chunks, out to which each detail level stays resident and
/// renderable. Index by `Lod`.
pub const MAX_RENDER_DISTANCES: [i32; N_LODS] = [3, 4, 4, 4, 4];

/// How far past a level's render radius an entry may drift before the
/// eviction sweep drops it.
pub const EVICTION_MARGIN: i32 = 2;

/// The level of detail wanted at the given squared distance (in chunks)
/// from the viewer, or None beyond the coarsest radius.
pub fn desired_detail(dist_sq: i64) -> Option<Lod> {
    for lod in Lod::ALL {
        let mrd = MAX_RENDER_DISTANCES[lod as usize] as i64;
        if dist_sq <= mrd * mrd {
            return Some(lod);
        }
    }
    None
}

/// The spatial map of resident chunk data: one map per detail level, keyed
/// by chunk position. Entries are added by the data thread and read by both
/// threads; the level maps are behind read-write locks and each entry's mesh
/// buffers carry their own lock.
pub struct ChunkCache {
    levels: [RwLock<HashMap<ChunkPos, ChunkOrApprox>>; N_LODS],
    /// Slots with a load in flight. Freshly admitted carriers sit here (not
    /// in the level maps) until their first load completes, so an empty
    /// chunk never shadows coarser loaded data in `get_best_data`.
    pending: RwLock<HashMap<(ChunkPos, Lod), ChunkOrApprox>>,
    reload_tx: Sender<ChunkOrApprox>,
    recompile_tx: Sender<ChunkOrApprox>,
}

impl ChunkCache {
    pub fn new(reload_tx: Sender<ChunkOrApprox>, recompile_tx: Sender<ChunkOrApprox>) -> Self {
        Self {
            levels: Default::default(),
            pending: RwLock::new(HashMap::new()),
            reload_tx,
            recompile_tx,
        }
    }

    /// Insert (or replace) the entry at the carrier's (position, detail)
    /// slot. When the caller knows the block contents are bit-identical to
    /// the entry being replaced, the replaced entry's GPU meshes move to the
    /// new one instead of being re-uploaded.
    pub fn insert(&self, coa: ChunkOrApprox, contents_unchanged: bool) {
        let (pos, detail) = match (coa.pos(), coa.detail()) {
            (Some(pos), Some(detail)) => (pos, detail),
            _ => return,
        };
        let old = self.levels[detail as usize].write().insert(pos, coa.clone());
        if let Some(old) = old {
            if contents_unchanged {
                for layer in 0..N_LAYERS {
                    if let (Some(from), Some(to)) = (old.layer(layer), coa.layer(layer)) {
                        if !std::ptr::eq(from, to) {
                            to.lock().adopt_gpu(&mut from.lock());
                        }
                    }
                }
            }
        }
    }

    /// The entry at exactly (pos, detail), or NotLoaded.
    pub fn get(&self, pos: ChunkPos, detail: Lod) -> ChunkOrApprox {
        self.levels[detail as usize]
            .read()
            .get(&pos)
            .cloned()
            .unwrap_or(ChunkOrApprox::NotLoaded)
    }

    /// The best resident data for a position, probing finest to coarsest.
    /// Never generates anything.
    pub fn get_best_data(&self, pos: ChunkPos) -> ChunkOrApprox {
        self.get_best_data_limited(pos, Lod::Base)
    }

    /// As `get_best_data`, but starting the probe at `min_detail`: levels
    /// finer than the requested detail are skipped.
    pub fn get_best_data_limited(&self, pos: ChunkPos, min_detail: Lod) -> ChunkOrApprox {
        for level in (min_detail as usize)..N_LODS {
            if let Some(coa) = self.levels[level].read().get(&pos) {
                return coa.clone();
            }
        }
        ChunkOrApprox::NotLoaded
    }

    /// Admit a missing entry at the given detail and queue it for loading.
    /// No-op when the slot is already resident or already in flight.
    /// Returns whether a new load was queued.
    pub fn mark_for_load(&self, pos: ChunkPos, detail: Lod) -> bool {
        if self.levels[detail as usize].read().contains_key(&pos) {
            return false;
        }
        {
            let mut pending = self.pending.write();
            if pending.contains_key(&(pos, detail)) {
                return false;
            }
            let coa = match detail {
                Lod::Base => ChunkOrApprox::Full(Arc::new(Chunk::new(pos))),
                other => ChunkOrApprox::Approx(Arc::new(ChunkApprox::new(pos, other))),
            };
            if let Some(status) = coa.status() {
                status.insert(ChunkStatus::NEEDS_RELOAD);
            }
            pending.insert((pos, detail), coa.clone());
            let _ = self.reload_tx.send(coa);
        }
        true
    }

    /// Publish a freshly loaded carrier into its level map and clear its
    /// in-flight slot. Reloads of already-resident entries republish over
    /// themselves harmlessly.
    pub fn finish_load(&self, coa: ChunkOrApprox) {
        let (pos, detail) = match (coa.pos(), coa.detail()) {
            (Some(pos), Some(detail)) => (pos, detail),
            _ => return,
        };
        self.pending.write().remove(&(pos, detail));
        self.insert(coa, false);
    }

    /// Flag every resident entry at this position for reload and enqueue it.
    /// Entries whose flag is already set are skipped.
    pub fn mark_for_reload(&self, pos: ChunkPos) {
        for level in 0..N_LODS {
            let coa = match self.levels[level].read().get(&pos) {
                Some(coa) => coa.clone(),
                None => continue,
            };
            if coa
                .status()
                .map_or(false, |s| s.insert(ChunkStatus::NEEDS_RELOAD))
            {
                let _ = self.reload_tx.send(coa);
            }
        }
    }

    /// Flag every resident entry at this position for recompilation and
    /// enqueue it. Entries whose flag is already set are skipped.
    pub fn mark_for_recompile(&self, pos: ChunkPos) {
        for level in 0..N_LODS {
            let coa = match self.levels[level].read().get(&pos) {
                Some(coa) => coa.clone(),
                None => continue,
            };
            if coa
                .status()
                .map_or(false, |s| s.insert(ChunkStatus::NEEDS_RECOMPILE))
            {
                let _ = self.recompile_tx.send(coa);
            }
        }
    }

    /// Drop entries that drifted outside their level's radius (plus the
    /// eviction margin) around the viewer. Returns how many were dropped.
    pub fn evict_outside(&self, center: ChunkPos) -> usize {
        let mut evicted = 0;
        for (level, map) in self.levels.iter().enumerate() {
            let radius = MAX_RENDER_DISTANCES[level] + EVICTION_MARGIN;
            let mut map = map.write();
            let before = map.len();
            map.retain(|pos, _| pos.chebyshev(center) <= radius);
            evicted += before - map.len();
        }
        if evicted > 0 {
            debug!("evicted {evicted} cache entries around {center:?}");
        }
        evicted
    }

    /// Number of resident entries at a detail level.
    pub fn len(&self, detail: Lod) -> usize {
        self.levels[detail as usize].read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|m| m.read().is_empty())
    }

    /// Remove the entry at exactly (pos, detail), returning it.
    pub fn remove(&self, pos: ChunkPos, detail: Lod) -> ChunkOrApprox {
        self.levels[detail as usize]
            .write()
            .remove(&pos)
            .unwrap_or(ChunkOrApprox::NotLoaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn cache() -> (
        ChunkCache,
        crossbeam_channel::Receiver<ChunkOrApprox>,
        crossbeam_channel::Receiver<ChunkOrApprox>,
    ) {
        let (reload_tx, reload_rx) = unbounded();
        let (recompile_tx, recompile_rx) = unbounded();
        (ChunkCache::new(reload_tx, recompile_tx), reload_rx, recompile_rx)
    }

    #[test]
    fn desired_detail_is_a_step_function() {
        assert_eq!(desired_detail(0), Some(Lod::Base));
        assert_eq!(desired_detail(9), Some(Lod::Base));
        assert_eq!(desired_detail(10), Some(Lod::Half));
        assert_eq!(desired_detail(16), Some(Lod::Half));
        assert_eq!(desired_detail(17), None);
    }

    #[test]
    fn best_data_probes_finest_first() {
        let (cache, _reload, _recompile) = cache();
        let pos = ChunkPos::new(1, 2, 3);
        assert!(!cache.get_best_data(pos).is_loaded());

        cache.insert(
            ChunkOrApprox::Approx(Arc::new(ChunkApprox::new(pos, Lod::Quarter))),
            false,
        );
        assert_eq!(cache.get_best_data(pos).detail(), Some(Lod::Quarter));

        cache.insert(ChunkOrApprox::Full(Arc::new(Chunk::new(pos))), false);
        assert_eq!(cache.get_best_data(pos).detail(), Some(Lod::Base));

        // The limited probe skips the finer levels.
        assert_eq!(
            cache.get_best_data_limited(pos, Lod::Half).detail(),
            Some(Lod::Quarter)
        );
    }

    #[test]
    fn one_entry_per_position_and_detail() {
        let (cache, _reload, _recompile) = cache();
        let pos = ChunkPos::new(0, 0, 0);
        cache.insert(ChunkOrApprox::Full(Arc::new(Chunk::new(pos))), false);
        cache.insert(ChunkOrApprox::Full(Arc::new(Chunk::new(pos))), false);
        assert_eq!(cache.len(Lod::Base), 1);
    }

    #[test]
    fn mark_for_load_enqueues_once() {
        let (cache, reload, _recompile) = cache();
        let pos = ChunkPos::new(4, 0, 0);
        assert!(cache.mark_for_load(pos, Lod::Base));
        assert!(!cache.mark_for_load(pos, Lod::Base));
        assert_eq!(reload.len(), 1);
        let coa = reload.recv().unwrap();
        assert!(coa
            .status()
            .map_or(false, |s| s.contains(ChunkStatus::NEEDS_RELOAD)));
        // In-flight entries are not yet resident.
        assert_eq!(cache.len(Lod::Base), 0);
        assert!(!cache.get_best_data(pos).is_loaded());
        cache.finish_load(coa);
        assert_eq!(cache.len(Lod::Base), 1);
        assert!(cache.get_best_data(pos).is_loaded());
        // Once resident, further load marks are no-ops.
        assert!(!cache.mark_for_load(pos, Lod::Base));
    }

    #[test]
    fn mark_for_recompile_is_idempotent_until_cleared() {
        let (cache, _reload, recompile) = cache();
        let pos = ChunkPos::new(0, 0, 0);
        let chunk = Arc::new(Chunk::new(pos));
        cache.insert(ChunkOrApprox::Full(chunk.clone()), false);

        cache.mark_for_recompile(pos);
        cache.mark_for_recompile(pos);
        assert_eq!(recompile.len(), 1);

        chunk.status.remove(ChunkStatus::NEEDS_RECOMPILE);
        cache.mark_for_recompile(pos);
        assert_eq!(recompile.len(), 2);
    }

    #[test]
    fn eviction_sweeps_by_level_radius() {
        let (cache, _reload, _recompile) = cache();
        let center = ChunkPos::new(0, 0, 0);
        let near = ChunkPos::new(3, 0, 0);
        let far = ChunkPos::new(9, 0, 0);
        cache.insert(ChunkOrApprox::Full(Arc::new(Chunk::new(near))), false);
        cache.insert(ChunkOrApprox::Full(Arc::new(Chunk::new(far))), false);
        cache.insert(
            ChunkOrApprox::Approx(Arc::new(ChunkApprox::new(far, Lod::Half))),
            false,
        );
        let evicted = cache.evict_outside(center);
        // The far full chunk (radius 3 + margin 2 < 9) goes; so does the far
        // approximation (radius 4 + margin 2 < 9); the near chunk stays.
        assert_eq!(evicted, 2);
        assert!(cache.get_best_data(near).is_loaded());
        assert!(!cache.get_best_data(far).is_loaded());
    }
}
