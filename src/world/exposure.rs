use crate::world::approx::Lod;
use crate::world::block::Block;
use crate::world::block_flags::BlockFlags;
use crate::world::cache::ChunkCache;
use crate::world::chunk::CHUNK_SIZE;
use crate::world::chunk_or_approx::{BlockAccess, ChunkOrApprox};
use crate::world::coords::{ChunkIndex, ChunkPos, DIRECTIONS};

/// The occlusion rule: a neighbor hides the face it touches when it is void
/// (unloaded space reads as closed), opaque, or merges visually with the
/// occluded block's translucency class.
#[inline]
pub fn occludes(neighbor: Block, occluded: Block) -> bool {
    neighbor.is_void()
        || neighbor.is_opaque()
        || (neighbor.is_translucent()
            && occluded.is_translucent()
            && neighbor.shares_translucency(occluded))
}

/// Map a boundary index to the matching index on the facing edge of the
/// neighbor chunk across the given direction.
#[inline]
fn wrap_into_neighbor(idx: ChunkIndex, direction: usize) -> ChunkIndex {
    let mut idx = idx;
    match direction {
        0 => idx.z = 0,
        1 => idx.z = CHUNK_SIZE - 1,
        2 => idx.y = 0,
        3 => idx.y = CHUNK_SIZE - 1,
        4 => idx.x = 0,
        5 => idx.x = CHUNK_SIZE - 1,
        _ => unreachable!("direction out of range"),
    }
    idx
}

/// Whether the face of `here` toward `direction` is occluded. `there` is the
/// in-cube neighbor sample (VOID when the index sits on the cube face at
/// this step). Boundary faces substitute the cached neighbor only when its
/// detail matches this cube's; a missing or detail-mismatched neighbor reads
/// as closed, so nothing flashes while data streams in or across LOD seams.
fn face_occluded(
    idx: ChunkIndex,
    step: u32,
    detail: Lod,
    neighbor: &ChunkOrApprox,
    here: Block,
    there: Block,
    direction: usize,
) -> bool {
    if there.is_void() && idx.on_face(direction, step) {
        return match neighbor.detail() {
            Some(d) if d == detail => {
                let across = wrap_into_neighbor(idx, direction);
                occludes(neighbor.get_block(across), here)
            }
            _ => true,
        };
    }
    occludes(there, here)
}

fn exposure_pass<P: BlockAccess>(payload: &mut P, detail: Lod, neighbors: &[ChunkOrApprox; 6]) {
    let step = detail.step();
    let mut x = 0;
    while x < CHUNK_SIZE {
        let mut y = 0;
        while y < CHUNK_SIZE {
            let mut z = 0;
            while z < CHUNK_SIZE {
                let idx = ChunkIndex::new(x, y, z);
                let here = payload.get_block(idx);
                let local = payload.get_neighbors(idx);
                let mut to_set = BlockFlags::empty();
                let mut to_clear = BlockFlags::empty();
                for direction in 0..6 {
                    let bit = BlockFlags::exposed_bit(direction);
                    if face_occluded(idx, step, detail, &neighbors[direction], here, local[direction], direction)
                    {
                        to_clear |= bit;
                    } else {
                        to_set |= bit;
                    }
                }
                payload.set_flags(idx, to_set);
                payload.clear_flags(idx, to_clear);
                z += step;
            }
            y += step;
        }
        x += step;
    }
}

/// Recompute the six exposure bits of every block in the given chunk or
/// approximation against the current cache contents.
///
/// Panics when handed a `NotLoaded` carrier; that is a programming error in
/// the pipeline, not a recoverable state.
pub fn compute_exposure(coa: &ChunkOrApprox, cache: &ChunkCache) {
    let pos = coa
        .pos()
        .expect("attempted to compute exposure of unloaded chunk");
    let neighbors = fetch_neighborhood(pos, cache);
    match coa {
        ChunkOrApprox::Full(c) => {
            exposure_pass(&mut *c.payload.write(), Lod::Base, &neighbors);
        }
        ChunkOrApprox::Approx(ca) => {
            let mut payload = ca.payload.write();
            let detail = payload.detail();
            exposure_pass(&mut *payload, detail, &neighbors);
        }
        ChunkOrApprox::NotLoaded => unreachable!(),
    }
}

/// The best resident data for each of the six axis neighbors, in flag-bit
/// order (above, below, north, south, east, west).
pub fn fetch_neighborhood(pos: ChunkPos, cache: &ChunkCache) -> [ChunkOrApprox; 6] {
    DIRECTIONS.map(|(dx, dy, dz)| cache.get_best_data(pos.offset(dx, dy, dz)))
}
