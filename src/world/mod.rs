pub mod approx;
pub mod block;
pub mod block_flags;
pub mod cache;
pub mod chunk;
pub mod chunk_or_approx;
pub mod coords;
pub mod diff;
pub mod exposure;
pub mod generator;

pub use approx::{ChunkApprox, Lod, N_LODS};
pub use block::Block;
pub use block_flags::BlockFlags;
pub use cache::{desired_detail, ChunkCache, MAX_RENDER_DISTANCES};
pub use chunk::{Chunk, ChunkStatus, CHUNK_BITS, CHUNK_SIZE, CHUNK_VOLUME};
pub use chunk_or_approx::{BlockAccess, ChunkOrApprox};
pub use coords::{AreaPos, ChunkIndex, ChunkPos, GlobalPos};
pub use diff::{Diff, DiffRegistry, DIFF_LENGTH, DIFF_SHIFT, DIFF_SIZE};
pub use exposure::compute_exposure;
pub use generator::{FlatTerrain, NoiseTerrain, TerrainSource};
