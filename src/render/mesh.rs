use crate::render::vertex::Vertex;
use crate::render::{Layer, MeshHandle, Renderer, N_LAYERS};
use crate::world::block::{
    Block, FACE_BACK, FACE_BOT, FACE_FRONT, FACE_LEFT, FACE_RIGHT, FACE_TOP, ROTATE_FACE,
};
use crate::world::block_flags::BlockFlags;
use crate::world::chunk::CHUNK_SIZE;
use crate::world::chunk_or_approx::{BlockAccess, ChunkOrApprox};
use crate::world::coords::ChunkIndex;

/// Index cap per buffer segment. Indices are 16-bit; a face costs 6 of them,
/// so segments close a little below the raw u16 ceiling and a new one opens
/// on the chunk's per-layer list.
pub const MAX_INDICES: usize = 3 * (u16::MAX as usize / 4);

/// Tiles per atlas row; tile n sits at (n % 16, n / 16).
pub const ATLAS_TILES_PER_ROW: u32 = 16;

/// Per-face brightness shading, flag-bit order (above brightest, below
/// darkest).
pub const FACE_BRIGHTNESS: [u8; 6] = [255, 140, 200, 170, 220, 190];

/// One vertex/index pair destined for a single GPU buffer.
#[derive(Debug, Default, Clone)]
pub struct MeshSegment {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u16>,
}

impl MeshSegment {
    fn has_room(&self) -> bool {
        self.indices.len() + 6 <= MAX_INDICES
    }
}

/// A GPU-resident buffer: the opaque handle plus the index count to draw.
#[derive(Debug, Clone, Copy)]
pub struct UploadedMesh {
    pub handle: MeshHandle,
    pub index_count: u32,
}

/// One render layer of one chunk: CPU staging segments written by the data
/// thread, GPU buffers owned by the main thread. Guarded by the chunk's
/// per-layer mutex; the lock is held only to swap staging in or move
/// handles, never across compilation.
#[derive(Debug, Default)]
pub struct MeshBuffer {
    staging: Vec<MeshSegment>,
    staged: bool,
    gpu: Vec<UploadedMesh>,
}

impl MeshBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the staging contents with freshly compiled segments.
    pub fn install_staging(&mut self, segments: Vec<MeshSegment>) {
        self.staging = segments;
        self.staged = true;
    }

    /// Whether staging is waiting to be uploaded.
    pub fn has_staging(&self) -> bool {
        self.staged
    }

    pub fn is_empty(&self) -> bool {
        !self.staged && self.gpu.is_empty()
    }

    /// Move GPU buffers from a replaced buffer into this one; used when a
    /// cache entry is replaced by bit-identical contents so nothing needs
    /// re-uploading.
    pub fn adopt_gpu(&mut self, other: &mut MeshBuffer) {
        if self.gpu.is_empty() {
            self.gpu = std::mem::take(&mut other.gpu);
            if !self.staged {
                // Adopted buffers are current; nothing to upload.
                self.staging.clear();
            }
        }
    }

    /// Upload pending staging, freeing any superseded GPU buffers. The
    /// staging arrays are released afterwards; completed buffers are never
    /// partially updated.
    pub fn upload(&mut self, renderer: &mut dyn Renderer) {
        if !self.staged {
            return;
        }
        for mesh in self.gpu.drain(..) {
            renderer.free_mesh(mesh.handle);
        }
        for segment in self.staging.drain(..) {
            if segment.indices.is_empty() {
                continue;
            }
            let handle = renderer.upload_mesh(&segment.vertices, &segment.indices);
            self.gpu.push(UploadedMesh {
                handle,
                index_count: segment.indices.len() as u32,
            });
        }
        self.staged = false;
    }

    pub fn gpu_meshes(&self) -> &[UploadedMesh] {
        &self.gpu
    }
}

/// Accumulates faces for one layer, splitting into segments at the index
/// cap.
#[derive(Debug, Default)]
struct LayerBuilder {
    segments: Vec<MeshSegment>,
}

impl LayerBuilder {
    fn add_face(&mut self, corners: [[f32; 3]; 4], uv: [[f32; 2]; 4], normal: [i8; 3], brightness: u8) {
        if self.segments.last().map_or(true, |s| !s.has_room()) {
            self.segments.push(MeshSegment::default());
        }
        let segment = self.segments.last_mut().expect("segment just ensured");
        let base = segment.vertices.len() as u16;
        for i in 0..4 {
            segment
                .vertices
                .push(Vertex::new(corners[i], uv[i], normal, brightness));
        }
        segment
            .indices
            .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    fn finish(self) -> Vec<MeshSegment> {
        self.segments
    }
}

/// Which render layer a block's faces land in, or None for invisible
/// blocks.
pub fn layer_for(block: Block) -> Option<Layer> {
    if block.is_invisible() {
        None
    } else if block.is_translucent_liquid() {
        Some(Layer::Translucent)
    } else if block.is_transparent() {
        Some(Layer::Transparent)
    } else {
        Some(Layer::Opaque)
    }
}

/// Block faces in flag-bit direction order: above, below, north, south,
/// east, west.
const DIR_TO_FACE: [usize; 6] = [FACE_TOP, FACE_BOT, FACE_FRONT, FACE_BACK, FACE_RIGHT, FACE_LEFT];

/// The atlas tile for one face of a block, after orientation. Most blocks
/// use one tile per id; grass and trunks get distinct top/side/bottom tiles.
pub fn face_tile(block: Block, flags: BlockFlags, direction: usize) -> u32 {
    let mut face = DIR_TO_FACE[direction];
    if flags.contains(BlockFlags::ORIENTABLE) {
        face = ROTATE_FACE[(block.data() & 0x7) as usize][face] as usize;
    }
    let id = block.id() as u32;
    if block.is(Block::GRASS) {
        match face {
            FACE_TOP => id,
            FACE_BOT => Block::DIRT.id() as u32,
            _ => id + 0x80, // side variant row
        }
    } else if block.is(Block::TRUNK) {
        match face {
            FACE_TOP | FACE_BOT => id,
            _ => id + 0x80,
        }
    } else {
        id
    }
}

fn tile_uv(tile: u32) -> [[f32; 2]; 4] {
    let span = 1.0 / ATLAS_TILES_PER_ROW as f32;
    let u0 = (tile % ATLAS_TILES_PER_ROW) as f32 * span;
    let v0 = (tile / ATLAS_TILES_PER_ROW) as f32 * span;
    [
        [u0, v0],
        [u0 + span, v0],
        [u0 + span, v0 + span],
        [u0, v0 + span],
    ]
}

const NORMALS: [[i8; 3]; 6] = [
    [0, 0, 1],
    [0, 0, -1],
    [0, 1, 0],
    [0, -1, 0],
    [1, 0, 0],
    [-1, 0, 0],
];

/// Corner offsets of each face quad for a unit cell, wound outward.
fn face_corners(x: f32, y: f32, z: f32, s: f32, direction: usize) -> [[f32; 3]; 4] {
    match direction {
        // above
        0 => [[x, y, z + s], [x + s, y, z + s], [x + s, y + s, z + s], [x, y + s, z + s]],
        // below
        1 => [[x, y + s, z], [x + s, y + s, z], [x + s, y, z], [x, y, z]],
        // north
        2 => [[x + s, y + s, z], [x, y + s, z], [x, y + s, z + s], [x + s, y + s, z + s]],
        // south
        3 => [[x, y, z], [x + s, y, z], [x + s, y, z + s], [x, y, z + s]],
        // east
        4 => [[x + s, y, z], [x + s, y + s, z], [x + s, y + s, z + s], [x + s, y, z + s]],
        // west
        5 => [[x, y + s, z], [x, y, z], [x, y, z + s], [x, y + s, z + s]],
        _ => unreachable!("direction out of range"),
    }
}

fn build_pass<P: BlockAccess>(payload: &P) -> [Vec<MeshSegment>; N_LAYERS] {
    let step = payload.step();
    let s = step as f32;
    let mut builders: [LayerBuilder; N_LAYERS] = Default::default();
    let mut x = 0;
    while x < CHUNK_SIZE {
        let mut y = 0;
        while y < CHUNK_SIZE {
            let mut z = 0;
            while z < CHUNK_SIZE {
                let idx = ChunkIndex::new(x, y, z);
                let flags = payload.get_flags(idx);
                if flags.any_exposed() {
                    let block = payload.get_block(idx);
                    if let Some(layer) = layer_for(block) {
                        for direction in 0..6 {
                            if !flags.contains(BlockFlags::exposed_bit(direction)) {
                                continue;
                            }
                            let corners = face_corners(x as f32, y as f32, z as f32, s, direction);
                            let uv = tile_uv(face_tile(block, flags, direction));
                            builders[layer as usize].add_face(
                                corners,
                                uv,
                                NORMALS[direction],
                                FACE_BRIGHTNESS[direction],
                            );
                        }
                    }
                }
                z += step;
            }
            y += step;
        }
        x += step;
    }
    builders.map(LayerBuilder::finish)
}

/// Compile the given chunk or approximation into fresh staging for its three
/// layer buffers. Runs on the data thread; the per-layer locks are taken
/// only for the final swap-in.
pub fn compile_chunk(coa: &ChunkOrApprox) {
    let segments = match coa {
        ChunkOrApprox::NotLoaded => return,
        ChunkOrApprox::Full(c) => build_pass(&*c.payload.read()),
        ChunkOrApprox::Approx(ca) => build_pass(&*ca.payload.read()),
    };
    for (layer, segs) in segments.into_iter().enumerate() {
        if let Some(buffer) = coa.layer(layer) {
            buffer.lock().install_staging(segs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::HeadlessRenderer;
    use crate::world::block::ORI_EAST;
    use crate::world::chunk::Chunk;
    use crate::world::coords::ChunkPos;
    use std::sync::Arc;

    fn chunk_with_one_exposed_block(block: Block) -> Arc<Chunk> {
        let chunk = Arc::new(Chunk::new(ChunkPos::new(0, 0, 0)));
        {
            let mut payload = chunk.payload.write();
            let idx = ChunkIndex::new(8, 8, 8);
            payload.put_block(idx, block);
            payload.set_flags(idx, BlockFlags::EXPOSED_ANY);
        }
        chunk
    }

    fn total_faces(segments: &[MeshSegment]) -> usize {
        segments.iter().map(|s| s.indices.len() / 6).sum()
    }

    #[test]
    fn layer_routing() {
        assert_eq!(layer_for(Block::AIR), None);
        assert_eq!(layer_for(Block::STONE), Some(Layer::Opaque));
        assert_eq!(layer_for(Block::LAVA), Some(Layer::Opaque));
        assert_eq!(layer_for(Block::GLASS), Some(Layer::Transparent));
        assert_eq!(layer_for(Block::LEAVES), Some(Layer::Transparent));
        assert_eq!(layer_for(Block::WATER), Some(Layer::Translucent));
    }

    #[test]
    fn exposed_block_emits_six_quads() {
        let chunk = chunk_with_one_exposed_block(Block::STONE);
        let coa = ChunkOrApprox::Full(chunk.clone());
        compile_chunk(&coa);
        let opaque = chunk.layers[Layer::Opaque as usize].lock();
        assert!(opaque.has_staging());
        drop(opaque);

        let mut renderer = HeadlessRenderer::new();
        let mut opaque = chunk.layers[Layer::Opaque as usize].lock();
        opaque.upload(&mut renderer);
        assert_eq!(opaque.gpu_meshes().len(), 1);
        assert_eq!(opaque.gpu_meshes()[0].index_count, 36);
        assert!(!opaque.has_staging());
    }

    #[test]
    fn water_lands_in_the_translucent_layer() {
        let chunk = chunk_with_one_exposed_block(Block::WATER);
        let coa = ChunkOrApprox::Full(chunk.clone());
        compile_chunk(&coa);
        assert!(chunk.layers[Layer::Translucent as usize].lock().has_staging());
        let mut renderer = HeadlessRenderer::new();
        let mut opaque = chunk.layers[Layer::Opaque as usize].lock();
        opaque.upload(&mut renderer);
        assert!(opaque.gpu_meshes().is_empty());
    }

    #[test]
    fn segments_split_at_the_index_cap() {
        let mut builder = LayerBuilder::default();
        let faces = MAX_INDICES / 6 + 10;
        for _ in 0..faces {
            builder.add_face(
                face_corners(0.0, 0.0, 0.0, 1.0, 0),
                tile_uv(0),
                NORMALS[0],
                255,
            );
        }
        let segments = builder.finish();
        assert_eq!(segments.len(), 2);
        assert_eq!(total_faces(&segments), faces);
        assert!(segments[0].indices.len() <= MAX_INDICES);
        // All indices stay within the segment's own vertex range.
        for segment in &segments {
            let max = *segment.indices.iter().max().unwrap() as usize;
            assert!(max < segment.vertices.len());
        }
    }

    #[test]
    fn orientation_rotates_face_tiles() {
        let upright = Block::TRUNK.with_data(crate::world::block::ORI_NORTH);
        let tipped = Block::TRUNK.with_data(crate::world::block::ORI_UP);
        let flags = BlockFlags::ORIENTABLE;
        // Facing north, the top face shows end-grain; facing up, the front
        // face has rotated onto the top, so bark shows instead.
        assert_ne!(face_tile(upright, flags, 0), face_tile(tipped, flags, 0));
        // Rotation about the vertical axis permutes only the side faces.
        let east = Block::TRUNK.with_data(ORI_EAST);
        assert_eq!(face_tile(upright, flags, 0), face_tile(east, flags, 0));
        assert_ne!(face_tile(Block::GRASS, BlockFlags::empty(), 0), face_tile(Block::GRASS, BlockFlags::empty(), 1));
        // A non-orientable block uses one tile everywhere.
        assert_eq!(
            face_tile(Block::STONE, BlockFlags::empty(), 0),
            face_tile(Block::STONE, BlockFlags::empty(), 4)
        );
    }

    #[test]
    fn adopt_gpu_moves_handles_without_reupload() {
        let mut renderer = HeadlessRenderer::new();
        let mut old = MeshBuffer::new();
        old.install_staging(vec![MeshSegment {
            vertices: vec![Vertex::new([0.0; 3], [0.0; 2], [0, 0, 1], 255); 4],
            indices: vec![0, 1, 2, 2, 3, 0],
        }]);
        old.upload(&mut renderer);
        let uploads_before = renderer.uploads();

        let mut new = MeshBuffer::new();
        new.adopt_gpu(&mut old);
        assert_eq!(new.gpu_meshes().len(), 1);
        assert!(old.gpu_meshes().is_empty());
        new.upload(&mut renderer); // no staging pending: a no-op
        assert_eq!(renderer.uploads(), uploads_before);
    }

    #[test]
    fn approximation_quads_scale_with_the_step() {
        use crate::world::approx::{ChunkApprox, Lod};
        let approx = Arc::new(ChunkApprox::new(ChunkPos::new(0, 0, 0), Lod::Quarter));
        {
            let mut payload = approx.payload.write();
            payload.put_block(ChunkIndex::new(0, 0, 0), Block::STONE);
            payload.set_flags(ChunkIndex::new(0, 0, 0), BlockFlags::EXPOSED_ABOVE);
        }
        let coa = ChunkOrApprox::Approx(approx.clone());
        compile_chunk(&coa);
        let mut renderer = HeadlessRenderer::new();
        let mut opaque = approx.layers[Layer::Opaque as usize].lock();
        opaque.upload(&mut renderer);
        assert_eq!(opaque.gpu_meshes().len(), 1);
        assert_eq!(opaque.gpu_meshes()[0].index_count, 6);
        // The quad covers the whole 4-block cell.
        let vertices = renderer.last_vertices().to_vec();
        assert!(vertices.iter().any(|v| v.position[0] == 4.0));
    }
}
