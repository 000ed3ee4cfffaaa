pub mod mesh;
pub mod vertex;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::world::cache::{desired_detail, ChunkCache, MAX_RENDER_DISTANCES};
use crate::world::chunk::ChunkStatus;
use crate::world::chunk_or_approx::ChunkOrApprox;
use crate::world::coords::{ChunkPos, GlobalPos};
use crate::world::N_LODS;

pub use mesh::{compile_chunk, MeshBuffer, MeshSegment, UploadedMesh, MAX_INDICES};
pub use vertex::Vertex;

/// Rendering layers, in draw order. Transparent is binary-alpha solids;
/// translucent is alpha-blended liquids drawn with a read-only depth buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(usize)]
pub enum Layer {
    Opaque = 0,
    Transparent = 1,
    Translucent = 2,
}

pub const N_LAYERS: usize = 3;

pub const LAYERS: [Layer; N_LAYERS] = [Layer::Opaque, Layer::Transparent, Layer::Translucent];

/// Opaque GPU buffer identity. Only the main thread mints or frees these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

/// The GPU backend boundary. The core compiles meshes to staging and calls
/// this from the main thread; everything rasterization-related lives on the
/// other side.
pub trait Renderer {
    fn upload_mesh(&mut self, vertices: &[Vertex], indices: &[u16]) -> MeshHandle;
    fn free_mesh(&mut self, handle: MeshHandle);
    fn draw_mesh(&mut self, handle: MeshHandle, layer: Layer, offset: Vec3);
}

/// A renderer that swallows everything while keeping honest handle
/// bookkeeping. Backs tests and headless runs.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    next_handle: u32,
    live: std::collections::HashSet<u32>,
    uploads: usize,
    draws: usize,
    last_vertices: Vec<Vertex>,
}

impl HeadlessRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn uploads(&self) -> usize {
        self.uploads
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    pub fn live_meshes(&self) -> usize {
        self.live.len()
    }

    pub fn last_vertices(&self) -> &[Vertex] {
        &self.last_vertices
    }
}

impl Renderer for HeadlessRenderer {
    fn upload_mesh(&mut self, vertices: &[Vertex], _indices: &[u16]) -> MeshHandle {
        let handle = MeshHandle(self.next_handle);
        self.next_handle += 1;
        self.live.insert(handle.0);
        self.uploads += 1;
        self.last_vertices = vertices.to_vec();
        handle
    }

    fn free_mesh(&mut self, handle: MeshHandle) {
        self.live.remove(&handle.0);
    }

    fn draw_mesh(&mut self, _handle: MeshHandle, _layer: Layer, _offset: Vec3) {
        self.draws += 1;
    }
}

/// Draw one layer of a compiled chunk, uploading pending staging first.
/// Chunks that are not yet loaded and compiled are skipped silently; the
/// cache will deliver them on a later pass.
pub fn render_chunk_layer(
    coa: &ChunkOrApprox,
    origin: GlobalPos,
    layer: Layer,
    renderer: &mut dyn Renderer,
) {
    let status = match coa.status() {
        Some(status) => status.get(),
        None => return,
    };
    if !status.contains(ChunkStatus::LOADED) || !status.contains(ChunkStatus::COMPILED) {
        return;
    }
    let pos = coa.pos().expect("loaded chunk has a position");
    let buffer = coa.layer(layer as usize).expect("loaded chunk has layers");
    let mut buffer = buffer.lock();
    if buffer.is_empty() {
        return;
    }
    buffer.upload(renderer);
    let base = pos.base();
    let offset = Vec3::new(
        (base.x - origin.x) as f32,
        (base.y - origin.y) as f32,
        (base.z - origin.z) as f32,
    );
    for mesh in buffer.gpu_meshes() {
        renderer.draw_mesh(mesh.handle, layer, offset);
    }
}

/// Render everything within the farthest render distance around the viewer:
/// a spherical sweep per layer, asking the cache for the best data no finer
/// than the distance calls for.
pub fn render_area(cache: &ChunkCache, origin: GlobalPos, renderer: &mut dyn Renderer) {
    let center = origin.chunk();
    let farthest = MAX_RENDER_DISTANCES[N_LODS - 1];
    for layer in LAYERS {
        for_each_chunk_in_sphere(center, farthest, |pos, dist_sq| {
            let detail = match desired_detail(dist_sq) {
                Some(detail) => detail,
                None => return,
            };
            let coa = cache.get_best_data_limited(pos, detail);
            render_chunk_layer(&coa, origin, layer, renderer);
        });
    }
}

/// Walk chunk positions in a ball of the given radius around a center,
/// skipping the rows and columns a bounding cube would waste.
pub fn for_each_chunk_in_sphere<F: FnMut(ChunkPos, i64)>(center: ChunkPos, radius: i32, mut f: F) {
    let r = radius as i64;
    for dx in -radius..=radius {
        let x_sq = (dx as i64) * (dx as i64);
        let skip_y = r - ((r * r - x_sq) as f64).sqrt().ceil() as i64;
        for dy in (-r + skip_y)..=(r - skip_y) {
            let xy_sq = x_sq + dy * dy;
            let skip_z = r - ((r * r - xy_sq).max(0) as f64).sqrt().ceil() as i64;
            for dz in (-r + skip_z)..=(r - skip_z) {
                let dist_sq = xy_sq + dz * dz;
                let pos = center.offset(dx, dy as i32, dz as i32);
                f(pos, dist_sq);
            }
        }
    }
}
