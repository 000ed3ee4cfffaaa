use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::EngineConfig;
use crate::entity::{ActiveArea, EntityId, PrototypeRegistry, ACTIVE_AREA_SIZE};
use crate::error::WorldError;
use crate::physics::{substeps_for, tick_physics, BlockReader};
use crate::render::{compile_chunk, for_each_chunk_in_sphere, render_area, Renderer};
use crate::world::cache::{desired_detail, ChunkCache, MAX_RENDER_DISTANCES};
use crate::world::chunk::{ChunkStatus, CHUNK_SIZE, CHUNK_VOLUME};
use crate::world::chunk_or_approx::ChunkOrApprox;
use crate::world::coords::{AreaPos, ChunkIndex, ChunkPos, GlobalPos, DIRECTIONS};
use crate::world::diff::DiffRegistry;
use crate::world::exposure::compute_exposure;
use crate::world::generator::TerrainSource;
use crate::world::{Block, Lod, N_LODS};

/// Max chunks loaded per data tick.
pub const LOAD_CAP: usize = 16;
/// Max chunks recompiled per data tick.
pub const COMPILE_CAP: usize = 1024;

pub const TICKS_PER_SECOND: f32 = 60.0;
pub const SECONDS_PER_TICK: f32 = 1.0 / TICKS_PER_SECOND;

/// How long the data thread naps between passes when idle.
const DATA_THREAD_NAP: Duration = Duration::from_millis(10);

/// Everything shared between the main thread and the data thread: storage,
/// the work queues, the viewer position and the shutdown flag. No globals;
/// core entry points take this explicitly.
pub struct World {
    pub cache: ChunkCache,
    pub diffs: DiffRegistry,
    generator: Box<dyn TerrainSource>,
    reload_rx: Receiver<ChunkOrApprox>,
    recompile_rx: Receiver<ChunkOrApprox>,
    recompile_tx: Sender<ChunkOrApprox>,
    shutdown: AtomicBool,
    /// Viewer chunk position, published by the main thread each tick and
    /// snapshotted by the data thread for its load scan.
    viewer: Mutex<ChunkPos>,
}

impl World {
    pub fn new(generator: Box<dyn TerrainSource>) -> Self {
        let (reload_tx, reload_rx) = unbounded();
        let (recompile_tx, recompile_rx) = unbounded();
        Self {
            cache: ChunkCache::new(reload_tx, recompile_tx.clone()),
            diffs: DiffRegistry::new(),
            generator,
            reload_rx,
            recompile_rx,
            recompile_tx,
            shutdown: AtomicBool::new(false),
            viewer: Mutex::new(ChunkPos::new(0, 0, 0)),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn publish_viewer(&self, pos: ChunkPos) {
        *self.viewer.lock() = pos;
    }

    pub fn viewer(&self) -> ChunkPos {
        *self.viewer.lock()
    }

    /// Author an edit: record it in the diff overlay and reload every
    /// resident copy of the chunk so the edit becomes visible. An edit on a
    /// chunk face also invalidates the exposure of the touching neighbor.
    pub fn edit_block(&self, pos: GlobalPos, b: Block) {
        self.diffs.put_block(pos, b);
        let chunk = pos.chunk();
        self.cache.mark_for_reload(chunk);
        let idx = pos.chunk_index();
        for (direction, (dx, dy, dz)) in DIRECTIONS.iter().enumerate() {
            if idx.on_face(direction, 1) {
                self.cache.mark_for_recompile(chunk.offset(*dx, *dy, *dz));
            }
        }
    }

    /// Fill a carrier's payload from the generator overlaid with the diff,
    /// then publish it and queue it for recompilation.
    pub fn load_chunk(&self, coa: &ChunkOrApprox) {
        let pos = match coa.pos() {
            Some(pos) => pos,
            None => return,
        };
        // Lock the covering diff once for the whole fill; loads assume the
        // diff is quiescent for their duration.
        let diff_arc = self.diffs.diff_for(pos);
        let diff_guard = diff_arc.as_ref().map(|d| d.read());
        let diff = diff_guard.as_deref();
        match coa {
            ChunkOrApprox::Full(c) => {
                let mut payload = c.payload.write();
                let base = pos.base();
                let generator = self.generator.as_ref();
                // One z-layer per slice of the block array; layers are
                // independent, so fill them in parallel.
                payload
                    .blocks_mut()
                    .par_chunks_mut((CHUNK_SIZE * CHUNK_SIZE) as usize)
                    .enumerate()
                    .for_each(|(z, layer)| {
                        for y in 0..CHUNK_SIZE {
                            for x in 0..CHUNK_SIZE {
                                let rpos = base.offset(x as i64, y as i64, z as i64);
                                let mut block = match diff {
                                    Some(d) => d.get_block_at(rpos),
                                    None => Block::VOID,
                                };
                                if block.is_void() {
                                    block = generator.block_at(rpos);
                                }
                                layer[(x + y * CHUNK_SIZE) as usize] = block.0;
                            }
                        }
                    });
            }
            ChunkOrApprox::Approx(ca) => {
                let mut payload = ca.payload.write();
                let step = payload.detail().step();
                let base = pos.base();
                let mut x = 0;
                while x < CHUNK_SIZE {
                    let mut y = 0;
                    while y < CHUNK_SIZE {
                        let mut z = 0;
                        while z < CHUNK_SIZE {
                            let rpos = base.offset(x as i64, y as i64, z as i64);
                            let mut block = match diff {
                                Some(d) => d.get_block_at(rpos),
                                None => Block::VOID,
                            };
                            if block.is_void() {
                                block = self.generator.block_at(rpos);
                            }
                            payload.put_block(ChunkIndex::new(x, y, z), block);
                            z += step;
                        }
                        y += step;
                    }
                    x += step;
                }
            }
            ChunkOrApprox::NotLoaded => return,
        }
        let status = coa.status().expect("loaded carrier has status");
        status.remove(ChunkStatus::NEEDS_RELOAD);
        status.insert(ChunkStatus::LOADED);
        self.cache.finish_load(coa.clone());
        if status.insert(ChunkStatus::NEEDS_RECOMPILE) {
            let _ = self.recompile_tx.send(coa.clone());
        }
    }

    /// Drain up to `LOAD_CAP` reload jobs.
    pub fn tick_load(&self) -> usize {
        let mut loaded = 0;
        while loaded < LOAD_CAP {
            let coa = match self.reload_rx.try_recv() {
                Ok(coa) => coa,
                Err(_) => break,
            };
            self.load_chunk(&coa);
            loaded += 1;
        }
        if loaded > 0 {
            debug!("loaded {loaded} chunks");
        }
        loaded
    }

    /// Whether a recompile item's six-neighborhood is ready: every axis
    /// neighbor is either resident or outside the load sphere (and so will
    /// never arrive; exposure treats it as closed).
    fn neighborhood_ready(&self, pos: ChunkPos, center: ChunkPos) -> bool {
        let reach = MAX_RENDER_DISTANCES[N_LODS - 1];
        for (dx, dy, dz) in DIRECTIONS {
            let npos = pos.offset(dx, dy, dz);
            if self.cache.get_best_data(npos).is_loaded() {
                continue;
            }
            if npos.chebyshev(center) <= reach {
                return false;
            }
        }
        true
    }

    /// Drain up to `COMPILE_CAP` recompile jobs. Items whose neighborhood
    /// is not ready go back to the tail; the skip counter keeps one tick
    /// from spinning on a neighborhood that will not complete this pass.
    pub fn tick_compile(&self) -> usize {
        let center = self.viewer();
        let mut compiled = 0;
        let mut skipped: i64 = 0;
        while compiled < COMPILE_CAP && (self.recompile_rx.len() as i64 - skipped) > 0 {
            let coa = match self.recompile_rx.try_recv() {
                Ok(coa) => coa,
                Err(_) => break,
            };
            let pos = match coa.pos() {
                Some(pos) => pos,
                None => continue,
            };
            if self.neighborhood_ready(pos, center) {
                compute_exposure(&coa, &self.cache);
                compile_chunk(&coa);
                let status = coa.status().expect("compiled carrier has status");
                status.insert(ChunkStatus::COMPILED);
                status.remove(ChunkStatus::NEEDS_RECOMPILE);
                compiled += 1;
            } else {
                let _ = self.recompile_tx.send(coa);
                skipped += 1;
            }
        }
        if compiled > 0 {
            debug!("compiled {compiled} chunks");
        }
        compiled
    }

    /// Scan the sphere around the viewer nearest-first and queue every
    /// missing entry at the detail its distance calls for, stopping once
    /// the per-tick load budget is spoken for. Then sweep out-of-range
    /// entries.
    pub fn load_surroundings(&self, center: ChunkPos) {
        let reach = MAX_RENDER_DISTANCES[N_LODS - 1];
        let mut wanted: Vec<(i64, ChunkPos, Lod)> = Vec::new();
        for_each_chunk_in_sphere(center, reach, |pos, dist_sq| {
            if let Some(detail) = desired_detail(dist_sq) {
                wanted.push((dist_sq, pos, detail));
            }
        });
        wanted.sort_by_key(|(dist_sq, _, _)| *dist_sq);
        let mut queued = 0usize;
        for (_, pos, detail) in wanted {
            if self.cache.mark_for_load(pos, detail) {
                queued += 1;
                if queued >= LOAD_CAP {
                    break;
                }
            }
        }
        self.cache.evict_outside(center);
    }

    /// One full data pass; what the data thread runs in its loop.
    pub fn tick_data(&self) {
        let center = self.viewer();
        self.load_surroundings(center);
        self.tick_load();
        self.tick_compile();
    }

    pub fn reload_queue_len(&self) -> usize {
        self.reload_rx.len()
    }

    pub fn recompile_queue_len(&self) -> usize {
        self.recompile_rx.len()
    }

    /// Estimated resident bytes of block payloads, for the log line.
    pub fn resident_payload_bytes(&self) -> usize {
        let mut total = 0;
        for lod in Lod::ALL {
            let per = (CHUNK_VOLUME >> (3 * lod.bits())) * 3; // u16 block + u8 flag
            total += self.cache.len(lod) * per;
        }
        total
    }
}

/// Wall-clock to tick conversion with a fractional accumulator.
pub struct TickTimer {
    last: Instant,
    stored: f32,
}

impl TickTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            stored: 0.0,
        }
    }

    /// Whole ticks due since the last call; the fraction carries over.
    pub fn ticks_expected(&mut self) -> u32 {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last).as_secs_f32();
        self.last = now;
        let due = elapsed * TICKS_PER_SECOND + self.stored;
        self.stored = due.fract();
        due.floor() as u32
    }
}

impl Default for TickTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// The assembled engine: shared world, the active entity area, the player,
/// and the renderer. Owns the data thread.
pub struct Engine {
    pub world: Arc<World>,
    pub area: ActiveArea,
    pub registry: PrototypeRegistry,
    player: EntityId,
    renderer: Box<dyn Renderer>,
    data_thread: Option<JoinHandle<()>>,
    timer: TickTimer,
    tick_count: u64,
}

impl Engine {
    /// Build the world, spawn the player at the configured position, and
    /// publish the initial viewer position.
    pub fn new(
        config: &EngineConfig,
        generator: Box<dyn TerrainSource>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, WorldError> {
        let world = Arc::new(World::new(generator));
        let spawn = config.spawn_pos();
        let origin = spawn.chunk().base();
        let mut area = ActiveArea::new(origin, ACTIVE_AREA_SIZE);
        let registry = PrototypeRegistry::default();
        let local = AreaPos::new(
            (spawn.x - origin.x) as f32 + 0.5,
            (spawn.y - origin.y) as f32 + 0.5,
            (spawn.z - origin.z) as f32 + 0.5,
        );
        let player = area.spawn(&registry, "player", local)?;
        world.publish_viewer(spawn.chunk());
        info!(
            "engine up: seed {}, spawn {:?}, area origin {:?}",
            config.world_seed, spawn, origin
        );
        Ok(Self {
            world,
            area,
            registry,
            player,
            renderer,
            data_thread: None,
            timer: TickTimer::new(),
            tick_count: 0,
        })
    }

    pub fn player(&self) -> EntityId {
        self.player
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Start the background data thread.
    pub fn start(&mut self) -> Result<(), WorldError> {
        if self.data_thread.is_some() {
            return Ok(());
        }
        let world = self.world.clone();
        let handle = std::thread::Builder::new()
            .name("world-data".into())
            .spawn(move || {
                debug!("data thread up");
                while !world.shutting_down() {
                    world.tick_data();
                    std::thread::sleep(DATA_THREAD_NAP);
                }
                debug!("data thread down");
            })
            .map_err(|_| WorldError::QueueDisconnected)?;
        self.data_thread = Some(handle);
        Ok(())
    }

    /// Advance the simulation by the given number of whole ticks, each
    /// split into physics substeps near the target resolution.
    pub fn tick(&mut self, steps: u32) {
        let (substeps, sub_dt) = substeps_for(SECONDS_PER_TICK);
        for _ in 0..steps {
            self.tick_count += 1;
            for _ in 0..substeps {
                let origin = self.area.origin();
                for id in self.area.ids() {
                    let mut reader = BlockReader::new(&self.world.cache);
                    if let Some(entity) = self.area.get_mut(id) {
                        tick_physics(entity, origin, sub_dt, &mut reader);
                    }
                    self.area.update_bounds(id);
                }
            }
            self.area.warp_space(self.player);
            if let Some(viewer) = self.area.global_pos(self.player) {
                self.world.publish_viewer(viewer.chunk());
            }
        }
    }

    /// Advance by however many ticks wall-clock time says are due.
    pub fn tick_realtime(&mut self) -> u32 {
        let due = self.timer.ticks_expected();
        self.tick(due);
        due
    }

    /// Draw the scene around the player, uploading any fresh meshes.
    pub fn render(&mut self) {
        let viewer = match self.area.global_pos(self.player) {
            Some(pos) => pos,
            None => self.area.origin(),
        };
        render_area(&self.world.cache, viewer, self.renderer.as_mut());
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }

    /// Set the shutdown flag and join the data thread; it exits within one
    /// pass.
    pub fn shutdown(&mut self) {
        self.world.request_shutdown();
        if let Some(handle) = self.data_thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
