use glam::Vec3;

use crate::entity::{Entity, MoveFlags};
use crate::world::block::Block;
use crate::world::cache::ChunkCache;
use crate::world::chunk_or_approx::ChunkOrApprox;
use crate::world::coords::{ChunkPos, GlobalPos};

/// Finest physics step; ticks are split into substeps no coarser than this.
pub const TARGET_RESOLUTION: f32 = 1.0 / 180.0;
/// Gap left between an entity and the block face it collided with.
pub const BOUNCE_DISTANCE: f32 = 0.0005;
/// Accelerating entities are granted at least this much speed.
pub const MIN_VELOCITY: f32 = 0.05;

pub const GRAVITY: f32 = 40.0;

pub const AIR_DRAG: f32 = 0.985;
pub const GROUND_DRAG: f32 = 0.90;
pub const LIQUID_DRAG: f32 = 0.87;

pub const CROUCH_COEFFICIENT: f32 = 0.3;
pub const STRAFE_COEFFICIENT: f32 = 0.7;
pub const BACKUP_COEFFICIENT: f32 = 0.4;

/// Split a tick's delta into substeps near `TARGET_RESOLUTION`.
pub fn substeps_for(dt: f32) -> (u32, f32) {
    let substeps = ((dt / TARGET_RESOLUTION).round() as u32).max(1);
    (substeps, dt / substeps as f32)
}

/// Cached block lookup for swept-volume rasterization. Memoizes the last
/// chunk pointer so runs of queries inside one chunk skip the cache probe.
/// Call `refresh` whenever block data may have changed under it.
pub struct BlockReader<'a> {
    cache: &'a ChunkCache,
    last_pos: Option<ChunkPos>,
    last: ChunkOrApprox,
}

impl<'a> BlockReader<'a> {
    pub fn new(cache: &'a ChunkCache) -> Self {
        Self {
            cache,
            last_pos: None,
            last: ChunkOrApprox::NotLoaded,
        }
    }

    /// Drop the memoized chunk pointer.
    pub fn refresh(&mut self) {
        self.last_pos = None;
        self.last = ChunkOrApprox::NotLoaded;
    }

    pub fn block_at(&mut self, pos: GlobalPos) -> Block {
        let chunk = pos.chunk();
        if self.last_pos != Some(chunk) {
            self.last = self.cache.get_best_data(chunk);
            self.last_pos = Some(chunk);
        }
        self.last.get_block(pos.chunk_index())
    }

    pub fn is_solid_at(&mut self, pos: GlobalPos) -> bool {
        self.block_at(pos).is_solid()
    }
}

/// Unit facing vector for a yaw/pitch pair; yaw 0 faces north (+y), z up.
pub fn facing(yaw: f32, pitch: f32) -> Vec3 {
    Vec3::new(
        yaw.sin() * pitch.cos(),
        yaw.cos() * pitch.cos(),
        pitch.sin(),
    )
}

fn integer_extent(origin: GlobalPos, bbox_min: Vec3, bbox_max: Vec3) -> (GlobalPos, GlobalPos) {
    (
        GlobalPos::new(
            origin.x + bbox_min.x.floor() as i64,
            origin.y + bbox_min.y.floor() as i64,
            origin.z + bbox_min.z.floor() as i64,
        ),
        GlobalPos::new(
            origin.x + bbox_max.x.floor() as i64,
            origin.y + bbox_max.y.floor() as i64,
            origin.z + bbox_max.z.floor() as i64,
        ),
    )
}

/// Recompute the medium flags from the blocks the entity overlaps.
fn check_move_flags(e: &mut Entity, origin: GlobalPos, reader: &mut BlockReader) {
    reader.refresh();
    let (min, max) = integer_extent(origin, e.bbox.min, e.bbox.max);

    e.move_flags.remove(MoveFlags::ON_GROUND);
    if e.vel.z <= 0.0 {
        let below = origin.z + (e.bbox.min.z - BOUNCE_DISTANCE * 2.0).floor() as i64;
        'ground: for x in min.x..=max.x {
            for y in min.y..=max.y {
                if reader.is_solid_at(GlobalPos::new(x, y, below)) {
                    e.move_flags.insert(MoveFlags::ON_GROUND);
                    break 'ground;
                }
            }
        }
    }

    e.move_flags.remove(MoveFlags::IN_LIQUID);
    'liquid: for x in min.x..=max.x {
        for y in min.y..=max.y {
            for z in min.z..=max.z {
                if reader.block_at(GlobalPos::new(x, y, z)).is_liquid() {
                    e.move_flags.insert(MoveFlags::IN_LIQUID);
                    break 'liquid;
                }
            }
        }
    }

    // IN_VOID marks entities standing in unloaded space; physics freezes
    // gravity for them so they don't fall through terrain that merely hasn't
    // arrived yet.
    let center = GlobalPos::from_area(origin, e.pos);
    if reader.block_at(center).is_void() {
        e.move_flags.insert(MoveFlags::IN_VOID);
    } else {
        e.move_flags.remove(MoveFlags::IN_VOID);
    }
    reader.refresh();
}

/// Fold control inputs into the impulse. Lack of input damps velocity
/// because impulses below the minimum snap get eaten by drag.
fn integrate_control_inputs(e: &mut Entity) {
    let mut base = e.walk;
    if e.in_liquid() {
        base = e.swim;
    } else {
        if !e.on_ground() {
            base = e.fly;
        }
        if e.crouching() {
            base *= CROUCH_COEFFICIENT;
        }
    }
    let forward = facing(e.yaw, 0.0);
    let right = facing(e.yaw + std::f32::consts::FRAC_PI_2, 0.0);
    let backup = if e.control.y < 0.0 { BACKUP_COEFFICIENT } else { 1.0 };
    let mut v = Vec3::ZERO;
    v += forward * e.control.y * backup;
    v += right * e.control.x * STRAFE_COEFFICIENT;
    v += Vec3::Z * e.control.z;
    let v = v.normalize_or_zero();
    e.impulse += v * base;
}

fn sweep_axis_x(e: &mut Entity, origin: GlobalPos, min: &mut GlobalPos, max: &mut GlobalPos, increment: &mut Vec3, reader: &mut BlockReader) {
    if increment.x > 0.0 {
        let next = origin.x + (e.bbox.max.x + increment.x).floor() as i64;
        if next != max.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    if reader.is_solid_at(GlobalPos::new(next, y, z)) {
                        e.vel.x = 0.0;
                        increment.x = 0.0;
                        e.pos.x = (next - origin.x) as f32 - (BOUNCE_DISTANCE + e.size.x / 2.0);
                        return;
                    }
                }
            }
            max.x = next;
        }
    } else {
        let next = origin.x + (e.bbox.min.x + increment.x).floor() as i64;
        if next != min.x {
            for y in min.y..=max.y {
                for z in min.z..=max.z {
                    if reader.is_solid_at(GlobalPos::new(next, y, z)) {
                        e.vel.x = 0.0;
                        increment.x = 0.0;
                        e.pos.x = (next - origin.x + 1) as f32 + BOUNCE_DISTANCE + e.size.x / 2.0;
                        return;
                    }
                }
            }
            min.x = next;
        }
    }
    e.pos.x += increment.x;
}

fn sweep_axis_y(e: &mut Entity, origin: GlobalPos, min: &mut GlobalPos, max: &mut GlobalPos, increment: &mut Vec3, reader: &mut BlockReader) {
    if increment.y > 0.0 {
        let next = origin.y + (e.bbox.max.y + increment.y).floor() as i64;
        if next != max.y {
            for x in min.x..=max.x {
                for z in min.z..=max.z {
                    if reader.is_solid_at(GlobalPos::new(x, next, z)) {
                        e.vel.y = 0.0;
                        increment.y = 0.0;
                        e.pos.y = (next - origin.y) as f32 - (BOUNCE_DISTANCE + e.size.y / 2.0);
                        return;
                    }
                }
            }
            max.y = next;
        }
    } else {
        let next = origin.y + (e.bbox.min.y + increment.y).floor() as i64;
        if next != min.y {
            for x in min.x..=max.x {
                for z in min.z..=max.z {
                    if reader.is_solid_at(GlobalPos::new(x, next, z)) {
                        e.vel.y = 0.0;
                        increment.y = 0.0;
                        e.pos.y = (next - origin.y + 1) as f32 + BOUNCE_DISTANCE + e.size.y / 2.0;
                        return;
                    }
                }
            }
            min.y = next;
        }
    }
    e.pos.y += increment.y;
}

fn sweep_axis_z(e: &mut Entity, origin: GlobalPos, min: &mut GlobalPos, max: &mut GlobalPos, increment: &mut Vec3, reader: &mut BlockReader) {
    if increment.z > 0.0 {
        let next = origin.z + (e.bbox.max.z + increment.z).floor() as i64;
        if next != max.z {
            for x in min.x..=max.x {
                for y in min.y..=max.y {
                    if reader.is_solid_at(GlobalPos::new(x, y, next)) {
                        e.vel.z = 0.0;
                        increment.z = 0.0;
                        e.pos.z = (next - origin.z) as f32 - (BOUNCE_DISTANCE + e.size.z / 2.0);
                        return;
                    }
                }
            }
            max.z = next;
        }
    } else {
        let next = origin.z + (e.bbox.min.z + increment.z).floor() as i64;
        if next != min.z {
            for x in min.x..=max.x {
                for y in min.y..=max.y {
                    if reader.is_solid_at(GlobalPos::new(x, y, next)) {
                        e.vel.z = 0.0;
                        increment.z = 0.0;
                        e.pos.z = (next - origin.z + 1) as f32 + BOUNCE_DISTANCE + e.size.z / 2.0;
                        return;
                    }
                }
            }
            min.z = next;
        }
    }
    e.pos.z += increment.z;
}

/// Advance position while respecting solid blocks, one axis at a time. The
/// horizontal axis with the larger increment moves first; z always moves
/// last so steps and landings resolve predictably.
fn update_position_collide_blocks(e: &mut Entity, origin: GlobalPos, sub_dt: f32, reader: &mut BlockReader) {
    let (mut min, mut max) = integer_extent(origin, e.bbox.min, e.bbox.max);
    let mut increment = e.vel * sub_dt;
    reader.refresh();
    if increment.y.abs() > increment.x.abs() {
        sweep_axis_y(e, origin, &mut min, &mut max, &mut increment, reader);
        sweep_axis_x(e, origin, &mut min, &mut max, &mut increment, reader);
    } else {
        sweep_axis_x(e, origin, &mut min, &mut max, &mut increment, reader);
        sweep_axis_y(e, origin, &mut min, &mut max, &mut increment, reader);
    }
    sweep_axis_z(e, origin, &mut min, &mut max, &mut increment, reader);
    reader.refresh();
}

/// One physics substep for one entity: flags, control, kinetics, collision.
pub fn tick_physics(e: &mut Entity, origin: GlobalPos, sub_dt: f32, reader: &mut BlockReader) {
    check_move_flags(e, origin, reader);
    integrate_control_inputs(e);

    let mut acceleration = e.impulse / e.mass;
    if !e.move_flags.contains(MoveFlags::IN_VOID) {
        if e.in_liquid() {
            acceleration.z -= GRAVITY * (1.0 - e.buoyancy);
        } else {
            acceleration.z -= GRAVITY;
        }
    }

    e.vel += acceleration * sub_dt;

    let drag = if e.in_liquid() {
        LIQUID_DRAG
    } else if e.on_ground() {
        GROUND_DRAG
    } else {
        AIR_DRAG
    };
    e.vel *= drag;

    // Accelerating entities get at least the minimum velocity; otherwise
    // drag would keep a standing start glued in place.
    if e.vel.x.abs() < MIN_VELOCITY && acceleration.x != 0.0 {
        e.vel.x += MIN_VELOCITY * acceleration.x.signum();
    }
    if e.vel.y.abs() < MIN_VELOCITY && acceleration.y != 0.0 {
        e.vel.y += MIN_VELOCITY * acceleration.y.signum();
    }
    if e.vel.z.abs() < MIN_VELOCITY && acceleration.z != 0.0 {
        e.vel.z += MIN_VELOCITY * acceleration.z.signum();
    }

    update_position_collide_blocks(e, origin, sub_dt, reader);
    e.compute_bb();
    e.impulse = Vec3::ZERO;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::PrototypeRegistry;
    use crate::world::chunk::{Chunk, CHUNK_SIZE};
    use crate::world::coords::{AreaPos, ChunkIndex};
    use crossbeam_channel::unbounded;
    use std::sync::Arc;

    fn detached_cache() -> ChunkCache {
        // Queue receivers are dropped; the cache's enqueue attempts become
        // no-ops, which is fine for physics-only fixtures.
        let (reload_tx, _) = unbounded();
        let (recompile_tx, _) = unbounded();
        ChunkCache::new(reload_tx, recompile_tx)
    }

    /// Cache with a stone slab at z <= 4 across a 3x3 chunk patch at z=0.
    fn slab_cache() -> ChunkCache {
        let cache = detached_cache();
        for cx in -1..=1 {
            for cy in -1..=1 {
                let pos = crate::world::coords::ChunkPos::new(cx, cy, 0);
                let chunk = Arc::new(Chunk::new(pos));
                {
                    let mut payload = chunk.payload.write();
                    for x in 0..CHUNK_SIZE {
                        for y in 0..CHUNK_SIZE {
                            for z in 0..CHUNK_SIZE {
                                let block = if z <= 4 { Block::STONE } else { Block::AIR };
                                payload.put_block(ChunkIndex::new(x, y, z), block);
                            }
                        }
                    }
                }
                cache.insert(crate::world::chunk_or_approx::ChunkOrApprox::Full(chunk), false);
            }
        }
        cache
    }

    fn player_at(z: f32) -> Entity {
        let registry = PrototypeRegistry::default();
        registry
            .get("player")
            .unwrap()
            .instantiate(AreaPos::new(8.0, 8.0, z))
    }

    #[test]
    fn substeps_track_the_target_resolution() {
        let (n, sub) = substeps_for(1.0 / 60.0);
        assert_eq!(n, 3);
        assert!((sub - 1.0 / 180.0).abs() < 1e-6);
        let (n, _) = substeps_for(1.0 / 240.0);
        assert_eq!(n, 1);
    }

    #[test]
    fn reader_memoizes_within_a_chunk() {
        let cache = slab_cache();
        let mut reader = BlockReader::new(&cache);
        assert_eq!(reader.block_at(GlobalPos::new(1, 1, 4)), Block::STONE);
        assert_eq!(reader.block_at(GlobalPos::new(2, 1, 5)), Block::AIR);
        // Outside the slab patch the reader sees unloaded space.
        assert_eq!(reader.block_at(GlobalPos::new(100, 0, 4)), Block::VOID);
        reader.refresh();
        assert_eq!(reader.block_at(GlobalPos::new(1, 1, 4)), Block::STONE);
    }

    #[test]
    fn falling_entity_lands_on_the_slab() {
        let cache = slab_cache();
        let mut reader = BlockReader::new(&cache);
        let mut e = player_at(10.0);
        let (_, sub_dt) = substeps_for(1.0 / 60.0);
        for _ in 0..600 {
            tick_physics(&mut e, GlobalPos::ZERO, sub_dt, &mut reader);
        }
        assert!(e.on_ground(), "entity should come to rest on the slab");
        // Feet sit just above the top of the z=4 stone layer.
        let feet = e.pos.z - e.size.z / 2.0;
        assert!((feet - 5.0).abs() < 0.1, "feet at {feet}");
        assert!(e.vel.z.abs() < MIN_VELOCITY + 1e-3);
    }

    #[test]
    fn walls_stop_horizontal_motion() {
        let cache = slab_cache();
        // Build a wall at x = 12 above the slab.
        let wall_chunk = cache.get_best_data(crate::world::coords::ChunkPos::new(0, 0, 0));
        if let crate::world::chunk_or_approx::ChunkOrApprox::Full(c) = &wall_chunk {
            let mut payload = c.payload.write();
            for y in 0..CHUNK_SIZE {
                for z in 5..CHUNK_SIZE {
                    payload.put_block(ChunkIndex::new(12, y, z), Block::STONE);
                }
            }
        }
        let mut reader = BlockReader::new(&cache);
        let mut e = player_at(6.0);
        e.control.x = 1.0;
        e.yaw = 0.0;
        let (_, sub_dt) = substeps_for(1.0 / 60.0);
        for _ in 0..600 {
            tick_physics(&mut e, GlobalPos::ZERO, sub_dt, &mut reader);
        }
        // Stopped just short of the wall: the box's east face at the gap.
        assert!(e.pos.x + e.size.x / 2.0 <= 12.0 + 1e-3, "x = {}", e.pos.x);
        assert!(e.pos.x > 10.0);
        assert_eq!(e.vel.x, 0.0);
    }

    #[test]
    fn swimming_entities_feel_buoyancy_and_liquid_drag() {
        let cache = detached_cache();
        let pos = crate::world::coords::ChunkPos::new(0, 0, 0);
        let chunk = Arc::new(Chunk::new(pos));
        {
            let mut payload = chunk.payload.write();
            for x in 0..CHUNK_SIZE {
                for y in 0..CHUNK_SIZE {
                    for z in 0..CHUNK_SIZE {
                        payload.put_block(ChunkIndex::new(x, y, z), Block::WATER);
                    }
                }
            }
        }
        cache.insert(crate::world::chunk_or_approx::ChunkOrApprox::Full(chunk), false);
        let mut reader = BlockReader::new(&cache);
        let mut e = player_at(8.0);
        let (_, sub_dt) = substeps_for(1.0 / 60.0);
        tick_physics(&mut e, GlobalPos::ZERO, sub_dt, &mut reader);
        assert!(e.in_liquid());
        // Gravity is scaled by (1 - buoyancy): a 0.9-buoyant player sinks
        // far slower than free fall.
        assert!(e.vel.z.abs() < GRAVITY * sub_dt * 0.5);
    }

    #[test]
    fn entities_in_unloaded_space_do_not_fall() {
        let cache = detached_cache();
        let mut reader = BlockReader::new(&cache);
        let mut e = player_at(10.0);
        let (_, sub_dt) = substeps_for(1.0 / 60.0);
        tick_physics(&mut e, GlobalPos::ZERO, sub_dt, &mut reader);
        assert!(e.move_flags.contains(MoveFlags::IN_VOID));
        assert_eq!(e.vel.z, 0.0);
    }
}
