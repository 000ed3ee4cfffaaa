use std::path::Path;

use anyhow::{Context, Result};
use log::{info, LevelFilter};
use simple_logger::SimpleLogger;

use timberline::config::EngineConfig;
use timberline::engine::Engine;
use timberline::render::HeadlessRenderer;
use timberline::world::NoiseTerrain;

/// `timberline [SEED] [X Y Z]` — run the world core headless: stream and
/// mesh terrain around a spawn point while the simulation ticks.
fn parse_args(config: &mut EngineConfig) -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Some(seed) = args.first() {
        config.world_seed = seed
            .parse()
            .with_context(|| format!("invalid seed '{seed}'"))?;
    }
    if args.len() >= 4 {
        let x = args[1].parse().context("invalid spawn x")?;
        let y = args[2].parse().context("invalid spawn y")?;
        let z = args[3].parse().context("invalid spawn z")?;
        config.spawn = Some([x, y, z]);
    }
    Ok(())
}

fn main() -> Result<()> {
    SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .context("failed to initialize logger")?;

    let mut config = EngineConfig::load_or_default(Path::new("timberline.toml"))
        .context("failed to load timberline.toml")?;
    parse_args(&mut config)?;

    info!("timberline {} starting", timberline::VERSION);
    let generator = Box::new(NoiseTerrain::new(config.world_seed));
    let renderer = Box::new(HeadlessRenderer::new());
    let mut engine = Engine::new(&config, generator, renderer)?;
    if config.autoload {
        engine.start()?;
    }

    let mut rendered_frames: u64 = 0;
    while engine.tick_count() < config.run_ticks {
        let due = engine.tick_realtime();
        if due == 0 {
            std::thread::sleep(std::time::Duration::from_millis(2));
            continue;
        }
        engine.render();
        rendered_frames += 1;
    }
    engine.shutdown();

    let world = engine.world.clone();
    info!(
        "ran {} ticks over {} frames; resident payloads ~{} KiB",
        engine.tick_count(),
        rendered_frames,
        world.resident_payload_bytes() / 1024
    );
    Ok(())
}
