use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::WorldError;
use crate::world::coords::GlobalPos;

/// Engine configuration, loadable from `timberline.toml`. Nothing in here
/// changes core semantics; it picks the seed, where the player appears and
/// how long a headless run lasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub world_seed: u64,
    /// Spawn position as `[x, y, z]` blocks; defaults to a column near the
    /// origin.
    pub spawn: Option<[i64; 3]>,
    /// Ticks a headless run simulates before exiting.
    pub run_ticks: u64,
    /// Whether the data thread streams chunks around the viewer.
    pub autoload: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            world_seed: 12345,
            spawn: None,
            run_ticks: 600,
            autoload: true,
        }
    }
}

impl EngineConfig {
    pub const DEFAULT_SPAWN: [i64; 3] = [0, 0, 50];

    pub fn load(path: &Path) -> Result<Self, WorldError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WorldError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| WorldError::Config(e.to_string()))
    }

    /// Load the config file when present, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, WorldError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn spawn_pos(&self) -> GlobalPos {
        let [x, y, z] = self.spawn.unwrap_or(Self::DEFAULT_SPAWN);
        GlobalPos::new(x, y, z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: EngineConfig = toml::from_str("world_seed = 7").unwrap();
        assert_eq!(config.world_seed, 7);
        assert_eq!(config.spawn, None);
        assert!(config.autoload);
        assert_eq!(config.spawn_pos(), GlobalPos::new(0, 0, 50));
    }

    #[test]
    fn spawn_overrides_parse() {
        let config: EngineConfig = toml::from_str("spawn = [10, -4, 33]").unwrap();
        assert_eq!(config.spawn_pos(), GlobalPos::new(10, -4, 33));
    }
}
