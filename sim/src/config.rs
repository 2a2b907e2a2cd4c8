//! Host configuration.
//!
//! Loaded from the RON file named by `NAVSIM_CONFIG`; without it the built-in scenario runs.
//! Every field is optional in the file and falls back to its default.

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use navigator::{ConfigError, NavConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_ENV: &str = "NAVSIM_CONFIG";

/// Default world seed. Same seed, same terrain.
pub const WORLD_SEED: u32 = 42;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
    #[error(transparent)]
    Nav(#[from] ConfigError),
    #[error("agent {name}: {message}")]
    Scenario { name: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    pub seed: u32,
    /// Terrain spans `-half_extent..=half_extent` on X and Z.
    pub half_extent: i32,
    /// Mean height of the ground surface.
    pub base_height: i32,
    /// Peak deviation from the base height, in blocks.
    pub height_amplitude: f32,
    /// Noise frequency of the rolling hills.
    pub hill_scale: f64,
    pub ponds: bool,
    pub pillars: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: WORLD_SEED,
            half_extent: 64,
            base_height: 64,
            height_amplitude: 5.0,
            hill_scale: 0.035,
            ponds: true,
            pillars: true,
        }
    }
}

/// One navigating agent: spawn column and goal column as `[x, z]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpawn {
    pub name: String,
    pub start: [i32; 2],
    pub goal: [i32; 2],
}

impl AgentSpawn {
    pub fn new(name: impl Into<String>, start: [i32; 2], goal: [i32; 2]) -> Self {
        Self {
            name: name.into(),
            start,
            goal,
        }
    }
}

#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub nav: NavConfig,
    pub world: WorldConfig,
    pub scenario: Vec<AgentSpawn>,
    /// Run ends unsuccessfully after this many ticks.
    pub max_ticks: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nav: NavConfig::default(),
            world: WorldConfig::default(),
            scenario: vec![
                AgentSpawn::new("scout", [-50, -48], [52, 45]),
                AgentSpawn::new("runner", [10, 12], [-30, 20]),
            ],
            max_ticks: 6_000,
        }
    }
}

impl SimConfig {
    /// Config from `NAVSIM_CONFIG`, or the defaults when the variable is unset.
    pub fn load() -> Result<Self, SimError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load_file(Path::new(&path)),
            None => {
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn load_file(path: &Path) -> Result<Self, SimError> {
        let text = std::fs::read_to_string(path).map_err(|source| SimError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: SimConfig = ron::from_str(&text).map_err(|source| SimError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SimError> {
        self.nav.validate()?;
        let extent = self.world.half_extent;
        for spawn in &self.scenario {
            for (label, [x, z]) in [("start", spawn.start), ("goal", spawn.goal)] {
                if x.abs() > extent || z.abs() > extent {
                    return Err(SimError::Scenario {
                        name: spawn.name.clone(),
                        message: format!("{label} [{x}, {z}] lies outside the +/-{extent} world"),
                    });
                }
            }
        }
        Ok(())
    }
}
