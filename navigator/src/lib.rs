//! Autonomous voxel-world navigator.
//!
//! Plans walking routes over a voxel grid and turns them into per-tick movement keys and a
//! smoothly animated facing. Hosts implement [`TerrainQuery`], feed an [`AgentState`] snapshot to
//! [`Navigator::tick`] once per simulation step and apply the returned [`MovementIntents`].

pub mod agent;
pub mod config;
pub mod error;
pub mod jump;
pub mod movement;
pub mod navigator;
pub mod orientation;
pub mod planner;
pub mod route;
pub mod steering;
pub mod terrain;
pub mod tracker;
pub mod voxel;

pub use agent::{AgentState, Facing, MovementIntents};
pub use config::{NavConfig, RotationMode};
pub use error::{ConfigError, TerrainError};
pub use jump::JumpPhase;
pub use navigator::{NavFrame, Navigator, NavigatorBuilder, VisualizationSink};
pub use orientation::RotationLease;
pub use planner::{find_path, EdgeBlacklist, SearchCancel};
pub use terrain::{CollisionExtents, TerrainQuery};
pub use voxel::{Block, VoxelWorld};
