//! Error types for terrain access and configuration.
//!
//! Search failures are not errors: the planner reports them as an empty path and the
//! navigator retries on the next re-plan trigger.

use bevy::prelude::*;
use thiserror::Error;

/// Failure reported by a raw terrain query.
///
/// The derived predicates in [`crate::terrain::TerrainQuery`] swallow these and treat the
/// cell as blocked, so they never escape a tick.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerrainError {
    #[error("cell {0} is outside the loaded region")]
    Unloaded(IVec3),

    #[error("terrain query failed at {cell}: {message}")]
    Query { cell: IVec3, message: String },
}

/// Failure while loading or validating a [`crate::config::NavConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse navigator config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}
