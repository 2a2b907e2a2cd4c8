//! Navigator tuning.
//!
//! Every threshold used by the navigator lives here as a named default and is exposed through
//! [`NavConfig`]. The defaults are calibrated against a 20 Hz walking body (1 unit = 1 cell); hosts
//! with a different movement model should tune them rather than treat them as physics.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// =============================================================================
// TICK
// =============================================================================

/// Host simulation rate the tick-based thresholds assume.
pub const TICK_RATE_HZ: f32 = 20.0;

// =============================================================================
// PLANNER
// =============================================================================

/// Hard cap on A* node expansions per search.
pub const MAX_ITERATIONS: usize = 40_000;

/// Manhattan range limit of a single search.
pub const MAX_RANGE: i32 = 170;

/// Deepest drop the planner will propose.
pub const MAX_DROP_DOWN: i32 = 4;

/// Surface delta walkable without jumping.
pub const STEP_NO_JUMP_MAX: f32 = 0.62;

/// Largest surface delta a jump can clear.
pub const STEP_JUMP_MAX: f32 = 1.05;

/// Largest surface drop treated as a controlled drop edge.
pub const DROP_MAX: f32 = 5.0;

// =============================================================================
// ROUTE
// =============================================================================

/// Distance of each intermediate macro goal.
pub const MACRO_STEP: i32 = 100;

/// A macro goal closer than this is re-derived.
pub const MACRO_RETAIN_MIN_DIST: i32 = 12;

/// Ring radius for snapping a projected macro goal onto standable ground.
pub const MACRO_SNAP_SEARCH_RADIUS: i32 = 10;

/// Vertical window used when snapping the agent's feet cell or a macro goal.
pub const START_SNAP_MAX_VERTICAL: i32 = 2;

/// Sample spacing of the straight-line shortcut test.
pub const DIRECT_SAMPLE_STEP: f32 = 0.45;

pub const CHECKPOINT_EVERY_N_NODES: usize = 40;
pub const MIN_NODES_BETWEEN_CHECKPOINTS: usize = 12;
pub const MAX_CHECKPOINTS_CAP: usize = 10;

// =============================================================================
// TRACKER
// =============================================================================

pub const PATH_INDEX_FORWARD_WINDOW: usize = 10;

/// Horizontal distance under which the current node counts as passed.
pub const FORGIVING_ADVANCE_DIST: f32 = 0.95;

/// Fraction of the prev->next segment after which the current node counts as passed.
pub const PASS_SEGMENT_FRACTION: f32 = 0.55;

/// Feet must be within this of the destination surface before a step-up node is passed.
pub const STEP_UP_REACHED_EPS: f32 = 0.05;

pub const REPATH_EVERY_TICKS: u32 = 10;
pub const OFFPATH_REPATH_COOLDOWN_TICKS: u32 = 35;
pub const OFFPATH_MAX_DIST: f32 = 4.5;
pub const OFFPATH_LOOKAHEAD_NODES: usize = 8;

// =============================================================================
// STEERING
// =============================================================================

pub const LOS_LOOKAHEAD_MAX_NODES: usize = 18;
pub const LOS_RETARGET_COOLDOWN_TICKS: u32 = 5;
pub const LOS_FEET_HEIGHT: f32 = 0.15;
pub const LOS_BODY_HEIGHT: f32 = 0.95;
pub const LOS_EYE_HEIGHT: f32 = 1.62;
pub const CORRIDOR_MAX_DIST_TO_PATH: f32 = 0.60;
pub const CORRIDOR_SAMPLE_STEP: f32 = 0.45;

// =============================================================================
// JUMP
// =============================================================================

pub const JUMP_LOOKAHEAD_EDGES: usize = 5;
pub const JUMP_HOLD_TICKS: u32 = 3;
pub const JUMP_COOLDOWN_TICKS: u32 = 10;
pub const JUMP_GRACE_TICKS_ON_START: u32 = 10;
pub const STEPUP_FAIL_MAX_ATTEMPTS: u32 = 3;
pub const STEPUP_ATTEMPT_TIMEOUT_TICKS: u32 = 26;

// =============================================================================
// ARRIVAL
// =============================================================================

pub const CHECKPOINT_REACH_DIST: f32 = 1.15;
pub const CHECKPOINT_FEET_Y_EPS: f32 = 0.45;
pub const STOP_GOAL_DIST: f32 = 0.95;
pub const STOP_GOAL_FEET_Y_EPS: f32 = 0.35;

// =============================================================================
// CONFIG SECTIONS
// =============================================================================

/// Complete navigator configuration. Immutable once handed to a navigator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    pub tick_rate_hz: f32,
    pub planner: PlannerConfig,
    pub route: RouteConfig,
    pub tracker: TrackerConfig,
    pub steering: SteeringConfig,
    pub jump: JumpConfig,
    pub rotation: RotationConfig,
    pub movement: MovementConfig,
    pub arrival: ArrivalConfig,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: TICK_RATE_HZ,
            planner: PlannerConfig::default(),
            route: RouteConfig::default(),
            tracker: TrackerConfig::default(),
            steering: SteeringConfig::default(),
            jump: JumpConfig::default(),
            rotation: RotationConfig::default(),
            movement: MovementConfig::default(),
            arrival: ArrivalConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub max_iterations: usize,
    pub max_range: i32,
    pub allow_diagonals: bool,
    pub allow_step_up: bool,
    pub allow_drop_down: bool,
    pub max_drop_down: i32,
    pub step_no_jump_max: f32,
    pub step_jump_max: f32,
    pub drop_max: f32,
    pub wall_penalty: f32,
    pub step_up_cost: f32,
    pub step_up_cost_diagonal: f32,
    pub drop_cost_per_level: f32,
    pub vertical_heuristic_weight: f32,
    pub escape_search_limit: usize,
    pub escape_search_radius: i32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            max_range: MAX_RANGE,
            allow_diagonals: true,
            allow_step_up: true,
            allow_drop_down: true,
            max_drop_down: MAX_DROP_DOWN,
            step_no_jump_max: STEP_NO_JUMP_MAX,
            step_jump_max: STEP_JUMP_MAX,
            drop_max: DROP_MAX,
            wall_penalty: 0.20,
            step_up_cost: 1.5,
            step_up_cost_diagonal: 1.9,
            drop_cost_per_level: 0.55,
            vertical_heuristic_weight: 1.25,
            escape_search_limit: 200,
            escape_search_radius: 9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    pub macro_step: i32,
    pub macro_retain_min_dist: i32,
    pub macro_snap_radius: i32,
    pub snap_max_vertical: i32,
    pub direct_path: bool,
    pub direct_sample_step: f32,
    pub checkpoint_every_n_nodes: usize,
    pub min_nodes_between_checkpoints: usize,
    pub max_checkpoints: usize,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            macro_step: MACRO_STEP,
            macro_retain_min_dist: MACRO_RETAIN_MIN_DIST,
            macro_snap_radius: MACRO_SNAP_SEARCH_RADIUS,
            snap_max_vertical: START_SNAP_MAX_VERTICAL,
            direct_path: true,
            direct_sample_step: DIRECT_SAMPLE_STEP,
            checkpoint_every_n_nodes: CHECKPOINT_EVERY_N_NODES,
            min_nodes_between_checkpoints: MIN_NODES_BETWEEN_CHECKPOINTS,
            max_checkpoints: MAX_CHECKPOINTS_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub forward_window: usize,
    pub forgiving_advance_dist: f32,
    pub pass_segment_fraction: f32,
    pub step_up_reached_eps: f32,
    pub repath_every_ticks: u32,
    pub offpath_cooldown_ticks: u32,
    pub offpath_max_dist: f32,
    pub offpath_lookahead_nodes: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            forward_window: PATH_INDEX_FORWARD_WINDOW,
            forgiving_advance_dist: FORGIVING_ADVANCE_DIST,
            pass_segment_fraction: PASS_SEGMENT_FRACTION,
            step_up_reached_eps: STEP_UP_REACHED_EPS,
            repath_every_ticks: REPATH_EVERY_TICKS,
            offpath_cooldown_ticks: OFFPATH_REPATH_COOLDOWN_TICKS,
            offpath_max_dist: OFFPATH_MAX_DIST,
            offpath_lookahead_nodes: OFFPATH_LOOKAHEAD_NODES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SteeringConfig {
    pub lookahead_nodes: usize,
    pub retarget_cooldown_ticks: u32,
    pub feet_height: f32,
    pub body_height: f32,
    pub eye_height: f32,
    pub corridor_max_dist: f32,
    pub corridor_sample_step: f32,
}

impl Default for SteeringConfig {
    fn default() -> Self {
        Self {
            lookahead_nodes: LOS_LOOKAHEAD_MAX_NODES,
            retarget_cooldown_ticks: LOS_RETARGET_COOLDOWN_TICKS,
            feet_height: LOS_FEET_HEIGHT,
            body_height: LOS_BODY_HEIGHT,
            eye_height: LOS_EYE_HEIGHT,
            corridor_max_dist: CORRIDOR_MAX_DIST_TO_PATH,
            corridor_sample_step: CORRIDOR_SAMPLE_STEP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JumpConfig {
    pub lookahead_edges: usize,
    pub hold_ticks: u32,
    pub cooldown_ticks: u32,
    pub grace_ticks_on_start: u32,
    pub fail_max_attempts: u32,
    pub attempt_timeout_ticks: u32,
    /// Base forward distance at which the ledge counts as near.
    pub edge_tolerance: f32,
    /// Extra forward tolerance per block-per-tick of horizontal speed.
    pub speed_lead_scale: f32,
    pub speed_lead_max: f32,
    pub lateral_tolerance: f32,
    pub overshoot_tolerance: f32,
    pub reached_eps: f32,
    pub min_heading_dot: f32,
}

impl Default for JumpConfig {
    fn default() -> Self {
        Self {
            lookahead_edges: JUMP_LOOKAHEAD_EDGES,
            hold_ticks: JUMP_HOLD_TICKS,
            cooldown_ticks: JUMP_COOLDOWN_TICKS,
            grace_ticks_on_start: JUMP_GRACE_TICKS_ON_START,
            fail_max_attempts: STEPUP_FAIL_MAX_ATTEMPTS,
            attempt_timeout_ticks: STEPUP_ATTEMPT_TIMEOUT_TICKS,
            edge_tolerance: 0.60,
            speed_lead_scale: 1.3,
            speed_lead_max: 0.45,
            lateral_tolerance: 0.95,
            overshoot_tolerance: 0.65,
            reached_eps: 0.02,
            min_heading_dot: -0.15,
        }
    }
}

/// Interpolation style of the orientation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RotationMode {
    Linear,
    #[default]
    Bezier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub mode: RotationMode,
    /// 0..=1000, higher turns faster.
    pub speed: u32,
    pub bezier_speed: f32,
    /// 0..=1, amplitude of the per-plan aim noise.
    pub randomness: f32,
    pub noise_seed: u64,
    pub settle_tolerance_deg: f32,
    pub settle_ticks: u32,
    pub linear_noise_blend: f32,
    pub replan_tolerance_deg: f32,
    pub yaw_deadzone_deg: f32,
    pub lease_ttl_ticks: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            mode: RotationMode::Bezier,
            speed: 300,
            bezier_speed: 2.5,
            randomness: 0.0,
            noise_seed: 0x5EED,
            settle_tolerance_deg: 0.9,
            settle_ticks: 4,
            linear_noise_blend: 0.2,
            replan_tolerance_deg: 1.0,
            yaw_deadzone_deg: 3.0,
            lease_ttl_ticks: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    pub advance_yaw_tolerance_deg: f32,
    pub slowdown_dist_final: f32,
    pub slowdown_dist_checkpoint: f32,
    pub turn_slowdown_angle_deg: f32,
    pub turn_slowdown_dist: f32,
    /// 0 disables the brake tap.
    pub brake_distance: f32,
    /// Blocks per second.
    pub brake_min_speed: f32,
    pub brake_tap_ticks: u32,
    /// 0 disables strafe correction.
    pub strafe_correction_dist: f32,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            advance_yaw_tolerance_deg: 30.0,
            slowdown_dist_final: 2.25,
            slowdown_dist_checkpoint: 1.20,
            turn_slowdown_angle_deg: 55.0,
            turn_slowdown_dist: 2.4,
            brake_distance: 0.0,
            brake_min_speed: 3.0,
            brake_tap_ticks: 3,
            strafe_correction_dist: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrivalConfig {
    pub checkpoint_reach_dist: f32,
    pub checkpoint_feet_y_eps: f32,
    pub stop_goal_dist: f32,
    pub stop_goal_feet_y_eps: f32,
}

impl Default for ArrivalConfig {
    fn default() -> Self {
        Self {
            checkpoint_reach_dist: CHECKPOINT_REACH_DIST,
            checkpoint_feet_y_eps: CHECKPOINT_FEET_Y_EPS,
            stop_goal_dist: STOP_GOAL_DIST,
            stop_goal_feet_y_eps: STOP_GOAL_FEET_Y_EPS,
        }
    }
}

impl NavConfig {
    /// Parse a RON document. Missing fields keep their defaults.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: NavConfig = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Seconds per host tick.
    #[inline]
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate_hz
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tick_rate_hz > 0.0) {
            return Err(invalid("tick_rate_hz", "must be positive"));
        }
        if self.planner.max_iterations == 0 {
            return Err(invalid("planner.max_iterations", "must be at least 1"));
        }
        if self.planner.max_range <= 0 {
            return Err(invalid("planner.max_range", "must be positive"));
        }
        if self.planner.step_no_jump_max >= self.planner.step_jump_max {
            return Err(invalid(
                "planner.step_no_jump_max",
                "must be below planner.step_jump_max",
            ));
        }
        if self.route.macro_step <= 0 || self.route.macro_step > self.planner.max_range {
            return Err(invalid(
                "route.macro_step",
                format!("must be in 1..={}", self.planner.max_range),
            ));
        }
        if self.route.direct_sample_step <= 0.0 || self.steering.corridor_sample_step <= 0.0 {
            return Err(invalid("sample_step", "sample spacing must be positive"));
        }
        if self.route.checkpoint_every_n_nodes == 0 {
            return Err(invalid("route.checkpoint_every_n_nodes", "must be at least 1"));
        }
        if self.rotation.speed > 1000 {
            return Err(invalid("rotation.speed", "must be in 0..=1000"));
        }
        if !(0.0..=1.0).contains(&self.rotation.randomness) {
            return Err(invalid("rotation.randomness", "must be in 0..=1"));
        }
        if self.jump.fail_max_attempts == 0 {
            return Err(invalid("jump.fail_max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        message: message.into(),
    }
}
