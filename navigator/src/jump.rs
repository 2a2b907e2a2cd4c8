//! Jump timing.
//!
//! The controller is a small phase machine (`Idle -> Holding -> Cooldown -> Idle`). While idle and
//! grounded it looks a few edges ahead for a step-up and triggers once the agent is close enough
//! to the ledge, heading toward it. Each trigger opens a step attempt; attempts that do not reach
//! the upper surface in time count as failures and repeated failures blacklist the edge.

use bevy::prelude::*;

use crate::agent::{cell_center, AgentState};
use crate::config::{JumpConfig, NavConfig};
use crate::planner::{classify_edge, EdgeBlacklist, EdgeKind};
use crate::terrain::TerrainQuery;
use crate::tracker::PathTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JumpPhase {
    #[default]
    Idle,
    /// Jump key held; `remaining` includes the current tick.
    Holding { remaining: u32 },
    /// No new trigger until this runs out.
    Cooldown { remaining: u32 },
}

/// Outcome of one jump evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct JumpDecision {
    pub jump: bool,
    /// The step ahead is blacklisted or just got blacklisted.
    pub force_replan: bool,
}

// =============================================================================
// STEP ATTEMPTS
// =============================================================================

/// Watches the step-up edge last jumped at and counts attempts that never reached the top.
#[derive(Debug, Clone, Default)]
pub struct StepAttemptTracker {
    edge: Option<(IVec3, IVec3)>,
    pending: bool,
    timer: u32,
    failures: u32,
}

impl StepAttemptTracker {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn edge(&self) -> Option<(IVec3, IVec3)> {
        self.edge
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Open an attempt on `lead -> up`. A different edge resets the failure count; a trigger
    /// while the previous attempt is still running keeps its deadline.
    pub fn start(&mut self, lead: IVec3, up: IVec3, timeout_ticks: u32) {
        if self.edge != Some((lead, up)) {
            self.edge = Some((lead, up));
            self.failures = 0;
            self.pending = false;
        }
        if !self.pending {
            self.pending = true;
            self.timer = timeout_ticks;
        }
    }

    /// Returns true when the edge was blacklisted on this tick.
    pub fn update<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        feet_y: f32,
        config: &JumpConfig,
        blacklist: &mut EdgeBlacklist,
    ) -> bool {
        let Some((lead, up)) = self.edge else {
            return false;
        };

        if feet_y >= world.walk_surface_height(up) - config.reached_eps {
            self.clear();
            return false;
        }
        if !self.pending {
            return false;
        }
        if self.timer > 0 {
            self.timer -= 1;
            return false;
        }

        self.pending = false;
        self.failures += 1;
        debug!("step {lead} -> {up} attempt failed ({}/{})", self.failures, config.fail_max_attempts);
        if self.failures >= config.fail_max_attempts {
            warn!("blacklisting step {lead} -> {up} after {} failed attempts", self.failures);
            blacklist.insert(lead, up);
            self.clear();
            return true;
        }
        false
    }
}

// =============================================================================
// CONTROLLER
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct JumpController {
    phase: JumpPhase,
    grace: u32,
    attempts: StepAttemptTracker,
}

impl JumpController {
    pub fn phase(&self) -> JumpPhase {
        self.phase
    }

    pub fn attempts(&self) -> &StepAttemptTracker {
        &self.attempts
    }

    /// New navigation session: suppress jumping briefly while the first plan settles.
    pub fn begin(&mut self, config: &JumpConfig) {
        *self = Self {
            grace: config.grace_ticks_on_start,
            ..Self::default()
        };
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn evaluate<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        agent: &AgentState,
        tracker: &PathTracker,
        blacklist: &mut EdgeBlacklist,
        config: &NavConfig,
    ) -> JumpDecision {
        let jump_config = &config.jump;
        let mut decision = JumpDecision {
            force_replan: self.attempts.update(world, agent.position.y, jump_config, blacklist),
            ..default()
        };

        if self.grace > 0 {
            self.grace -= 1;
            self.phase = JumpPhase::Idle;
            return decision;
        }

        match self.phase {
            JumpPhase::Holding { remaining } => {
                self.phase = if remaining > 1 {
                    JumpPhase::Holding { remaining: remaining - 1 }
                } else if jump_config.cooldown_ticks > 0 {
                    JumpPhase::Cooldown { remaining: jump_config.cooldown_ticks }
                } else {
                    JumpPhase::Idle
                };
                decision.jump = true;
                return decision;
            }
            JumpPhase::Cooldown { remaining } => {
                self.phase = if remaining > 1 {
                    JumpPhase::Cooldown { remaining: remaining - 1 }
                } else {
                    JumpPhase::Idle
                };
                return decision;
            }
            JumpPhase::Idle => {}
        }

        if !agent.on_ground {
            return decision;
        }

        let Some((lead, up)) = find_step_ahead(world, tracker, config) else {
            return decision;
        };
        if !is_near_ledge(agent, lead, up, jump_config, config.tick_seconds()) {
            return decision;
        }
        if blacklist.contains(lead, up) {
            decision.force_replan = true;
            return decision;
        }
        if !is_step_jumpable(world, agent, lead, up, config) {
            return decision;
        }

        debug!("jump at {lead} -> {up}, feet {:.2}", agent.position.y);
        self.attempts.start(lead, up, jump_config.attempt_timeout_ticks);
        let hold = jump_config.hold_ticks.max(1);
        self.phase = if hold > 1 {
            JumpPhase::Holding { remaining: hold - 1 }
        } else if jump_config.cooldown_ticks > 0 {
            JumpPhase::Cooldown { remaining: jump_config.cooldown_ticks }
        } else {
            JumpPhase::Idle
        };
        decision.jump = true;
        decision
    }
}

/// First step-up edge within the lookahead from the tracker's current node.
pub fn find_step_ahead<W: TerrainQuery + ?Sized>(
    world: &W,
    tracker: &PathTracker,
    config: &NavConfig,
) -> Option<(IVec3, IVec3)> {
    let path = tracker.path();
    let start = tracker.index();
    let last_edge = path.len().checked_sub(2)?;
    let end = (start + config.jump.lookahead_edges).min(last_edge);
    (start..=end)
        .map(|i| (path[i], path[i + 1]))
        .find(|&(a, b)| classify_edge(world, a, b, &config.planner) == EdgeKind::StepUp)
}

/// Feet are within the speed-scaled forward window of the lead cell's exit edge and close to the
/// line of travel.
pub fn is_near_ledge(agent: &AgentState, lead: IVec3, up: IVec3, config: &JumpConfig, tick_seconds: f32) -> bool {
    let d = (up - lead).signum();
    if d.x == 0 && d.z == 0 {
        return false;
    }
    let dir = Vec2::new(d.x as f32, d.z as f32).normalize();
    let center = cell_center(lead);
    let rel = Vec2::new(agent.position.x - center.x, agent.position.z - center.z);
    let forward = rel.dot(dir);
    let lateral = rel.perp_dot(dir).abs();

    let speed_per_tick = agent.horizontal_speed() * tick_seconds;
    let edge_tol = config.edge_tolerance + (speed_per_tick * config.speed_lead_scale).clamp(0.0, config.speed_lead_max);
    let dist_to_edge = 0.5 - forward;

    dist_to_edge <= edge_tol && dist_to_edge >= -config.overshoot_tolerance && lateral <= config.lateral_tolerance
}

/// Rise needs a jump, the top is not reached yet, the landing is open and the agent is not
/// moving away from it.
fn is_step_jumpable<W: TerrainQuery + ?Sized>(
    world: &W,
    agent: &AgentState,
    lead: IVec3,
    up: IVec3,
    config: &NavConfig,
) -> bool {
    let from_floor = world.walk_surface_height(lead);
    let to_floor = world.walk_surface_height(up);
    let rise = to_floor - from_floor;
    if rise <= config.planner.step_no_jump_max || rise > config.planner.step_jump_max {
        return false;
    }
    if agent.position.y >= to_floor - config.jump.reached_eps {
        return false;
    }
    // Slabs and carpets in the landing cell are part of the floor the feet rest on.
    if !world.is_body_passable(up) || !world.is_head_passable(up + IVec3::Y) {
        return false;
    }

    let target = cell_center(up);
    let Some(toward) = Vec2::new(target.x - agent.position.x, target.z - agent.position.z).try_normalize() else {
        return false;
    };
    match Vec2::new(agent.velocity.x, agent.velocity.z).try_normalize() {
        Some(heading) => heading.dot(toward) >= config.jump.min_heading_dot,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::{Block, VoxelWorld};

    const LEAD: IVec3 = IVec3::new(4, 64, 0);
    const UP: IVec3 = IVec3::new(5, 65, 0);

    fn ledge_world() -> VoxelWorld {
        let mut world = VoxelWorld::flat(IVec2::new(-10, -10), IVec2::new(30, 10), 63);
        world.fill(IVec3::new(5, 64, -10), IVec3::new(30, 64, 10), Block::Solid);
        world
    }

    fn ledge_tracker(world: &VoxelWorld, feet: Vec3) -> PathTracker {
        let mut path: Vec<IVec3> = (0..5).map(|x| IVec3::new(x, 64, 0)).collect();
        path.extend((5..10).map(|x| IVec3::new(x, 65, 0)));
        let mut tracker = PathTracker::default();
        tracker.replace(path);
        let config = NavConfig::default();
        tracker.update_progress(world, feet, &config.tracker, &config.planner);
        tracker
    }

    fn approaching(x: f32) -> AgentState {
        let mut agent = AgentState::new(Vec3::new(x, 64.0, 0.5));
        agent.velocity = Vec3::new(4.3, 0.0, 0.0);
        agent
    }

    #[test]
    fn test_ledge_triggers_hold_then_cooldown() {
        let world = ledge_world();
        let config = NavConfig::default();
        let agent = approaching(4.3);
        let tracker = ledge_tracker(&world, agent.position);
        assert_eq!(tracker.current(), Some(LEAD));

        let mut blacklist = EdgeBlacklist::default();
        let mut jump = JumpController::default();

        let first = jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config);
        assert!(first.jump);
        assert!(matches!(jump.phase(), JumpPhase::Holding { .. }));
        assert_eq!(jump.attempts().edge(), Some((LEAD, UP)));

        let held = (1..config.jump.hold_ticks)
            .map(|_| jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config).jump)
            .all(|j| j);
        assert!(held);
        assert_eq!(jump.phase(), JumpPhase::Cooldown { remaining: config.jump.cooldown_ticks });

        for _ in 0..config.jump.cooldown_ticks {
            assert!(!jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config).jump);
        }
        assert_eq!(jump.phase(), JumpPhase::Idle);
    }

    #[test]
    fn test_slab_landing_is_jumpable() {
        let mut world = ledge_world();
        world.fill(IVec3::new(-10, 64, -10), IVec3::new(4, 64, 10), Block::BottomSlab);
        world.fill(IVec3::new(5, 65, -10), IVec3::new(30, 65, 10), Block::BottomSlab);
        let config = NavConfig::default();
        let mut agent = approaching(4.3);
        agent.position.y = 64.5;

        assert!(is_step_jumpable(&world, &agent, LEAD, UP, &config));
        let tracker = ledge_tracker(&world, agent.position);
        let mut blacklist = EdgeBlacklist::default();
        let mut jump = JumpController::default();
        assert!(jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config).jump);

        // Head room above the slab still matters.
        world.set(UP + IVec3::Y, Block::Solid);
        assert!(!is_step_jumpable(&world, &agent, LEAD, UP, &config));
    }

    #[test]
    fn test_far_or_retreating_agent_does_not_jump() {
        let world = ledge_world();
        let config = NavConfig::default();
        let mut blacklist = EdgeBlacklist::default();

        let far = approaching(1.5);
        let tracker = ledge_tracker(&world, far.position);
        let mut jump = JumpController::default();
        assert!(!jump.evaluate(&world, &far, &tracker, &mut blacklist, &config).jump);

        let mut retreating = approaching(4.3);
        retreating.velocity = Vec3::new(-4.3, 0.0, 0.0);
        let tracker = ledge_tracker(&world, retreating.position);
        assert!(!jump.evaluate(&world, &retreating, &tracker, &mut blacklist, &config).jump);

        let mut airborne = approaching(4.3);
        airborne.on_ground = false;
        assert!(!jump.evaluate(&world, &airborne, &tracker, &mut blacklist, &config).jump);
    }

    #[test]
    fn test_grace_suppresses_jump() {
        let world = ledge_world();
        let config = NavConfig::default();
        let agent = approaching(4.3);
        let tracker = ledge_tracker(&world, agent.position);
        let mut blacklist = EdgeBlacklist::default();
        let mut jump = JumpController::default();
        jump.begin(&config.jump);

        for _ in 0..config.jump.grace_ticks_on_start {
            assert!(!jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config).jump);
        }
        assert!(jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config).jump);
    }

    #[test]
    fn test_repeated_failure_blacklists_edge() {
        let world = ledge_world();
        let config = NavConfig::default();
        // Never gains height.
        let agent = approaching(4.3);
        let tracker = ledge_tracker(&world, agent.position);
        let mut blacklist = EdgeBlacklist::default();
        let mut jump = JumpController::default();

        let mut replans = 0;
        for _ in 0..400 {
            if jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config).force_replan {
                replans += 1;
            }
            if blacklist.contains(LEAD, UP) {
                break;
            }
        }
        assert!(blacklist.contains(LEAD, UP));
        assert_eq!(replans, 1);

        // Drain the current hold/cooldown, then the edge only ever asks for a new plan.
        for _ in 0..config.jump.hold_ticks + config.jump.cooldown_ticks {
            jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config);
        }
        for _ in 0..5 {
            let decision = jump.evaluate(&world, &agent, &tracker, &mut blacklist, &config);
            assert!(!decision.jump);
            assert!(decision.force_replan);
        }
    }

    #[test]
    fn test_attempt_clears_on_landing() {
        let world = ledge_world();
        let config = JumpConfig::default();
        let mut blacklist = EdgeBlacklist::default();
        let mut attempts = StepAttemptTracker::default();

        attempts.start(LEAD, UP, config.attempt_timeout_ticks);
        for _ in 0..config.attempt_timeout_ticks {
            assert!(!attempts.update(&world, 64.4, &config, &mut blacklist));
        }
        assert!(!attempts.update(&world, 64.4, &config, &mut blacklist));
        assert_eq!(attempts.failures(), 1);

        attempts.start(LEAD, UP, config.attempt_timeout_ticks);
        assert!(!attempts.update(&world, 65.0, &config, &mut blacklist));
        assert_eq!(attempts.edge(), None);
        assert!(blacklist.is_empty());
    }
}
