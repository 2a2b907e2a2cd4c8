//! The navigator: one goal, one tick entry point.
//!
//! Per tick the navigator snaps the agent onto the grid, picks the active segment, advances
//! checkpoints, re-plans when the scheduler asks for it, then runs progress tracking, steering,
//! orientation, jump timing and key emission in that order.

use bevy::prelude::*;

use crate::agent::{cell_of, pitch_toward, yaw_toward, AgentState, Facing, MovementIntents};
use crate::config::NavConfig;
use crate::error::ConfigError;
use crate::jump::{JumpController, JumpPhase};
use crate::movement::{is_at_stop_goal, is_checkpoint_reached, MovementEmitter, MovementInput};
use crate::orientation::{needs_turn, OrientationController, RotationLease};
use crate::planner::{classify_edge, EdgeBlacklist, EdgeKind, SearchCancel};
use crate::route::{plan_route, snap_start, sparse_checkpoints, CheckpointList, MacroGoal};
use crate::steering::SteeringSelector;
use crate::terrain::TerrainQuery;
use crate::tracker::{PathTracker, ReplanReason, ReplanScheduler};

pub const DEFAULT_OWNER: &str = "navigator";

pub type ArrivalCallback = Box<dyn FnMut() + Send + Sync>;

/// Display-only snapshot published once per steering tick.
#[derive(Debug, Clone, Copy)]
pub struct NavFrame<'a> {
    pub raw_path: &'a [IVec3],
    pub checkpoints: &'a [IVec3],
    pub target_cell: Option<IVec3>,
    pub aim_point: Option<Vec3>,
}

/// Write-only consumer of [`NavFrame`]s.
pub trait VisualizationSink: Send + Sync {
    fn publish(&mut self, frame: &NavFrame<'_>);
}

// =============================================================================
// BUILDER
// =============================================================================

pub struct NavigatorBuilder {
    config: NavConfig,
    lease: Option<RotationLease>,
    visualizer: Option<Box<dyn VisualizationSink>>,
    owner: String,
}

impl Default for NavigatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigatorBuilder {
    pub fn new() -> Self {
        Self {
            config: NavConfig::default(),
            lease: None,
            visualizer: None,
            owner: DEFAULT_OWNER.to_owned(),
        }
    }

    pub fn config(mut self, config: NavConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a lease with other behaviors that turn the agent.
    pub fn rotation_lease(mut self, lease: RotationLease) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn visualizer(mut self, sink: impl VisualizationSink + 'static) -> Self {
        self.visualizer = Some(Box::new(sink));
        self
    }

    /// Identity used when claiming the rotation lease.
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Fails when the configuration does not validate.
    pub fn build(self) -> Result<Navigator, ConfigError> {
        self.config.validate()?;
        Ok(Navigator {
            orientation: OrientationController::new(&self.config.rotation),
            config: self.config,
            lease: self.lease.unwrap_or_default(),
            visualizer: self.visualizer,
            owner: self.owner,
            on_arrived: None,
            goal: None,
            cancel: SearchCancel::new(),
            macro_goal: MacroGoal::default(),
            tracker: PathTracker::default(),
            checkpoints: CheckpointList::default(),
            scheduler: ReplanScheduler::default(),
            steering: SteeringSelector::default(),
            jump: JumpController::default(),
            movement: MovementEmitter::default(),
            blacklist: EdgeBlacklist::default(),
            holding: false,
            advancing: false,
        })
    }
}

// =============================================================================
// NAVIGATOR
// =============================================================================

#[derive(Component)]
pub struct Navigator {
    config: NavConfig,
    lease: RotationLease,
    visualizer: Option<Box<dyn VisualizationSink>>,
    owner: String,
    on_arrived: Option<ArrivalCallback>,

    goal: Option<IVec3>,
    cancel: SearchCancel,
    macro_goal: MacroGoal,
    tracker: PathTracker,
    checkpoints: CheckpointList,
    scheduler: ReplanScheduler,
    steering: SteeringSelector,
    jump: JumpController,
    orientation: OrientationController,
    movement: MovementEmitter,
    blacklist: EdgeBlacklist,
    /// Last re-plan found nothing; keys stay released until the next trigger.
    holding: bool,
    advancing: bool,
}

impl Navigator {
    pub fn builder() -> NavigatorBuilder {
        NavigatorBuilder::new()
    }

    pub fn config(&self) -> &NavConfig {
        &self.config
    }

    pub fn goal(&self) -> Option<IVec3> {
        self.goal
    }

    pub fn is_navigating(&self) -> bool {
        self.goal.is_some()
    }

    /// Re-plan failed and the agent is waiting for the next trigger.
    pub fn is_holding(&self) -> bool {
        self.holding
    }

    pub fn raw_path(&self) -> &[IVec3] {
        self.tracker.path()
    }

    pub fn progress_index(&self) -> usize {
        self.tracker.index()
    }

    pub fn checkpoints(&self) -> &CheckpointList {
        &self.checkpoints
    }

    pub fn macro_goal(&self) -> Option<IVec3> {
        self.macro_goal.current()
    }

    pub fn jump_phase(&self) -> JumpPhase {
        self.jump.phase()
    }

    pub fn blacklist(&self) -> &EdgeBlacklist {
        &self.blacklist
    }

    /// Cancellation token of the search belonging to the current goal.
    pub fn search_token(&self) -> SearchCancel {
        self.cancel.clone()
    }

    pub fn set_on_arrived(&mut self, callback: impl FnMut() + Send + Sync + 'static) {
        self.on_arrived = Some(Box::new(callback));
    }

    /// Walk to the cell containing `point`.
    pub fn navigate_to(&mut self, point: Vec3) {
        self.navigate_to_cell(cell_of(point));
    }

    pub fn navigate_to_cell(&mut self, goal: IVec3) {
        self.reset_session();
        info!("navigating to {goal}");
        self.goal = Some(goal);
        self.jump.begin(&self.config.jump);
        self.scheduler.force(ReplanReason::NewGoal);
    }

    pub fn cancel_navigation(&mut self) {
        if let Some(goal) = self.goal {
            info!("navigation to {goal} cancelled");
        }
        self.reset_session();
    }

    /// Trip the outstanding search and forget everything derived from the old goal.
    fn reset_session(&mut self) {
        self.cancel.cancel();
        self.cancel = SearchCancel::new();
        self.goal = None;
        self.macro_goal.clear();
        self.tracker.clear();
        self.checkpoints.clear();
        self.scheduler.reset();
        self.steering.reset();
        self.jump.reset();
        self.orientation.cancel();
        self.movement.reset();
        self.blacklist.clear();
        self.holding = false;
        self.advancing = false;
        self.lease.release(&self.owner);
    }

    fn finish(&mut self, goal: IVec3) {
        info!("arrived at {goal}");
        self.reset_session();
        if let Some(callback) = self.on_arrived.as_mut() {
            callback();
        }
    }

    pub fn tick<W: TerrainQuery + ?Sized>(&mut self, agent: &AgentState, world: &W) -> MovementIntents {
        let Some(final_goal) = self.goal else {
            return MovementIntents::IDLE;
        };
        let feet = agent.position;

        if is_at_stop_goal(feet, final_goal, &self.config.arrival) {
            self.finish(final_goal);
            return MovementIntents::IDLE;
        }

        let Some(start) = snap_start(world, agent.feet_cell(), self.config.route.snap_max_vertical) else {
            trace!("no standable cell near feet {}", agent.feet_cell());
            return MovementIntents::IDLE;
        };
        let Some(mut segment_end) = self.ensure_segment(world, start, final_goal) else {
            return MovementIntents::IDLE;
        };

        let stop_goal = self.checkpoints.current().unwrap_or(segment_end);
        if is_checkpoint_reached(world, feet, stop_goal, &self.config.arrival) {
            if self.checkpoints.current().is_some() {
                trace!("checkpoint {stop_goal} reached");
                self.checkpoints.advance();
                self.scheduler.force(ReplanReason::CheckpointReached);
            } else if segment_end != final_goal {
                debug!("segment ending at {segment_end} complete");
                self.macro_goal.clear();
                self.tracker.clear();
                self.checkpoints.clear();
                self.scheduler.force(ReplanReason::SegmentComplete);
                let Some(next) = self.ensure_segment(world, start, final_goal) else {
                    return MovementIntents::IDLE;
                };
                segment_end = next;
            }
        }

        if let Some(reason) = self.scheduler.evaluate(&self.tracker, feet, &self.config.tracker) {
            self.replan(world, start, segment_end, reason);
        }
        if self.holding {
            self.advancing = false;
            return MovementIntents::IDLE;
        }

        self.steer(world, agent, start, segment_end, final_goal)
    }

    fn ensure_segment<W: TerrainQuery + ?Sized>(&mut self, world: &W, start: IVec3, final_goal: IVec3) -> Option<IVec3> {
        self.macro_goal.ensure(
            world,
            start,
            final_goal,
            &self.config.route,
            self.config.planner.max_range,
        )
    }

    fn replan<W: TerrainQuery + ?Sized>(&mut self, world: &W, start: IVec3, segment_end: IVec3, reason: ReplanReason) {
        // Always the segment end, not the current checkpoint; checkpoints are re-derived from the result.
        match plan_route(world, start, segment_end, &self.config, &self.blacklist, Some(&self.cancel)) {
            Some(route) => {
                debug!(
                    "re-plan ({reason:?}) {start} -> {segment_end}: {} nodes via {:?}",
                    route.cells.len(),
                    route.source
                );
                let checkpoints = sparse_checkpoints(&route.cells, segment_end, &self.config.route);
                self.tracker.replace(route.cells);
                self.checkpoints.replace(checkpoints);
                self.steering.reset();
                self.holding = false;
            }
            None => {
                if !self.holding {
                    debug!("re-plan ({reason:?}) {start} -> {segment_end} found no path, holding");
                }
                self.holding = true;
            }
        }
    }

    fn steer<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        agent: &AgentState,
        start: IVec3,
        segment_end: IVec3,
        final_goal: IVec3,
    ) -> MovementIntents {
        let feet = agent.position;
        self.tracker
            .update_progress(world, feet, &self.config.tracker, &self.config.planner);

        let aim_cell = self.aim_cell(world, feet).unwrap_or(segment_end);
        let aim = Vec3::new(
            aim_cell.x as f32 + 0.5,
            world.walk_surface_height(aim_cell),
            aim_cell.z as f32 + 0.5,
        );

        let facing = self.orient(agent, aim);
        let yaw = facing.map_or(agent.yaw, |f| f.yaw);

        let decision = self
            .jump
            .evaluate(world, agent, &self.tracker, &mut self.blacklist, &self.config);
        if decision.force_replan {
            self.scheduler.force(ReplanReason::StepUpFailed);
        }

        let stop_goal = self.checkpoints.current().unwrap_or(segment_end);
        let input = MovementInput {
            agent,
            yaw,
            aim,
            stop_goal,
            stop_is_final: stop_goal == final_goal,
            turn: self.turn_points(start, segment_end),
            next_edge: self.tracker.next_edge(),
            jump: decision.jump,
        };
        let mut intents = self.movement.emit(world, &input, &self.config);

        if intents.advance && !self.advancing {
            self.lease
                .try_claim(&self.owner, agent.tick, self.config.rotation.lease_ttl_ticks);
        }
        self.advancing = intents.advance;
        intents.facing = facing;

        if let Some(sink) = self.visualizer.as_mut() {
            sink.publish(&NavFrame {
                raw_path: self.tracker.path(),
                checkpoints: self.checkpoints.points(),
                target_cell: Some(stop_goal),
                aim_point: Some(aim),
            });
        }
        intents
    }

    /// Steering target, pushed onto the step destination while the agent is still at the lead-in.
    fn aim_cell<W: TerrainQuery + ?Sized>(&mut self, world: &W, feet: Vec3) -> Option<IVec3> {
        let aim = self.steering.select(
            world,
            feet,
            self.tracker.path(),
            self.tracker.index(),
            &self.config.steering,
        )?;
        match self.tracker.next_edge() {
            Some((lead, up))
                if aim == lead && classify_edge(world, lead, up, &self.config.planner) == EdgeKind::StepUp =>
            {
                Some(up)
            }
            _ => Some(aim),
        }
    }

    /// Plan and advance the facing toward `aim` if this navigator may rotate the agent.
    fn orient(&mut self, agent: &AgentState, aim: Vec3) -> Option<Facing> {
        let rotation = &self.config.rotation;
        if !self.lease.allow(&self.owner, agent.tick) {
            return None;
        }

        let feet = agent.position;
        let (dx, dz) = (aim.x - feet.x, aim.z - feet.z);
        let current = Facing {
            yaw: agent.yaw,
            pitch: agent.pitch,
        };
        if dx * dx + dz * dz > 1e-6 {
            let desired = Facing {
                yaw: yaw_toward(dx, dz),
                pitch: pitch_toward(aim.y - feet.y, (dx * dx + dz * dz).sqrt()),
            };
            if needs_turn(agent.yaw, desired.yaw, rotation) {
                self.orientation.request(current, desired, rotation);
            }
        }
        self.orientation.advance(current, rotation)
    }

    /// Corner at the current checkpoint: the previous checkpoint (or start), the checkpoint and
    /// the point after it.
    fn turn_points(&self, start: IVec3, segment_end: IVec3) -> Option<[IVec3; 3]> {
        let b = self.checkpoints.current()?;
        let index = self.checkpoints.index();
        let a = match index {
            0 => start,
            i => self.checkpoints.points()[i - 1],
        };
        let c = self
            .checkpoints
            .following()
            .or((b != segment_end).then_some(segment_end))?;
        Some([a, b, c])
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::agent::facing_vector;
    use crate::voxel::{Block, VoxelWorld};

    fn plane() -> VoxelWorld {
        VoxelWorld::flat(IVec2::new(-20, -20), IVec2::new(40, 20), 63)
    }

    /// Flat-ground stand-in for a host: applies the facing, walks forward on `advance`.
    fn step(agent: &mut AgentState, intents: &MovementIntents, tick_seconds: f32) {
        if let Some(facing) = intents.facing {
            agent.yaw = facing.yaw;
            agent.pitch = facing.pitch;
        }
        let speed = if intents.crouch { 4.3 * 0.3 } else { 4.3 };
        let dir = facing_vector(agent.yaw);
        let velocity = if intents.advance {
            Vec3::new(dir.x, 0.0, dir.y) * speed
        } else {
            Vec3::ZERO
        };
        agent.velocity = velocity;
        agent.position += velocity * tick_seconds;
        agent.tick += 1;
    }

    fn counter(navigator: &mut Navigator) -> Arc<AtomicUsize> {
        let arrivals = Arc::new(AtomicUsize::new(0));
        let hook = arrivals.clone();
        navigator.set_on_arrived(move || {
            hook.fetch_add(1, Ordering::SeqCst);
        });
        arrivals
    }

    #[test]
    fn test_walks_flat_plane_and_fires_callback_once() {
        let world = plane();
        let mut navigator = Navigator::builder().build().unwrap();
        let arrivals = counter(&mut navigator);
        let tick_seconds = navigator.config().tick_seconds();

        let mut agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        navigator.navigate_to_cell(IVec3::new(10, 64, 0));

        let mut ticks = 0;
        while navigator.is_navigating() && ticks < 400 {
            let intents = navigator.tick(&agent, &world);
            step(&mut agent, &intents, tick_seconds);
            ticks += 1;
        }
        assert!(!navigator.is_navigating(), "still navigating at {}", agent.position);
        assert_eq!(arrivals.load(Ordering::SeqCst), 1);
        assert!((agent.position.x - 10.5).abs() <= 0.95);

        for _ in 0..20 {
            assert_eq!(navigator.tick(&agent, &world), MovementIntents::IDLE);
        }
        assert_eq!(arrivals.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_first_plan_uses_direct_line() {
        let world = plane();
        let mut navigator = Navigator::builder().build().unwrap();
        let agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        navigator.navigate_to_cell(IVec3::new(10, 64, 0));
        navigator.tick(&agent, &world);

        let expected: Vec<IVec3> = (0..=10).map(|x| IVec3::new(x, 64, 0)).collect();
        assert_eq!(navigator.raw_path(), expected.as_slice());
        assert!(navigator.checkpoints().points().is_empty());
    }

    #[test]
    fn test_cancel_zeroes_intents_and_trips_search() {
        let world = plane();
        let mut navigator = Navigator::builder().build().unwrap();
        let mut agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        agent.yaw = -std::f32::consts::FRAC_PI_2;
        navigator.navigate_to_cell(IVec3::new(15, 64, 0));
        let token = navigator.search_token();

        let intents = navigator.tick(&agent, &world);
        assert!(intents.advance);

        navigator.cancel_navigation();
        assert!(token.is_cancelled());
        assert!(!navigator.is_navigating());
        assert!(navigator.raw_path().is_empty());
        assert_eq!(navigator.tick(&agent, &world), MovementIntents::IDLE);
    }

    #[test]
    fn test_new_goal_cancels_previous_search() {
        let mut navigator = Navigator::builder().build().unwrap();
        navigator.navigate_to_cell(IVec3::new(15, 64, 0));
        let first = navigator.search_token();
        navigator.navigate_to(Vec3::new(-4.2, 64.0, 3.7));
        assert!(first.is_cancelled());
        assert!(!navigator.search_token().is_cancelled());
        assert_eq!(navigator.goal(), Some(IVec3::new(-5, 64, 3)));
    }

    #[test]
    fn test_elevated_goal_never_stops() {
        let world = plane();
        let mut navigator = Navigator::builder().build().unwrap();
        let arrivals = counter(&mut navigator);
        let agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        navigator.navigate_to_cell(IVec3::new(0, 67, 0));

        for _ in 0..60 {
            let intents = navigator.tick(&agent, &world);
            assert!(!intents.any_key());
        }
        assert!(navigator.is_navigating());
        assert!(navigator.is_holding());
        assert_eq!(arrivals.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failed_replan_keeps_last_path_and_holds() {
        let mut world = plane();
        let mut navigator = Navigator::builder().build().unwrap();
        let agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        let goal = IVec3::new(10, 64, 0);
        navigator.navigate_to_cell(goal);
        navigator.tick(&agent, &world);
        let planned = navigator.raw_path().to_vec();
        assert_eq!(planned.len(), 11);

        // Goal cell walled in: every later search fails.
        world.fill(goal, goal + IVec3::Y, Block::Solid);
        let mut ticks = 0;
        while !navigator.is_holding() && ticks < 40 {
            navigator.tick(&agent, &world);
            ticks += 1;
        }
        assert!(navigator.is_holding());
        assert!(navigator.is_navigating());
        assert_eq!(navigator.raw_path(), planned.as_slice());
        for _ in 0..15 {
            assert_eq!(navigator.tick(&agent, &world), MovementIntents::IDLE);
            assert_eq!(navigator.raw_path(), planned.as_slice());
        }
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = NavConfig::default();
        config.route.checkpoint_every_n_nodes = 0;
        let err = Navigator::builder().config(config).build().err();
        assert!(matches!(err, Some(ConfigError::InvalidValue { field: "route.checkpoint_every_n_nodes", .. })));
    }

    #[test]
    fn test_foreign_lease_blocks_rotation() {
        let world = plane();
        let lease = RotationLease::new();
        let mut navigator = Navigator::builder().rotation_lease(lease.clone()).build().unwrap();
        let agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        navigator.navigate_to_cell(IVec3::new(10, 64, 0));

        assert!(lease.try_claim("camera", 0, 20));
        let intents = navigator.tick(&agent, &world);
        assert_eq!(intents.facing, None);
        // Facing north while the goal is east: no advancing either.
        assert!(!intents.advance);

        lease.release("camera");
        let intents = navigator.tick(&agent, &world);
        assert!(intents.facing.is_some());
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Arc<Mutex<Vec<(usize, Option<IVec3>)>>>);

    impl VisualizationSink for RecordingSink {
        fn publish(&mut self, frame: &NavFrame<'_>) {
            if let Ok(mut frames) = self.0.lock() {
                frames.push((frame.raw_path.len(), frame.target_cell));
            }
        }
    }

    #[test]
    fn test_visualizer_receives_frames() {
        let world = plane();
        let sink = RecordingSink::default();
        let mut navigator = Navigator::builder()
            .visualizer(sink.clone())
            .owner("walker")
            .build()
            .unwrap();
        let agent = AgentState::new(Vec3::new(0.5, 64.0, 0.5));
        navigator.navigate_to_cell(IVec3::new(10, 64, 0));
        navigator.tick(&agent, &world);
        navigator.tick(&agent, &world);

        let frames = sink.0.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], (11, Some(IVec3::new(10, 64, 0))));
    }
}
