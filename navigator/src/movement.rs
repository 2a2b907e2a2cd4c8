//! Movement keys for one tick and arrival checks.
//!
//! Walking is forward-only by default: the agent advances once it faces the aim point closely
//! enough and crouches to bleed speed near checkpoints, the goal and sharp turns. Brake taps and
//! strafe correction are opt-in.

use bevy::prelude::*;

use crate::agent::{angle_delta, cell_center, distance_xz, facing_vector, yaw_toward, AgentState, MovementIntents};
use crate::config::{ArrivalConfig, NavConfig};
use crate::planner::{classify_edge, EdgeKind};
use crate::terrain::TerrainQuery;

// =============================================================================
// ARRIVAL
// =============================================================================

/// Close enough to a checkpoint or segment end to move on. Height is compared against the
/// cell's walk surface.
pub fn is_checkpoint_reached<W: TerrainQuery + ?Sized>(
    world: &W,
    feet: Vec3,
    goal: IVec3,
    config: &ArrivalConfig,
) -> bool {
    distance_xz(feet, cell_center(goal)) <= config.checkpoint_reach_dist
        && (feet.y - world.walk_surface_height(goal)).abs() <= config.checkpoint_feet_y_eps
}

/// Standing on the final goal. Height is compared against the goal cell's own elevation.
pub fn is_at_stop_goal(feet: Vec3, goal: IVec3, config: &ArrivalConfig) -> bool {
    distance_xz(feet, cell_center(goal)) <= config.stop_goal_dist
        && (feet.y - goal.y as f32).abs() <= config.stop_goal_feet_y_eps
}

// =============================================================================
// INTENTS
// =============================================================================

/// Everything the emitter looks at for one tick.
#[derive(Debug, Clone, Copy)]
pub struct MovementInput<'a> {
    pub agent: &'a AgentState,
    /// Yaw the agent will have after this tick's rotation.
    pub yaw: f32,
    pub aim: Vec3,
    /// Current checkpoint, or the segment end when none is left.
    pub stop_goal: IVec3,
    pub stop_is_final: bool,
    /// Previous checkpoint (or start), current checkpoint, and the point after it.
    pub turn: Option<[IVec3; 3]>,
    /// Edge leaving the tracker's current node.
    pub next_edge: Option<(IVec3, IVec3)>,
    pub jump: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MovementEmitter {
    brake_ticks: u32,
    braked: bool,
}

impl MovementEmitter {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn emit<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        input: &MovementInput<'_>,
        config: &NavConfig,
    ) -> MovementIntents {
        let movement = &config.movement;
        let feet = input.agent.position;
        let mut intents = MovementIntents::IDLE;

        if is_checkpoint_reached(world, feet, input.stop_goal, &config.arrival) && !input.stop_is_final {
            return intents;
        }

        let to_aim = Vec2::new(input.aim.x - feet.x, input.aim.z - feet.z);
        let yaw_error = if to_aim.length_squared() > 1e-6 {
            angle_delta(input.yaw, yaw_toward(to_aim.x, to_aim.y)).abs()
        } else {
            0.0
        };
        intents.advance = yaw_error <= movement.advance_yaw_tolerance_deg.to_radians();

        let dist_to_stop = distance_xz(feet, cell_center(input.stop_goal));
        let slowdown = if input.stop_is_final {
            movement.slowdown_dist_final
        } else {
            movement.slowdown_dist_checkpoint
        };
        intents.crouch = dist_to_stop <= slowdown;

        if let Some([a, b, c]) = input.turn {
            let sharp = turn_angle(a, b, c).is_some_and(|angle| angle >= movement.turn_slowdown_angle_deg.to_radians());
            if sharp && distance_xz(feet, cell_center(b)) <= movement.turn_slowdown_dist {
                intents.crouch = true;
            }
        }

        if let Some((from, to)) = input.next_edge {
            if classify_edge(world, from, to, &config.planner) == EdgeKind::Drop {
                intents.crouch = false;
            }
            if movement.strafe_correction_dist > 0.0 {
                self.apply_strafe(&mut intents, feet, input.yaw, from, to, movement.strafe_correction_dist);
            }
        }

        if input.stop_is_final {
            self.apply_brake(&mut intents, input.agent, dist_to_stop, config);
        }

        intents.jump = input.jump;
        intents
    }

    /// Short reverse tap when arriving fast. Fires once per goal.
    fn apply_brake(&mut self, intents: &mut MovementIntents, agent: &AgentState, dist: f32, config: &NavConfig) {
        let movement = &config.movement;
        if movement.brake_distance <= 0.0 {
            return;
        }
        if !self.braked && dist <= movement.brake_distance && agent.horizontal_speed() > movement.brake_min_speed {
            self.braked = true;
            self.brake_ticks = movement.brake_tap_ticks;
            trace!("brake tap at {dist:.2} from goal");
        }
        if self.brake_ticks > 0 {
            self.brake_ticks -= 1;
            intents.advance = false;
            intents.retreat = true;
        }
    }

    fn apply_strafe(&self, intents: &mut MovementIntents, feet: Vec3, yaw: f32, from: IVec3, to: IVec3, max_offset: f32) {
        let a = Vec2::new(from.x as f32 + 0.5, from.z as f32 + 0.5);
        let b = Vec2::new(to.x as f32 + 0.5, to.z as f32 + 0.5);
        let p = Vec2::new(feet.x, feet.z);
        let ab = b - a;
        let t = if ab.length_squared() > 1e-6 {
            ((p - a).dot(ab) / ab.length_squared()).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let offset = p - (a + ab * t);

        let forward = facing_vector(yaw);
        let right = Vec2::new(-forward.y, forward.x);
        let side = offset.dot(right);
        if side > max_offset {
            intents.strafe_left = true;
        } else if side < -max_offset {
            intents.strafe_right = true;
        }
    }
}

/// Horizontal turn angle at `b` on the way `a -> b -> c`.
pub fn turn_angle(a: IVec3, b: IVec3, c: IVec3) -> Option<f32> {
    let ab = Vec2::new((b.x - a.x) as f32, (b.z - a.z) as f32).try_normalize()?;
    let bc = Vec2::new((c.x - b.x) as f32, (c.z - b.z) as f32).try_normalize()?;
    Some(ab.dot(bc).clamp(-1.0, 1.0).acos())
}
