//! Look-direction animation and the shared rotation lease.
//!
//! The controller holds at most one [`OrientationPlan`]. Linear mode steps toward the goal by a
//! capped angle per tick and ends after the error has stayed inside the settle tolerance for a
//! few ticks. Bezier mode advances a normalized progress value and eases it with a smoothstep.
//! Both add a small per-plan noise offset that ramps in instead of appearing on the first tick.

use std::sync::{Arc, Mutex, MutexGuard};

use bevy::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::{angle_delta, wrap_angle, Facing};
use crate::config::{RotationConfig, RotationMode};

const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2;

/// Degrees of yaw noise at full randomness.
const NOISE_YAW_DEG: f32 = 0.35;
const NOISE_PITCH_DEG: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationPlan {
    pub start: Facing,
    pub goal: Facing,
    /// Bezier progress in `[0, 1]`.
    pub progress: f32,
    pub noise_yaw: f32,
    pub noise_pitch: f32,
    moving_ticks: u32,
    settled_ticks: u32,
}

#[derive(Debug, Clone)]
pub struct OrientationController {
    plan: Option<OrientationPlan>,
    rng: StdRng,
}

impl OrientationController {
    pub fn new(config: &RotationConfig) -> Self {
        Self {
            plan: None,
            rng: StdRng::seed_from_u64(config.noise_seed),
        }
    }

    pub fn plan(&self) -> Option<&OrientationPlan> {
        self.plan.as_ref()
    }

    pub fn is_rotating(&self) -> bool {
        self.plan.is_some()
    }

    pub fn cancel(&mut self) {
        self.plan = None;
    }

    /// Start animating toward `goal`. An active plan whose goal is already within the replan
    /// tolerance is kept; returns whether a new plan was installed.
    pub fn request(&mut self, current: Facing, goal: Facing, config: &RotationConfig) -> bool {
        let goal = Facing {
            yaw: wrap_angle(goal.yaw),
            pitch: goal.pitch.clamp(-MAX_PITCH, MAX_PITCH),
        };
        let tolerance = config.replan_tolerance_deg.to_radians();
        if let Some(active) = &self.plan {
            if angle_delta(active.goal.yaw, goal.yaw).abs() < tolerance
                && (active.goal.pitch - goal.pitch).abs() < tolerance
            {
                return false;
            }
        }

        let noise_yaw = self.rng.gen_range(-1.0f32..=1.0) * config.randomness * NOISE_YAW_DEG.to_radians();
        let noise_pitch = self.rng.gen_range(-1.0f32..=1.0) * config.randomness * NOISE_PITCH_DEG.to_radians();
        trace!(
            "rotation plan yaw {:.1} -> {:.1} deg",
            current.yaw.to_degrees(),
            goal.yaw.to_degrees()
        );
        self.plan = Some(OrientationPlan {
            start: current,
            goal,
            progress: 0.0,
            noise_yaw,
            noise_pitch,
            moving_ticks: 0,
            settled_ticks: 0,
        });
        true
    }

    /// Facing to apply this tick, or `None` when no plan is active. Drops the plan once it
    /// completes.
    pub fn advance(&mut self, current: Facing, config: &RotationConfig) -> Option<Facing> {
        let plan = self.plan.as_mut()?;
        let (facing, done) = match config.mode {
            RotationMode::Linear => step_linear(plan, current, config),
            RotationMode::Bezier => step_bezier(plan, config),
        };
        if done {
            self.plan = None;
        }
        Some(Facing {
            yaw: wrap_angle(facing.yaw),
            pitch: facing.pitch.clamp(-MAX_PITCH, MAX_PITCH),
        })
    }
}

/// Speed setting mapped onto `[0, 1]`.
fn speed_factor(speed: u32) -> f32 {
    (speed.saturating_mul(4)).min(1000) as f32 / 1000.0
}

pub fn linear_max_step(config: &RotationConfig) -> f32 {
    (2.0 + speed_factor(config.speed) * 60.0).to_radians()
}

pub fn bezier_step(config: &RotationConfig) -> f32 {
    (0.035 + speed_factor(config.speed) * 0.140) * config.bezier_speed.clamp(0.1, 3.0)
}

#[inline]
fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

fn step_linear(plan: &mut OrientationPlan, current: Facing, config: &RotationConfig) -> (Facing, bool) {
    let max_step = linear_max_step(config);
    let tolerance = config.settle_tolerance_deg.to_radians();
    let noisy_goal = Facing {
        yaw: plan.goal.yaw + plan.noise_yaw,
        pitch: plan.goal.pitch + plan.noise_pitch,
    };

    let dy = angle_delta(current.yaw, plan.goal.yaw);
    let dp = plan.goal.pitch - current.pitch;
    if dy.abs() <= tolerance && dp.abs() <= tolerance {
        plan.settled_ticks += 1;
        return (noisy_goal, plan.settled_ticks >= config.settle_ticks);
    }
    plan.settled_ticks = 0;

    let blend = if plan.moving_ticks > 0 { config.linear_noise_blend } else { 0.0 };
    plan.moving_ticks += 1;
    let facing = Facing {
        yaw: current.yaw + dy.clamp(-max_step, max_step) + plan.noise_yaw * blend,
        pitch: current.pitch + dp.clamp(-max_step, max_step) + plan.noise_pitch * blend,
    };
    (facing, false)
}

fn step_bezier(plan: &mut OrientationPlan, config: &RotationConfig) -> (Facing, bool) {
    plan.progress = (plan.progress + bezier_step(config)).min(1.0);
    let ease = smoothstep(plan.progress);
    let facing = Facing {
        yaw: plan.start.yaw + angle_delta(plan.start.yaw, plan.goal.yaw) * ease + plan.noise_yaw * ease,
        pitch: plan.start.pitch + (plan.goal.pitch - plan.start.pitch) * ease + plan.noise_pitch * ease,
    };
    (facing, plan.progress >= 1.0)
}

/// Yaw error is large enough to be worth a new plan.
pub fn needs_turn(current_yaw: f32, desired_yaw: f32, config: &RotationConfig) -> bool {
    angle_delta(current_yaw, desired_yaw).abs() > config.yaw_deadzone_deg.to_radians()
}

// =============================================================================
// ROTATION LEASE
// =============================================================================

#[derive(Debug, Default)]
struct LeaseState {
    owner: Option<String>,
    until: u64,
}

impl LeaseState {
    fn expire(&mut self, now: u64) {
        if self.owner.is_some() && now > self.until {
            self.owner = None;
            self.until = 0;
        }
    }
}

/// Time-boxed ownership of the agent's facing, shared by every behavior that turns the agent.
/// Clones share the same lease.
#[derive(Component, Debug, Clone, Default)]
pub struct RotationLease {
    inner: Arc<Mutex<LeaseState>>,
}

impl RotationLease {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LeaseState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `owner` holds the lease or it is vacant.
    pub fn allow(&self, owner: &str, now: u64) -> bool {
        let mut state = self.lock();
        state.expire(now);
        state.owner.as_deref().is_none_or(|held| held == owner)
    }

    /// Claim or extend the lease for `ttl` ticks. Fails while another owner holds it.
    pub fn try_claim(&self, owner: &str, now: u64, ttl: u64) -> bool {
        let mut state = self.lock();
        state.expire(now);
        if state.owner.as_deref().is_some_and(|held| held != owner) {
            return false;
        }
        state.owner = Some(owner.to_owned());
        state.until = now + ttl.max(1);
        true
    }

    pub fn release(&self, owner: &str) {
        let mut state = self.lock();
        if state.owner.as_deref() == Some(owner) {
            state.owner = None;
            state.until = 0;
        }
    }

    pub fn owner(&self, now: u64) -> Option<String> {
        let mut state = self.lock();
        state.expire(now);
        state.owner.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facing(yaw_deg: f32, pitch_deg: f32) -> Facing {
        Facing {
            yaw: yaw_deg.to_radians(),
            pitch: pitch_deg.to_radians(),
        }
    }

    fn run(controller: &mut OrientationController, mut current: Facing, config: &RotationConfig) -> Vec<Facing> {
        let mut out = Vec::new();
        while let Some(next) = controller.advance(current, config) {
            out.push(next);
            current = next;
            assert!(out.len() < 100, "rotation never finished");
        }
        out
    }

    #[test]
    fn test_linear_settles_after_consecutive_ticks() {
        let config = RotationConfig {
            mode: RotationMode::Linear,
            ..default()
        };
        let mut controller = OrientationController::new(&config);
        assert!(controller.request(facing(0.0, 0.0), facing(90.0, 0.0), &config));

        let steps = run(&mut controller, facing(0.0, 0.0), &config);
        // 62 deg, then the remaining 28, then settle_ticks ticks parked on the goal.
        assert_eq!(steps.len(), 2 + config.settle_ticks as usize);
        assert!((steps[0].yaw - 62f32.to_radians()).abs() < 1e-4);
        let last = steps.last().unwrap();
        assert!((last.yaw - 90f32.to_radians()).abs() < 1e-4);
        assert!(!controller.is_rotating());
    }

    #[test]
    fn test_bezier_eases_monotonically() {
        let config = RotationConfig {
            speed: 50,
            ..default()
        };
        let mut controller = OrientationController::new(&config);
        controller.request(facing(0.0, 10.0), facing(120.0, -20.0), &config);
        let steps = run(&mut controller, facing(0.0, 10.0), &config);

        let expected_ticks = (1.0 / bezier_step(&config)).ceil() as usize;
        assert_eq!(steps.len(), expected_ticks);
        for pair in steps.windows(2) {
            assert!(pair[1].yaw >= pair[0].yaw);
            assert!(pair[1].pitch <= pair[0].pitch);
        }
        // Slow start: the first step covers less than a linear share of the turn.
        assert!(steps[0].yaw < 120f32.to_radians() / expected_ticks as f32);
        let last = steps.last().unwrap();
        assert!((last.yaw - 120f32.to_radians()).abs() < 1e-4);
        assert!((last.pitch + 20f32.to_radians()).abs() < 1e-4);
    }

    #[test]
    fn test_bezier_wraps_the_short_way() {
        let config = RotationConfig::default();
        let mut controller = OrientationController::new(&config);
        controller.request(facing(170.0, 0.0), facing(-170.0, 0.0), &config);
        let steps = run(&mut controller, facing(170.0, 0.0), &config);
        for step in &steps {
            assert!(step.yaw.abs() >= 169f32.to_radians());
        }
    }

    #[test]
    fn test_near_identical_request_keeps_plan() {
        let config = RotationConfig::default();
        let mut controller = OrientationController::new(&config);
        assert!(controller.request(facing(0.0, 0.0), facing(45.0, 0.0), &config));
        controller.advance(facing(0.0, 0.0), &config);
        let progress = controller.plan().unwrap().progress;

        assert!(!controller.request(facing(10.0, 0.0), facing(45.5, 0.0), &config));
        assert_eq!(controller.plan().unwrap().progress, progress);
        assert!(controller.request(facing(10.0, 0.0), facing(60.0, 0.0), &config));
    }

    #[test]
    fn test_noise_is_seeded_and_bounded() {
        let config = RotationConfig {
            randomness: 1.0,
            noise_seed: 42,
            ..default()
        };
        let mut a = OrientationController::new(&config);
        let mut b = OrientationController::new(&config);
        for goal in [30.0, 90.0, -45.0] {
            a.request(facing(0.0, 0.0), facing(goal, 0.0), &config);
            b.request(facing(0.0, 0.0), facing(goal, 0.0), &config);
            let (pa, pb) = (a.plan().unwrap(), b.plan().unwrap());
            assert_eq!(pa.noise_yaw, pb.noise_yaw);
            assert!(pa.noise_yaw.abs() <= NOISE_YAW_DEG.to_radians());
            assert!(pa.noise_pitch.abs() <= NOISE_PITCH_DEG.to_radians());
        }
    }

    #[test]
    fn test_lease_claim_allow_and_expiry() {
        let lease = RotationLease::new();
        let shared = lease.clone();
        assert!(lease.allow("nav", 0));
        assert!(lease.try_claim("nav", 10, 8));

        assert!(!shared.allow("camera", 12));
        assert!(!shared.try_claim("camera", 18, 5));
        assert!(shared.allow("nav", 18));

        // Expired one tick after the TTL.
        assert!(shared.allow("camera", 19));
        assert!(shared.try_claim("camera", 19, 0));
        assert_eq!(lease.owner(19), Some("camera".to_owned()));

        lease.release("nav");
        assert_eq!(lease.owner(19), Some("camera".to_owned()));
        shared.release("camera");
        assert_eq!(lease.owner(19), None);
    }

    #[test]
    fn test_dead_zone() {
        let config = RotationConfig::default();
        assert!(!needs_turn(0.0, 2f32.to_radians(), &config));
        assert!(needs_turn(0.0, 4f32.to_radians(), &config));
    }
}
