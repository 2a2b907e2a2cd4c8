//! Agent snapshot consumed by the navigator and the intents it produces.
//!
//! Orientation convention: radians, +X right, +Y up, -Z forward. A yaw of zero faces -Z and the
//! facing vector is `(-sin yaw, 0, -cos yaw)`. Positive pitch looks up.

use std::f32::consts::{FRAC_PI_2, PI, TAU};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

/// Read-only view of the agent for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentState {
    /// Feet position (bottom center of the bounding box).
    pub position: Vec3,
    /// Cells per second.
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
    /// Vertical extent of the bounding box.
    pub height: f32,
    /// Host tick counter, used as the rotation lease clock.
    pub tick: u64,
}

impl AgentState {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: true,
            height: 1.8,
            tick: 0,
        }
    }

    /// Cell containing the feet. The small lift keeps an agent standing exactly on a block top
    /// inside the air cell rather than the block.
    #[inline]
    pub fn feet_cell(&self) -> IVec3 {
        IVec3::new(
            self.position.x.floor() as i32,
            (self.position.y + 0.01).floor() as i32,
            self.position.z.floor() as i32,
        )
    }

    #[inline]
    pub fn horizontal_speed(&self) -> f32 {
        Vec2::new(self.velocity.x, self.velocity.z).length()
    }
}

/// Absolute look direction the host should apply.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Facing {
    pub yaw: f32,
    pub pitch: f32,
}

/// Boolean movement keys for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementIntents {
    pub advance: bool,
    pub retreat: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub jump: bool,
    pub crouch: bool,
    /// Orientation to apply this tick, if the navigator is steering.
    pub facing: Option<Facing>,
}

impl MovementIntents {
    /// No keys held and no facing change.
    pub const IDLE: Self = Self {
        advance: false,
        retreat: false,
        strafe_left: false,
        strafe_right: false,
        jump: false,
        crouch: false,
        facing: None,
    };

    pub fn any_key(&self) -> bool {
        self.advance || self.retreat || self.strafe_left || self.strafe_right || self.jump || self.crouch
    }
}

// =============================================================================
// GEOMETRY HELPERS
// =============================================================================

/// Center of a cell's floor footprint at the cell's base height.
#[inline]
pub fn cell_center(cell: IVec3) -> Vec3 {
    Vec3::new(cell.x as f32 + 0.5, cell.y as f32, cell.z as f32 + 0.5)
}

#[inline]
pub fn cell_of(point: Vec3) -> IVec3 {
    point.floor().as_ivec3()
}

#[inline]
pub fn manhattan(a: IVec3, b: IVec3) -> i32 {
    let d = (a - b).abs();
    d.x + d.y + d.z
}

#[inline]
pub fn distance_xz(a: Vec3, b: Vec3) -> f32 {
    Vec2::new(a.x - b.x, a.z - b.z).length()
}

/// Wrap an angle into `[-PI, PI)`.
#[inline]
pub fn wrap_angle(angle: f32) -> f32 {
    (angle + PI).rem_euclid(TAU) - PI
}

/// Signed shortest rotation from `from` to `to`.
#[inline]
pub fn angle_delta(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

/// Yaw that faces along `(dx, dz)`.
#[inline]
pub fn yaw_toward(dx: f32, dz: f32) -> f32 {
    (-dx).atan2(-dz)
}

/// Pitch that looks along `dy` over a horizontal run, clamped to straight up/down.
#[inline]
pub fn pitch_toward(dy: f32, horizontal: f32) -> f32 {
    dy.atan2(horizontal).clamp(-FRAC_PI_2, FRAC_PI_2)
}

#[inline]
pub fn facing_vector(yaw: f32) -> Vec2 {
    Vec2::new(-yaw.sin(), -yaw.cos())
}
