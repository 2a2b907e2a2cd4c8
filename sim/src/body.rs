//! Kinematic voxel body that plays the agent in the headless host.
//!
//! Box collider swept through the terrain one axis at a time (Y, then X, then Z). A grounded
//! body blocked sideways retries the move lifted by [`STEP_HEIGHT`] and keeps whichever attempt
//! covered more ground, so slabs and carpets are walked onto while full blocks need a jump.

use bevy::prelude::*;
use navigator::{AgentState, MovementIntents, TerrainQuery};

pub const HALF_WIDTH: f32 = 0.3;
pub const HEIGHT: f32 = 1.8;

/// Walking speed in blocks/s.
pub const WALK_SPEED: f32 = 4.3;
pub const CROUCH_FACTOR: f32 = 0.3;

/// Horizontal acceleration in blocks/s^2.
pub const MOVE_ACCEL: f32 = 45.0;

/// Horizontal deceleration without input in blocks/s^2.
pub const MOVE_BRAKE: f32 = 55.0;

/// Gravity in blocks/s^2 (negative Y).
pub const GRAVITY: f32 = -32.0;
pub const TERMINAL_VELOCITY: f32 = 60.0;

/// Jump velocity in blocks/s. Clears a full block with room to spare.
pub const JUMP_VELOCITY: f32 = 10.0;

/// Tallest ledge climbed without jumping.
pub const STEP_HEIGHT: f32 = 0.6;

/// Contact slack so bodies resting flush on a face do not sink through it.
const CONTACT_EPS: f32 = 1.0e-4;

#[derive(Component, Debug, Clone, PartialEq)]
pub struct Body {
    /// Feet position (bottom center of the box).
    pub position: Vec3,
    pub velocity: Vec3,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

impl Body {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            yaw: 0.0,
            pitch: 0.0,
            on_ground: false,
        }
    }

    pub fn agent_state(&self, tick: u64) -> AgentState {
        AgentState {
            position: self.position,
            velocity: self.velocity,
            yaw: self.yaw,
            pitch: self.pitch,
            on_ground: self.on_ground,
            height: HEIGHT,
            tick,
        }
    }
}

/// Advance the body one fixed tick under the given intents.
pub fn step_body<W: TerrainQuery + ?Sized>(body: &mut Body, intents: &MovementIntents, world: &W, dt: f32) {
    // --- Facing ---
    if let Some(facing) = intents.facing {
        body.yaw = facing.yaw;
        body.pitch = facing.pitch;
    }

    // --- Desired horizontal movement ---
    let forward = Vec3::new(-body.yaw.sin(), 0.0, -body.yaw.cos());
    let right = Vec3::new(body.yaw.cos(), 0.0, -body.yaw.sin());

    let mut move_dir = Vec3::ZERO;
    if intents.advance {
        move_dir += forward;
    }
    if intents.retreat {
        move_dir -= forward;
    }
    if intents.strafe_right {
        move_dir += right;
    }
    if intents.strafe_left {
        move_dir -= right;
    }
    let move_dir = move_dir.normalize_or_zero();

    let speed = if intents.crouch { WALK_SPEED * CROUCH_FACTOR } else { WALK_SPEED };
    let desired = move_dir * speed;
    let horiz = Vec3::new(body.velocity.x, 0.0, body.velocity.z);
    let accel = if move_dir == Vec3::ZERO { MOVE_BRAKE } else { MOVE_ACCEL };
    let horiz = move_toward(horiz, desired, accel * dt);
    body.velocity.x = horiz.x;
    body.velocity.z = horiz.z;

    // --- Jump ---
    if intents.jump && body.on_ground && body.velocity.y < 1.0 {
        body.velocity.y = JUMP_VELOCITY;
        body.on_ground = false;
    }

    // --- Gravity ---
    body.velocity.y = (body.velocity.y + GRAVITY * dt).max(-TERMINAL_VELOCITY);

    // --- Collide ---
    let motion = body.velocity * dt;
    let hit = move_and_collide(world, body.position, motion, body.on_ground);
    body.position = hit.position;
    if hit.blocked.x {
        body.velocity.x = 0.0;
    }
    if hit.blocked.y {
        body.velocity.y = 0.0;
    }
    if hit.blocked.z {
        body.velocity.z = 0.0;
    }
    body.on_ground = hit.on_ground;
}

fn move_toward(current: Vec3, target: Vec3, max_change: f32) -> Vec3 {
    let delta = target - current;
    let len = delta.length();
    if len <= max_change {
        target
    } else {
        current + delta * (max_change / len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collision {
    pub position: Vec3,
    /// Axes whose motion was cut short.
    pub blocked: BVec3,
    pub on_ground: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    fn body(feet: Vec3) -> Self {
        Self {
            min: feet - Vec3::new(HALF_WIDTH, 0.0, HALF_WIDTH),
            max: feet + Vec3::new(HALF_WIDTH, HEIGHT, HALF_WIDTH),
        }
    }

    fn offset(self, delta: Vec3) -> Self {
        Self {
            min: self.min + delta,
            max: self.max + delta,
        }
    }

    fn swept(self, motion: Vec3) -> Self {
        Self {
            min: self.min.min(self.min + motion),
            max: self.max.max(self.max + motion),
        }
    }

    fn feet(&self) -> Vec3 {
        Vec3::new((self.min.x + self.max.x) * 0.5, self.min.y, (self.min.z + self.max.z) * 0.5)
    }

    fn overlaps(&self, other: &Aabb, axis: usize) -> bool {
        self.max[axis] > other.min[axis] + CONTACT_EPS && self.min[axis] < other.max[axis] - CONTACT_EPS
    }

    /// `delta` along `axis`, shortened so this box stops at `block`'s face.
    fn clip(&self, block: &Aabb, axis: usize, delta: f32) -> f32 {
        let (a, b) = ((axis + 1) % 3, (axis + 2) % 3);
        if !(self.overlaps(block, a) && self.overlaps(block, b)) {
            return delta;
        }
        if delta > 0.0 && self.max[axis] <= block.min[axis] + CONTACT_EPS {
            delta.min(block.min[axis] - self.max[axis])
        } else if delta < 0.0 && self.min[axis] >= block.max[axis] - CONTACT_EPS {
            delta.max(block.max[axis] - self.min[axis])
        } else {
            delta
        }
    }
}

fn collect_boxes<W: TerrainQuery + ?Sized>(world: &W, region: Aabb) -> Vec<Aabb> {
    let lo = (region.min - Vec3::splat(CONTACT_EPS)).floor().as_ivec3();
    let hi = (region.max + Vec3::splat(CONTACT_EPS)).floor().as_ivec3();
    let mut out = Vec::new();
    for y in lo.y..=hi.y {
        for z in lo.z..=hi.z {
            for x in lo.x..=hi.x {
                let cell = IVec3::new(x, y, z);
                if let Some(ext) = world.extents_or_full(cell) {
                    let base = cell.as_vec3();
                    out.push(Aabb {
                        min: base + Vec3::new(0.0, ext.min_y, 0.0),
                        max: base + Vec3::new(1.0, ext.max_y, 1.0),
                    });
                }
            }
        }
    }
    out
}

/// Move `bb` by `motion` one axis at a time; returns the final box and the motion applied.
fn slide(mut bb: Aabb, motion: Vec3, boxes: &[Aabb]) -> (Aabb, Vec3) {
    let mut applied = Vec3::ZERO;
    for axis in [1, 0, 2] {
        let delta = boxes.iter().fold(motion[axis], |d, block| bb.clip(block, axis, d));
        let mut step = Vec3::ZERO;
        step[axis] = delta;
        bb = bb.offset(step);
        applied[axis] = delta;
    }
    (bb, applied)
}

pub fn move_and_collide<W: TerrainQuery + ?Sized>(
    world: &W,
    feet: Vec3,
    motion: Vec3,
    was_on_ground: bool,
) -> Collision {
    let start = Aabb::body(feet);
    let region = start
        .swept(motion)
        .swept(Vec3::new(0.0, STEP_HEIGHT, 0.0));
    let boxes = collect_boxes(world, region);

    let (mut bb, mut applied) = slide(start, motion, &boxes);
    let landed = motion.y < 0.0 && applied.y > motion.y;
    let blocked_sideways = applied.x != motion.x || applied.z != motion.z;

    // --- Auto-step ---
    if (was_on_ground || landed) && blocked_sideways {
        let (lifted, rise) = slide(start, Vec3::new(0.0, STEP_HEIGHT, 0.0), &boxes);
        let (moved, across) = slide(lifted, Vec3::new(motion.x, 0.0, motion.z), &boxes);
        let (settled, fall) = slide(moved, Vec3::new(0.0, -rise.y, 0.0), &boxes);
        let stepped_dist = across.x * across.x + across.z * across.z;
        let flat_dist = applied.x * applied.x + applied.z * applied.z;
        if stepped_dist > flat_dist + 1.0e-6 {
            bb = settled;
            applied = Vec3::new(across.x, rise.y + fall.y, across.z);
        }
    }

    let blocked = BVec3::new(applied.x != motion.x, applied.y != motion.y, applied.z != motion.z);
    let position = bb.feet();
    let mut on_ground = motion.y < 0.0 && blocked.y;
    if !on_ground && motion.y <= 0.0 {
        let probe = Aabb {
            min: position - Vec3::new(HALF_WIDTH, 0.02, HALF_WIDTH),
            max: position + Vec3::new(HALF_WIDTH, -0.001, HALF_WIDTH),
        };
        on_ground = collect_boxes(world, probe).iter().any(|block| {
            (0..3).all(|axis| probe.max[axis] > block.min[axis] && probe.min[axis] < block.max[axis])
        });
    }

    Collision {
        position,
        blocked,
        on_ground,
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use navigator::{Block, Facing, VoxelWorld};

    use super::*;

    const DT: f32 = 0.05;

    fn floor() -> VoxelWorld {
        VoxelWorld::flat(IVec2::new(-8, -8), IVec2::new(16, 8), 63)
    }

    fn east() -> MovementIntents {
        MovementIntents {
            advance: true,
            facing: Some(Facing {
                yaw: -FRAC_PI_2,
                pitch: 0.0,
            }),
            ..MovementIntents::IDLE
        }
    }

    fn run(body: &mut Body, intents: &MovementIntents, world: &VoxelWorld, ticks: usize) {
        for _ in 0..ticks {
            step_body(body, intents, world, DT);
        }
    }

    #[test]
    fn test_falls_and_rests_on_floor() {
        let world = floor();
        let mut body = Body::new(Vec3::new(0.5, 67.0, 0.5));
        run(&mut body, &MovementIntents::IDLE, &world, 40);
        assert!((body.position.y - 64.0).abs() < 1.0e-3, "{}", body.position);
        assert!(body.on_ground);
        assert_eq!(body.velocity.y, 0.0);

        run(&mut body, &MovementIntents::IDLE, &world, 100);
        assert!((body.position.y - 64.0).abs() < 1.0e-3);
    }

    #[test]
    fn test_walks_at_walking_speed() {
        let world = floor();
        let mut body = Body::new(Vec3::new(0.5, 64.0, 0.5));
        body.on_ground = true;
        run(&mut body, &east(), &world, 20);
        let travelled = body.position.x - 0.5;
        assert!(travelled > 3.8 && travelled < WALK_SPEED, "{travelled}");
        assert!((body.position.z - 0.5).abs() < 1.0e-3);
        assert!((body.velocity.x - WALK_SPEED).abs() < 1.0e-3);
    }

    #[test]
    fn test_crouch_slows_walking() {
        let world = floor();
        let mut body = Body::new(Vec3::new(0.5, 64.0, 0.5));
        body.on_ground = true;
        let crouched = MovementIntents { crouch: true, ..east() };
        run(&mut body, &crouched, &world, 20);
        assert!(body.position.x - 0.5 < WALK_SPEED * CROUCH_FACTOR + 0.01);
    }

    #[test]
    fn test_wall_stops_the_body() {
        let mut world = floor();
        world.fill(IVec3::new(3, 64, -2), IVec3::new(3, 65, 2), Block::Solid);
        let mut body = Body::new(Vec3::new(0.5, 64.0, 0.5));
        body.on_ground = true;
        run(&mut body, &east(), &world, 30);
        assert!((body.position.x - (3.0 - HALF_WIDTH)).abs() < 1.0e-3, "{}", body.position);
        assert!((body.position.y - 64.0).abs() < 1.0e-3);
        assert_eq!(body.velocity.x, 0.0);
    }

    #[test]
    fn test_slab_is_climbed_without_jumping() {
        let mut world = floor();
        world.fill(IVec3::new(3, 64, -2), IVec3::new(8, 64, 2), Block::BottomSlab);
        let mut body = Body::new(Vec3::new(0.5, 64.0, 0.5));
        body.on_ground = true;
        run(&mut body, &east(), &world, 25);
        assert!(body.position.x > 4.0, "{}", body.position);
        assert!((body.position.y - 64.5).abs() < 1.0e-3);
    }

    #[test]
    fn test_full_block_needs_a_jump() {
        let mut world = floor();
        world.fill(IVec3::new(3, 64, -2), IVec3::new(8, 64, 2), Block::Solid);
        let mut body = Body::new(Vec3::new(0.5, 64.0, 0.5));
        body.on_ground = true;
        run(&mut body, &east(), &world, 25);
        assert!(body.position.x < 3.0);
        assert!((body.position.y - 64.0).abs() < 1.0e-3);

        let jumping = MovementIntents { jump: true, ..east() };
        run(&mut body, &jumping, &world, 4);
        run(&mut body, &east(), &world, 20);
        assert!(body.position.x > 4.0, "{}", body.position);
        assert!((body.position.y - 65.0).abs() < 1.0e-3);
        assert!(body.on_ground);
    }

    #[test]
    fn test_unloaded_space_is_solid() {
        let mut world = floor();
        world.set_bounds(IVec3::new(-8, 60, -8), IVec3::new(4, 70, 8));
        let mut body = Body::new(Vec3::new(0.5, 64.0, 0.5));
        body.on_ground = true;
        run(&mut body, &east(), &world, 40);
        assert!((body.position.x - (5.0 - HALF_WIDTH)).abs() < 1.0e-3, "{}", body.position);
    }
}
