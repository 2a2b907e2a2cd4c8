//! Aim point selection.
//!
//! Picks the farthest path node ahead that the agent can walk to in a straight line: three body
//! rays (feet, mid-body, eye) must be unobstructed and the straight walk must stay on standable
//! ground close to the path. The choice is cached for a few ticks so the facing does not jitter.

use bevy::prelude::*;

use crate::agent::cell_center;
use crate::config::SteeringConfig;
use crate::terrain::TerrainQuery;

#[derive(Debug, Clone, Default)]
pub struct SteeringSelector {
    cached: Option<IVec3>,
    cooldown: u32,
}

impl SteeringSelector {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn cached(&self) -> Option<IVec3> {
        self.cached
    }

    /// Rate-limited aim node. Re-selects once the cooldown has elapsed.
    pub fn select<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        feet: Vec3,
        path: &[IVec3],
        start_index: usize,
        config: &SteeringConfig,
    ) -> Option<IVec3> {
        if self.cooldown > 0 && self.cached.is_some() {
            self.cooldown -= 1;
            return self.cached;
        }

        let fresh = select_line_of_sight_target(world, feet, path, start_index, config)?;
        if self.cached != Some(fresh) {
            trace!("aim node {:?} -> {fresh}", self.cached);
        }
        self.cached = Some(fresh);
        self.cooldown = config.retarget_cooldown_ticks;
        self.cached
    }
}

/// Farthest node from `start_index` within the lookahead that passes both the body ray and the
/// corridor test, stopping at the first failure.
pub fn select_line_of_sight_target<W: TerrainQuery + ?Sized>(
    world: &W,
    feet: Vec3,
    path: &[IVec3],
    start_index: usize,
    config: &SteeringConfig,
) -> Option<IVec3> {
    let last = path.len().checked_sub(1)?;
    let start = start_index.min(last);
    let end = (start + config.lookahead_nodes).min(last);

    let mut best = path[start];
    for i in start..=end {
        let candidate = path[i];
        if !has_body_line_of_sight(world, feet, candidate, config) {
            break;
        }
        if !is_corridor_safe(world, feet, path, start, i, config) {
            break;
        }
        best = candidate;
    }
    Some(best)
}

/// Feet, mid-body and eye rays to the matching heights above the target's walk surface.
pub fn has_body_line_of_sight<W: TerrainQuery + ?Sized>(
    world: &W,
    feet: Vec3,
    target: IVec3,
    config: &SteeringConfig,
) -> bool {
    let center = cell_center(target);
    let surface = world.walk_surface_height(target).max(target.y as f32);
    [config.feet_height, config.body_height, config.eye_height]
        .into_iter()
        .all(|h| {
            let from = Vec3::new(feet.x, feet.y + h, feet.z);
            let to = Vec3::new(center.x, surface + h, center.z);
            world.segment_clear(from, to)
        })
}

/// Walking straight at `path[candidate]` keeps every sample on standable ground and within the
/// corridor tolerance of `path[start..=candidate]`.
pub fn is_corridor_safe<W: TerrainQuery + ?Sized>(
    world: &W,
    feet: Vec3,
    path: &[IVec3],
    start: usize,
    candidate: usize,
    config: &SteeringConfig,
) -> bool {
    let target = cell_center(path[candidate]);
    let delta = Vec2::new(target.x - feet.x, target.z - feet.z);
    let dist = delta.length();
    if dist < 1e-6 {
        return true;
    }

    let samples = (dist / config.corridor_sample_step).ceil() as usize;
    let feet_y = (feet.y + 0.01).floor() as i32;
    let (lo, hi) = (start.min(candidate), start.max(candidate));

    (1..=samples).all(|s| {
        let p = Vec2::new(feet.x, feet.z) + delta * (s as f32 / samples as f32);
        let cell = IVec3::new(p.x.floor() as i32, feet_y, p.y.floor() as i32);
        world.is_standable(cell) && distance_to_path_xz(p, &path[lo..=hi]) <= config.corridor_max_dist
    })
}

fn distance_to_path_xz(p: Vec2, nodes: &[IVec3]) -> f32 {
    nodes
        .iter()
        .map(|c| p.distance(Vec2::new(c.x as f32 + 0.5, c.z as f32 + 0.5)))
        .fold(f32::INFINITY, f32::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::{Block, VoxelWorld};

    fn plane() -> VoxelWorld {
        VoxelWorld::flat(IVec2::new(-10, -10), IVec2::new(30, 10), 63)
    }

    #[test]
    fn test_straight_path_sees_to_lookahead_cap() {
        let world = plane();
        let config = SteeringConfig::default();
        let path: Vec<IVec3> = (0..30).map(|x| IVec3::new(x, 64, 0)).collect();
        let aim = select_line_of_sight_target(&world, Vec3::new(0.5, 64.0, 0.5), &path, 0, &config);
        assert_eq!(aim, Some(path[config.lookahead_nodes]));
    }

    #[test]
    fn test_corner_limits_aim() {
        let mut world = plane();
        // Wall south of the path's first leg; the path turns around its end.
        world.fill(IVec3::new(-10, 64, 1), IVec3::new(4, 66, 1), Block::Solid);
        let config = SteeringConfig::default();
        let mut path: Vec<IVec3> = (0..=5).map(|x| IVec3::new(x, 64, 0)).collect();
        path.extend((1..=6).map(|z| IVec3::new(5, 64, z)));

        let aim = select_line_of_sight_target(&world, Vec3::new(0.5, 64.0, 0.5), &path, 0, &config).unwrap();
        let aim_index = path.iter().position(|c| *c == aim).unwrap();
        assert!(aim_index <= 5, "aimed around the corner at {aim}");
        assert!(aim_index >= 4);
    }

    #[test]
    fn test_ledge_stops_aim_at_lead_node() {
        let mut world = plane();
        world.fill(IVec3::new(5, 64, -10), IVec3::new(30, 64, 10), Block::Solid);
        let config = SteeringConfig::default();
        let mut path: Vec<IVec3> = (0..5).map(|x| IVec3::new(x, 64, 0)).collect();
        path.extend((5..10).map(|x| IVec3::new(x, 65, 0)));

        let aim = select_line_of_sight_target(&world, Vec3::new(1.5, 64.0, 0.5), &path, 1, &config);
        assert_eq!(aim, Some(IVec3::new(4, 64, 0)));
    }

    #[test]
    fn test_selector_cooldown_holds_cached_target() {
        let mut world = plane();
        let config = SteeringConfig::default();
        let path: Vec<IVec3> = (0..10).map(|x| IVec3::new(x, 64, 0)).collect();
        let mut selector = SteeringSelector::default();

        let first = selector.select(&world, Vec3::new(0.5, 64.0, 0.5), &path, 0, &config);
        assert_eq!(first, Some(IVec3::new(9, 64, 0)));

        // A new obstruction appears; the cached target survives the cooldown.
        world.set(IVec3::new(5, 64, 0), Block::Solid);
        for _ in 0..config.retarget_cooldown_ticks {
            assert_eq!(selector.select(&world, Vec3::new(0.5, 64.0, 0.5), &path, 0, &config), first);
        }
        let refreshed = selector.select(&world, Vec3::new(0.5, 64.0, 0.5), &path, 0, &config);
        assert_eq!(refreshed, Some(IVec3::new(4, 64, 0)));
    }
}
