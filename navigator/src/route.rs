//! Route segmentation: macro goals for distant targets, the straight-line shortcut, and sparse
//! checkpoints extracted from a raw path.

use bevy::prelude::*;

use crate::agent::{cell_center, manhattan};
use crate::config::{NavConfig, PlannerConfig, RouteConfig};
use crate::planner::{can_move_diagonal, can_step_up, find_path, EdgeBlacklist, SearchCancel};
use crate::terrain::TerrainQuery;

// =============================================================================
// SNAPPING
// =============================================================================

/// Nearest standable cell to the agent's feet, searching down first then up.
pub fn snap_start<W: TerrainQuery + ?Sized>(world: &W, feet: IVec3, max_vertical: i32) -> Option<IVec3> {
    if world.is_standable(feet) {
        return Some(feet);
    }
    (1..=max_vertical)
        .map(|dy| feet - IVec3::Y * dy)
        .chain((1..=max_vertical).map(|dy| feet + IVec3::Y * dy))
        .find(|c| world.is_standable(*c))
}

/// Expanding XZ ring search for a standable cell, each ring checking a small vertical window
/// (down before up).
pub fn snap_to_nearest_standable<W: TerrainQuery + ?Sized>(
    world: &W,
    around: IVec3,
    radius_xz: i32,
    radius_y: i32,
) -> Option<IVec3> {
    for r in 0..=radius_xz {
        for dx in -r..=r {
            let dz_abs = r - dx.abs();
            let sides = if dz_abs == 0 { 1 } else { 2 };
            for dz in [dz_abs, -dz_abs].into_iter().take(sides) {
                for dy in 0..=radius_y {
                    let down = around + IVec3::new(dx, -dy, dz);
                    if world.is_standable(down) {
                        return Some(down);
                    }
                    if dy != 0 {
                        let up = around + IVec3::new(dx, dy, dz);
                        if world.is_standable(up) {
                            return Some(up);
                        }
                    }
                }
            }
        }
    }
    None
}

// =============================================================================
// MACRO GOAL
// =============================================================================

/// Intermediate goal keeping each search inside the planner's range.
#[derive(Debug, Clone, Default)]
pub struct MacroGoal {
    current: Option<IVec3>,
}

impl MacroGoal {
    pub fn current(&self) -> Option<IVec3> {
        self.current
    }

    pub fn clear(&mut self) {
        self.current = None;
    }

    /// Goal of the active segment, or `None` when no standable intermediate could be found.
    pub fn ensure<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        start: IVec3,
        final_goal: IVec3,
        route: &RouteConfig,
        max_range: i32,
    ) -> Option<IVec3> {
        if manhattan(start, final_goal) <= route.macro_step {
            self.current = Some(final_goal);
            return self.current;
        }

        if let Some(existing) = self.current {
            let d = manhattan(start, existing);
            if (route.macro_retain_min_dist..=max_range).contains(&d) {
                return self.current;
            }
        }

        let s = cell_center(start);
        let g = cell_center(final_goal);
        let dir = Vec2::new(g.x - s.x, g.z - s.z);
        if dir.length() < 1e-6 {
            return Some(final_goal);
        }
        let approx = Vec2::new(s.x, s.z) + dir.normalize() * route.macro_step as f32;
        let approx_cell = IVec3::new(approx.x.floor() as i32, start.y, approx.y.floor() as i32);

        let Some(snapped) =
            snap_to_nearest_standable(world, approx_cell, route.macro_snap_radius, route.snap_max_vertical)
        else {
            debug!("no standable macro goal near {approx_cell}");
            return None;
        };
        if manhattan(start, snapped) > max_range {
            debug!("macro goal {snapped} is out of search range");
            return None;
        }

        debug!("macro goal {:?} -> {snapped}", self.current);
        self.current = Some(snapped);
        self.current
    }
}

// =============================================================================
// DIRECT LINE SHORTCUT
// =============================================================================

/// Every sample along the XZ line from `start` to `goal` has standable ground within one level.
pub fn is_direct_walkable<W: TerrainQuery + ?Sized>(
    world: &W,
    start: IVec3,
    goal: IVec3,
    route: &RouteConfig,
) -> bool {
    if (start.y - goal.y).abs() > 1 {
        return false;
    }

    let a = cell_center(start);
    let b = cell_center(goal);
    let len = Vec2::new(b.x - a.x, b.z - a.z).length();
    if len < 1e-6 {
        return true;
    }

    let steps = (len / route.direct_sample_step).ceil() as i32;
    (0..=steps).all(|i| {
        let t = i as f32 / steps as f32;
        let p = IVec3::new(
            (a.x + (b.x - a.x) * t).floor() as i32,
            start.y,
            (a.z + (b.z - a.z) * t).floor() as i32,
        );
        (-1..=1).any(|dy| world.is_standable(p + IVec3::Y * dy))
    })
}

/// Bresenham cells from `start` to `goal` on the XZ plane.
fn bresenham_xz(start: IVec3, goal: IVec3) -> Vec<IVec2> {
    let (x1, z1) = (goal.x, goal.z);
    let dx = (x1 - start.x).abs();
    let dz = (z1 - start.z).abs();
    let sx = if start.x < x1 { 1 } else { -1 };
    let sz = if start.z < z1 { 1 } else { -1 };
    let mut err = dx - dz;
    let (mut x, mut z) = (start.x, start.z);

    let mut out = vec![IVec2::new(x, z)];
    while x != x1 || z != z1 {
        let e2 = 2 * err;
        if e2 > -dz {
            err -= dz;
            x += sx;
        }
        if e2 < dx {
            err += dx;
            z += sz;
        }
        out.push(IVec2::new(x, z));
    }
    out
}

/// Straight path from `start` to `goal`, following the ground within one level per cell.
///
/// `None` if the line is not walkable, would cut a corner, climbs a blacklisted or unjumpable
/// step, or does not land exactly on the goal.
pub fn direct_line_path<W: TerrainQuery + ?Sized>(
    world: &W,
    start: IVec3,
    goal: IVec3,
    route: &RouteConfig,
    planner: &PlannerConfig,
    blacklist: &EdgeBlacklist,
) -> Option<Vec<IVec3>> {
    if !is_direct_walkable(world, start, goal, route) {
        return None;
    }

    let columns = bresenham_xz(start, goal);
    let mut path = Vec::with_capacity(columns.len());
    path.push(start);

    for column in columns.into_iter().skip(1) {
        let prev = *path.last()?;
        let d = IVec2::new(column.x - prev.x, column.y - prev.z);
        if d.x != 0 && d.y != 0 && !can_move_diagonal(world, prev, d) {
            return None;
        }

        let next = [0, 1, -1]
            .into_iter()
            .map(|dy| IVec3::new(column.x, prev.y + dy, column.y))
            .find(|c| world.is_standable(*c))?;

        if next.y > prev.y && (!can_step_up(world, prev, next, planner) || blacklist.contains(prev, next)) {
            return None;
        }
        path.push(next);
    }

    (path.last() == Some(&goal)).then_some(path)
}

// =============================================================================
// PLANNING ENTRY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    DirectLine,
    Search,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRoute {
    pub cells: Vec<IVec3>,
    pub source: RouteSource,
}

/// Shortcut first, A* otherwise. `None` means "no path, hold and retry later".
pub fn plan_route<W: TerrainQuery + ?Sized>(
    world: &W,
    start: IVec3,
    goal: IVec3,
    config: &NavConfig,
    blacklist: &EdgeBlacklist,
    cancel: Option<&SearchCancel>,
) -> Option<PlannedRoute> {
    if config.route.direct_path {
        if let Some(cells) = direct_line_path(world, start, goal, &config.route, &config.planner, blacklist) {
            return Some(PlannedRoute {
                cells,
                source: RouteSource::DirectLine,
            });
        }
    }

    let cells = find_path(world, start, goal, &config.planner, blacklist, cancel);
    if cells.is_empty() {
        return None;
    }
    Some(PlannedRoute {
        cells,
        source: RouteSource::Search,
    })
}

// =============================================================================
// CHECKPOINTS
// =============================================================================

/// Sparse waypoints on turns and at fixed spacing, never including `end`.
pub fn sparse_checkpoints(raw: &[IVec3], end: IVec3, route: &RouteConfig) -> Vec<IVec3> {
    if raw.len() < 3 {
        return Vec::new();
    }

    let mut checkpoints = Vec::new();
    let mut last_dir = IVec3::ZERO;
    let mut since_last = 0_usize;

    for i in 1..raw.len() - 1 {
        let dir = (raw[i] - raw[i - 1]).signum();
        let turn = i > 1 && dir != last_dir;
        let spaced = i % route.checkpoint_every_n_nodes == 0;

        since_last += 1;
        if (turn || spaced) && since_last >= route.min_nodes_between_checkpoints {
            checkpoints.push(raw[i]);
            since_last = 0;
        }
        last_dir = dir;
    }

    checkpoints.retain(|c| *c != end);

    if checkpoints.len() > route.max_checkpoints {
        let step = checkpoints.len() as f32 / route.max_checkpoints as f32;
        checkpoints = (0..route.max_checkpoints)
            .map(|i| checkpoints[(i as f32 * step).floor() as usize])
            .collect();
    }

    checkpoints
}

/// Checkpoints of the current raw path and the next one still to reach.
#[derive(Debug, Clone, Default)]
pub struct CheckpointList {
    points: Vec<IVec3>,
    index: usize,
}

impl CheckpointList {
    pub fn replace(&mut self, points: Vec<IVec3>) {
        self.points = points;
        self.index = 0;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    /// Next unreached checkpoint, `None` once only the segment end remains.
    pub fn current(&self) -> Option<IVec3> {
        self.points.get(self.index).copied()
    }

    /// The checkpoint after the current one.
    pub fn following(&self) -> Option<IVec3> {
        self.points.get(self.index + 1).copied()
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1).min(self.points.len());
    }

    pub fn points(&self) -> &[IVec3] {
        &self.points
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
