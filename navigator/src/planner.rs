//! Grid A* over standable voxel cells.
//!
//! Topology per horizontal direction, tried in order:
//! - same level, if the neighbor is standable
//! - step up one cell, if standable, jumpable and not blacklisted
//! - drop down up to `max_drop_down` cells, if the landing cell is standable and a bounded flood
//!   fill shows the agent could climb back to the origin height
//!
//! Diagonals require both orthogonal corner cells to be clear at body and head height.
//!
//! The search is bounded by an iteration cap and a Manhattan range; running out of either is
//! reported as an empty path, never as an error.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use bevy::prelude::*;

use crate::agent::manhattan;
use crate::config::PlannerConfig;
use crate::terrain::TerrainQuery;

const ORTHOGONAL: [IVec2; 4] = [IVec2::new(1, 0), IVec2::new(-1, 0), IVec2::new(0, 1), IVec2::new(0, -1)];

const ALL_DIRECTIONS: [IVec2; 8] = [
    IVec2::new(1, 0),
    IVec2::new(-1, 0),
    IVec2::new(0, 1),
    IVec2::new(0, -1),
    IVec2::new(1, 1),
    IVec2::new(1, -1),
    IVec2::new(-1, 1),
    IVec2::new(-1, -1),
];

const DIAGONAL_COST: f32 = 1.4142;

// =============================================================================
// EDGE BLACKLIST
// =============================================================================

/// Step-up edges that failed repeatedly during this navigation session.
#[derive(Debug, Clone, Default)]
pub struct EdgeBlacklist {
    edges: HashSet<(IVec3, IVec3)>,
}

impl EdgeBlacklist {
    pub fn insert(&mut self, from: IVec3, to: IVec3) -> bool {
        self.edges.insert((from, to))
    }

    #[inline]
    pub fn contains(&self, from: IVec3, to: IVec3) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn clear(&mut self) {
        self.edges.clear();
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// =============================================================================
// CANCELLATION
// =============================================================================

/// Cooperative cancellation flag, checked once per search iteration.
#[derive(Debug, Clone, Default)]
pub struct SearchCancel(Arc<AtomicBool>);

impl SearchCancel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::Relaxed)
    }
}

// =============================================================================
// EDGE CLASSIFICATION
// =============================================================================

/// How an agent has to traverse an edge between two path cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Level,
    StepUp,
    Drop,
}

pub fn classify_edge<W: TerrainQuery + ?Sized>(
    world: &W,
    from: IVec3,
    to: IVec3,
    config: &PlannerConfig,
) -> EdgeKind {
    let delta = world.walk_surface_height(to) - world.walk_surface_height(from);
    if to.y > from.y || (delta > config.step_no_jump_max && delta <= config.step_jump_max) {
        EdgeKind::StepUp
    } else if to.y < from.y || (delta >= -config.drop_max && delta < -config.step_no_jump_max) {
        EdgeKind::Drop
    } else {
        EdgeKind::Level
    }
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Clone, Copy, Debug)]
struct OpenNode {
    /// f-cost in thousandths, so the heap can order on integers.
    f_cost: i64,
    pos: IVec3,
}

impl Eq for OpenNode {}
impl PartialEq for OpenNode {
    fn eq(&self, other: &Self) -> bool {
        self.f_cost == other.f_cost && self.pos == other.pos
    }
}
impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse for min-heap behavior.
        other
            .f_cost
            .cmp(&self.f_cost)
            .then_with(|| other.pos.x.cmp(&self.pos.x))
            .then_with(|| other.pos.y.cmp(&self.pos.y))
            .then_with(|| other.pos.z.cmp(&self.pos.z))
    }
}
impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[inline]
fn to_milli(cost: f32) -> i64 {
    (cost * 1000.0).round() as i64
}

fn heuristic(a: IVec3, b: IVec3, config: &PlannerConfig) -> f32 {
    let d = (a - b).abs();
    (d.x + d.z) as f32 + d.y as f32 * config.vertical_heuristic_weight
}

/// Search a path from `start` to `goal`. Empty when no path exists within the limits.
pub fn find_path<W: TerrainQuery + ?Sized>(
    world: &W,
    start: IVec3,
    goal: IVec3,
    config: &PlannerConfig,
    blacklist: &EdgeBlacklist,
    cancel: Option<&SearchCancel>,
) -> Vec<IVec3> {
    if manhattan(start, goal) > config.max_range * 2 {
        trace!("search rejected: {start} -> {goal} exceeds twice the range");
        return Vec::new();
    }
    if !world.is_standable(start) || !world.is_standable(goal) {
        trace!("search rejected: endpoint not standable ({start} -> {goal})");
        return Vec::new();
    }
    if start == goal {
        return vec![start];
    }

    let mut open = BinaryHeap::new();
    let mut came_from: HashMap<IVec3, IVec3> = HashMap::new();
    let mut g_score: HashMap<IVec3, f32> = HashMap::new();
    let mut closed: HashSet<IVec3> = HashSet::new();

    g_score.insert(start, 0.0);
    open.push(OpenNode {
        f_cost: to_milli(heuristic(start, goal, config)),
        pos: start,
    });

    let mut iterations = 0_usize;
    while let Some(OpenNode { pos: current, .. }) = open.pop() {
        iterations += 1;
        if iterations > config.max_iterations {
            debug!("search exhausted {} iterations toward {goal}", config.max_iterations);
            return Vec::new();
        }
        if cancel.is_some_and(SearchCancel::is_cancelled) {
            debug!("search toward {goal} cancelled");
            return Vec::new();
        }

        if current == goal {
            let mut path = vec![current];
            let mut cur = current;
            while let Some(prev) = came_from.get(&cur).copied() {
                path.push(prev);
                cur = prev;
            }
            path.reverse();
            trace!("search found {} nodes in {iterations} iterations", path.len());
            return path;
        }

        if !closed.insert(current) {
            continue;
        }
        if manhattan(start, current) > config.max_range {
            continue;
        }

        let current_g = g_score.get(&current).copied().unwrap_or(f32::INFINITY);
        for (n, step_cost) in neighbors(world, current, config, blacklist) {
            if closed.contains(&n) {
                continue;
            }
            let tentative_g = current_g + step_cost + wall_penalty(world, n, config);
            if tentative_g < g_score.get(&n).copied().unwrap_or(f32::INFINITY) {
                came_from.insert(n, current);
                g_score.insert(n, tentative_g);
                open.push(OpenNode {
                    f_cost: to_milli(tentative_g + heuristic(n, goal, config)),
                    pos: n,
                });
            }
        }
    }

    Vec::new()
}

/// Penalty for each blocking orthogonal neighbor, discouraging wall hugging.
fn wall_penalty<W: TerrainQuery + ?Sized>(world: &W, cell: IVec3, config: &PlannerConfig) -> f32 {
    let solids = ORTHOGONAL
        .iter()
        .filter(|d| world.is_blocking(cell + IVec3::new(d.x, 0, d.y)))
        .count();
    solids as f32 * config.wall_penalty
}

/// Reachable neighbors of `origin` with their base traversal cost.
pub fn neighbors<W: TerrainQuery + ?Sized>(
    world: &W,
    origin: IVec3,
    config: &PlannerConfig,
    blacklist: &EdgeBlacklist,
) -> Vec<(IVec3, f32)> {
    let directions: &[IVec2] = if config.allow_diagonals {
        &ALL_DIRECTIONS
    } else {
        &ORTHOGONAL
    };
    let mut out = Vec::with_capacity(directions.len());

    for d in directions {
        let diagonal = d.x != 0 && d.y != 0;
        if diagonal && !can_move_diagonal(world, origin, *d) {
            continue;
        }
        let base = if diagonal { DIAGONAL_COST } else { 1.0 };

        let same = origin + IVec3::new(d.x, 0, d.y);
        if world.is_standable(same) {
            out.push((same, base));
            continue;
        }

        if config.allow_step_up {
            let up = same + IVec3::Y;
            if world.is_standable(up) {
                if can_step_up(world, origin, up, config) && !blacklist.contains(origin, up) {
                    let cost = if diagonal {
                        config.step_up_cost_diagonal
                    } else {
                        config.step_up_cost
                    };
                    out.push((up, cost));
                }
                continue;
            }
        }

        if config.allow_drop_down {
            if let Some(landing) = find_drop_landing(world, origin, same, config) {
                let drop = origin.y - landing.y;
                out.push((landing, base + drop as f32 * config.drop_cost_per_level));
            }
        }
    }

    out
}

/// Both corner cells of a diagonal move are clear for the body and head.
pub fn can_move_diagonal<W: TerrainQuery + ?Sized>(world: &W, origin: IVec3, d: IVec2) -> bool {
    let a = origin + IVec3::new(d.x, 0, 0);
    let b = origin + IVec3::new(0, 0, d.y);
    world.is_body_passable(a)
        && world.is_head_passable(a + IVec3::Y)
        && world.is_body_passable(b)
        && world.is_head_passable(b + IVec3::Y)
}

/// The rise from `origin` onto `up` is jumpable and there is headroom above the origin.
pub fn can_step_up<W: TerrainQuery + ?Sized>(world: &W, origin: IVec3, up: IVec3, config: &PlannerConfig) -> bool {
    let rise = world.walk_surface_height(up) - world.walk_surface_height(origin);
    rise <= config.step_jump_max && world.is_head_passable(origin + IVec3::Y * 2)
}

/// First standable cell below `column_top` the agent can fall into and climb back out of.
fn find_drop_landing<W: TerrainQuery + ?Sized>(
    world: &W,
    origin: IVec3,
    column_top: IVec3,
    config: &PlannerConfig,
) -> Option<IVec3> {
    if !world.is_head_passable(column_top + IVec3::Y) {
        return None;
    }
    for drop in 1..=config.max_drop_down.max(1) {
        let above = column_top - IVec3::Y * (drop - 1);
        if !world.is_body_passable(above) {
            return None;
        }
        let down = column_top - IVec3::Y * drop;
        if !world.is_standable(down) {
            continue;
        }
        if has_escape_back_up(world, down, origin.y, config) {
            return Some(down);
        }
    }
    None
}

/// Bounded flood fill over standable cells looking for any cell at or above `origin_y`.
pub fn has_escape_back_up<W: TerrainQuery + ?Sized>(
    world: &W,
    start: IVec3,
    origin_y: i32,
    config: &PlannerConfig,
) -> bool {
    if start.y >= origin_y {
        return true;
    }

    let mut queue = VecDeque::from([start]);
    let mut seen = HashSet::from([start]);
    let mut expanded = 0_usize;

    while let Some(cur) = queue.pop_front() {
        if expanded >= config.escape_search_limit {
            break;
        }
        expanded += 1;

        if cur.y >= origin_y {
            return true;
        }
        if manhattan(cur, start) > config.escape_search_radius {
            continue;
        }

        for d in ORTHOGONAL {
            for dy in [0, 1, -1] {
                let next = cur + IVec3::new(d.x, dy, d.y);
                if !seen.contains(&next) && world.is_standable(next) {
                    seen.insert(next);
                    queue.push_back(next);
                }
            }
        }
    }

    false
}
