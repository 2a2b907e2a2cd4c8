//! Path execution tracking.
//!
//! [`PathTracker`] owns the active raw path and a progress cursor that only moves forward for the
//! lifetime of one path. [`ReplanScheduler`] decides when a fresh search is due.

use bevy::prelude::*;

use crate::agent::{cell_center, distance_xz};
use crate::config::{PlannerConfig, TrackerConfig};
use crate::planner::{classify_edge, EdgeKind};
use crate::terrain::TerrainQuery;

#[derive(Debug, Clone, Default)]
pub struct PathTracker {
    path: Vec<IVec3>,
    index: usize,
}

impl PathTracker {
    /// Install a freshly planned path and rewind the cursor.
    pub fn replace(&mut self, path: Vec<IVec3>) {
        self.path = path;
        self.index = 0;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn path(&self) -> &[IVec3] {
        &self.path
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    pub fn current(&self) -> Option<IVec3> {
        self.path.get(self.index).copied()
    }

    /// The edge leaving the current node.
    pub fn next_edge(&self) -> Option<(IVec3, IVec3)> {
        Some((self.current()?, *self.path.get(self.index + 1)?))
    }

    /// Advance the cursor toward the agent's feet. Never moves backward.
    pub fn update_progress<W: TerrainQuery + ?Sized>(
        &mut self,
        world: &W,
        feet: Vec3,
        config: &TrackerConfig,
        planner: &PlannerConfig,
    ) {
        if self.path.is_empty() {
            self.index = 0;
            return;
        }

        let last = self.path.len() - 1;
        let start = self.index.min(last);
        let end = (start + config.forward_window).min(last);

        let mut best = start;
        let mut best_d2 = f32::INFINITY;
        for i in start..=end {
            let c = cell_center(self.path[i]);
            let d2 = Vec2::new(c.x - feet.x, c.z - feet.z).length_squared();
            if d2 < best_d2 {
                best_d2 = d2;
                best = i;
            }
        }

        // The window may not jump across a step-up the agent has not climbed yet.
        if let Some(gate) = (start..best).find(|&i| self.is_ungated_step(world, i, feet, config, planner)) {
            best = gate;
        }
        if best > self.index {
            trace!("progress {} -> {best} (nearest in window)", self.index);
            self.index = best;
        }

        while self.index < last {
            let i = self.index;
            let prev = self.path[i.saturating_sub(1)];
            let cur = self.path[i];
            let next = self.path[i + 1];
            let near = distance_xz(feet, cell_center(cur));

            if classify_edge(world, cur, next, planner) == EdgeKind::StepUp {
                let climbed = feet.y >= world.walk_surface_height(next) - config.step_up_reached_eps;
                if climbed && near <= config.forgiving_advance_dist {
                    self.index += 1;
                    continue;
                }
                break;
            }

            if near <= config.forgiving_advance_dist
                || has_passed_node(feet, prev, next, config.pass_segment_fraction)
            {
                self.index += 1;
                continue;
            }
            break;
        }
    }

    /// Node `i` leads into a step-up whose top the feet have not reached.
    fn is_ungated_step<W: TerrainQuery + ?Sized>(
        &self,
        world: &W,
        i: usize,
        feet: Vec3,
        config: &TrackerConfig,
        planner: &PlannerConfig,
    ) -> bool {
        let (cur, next) = (self.path[i], self.path[i + 1]);
        classify_edge(world, cur, next, planner) == EdgeKind::StepUp
            && feet.y < world.walk_surface_height(next) - config.step_up_reached_eps
    }

    /// Nearest node in a short lookahead is farther than the drift threshold.
    pub fn is_off_path(&self, feet: Vec3, config: &TrackerConfig) -> bool {
        if self.path.is_empty() {
            return true;
        }
        let last = self.path.len() - 1;
        let start = self.index.min(last);
        let end = (start + config.offpath_lookahead_nodes).min(last);
        let best = self.path[start..=end]
            .iter()
            .map(|c| distance_xz(feet, cell_center(*c)))
            .fold(f32::INFINITY, f32::min);
        best > config.offpath_max_dist
    }
}

/// Projection of the feet onto `prev -> next` lies past `fraction` of the segment.
fn has_passed_node(feet: Vec3, prev: IVec3, next: IVec3, fraction: f32) -> bool {
    let a = Vec2::new(prev.x as f32 + 0.5, prev.z as f32 + 0.5);
    let b = Vec2::new(next.x as f32 + 0.5, next.z as f32 + 0.5);
    let ab = b - a;
    let len2 = ab.length_squared();
    if len2 < 1e-6 {
        return false;
    }
    (Vec2::new(feet.x, feet.z) - a).dot(ab) / len2 > fraction
}

// =============================================================================
// RE-PLAN SCHEDULING
// =============================================================================

/// Why a fresh plan is being requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplanReason {
    NewGoal,
    Cadence,
    OffPath,
    StepUpFailed,
    CheckpointReached,
    SegmentComplete,
}

#[derive(Debug, Clone, Default)]
pub struct ReplanScheduler {
    ticks_since_plan: u32,
    offpath_cooldown: u32,
    forced: Option<ReplanReason>,
}

impl ReplanScheduler {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Request a plan on the next evaluation. The first reason wins.
    pub fn force(&mut self, reason: ReplanReason) {
        self.forced.get_or_insert(reason);
    }

    pub fn is_forced(&self) -> bool {
        self.forced.is_some()
    }

    /// Evaluate all triggers for this tick. Counts the tick toward the cadence.
    pub fn evaluate(&mut self, tracker: &PathTracker, feet: Vec3, config: &TrackerConfig) -> Option<ReplanReason> {
        self.offpath_cooldown = self.offpath_cooldown.saturating_sub(1);

        let reason = if let Some(forced) = self.forced.take() {
            Some(forced)
        } else {
            self.ticks_since_plan += 1;
            if self.ticks_since_plan >= config.repath_every_ticks {
                Some(ReplanReason::Cadence)
            } else if self.offpath_cooldown == 0 && !tracker.is_empty() && tracker.is_off_path(feet, config) {
                self.offpath_cooldown = config.offpath_cooldown_ticks;
                Some(ReplanReason::OffPath)
            } else {
                None
            }
        };

        if reason.is_some() {
            self.ticks_since_plan = 0;
        }
        reason
    }
}
