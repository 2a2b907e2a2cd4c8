//! Log-backed visualization sink. Reports route changes as they happen instead of every frame.

use bevy::prelude::*;
use navigator::{NavFrame, VisualizationSink};

pub struct LogVisualizer {
    agent: String,
    /// Length and end node of the last path seen.
    path: Option<(usize, IVec3)>,
    checkpoints: Vec<IVec3>,
    target: Option<IVec3>,
}

impl LogVisualizer {
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            path: None,
            checkpoints: Vec::new(),
            target: None,
        }
    }
}

impl VisualizationSink for LogVisualizer {
    fn publish(&mut self, frame: &NavFrame<'_>) {
        let path = frame.raw_path.last().map(|end| (frame.raw_path.len(), *end));

        if path != self.path {
            if let Some((len, end)) = path {
                debug!("{}: following {len} nodes toward {end}", self.agent);
            }
            self.path = path;
        }
        if frame.checkpoints != self.checkpoints.as_slice() {
            debug!("{}: {} checkpoints {:?}", self.agent, frame.checkpoints.len(), frame.checkpoints);
            self.checkpoints = frame.checkpoints.to_vec();
        }
        if frame.target_cell != self.target {
            if let (Some(target), Some(aim)) = (frame.target_cell, frame.aim_point) {
                debug!("{}: stopping target {target}, aiming at {aim}", self.agent);
            }
            self.target = frame.target_cell;
        }
    }
}
