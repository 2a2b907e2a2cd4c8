//! Host systems: spawn agents, tick their navigators, move their bodies, report arrivals.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bevy::prelude::*;
use navigator::agent::{cell_center, distance_xz};
use navigator::{MovementIntents, Navigator, RotationLease, TerrainQuery};

use crate::body::{step_body, Body};
use crate::config::SimConfig;
use crate::visualize::LogVisualizer;
use crate::world::SimWorld;

/// Ticks between progress reports.
const PROGRESS_LOG_EVERY: u64 = 100;

#[derive(Component, Debug, Clone)]
pub struct AgentName(pub String);

/// Keys the navigator produced this tick, consumed by the body step.
#[derive(Component, Debug, Clone, Default)]
pub struct Intents(pub MovementIntents);

/// Set by the navigator's arrival callback.
#[derive(Component, Debug, Default)]
pub struct Arrival {
    flag: Arc<AtomicBool>,
    reported: bool,
}

#[derive(Resource, Debug, Default)]
pub struct SimClock {
    pub tick: u64,
}

pub fn spawn_agents(mut commands: Commands, config: Res<SimConfig>, world: Res<SimWorld>) {
    for spawn in &config.scenario {
        let Some(start) = world.ground_cell_near(IVec2::from(spawn.start)) else {
            warn!("{}: no walkable ground near {:?}, not spawned", spawn.name, spawn.start);
            continue;
        };
        let Some(goal) = world.goal_cell_near(IVec2::from(spawn.goal)) else {
            warn!("{}: no walkable ground near goal {:?}, not spawned", spawn.name, spawn.goal);
            continue;
        };

        let lease = RotationLease::new();
        let arrival = Arrival::default();
        let flag = Arc::clone(&arrival.flag);
        let built = Navigator::builder()
            .config(config.nav.clone())
            .owner(spawn.name.clone())
            .rotation_lease(lease.clone())
            .visualizer(LogVisualizer::new(spawn.name.clone()))
            .build();
        let mut navigator = match built {
            Ok(navigator) => navigator,
            Err(err) => {
                warn!("{}: {err}, not spawned", spawn.name);
                continue;
            }
        };
        navigator.set_on_arrived(move || flag.store(true, Ordering::Release));
        navigator.navigate_to_cell(goal);

        let mut body = Body::new(cell_center(start));
        body.position.y = world.voxels.walk_surface_height(start);
        info!("{}: spawned at {start}, heading for {goal}", spawn.name);
        commands.spawn((
            AgentName(spawn.name.clone()),
            body,
            Intents::default(),
            navigator,
            lease,
            arrival,
        ));
    }
}

pub fn drive_navigators(
    world: Res<SimWorld>,
    clock: Res<SimClock>,
    mut agents: Query<(&mut Navigator, &Body, &mut Intents)>,
) {
    for (mut navigator, body, mut intents) in agents.iter_mut() {
        let state = body.agent_state(clock.tick);
        intents.0 = navigator.tick(&state, &world.voxels);
    }
}

pub fn step_bodies(world: Res<SimWorld>, time: Res<Time>, mut bodies: Query<(&mut Body, &Intents)>) {
    let dt = time.delta_secs();
    for (mut body, intents) in bodies.iter_mut() {
        step_body(&mut body, &intents.0, &world.voxels, dt);
    }
}

pub fn report_arrivals(
    mut clock: ResMut<SimClock>,
    config: Res<SimConfig>,
    mut agents: Query<(&AgentName, &Body, &Navigator, &mut Arrival)>,
    mut exit: MessageWriter<AppExit>,
) {
    clock.tick += 1;
    let tick = clock.tick;

    for (name, body, navigator, mut arrival) in agents.iter_mut() {
        if !arrival.reported && arrival.flag.load(Ordering::Acquire) {
            arrival.reported = true;
            info!("{}: arrived at {} after {tick} ticks", name.0, body.position);
        } else if !arrival.reported && tick % PROGRESS_LOG_EVERY == 0 {
            let remaining = navigator
                .goal()
                .map(|goal| distance_xz(body.position, cell_center(goal)))
                .unwrap_or(0.0);
            debug!(
                "{}: at {} with {remaining:.1} blocks to go{}",
                name.0,
                body.position,
                if navigator.is_holding() { " (no route)" } else { "" }
            );
        }
    }

    if agents.iter().all(|(.., arrival)| arrival.reported) {
        info!("all agents arrived after {tick} ticks");
        exit.write(AppExit::Success);
    } else if tick >= config.max_ticks {
        for (name, body, navigator, arrival) in agents.iter() {
            if !arrival.reported {
                warn!("{}: still navigating at {} toward {:?}", name.0, body.position, navigator.goal());
            }
        }
        error!("tick budget of {} exhausted", config.max_ticks);
        exit.write(AppExit::error());
    }
}
