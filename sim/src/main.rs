//! Headless navigation host.
//!
//! Generates a voxel world, spawns the configured agents and runs their navigators against a
//! kinematic body at the navigator's tick rate until everyone arrives or the tick budget runs out.

mod body;
mod config;
mod systems;
mod visualize;
mod world;

use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::prelude::*;

use config::SimConfig;
use systems::SimClock;

fn main() -> AppExit {
    // Logging is not up yet; report config errors on stderr.
    let config = match SimConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("navsim: {err}");
            return AppExit::error();
        }
    };
    let tick = Duration::from_secs_f32(config.nav.tick_seconds());

    let mut app = App::new();

    // Run the main loop at the fixed tick rate.
    app.add_plugins(MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(tick)));
    app.add_plugins(bevy::log::LogPlugin::default());
    app.insert_resource(Time::<Fixed>::from_duration(tick));

    app.insert_resource(config);
    app.init_resource::<SimClock>();

    app.add_systems(Startup, (world::setup_world, systems::spawn_agents).chain());
    app.add_systems(
        FixedUpdate,
        (
            systems::drive_navigators,
            systems::step_bodies,
            systems::report_arrivals,
        )
            .chain(),
    );

    app.run()
}
