use std::process::ExitCode;

use formation::MapGroups;
use tracing::info;

use super::bootstrap::AppWiring;
use super::scenario::{apply_action, log_snapshot};
use super::sim_world::SimWorld;

pub(crate) struct SimOutcome {
    pub(crate) groups: MapGroups,
    pub(crate) world: SimWorld,
    pub(crate) ticks: u32,
    pub(crate) steps_applied: usize,
}

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let outcome = run_simulation(app);
    for group in outcome.groups.groups() {
        log_snapshot(&outcome.groups, group.guid());
    }
    info!(
        ticks = outcome.ticks,
        steps_applied = outcome.steps_applied,
        groups = outcome.groups.len(),
        alive = outcome.world.alive_count(),
        "sim_finished"
    );
    ExitCode::SUCCESS
}

/// Spawns the map, then advances groups and world in fixed ticks, applying
/// scenario steps as their time comes due.
pub(crate) fn run_simulation(app: AppWiring) -> SimOutcome {
    let AppWiring {
        config,
        mut groups,
        mut world,
    } = app;

    let spawned = world.spawn_all();
    for guid in &spawned {
        world.start_default_movement(*guid);
        groups.on_entity_added(&mut world, *guid);
    }
    info!(
        map = config.map_id,
        spawned = spawned.len(),
        groups = groups.len(),
        "sim_map_populated"
    );

    let mut steps = config.scenario.clone();
    steps.sort_by_key(|step| step.at_ms);
    let mut pending = steps.into_iter().peekable();

    let tick_ms = config.tick_ms.max(1);
    let mut elapsed_ms = 0_u32;
    let mut ticks = 0_u32;
    let mut steps_applied = 0_usize;
    while elapsed_ms < config.duration_ms {
        while let Some(step) = pending.next_if(|step| step.at_ms <= elapsed_ms) {
            apply_action(&mut groups, &mut world, &step.action);
            steps_applied += 1;
        }

        groups.update(&mut world, tick_ms);
        let requests = groups.drain_follow_requests();
        world.apply_follow_requests(&requests);
        world.tick(tick_ms);

        elapsed_ms = elapsed_ms.saturating_add(tick_ms);
        ticks += 1;
    }

    SimOutcome {
        groups,
        world,
        ticks,
        steps_applied,
    }
}
