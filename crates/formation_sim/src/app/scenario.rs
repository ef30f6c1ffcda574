use formation::{GroupGuid, GroupRegistryError, MapGroups};
use tracing::{info, warn};

use super::sim_config::ScenarioAction;
use super::sim_world::SimWorld;

/// Applies one scripted action to the world and routes the matching
/// lifecycle hook to the map's groups.
pub(crate) fn apply_action(groups: &mut MapGroups, world: &mut SimWorld, action: &ScenarioAction) {
    match *action {
        ScenarioAction::Kill { guid } => {
            if world.kill(guid) {
                groups.on_entity_died(&*world, guid);
                info!(guid = guid.0, "scenario_killed");
            } else {
                warn!(guid = guid.0, "scenario_kill_ignored");
            }
        }
        ScenarioAction::Respawn { guid } => {
            if world.respawn(guid) {
                groups.on_entity_respawned(world, guid);
                info!(guid = guid.0, "scenario_respawned");
            } else {
                warn!(guid = guid.0, "scenario_respawn_ignored");
            }
        }
        ScenarioAction::Summon { guid, near } => {
            if world.summon(guid, near) {
                groups.on_entity_added(world, guid);
                info!(guid = guid.0, near = near.0, "scenario_summoned");
            } else {
                warn!(guid = guid.0, near = near.0, "scenario_summon_ignored");
            }
        }
        ScenarioAction::Despawn { guid } => {
            groups.on_entity_removed(&*world, guid);
            world.remove(guid);
            info!(guid = guid.0, "scenario_despawned");
        }
        ScenarioAction::CreateGroup { master } => {
            log_registry_result("create_group", groups.create_dynamic_group(&*world, master));
        }
        ScenarioAction::AddMember { master, member } => {
            log_registry_result("add_member", groups.add_member(world, master, member));
        }
        ScenarioAction::SetFormation { master, shape } => {
            let shape = shape.unwrap_or(groups.services().config().dynamic_shape);
            log_registry_result("set_formation", groups.set_formation_shape(world, master, shape));
        }
        ScenarioAction::SwitchFormation { group, shape } => {
            let accepted = groups.switch_formation(group, shape);
            info!(group = group.0, shape, accepted, "scenario_switch_formation");
        }
        ScenarioAction::SetNewMaster { group, candidate } => {
            let accepted = groups.set_new_master(world, group, candidate);
            info!(
                group = group.0,
                candidate = candidate.0,
                accepted,
                "scenario_set_new_master"
            );
        }
        ScenarioAction::Mirror { group, mirrored } => {
            let applied = groups.with_formation(group, |engine, slots| {
                if mirrored {
                    engine.on_waypoint_end(slots);
                } else {
                    engine.on_waypoint_start(slots);
                }
            });
            info!(group = group.0, mirrored, applied = applied.is_some(), "scenario_mirror");
        }
        ScenarioAction::Compact { group } => {
            let applied = groups.with_formation(group, |engine, slots| engine.compact(slots, &*world));
            info!(group = group.0, applied = applied.is_some(), "scenario_compact");
        }
        ScenarioAction::Reset { group } => {
            let applied = groups.with_formation(group, |engine, _| engine.reset());
            info!(group = group.0, applied = applied.is_some(), "scenario_reset");
        }
        ScenarioAction::Disband { group } => {
            log_registry_result(
                "disband",
                groups.disband_formation(world, group).map(|()| group),
            );
        }
        ScenarioAction::Snapshot { group } => log_snapshot(groups, group),
    }
}

fn log_registry_result(action: &'static str, result: Result<GroupGuid, GroupRegistryError>) {
    match result {
        Ok(group) => info!(action, group = group.0, "scenario_group_action"),
        Err(error) => warn!(action, error = %error, "scenario_group_action_rejected"),
    }
}

pub(crate) fn log_snapshot(groups: &MapGroups, group: GroupGuid) {
    let Some(snapshot) = groups.snapshot(group) else {
        warn!(group = group.0, "group_snapshot_unknown_group");
        return;
    };
    match serde_json::to_string(&snapshot) {
        Ok(json) => info!(group = group.0, snapshot = %json, "group_snapshot"),
        Err(error) => warn!(group = group.0, error = %error, "group_snapshot_encode_failed"),
    }
}

#[cfg(test)]
mod tests {
    use formation::{EntityAccess, EntityGuid, FormationShape, MapId, MemberKind};

    use super::*;
    use crate::app::test_support::test_app;

    #[test]
    fn dynamic_group_actions_flow_through_the_registry() {
        let mut app = test_app(Vec::new());
        let groups = &mut app.groups;
        let world = &mut app.world;
        for guid in world.spawn_all() {
            groups.on_entity_added(world, guid);
        }

        for action in [
            ScenarioAction::CreateGroup {
                master: EntityGuid(10),
            },
            ScenarioAction::AddMember {
                master: EntityGuid(10),
                member: EntityGuid(11),
            },
            ScenarioAction::SetFormation {
                master: EntityGuid(10),
                shape: Some(FormationShape::SideBySide),
            },
            ScenarioAction::Summon {
                guid: EntityGuid(50),
                near: EntityGuid(10),
            },
            ScenarioAction::AddMember {
                master: EntityGuid(10),
                member: EntityGuid(50),
            },
        ] {
            apply_action(groups, world, &action);
        }

        let group = groups
            .get_group_for_entity(EntityGuid(50), MapId(0))
            .expect("group");
        let guid = group.guid();
        assert_eq!(group.slots().len(), 3);
        assert_eq!(
            world.member_kind(EntityGuid(50)),
            Some(MemberKind::Creature { temp_summon: true })
        );

        apply_action(groups, world, &ScenarioAction::Despawn { guid: EntityGuid(50) });
        assert!(groups.get_group_for_entity(EntityGuid(50), MapId(0)).is_none());
        assert_eq!(groups.group(guid).expect("group").slots().len(), 2);

        apply_action(groups, world, &ScenarioAction::Disband { group: guid });
        assert!(groups.group(guid).expect("group").formation().is_none());
    }

    #[test]
    fn rejected_actions_leave_groups_untouched() {
        let mut app = test_app(Vec::new());
        let groups = &mut app.groups;
        let world = &mut app.world;
        world.spawn_all();

        apply_action(
            groups,
            world,
            &ScenarioAction::AddMember {
                master: EntityGuid(10),
                member: EntityGuid(11),
            },
        );
        apply_action(groups, world, &ScenarioAction::Kill { guid: EntityGuid(999) });
        assert_eq!(groups.len(), 1);
    }
}
