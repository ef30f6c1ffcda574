use std::collections::HashMap;

use crate::world::{
    DefaultMovement, EntityAccess, EntityGuid, MapId, MemberKind, MovementExecutor, Position,
    RespawnAnchor, WaypointProgress,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MovementCommand {
    Follow {
        follower: EntityGuid,
        master: EntityGuid,
    },
    Roam {
        master: EntityGuid,
        anchor: RespawnAnchor,
    },
    Waypoints {
        master: EntityGuid,
        path_owner: EntityGuid,
        resume: Option<WaypointProgress>,
    },
    Clear(EntityGuid),
}

#[derive(Debug, Clone)]
pub struct TestEntity {
    pub kind: MemberKind,
    pub alive: bool,
    pub map: Option<MapId>,
    pub position: Position,
    pub movement: DefaultMovement,
    pub anchor: RespawnAnchor,
    pub progress: WaypointProgress,
}

/// In-memory world that records every movement command it receives.
#[derive(Debug, Default)]
pub struct TestWorld {
    pub entities: HashMap<EntityGuid, TestEntity>,
    pub commands: Vec<MovementCommand>,
    targets: HashMap<EntityGuid, EntityGuid>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an alive entity on map 0. Existing entities are left untouched.
    pub fn spawn(&mut self, guid: EntityGuid, kind: MemberKind) {
        self.entities.entry(guid).or_insert_with(|| TestEntity {
            kind,
            alive: true,
            map: Some(MapId(0)),
            position: Position::default(),
            movement: DefaultMovement::Idle,
            anchor: RespawnAnchor {
                position: Position::default(),
                radius: 5.0,
            },
            progress: WaypointProgress::default(),
        });
    }

    pub fn spawn_creature(&mut self, guid: EntityGuid) {
        self.spawn(guid, MemberKind::Creature { temp_summon: false });
    }

    pub fn spawn_player(&mut self, guid: EntityGuid) {
        self.spawn(guid, MemberKind::Player);
    }

    pub fn despawn(&mut self, guid: EntityGuid) {
        self.entities.remove(&guid);
        self.targets.remove(&guid);
    }

    pub fn kill(&mut self, guid: EntityGuid) {
        if let Some(entity) = self.entities.get_mut(&guid) {
            entity.alive = false;
        }
        self.targets.remove(&guid);
    }

    pub fn revive(&mut self, guid: EntityGuid) {
        if let Some(entity) = self.entities.get_mut(&guid) {
            entity.alive = true;
        }
    }

    pub fn set_map(&mut self, guid: EntityGuid, map: Option<MapId>) {
        if let Some(entity) = self.entities.get_mut(&guid) {
            entity.map = map;
        }
    }

    pub fn set_movement(&mut self, guid: EntityGuid, movement: DefaultMovement) {
        if let Some(entity) = self.entities.get_mut(&guid) {
            entity.movement = movement;
        }
    }

    pub fn set_position(&mut self, guid: EntityGuid, position: Position) {
        if let Some(entity) = self.entities.get_mut(&guid) {
            entity.position = position;
        }
    }

    pub fn set_waypoint_progress(&mut self, guid: EntityGuid, progress: WaypointProgress) {
        if let Some(entity) = self.entities.get_mut(&guid) {
            entity.progress = progress;
        }
    }

    pub fn follow_target(&self, guid: EntityGuid) -> Option<EntityGuid> {
        self.targets.get(&guid).copied()
    }

    pub fn follow_command_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|command| matches!(command, MovementCommand::Follow { .. }))
            .count()
    }
}

impl EntityAccess for TestWorld {
    fn member_kind(&self, guid: EntityGuid) -> Option<MemberKind> {
        self.entities.get(&guid).map(|entity| entity.kind)
    }

    fn is_alive(&self, guid: EntityGuid) -> bool {
        self.entities.get(&guid).is_some_and(|entity| entity.alive)
    }

    fn position(&self, guid: EntityGuid) -> Option<Position> {
        self.entities.get(&guid).map(|entity| entity.position)
    }

    fn map_id(&self, guid: EntityGuid) -> Option<MapId> {
        self.entities.get(&guid).and_then(|entity| entity.map)
    }

    fn default_movement(&self, guid: EntityGuid) -> DefaultMovement {
        self.entities
            .get(&guid)
            .map(|entity| entity.movement)
            .unwrap_or_default()
    }

    fn respawn_anchor(&self, guid: EntityGuid) -> Option<RespawnAnchor> {
        self.entities.get(&guid).map(|entity| entity.anchor)
    }

    fn waypoint_progress(&self, guid: EntityGuid) -> WaypointProgress {
        self.entities
            .get(&guid)
            .map(|entity| entity.progress)
            .unwrap_or_default()
    }

    fn relocate(&mut self, guid: EntityGuid, position: Position) {
        self.set_position(guid, position);
    }
}

impl MovementExecutor for TestWorld {
    fn follow_in_formation(&mut self, follower: EntityGuid, master: EntityGuid) {
        self.targets.insert(follower, master);
        self.commands
            .push(MovementCommand::Follow { follower, master });
    }

    fn roam_around(&mut self, master: EntityGuid, anchor: RespawnAnchor) {
        self.targets.remove(&master);
        self.commands.push(MovementCommand::Roam { master, anchor });
    }

    fn follow_waypoints(
        &mut self,
        master: EntityGuid,
        path_owner: EntityGuid,
        resume: Option<WaypointProgress>,
    ) {
        self.targets.remove(&master);
        self.commands.push(MovementCommand::Waypoints {
            master,
            path_owner,
            resume,
        });
    }

    fn clear_movement(&mut self, guid: EntityGuid) {
        self.targets.remove(&guid);
        self.commands.push(MovementCommand::Clear(guid));
    }

    fn formation_target(&self, follower: EntityGuid) -> Option<EntityGuid> {
        self.targets.get(&follower).copied()
    }
}
