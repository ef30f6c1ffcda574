use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityGuid(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MapId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupGuid(pub u32);

pub type SlotOrdinal = u32;

/// Ordinal reserved for the group master.
pub const MASTER_SLOT: SlotOrdinal = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Spawn point and roam radius a random-roaming master wanders around.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RespawnAnchor {
    pub position: Position,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefaultMovement {
    #[default]
    Idle,
    Random,
    Waypoint,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaypointProgress {
    pub path_id: u32,
    pub last_reached: u32,
}

/// What kind of entity sits in a slot. Only creatures can lead a formation;
/// players are always followers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberKind {
    Creature { temp_summon: bool },
    Player,
}

impl MemberKind {
    pub fn is_temp_summon(self) -> bool {
        matches!(self, Self::Creature { temp_summon: true })
    }

    pub fn can_lead(self) -> bool {
        matches!(self, Self::Creature { .. })
    }
}

/// Entity accessors provided by the map that owns the groups.
pub trait EntityAccess {
    /// `None` when the entity is not currently in the world.
    fn member_kind(&self, guid: EntityGuid) -> Option<MemberKind>;
    fn is_alive(&self, guid: EntityGuid) -> bool;
    fn position(&self, guid: EntityGuid) -> Option<Position>;
    fn map_id(&self, guid: EntityGuid) -> Option<MapId>;
    fn default_movement(&self, guid: EntityGuid) -> DefaultMovement;
    fn respawn_anchor(&self, guid: EntityGuid) -> Option<RespawnAnchor>;
    fn waypoint_progress(&self, guid: EntityGuid) -> WaypointProgress;
    fn relocate(&mut self, guid: EntityGuid, position: Position);
}

/// Movement commands issued to the pathing layer.
pub trait MovementExecutor {
    /// Follow `master` at the angle/distance of the follower's slot.
    fn follow_in_formation(&mut self, follower: EntityGuid, master: EntityGuid);
    fn roam_around(&mut self, master: EntityGuid, anchor: RespawnAnchor);
    /// `resume` carries the hand-off from a dead master; `path_owner` is the
    /// entity whose waypoint path is walked.
    fn follow_waypoints(
        &mut self,
        master: EntityGuid,
        path_owner: EntityGuid,
        resume: Option<WaypointProgress>,
    );
    fn clear_movement(&mut self, guid: EntityGuid);
    /// Master currently followed in formation, if any.
    fn formation_target(&self, follower: EntityGuid) -> Option<EntityGuid>;
}

pub trait FormationWorld: EntityAccess + MovementExecutor {}

impl<T: EntityAccess + MovementExecutor + ?Sized> FormationWorld for T {}
