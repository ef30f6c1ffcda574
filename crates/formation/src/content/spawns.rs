use std::collections::HashMap;

use tracing::warn;

use super::tables::ContentTables;
use crate::world::{DefaultMovement, EntityGuid, MapId, Position, RespawnAnchor};

/// Persistent spawn data for a single creature.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRecord {
    pub guid: EntityGuid,
    pub entry: u32,
    pub map: MapId,
    pub position: Position,
    pub orientation: f32,
    pub spawn_dist: f32,
    pub movement: DefaultMovement,
}

impl SpawnRecord {
    pub fn anchor(&self) -> RespawnAnchor {
        RespawnAnchor {
            position: self.position,
            radius: self.spawn_dist,
        }
    }
}

/// Spawn records plus the two competing management systems (spawn pools and
/// creature links) that group membership overrides.
pub trait SpawnRegistry {
    fn spawn(&self, guid: EntityGuid) -> Option<&SpawnRecord>;
    fn pool_of(&self, guid: EntityGuid) -> Option<u32>;
    fn remove_from_pool(&mut self, guid: EntityGuid);
    fn is_linked(&self, guid: EntityGuid) -> bool;
    fn remove_link(&mut self, guid: EntityGuid);
}

#[derive(Debug, Clone, Default)]
pub struct SpawnTable {
    spawns: HashMap<EntityGuid, SpawnRecord>,
    pools: HashMap<EntityGuid, u32>,
    links: HashMap<EntityGuid, EntityGuid>,
}

impl SpawnTable {
    pub fn from_tables(tables: &ContentTables) -> Self {
        let mut table = Self::default();
        for row in &tables.creature_spawns {
            let guid = EntityGuid(row.guid);
            let record = SpawnRecord {
                guid,
                entry: row.entry,
                map: MapId(row.map),
                position: Position {
                    x: row.x,
                    y: row.y,
                    z: row.z,
                },
                orientation: row.orientation,
                spawn_dist: row.spawn_dist,
                movement: row.movement,
            };
            if table.spawns.insert(guid, record).is_some() {
                warn!(guid = row.guid, "creature_spawn_duplicate_replaced");
            }
        }
        for row in &tables.pool_members {
            table.pools.insert(EntityGuid(row.guid), row.pool);
        }
        for row in &tables.creature_links {
            table
                .links
                .insert(EntityGuid(row.guid), EntityGuid(row.master));
        }
        table
    }

    pub fn insert(&mut self, record: SpawnRecord) {
        self.spawns.insert(record.guid, record);
    }

    pub fn len(&self) -> usize {
        self.spawns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &SpawnRecord> {
        self.spawns.values()
    }
}

impl SpawnRegistry for SpawnTable {
    fn spawn(&self, guid: EntityGuid) -> Option<&SpawnRecord> {
        self.spawns.get(&guid)
    }

    fn pool_of(&self, guid: EntityGuid) -> Option<u32> {
        self.pools.get(&guid).copied()
    }

    fn remove_from_pool(&mut self, guid: EntityGuid) {
        self.pools.remove(&guid);
    }

    fn is_linked(&self, guid: EntityGuid) -> bool {
        self.links.contains_key(&guid) || self.links.values().any(|master| *master == guid)
    }

    fn remove_link(&mut self, guid: EntityGuid) {
        self.links
            .retain(|linked, master| *linked != guid && *master != guid);
    }
}
