use std::collections::{BTreeMap, HashMap};
use std::f32::consts::TAU;

use formation::{
    DefaultMovement, EntityAccess, EntityGuid, FollowRequest, MapId, MemberKind,
    MovementExecutor, Position, RespawnAnchor, SpawnTable, WaypointProgress,
};
use tracing::debug;

const ARRIVAL_THRESHOLD: f32 = 0.1;
const PATROL_HALF_EXTENT: f32 = 8.0;
const ROAM_STEP_RADIANS: f32 = 2.399_963;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum MoveOrder {
    Idle,
    Follow {
        master: EntityGuid,
        angle: f32,
        distance: f32,
    },
    Roam {
        anchor: RespawnAnchor,
        step: u32,
    },
    Waypoints {
        path_owner: EntityGuid,
        next: usize,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct SimEntity {
    pub(crate) kind: MemberKind,
    pub(crate) in_world: bool,
    pub(crate) alive: bool,
    pub(crate) position: Position,
    pub(crate) heading: f32,
    pub(crate) home: RespawnAnchor,
    pub(crate) movement: DefaultMovement,
    pub(crate) order: MoveOrder,
    pub(crate) progress: WaypointProgress,
}

/// Headless map: spawned creatures, their orders, and patrol paths.
#[derive(Debug)]
pub(crate) struct SimWorld {
    map: MapId,
    move_speed: f32,
    entities: BTreeMap<EntityGuid, SimEntity>,
    paths: HashMap<EntityGuid, Vec<Position>>,
}

impl SimWorld {
    /// Registers every spawn record of `map`; nothing is in the world yet.
    pub(crate) fn from_spawns(map: MapId, spawns: &SpawnTable, move_speed: f32) -> Self {
        let mut world = Self {
            map,
            move_speed,
            entities: BTreeMap::new(),
            paths: HashMap::new(),
        };
        for record in spawns.records().filter(|record| record.map == map) {
            let home = record.anchor();
            if record.movement == DefaultMovement::Waypoint {
                world.paths.insert(record.guid, patrol_path(home.position));
            }
            world.entities.insert(
                record.guid,
                SimEntity {
                    kind: MemberKind::Creature { temp_summon: false },
                    in_world: false,
                    alive: false,
                    position: home.position,
                    heading: record.orientation,
                    home,
                    movement: record.movement,
                    order: MoveOrder::Idle,
                    progress: WaypointProgress::default(),
                },
            );
        }
        world
    }

    #[cfg(test)]
    pub(crate) fn entity(&self, guid: EntityGuid) -> Option<&SimEntity> {
        self.entities.get(&guid)
    }

    pub(crate) fn alive_count(&self) -> usize {
        self.entities
            .values()
            .filter(|entity| entity.in_world && entity.alive)
            .count()
    }

    fn live_entity_mut(&mut self, guid: EntityGuid) -> Option<&mut SimEntity> {
        self.entities.get_mut(&guid).filter(|entity| entity.in_world)
    }

    /// Brings every registered spawn into the world. Returns them in guid
    /// order.
    pub(crate) fn spawn_all(&mut self) -> Vec<EntityGuid> {
        let mut spawned = Vec::new();
        for (guid, entity) in self.entities.iter_mut() {
            if entity.in_world {
                continue;
            }
            entity.in_world = true;
            entity.alive = true;
            entity.position = entity.home.position;
            spawned.push(*guid);
        }
        spawned
    }

    /// Puts an entity on its spawn's own movement: roaming around home or
    /// walking its patrol path.
    pub(crate) fn start_default_movement(&mut self, guid: EntityGuid) {
        let has_path = self.paths.contains_key(&guid);
        let Some(entity) = self.live_entity_mut(guid) else {
            return;
        };
        entity.order = match entity.movement {
            DefaultMovement::Random => MoveOrder::Roam {
                anchor: entity.home,
                step: 0,
            },
            DefaultMovement::Waypoint if has_path => {
                entity.progress = WaypointProgress {
                    path_id: guid.0,
                    last_reached: 0,
                };
                MoveOrder::Waypoints {
                    path_owner: guid,
                    next: 0,
                }
            }
            _ => MoveOrder::Idle,
        };
    }

    pub(crate) fn kill(&mut self, guid: EntityGuid) -> bool {
        let Some(entity) = self.live_entity_mut(guid) else {
            return false;
        };
        entity.alive = false;
        entity.order = MoveOrder::Idle;
        true
    }

    pub(crate) fn respawn(&mut self, guid: EntityGuid) -> bool {
        let Some(entity) = self.live_entity_mut(guid) else {
            return false;
        };
        if entity.alive {
            return false;
        }
        entity.alive = true;
        entity.position = entity.home.position;
        entity.order = MoveOrder::Idle;
        true
    }

    /// Spawns a temporary creature next to `near`.
    pub(crate) fn summon(&mut self, guid: EntityGuid, near: EntityGuid) -> bool {
        if self.entities.contains_key(&guid) {
            return false;
        }
        let Some(position) = self.position(near) else {
            return false;
        };
        self.entities.insert(
            guid,
            SimEntity {
                kind: MemberKind::Creature { temp_summon: true },
                in_world: true,
                alive: true,
                position,
                heading: 0.0,
                home: RespawnAnchor {
                    position,
                    radius: 0.0,
                },
                movement: DefaultMovement::Idle,
                order: MoveOrder::Idle,
                progress: WaypointProgress::default(),
            },
        );
        true
    }

    /// Temporary creatures are forgotten; persistent ones just leave the
    /// world.
    pub(crate) fn remove(&mut self, guid: EntityGuid) {
        let Some(entity) = self.entities.get_mut(&guid) else {
            return;
        };
        if entity.kind.is_temp_summon() {
            self.entities.remove(&guid);
        } else {
            entity.in_world = false;
            entity.alive = false;
            entity.order = MoveOrder::Idle;
        }
    }

    pub(crate) fn apply_follow_requests(&mut self, requests: &[FollowRequest]) {
        for request in requests {
            if let Some(entity) = self.live_entity_mut(request.follower) {
                entity.order = MoveOrder::Follow {
                    master: request.master,
                    angle: request.angle,
                    distance: request.distance,
                };
            }
        }
    }

    /// Moves every alive entity toward its order's target.
    pub(crate) fn tick(&mut self, delta_ms: u32) {
        let max_step = self.move_speed * delta_ms as f32 / 1000.0;
        let poses = self
            .entities
            .iter()
            .filter(|(_, entity)| entity.in_world)
            .map(|(guid, entity)| (*guid, (entity.position, entity.heading)))
            .collect::<HashMap<_, _>>();

        for entity in self.entities.values_mut() {
            if !entity.in_world || !entity.alive {
                continue;
            }
            let target = match entity.order {
                MoveOrder::Idle => continue,
                MoveOrder::Follow {
                    master,
                    angle,
                    distance,
                } => {
                    let Some((master_position, master_heading)) = poses.get(&master).copied() else {
                        continue;
                    };
                    offset(master_position, master_heading + angle, distance)
                }
                MoveOrder::Roam { anchor, step } => offset(
                    anchor.position,
                    step as f32 * ROAM_STEP_RADIANS,
                    anchor.radius * 0.5,
                ),
                MoveOrder::Waypoints { path_owner, next } => {
                    let Some(point) = self
                        .paths
                        .get(&path_owner)
                        .and_then(|path| path.get(next))
                        .copied()
                    else {
                        continue;
                    };
                    point
                }
            };

            let (position, heading, arrived) =
                step_towards(entity.position, target, max_step, entity.heading);
            entity.position = position;
            entity.heading = heading;
            if !arrived {
                continue;
            }
            match &mut entity.order {
                MoveOrder::Roam { step, .. } => *step = step.wrapping_add(1),
                MoveOrder::Waypoints { path_owner, next } => {
                    let len = self.paths.get(path_owner).map_or(1, Vec::len).max(1);
                    entity.progress.last_reached = *next as u32;
                    *next = (*next + 1) % len;
                }
                _ => {}
            }
        }
    }
}

fn patrol_path(center: Position) -> Vec<Position> {
    [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
        .into_iter()
        .map(|(x, y)| Position {
            x: center.x + x * PATROL_HALF_EXTENT,
            y: center.y + y * PATROL_HALF_EXTENT,
            z: center.z,
        })
        .collect()
}

fn offset(origin: Position, angle: f32, distance: f32) -> Position {
    let angle = angle.rem_euclid(TAU);
    Position {
        x: origin.x + angle.cos() * distance,
        y: origin.y + angle.sin() * distance,
        z: origin.z,
    }
}

fn step_towards(
    current: Position,
    target: Position,
    max_step: f32,
    heading: f32,
) -> (Position, f32, bool) {
    let dx = target.x - current.x;
    let dy = target.y - current.y;
    let distance = (dx * dx + dy * dy).sqrt();
    if distance <= ARRIVAL_THRESHOLD.max(max_step) {
        let heading = if distance > f32::EPSILON {
            dy.atan2(dx)
        } else {
            heading
        };
        return (target, heading, true);
    }

    let inv_distance = distance.recip();
    (
        Position {
            x: current.x + dx * inv_distance * max_step,
            y: current.y + dy * inv_distance * max_step,
            z: target.z,
        },
        dy.atan2(dx),
        false,
    )
}

impl EntityAccess for SimWorld {
    fn member_kind(&self, guid: EntityGuid) -> Option<MemberKind> {
        self.entities
            .get(&guid)
            .filter(|entity| entity.in_world)
            .map(|entity| entity.kind)
    }

    fn is_alive(&self, guid: EntityGuid) -> bool {
        self.entities
            .get(&guid)
            .is_some_and(|entity| entity.in_world && entity.alive)
    }

    fn position(&self, guid: EntityGuid) -> Option<Position> {
        self.entities
            .get(&guid)
            .filter(|entity| entity.in_world)
            .map(|entity| entity.position)
    }

    fn map_id(&self, guid: EntityGuid) -> Option<MapId> {
        self.entities
            .get(&guid)
            .filter(|entity| entity.in_world)
            .map(|_| self.map)
    }

    fn default_movement(&self, guid: EntityGuid) -> DefaultMovement {
        self.entities
            .get(&guid)
            .map(|entity| entity.movement)
            .unwrap_or_default()
    }

    fn respawn_anchor(&self, guid: EntityGuid) -> Option<RespawnAnchor> {
        self.entities.get(&guid).map(|entity| entity.home)
    }

    fn waypoint_progress(&self, guid: EntityGuid) -> WaypointProgress {
        self.entities
            .get(&guid)
            .map(|entity| entity.progress)
            .unwrap_or_default()
    }

    fn relocate(&mut self, guid: EntityGuid, position: Position) {
        if let Some(entity) = self.live_entity_mut(guid) {
            entity.position = position;
        }
    }
}

impl MovementExecutor for SimWorld {
    fn follow_in_formation(&mut self, follower: EntityGuid, master: EntityGuid) {
        let Some(entity) = self.live_entity_mut(follower) else {
            return;
        };
        let (angle, distance) = match entity.order {
            MoveOrder::Follow {
                angle, distance, ..
            } => (angle, distance),
            _ => (0.0, 1.0),
        };
        entity.order = MoveOrder::Follow {
            master,
            angle,
            distance,
        };
        debug!(follower = follower.0, master = master.0, "sim_follow_ordered");
    }

    fn roam_around(&mut self, master: EntityGuid, anchor: RespawnAnchor) {
        if let Some(entity) = self.live_entity_mut(master) {
            entity.order = MoveOrder::Roam { anchor, step: 0 };
            debug!(master = master.0, radius = anchor.radius, "sim_roam_ordered");
        }
    }

    fn follow_waypoints(
        &mut self,
        master: EntityGuid,
        path_owner: EntityGuid,
        resume: Option<WaypointProgress>,
    ) {
        let len = self.paths.get(&path_owner).map_or(0, Vec::len);
        let Some(entity) = self.live_entity_mut(master) else {
            return;
        };
        if len == 0 {
            entity.order = MoveOrder::Idle;
            return;
        }
        let next = resume.map_or(0, |progress| (progress.last_reached as usize + 1) % len);
        entity.progress = WaypointProgress {
            path_id: path_owner.0,
            last_reached: resume.map_or(0, |progress| progress.last_reached),
        };
        entity.order = MoveOrder::Waypoints { path_owner, next };
        debug!(
            master = master.0,
            path_owner = path_owner.0,
            next,
            "sim_waypoints_ordered"
        );
    }

    fn clear_movement(&mut self, guid: EntityGuid) {
        if let Some(entity) = self.live_entity_mut(guid) {
            entity.order = MoveOrder::Idle;
        }
    }

    fn formation_target(&self, follower: EntityGuid) -> Option<EntityGuid> {
        match self.entities.get(&follower)?.order {
            MoveOrder::Follow { master, .. } => Some(master),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use formation::content::{ContentTables, CreatureSpawnRow};

    use super::*;

    fn spawn_row(guid: u32, x: f32, movement: DefaultMovement) -> CreatureSpawnRow {
        CreatureSpawnRow {
            guid,
            entry: 1,
            map: 0,
            x,
            y: 0.0,
            z: 0.0,
            orientation: 0.0,
            spawn_dist: 4.0,
            movement,
        }
    }

    fn world() -> SimWorld {
        let tables = ContentTables {
            creature_spawns: vec![
                spawn_row(1, 0.0, DefaultMovement::Waypoint),
                spawn_row(2, 5.0, DefaultMovement::Idle),
                CreatureSpawnRow {
                    map: 1,
                    ..spawn_row(3, 0.0, DefaultMovement::Idle)
                },
            ],
            ..ContentTables::default()
        };
        SimWorld::from_spawns(MapId(0), &SpawnTable::from_tables(&tables), 10.0)
    }

    #[test]
    fn only_spawns_of_the_map_enter_the_world() {
        let mut world = world();
        assert_eq!(world.member_kind(EntityGuid(1)), None);
        assert_eq!(world.spawn_all(), vec![EntityGuid(1), EntityGuid(2)]);
        assert!(world.is_alive(EntityGuid(2)));
        assert_eq!(world.map_id(EntityGuid(3)), None);
    }

    #[test]
    fn followers_converge_on_their_slot() {
        let mut world = world();
        world.spawn_all();
        world.apply_follow_requests(&[FollowRequest {
            follower: EntityGuid(2),
            master: EntityGuid(1),
            angle: std::f32::consts::PI,
            distance: 2.0,
        }]);
        for _ in 0..20 {
            world.tick(100);
        }
        let position = world.position(EntityGuid(2)).expect("position");
        assert!((position.x + 2.0).abs() < 0.2, "{position:?}");
        assert!(position.y.abs() < 0.2, "{position:?}");
        assert_eq!(world.formation_target(EntityGuid(2)), Some(EntityGuid(1)));
    }

    #[test]
    fn waypoint_walkers_record_progress_and_resume() {
        let mut world = world();
        world.spawn_all();
        world.follow_waypoints(EntityGuid(1), EntityGuid(1), None);
        for _ in 0..40 {
            world.tick(100);
        }
        let progress = world.waypoint_progress(EntityGuid(1));
        assert_eq!(progress.path_id, 1);
        assert!(progress.last_reached >= 1);

        world.follow_waypoints(
            EntityGuid(2),
            EntityGuid(1),
            Some(WaypointProgress {
                path_id: 1,
                last_reached: 3,
            }),
        );
        assert_eq!(
            world.entity(EntityGuid(2)).map(|entity| entity.order),
            Some(MoveOrder::Waypoints {
                path_owner: EntityGuid(1),
                next: 0,
            })
        );
    }

    #[test]
    fn default_movement_follows_the_spawn_row() {
        let mut world = world();
        world.spawn_all();
        world.start_default_movement(EntityGuid(1));
        world.start_default_movement(EntityGuid(2));
        assert_eq!(
            world.entity(EntityGuid(1)).map(|entity| entity.order),
            Some(MoveOrder::Waypoints {
                path_owner: EntityGuid(1),
                next: 0,
            })
        );
        assert_eq!(world.waypoint_progress(EntityGuid(1)).path_id, 1);
        assert_eq!(
            world.entity(EntityGuid(2)).map(|entity| entity.order),
            Some(MoveOrder::Idle)
        );
    }

    #[test]
    fn summons_and_removal() {
        let mut world = world();
        world.spawn_all();
        assert!(world.summon(EntityGuid(9), EntityGuid(2)));
        assert_eq!(
            world.member_kind(EntityGuid(9)),
            Some(MemberKind::Creature { temp_summon: true })
        );
        world.remove(EntityGuid(9));
        assert!(world.entity(EntityGuid(9)).is_none());

        world.remove(EntityGuid(2));
        assert_eq!(world.member_kind(EntityGuid(2)), None);
        assert!(world.entity(EntityGuid(2)).is_some());
    }

    #[test]
    fn dead_entities_stand_still_until_respawned() {
        let mut world = world();
        world.spawn_all();
        assert!(world.kill(EntityGuid(2)));
        assert!(!world.is_alive(EntityGuid(2)));
        assert!(!world.respawn(EntityGuid(1)));
        assert!(world.respawn(EntityGuid(2)));
        assert_eq!(
            world.position(EntityGuid(2)),
            Some(Position {
                x: 5.0,
                y: 0.0,
                z: 0.0
            })
        );
    }
}
