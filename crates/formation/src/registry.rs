use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::FormationConfig;
use crate::content::TemplateCatalog;
use crate::engine::{FollowRequest, FormationEngine, FormationSnapshot};
use crate::geometry::FormationShape;
use crate::slot::{Slot, SlotTable};
use crate::world::{EntityGuid, FormationWorld, GroupGuid, MapId, MemberKind, MASTER_SLOT};

pub const DYNAMIC_GROUP_NAME: &str = "Dynamic group";

/// Read-only content plus the dynamic guid counter, shared by every map.
#[derive(Debug)]
pub struct FormationServices {
    catalog: TemplateCatalog,
    config: FormationConfig,
    next_dynamic_guid: AtomicU32,
}

impl FormationServices {
    pub fn new(catalog: TemplateCatalog, config: FormationConfig) -> Self {
        let next_dynamic_guid = AtomicU32::new(catalog.first_dynamic_guid());
        Self {
            catalog,
            config,
            next_dynamic_guid,
        }
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &FormationConfig {
        &self.config
    }

    pub fn allocate_group_guid(&self) -> GroupGuid {
        GroupGuid(self.next_dynamic_guid.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GroupRegistryError {
    #[error("entity {0:?} is not in the world")]
    InvalidEntity(EntityGuid),
    #[error("entity {0:?} has no map")]
    NoMap(EntityGuid),
    #[error("entity {entity:?} is on {actual:?}, expected {expected:?}")]
    MapMismatch {
        entity: EntityGuid,
        expected: MapId,
        actual: MapId,
    },
    #[error("entity {0:?} is not in a group")]
    NotGrouped(EntityGuid),
    #[error("entity {entity:?} already belongs to group {group:?}")]
    AlreadyGrouped { entity: EntityGuid, group: GroupGuid },
    #[error("group {0:?} already has a formation")]
    FormationExists(GroupGuid),
    #[error("group {0:?} does not exist on this map")]
    UnknownGroup(GroupGuid),
}

#[derive(Debug, Clone)]
pub struct Group {
    guid: GroupGuid,
    template_entry: Option<u32>,
    slots: SlotTable,
    formation: Option<FormationEngine>,
    dynamic: bool,
}

impl Group {
    pub fn guid(&self) -> GroupGuid {
        self.guid
    }

    pub fn template_entry(&self) -> Option<u32> {
        self.template_entry
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn formation(&self) -> Option<&FormationEngine> {
        self.formation.as_ref()
    }

    pub fn master(&self) -> Option<EntityGuid> {
        self.slots.master_occupant()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSnapshot {
    pub guid: GroupGuid,
    pub name: String,
    pub dynamic: bool,
    pub formation: Option<FormationSnapshot>,
    pub slots: Vec<Slot>,
}

/// Groups living on one map, plus the entity-to-group index.
#[derive(Debug)]
pub struct MapGroups {
    map: MapId,
    services: Arc<FormationServices>,
    groups: BTreeMap<GroupGuid, Group>,
    group_by_entity: HashMap<EntityGuid, GroupGuid>,
}

impl MapGroups {
    /// Instantiates every static group of `map`. Slots start empty and fill
    /// as members enter the world.
    pub fn new(map: MapId, services: Arc<FormationServices>) -> Self {
        let mut groups = BTreeMap::new();
        let mut group_by_entity = HashMap::new();
        let catalog = services.catalog();

        for static_group in catalog.static_groups_on_map(map) {
            let mut slots = SlotTable::with_members(&static_group.members);
            let formation = catalog
                .formation_for_entry(static_group.template_entry)
                .map(|template| {
                    let mut engine =
                        FormationEngine::from_template(template, services.config()).persistent();
                    engine.attach(&mut slots);
                    engine
                });
            for member in static_group.members.values() {
                group_by_entity.insert(*member, static_group.guid);
            }
            groups.insert(
                static_group.guid,
                Group {
                    guid: static_group.guid,
                    template_entry: Some(static_group.template_entry),
                    slots,
                    formation,
                    dynamic: false,
                },
            );
        }

        info!(
            map = map.0,
            static_groups = groups.len(),
            members = group_by_entity.len(),
            "map_groups_created"
        );
        Self {
            map,
            services,
            groups,
            group_by_entity,
        }
    }

    pub fn map(&self) -> MapId {
        self.map
    }

    pub fn services(&self) -> &Arc<FormationServices> {
        &self.services
    }

    pub fn group(&self, guid: GroupGuid) -> Option<&Group> {
        self.groups.get(&guid)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn get_group_for_entity(&self, entity: EntityGuid, map: MapId) -> Option<&Group> {
        if map != self.map {
            return None;
        }
        self.group_by_entity
            .get(&entity)
            .and_then(|guid| self.groups.get(guid))
    }

    pub fn group_name(&self, guid: GroupGuid) -> Option<String> {
        let group = self.groups.get(&guid)?;
        let name = group
            .template_entry
            .and_then(|entry| self.services.catalog().group_template(entry))
            .map_or(DYNAMIC_GROUP_NAME, |template| template.name.as_str());
        Some(name.to_string())
    }

    fn check_on_map(
        &self,
        world: &dyn FormationWorld,
        entity: EntityGuid,
    ) -> Result<(), GroupRegistryError> {
        if world.member_kind(entity).is_none() {
            return Err(GroupRegistryError::InvalidEntity(entity));
        }
        let actual = world
            .map_id(entity)
            .ok_or(GroupRegistryError::NoMap(entity))?;
        if actual != self.map {
            return Err(GroupRegistryError::MapMismatch {
                entity,
                expected: self.map,
                actual,
            });
        }
        Ok(())
    }

    /// Creates a one-slot group led by `master`. An already grouped master
    /// gets its existing group back.
    pub fn create_dynamic_group(
        &mut self,
        world: &dyn FormationWorld,
        master: EntityGuid,
    ) -> Result<GroupGuid, GroupRegistryError> {
        self.check_on_map(world, master)?;
        if let Some(existing) = self.group_by_entity.get(&master) {
            warn!(
                master = master.0,
                group = existing.0,
                "dynamic_group_master_already_grouped"
            );
            return Ok(*existing);
        }

        let guid = self.services.allocate_group_guid();
        let mut slots = SlotTable::new();
        slots.append(master);
        self.groups.insert(
            guid,
            Group {
                guid,
                template_entry: None,
                slots,
                formation: None,
                dynamic: true,
            },
        );
        self.group_by_entity.insert(master, guid);
        info!(group = guid.0, master = master.0, map = self.map.0, "dynamic_group_created");
        Ok(guid)
    }

    /// Appends `new_member` to the group led by `master`.
    pub fn add_member(
        &mut self,
        world: &mut dyn FormationWorld,
        master: EntityGuid,
        new_member: EntityGuid,
    ) -> Result<GroupGuid, GroupRegistryError> {
        self.check_on_map(&*world, master)?;
        self.check_on_map(&*world, new_member)?;
        let guid = *self
            .group_by_entity
            .get(&master)
            .ok_or(GroupRegistryError::NotGrouped(master))?;
        if let Some(existing) = self.group_by_entity.get(&new_member) {
            return Err(GroupRegistryError::AlreadyGrouped {
                entity: new_member,
                group: *existing,
            });
        }
        let group = self
            .groups
            .get_mut(&guid)
            .ok_or(GroupRegistryError::UnknownGroup(guid))?;

        let ordinal = group.slots.append(new_member);
        self.group_by_entity.insert(new_member, guid);
        if let Some(engine) = group.formation.as_mut() {
            engine.on_slot_added(&mut group.slots, world, new_member);
        }
        debug!(
            group = guid.0,
            member = new_member.0,
            slot = ordinal,
            "group_member_added"
        );
        Ok(guid)
    }

    /// Attaches a formation to the group led by `master` and seats every
    /// current member in it.
    pub fn set_formation_shape(
        &mut self,
        world: &mut dyn FormationWorld,
        master: EntityGuid,
        shape: FormationShape,
    ) -> Result<GroupGuid, GroupRegistryError> {
        let guid = *self
            .group_by_entity
            .get(&master)
            .ok_or(GroupRegistryError::NotGrouped(master))?;
        let config = self.services.config();
        let group = self
            .groups
            .get_mut(&guid)
            .ok_or(GroupRegistryError::UnknownGroup(guid))?;
        if group.formation.is_some() {
            return Err(GroupRegistryError::FormationExists(guid));
        }

        let mut engine = FormationEngine::new(shape, config.dynamic_spread, config);
        engine.attach(&mut group.slots);
        let members = group.slots.occupants().collect::<Vec<_>>();
        for member in members {
            engine.on_slot_added(&mut group.slots, world, member);
        }
        group.formation = Some(engine);
        info!(group = guid.0, shape = shape.as_token(), "group_formation_attached");
        Ok(guid)
    }

    /// Seats a member that entered the world and notifies the formation.
    pub fn on_entity_added(&mut self, world: &mut dyn FormationWorld, entity: EntityGuid) {
        let Some(guid) = self.group_by_entity.get(&entity).copied() else {
            return;
        };
        let Some(group) = self.groups.get_mut(&guid) else {
            return;
        };

        if group.slots.ordinal_of(entity).is_none() {
            let target = group
                .slots
                .default_ordinal_of(entity)
                .filter(|ordinal| {
                    group
                        .slots
                        .get(*ordinal)
                        .is_some_and(|slot| slot.occupant().is_none())
                })
                .or_else(|| {
                    group
                        .slots
                        .iter()
                        .find(|slot| slot.occupant().is_none())
                        .map(Slot::ordinal)
                });
            let Some(ordinal) = target else {
                error!(group = guid.0, entity = entity.0, "group_member_no_empty_slot");
                return;
            };
            group.slots.seat(ordinal, entity);
        }

        if let Some(engine) = group.formation.as_mut() {
            engine.on_slot_added(&mut group.slots, world, entity);
        }
    }

    pub fn on_entity_died(&mut self, world: &dyn FormationWorld, entity: EntityGuid) {
        let Some(group) = self.group_for_entity_mut(entity) else {
            return;
        };
        if let Some(engine) = group.formation.as_mut() {
            engine.on_death(&group.slots, world, entity);
        }
    }

    pub fn on_entity_respawned(&mut self, world: &mut dyn FormationWorld, entity: EntityGuid) {
        let Some(group) = self.group_for_entity_mut(entity) else {
            return;
        };
        match group.formation.as_mut() {
            Some(engine) => {
                engine.on_respawn(&mut group.slots, world, entity);
            }
            None => {
                if group.slots.ordinal_of(entity).is_none() {
                    let may_lead = world
                        .member_kind(entity)
                        .is_some_and(MemberKind::can_lead);
                    if let Some(free) = group.slots.first_free_for(entity, may_lead, &*world) {
                        group.slots.seat(free, entity);
                    }
                }
            }
        }
    }

    /// Permanent removal. Must run while the entity is still resolvable
    /// through the world.
    pub fn on_entity_removed(&mut self, world: &dyn FormationWorld, entity: EntityGuid) {
        let Some(guid) = self.group_by_entity.get(&entity).copied() else {
            return;
        };
        let temp_summon = world
            .member_kind(entity)
            .is_some_and(MemberKind::is_temp_summon);
        let Some(group) = self.groups.get_mut(&guid) else {
            return;
        };

        match group.formation.as_mut() {
            Some(engine) => engine.on_entity_delete(&mut group.slots, world, entity),
            None => {
                if let Some(ordinal) = group.slots.ordinal_of(entity) {
                    if temp_summon && ordinal != MASTER_SLOT {
                        group.slots.remove(ordinal);
                    } else if let Some(slot) = group.slots.get_mut(ordinal) {
                        slot.set_occupant(None);
                    }
                }
            }
        }
        if temp_summon {
            self.group_by_entity.remove(&entity);
        }
    }

    /// Advances every formation. Dynamic groups whose formation became
    /// invalid are erased, as are dynamic groups without a formation once no
    /// member is alive.
    pub fn update(&mut self, world: &mut dyn FormationWorld, delta_ms: u32) {
        let mut expired = Vec::new();
        for group in self.groups.values_mut() {
            let valid = match group.formation.as_mut() {
                Some(engine) => engine.update(&mut group.slots, world, delta_ms),
                None => group.slots.occupants().any(|member| world.is_alive(member)),
            };
            if !valid && group.dynamic {
                expired.push(group.guid);
            }
        }
        for guid in expired {
            self.erase_group(guid);
        }
    }

    fn erase_group(&mut self, guid: GroupGuid) {
        if self.groups.remove(&guid).is_none() {
            return;
        }
        self.group_by_entity.retain(|_, group| *group != guid);
        info!(group = guid.0, map = self.map.0, "dynamic_group_erased");
    }

    /// Pending follower targets across all groups on this map.
    pub fn drain_follow_requests(&mut self) -> Vec<FollowRequest> {
        let mut requests = Vec::new();
        for group in self.groups.values_mut() {
            if let Some(engine) = group.formation.as_ref() {
                requests.extend(engine.drain_follow_requests(&mut group.slots));
            }
        }
        requests
    }

    pub fn disband_formation(
        &mut self,
        world: &mut dyn FormationWorld,
        guid: GroupGuid,
    ) -> Result<(), GroupRegistryError> {
        let group = self
            .groups
            .get_mut(&guid)
            .ok_or(GroupRegistryError::UnknownGroup(guid))?;
        if let Some(mut engine) = group.formation.take() {
            engine.disband(&mut group.slots, world);
        }
        Ok(())
    }

    pub fn switch_formation(&mut self, guid: GroupGuid, shape_id: u32) -> bool {
        let Some(group) = self.groups.get_mut(&guid) else {
            return false;
        };
        match group.formation.as_mut() {
            Some(engine) => engine.switch_formation(&group.slots, shape_id),
            None => false,
        }
    }

    pub fn set_new_master(
        &mut self,
        world: &mut dyn FormationWorld,
        guid: GroupGuid,
        candidate: EntityGuid,
    ) -> bool {
        let Some(group) = self.groups.get_mut(&guid) else {
            return false;
        };
        match group.formation.as_mut() {
            Some(engine) => engine.try_set_new_master(&mut group.slots, world, Some(candidate)),
            None => false,
        }
    }

    pub fn with_formation<R>(
        &mut self,
        guid: GroupGuid,
        f: impl FnOnce(&mut FormationEngine, &mut SlotTable) -> R,
    ) -> Option<R> {
        let group = self.groups.get_mut(&guid)?;
        let engine = group.formation.as_mut()?;
        Some(f(engine, &mut group.slots))
    }

    pub fn snapshot(&self, guid: GroupGuid) -> Option<GroupSnapshot> {
        let group = self.groups.get(&guid)?;
        Some(GroupSnapshot {
            guid,
            name: self.group_name(guid)?,
            dynamic: group.dynamic,
            formation: group
                .formation
                .as_ref()
                .map(|engine| engine.snapshot(&group.slots)),
            slots: group.slots.iter().cloned().collect(),
        })
    }

    fn group_for_entity_mut(&mut self, entity: EntityGuid) -> Option<&mut Group> {
        let guid = self.group_by_entity.get(&entity)?;
        self.groups.get_mut(guid)
    }
}
