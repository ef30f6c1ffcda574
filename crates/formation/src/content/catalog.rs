use std::collections::{BTreeMap, HashMap};

use tracing::{info, warn};

use super::spawns::SpawnRegistry;
use super::tables::ContentTables;
use crate::geometry::{FormationShape, SlotGeometry};
use crate::world::{EntityGuid, GroupGuid, MapId, SlotOrdinal, MASTER_SLOT};

const OPTION_KEEP_COMPACT: u32 = 0x1;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTemplate {
    pub entry: u32,
    pub name: String,
    pub formation: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormationTemplate {
    pub id: u32,
    pub shape: FormationShape,
    pub spread: f32,
    pub keep_compact: bool,
    /// Explicit geometry for irregular templates, keyed by slot ordinal.
    pub slot_overrides: BTreeMap<SlotOrdinal, SlotGeometry>,
}

impl FormationTemplate {
    /// Templates with explicit slot rows only fit that many members.
    pub fn fixed_member_count(&self) -> Option<usize> {
        if self.slot_overrides.is_empty() {
            None
        } else {
            Some(self.slot_overrides.len())
        }
    }
}

/// A validated static group: one map, a master at ordinal 0, unique ordinals.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticGroup {
    pub guid: GroupGuid,
    pub template_entry: u32,
    pub map: MapId,
    pub members: BTreeMap<SlotOrdinal, EntityGuid>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    group_templates: BTreeMap<u32, GroupTemplate>,
    formation_templates: BTreeMap<u32, FormationTemplate>,
    static_groups: BTreeMap<GroupGuid, StaticGroup>,
    group_by_member: HashMap<EntityGuid, (GroupGuid, SlotOrdinal)>,
    max_static_guid: u32,
}

impl TemplateCatalog {
    /// Builds every index from the raw tables. Rows that fail validation are
    /// logged and skipped; loading itself never fails.
    pub fn load_all(tables: &ContentTables, spawns: &mut dyn SpawnRegistry) -> Self {
        let mut catalog = Self::default();
        catalog.load_formation_templates(tables);
        catalog.load_group_templates(tables);
        let pending = catalog.load_group_guids(tables);
        catalog.load_members(tables, pending, spawns);

        info!(
            group_templates = catalog.group_templates.len(),
            formation_templates = catalog.formation_templates.len(),
            static_groups = catalog.static_groups.len(),
            members = catalog.group_by_member.len(),
            "template_catalog_loaded"
        );
        catalog
    }

    fn load_formation_templates(&mut self, tables: &ContentTables) {
        for row in &tables.formation_templates {
            let Some(shape) = FormationShape::from_id(row.shape) else {
                warn!(
                    formation = row.id,
                    shape = row.shape,
                    "formation_template_invalid_shape"
                );
                continue;
            };
            if self.formation_templates.contains_key(&row.id) {
                warn!(formation = row.id, "formation_template_duplicate");
                continue;
            }
            self.formation_templates.insert(
                row.id,
                FormationTemplate {
                    id: row.id,
                    shape,
                    spread: row.spread,
                    keep_compact: row.options & OPTION_KEEP_COMPACT != 0,
                    slot_overrides: BTreeMap::new(),
                },
            );
        }

        for row in &tables.formation_slots {
            let Some(template) = self.formation_templates.get_mut(&row.formation) else {
                warn!(
                    formation = row.formation,
                    slot = row.slot,
                    "formation_slot_unknown_template"
                );
                continue;
            };
            if template.slot_overrides.contains_key(&row.slot) {
                warn!(
                    formation = row.formation,
                    slot = row.slot,
                    "formation_slot_duplicate"
                );
                continue;
            }
            template.slot_overrides.insert(
                row.slot,
                SlotGeometry {
                    angle: row.angle,
                    distance: row.distance,
                },
            );
        }
    }

    fn load_group_templates(&mut self, tables: &ContentTables) {
        for row in &tables.group_templates {
            if let Some(formation) = row.formation {
                if !self.formation_templates.contains_key(&formation) {
                    warn!(
                        entry = row.entry,
                        formation, "group_template_unknown_formation"
                    );
                    continue;
                }
            }
            if self.group_templates.contains_key(&row.entry) {
                warn!(entry = row.entry, "group_template_duplicate");
                continue;
            }
            self.group_templates.insert(
                row.entry,
                GroupTemplate {
                    entry: row.entry,
                    name: row.name.clone(),
                    formation: row.formation,
                },
            );
        }
    }

    fn load_group_guids(&self, tables: &ContentTables) -> BTreeMap<GroupGuid, u32> {
        let mut pending = BTreeMap::new();
        for row in &tables.group_guids {
            if !self.group_templates.contains_key(&row.entry) {
                warn!(
                    group = row.guid,
                    entry = row.entry,
                    "group_guid_unknown_template"
                );
                continue;
            }
            if pending.insert(GroupGuid(row.guid), row.entry).is_some() {
                warn!(group = row.guid, "group_guid_duplicate");
            }
        }
        pending
    }

    fn load_members(
        &mut self,
        tables: &ContentTables,
        pending: BTreeMap<GroupGuid, u32>,
        spawns: &mut dyn SpawnRegistry,
    ) {
        let mut members: BTreeMap<GroupGuid, BTreeMap<SlotOrdinal, EntityGuid>> = BTreeMap::new();
        let mut claimed: HashMap<EntityGuid, GroupGuid> = HashMap::new();

        for row in &tables.group_members {
            let group = GroupGuid(row.group);
            let member = EntityGuid(row.member);
            if !pending.contains_key(&group) {
                warn!(group = row.group, member = row.member, "group_member_unknown_group");
                continue;
            }
            if spawns.spawn(member).is_none() {
                warn!(group = row.group, member = row.member, "group_member_no_spawn");
                continue;
            }
            if let Some(existing) = claimed.get(&member) {
                warn!(
                    group = row.group,
                    member = row.member,
                    existing_group = existing.0,
                    "group_member_already_grouped"
                );
                continue;
            }
            let slots = members.entry(group).or_default();
            if slots.contains_key(&row.slot) {
                warn!(
                    group = row.group,
                    member = row.member,
                    slot = row.slot,
                    "group_member_duplicate_slot"
                );
                continue;
            }
            slots.insert(row.slot, member);
            claimed.insert(member, group);
        }

        for (guid, entry) in pending {
            let Some(slots) = members.remove(&guid) else {
                warn!(group = guid.0, "static_group_no_members");
                continue;
            };
            if !slots.contains_key(&MASTER_SLOT) {
                warn!(group = guid.0, "static_group_missing_master_slot");
                continue;
            }
            let mut maps = slots
                .values()
                .filter_map(|member| spawns.spawn(*member).map(|record| record.map));
            let Some(map) = maps.next() else {
                continue;
            };
            if maps.any(|other| other != map) {
                warn!(group = guid.0, "static_group_spans_maps");
                continue;
            }
            if let Some(expected) = self
                .formation_for_entry(entry)
                .and_then(FormationTemplate::fixed_member_count)
            {
                if expected != slots.len() {
                    warn!(
                        group = guid.0,
                        expected,
                        actual = slots.len(),
                        "static_group_member_count_mismatch"
                    );
                }
            }

            for member in slots.values() {
                if let Some(pool) = spawns.pool_of(*member) {
                    warn!(
                        group = guid.0,
                        member = member.0,
                        pool,
                        "group_member_pool_disabled"
                    );
                    spawns.remove_from_pool(*member);
                }
                if spawns.is_linked(*member) {
                    warn!(group = guid.0, member = member.0, "group_member_link_disabled");
                    spawns.remove_link(*member);
                }
            }

            for (ordinal, member) in &slots {
                self.group_by_member.insert(*member, (guid, *ordinal));
            }
            self.max_static_guid = self.max_static_guid.max(guid.0);
            self.static_groups.insert(
                guid,
                StaticGroup {
                    guid,
                    template_entry: entry,
                    map,
                    members: slots,
                },
            );
        }
    }

    pub fn group_template(&self, entry: u32) -> Option<&GroupTemplate> {
        self.group_templates.get(&entry)
    }

    pub fn formation_template(&self, id: u32) -> Option<&FormationTemplate> {
        self.formation_templates.get(&id)
    }

    pub fn formation_for_entry(&self, entry: u32) -> Option<&FormationTemplate> {
        self.group_templates
            .get(&entry)
            .and_then(|template| template.formation)
            .and_then(|id| self.formation_templates.get(&id))
    }

    pub fn static_group(&self, guid: GroupGuid) -> Option<&StaticGroup> {
        self.static_groups.get(&guid)
    }

    pub fn static_groups(&self) -> impl Iterator<Item = &StaticGroup> {
        self.static_groups.values()
    }

    pub fn static_groups_on_map(&self, map: MapId) -> impl Iterator<Item = &StaticGroup> {
        self.static_groups
            .values()
            .filter(move |group| group.map == map)
    }

    /// Static group and default slot of `entity`, if it has one.
    pub fn membership(&self, entity: EntityGuid) -> Option<(GroupGuid, SlotOrdinal)> {
        self.group_by_member.get(&entity).copied()
    }

    /// First guid free for runtime-created groups.
    pub fn first_dynamic_guid(&self) -> u32 {
        self.max_static_guid.saturating_add(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::spawns::SpawnTable;
    use crate::content::tables::parse_tables_document;
    use std::path::Path;

    fn load(raw: &str) -> (TemplateCatalog, SpawnTable) {
        let mut tables = ContentTables::default();
        parse_tables_document(Path::new("catalog.xml"), raw, &mut tables).expect("parse");
        let mut spawns = SpawnTable::from_tables(&tables);
        let catalog = TemplateCatalog::load_all(&tables, &mut spawns);
        (catalog, spawns)
    }

    fn spawn(guid: u32, map: u32) -> String {
        format!(
            "<CreatureSpawn><guid>{guid}</guid><entry>1</entry><map>{map}</map><x>0</x><y>0</y><z>0</z></CreatureSpawn>"
        )
    }

    fn member(group: u32, member: u32, slot: u32) -> String {
        format!("<GroupMember><group>{group}</group><member>{member}</member><slot>{slot}</slot></GroupMember>")
    }

    const TEMPLATES: &str = r#"
        <FormationTemplate><id>1</id><shape>1</shape><spread>2</spread><options>1</options></FormationTemplate>
        <FormationTemplate><id>2</id><shape>7</shape><spread>2</spread></FormationTemplate>
        <GroupTemplate><entry>10</entry><name>Patrol</name><formation>1</formation></GroupTemplate>
        <GroupTemplate><entry>11</entry><name>Broken</name><formation>2</formation></GroupTemplate>
        <GroupTemplate><entry>12</entry><name>Loose</name></GroupTemplate>
    "#;

    #[test]
    fn valid_groups_have_one_master_and_one_map() {
        let raw = format!(
            "<Tables>{TEMPLATES}<GroupGuid><guid>100</guid><entry>10</entry></GroupGuid>{}{}{}{}{}{}</Tables>",
            spawn(1, 0),
            spawn(2, 0),
            spawn(3, 0),
            member(100, 1, 0),
            member(100, 2, 1),
            member(100, 3, 2),
        );
        let (catalog, _) = load(&raw);

        let template = catalog.formation_template(1).expect("template");
        assert!(template.keep_compact);
        assert_eq!(template.shape, FormationShape::SingleFile);
        assert!(catalog.formation_template(2).is_none());
        assert!(catalog.group_template(11).is_none());

        for group in catalog.static_groups() {
            assert_eq!(
                group.members.keys().filter(|ordinal| **ordinal == MASTER_SLOT).count(),
                1
            );
            assert_eq!(group.map, MapId(0));
        }
        assert_eq!(catalog.static_groups().count(), 1);
        assert_eq!(
            catalog.membership(EntityGuid(3)),
            Some((GroupGuid(100), 2))
        );
        assert_eq!(catalog.first_dynamic_guid(), 101);
    }

    #[test]
    fn groups_without_master_or_spanning_maps_are_skipped() {
        let raw = format!(
            "<Tables>{TEMPLATES}\
             <GroupGuid><guid>100</guid><entry>12</entry></GroupGuid>\
             <GroupGuid><guid>101</guid><entry>12</entry></GroupGuid>\
             <GroupGuid><guid>102</guid><entry>11</entry></GroupGuid>\
             {}{}{}{}{}{}{}{}</Tables>",
            spawn(1, 0),
            spawn(2, 0),
            spawn(3, 0),
            spawn(4, 1),
            member(100, 1, 1),
            member(100, 2, 2),
            member(101, 3, 0),
            member(101, 4, 1),
        );
        let (catalog, _) = load(&raw);
        assert_eq!(catalog.static_groups().count(), 0);
        assert!(catalog.membership(EntityGuid(1)).is_none());
        assert!(catalog.membership(EntityGuid(3)).is_none());
    }

    #[test]
    fn duplicate_ordinals_and_second_memberships_keep_first_row() {
        let raw = format!(
            "<Tables>{TEMPLATES}\
             <GroupGuid><guid>100</guid><entry>12</entry></GroupGuid>\
             <GroupGuid><guid>101</guid><entry>12</entry></GroupGuid>\
             {}{}{}{}{}{}{}{}{}</Tables>",
            spawn(1, 0),
            spawn(2, 0),
            spawn(3, 0),
            member(100, 1, 0),
            member(100, 2, 0),
            member(101, 3, 0),
            member(101, 1, 1),
            member(101, 99, 2),
            member(101, 2, 3),
        );
        let (catalog, _) = load(&raw);
        let first = catalog.static_group(GroupGuid(100)).expect("group 100");
        assert_eq!(first.members.len(), 1);
        assert_eq!(first.members[&0], EntityGuid(1));

        let second = catalog.static_group(GroupGuid(101)).expect("group 101");
        let ordinals = second.members.keys().copied().collect::<Vec<_>>();
        assert_eq!(ordinals, vec![0, 3]);
    }

    #[test]
    fn grouped_members_lose_pool_and_link_management() {
        let raw = format!(
            "<Tables>{TEMPLATES}<GroupGuid><guid>100</guid><entry>12</entry></GroupGuid>\
             {}{}{}{}\
             <PoolMember><pool>5</pool><guid>1</guid></PoolMember>\
             <CreatureLink><guid>2</guid><master>77</master></CreatureLink></Tables>",
            spawn(1, 0),
            spawn(2, 0),
            member(100, 1, 0),
            member(100, 2, 1),
        );
        let (_, spawns) = load(&raw);
        assert_eq!(spawns.pool_of(EntityGuid(1)), None);
        assert!(!spawns.is_linked(EntityGuid(2)));
    }

    #[test]
    fn explicit_slot_rows_make_fixed_count_templates() {
        let raw = r#"<Tables>
            <FormationTemplate><id>3</id><shape>2</shape><spread>1</spread></FormationTemplate>
            <FormationSlot><formation>3</formation><slot>0</slot><angle>0</angle><distance>0</distance></FormationSlot>
            <FormationSlot><formation>3</formation><slot>1</slot><angle>1.5</angle><distance>4</distance></FormationSlot>
            <FormationSlot><formation>3</formation><slot>1</slot><angle>2.5</angle><distance>4</distance></FormationSlot>
            <FormationSlot><formation>9</formation><slot>1</slot><angle>1</angle><distance>1</distance></FormationSlot>
        </Tables>"#;
        let (catalog, _) = load(raw);
        let template = catalog.formation_template(3).expect("template");
        assert_eq!(template.fixed_member_count(), Some(2));
        assert_eq!(template.slot_overrides[&1].angle, 1.5);
    }
}
