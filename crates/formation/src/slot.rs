use std::collections::BTreeMap;

use serde::Serialize;

use crate::geometry::SlotGeometry;
use crate::world::{EntityAccess, EntityGuid, SlotOrdinal, MASTER_SLOT};

/// Position-in-group record. Geometry belongs to the ordinal; occupants move
/// between ordinals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    ordinal: SlotOrdinal,
    default_entity: Option<EntityGuid>,
    occupant: Option<EntityGuid>,
    /// `None` while the group has no formation attached.
    geometry: Option<SlotGeometry>,
    recompute_position: bool,
}

impl Slot {
    pub fn new(ordinal: SlotOrdinal, default_entity: Option<EntityGuid>) -> Self {
        Self {
            ordinal,
            default_entity,
            occupant: None,
            geometry: None,
            recompute_position: false,
        }
    }

    pub fn ordinal(&self) -> SlotOrdinal {
        self.ordinal
    }

    pub fn default_entity(&self) -> Option<EntityGuid> {
        self.default_entity
    }

    pub fn occupant(&self) -> Option<EntityGuid> {
        self.occupant
    }

    pub fn is_master_slot(&self) -> bool {
        self.ordinal == MASTER_SLOT
    }

    pub fn is_formation_enabled(&self) -> bool {
        self.geometry.is_some()
    }

    /// Geometry is only meaningful while the slot is occupied.
    pub fn geometry(&self) -> Option<SlotGeometry> {
        self.occupant.and(self.geometry)
    }

    pub fn needs_recompute(&self) -> bool {
        self.recompute_position
    }

    pub(crate) fn set_occupant(&mut self, occupant: Option<EntityGuid>) {
        self.occupant = occupant;
    }

    pub(crate) fn set_geometry(&mut self, geometry: Option<SlotGeometry>) {
        self.geometry = geometry;
    }

    pub(crate) fn enable_formation(&mut self) {
        if self.geometry.is_none() {
            self.geometry = Some(if self.is_master_slot() {
                SlotGeometry::MASTER
            } else {
                SlotGeometry::default()
            });
        }
    }

    pub(crate) fn request_recompute(&mut self) {
        self.recompute_position = true;
    }

    /// One-shot read of the recompute flag.
    pub fn take_position_request(&mut self) -> bool {
        std::mem::take(&mut self.recompute_position)
    }
}

/// The ordered slots of one group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SlotTable {
    slots: BTreeMap<SlotOrdinal, Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty slots reserved for the given default members.
    pub fn with_members<'a>(
        members: impl IntoIterator<Item = (&'a SlotOrdinal, &'a EntityGuid)>,
    ) -> Self {
        let slots = members
            .into_iter()
            .map(|(ordinal, entity)| (*ordinal, Slot::new(*ordinal, Some(*entity))))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, ordinal: SlotOrdinal) -> Option<&Slot> {
        self.slots.get(&ordinal)
    }

    pub fn get_mut(&mut self, ordinal: SlotOrdinal) -> Option<&mut Slot> {
        self.slots.get_mut(&ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.values_mut()
    }

    pub fn master_occupant(&self) -> Option<EntityGuid> {
        self.slots.get(&MASTER_SLOT).and_then(Slot::occupant)
    }

    pub fn ordinal_of(&self, entity: EntityGuid) -> Option<SlotOrdinal> {
        self.slots
            .values()
            .find(|slot| slot.occupant == Some(entity))
            .map(Slot::ordinal)
    }

    pub fn default_ordinal_of(&self, entity: EntityGuid) -> Option<SlotOrdinal> {
        self.slots
            .values()
            .find(|slot| slot.default_entity == Some(entity))
            .map(Slot::ordinal)
    }

    pub fn occupants(&self) -> impl Iterator<Item = EntityGuid> + '_ {
        self.slots.values().filter_map(Slot::occupant)
    }

    /// Inserts an empty slot; returns `false` if the ordinal is taken.
    pub fn insert(&mut self, slot: Slot) -> bool {
        if self.slots.contains_key(&slot.ordinal) {
            return false;
        }
        self.slots.insert(slot.ordinal, slot);
        true
    }

    /// Appends a slot after the highest ordinal and seats `entity` in it.
    pub fn append(&mut self, entity: EntityGuid) -> SlotOrdinal {
        let ordinal = self
            .slots
            .keys()
            .next_back()
            .map_or(MASTER_SLOT, |last| last.saturating_add(1));
        let mut slot = Slot::new(ordinal, None);
        slot.occupant = Some(entity);
        self.slots.insert(ordinal, slot);
        ordinal
    }

    pub fn remove(&mut self, ordinal: SlotOrdinal) -> Option<Slot> {
        self.slots.remove(&ordinal)
    }

    /// Seats `entity` in an empty slot. Returns `false` when the slot is
    /// missing or occupied by someone else.
    pub fn seat(&mut self, ordinal: SlotOrdinal, entity: EntityGuid) -> bool {
        match self.slots.get_mut(&ordinal) {
            Some(slot) if slot.occupant.is_none() || slot.occupant == Some(entity) => {
                slot.occupant = Some(entity);
                slot.recompute_position = true;
                true
            }
            _ => false,
        }
    }

    /// Swaps the occupants of two slots, leaving geometry with the ordinals.
    pub fn exchange(&mut self, a: SlotOrdinal, b: SlotOrdinal) -> bool {
        if a == b {
            return self.slots.contains_key(&a);
        }
        let (Some(first), Some(second)) = (
            self.slots.get(&a).map(Slot::occupant),
            self.slots.get(&b).map(Slot::occupant),
        ) else {
            return false;
        };
        for (ordinal, occupant) in [(a, second), (b, first)] {
            if let Some(slot) = self.slots.get_mut(&ordinal) {
                slot.occupant = occupant;
                slot.recompute_position = true;
            }
        }
        true
    }

    /// First slot, in ordinal order, whose occupant is an alive creature.
    pub fn first_alive_leader<W: EntityAccess + ?Sized>(
        &self,
        world: &W,
    ) -> Option<(SlotOrdinal, EntityGuid)> {
        self.slots.values().find_map(|slot| {
            let occupant = slot.occupant?;
            let can_lead = world
                .member_kind(occupant)
                .is_some_and(|kind| kind.can_lead());
            (can_lead && world.is_alive(occupant)).then_some((slot.ordinal, occupant))
        })
    }

    /// Slot `entity` may take on respawn. A slot is free when it is empty,
    /// holds a dead occupant, or already holds `entity`. The entity's default
    /// slot wins when free. An unseated entity only takes empty slots, and
    /// the master slot is only offered when `may_lead` is set.
    pub fn first_free_for<W: EntityAccess + ?Sized>(
        &self,
        entity: EntityGuid,
        may_lead: bool,
        world: &W,
    ) -> Option<SlotOrdinal> {
        let seated = self.ordinal_of(entity).is_some();
        let is_free = |slot: &Slot| {
            if slot.is_master_slot() && !may_lead {
                return false;
            }
            match slot.occupant {
                None => true,
                Some(current) if current == entity => true,
                Some(current) => seated && !world.is_alive(current),
            }
        };

        if let Some(default) = self.default_ordinal_of(entity) {
            if self.slots.get(&default).is_some_and(|slot| is_free(slot)) {
                return Some(default);
            }
        }
        self.slots
            .values()
            .find(|slot| is_free(slot))
            .map(Slot::ordinal)
    }
}
