use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::FormationConfig;
use crate::content::FormationTemplate;
use crate::geometry::{formation_offset, mirror_angle, FormationShape, SlotGeometry};
use crate::slot::{Slot, SlotTable};
use crate::world::{
    DefaultMovement, EntityGuid, FormationWorld, RespawnAnchor, SlotOrdinal, WaypointProgress,
    MASTER_SLOT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationPhase {
    /// No master has been seated yet.
    Uninitialized,
    Active,
    /// The master was removed; the next liveness check elects a successor.
    AwaitingSuccessor,
    /// No member can lead and the group is disposable. Terminal.
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterMovement {
    Random,
    Waypoint,
}

/// Follower command produced for the movement layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FollowRequest {
    pub follower: EntityGuid,
    pub master: EntityGuid,
    pub angle: f32,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormationSnapshot {
    pub phase: FormationPhase,
    pub shape: FormationShape,
    pub spread: f32,
    pub mirrored: bool,
    pub keep_compact: bool,
    pub master: Option<EntityGuid>,
    pub real_master: Option<EntityGuid>,
    pub movement: MasterMovement,
}

/// Geometry and master succession for one group. The group owns the slot
/// table; every operation borrows it alongside the world.
#[derive(Debug, Clone)]
pub struct FormationEngine {
    template_shape: FormationShape,
    shape: FormationShape,
    spread: f32,
    slot_overrides: BTreeMap<SlotOrdinal, SlotGeometry>,
    phase: FormationPhase,
    real_master: Option<EntityGuid>,
    movement: MasterMovement,
    anchor: Option<RespawnAnchor>,
    waypoint_handoff: Option<WaypointProgress>,
    mirrored: bool,
    keep_compact: bool,
    /// Static groups outlive a full wipe and wait for members to respawn.
    persistent: bool,
    positions_dirty: bool,
    next_check_ms: u32,
    settle_delay_ms: u32,
    liveness_interval_ms: u32,
    master_death_recheck_ms: u32,
}

impl FormationEngine {
    pub fn new(shape: FormationShape, spread: f32, config: &FormationConfig) -> Self {
        Self {
            template_shape: shape,
            shape,
            spread,
            slot_overrides: BTreeMap::new(),
            phase: FormationPhase::Uninitialized,
            real_master: None,
            movement: MasterMovement::Random,
            anchor: None,
            waypoint_handoff: None,
            mirrored: false,
            keep_compact: false,
            persistent: false,
            positions_dirty: true,
            next_check_ms: config.settle_delay_ms,
            settle_delay_ms: config.settle_delay_ms,
            liveness_interval_ms: config.liveness_interval_ms,
            master_death_recheck_ms: config.master_death_recheck_ms,
        }
    }

    pub fn from_template(template: &FormationTemplate, config: &FormationConfig) -> Self {
        let mut engine = Self::new(template.shape, template.spread, config);
        engine.slot_overrides = template.slot_overrides.clone();
        engine.keep_compact = template.keep_compact;
        engine
    }

    /// Never invalidate; a leaderless formation awaits a successor instead.
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn phase(&self) -> FormationPhase {
        self.phase
    }

    pub fn shape(&self) -> FormationShape {
        self.shape
    }

    pub fn spread(&self) -> f32 {
        self.spread
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn keeps_compact(&self) -> bool {
        self.keep_compact
    }

    pub fn real_master(&self) -> Option<EntityGuid> {
        self.real_master
    }

    pub fn master_movement(&self) -> MasterMovement {
        self.movement
    }

    pub fn is_valid(&self) -> bool {
        self.phase != FormationPhase::Invalid
    }

    pub fn master(&self, slots: &SlotTable) -> Option<EntityGuid> {
        slots.master_occupant()
    }

    /// Slot angle as the movement layer should read it.
    pub fn slot_angle(&self, slot: &Slot) -> Option<f32> {
        slot.geometry()
            .map(|geometry| mirror_angle(geometry.angle, self.mirrored))
    }

    pub fn slot_distance(&self, slot: &Slot) -> Option<f32> {
        slot.geometry().map(|geometry| geometry.distance)
    }

    /// Enables formation geometry on every slot of a freshly attached group.
    pub fn attach(&mut self, slots: &mut SlotTable) {
        for slot in slots.iter_mut() {
            slot.enable_formation();
        }
        self.positions_dirty = true;
    }

    pub fn on_slot_added(
        &mut self,
        slots: &mut SlotTable,
        world: &mut dyn FormationWorld,
        entity: EntityGuid,
    ) {
        let Some(mut ordinal) = slots.ordinal_of(entity) else {
            error!(entity = entity.0, "formation_slot_added_without_slot");
            return;
        };
        if let Some(slot) = slots.get_mut(ordinal) {
            slot.enable_formation();
        }

        let temp_summon = world
            .member_kind(entity)
            .is_some_and(|kind| kind.is_temp_summon());
        let master_free = match slots.master_occupant() {
            None => true,
            Some(current) => current == entity || !world.is_alive(current),
        };
        if self.real_master.is_none()
            && (ordinal == MASTER_SLOT || (temp_summon && master_free))
        {
            if ordinal != MASTER_SLOT {
                slots.exchange(ordinal, MASTER_SLOT);
                ordinal = MASTER_SLOT;
            }
            self.promote(slots, world, entity);
        }

        if world.is_alive(entity) {
            self.set_followers_master(slots, world);
        }

        if self.phase == FormationPhase::Active && slots.master_occupant().is_some() {
            self.fix_slots_positions(slots, world, false);
        } else {
            self.positions_dirty = true;
        }
        debug!(
            entity = entity.0,
            slot = ordinal,
            phase = ?self.phase,
            "formation_slot_added"
        );
    }

    fn promote(&mut self, slots: &mut SlotTable, world: &mut dyn FormationWorld, entity: EntityGuid) {
        self.real_master = Some(entity);
        self.movement = movement_for(world.default_movement(entity), entity);
        self.anchor = world.respawn_anchor(entity);
        if let Some(slot) = slots.get_mut(MASTER_SLOT) {
            slot.set_geometry(Some(SlotGeometry::MASTER));
        }
        if self.phase == FormationPhase::Uninitialized {
            self.next_check_ms = self.settle_delay_ms;
        }
        self.phase = FormationPhase::Active;
        info!(
            master = entity.0,
            movement = ?self.movement,
            shape = self.shape.as_token(),
            "formation_master_seated"
        );
    }

    /// Advances the liveness timer. Returns whether the formation is still
    /// valid.
    pub fn update(
        &mut self,
        slots: &mut SlotTable,
        world: &mut dyn FormationWorld,
        delta_ms: u32,
    ) -> bool {
        if self.phase == FormationPhase::Invalid {
            return false;
        }
        if self.next_check_ms > delta_ms {
            self.next_check_ms -= delta_ms;
            return true;
        }
        self.next_check_ms = self.liveness_interval_ms;

        if self.phase == FormationPhase::Uninitialized {
            return true;
        }

        if self.positions_dirty {
            self.fix_slots_positions(slots, world, false);
        }

        let master_alive = slots
            .master_occupant()
            .is_some_and(|master| world.is_alive(master));
        if !master_alive || self.phase == FormationPhase::AwaitingSuccessor {
            self.try_set_new_master(slots, world, None);
        }
        self.is_valid()
    }

    /// Seats a new master. With a candidate, it must be an alive member able
    /// to lead; otherwise the first alive creature in ordinal order is taken.
    pub fn try_set_new_master(
        &mut self,
        slots: &mut SlotTable,
        world: &mut dyn FormationWorld,
        candidate: Option<EntityGuid>,
    ) -> bool {
        if self.phase == FormationPhase::Invalid {
            return false;
        }
        let (ordinal, chosen) = match candidate {
            Some(candidate) => {
                let can_lead = world
                    .member_kind(candidate)
                    .is_some_and(|kind| kind.can_lead());
                let Some(ordinal) = slots.ordinal_of(candidate) else {
                    debug!(candidate = candidate.0, "formation_master_candidate_not_member");
                    return false;
                };
                if !can_lead || !world.is_alive(candidate) {
                    debug!(candidate = candidate.0, "formation_master_candidate_rejected");
                    return false;
                }
                (ordinal, candidate)
            }
            None => match slots.first_alive_leader(&*world) {
                Some(found) => found,
                None if self.persistent => {
                    if self.phase != FormationPhase::Uninitialized {
                        self.phase = FormationPhase::AwaitingSuccessor;
                    }
                    debug!(members = slots.len(), "formation_awaiting_members");
                    return false;
                }
                None => {
                    self.phase = FormationPhase::Invalid;
                    self.real_master = None;
                    info!(members = slots.len(), "formation_invalidated");
                    return false;
                }
            },
        };

        if ordinal != MASTER_SLOT {
            slots.exchange(ordinal, MASTER_SLOT);
        }
        if let Some(slot) = slots.get_mut(MASTER_SLOT) {
            slot.set_geometry(Some(SlotGeometry::MASTER));
        }

        let path_owner = match self.real_master {
            Some(real) => real,
            None => {
                self.real_master = Some(chosen);
                self.movement = movement_for(world.default_movement(chosen), chosen);
                self.anchor = world.respawn_anchor(chosen);
                chosen
            }
        };
        self.phase = FormationPhase::Active;

        match self.movement {
            MasterMovement::Waypoint => {
                world.follow_waypoints(chosen, path_owner, self.waypoint_handoff.take());
            }
            MasterMovement::Random => {
                let anchor = self
                    .anchor
                    .or_else(|| world.respawn_anchor(chosen))
                    .or_else(|| {
                        world.position(chosen).map(|position| RespawnAnchor {
                            position,
                            radius: 0.0,
                        })
                    });
                match anchor {
                    Some(anchor) => world.roam_around(chosen, anchor),
                    None => world.clear_movement(chosen),
                }
            }
        }

        self.set_followers_master(slots, world);
        info!(
            master = chosen.0,
            previous_slot = ordinal,
            "formation_master_elected"
        );
        true
    }

    /// Re-points every alive follower at the current master.
    pub fn set_followers_master(&self, slots: &SlotTable, world: &mut dyn FormationWorld) {
        let Some(master) = slots.master_occupant() else {
            return;
        };
        if !world.is_alive(master) {
            return;
        }
        let followers = slots
            .iter()
            .filter(|slot| !slot.is_master_slot() && slot.is_formation_enabled())
            .filter_map(Slot::occupant)
            .collect::<Vec<_>>();
        for follower in followers {
            if world.is_alive(follower) && world.formation_target(follower) != Some(master) {
                world.follow_in_formation(follower, master);
            }
        }
    }

    pub fn on_death(&mut self, slots: &SlotTable, world: &dyn FormationWorld, entity: EntityGuid) {
        if slots.master_occupant() != Some(entity) {
            return;
        }
        self.waypoint_handoff = Some(world.waypoint_progress(entity));
        self.next_check_ms = self.next_check_ms.min(self.master_death_recheck_ms);
        debug!(
            master = entity.0,
            recheck_ms = self.next_check_ms,
            "formation_master_died"
        );
    }

    /// Returns `false` when no slot could take the entity. A creature whose
    /// free slot is the master slot reclaims leadership before anyone moves;
    /// if that is refused it takes a follower slot instead.
    pub fn on_respawn(
        &mut self,
        slots: &mut SlotTable,
        world: &mut dyn FormationWorld,
        entity: EntityGuid,
    ) -> bool {
        let may_lead = self.phase != FormationPhase::Invalid
            && world.is_alive(entity)
            && world
                .member_kind(entity)
                .is_some_and(|kind| kind.can_lead());
        let mut free = slots.first_free_for(entity, may_lead, &*world);

        if free == Some(MASTER_SLOT) {
            if slots.ordinal_of(entity).is_none() {
                slots.seat(MASTER_SLOT, entity);
            }
            if self.try_set_new_master(slots, world, Some(entity)) {
                return true;
            }
            free = slots.first_free_for(entity, false, &*world);
        }

        let Some(free) = free else {
            error!(entity = entity.0, slots = slots.len(), "formation_respawn_no_free_slot");
            debug_assert!(false, "respawned member {} has no free slot", entity.0);
            return false;
        };

        match slots.ordinal_of(entity) {
            Some(current) => {
                slots.exchange(current, free);
            }
            None => {
                slots.seat(free, entity);
            }
        }
        if let Some(slot) = slots.get_mut(free) {
            slot.enable_formation();
        }

        let master = slots.master_occupant();
        if let Some(position) = master.and_then(|master| world.position(master)) {
            world.relocate(entity, position);
        }
        if self.keep_compact {
            self.fix_slots_positions(slots, world, true);
        }
        if let Some(slot) = slots.get_mut(free) {
            slot.request_recompute();
        }
        if let Some(master) = master.filter(|master| world.is_alive(*master)) {
            world.follow_in_formation(entity, master);
        }
        debug!(entity = entity.0, slot = free, "formation_member_respawned");
        true
    }

    /// Permanent removal. The caller must invoke this while the entity is
    /// still resolvable through the world. Temp summons lose their slot,
    /// except in the master slot, which always stays for the successor.
    pub fn on_entity_delete(
        &mut self,
        slots: &mut SlotTable,
        world: &dyn FormationWorld,
        entity: EntityGuid,
    ) {
        if self.real_master == Some(entity) {
            self.real_master = None;
        }
        let Some(ordinal) = slots.ordinal_of(entity) else {
            return;
        };
        let temp_summon = world
            .member_kind(entity)
            .is_some_and(|kind| kind.is_temp_summon());

        if ordinal == MASTER_SLOT {
            if self.phase != FormationPhase::Invalid {
                self.phase = FormationPhase::AwaitingSuccessor;
            }
            self.real_master = None;
            self.next_check_ms = self.next_check_ms.min(self.master_death_recheck_ms);
            info!(master = entity.0, "formation_master_removed");
        }

        if temp_summon && ordinal != MASTER_SLOT {
            slots.remove(ordinal);
        } else if let Some(slot) = slots.get_mut(ordinal) {
            slot.set_occupant(None);
        }
        self.positions_dirty = true;
    }

    pub fn switch_formation(&mut self, slots: &SlotTable, shape_id: u32) -> bool {
        let Some(shape) = FormationShape::from_id(shape_id) else {
            warn!(shape = shape_id, "formation_switch_invalid_shape");
            return false;
        };
        if shape == self.shape {
            return false;
        }
        if let Some(expected) = self.fixed_member_count() {
            if expected != slots.len() {
                warn!(
                    shape = shape.as_token(),
                    expected,
                    actual = slots.len(),
                    "formation_switch_member_count_mismatch"
                );
                return false;
            }
        }
        self.shape = shape;
        self.positions_dirty = true;
        info!(shape = shape.as_token(), "formation_switched");
        true
    }

    fn fixed_member_count(&self) -> Option<usize> {
        if self.slot_overrides.is_empty() {
            None
        } else {
            Some(self.slot_overrides.len())
        }
    }

    /// Restores the template shape and clears mirroring.
    pub fn reset(&mut self) {
        if self.real_master.is_none() {
            return;
        }
        self.mirrored = false;
        self.shape = self.template_shape;
        self.positions_dirty = true;
    }

    pub fn compact(&mut self, slots: &mut SlotTable, world: &dyn FormationWorld) {
        self.keep_compact = true;
        self.fix_slots_positions(slots, world, true);
    }

    pub fn set_mirrored(&mut self, slots: &mut SlotTable, mirrored: bool) {
        if self.mirrored == mirrored {
            return;
        }
        self.mirrored = mirrored;
        for slot in slots.iter_mut().filter(|slot| slot.occupant().is_some()) {
            slot.request_recompute();
        }
    }

    pub fn on_waypoint_start(&mut self, slots: &mut SlotTable) {
        self.set_mirrored(slots, false);
    }

    pub fn on_waypoint_end(&mut self, slots: &mut SlotTable) {
        self.set_mirrored(slots, true);
    }

    /// Stops every alive member and strips formation geometry. The caller
    /// drops the engine afterwards.
    pub fn disband(&mut self, slots: &mut SlotTable, world: &mut dyn FormationWorld) {
        let master = slots.master_occupant();
        let members = slots.occupants().collect::<Vec<_>>();
        for member in members {
            if !world.is_alive(member) {
                continue;
            }
            if Some(member) == master && self.movement == MasterMovement::Waypoint {
                self.waypoint_handoff = Some(world.waypoint_progress(member));
            }
            world.clear_movement(member);
        }
        for slot in slots.iter_mut() {
            slot.set_geometry(None);
            slot.take_position_request();
        }
        info!(master = ?master.map(|guid| guid.0), "formation_disbanded");
    }

    /// Recomputes follower geometry for the current shape.
    pub fn fix_slots_positions(
        &mut self,
        slots: &mut SlotTable,
        world: &dyn FormationWorld,
        only_alive: bool,
    ) {
        self.positions_dirty = false;
        let followers = slots
            .iter()
            .filter(|slot| !slot.is_master_slot() && slot.is_formation_enabled())
            .filter(|slot| {
                slot.occupant()
                    .is_some_and(|occupant| !only_alive || world.is_alive(occupant))
            })
            .map(Slot::ordinal)
            .collect::<Vec<_>>();
        if followers.is_empty() {
            return;
        }

        if let Some(slot) = slots.get_mut(MASTER_SLOT) {
            if slot.is_formation_enabled() {
                slot.set_geometry(Some(SlotGeometry::MASTER));
            }
        }

        let total = followers.len() as u32;
        let use_overrides = self.shape == self.template_shape && !self.slot_overrides.is_empty();
        for (index, ordinal) in followers.iter().enumerate() {
            let geometry = if use_overrides {
                self.slot_overrides.get(ordinal).copied()
            } else {
                formation_offset(self.shape, index as u32 + 1, total, self.spread)
            };
            if let (Some(geometry), Some(slot)) = (geometry, slots.get_mut(*ordinal)) {
                slot.set_geometry(Some(geometry));
            }
        }

        for slot in slots.iter_mut().filter(|slot| slot.occupant().is_some()) {
            slot.request_recompute();
        }
        debug!(
            shape = self.shape.as_token(),
            followers = total,
            only_alive,
            "formation_positions_fixed"
        );
    }

    /// One-shot: whether the occupant of `ordinal` must recompute its target.
    pub fn take_position_request(&self, slots: &mut SlotTable, ordinal: SlotOrdinal) -> bool {
        slots
            .get_mut(ordinal)
            .is_some_and(Slot::take_position_request)
    }

    /// Consumes pending follower recomputes. Left untouched while no master
    /// is seated.
    pub fn drain_follow_requests(&self, slots: &mut SlotTable) -> Vec<FollowRequest> {
        let Some(master) = slots.master_occupant() else {
            return Vec::new();
        };
        let mut requests = Vec::new();
        for slot in slots.iter_mut() {
            if !slot.needs_recompute() {
                continue;
            }
            let (Some(follower), Some(geometry)) = (slot.occupant(), slot.geometry()) else {
                continue;
            };
            slot.take_position_request();
            if slot.is_master_slot() {
                continue;
            }
            requests.push(FollowRequest {
                follower,
                master,
                angle: mirror_angle(geometry.angle, self.mirrored),
                distance: geometry.distance,
            });
        }
        requests
    }

    pub fn snapshot(&self, slots: &SlotTable) -> FormationSnapshot {
        FormationSnapshot {
            phase: self.phase,
            shape: self.shape,
            spread: self.spread,
            mirrored: self.mirrored,
            keep_compact: self.keep_compact,
            master: slots.master_occupant(),
            real_master: self.real_master,
            movement: self.movement,
        }
    }
}

fn movement_for(movement: DefaultMovement, entity: EntityGuid) -> MasterMovement {
    match movement {
        DefaultMovement::Random => MasterMovement::Random,
        DefaultMovement::Waypoint => MasterMovement::Waypoint,
        other => {
            error!(
                master = entity.0,
                movement = ?other,
                "formation_master_movement_unsupported"
            );
            MasterMovement::Random
        }
    }
}
