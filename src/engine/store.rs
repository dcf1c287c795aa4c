use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::SharedSpotState;

/// In-memory materialized state rebuilt from the WAL.
pub struct Store {
    spots: DashMap<Ulid, SharedSpotState>,
    users: DashMap<Ulid, User>,
    /// Reverse lookup: slot/booking/transaction id → spot id.
    entity_to_spot: DashMap<Ulid, Ulid>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            spots: DashMap::new(),
            users: DashMap::new(),
            entity_to_spot: DashMap::new(),
        }
    }

    // ── Users ────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn contains_user(&self, id: &Ulid) -> bool {
        self.users.contains_key(id)
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn users(&self) -> Vec<User> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }

    // ── Spots ────────────────────────────────────────────────

    pub fn spot_count(&self) -> usize {
        self.spots.len()
    }

    pub fn contains_spot(&self, id: &Ulid) -> bool {
        self.spots.contains_key(id)
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.spots.get(id).map(|e| e.value().clone())
    }

    pub fn insert_spot(&self, id: Ulid, state: SharedSpotState) {
        self.spots.insert(id, state);
    }

    pub fn remove_spot(&self, id: &Ulid) -> Option<(Ulid, SharedSpotState)> {
        self.spots.remove(id)
    }

    pub fn spot_ids(&self) -> Vec<Ulid> {
        self.spots.iter().map(|e| *e.key()).collect()
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn spot_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_spot.get(entity_id).map(|e| *e.value())
    }

    /// Claim `entity_id` for `spot_id`. False if the id is already taken.
    pub fn claim_entity(&self, entity_id: Ulid, spot_id: Ulid) -> bool {
        match self.entity_to_spot.entry(entity_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(spot_id);
                true
            }
        }
    }

    pub fn map_entity(&self, entity_id: Ulid, spot_id: Ulid) {
        self.entity_to_spot.insert(entity_id, spot_id);
    }

    pub fn unmap_entity(&self, entity_id: &Ulid) {
        self.entity_to_spot.remove(entity_id);
    }
}
