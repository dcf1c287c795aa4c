//! Users and spot listings: the identity and ownership lookups the booking
//! core authorizes against.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{unmap_spot, Engine, EngineError};

/// Listing request for a new spot. It starts `pending_verification` and available.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSpot {
    pub id: Ulid,
    pub hourly_price: Cents,
    pub latitude: f64,
    pub longitude: f64,
    pub vehicle_capacity: u32,
    pub amenities: Vec<String>,
}

fn validate_price(price: Cents) -> Result<(), EngineError> {
    if price <= 0 {
        return Err(EngineError::Validation("price must be positive"));
    }
    if price > MAX_PRICE_CENTS {
        return Err(EngineError::LimitExceeded("price too large"));
    }
    Ok(())
}

impl NewSpot {
    fn validate(&self) -> Result<(), EngineError> {
        validate_price(self.hourly_price)?;
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(EngineError::Validation("coordinates out of range"));
        }
        if self.vehicle_capacity == 0 {
            return Err(EngineError::Validation("vehicle capacity must be at least 1"));
        }
        if self.amenities.len() > MAX_AMENITIES {
            return Err(EngineError::LimitExceeded("too many amenities"));
        }
        if self.amenities.iter().any(|a| a.is_empty() || a.len() > MAX_NAME_LEN) {
            return Err(EngineError::Validation("bad amenity name"));
        }
        Ok(())
    }
}

pub(super) fn ensure_owner_or_admin(caller: &User, spot: &SpotRecord) -> Result<(), EngineError> {
    if caller.role == Role::Admin || spot.owner_id == caller.id {
        Ok(())
    } else {
        Err(EngineError::Forbidden("not the owner of this spot"))
    }
}

/// Spot status moves only along these edges.
fn status_edge_allowed(from: SpotStatus, to: SpotStatus) -> bool {
    use SpotStatus::*;
    matches!(
        (from, to),
        (PendingVerification, Active)
            | (PendingVerification, Rejected)
            | (Active, Inactive)
            | (Inactive, Active)
    )
}

impl Engine {
    /// Register a user. Callers register themselves; an admin may register
    /// anyone. Only an admin can create another admin.
    pub async fn register_user(
        &self,
        caller_id: Ulid,
        id: Ulid,
        role: Role,
        name: Option<String>,
    ) -> Result<User, EngineError> {
        if let Some(n) = &name
            && n.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("name too long"));
        }
        let caller_is_admin = self
            .store
            .user(&caller_id)
            .is_some_and(|u| u.role == Role::Admin);
        if caller_id != id && !caller_is_admin {
            return Err(EngineError::Forbidden("cannot register another user"));
        }
        if role == Role::Admin && !caller_is_admin {
            return Err(EngineError::Forbidden("only an admin can create admins"));
        }

        let _registry = self.registry.lock().await;
        if self.store.contains_user(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let user = User { id, role, name };
        self.wal_append(&Event::UserRegistered { user: user.clone() })
            .await?;
        self.store.insert_user(user.clone());
        info!("registered {} {id}", role.as_str());
        Ok(user)
    }

    /// Ensure the bootstrap admin exists. No-op when already registered.
    pub async fn seed_admin(&self, id: Ulid) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        if let Some(existing) = self.store.user(&id) {
            if existing.role != Role::Admin {
                tracing::warn!("bootstrap admin {id} is registered as {}", existing.role.as_str());
            }
            return Ok(());
        }
        let user = User { id, role: Role::Admin, name: Some("admin".into()) };
        self.wal_append(&Event::UserRegistered { user: user.clone() })
            .await?;
        self.store.insert_user(user);
        info!("seeded bootstrap admin {id}");
        Ok(())
    }

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.store.user(id)
    }

    pub async fn list_spot(&self, caller_id: Ulid, new: NewSpot) -> Result<SpotRecord, EngineError> {
        let caller = self.caller(&caller_id)?;
        if caller.role != Role::Homeowner {
            return Err(EngineError::Forbidden("only homeowners list spots"));
        }
        new.validate()?;

        let _registry = self.registry.lock().await;
        if self.store.spot_count() >= MAX_SPOTS {
            return Err(EngineError::LimitExceeded("too many spots"));
        }
        if self.store.contains_spot(&new.id) {
            return Err(EngineError::AlreadyExists(new.id));
        }
        let spot = SpotRecord {
            id: new.id,
            owner_id: caller.id,
            hourly_price: new.hourly_price,
            latitude: new.latitude,
            longitude: new.longitude,
            vehicle_capacity: new.vehicle_capacity,
            amenities: new.amenities,
            status: SpotStatus::PendingVerification,
            is_available: true,
        };
        self.wal_append(&Event::SpotListed { spot: spot.clone() })
            .await?;
        self.store
            .insert_spot(spot.id, Arc::new(RwLock::new(SpotState::new(spot.clone()))));
        info!("spot {} listed by {}", spot.id, caller.id);
        Ok(spot)
    }

    /// Apply an enumerated set of spot changes. Status moves are admin-only;
    /// availability and price belong to the owner (or an admin).
    pub async fn change_spot(
        &self,
        caller_id: Ulid,
        spot_id: Ulid,
        changes: Vec<SpotChange>,
    ) -> Result<SpotRecord, EngineError> {
        let caller = self.caller(&caller_id)?;
        if changes.is_empty() {
            return Err(EngineError::Validation("no changes given"));
        }
        let shard = self.spot_shard(&spot_id)?;
        let mut guard = shard.write().await;
        ensure_owner_or_admin(&caller, &guard.spot)?;
        let is_admin = caller.role == Role::Admin;
        for change in &changes {
            match change {
                SpotChange::Status(to) => {
                    if !is_admin {
                        return Err(EngineError::Forbidden("only an admin can change spot status"));
                    }
                    if !status_edge_allowed(guard.spot.status, *to) {
                        return Err(EngineError::InvalidState("spot status change not allowed"));
                    }
                }
                SpotChange::HourlyPrice(price) => validate_price(*price)?,
                SpotChange::Availability(_) => {}
            }
        }

        let event = Event::SpotChanged { id: spot_id, changes };
        self.persist_and_apply(&mut guard, &event).await?;
        let availability = if guard.spot.is_available { "available" } else { "unavailable" };
        self.notify_user(
            guard.spot.owner_id,
            EntityKind::Spot,
            spot_id,
            format!("spot is now {} and {availability}", guard.spot.status.as_str()),
        );
        Ok(guard.spot.clone())
    }

    /// Delist a spot and cascade its ledger. Refused while any booking still
    /// holds the spot's timeline.
    pub async fn delist_spot(&self, caller_id: Ulid, spot_id: Ulid) -> Result<(), EngineError> {
        let caller = self.caller(&caller_id)?;
        let _registry = self.registry.lock().await;
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.write().await;
        ensure_owner_or_admin(&caller, &guard.spot)?;
        if let Some(active) = guard.bookings.iter().find(|b| !b.status.is_terminal()) {
            return Err(EngineError::Conflict(active.id));
        }

        self.wal_append(&Event::SpotDelisted { id: spot_id }).await?;
        unmap_spot(&guard, &self.store);
        self.store.remove_spot(&spot_id);
        info!("spot {spot_id} delisted");
        Ok(())
    }

    pub async fn spot(&self, spot_id: &Ulid) -> Result<SpotRecord, EngineError> {
        let shard = self.spot_shard(spot_id)?;
        let guard = shard.read().await;
        Ok(guard.spot.clone())
    }

    /// All listed spots, ordered by id.
    pub async fn list_spots(&self) -> Vec<SpotRecord> {
        let mut ids = self.store.spot_ids();
        ids.sort();
        let mut spots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(shard) = self.store.get_spot(&id) {
                spots.push(shard.read().await.spot.clone());
            }
        }
        spots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spot_status_edges() {
        use SpotStatus::*;
        assert!(status_edge_allowed(PendingVerification, Active));
        assert!(status_edge_allowed(Active, Inactive));
        assert!(status_edge_allowed(Inactive, Active));
        assert!(!status_edge_allowed(Rejected, Active));
        assert!(!status_edge_allowed(Active, PendingVerification));
        assert!(!status_edge_allowed(Active, Active));
    }

    #[test]
    fn new_spot_validation() {
        let good = NewSpot {
            id: Ulid::new(),
            hourly_price: 400,
            latitude: 40.7,
            longitude: -74.0,
            vehicle_capacity: 1,
            amenities: vec!["ev_charger".into()],
        };
        assert!(good.validate().is_ok());
        assert!(NewSpot { hourly_price: 0, ..good.clone() }.validate().is_err());
        assert!(NewSpot { latitude: 91.0, ..good.clone() }.validate().is_err());
        assert!(NewSpot { vehicle_capacity: 0, ..good.clone() }.validate().is_err());
        assert!(NewSpot { amenities: vec![String::new()], ..good }.validate().is_err());
    }
}
