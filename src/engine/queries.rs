use ulid::Ulid;

use crate::model::*;

use super::directory::ensure_owner_or_admin;
use super::lifecycle::Actor;
use super::{Engine, EngineError};

/// Whose bookings to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Spot(Ulid),
    Driver(Ulid),
    Homeowner(Ulid),
}

impl Engine {
    /// A single booking, visible to its parties and admins.
    pub async fn booking(&self, caller_id: Ulid, booking_id: Ulid) -> Result<Booking, EngineError> {
        let caller = self.caller(&caller_id)?;
        let spot_id = self
            .store
            .spot_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        Actor::for_booking(&caller, booking)?;
        Ok(booking.clone())
    }

    /// Bookings ordered by start. A spot's bookings are for its owner; a
    /// driver's or homeowner's are for that user. Admins see everything.
    pub async fn bookings(&self, caller_id: Ulid, filter: BookingFilter) -> Result<Vec<Booking>, EngineError> {
        let caller = self.caller(&caller_id)?;
        let is_admin = caller.role == Role::Admin;

        let (user_id, by_driver) = match filter {
            BookingFilter::Spot(spot_id) => {
                let shard = self.spot_shard(&spot_id)?;
                let guard = shard.read().await;
                ensure_owner_or_admin(&caller, &guard.spot)?;
                return Ok(guard.bookings.clone());
            }
            BookingFilter::Driver(id) => (id, true),
            BookingFilter::Homeowner(id) => (id, false),
        };
        if !is_admin && user_id != caller.id {
            return Err(EngineError::Forbidden("cannot list another user's bookings"));
        }

        let mut found = Vec::new();
        for spot_id in self.store.spot_ids() {
            let Some(shard) = self.store.get_spot(&spot_id) else {
                continue;
            };
            let guard = shard.read().await;
            found.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| if by_driver { b.driver_id == user_id } else { b.homeowner_id == user_id })
                    .cloned(),
            );
        }
        found.sort_by_key(|b| (b.span.start, b.id));
        Ok(found)
    }

    /// Money movements for a booking, oldest first. Parties and admins only.
    pub async fn transactions(&self, caller_id: Ulid, booking_id: Ulid) -> Result<Vec<Transaction>, EngineError> {
        let caller = self.caller(&caller_id)?;
        let spot_id = self
            .store
            .spot_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        Actor::for_booking(&caller, booking)?;
        Ok(guard
            .transactions
            .iter()
            .filter(|t| t.booking_id == Some(booking_id))
            .cloned()
            .collect())
    }

    pub fn notifications(&self, caller_id: Ulid) -> Result<Vec<Notification>, EngineError> {
        let caller = self.caller(&caller_id)?;
        Ok(self.notify.list(&caller.id))
    }

    pub fn mark_notification_read(&self, caller_id: Ulid, notification_id: Ulid) -> Result<(), EngineError> {
        let caller = self.caller(&caller_id)?;
        if self.notify.mark_read(&caller.id, &notification_id) {
            Ok(())
        } else {
            Err(EngineError::NotFound(notification_id))
        }
    }
}
