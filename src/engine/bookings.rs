use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_booking_conflict, now_ms, validate_span};
use super::lifecycle::{self, Actor};
use super::{Engine, EngineError};

impl Engine {
    /// Conflict guard. Under the spot's write lock: the spot must take
    /// bookings, nothing live may overlap, and an open window must cover the
    /// range. The window is then carved so the booked part is marked.
    pub async fn create_booking(
        &self,
        caller_id: Ulid,
        id: Ulid,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
        total_price: Cents,
    ) -> Result<Booking, EngineError> {
        let caller = self.caller(&caller_id)?;
        if caller.role != Role::Driver {
            return Err(EngineError::Forbidden("only drivers can book spots"));
        }
        let span = validate_span(start, end)?;
        if total_price <= 0 {
            return Err(EngineError::Validation("total price must be positive"));
        }
        if total_price > MAX_PRICE_CENTS {
            return Err(EngineError::LimitExceeded("price too large"));
        }

        let shard = self.spot_shard(&spot_id)?;
        let mut guard = shard.write().await;
        if !guard.spot.accepts_bookings() {
            return Err(EngineError::SpotUnavailable(spot_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many bookings on spot"));
        }
        if let Err(e) = check_no_booking_conflict(&guard, &span, None) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }
        let (source, has_tail) = match guard.covering_slot(&span) {
            Some(slot) => (slot.id, slot.span.end > span.end),
            None => return Err(EngineError::NotCovered(span)),
        };

        let now = now_ms();
        let booking = Booking {
            id,
            spot_id,
            driver_id: caller.id,
            homeowner_id: guard.spot.owner_id,
            span,
            total_price,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            gateway_reference: None,
            created_at: now,
            updated_at: now,
            driver_check_in_time: None,
            driver_check_out_time: None,
            homeowner_confirm_time: None,
            homeowner_reject_time: None,
        };
        let carve = Carve {
            source,
            booked: Ulid::new(),
            tail: has_tail.then(Ulid::new),
        };
        let event = Event::BookingCreated { booking: booking.clone(), carve: Some(carve) };
        self.persist_new(&mut guard, id, &event).await?;
        drop(guard);

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        debug!("booking {id} on {spot_id}: [{}, {})", span.start, span.end);
        self.notify_user(
            booking.homeowner_id,
            EntityKind::Booking,
            id,
            "new booking request".to_string(),
        );
        Ok(booking)
    }

    /// Drive a booking through the state machine on behalf of `caller_id`.
    pub async fn transition_booking(
        &self,
        caller_id: Ulid,
        booking_id: Ulid,
        to: BookingStatus,
    ) -> Result<Booking, EngineError> {
        let caller = self.caller(&caller_id)?;
        let mut guard = self.resolve_entity_write(&booking_id).await?;
        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let actor = Actor::for_booking(&caller, booking)?;
        let from = booking.status;
        lifecycle::authorize(from, to, &actor)?;

        let event = Event::BookingTransitioned {
            id: booking_id,
            spot_id: guard.id(),
            from,
            to,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let booking = guard
            .booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))?;
        drop(guard);

        metrics::counter!(observability::BOOKING_TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        debug!("booking {booking_id}: {from} -> {to} by {}", actor.id());
        let message = format!("booking is now {to}");
        match actor {
            Actor::Driver(_) => {
                self.notify_user(booking.homeowner_id, EntityKind::Booking, booking_id, message)
            }
            Actor::Homeowner(_) => {
                self.notify_user(booking.driver_id, EntityKind::Booking, booking_id, message)
            }
            Actor::Admin(_) => {
                self.notify_user(booking.driver_id, EntityKind::Booking, booking_id, message.clone());
                self.notify_user(booking.homeowner_id, EntityKind::Booking, booking_id, message);
            }
        }
        Ok(booking)
    }
}
