//! Booking state machine.
//!
//! ```text
//! pending ─► confirmed ─► checked_in ─► checked_out ─► completed
//!    │  └──────────────────────┘ (check-in straight from pending)
//!    ├─► rejected                       (homeowner, pending only)
//!    └─► cancelled_by_driver / cancelled_by_homeowner (pending | confirmed)
//! ```
//!
//! Authorization is a single table lookup keyed on `(from, to)`. Admins may
//! force any edge out of a non-terminal state; nobody leaves a terminal state.

use ulid::Ulid;

use crate::model::{Booking, BookingStatus, Ms, Role, User};

use super::EngineError;

use crate::model::BookingStatus::*;

/// Which side of a booking may drive an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Driver,
    Homeowner,
}

/// A caller resolved against a specific booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Driver(Ulid),
    Homeowner(Ulid),
    Admin(Ulid),
}

impl Actor {
    pub fn for_booking(user: &User, booking: &Booking) -> Result<Actor, EngineError> {
        if user.role == Role::Admin {
            Ok(Actor::Admin(user.id))
        } else if user.id == booking.driver_id {
            Ok(Actor::Driver(user.id))
        } else if user.id == booking.homeowner_id {
            Ok(Actor::Homeowner(user.id))
        } else {
            Err(EngineError::Forbidden("not a party to this booking"))
        }
    }

    pub fn id(&self) -> Ulid {
        match self {
            Actor::Driver(id) | Actor::Homeowner(id) | Actor::Admin(id) => *id,
        }
    }

    fn is(&self, party: Party) -> bool {
        matches!(
            (self, party),
            (Actor::Driver(_), Party::Driver) | (Actor::Homeowner(_), Party::Homeowner)
        )
    }
}

struct Edge {
    from: &'static [BookingStatus],
    to: BookingStatus,
    party: Party,
}

const EDGES: &[Edge] = &[
    Edge { from: &[Pending], to: Confirmed, party: Party::Homeowner },
    Edge { from: &[Pending], to: Rejected, party: Party::Homeowner },
    Edge { from: &[Pending, Confirmed], to: CancelledByDriver, party: Party::Driver },
    Edge { from: &[Pending, Confirmed], to: CancelledByHomeowner, party: Party::Homeowner },
    // Arrival may precede the homeowner's confirmation.
    Edge { from: &[Pending, Confirmed], to: CheckedIn, party: Party::Driver },
    Edge { from: &[CheckedIn], to: CheckedOut, party: Party::Driver },
    Edge { from: &[CheckedOut], to: Completed, party: Party::Homeowner },
];

/// The party allowed to move a booking from `from` to `to`, if the edge exists.
pub fn required_party(from: BookingStatus, to: BookingStatus) -> Option<Party> {
    EDGES
        .iter()
        .find(|e| e.to == to && e.from.contains(&from))
        .map(|e| e.party)
}

pub fn authorize(from: BookingStatus, to: BookingStatus, actor: &Actor) -> Result<(), EngineError> {
    let invalid = EngineError::InvalidTransition { from, to };
    if from.is_terminal() || from == to || to == Pending {
        return Err(invalid);
    }
    if let Actor::Admin(_) = actor {
        return Ok(());
    }
    match required_party(from, to) {
        None => Err(invalid),
        Some(party) if actor.is(party) => Ok(()),
        Some(Party::Driver) => Err(EngineError::Forbidden("only the driver may do this")),
        Some(Party::Homeowner) => Err(EngineError::Forbidden("only the homeowner may do this")),
    }
}

/// Move the booking to `to` and stamp the lifecycle time it owns.
pub fn stamp(booking: &mut Booking, to: BookingStatus, at: Ms) {
    match to {
        Confirmed => booking.homeowner_confirm_time = Some(at),
        Rejected => booking.homeowner_reject_time = Some(at),
        CheckedIn => booking.driver_check_in_time = Some(at),
        CheckedOut => booking.driver_check_out_time = Some(at),
        _ => {}
    }
    booking.status = to;
    booking.updated_at = at;
}
