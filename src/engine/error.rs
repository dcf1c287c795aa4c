use ulid::Ulid;

use crate::model::{BookingStatus, Span};

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or out-of-policy input.
    Validation(&'static str),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Overlap with the given booking or slot.
    Conflict(Ulid),
    /// No open availability window contains the requested range.
    NotCovered(Span),
    /// Spot is not active or not accepting bookings.
    SpotUnavailable(Ulid),
    Forbidden(&'static str),
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    InvalidState(&'static str),
    LimitExceeded(&'static str),
    /// Payment gateway failed or timed out.
    Gateway(String),
    WalError(String),
}

/// Error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    NotFound,
    Conflict,
    Forbidden,
    InvalidTransition,
    Upstream,
    Storage,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorClass::Validation,
            EngineError::NotFound(_) => ErrorClass::NotFound,
            EngineError::AlreadyExists(_)
            | EngineError::Conflict(_)
            | EngineError::NotCovered(_)
            | EngineError::SpotUnavailable(_) => ErrorClass::Conflict,
            EngineError::Forbidden(_) => ErrorClass::Forbidden,
            EngineError::InvalidTransition { .. } | EngineError::InvalidState(_) => {
                ErrorClass::InvalidTransition
            }
            EngineError::Gateway(_) => ErrorClass::Upstream,
            EngineError::WalError(_) => ErrorClass::Storage,
        }
    }

    /// HTTP-equivalent status.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Validation | ErrorClass::InvalidTransition => 400,
            ErrorClass::Forbidden => 403,
            ErrorClass::NotFound => 404,
            ErrorClass::Conflict => 409,
            ErrorClass::Upstream => 502,
            ErrorClass::Storage => 500,
        }
    }

    /// Only transport/persistence failures may be retried.
    pub fn retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Upstream | ErrorClass::Storage)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with: {id}"),
            EngineError::NotCovered(span) => write!(
                f,
                "range [{}, {}) is not inside an open availability window",
                span.start, span.end
            ),
            EngineError::SpotUnavailable(id) => {
                write!(f, "spot {id} is not accepting bookings")
            }
            EngineError::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid transition: {from} -> {to}")
            }
            EngineError::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Gateway(e) => write!(f, "payment gateway error: {e}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        let id = Ulid::new();
        assert_eq!(EngineError::Validation("end <= start").status_code(), 400);
        assert_eq!(EngineError::NotFound(id).status_code(), 404);
        assert_eq!(EngineError::Conflict(id).status_code(), 409);
        assert_eq!(EngineError::AlreadyExists(id).status_code(), 409);
        assert_eq!(EngineError::Forbidden("not the driver").status_code(), 403);
        let invalid = EngineError::InvalidTransition {
            from: BookingStatus::Confirmed,
            to: BookingStatus::Rejected,
        };
        assert_eq!(invalid.status_code(), 400);
        assert_eq!(invalid.to_string(), "invalid transition: confirmed -> rejected");
    }

    #[test]
    fn only_infrastructure_errors_retry() {
        assert!(EngineError::Gateway("timeout".into()).retryable());
        assert!(EngineError::WalError("disk full".into()).retryable());
        assert!(!EngineError::Conflict(Ulid::new()).retryable());
        assert!(!EngineError::InvalidState("booked").retryable());
    }
}
