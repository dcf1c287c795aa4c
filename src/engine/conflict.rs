use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Build a span from untrusted bounds: `end > start`, inside the supported range.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::Validation("end must be after start"))?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Conflict guard: any non-terminal booking overlapping `span` rejects it.
pub(crate) fn check_no_booking_conflict(
    ss: &SpotState,
    span: &Span,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    match ss
        .active_bookings_overlapping(span)
        .find(|b| Some(b.id) != ignore)
    {
        Some(hit) => Err(EngineError::Conflict(hit.id)),
        None => Ok(()),
    }
}

/// Declared windows must not overlap other unbooked windows. Booked slots are
/// consumed capacity and do not bound new offerings.
pub(crate) fn check_no_slot_overlap(
    ss: &SpotState,
    span: &Span,
    ignore: Option<Ulid>,
) -> Result<(), EngineError> {
    match ss
        .slots_overlapping(span)
        .find(|s| !s.is_booked && Some(s.id) != ignore)
    {
        Some(hit) => Err(EngineError::Conflict(hit.id)),
        None => Ok(()),
    }
}
