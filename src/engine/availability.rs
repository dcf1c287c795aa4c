use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_slot_overlap, now_ms, validate_span};
use super::directory::ensure_owner_or_admin;
use super::{Engine, EngineError};

// ── Interval algebra ─────────────────────────────────────────────

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => last.end = last.end.max(span.end),
            _ => merged.push(span),
        }
    }
    merged
}

/// `base` minus `to_remove`. Both sorted by start; `base` disjoint.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut first = 0;

    for &b in base {
        let mut cursor = b.start;
        while first < to_remove.len() && to_remove[first].end <= cursor {
            first += 1;
        }
        for r in to_remove[first..].iter().take_while(|r| r.start < b.end) {
            if r.start > cursor {
                result.push(Span::new(cursor, r.start));
            }
            cursor = cursor.max(r.end);
        }
        if cursor < b.end {
            result.push(Span::new(cursor, b.end));
        }
    }

    result
}

/// Bookable time inside `query`: unbooked ledger windows, clamped and merged,
/// minus every booking that still holds the timeline.
pub fn open_windows(ss: &SpotState, query: &Span) -> Vec<Span> {
    let offered: Vec<Span> = ss
        .slots_overlapping(query)
        .filter(|s| !s.is_booked)
        .filter_map(|s| s.span.clamp_to(query))
        .collect();
    let offered = merge_overlapping(&offered);
    if offered.is_empty() {
        return offered;
    }

    let mut taken: Vec<Span> = ss
        .active_bookings_overlapping(query)
        .map(|b| b.span)
        .collect();
    taken.sort_by_key(|s| s.start);
    subtract_intervals(&offered, &merge_overlapping(&taken))
}

fn validate_query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let window = Span::try_new(start, end).ok_or(EngineError::Validation("end must be after start"))?;
    if window.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(window)
}

// ── Availability ledger ──────────────────────────────────────────

impl Engine {
    /// Declare an open window on a spot. Only unbooked windows bound new
    /// declarations.
    pub async fn declare_availability(
        &self,
        caller_id: Ulid,
        id: Ulid,
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<AvailabilitySlot, EngineError> {
        let caller = self.caller(&caller_id)?;
        let span = validate_span(start, end)?;
        if span.end <= now_ms() {
            return Err(EngineError::Validation("availability must end in the future"));
        }

        let shard = self.spot_shard(&spot_id)?;
        let mut guard = shard.write().await;
        ensure_owner_or_admin(&caller, &guard.spot)?;
        if guard.slots.len() >= MAX_SLOTS_PER_SPOT {
            return Err(EngineError::LimitExceeded("too many availability slots on spot"));
        }
        check_no_slot_overlap(&guard, &span, None)?;

        let slot = AvailabilitySlot { id, spot_id, span, is_booked: false };
        let event = Event::SlotDeclared { slot: slot.clone() };
        self.persist_new(&mut guard, id, &event).await?;
        tracing::debug!("slot {id} declared on {spot_id}: [{}, {})", span.start, span.end);
        Ok(slot)
    }

    /// A spot's slots ordered by start, optionally limited to those
    /// intersecting `[start, end)`.
    pub async fn query_availability(
        &self,
        spot_id: Ulid,
        start: Option<Ms>,
        end: Option<Ms>,
    ) -> Result<Vec<AvailabilitySlot>, EngineError> {
        if let (Some(s), Some(e)) = (start, end) {
            validate_query_window(s, e)?;
        }
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        Ok(guard
            .slots
            .iter()
            .filter(|s| start.is_none_or(|t| s.span.end > t))
            .filter(|s| end.is_none_or(|t| s.span.start < t))
            .cloned()
            .collect())
    }

    /// Ledger update. A booked window's bounds are fixed, and a window cannot
    /// be handed back while a live booking sits on it.
    pub async fn update_availability(
        &self,
        caller_id: Ulid,
        id: Ulid,
        update: SlotUpdate,
    ) -> Result<AvailabilitySlot, EngineError> {
        let caller = self.caller(&caller_id)?;
        if update == SlotUpdate::default() {
            return Err(EngineError::Validation("no changes given"));
        }
        let mut guard = self.resolve_entity_write(&id).await?;
        ensure_owner_or_admin(&caller, &guard.spot)?;
        let current = guard.slot(id).cloned().ok_or(EngineError::NotFound(id))?;

        let span = validate_span(
            update.start.unwrap_or(current.span.start),
            update.end.unwrap_or(current.span.end),
        )?;
        let is_booked = update.is_booked.unwrap_or(current.is_booked);
        let bounds_changed = span != current.span;

        if bounds_changed && current.is_booked {
            return Err(EngineError::InvalidState("booked slot bounds are fixed"));
        }
        if bounds_changed && span.end <= now_ms() {
            return Err(EngineError::Validation("availability must end in the future"));
        }
        if current.is_booked
            && !is_booked
            && let Some(live) = guard.active_bookings_overlapping(&span).next()
        {
            return Err(EngineError::Conflict(live.id));
        }
        if !is_booked && (bounds_changed || current.is_booked) {
            check_no_slot_overlap(&guard, &span, Some(id))?;
        }

        let spot_id = guard.id();
        let event = Event::SlotChanged { id, spot_id, span, is_booked };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(AvailabilitySlot { id, spot_id, span, is_booked })
    }

    pub async fn remove_availability(&self, caller_id: Ulid, id: Ulid) -> Result<(), EngineError> {
        let caller = self.caller(&caller_id)?;
        let mut guard = self.resolve_entity_write(&id).await?;
        ensure_owner_or_admin(&caller, &guard.spot)?;
        let slot = guard.slot(id).ok_or(EngineError::NotFound(id))?;
        if slot.is_booked {
            return Err(EngineError::InvalidState("slot is booked"));
        }
        let spot_id = guard.id();
        self.persist_and_apply(&mut guard, &Event::SlotRemoved { id, spot_id })
            .await
    }

    /// True iff an unbooked window fully contains `[start, end)`.
    pub async fn covers_booking(&self, spot_id: Ulid, start: Ms, end: Ms) -> Result<bool, EngineError> {
        let span = validate_span(start, end)?;
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        Ok(guard.covering_slot(&span).is_some())
    }

    pub async fn open_windows(&self, spot_id: Ulid, start: Ms, end: Ms) -> Result<Vec<Span>, EngineError> {
        let window = validate_query_window(start, end)?;
        let shard = self.spot_shard(&spot_id)?;
        let guard = shard.read().await;
        Ok(open_windows(&guard, &window))
    }
}
