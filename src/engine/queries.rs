use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::sweep::count_most_concurrent;
use crate::validate::{
    Mode, ReservationInput, TimeslotInput, ValidReservation, ValidTimeslot, validate_reservation,
    validate_timeslot,
};

use super::availability::bookable;
use super::mutations::{reservation_context, timeslot_context};
use super::{Engine, EngineError};

/// Check a caller-supplied read window.
fn query_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end < start {
        return Err(EngineError::BadRequest("window end is before its start"));
    }
    match end.checked_sub(start) {
        Some(width) if width <= MAX_QUERY_WINDOW_MS => {}
        _ => return Err(EngineError::LimitExceeded("query window too wide")),
    }
    Ok(Span::new(start, end))
}

/// Shrink `span` inward onto the `granularity_ms` grid.
fn align_inward(span: Span, granularity_ms: Ms) -> Option<Span> {
    let start = span.start + (granularity_ms - span.start.rem_euclid(granularity_ms)) % granularity_ms;
    let end = span.end - span.end.rem_euclid(granularity_ms);
    (start < end).then(|| Span::new(start, end))
}

fn info(st: &AirfieldState) -> AirfieldInfo {
    AirfieldInfo {
        id: st.id,
        settings: st.settings.clone(),
        timeslots: st.timeslots.len(),
        reservations: st.reservations.len(),
    }
}

impl Engine {
    pub async fn get_airfield(&self, id: Ulid) -> Result<AirfieldInfo, EngineError> {
        let guard = self.resolve_airfield_read(&id).await?;
        Ok(info(&guard))
    }

    /// All airfields, ordered by id.
    pub async fn list_airfields(&self) -> Vec<AirfieldInfo> {
        let airfields: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(airfields.len());
        for st in airfields {
            out.push(info(&*st.read().await));
        }
        out.sort_by_key(|a| a.id);
        out
    }

    pub async fn booking_window(&self) -> BookingWindow {
        *self.booking_window.read().await
    }

    /// Timeslots overlapping `[start, end]`, ordered by start.
    pub async fn list_timeslots(&self, airfield_id: Ulid, start: Ms, end: Ms) -> Result<Vec<Timeslot>, EngineError> {
        let window = query_window(start, end)?;
        let guard = self.resolve_airfield_read(&airfield_id).await?;
        Ok(guard.timeslots_overlapping(&window).cloned().collect())
    }

    /// Reservations overlapping `[start, end]`, ordered by start.
    pub async fn list_reservations(
        &self,
        airfield_id: Ulid,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Reservation>, EngineError> {
        let window = query_window(start, end)?;
        let guard = self.resolve_airfield_read(&airfield_id).await?;
        Ok(guard.reservations_overlapping(&window).cloned().collect())
    }

    /// Most reservations in flight at one instant inside `[start, end]`.
    pub async fn peak_concurrency(&self, airfield_id: Ulid, start: Ms, end: Ms) -> Result<usize, EngineError> {
        let window = query_window(start, end)?;
        let guard = self.resolve_airfield_read(&airfield_id).await?;
        let clamped: Vec<Span> = guard
            .reservations_overlapping(&window)
            .map(|r| Span::new(r.span.start.max(window.start), r.span.end.min(window.end)))
            .collect();
        Ok(count_most_concurrent(&clamped))
    }

    /// Windows in `[start, end]` where one more reservation could go, aligned
    /// to the airfield's granularity.
    ///
    /// The booking horizon bounds where a reservation may start, not where it
    /// ends: windows open no earlier than the horizon's start and no later than
    /// its end, but may run past it.
    pub async fn availability(
        &self,
        airfield_id: Ulid,
        start: Ms,
        end: Ms,
        now: Ms,
        min_duration_ms: Option<Ms>,
    ) -> Result<Vec<Span>, EngineError> {
        let window = query_window(start, end)?;
        let horizon = self.booking_window().await.horizon(now);
        let guard = self.resolve_airfield_read(&airfield_id).await?;

        let query_start = window.start.max(horizon.start);
        if query_start >= window.end || query_start > horizon.end {
            return Ok(Vec::new());
        }

        let granularity = guard.settings.granularity_minutes as Ms * MINUTE_MS;
        let mut free: Vec<Span> = bookable(&guard, &Span::new(query_start, window.end))
            .into_iter()
            .filter_map(|s| align_inward(s, granularity))
            .filter(|s| s.start <= horizon.end)
            .collect();
        if let Some(min_dur) = min_duration_ms {
            free.retain(|span| span.duration_ms() >= min_dur);
        }
        Ok(free)
    }

    // ── Dry runs ─────────────────────────────────────────────

    /// Validate a reservation without storing it. `id` names the reservation
    /// being edited, if any.
    pub async fn check_reservation(
        &self,
        airfield_id: Ulid,
        id: Option<Ulid>,
        input: &ReservationInput,
        now: Ms,
        mode: Mode,
    ) -> Result<ValidReservation, EngineError> {
        let window = self.booking_window().await;
        let guard = self.resolve_airfield_read(&airfield_id).await?;
        let editing = match id {
            Some(id) => Some(guard.reservation(id).ok_or(EngineError::NotFound(id))?),
            None => None,
        };
        let ctx = reservation_context(&guard, window, input, editing, now);
        Ok(validate_reservation(input, &ctx, now, mode)?)
    }

    pub async fn check_timeslot(
        &self,
        airfield_id: Ulid,
        id: Option<Ulid>,
        input: &TimeslotInput,
        now: Ms,
        mode: Mode,
    ) -> Result<ValidTimeslot, EngineError> {
        let guard = self.resolve_airfield_read(&airfield_id).await?;
        let editing = match id {
            Some(id) => Some(guard.timeslot(id).ok_or(EngineError::NotFound(id))?),
            None => None,
        };
        let ctx = timeslot_context(&guard, input, editing, now);
        Ok(validate_timeslot(input, &ctx, now, mode)?)
    }
}
