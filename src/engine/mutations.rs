use std::sync::Arc;

use tokio::sync::{RwLock, oneshot};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::validate::{
    Bound, Mode, ReservationContext, ReservationInput, Rule, TimeslotContext, TimeslotInput,
    ValidReservation, ValidationFailure, Violation, ViolationKind,
    validate_reservation, validate_timeslot,
};

use super::{Engine, EngineError, WalCommand, rejected};

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("interval too long"));
    }
    Ok(())
}

/// `validate_span` over every occurrence of a series.
pub(super) fn validate_spans(spans: &[Span]) -> Result<(), EngineError> {
    spans.iter().try_for_each(validate_span)
}

fn check_len(value: &Option<String>, max: usize, what: &'static str) -> Result<(), EngineError> {
    match value {
        Some(s) if s.len() > max => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

fn check_reservation_limits(input: &ReservationInput) -> Result<(), EngineError> {
    check_len(&input.aircraft_id, MAX_AIRCRAFT_ID_LEN, "aircraft id too long")?;
    check_len(&input.phone, MAX_PHONE_LEN, "phone number too long")?;
    check_len(&input.info, MAX_INFO_LEN, "info too long")
}

fn check_timeslot_limits(input: &TimeslotInput) -> Result<(), EngineError> {
    check_len(&input.info, MAX_INFO_LEN, "info too long")?;
    if let Some(p) = &input.period {
        check_len(&p.name, MAX_NAME_LEN, "period name too long")?;
    }
    Ok(())
}

/// Whether an edit keeps a start that has already passed.
fn keeps_started(existing: Span, start: Option<&TimeInput>, now: Ms) -> bool {
    existing.start < now && start.and_then(|t| t.to_ms().ok()) == Some(existing.start)
}

/// Snapshot of what a reservation is judged against, taken under the
/// airfield lock. `editing` is excluded from its own siblings.
pub(super) fn reservation_context(
    st: &AirfieldState,
    window: BookingWindow,
    input: &ReservationInput,
    editing: Option<&Reservation>,
    now: Ms,
) -> ReservationContext {
    let (timeslots, siblings) = match input.span_hint() {
        Some(hint) => (
            st.timeslots_overlapping(&hint)
                .filter(|t| t.kind == TimeslotKind::Available)
                .map(|t| t.span)
                .collect(),
            st.reservations_overlapping(&hint)
                .filter(|r| editing.is_none_or(|e| e.id != r.id))
                .map(|r| r.span)
                .collect(),
        ),
        None => (Vec::new(), Vec::new()),
    };
    ReservationContext {
        granularity_minutes: st.settings.granularity_minutes,
        max_concurrent_flights: st.settings.max_concurrent_flights,
        window,
        timeslots,
        siblings,
        ignore_start: editing.is_some_and(|e| keeps_started(e.span, input.start.as_ref(), now)),
    }
}

pub(super) fn timeslot_context(
    st: &AirfieldState,
    input: &TimeslotInput,
    editing: Option<&Timeslot>,
    now: Ms,
) -> TimeslotContext {
    let siblings = match input.span_hint() {
        Some(hint) => st
            .timeslots_overlapping(&hint)
            .filter(|t| editing.is_none_or(|e| e.id != t.id))
            .map(|t| t.span)
            .collect(),
        None => Vec::new(),
    };
    TimeslotContext {
        granularity_minutes: st.settings.granularity_minutes,
        siblings,
        ignore_start: editing.is_some_and(|e| keeps_started(e.span, input.start.as_ref(), now)),
    }
}

/// Reservations of `st` that sit inside `slot`.
fn contained_reservations(st: &AirfieldState, slot: &Span) -> Vec<Reservation> {
    st.reservations_overlapping(slot)
        .filter(|r| slot.contains_span(&r.span))
        .cloned()
        .collect()
}

impl Engine {
    // ── Airfields ────────────────────────────────────────────

    pub async fn create_airfield(&self, id: Ulid, settings: AirfieldSettings) -> Result<(), EngineError> {
        settings.check().map_err(EngineError::InvalidConfig)?;
        let _catalog = self.catalog.lock().await;
        if self.state.len() >= MAX_AIRFIELDS {
            return Err(EngineError::LimitExceeded("too many airfields"));
        }
        if self.state.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::AirfieldCreated { id, settings: settings.clone() };
        self.wal_append(&event).await?;
        self.state
            .insert(id, Arc::new(RwLock::new(AirfieldState::new(id, settings))));
        tracing::info!("airfield {id} created");
        Ok(())
    }

    /// Lowering limits does not re-check existing intervals; they stay.
    pub async fn update_airfield(&self, id: Ulid, settings: AirfieldSettings) -> Result<(), EngineError> {
        settings.check().map_err(EngineError::InvalidConfig)?;
        let st = self.airfield_state(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = st.write().await;
        let event = Event::AirfieldUpdated { id, settings };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn delete_airfield(&self, id: Ulid) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let st = self.airfield_state(&id).ok_or(EngineError::NotFound(id))?;
        let guard = st.write().await;
        if guard.interval_count() > 0 {
            return Err(EngineError::NotEmpty(id));
        }
        let event = Event::AirfieldDeleted { id };
        self.wal_append(&event).await?;
        self.state.remove(&id);
        drop(guard);
        tracing::info!("airfield {id} deleted");
        Ok(())
    }

    pub async fn set_booking_window(&self, window: BookingWindow) -> Result<(), EngineError> {
        window.check().map_err(EngineError::InvalidConfig)?;
        let mut current = self.booking_window.write().await;
        self.wal_append(&Event::BookingWindowSet { window }).await?;
        *current = window;
        Ok(())
    }

    // ── Timeslots ────────────────────────────────────────────

    /// Add a timeslot, or one per selected weekday when a period is given.
    /// Returns the ids created; the first one is `id`.
    pub async fn add_timeslot(
        &self,
        id: Ulid,
        airfield_id: Ulid,
        input: &TimeslotInput,
        now: Ms,
    ) -> Result<Vec<Ulid>, EngineError> {
        check_timeslot_limits(input)?;
        if self.entity_to_airfield.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let st = self
            .airfield_state(&airfield_id)
            .ok_or(EngineError::NotFound(airfield_id))?;
        let mut guard = st.write().await;

        let ctx = timeslot_context(&guard, input, None, now);
        let valid = validate_timeslot(input, &ctx, now, Mode::CollectAll)
            .map_err(|f| rejected(airfield_id, f))?;
        let spans = match &valid.period {
            Some(period) => period
                .occurrences(valid.span, MAX_PERIOD_OCCURRENCES)
                .ok_or(EngineError::LimitExceeded("too many recurring timeslots"))?,
            None => vec![valid.span],
        };
        validate_spans(&spans)?;
        if guard.interval_count() + spans.len() > MAX_INTERVALS_PER_AIRFIELD {
            return Err(EngineError::LimitExceeded("too many intervals on airfield"));
        }

        // A day is not a whole number of grid steps for every granularity, and
        // later occurrences must not collide with existing timeslots or each other.
        let granularity_minutes = guard.settings.granularity_minutes;
        let mut violations = Vec::new();
        for (i, span) in spans.iter().enumerate().skip(1) {
            let mut siblings: Vec<Span> = guard.timeslots_overlapping(span).map(|t| t.span).collect();
            siblings.extend(spans[..i].iter().filter(|s| s.overlaps(span)));
            let rules = [
                Rule::GranularityAlignment { bound: Bound::Start, granularity_minutes },
                Rule::GranularityAlignment { bound: Bound::End, granularity_minutes },
                Rule::ConcurrencyBound { max_concurrent: 1, siblings },
            ];
            for rule in &rules {
                if let Err(mut v) = rule.check(span, now) {
                    v.message = format!("occurrence starting at {}: {}", span.start, v.message);
                    violations.push(v);
                }
            }
        }
        if !violations.is_empty() {
            return Err(rejected(airfield_id, ValidationFailure { violations }));
        }

        let ids: Vec<Ulid> = (0..spans.len())
            .map(|i| if i == 0 { id } else { Ulid::new() })
            .collect();
        let events = ids
            .iter()
            .zip(&spans)
            .map(|(slot_id, span)| Event::TimeslotAdded {
                id: *slot_id,
                airfield_id,
                span: *span,
                kind: valid.kind,
                info: valid.info.clone(),
            })
            .collect();
        self.persist_and_apply_all(&mut guard, events).await?;
        if let Some(period) = &valid.period {
            tracing::info!(
                "timeslot series {:?} on airfield {airfield_id}: {} occurrences",
                period.name,
                ids.len()
            );
        }
        Ok(ids)
    }

    /// Move, resize or reclassify a timeslot. Rejected when a reservation it
    /// holds would end up outside it.
    pub async fn update_timeslot(&self, id: Ulid, input: &TimeslotInput, now: Ms) -> Result<Ulid, EngineError> {
        check_timeslot_limits(input)?;
        let (airfield_id, mut guard) = self.resolve_entity_write(&id).await?;
        let existing = guard.timeslot(id).cloned().ok_or(EngineError::NotFound(id))?;

        if input.period.is_some() {
            let v = Violation::new(
                "period",
                "parse",
                ViolationKind::Malformed,
                "a recurrence can only be given when creating timeslots",
            );
            return Err(rejected(airfield_id, ValidationFailure { violations: vec![v] }));
        }

        let ctx = timeslot_context(&guard, input, Some(&existing), now);
        let valid = validate_timeslot(input, &ctx, now, Mode::CollectAll)
            .map_err(|f| rejected(airfield_id, f))?;
        validate_span(&valid.span)?;

        let stranded: Vec<Ulid> = contained_reservations(&guard, &existing.span)
            .into_iter()
            .filter(|r| valid.kind == TimeslotKind::Blocked || !valid.span.contains_span(&r.span))
            .map(|r| r.id)
            .collect();
        if !stranded.is_empty() {
            return Err(EngineError::WouldOrphan { timeslot: id, reservations: stranded });
        }

        let event = Event::TimeslotUpdated {
            id,
            airfield_id,
            span: valid.span,
            kind: valid.kind,
            info: valid.info,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(airfield_id)
    }

    /// Remove a timeslot; refused while it still holds reservations.
    pub async fn remove_timeslot(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (airfield_id, mut guard) = self.resolve_entity_write(&id).await?;
        let existing = guard.timeslot(id).cloned().ok_or(EngineError::NotFound(id))?;
        let held: Vec<Ulid> = contained_reservations(&guard, &existing.span)
            .into_iter()
            .map(|r| r.id)
            .collect();
        if existing.kind == TimeslotKind::Available && !held.is_empty() {
            return Err(EngineError::WouldOrphan { timeslot: id, reservations: held });
        }
        let event = Event::TimeslotRemoved { id, airfield_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(airfield_id)
    }

    // ── Reservations ─────────────────────────────────────────

    /// Validate and store a reservation. Validation and commit happen under
    /// the airfield's write lock, so concurrent placements cannot both slip
    /// under the concurrency bound.
    pub async fn place_reservation(
        &self,
        id: Ulid,
        airfield_id: Ulid,
        input: &ReservationInput,
        now: Ms,
    ) -> Result<ValidReservation, EngineError> {
        check_reservation_limits(input)?;
        if self.entity_to_airfield.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let window = *self.booking_window.read().await;
        let st = self
            .airfield_state(&airfield_id)
            .ok_or(EngineError::NotFound(airfield_id))?;
        let mut guard = st.write().await;
        if guard.interval_count() >= MAX_INTERVALS_PER_AIRFIELD {
            return Err(EngineError::LimitExceeded("too many intervals on airfield"));
        }

        let ctx = reservation_context(&guard, window, input, None, now);
        let valid = validate_reservation(input, &ctx, now, Mode::CollectAll)
            .map_err(|f| rejected(airfield_id, f))?;
        validate_span(&valid.span)?;

        let event = Event::ReservationPlaced {
            id,
            airfield_id,
            span: valid.span,
            aircraft_id: valid.aircraft_id.clone(),
            phone: valid.phone.clone(),
            info: valid.info.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(valid)
    }

    pub async fn update_reservation(
        &self,
        id: Ulid,
        input: &ReservationInput,
        now: Ms,
    ) -> Result<ValidReservation, EngineError> {
        check_reservation_limits(input)?;
        let window = *self.booking_window.read().await;
        let (airfield_id, mut guard) = self.resolve_entity_write(&id).await?;
        let existing = guard.reservation(id).cloned().ok_or(EngineError::NotFound(id))?;

        let ctx = reservation_context(&guard, window, input, Some(&existing), now);
        let valid = validate_reservation(input, &ctx, now, Mode::CollectAll)
            .map_err(|f| rejected(airfield_id, f))?;
        validate_span(&valid.span)?;

        let event = Event::ReservationUpdated {
            id,
            airfield_id,
            span: valid.span,
            aircraft_id: valid.aircraft_id.clone(),
            phone: valid.phone.clone(),
            info: valid.info.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(valid)
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (airfield_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.reservation(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ReservationCancelled { id, airfield_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(airfield_id)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    ///
    /// Every airfield stays read-locked until the rewrite is done, so no event
    /// can land in the old log after its airfield was snapshotted.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog.lock().await;
        let airfields: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(airfields.len());
        for st in airfields {
            guards.push(st.read_owned().await);
        }
        let window = self.booking_window.read().await;

        let mut events = vec![Event::BookingWindowSet { window: *window }];
        for guard in &guards {
            events.push(Event::AirfieldCreated {
                id: guard.id,
                settings: guard.settings.clone(),
            });
            events.extend(guard.timeslots.iter().map(|t| Event::TimeslotAdded {
                id: t.id,
                airfield_id: guard.id,
                span: t.span,
                kind: t.kind,
                info: t.info.clone(),
            }));
            events.extend(guard.reservations.iter().map(|r| Event::ReservationPlaced {
                id: r.id,
                airfield_id: guard.id,
                span: r.span,
                aircraft_id: r.aircraft_id.clone(),
                phone: r.phone.clone(),
                info: r.info.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
