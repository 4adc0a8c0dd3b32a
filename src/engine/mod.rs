mod availability;
mod error;
mod mutations;
mod queries;

pub use availability::{bookable, merge_overlapping, subtract_intervals};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::observability;
use crate::validate::ValidationFailure;
use crate::wal::Wal;

pub type SharedAirfieldState = Arc<RwLock<AirfieldState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    /// Events committed together: all of them are durable or none are acknowledged.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL.
///
/// Appends that are already queued when the task wakes up are buffered
/// together and made durable with a single fsync. Control commands first
/// commit whatever is pending.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut pending: Vec<PendingAppend> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut next = Some(first);
        while let Some(cmd) = next.take() {
            match cmd {
                WalCommand::Append { events, response } => pending.push((events, response)),
                WalCommand::Compact { events, response } => {
                    commit(&mut wal, &mut pending);
                    let _ = response.send(wal.compact(&events));
                }
                WalCommand::AppendsSinceCompact { response } => {
                    commit(&mut wal, &mut pending);
                    let _ = response.send(wal.appends_since_compact());
                }
            }
            next = rx.try_recv().ok();
        }
        commit(&mut wal, &mut pending);
    }
}

/// Write, fsync and answer every pending append with the shared outcome.
fn commit(wal: &mut Wal, pending: &mut Vec<PendingAppend>) {
    if pending.is_empty() {
        return;
    }
    let event_count: usize = pending.iter().map(|(events, _)| events.len()).sum();
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(event_count as f64);
    let started = std::time::Instant::now();

    let mut outcome = pending
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|event| wal.append_buffered(event));
    // Flush even after a failed append so no half-written batch lingers in
    // the buffer; the callers of this batch are told it failed.
    let flushed = wal.flush_sync();
    if outcome.is_ok() {
        outcome = flushed;
    }
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    if let Err(e) = &outcome {
        tracing::error!("WAL commit of {event_count} events failed: {e}");
    }
    for (_, tx) in pending.drain(..) {
        let _ = tx.send(match &outcome {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedAirfieldState>,
    pub(super) booking_window: RwLock<BookingWindow>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: timeslot/reservation id → airfield id
    pub(super) entity_to_airfield: DashMap<Ulid, Ulid>,
    /// Held while airfields are created or deleted, and while compaction
    /// snapshots the state.
    pub(super) catalog: Mutex<()>,
}

/// Apply an airfield-scoped event. The caller holds the lock.
fn apply_to_airfield(st: &mut AirfieldState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::AirfieldUpdated { settings, .. } => {
            st.settings = settings.clone();
        }
        Event::TimeslotAdded {
            id,
            airfield_id,
            span,
            kind,
            info,
        }
        | Event::TimeslotUpdated {
            id,
            airfield_id,
            span,
            kind,
            info,
        } => {
            st.remove_timeslot(*id);
            st.insert_timeslot(Timeslot {
                id: *id,
                airfield_id: *airfield_id,
                span: *span,
                kind: *kind,
                info: info.clone(),
            });
            entity_map.insert(*id, *airfield_id);
        }
        Event::ReservationPlaced {
            id,
            airfield_id,
            span,
            aircraft_id,
            phone,
            info,
        }
        | Event::ReservationUpdated {
            id,
            airfield_id,
            span,
            aircraft_id,
            phone,
            info,
        } => {
            st.remove_reservation(*id);
            st.insert_reservation(Reservation {
                id: *id,
                airfield_id: *airfield_id,
                span: *span,
                aircraft_id: aircraft_id.clone(),
                phone: phone.clone(),
                info: info.clone(),
            });
            entity_map.insert(*id, *airfield_id);
        }
        Event::TimeslotRemoved { id, .. } => {
            st.remove_timeslot(*id);
            entity_map.remove(id);
        }
        Event::ReservationCancelled { id, .. } => {
            st.remove_reservation(*id);
            entity_map.remove(id);
        }
        // Handled at the DashMap / engine level, not here
        Event::AirfieldCreated { .. }
        | Event::AirfieldDeleted { .. }
        | Event::BookingWindowSet { .. } => {}
    }
}

impl Engine {
    /// Replay the WAL at `wal_path` and start its writer task.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let state: DashMap<Ulid, SharedAirfieldState> = DashMap::new();
        let entity_to_airfield = DashMap::new();
        let mut window = BookingWindow::default();

        // Sole owner of these Arcs during replay, so try_write never contends.
        for event in &events {
            match event {
                Event::AirfieldCreated { id, settings } => {
                    let st = AirfieldState::new(*id, settings.clone());
                    state.insert(*id, Arc::new(RwLock::new(st)));
                }
                Event::AirfieldDeleted { id } => {
                    state.remove(id);
                }
                Event::BookingWindowSet { window: w } => window = *w,
                other => {
                    let Some(airfield_id) = other.airfield_id() else { continue };
                    if let Some(entry) = state.get(&airfield_id) {
                        let st = entry.value().clone();
                        let mut guard = st.try_write().expect("replay: uncontended write");
                        apply_to_airfield(&mut guard, other, &entity_to_airfield);
                    }
                }
            }
        }
        tracing::info!(
            "replayed {} events: {} airfields, {} intervals",
            events.len(),
            state.len(),
            entity_to_airfield.len()
        );

        Ok(Self {
            state,
            booking_window: RwLock::new(window),
            wal_tx,
            entity_to_airfield,
            catalog: Mutex::new(()),
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append_all(vec![event.clone()]).await
    }

    /// Write several events in one commit. On error none of them is
    /// acknowledged.
    pub(super) async fn wal_append_all(&self, events: Vec<Event>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn airfield_state(&self, id: &Ulid) -> Option<SharedAirfieldState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn airfield_of(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_airfield.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        st: &mut AirfieldState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_airfield(st, event, &self.entity_to_airfield);
        Ok(())
    }

    /// Like `persist_and_apply`, for a batch that must land as a whole.
    pub(super) async fn persist_and_apply_all(
        &self,
        st: &mut AirfieldState,
        events: Vec<Event>,
    ) -> Result<(), EngineError> {
        self.wal_append_all(events.clone()).await?;
        for event in &events {
            apply_to_airfield(st, event, &self.entity_to_airfield);
        }
        Ok(())
    }

    /// Lookup entity → airfield, acquire the airfield's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<AirfieldState>), EngineError> {
        let airfield_id = self
            .airfield_of(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let st = self
            .airfield_state(&airfield_id)
            .ok_or(EngineError::NotFound(airfield_id))?;
        Ok((airfield_id, st.write_owned().await))
    }

    pub(super) async fn resolve_airfield_read(
        &self,
        airfield_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<AirfieldState>, EngineError> {
        let st = self
            .airfield_state(airfield_id)
            .ok_or(EngineError::NotFound(*airfield_id))?;
        Ok(st.read_owned().await)
    }
}

/// Count and log a rejected input before handing it back.
pub(super) fn rejected(airfield_id: Ulid, failure: ValidationFailure) -> EngineError {
    for v in &failure.violations {
        metrics::counter!(observability::VALIDATION_REJECTIONS_TOTAL, "kind" => v.kind.as_str())
            .increment(1);
    }
    tracing::debug!(
        "rejected input for airfield {airfield_id}: {} violation(s): {failure}",
        failure.violations.len()
    );
    EngineError::Rejected(failure)
}
