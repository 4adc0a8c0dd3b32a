//! Newline-delimited JSON protocol.
//!
//! Each line from the client is one [`Command`] object tagged by `op`; each
//! line back is `{"ok":true,"result":...}` or
//! `{"ok":false,"error":{"code":...,"message":...}}`. Rejections also carry
//! the ordered `violations` list.

use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;
use crate::sweep::count_most_concurrent;
use crate::validate::{Mode, ReservationInput, TimeslotInput};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateAirfield {
        id: Ulid,
        settings: AirfieldSettings,
    },
    UpdateAirfield {
        id: Ulid,
        settings: AirfieldSettings,
    },
    DeleteAirfield {
        id: Ulid,
    },
    GetAirfield {
        id: Ulid,
    },
    ListAirfields,
    SetBookingWindow {
        window: BookingWindow,
    },
    GetBookingWindow,
    AddTimeslot {
        id: Ulid,
        airfield_id: Ulid,
        timeslot: TimeslotInput,
    },
    UpdateTimeslot {
        id: Ulid,
        timeslot: TimeslotInput,
    },
    RemoveTimeslot {
        id: Ulid,
    },
    ListTimeslots {
        airfield_id: Ulid,
        start: TimeInput,
        end: TimeInput,
    },
    PlaceReservation {
        id: Ulid,
        airfield_id: Ulid,
        reservation: ReservationInput,
    },
    UpdateReservation {
        id: Ulid,
        reservation: ReservationInput,
    },
    CancelReservation {
        id: Ulid,
    },
    ListReservations {
        airfield_id: Ulid,
        start: TimeInput,
        end: TimeInput,
    },
    /// Validate without storing; `id` names the reservation being edited.
    CheckReservation {
        airfield_id: Ulid,
        #[serde(default)]
        id: Option<Ulid>,
        reservation: ReservationInput,
        #[serde(default)]
        mode: Mode,
    },
    CheckTimeslot {
        airfield_id: Ulid,
        #[serde(default)]
        id: Option<Ulid>,
        timeslot: TimeslotInput,
        #[serde(default)]
        mode: Mode,
    },
    PeakConcurrency {
        airfield_id: Ulid,
        start: TimeInput,
        end: TimeInput,
    },
    /// Peak overlap of an ad-hoc list of intervals.
    CountConcurrent {
        intervals: Vec<Span>,
    },
    Availability {
        airfield_id: Ulid,
        start: TimeInput,
        end: TimeInput,
        #[serde(default)]
        min_duration_minutes: Option<u32>,
    },
    Compact,
}

fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

fn instant(t: &TimeInput) -> Result<Ms, EngineError> {
    t.to_ms()
        .map_err(|_| EngineError::BadRequest("window bounds must be timestamps"))
}

fn window(start: &TimeInput, end: &TimeInput) -> Result<(Ms, Ms), EngineError> {
    Ok((instant(start)?, instant(end)?))
}

/// Run one command against the engine at time `now`.
pub async fn execute(engine: &Engine, cmd: Command, now: Ms) -> Result<Value, EngineError> {
    match cmd {
        Command::CreateAirfield { id, settings } => {
            engine.create_airfield(id, settings).await?;
            Ok(json!({ "id": id }))
        }
        Command::UpdateAirfield { id, settings } => {
            engine.update_airfield(id, settings).await?;
            Ok(json!(engine.get_airfield(id).await?))
        }
        Command::DeleteAirfield { id } => {
            engine.delete_airfield(id).await?;
            Ok(json!({ "id": id }))
        }
        Command::GetAirfield { id } => Ok(json!(engine.get_airfield(id).await?)),
        Command::ListAirfields => Ok(json!(engine.list_airfields().await)),
        Command::SetBookingWindow { window } => {
            engine.set_booking_window(window).await?;
            Ok(json!(window))
        }
        Command::GetBookingWindow => Ok(json!(engine.booking_window().await)),
        Command::AddTimeslot {
            id,
            airfield_id,
            timeslot,
        } => {
            let ids = engine.add_timeslot(id, airfield_id, &timeslot, now).await?;
            Ok(json!({ "ids": ids }))
        }
        Command::UpdateTimeslot { id, timeslot } => {
            let airfield_id = engine.update_timeslot(id, &timeslot, now).await?;
            Ok(json!({ "id": id, "airfield_id": airfield_id }))
        }
        Command::RemoveTimeslot { id } => {
            let airfield_id = engine.remove_timeslot(id).await?;
            Ok(json!({ "id": id, "airfield_id": airfield_id }))
        }
        Command::ListTimeslots {
            airfield_id,
            start,
            end,
        } => {
            let (start, end) = window(&start, &end)?;
            Ok(json!(engine.list_timeslots(airfield_id, start, end).await?))
        }
        Command::PlaceReservation {
            id,
            airfield_id,
            reservation,
        } => {
            let placed = engine
                .place_reservation(id, airfield_id, &reservation, now)
                .await?;
            Ok(json!({ "id": id, "reservation": placed }))
        }
        Command::UpdateReservation { id, reservation } => {
            let updated = engine.update_reservation(id, &reservation, now).await?;
            Ok(json!({ "id": id, "reservation": updated }))
        }
        Command::CancelReservation { id } => {
            let airfield_id = engine.cancel_reservation(id).await?;
            Ok(json!({ "id": id, "airfield_id": airfield_id }))
        }
        Command::ListReservations {
            airfield_id,
            start,
            end,
        } => {
            let (start, end) = window(&start, &end)?;
            Ok(json!(engine.list_reservations(airfield_id, start, end).await?))
        }
        Command::CheckReservation {
            airfield_id,
            id,
            reservation,
            mode,
        } => Ok(json!(
            engine
                .check_reservation(airfield_id, id, &reservation, now, mode)
                .await?
        )),
        Command::CheckTimeslot {
            airfield_id,
            id,
            timeslot,
            mode,
        } => Ok(json!(
            engine
                .check_timeslot(airfield_id, id, &timeslot, now, mode)
                .await?
        )),
        Command::PeakConcurrency {
            airfield_id,
            start,
            end,
        } => {
            let (start, end) = window(&start, &end)?;
            let peak = engine.peak_concurrency(airfield_id, start, end).await?;
            Ok(json!({ "peak": peak }))
        }
        Command::CountConcurrent { intervals } => {
            if intervals.iter().any(|s| s.start > s.end) {
                return Err(EngineError::BadRequest("interval ends before it starts"));
            }
            Ok(json!({ "peak": count_most_concurrent(&intervals) }))
        }
        Command::Availability {
            airfield_id,
            start,
            end,
            min_duration_minutes,
        } => {
            let (start, end) = window(&start, &end)?;
            let min_duration = min_duration_minutes.map(|m| m as Ms * MINUTE_MS);
            Ok(json!(
                engine
                    .availability(airfield_id, start, end, now, min_duration)
                    .await?
            ))
        }
        Command::Compact => {
            engine.compact_wal().await?;
            Ok(json!({ "compacted": true }))
        }
    }
}

pub fn ok_response(result: Value) -> Value {
    json!({ "ok": true, "result": result })
}

pub fn error_response(err: &EngineError) -> Value {
    let mut error = json!({ "code": err.code(), "message": err.to_string() });
    match err {
        EngineError::Rejected(failure) => error["violations"] = json!(failure),
        EngineError::WouldOrphan { reservations, .. } => error["reservations"] = json!(reservations),
        _ => {}
    }
    json!({ "ok": false, "error": error })
}

fn protocol_error(code: &str, message: String) -> Value {
    json!({ "ok": false, "error": { "code": code, "message": message } })
}

/// Parse, execute and answer one request line.
pub async fn handle_line(engine: &Engine, line: &str, now: Ms) -> Value {
    let cmd: Command = match serde_json::from_str(line) {
        Ok(cmd) => cmd,
        Err(e) => return protocol_error("bad_request", format!("cannot parse command: {e}")),
    };

    let label = observability::command_label(&cmd);
    let started = Instant::now();
    let outcome = execute(engine, cmd, now).await;
    metrics::histogram!(observability::REQUEST_DURATION_SECONDS, "command" => label)
        .record(started.elapsed().as_secs_f64());

    match outcome {
        Ok(result) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "command" => label, "status" => "ok")
                .increment(1);
            ok_response(result)
        }
        Err(e) => {
            metrics::counter!(observability::REQUESTS_TOTAL, "command" => label, "status" => e.code())
                .increment(1);
            if matches!(e, EngineError::WalError(_)) {
                tracing::error!("{label} failed: {e}");
            } else {
                tracing::debug!("{label} refused: {e}");
            }
            error_response(&e)
        }
    }
}

/// Serve one client until it disconnects.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> Result<(), LinesCodecError> {
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = lines.next().await {
        let response = match line {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => handle_line(&engine, &line, now_ms()).await,
            // The codec skips the rest of the oversized line and carries on.
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                protocol_error("limit_exceeded", format!("line longer than {MAX_LINE_LEN} bytes"))
            }
            Err(e) => return Err(e),
        };
        lines.send(response.to_string()).await?;
    }
    Ok(())
}
