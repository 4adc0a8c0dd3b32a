use std::net::SocketAddr;

use crate::wire::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const REQUESTS_TOTAL: &str = "airslot_requests_total";

/// Histogram: command latency in seconds. Labels: command.
pub const REQUEST_DURATION_SECONDS: &str = "airslot_request_duration_seconds";

/// Counter: rule violations behind rejected inputs. Labels: kind.
pub const VALIDATION_REJECTIONS_TOTAL: &str = "airslot_validation_rejections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "airslot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "airslot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "airslot_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "airslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "airslot_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "airslot_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::CreateAirfield { .. } => "create_airfield",
        Command::UpdateAirfield { .. } => "update_airfield",
        Command::DeleteAirfield { .. } => "delete_airfield",
        Command::GetAirfield { .. } => "get_airfield",
        Command::ListAirfields => "list_airfields",
        Command::SetBookingWindow { .. } => "set_booking_window",
        Command::GetBookingWindow => "get_booking_window",
        Command::AddTimeslot { .. } => "add_timeslot",
        Command::UpdateTimeslot { .. } => "update_timeslot",
        Command::RemoveTimeslot { .. } => "remove_timeslot",
        Command::ListTimeslots { .. } => "list_timeslots",
        Command::PlaceReservation { .. } => "place_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::CancelReservation { .. } => "cancel_reservation",
        Command::ListReservations { .. } => "list_reservations",
        Command::CheckReservation { .. } => "check_reservation",
        Command::CheckTimeslot { .. } => "check_timeslot",
        Command::PeakConcurrency { .. } => "peak_concurrency",
        Command::CountConcurrent { .. } => "count_concurrent",
        Command::Availability { .. } => "availability",
        Command::Compact => "compact",
    }
}
