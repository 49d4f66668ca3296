use std::net::SocketAddr;

use crate::sql::Command;

// ── Scheduling ──────────────────────────────────────────────────

/// Counter: booking requests decided. Labels: outcome, reason.
pub const BOOKINGS_TOTAL: &str = "carebook_bookings_total";

/// Histogram: time from request to decision (lock wait included), seconds.
pub const ASSIGNMENT_DURATION_SECONDS: &str = "carebook_assignment_duration_seconds";

/// Counter: post-commit dispatcher failures. Labels: dispatcher.
pub const DISPATCH_FAILURES_TOTAL: &str = "carebook_dispatch_failures_total";

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "carebook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "carebook_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "carebook_connections_active";

pub const CONNECTIONS_TOTAL: &str = "carebook_connections_total";

/// Counter: connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "carebook_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carebook_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "carebook_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if `port` is `None`.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for a command, used on every query metric.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertNanny { .. } => "insert_nanny",
        Command::SetAvailability { .. } => "set_availability",
        Command::SetNannyStatus { .. } => "set_nanny_status",
        Command::InsertBlockedDate { .. } => "insert_blocked_date",
        Command::DeleteBlockedDate { .. } => "delete_blocked_date",
        Command::InsertBooking { request } if request.nanny_id.is_some() => "insert_booking_manual",
        Command::InsertBooking { .. } => "insert_booking_auto",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::RescheduleBooking { .. } => "reschedule_booking",
        Command::ClockIn { .. } => "clock_in",
        Command::ClockOut { .. } => "clock_out",
        Command::CancelBooking { .. } => "cancel_booking",
        Command::SelectNannies => "select_nannies",
        Command::SelectBlockedDates { .. } => "select_blocked_dates",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectEligibleNannies { .. } => "select_eligible_nannies",
    }
}
