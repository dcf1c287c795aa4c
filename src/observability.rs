use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "parkspot_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "parkspot_query_duration_seconds";

// ── Booking domain ──────────────────────────────────────────────

/// Counter: bookings accepted by the conflict guard.
pub const BOOKINGS_CREATED_TOTAL: &str = "parkspot_bookings_created_total";

/// Counter: booking attempts refused for overlapping a live booking.
pub const BOOKING_CONFLICTS_TOTAL: &str = "parkspot_booking_conflicts_total";

/// Counter: booking status changes. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "parkspot_booking_transitions_total";

/// Counter: reconciled payment outcomes. Labels: result.
pub const PAYMENT_OUTCOMES_TOTAL: &str = "parkspot_payment_outcomes_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "parkspot_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "parkspot_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "parkspot_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "parkspot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "parkspot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertUser { .. } => "insert_user",
        Command::InsertSpot { .. } => "insert_spot",
        Command::ChangeSpot { .. } => "change_spot",
        Command::DeleteSpot { .. } => "delete_spot",
        Command::SelectSpots { .. } => "select_spots",
        Command::SelectRating { .. } => "select_rating",
        Command::InsertAvailability { .. } => "insert_availability",
        Command::ChangeAvailability { .. } => "change_availability",
        Command::DeleteAvailability { .. } => "delete_availability",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectOpenWindows { .. } => "select_open_windows",
        Command::InsertBooking { .. } => "insert_booking",
        Command::TransitionBooking { .. } => "transition_booking",
        Command::SelectBookings { .. } => "select_bookings",
        Command::InitiatePayment { .. } => "initiate_payment",
        Command::RecordPaymentOutcome { .. } => "record_payment_outcome",
        Command::ConfirmPayment { .. } => "confirm_payment",
        Command::SetPaymentStatus { .. } => "set_payment_status",
        Command::SelectTransactions { .. } => "select_transactions",
        Command::InsertReview { .. } => "insert_review",
        Command::SelectReviews { .. } => "select_reviews",
        Command::SelectNotifications => "select_notifications",
        Command::MarkNotificationRead { .. } => "mark_notification_read",
    }
}
