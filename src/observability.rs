use std::net::SocketAddr;

use crate::protocol::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "slotbook_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "slotbook_command_duration_seconds";

/// Counter: request lines that failed to parse.
pub const PROTOCOL_ERRORS_TOTAL: &str = "slotbook_protocol_errors_total";

// ── Booking outcomes ────────────────────────────────────────────

pub const APPOINTMENTS_BOOKED_TOTAL: &str = "slotbook_appointments_booked_total";

pub const APPOINTMENTS_CANCELLED_TOTAL: &str = "slotbook_appointments_cancelled_total";

/// Counter: booking attempts refused. Labels: reason (no_slot, double_booking, full).
pub const BOOKINGS_REJECTED_TOTAL: &str = "slotbook_bookings_rejected_total";

/// Counter: confirmation/cancellation notices the notifier failed to deliver.
pub const NOTIFICATIONS_FAILED_TOTAL: &str = "slotbook_notifications_failed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotbook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotbook_wal_flush_batch_size";

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
        Command::CreateBranch { .. } => "create_branch",
        Command::CreateSlot { .. } => "create_slot",
        Command::Book(_) => "book",
        Command::Cancel { .. } => "cancel",
        Command::Get { .. } => "get",
        Command::ListAppointments { .. } => "list_appointments",
        Command::AvailableSlots { .. } => "available_slots",
        Command::ListBranches => "list_branches",
        Command::ListSlots { .. } => "list_slots",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::Ping => "ping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_match_wire_ops() {
        assert_eq!(command_label(&Command::Ping), "ping");
        assert_eq!(
            command_label(&Command::Cancel {
                reference: "APT-20260314-AB12CD".into()
            }),
            "cancel"
        );
    }

    #[test]
    fn init_without_port_is_noop() {
        assert!(init(None).is_ok());
    }
}
