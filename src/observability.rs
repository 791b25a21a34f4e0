use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomledger_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomledger_query_duration_seconds";

// ── Domain outcomes ─────────────────────────────────────────────

/// Counter: resolved room updates. Labels: outcome (applied, rejected).
pub const UPDATES_TOTAL: &str = "roomledger_updates_total";

/// Counter: booking attempts that reached a verdict. Labels: outcome (booked, unavailable).
pub const BOOKINGS_TOTAL: &str = "roomledger_bookings_total";

pub const FLOORS_PROVISIONED_TOTAL: &str = "roomledger_floors_provisioned_total";
pub const ROOMS_PROVISIONED_TOTAL: &str = "roomledger_rooms_provisioned_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomledger_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomledger_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomledger_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "roomledger_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roomledger_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roomledger_wal_flush_batch_size";

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
        Command::InsertUser { .. } => "insert_user",
        Command::InsertFloor { .. } => "insert_floor",
        Command::InsertRoomVersion { .. } => "insert_room_version",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SelectUser { .. } => "select_user",
        Command::SelectFloors { .. } => "select_floors",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectRoomVersions { .. } => "select_room_versions",
        Command::SelectBookings { .. } => "select_bookings",
    }
}
