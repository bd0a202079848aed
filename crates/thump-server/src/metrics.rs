//! Prometheus recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Call once at startup, before anything is recorded. The handle renders
/// `/metrics`.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// WebSocket sessions opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket sessions closed (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Open WebSocket sessions (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Session lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Socket write errors (counter).
pub const WS_WRITE_FAILURES_TOTAL: &str = "ws_write_failures_total";
/// Frames handed to mailboxes (counter, labels: kind).
pub const FRAMES_DELIVERED_TOTAL: &str = "frames_delivered_total";
/// Frames not delivered to a recipient (counter, labels: error_kind).
pub const FRAMES_DROPPED_TOTAL: &str = "frames_dropped_total";
/// Inbound frames whose payload failed to parse (counter, labels: kind).
pub const FRAMES_REJECTED_TOTAL: &str = "frames_rejected_total";
/// Commands applied by the event bus (counter).
pub const BUS_COMMANDS_TOTAL: &str = "bus_commands_total";
/// Tempo changes (counter).
pub const TEMPO_CHANGES_TOTAL: &str = "tempo_changes_total";
