//! Listener, session and logging settings.

use serde::{Deserialize, Serialize};

/// Where and how the server listens.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,
    /// HTTP paths that accept the WebSocket upgrade.
    pub ws_paths: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 38883,
            ws_paths: vec!["/api".to_owned(), "/api/ws".to_owned()],
        }
    }
}

/// Per-connection limits.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Outbound frames buffered per session before new ones are dropped.
    pub mailbox_capacity: usize,
    /// Commands buffered for the event bus before producers wait.
    pub command_queue_capacity: usize,
    /// Consecutive write errors tolerated before the session is closed.
    pub max_write_failures: u32,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 512,
            command_queue_capacity: 512,
            max_write_failures: 5,
        }
    }
}

/// Shared clock.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClockSettings {
    /// Tempo at startup.
    pub default_bpm: f64,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            default_bpm: thump_core::DEFAULT_BPM,
        }
    }
}

/// Log output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
        }
    }
}
