//! Settings types.
//!
//! Every struct is camelCase on the wire and `#[serde(default)]`, so a
//! settings file only needs to mention the values it changes.

mod robo;
mod server;

pub use robo::*;
pub use server::*;

use serde::{Deserialize, Serialize};

/// Root settings document.
///
/// ```json
/// { "server": { "port": 4000 }, "clock": { "defaultBpm": 120 } }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ThumpSettings {
    /// Listener settings.
    pub server: ServerSettings,
    /// Per-connection queue and failure limits.
    pub session: SessionSettings,
    /// Shared clock settings.
    pub clock: ClockSettings,
    /// Simulated participant.
    pub robo: RoboSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl ThumpSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> crate::Result<()> {
        let bpm = self.clock.default_bpm;
        if !thump_core::is_valid_bpm(bpm) {
            return Err(crate::SettingsError::InvalidValue(format!(
                "clock.defaultBpm must be between {} and {}, got {bpm}",
                thump_core::MIN_BPM,
                thump_core::MAX_BPM
            )));
        }
        if self.session.mailbox_capacity == 0 || self.session.command_queue_capacity == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "session queue capacities must be at least 1".into(),
            ));
        }
        if self.server.ws_paths.iter().any(|p| !p.starts_with('/')) {
            return Err(crate::SettingsError::InvalidValue(
                "server.wsPaths entries must start with '/'".into(),
            ));
        }
        Ok(())
    }
}
