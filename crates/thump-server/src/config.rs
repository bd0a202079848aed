//! Server configuration.

use thump_settings::{RoboSettings, ThumpSettings};

/// Everything the server needs to start, flattened from [`ThumpSettings`].
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port; `0` picks a free one.
    pub port: u16,
    /// Paths that accept the WebSocket upgrade.
    pub ws_paths: Vec<String>,
    /// Per-session mailbox size.
    pub mailbox_capacity: usize,
    /// Event bus queue size.
    pub command_queue_capacity: usize,
    /// Consecutive write errors tolerated per session.
    pub max_write_failures: u32,
    /// Tempo at startup.
    pub default_bpm: f64,
    /// Simulated participant.
    pub robo: RoboSettings,
}

impl ServerConfig {
    /// Flatten loaded settings.
    pub fn from_settings(settings: &ThumpSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            ws_paths: settings.server.ws_paths.clone(),
            mailbox_capacity: settings.session.mailbox_capacity,
            command_queue_capacity: settings.session.command_queue_capacity,
            max_write_failures: settings.session.max_write_failures,
            default_bpm: settings.clock.default_bpm,
            robo: settings.robo.clone(),
        }
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_settings(&ThumpSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 38883);
        assert_eq!(cfg.ws_paths, vec!["/api", "/api/ws"]);
        assert_eq!(cfg.mailbox_capacity, 512);
        assert_eq!(cfg.command_queue_capacity, 512);
        assert_eq!(cfg.max_write_failures, 5);
        assert_eq!(cfg.default_bpm, 95.0);
        assert!(!cfg.robo.enabled);
    }

    #[test]
    fn from_custom_settings() {
        let mut settings = ThumpSettings::default();
        settings.server.port = 4000;
        settings.session.mailbox_capacity = 8;
        settings.clock.default_bpm = 128.0;
        settings.robo.enabled = true;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.mailbox_capacity, 8);
        assert_eq!(cfg.default_bpm, 128.0);
        assert!(cfg.robo.enabled);
    }

    #[test]
    fn bind_addr_joins_host_and_port() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:0");
    }
}
