//! Simulated participant.

use serde::{Deserialize, Serialize};

/// A server-side participant that plays a one-bar drum pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RoboSettings {
    /// Start the participant with the server.
    pub enabled: bool,
    /// Display name in presence snapshots.
    pub name: String,
    /// Instrument reported in the profile and on every note.
    pub instrument: String,
    /// Input device reported in the profile.
    pub input_device: String,
    /// How many beats ahead of `now` notes are scheduled.
    pub offset_beats: f64,
    /// Horizontal scene position.
    pub pos_x: f64,
    /// Vertical scene position.
    pub pos_y: f64,
}

impl Default for RoboSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            name: "the-server".to_owned(),
            instrument: "eightOhEight".to_owned(),
            input_device: "metronome".to_owned(),
            offset_beats: 8.0,
            pos_x: 0.8,
            pos_y: 0.8,
        }
    }
}
