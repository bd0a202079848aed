//! Simulated participant that plays a drum pattern on the shared clock.
//!
//! It joins like any client but has no mailbox, so it only produces traffic.
//! Each bar it relays a down-beat and three up-beats, scheduled a fixed
//! number of beats ahead of `now` so clients have time to queue them.

use std::time::Duration;

use serde::Serialize;
use thump_core::protocol::{self, USER_EVENT};
use thump_core::{ClientId, PresenceProfile, RawFrame, Result};
use thump_settings::RoboSettings;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::BusHandle;

/// One MIDI message inside a `user/event` payload.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MidiEvent {
    /// `noteon` or `noteoff`.
    pub kind: &'static str,
    /// MIDI channel.
    pub channel: u8,
    /// MIDI note number.
    pub note: u8,
    /// Velocity in `[0, 1]`.
    pub attack: f64,
}

/// Payload of the `user/event` frames the participant sends.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent<'a> {
    /// Sender.
    pub client_id: ClientId,
    /// Instrument that should play the note.
    pub instrument: &'a str,
    /// The note.
    pub midi_event: MidiEvent,
    /// When to play it, in shared-clock milliseconds.
    pub timestamp: f64,
}

const DOWN_ON: MidiEvent = MidiEvent {
    kind: "noteon",
    channel: 1,
    note: 34,
    attack: 0.8,
};
const DOWN_OFF: MidiEvent = MidiEvent {
    kind: "noteoff",
    ..DOWN_ON
};
const UP_ON: MidiEvent = MidiEvent {
    kind: "noteon",
    channel: 10,
    note: 35,
    attack: 0.7,
};
const UP_OFF: MidiEvent = MidiEvent {
    kind: "noteoff",
    ..UP_ON
};

/// Longest pause between bars: one bar at `MIN_BPM`.
const MAX_BAR_WAIT: Duration = Duration::from_secs(4 * 60);

/// Beats the down-beat rings for.
const DOWN_BEAT_LENGTH: f64 = 3.5;
/// Beats each up-beat rings for.
const UP_BEAT_LENGTH: f64 = 0.5;

/// The notes of one bar.
///
/// `last_beat_at` is the time of the previous bar's final beat. Returns the
/// eight `(event, timestamp)` pairs and the time of this bar's final beat.
pub fn schedule_bar(last_beat_at: f64, beat_ms: f64) -> (Vec<(MidiEvent, f64)>, f64) {
    let mut notes = Vec::with_capacity(8);
    let mut at = last_beat_at + beat_ms;
    notes.push((DOWN_ON, at));
    notes.push((DOWN_OFF, at + DOWN_BEAT_LENGTH * beat_ms));
    for _ in 0..3 {
        at += beat_ms;
        notes.push((UP_ON, at));
        notes.push((UP_OFF, at + UP_BEAT_LENGTH * beat_ms));
    }
    (notes, at)
}

/// Start the participant. It stops when `shutdown` fires or the bus closes.
pub fn spawn(
    settings: RoboSettings,
    client_id: ClientId,
    bus: BusHandle,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let robo = RoboUser {
            settings,
            client_id,
            bus,
        };
        if let Err(e) = robo.run(&shutdown).await {
            debug!(%client_id, error = %e, "simulated participant stopped");
        }
    })
}

struct RoboUser {
    settings: RoboSettings,
    client_id: ClientId,
    bus: BusHandle,
}

impl RoboUser {
    fn profile(&self) -> PresenceProfile {
        PresenceProfile {
            client_id: self.client_id,
            name: self.settings.name.clone(),
            instrument: self.settings.instrument.clone(),
            input_device: self.settings.input_device.clone(),
            offset: self.settings.offset_beats,
            pos_x: self.settings.pos_x,
            pos_y: self.settings.pos_y,
        }
    }

    fn frames(&self, notes: &[(MidiEvent, f64)]) -> Result<Vec<RawFrame>> {
        notes
            .iter()
            .map(|&(midi_event, timestamp)| {
                let event = UserEvent {
                    client_id: self.client_id,
                    instrument: &self.settings.instrument,
                    midi_event,
                    timestamp,
                };
                protocol::encode_json(USER_EVENT, &event).map(RawFrame::from)
            })
            .collect()
    }

    async fn run(&self, shutdown: &CancellationToken) -> Result<()> {
        let id = self.client_id;
        self.bus.add_session(id, None).await?;
        let played = self.play(shutdown).await;
        if let Err(e) = self.bus.remove_session(id).await {
            warn!(client_id = %id, error = %e, "simulated participant could not leave");
        }
        played
    }

    async fn play(&self, shutdown: &CancellationToken) -> Result<()> {
        let id = self.client_id;
        self.bus.profile_update(id, self.profile()).await?;
        info!(client_id = %id, name = %self.settings.name, "simulated participant joined");

        let clock = self.bus.clock().clone();
        let offset = self.settings.offset_beats;
        let mut last_beat_at = clock.now_ms() + offset * clock.beat_ms();

        loop {
            let beat_ms = clock.beat_ms();
            let (notes, bar_end) = schedule_bar(last_beat_at, beat_ms);
            last_beat_at = bar_end;
            for frame in self.frames(&notes)? {
                self.bus.relay(frame, id, true).await?;
            }

            let wait = bar_wait(last_beat_at - clock.now_ms() - offset * beat_ms);
            tokio::select! {
                () = shutdown.cancelled() => return Ok(()),
                () = tokio::time::sleep(wait) => {}
            }
        }
    }
}

/// Sleep before scheduling the next bar, clamped to `[0, MAX_BAR_WAIT]`.
fn bar_wait(wait_ms: f64) -> Duration {
    if wait_ms.is_nan() {
        return MAX_BAR_WAIT;
    }
    Duration::try_from_secs_f64(wait_ms.max(0.0) / 1000.0)
        .map_or(MAX_BAR_WAIT, |wait| wait.min(MAX_BAR_WAIT))
}
