//! Shared logical clock.
//!
//! The clock is an origin instant plus a tempo. Elapsed time is measured with
//! a monotonic [`Instant`] so wall-clock adjustments never move `now`
//! backwards. Only the event bus owns a [`ClockAuthority`]; sessions and the
//! health endpoint hold [`ClockReader`]s.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

/// Tempo used when nothing else is configured.
pub const DEFAULT_BPM: f64 = 95.0;

/// Slowest accepted tempo.
pub const MIN_BPM: f64 = 1.0;

/// Fastest accepted tempo.
pub const MAX_BPM: f64 = 1000.0;

/// Whether `bpm` lies in `[MIN_BPM, MAX_BPM]`. NaN and infinities do not.
pub fn is_valid_bpm(bpm: f64) -> bool {
    (MIN_BPM..=MAX_BPM).contains(&bpm)
}

#[derive(Debug)]
struct ClockShared {
    origin_ms: f64,
    started: Instant,
    bpm: RwLock<f64>,
}

/// The single writer of the tempo.
#[derive(Debug)]
pub struct ClockAuthority {
    shared: Arc<ClockShared>,
}

impl ClockAuthority {
    /// Start a clock at the current wall-clock time with the given tempo.
    pub fn new(bpm: f64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let origin_ms = chrono::Utc::now().timestamp_millis() as f64;
        Self::with_origin(origin_ms, bpm)
    }

    /// Start a clock with an explicit origin.
    pub fn with_origin(origin_ms: f64, bpm: f64) -> Self {
        Self {
            shared: Arc::new(ClockShared {
                origin_ms,
                started: Instant::now(),
                bpm: RwLock::new(bpm),
            }),
        }
    }

    /// A read-only handle onto this clock.
    pub fn reader(&self) -> ClockReader {
        ClockReader {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Replace the tempo, returning the previous value.
    pub fn set_bpm(&self, bpm: f64) -> f64 {
        std::mem::replace(&mut *self.shared.bpm.write(), bpm)
    }

    /// Current tempo.
    pub fn bpm(&self) -> f64 {
        *self.shared.bpm.read()
    }
}

/// Read-only clock handle. Cheap to clone.
#[derive(Clone, Debug)]
pub struct ClockReader {
    shared: Arc<ClockShared>,
}

impl ClockReader {
    /// Milliseconds since the origin. Never decreases.
    pub fn now_ms(&self) -> f64 {
        self.shared.started.elapsed().as_secs_f64() * 1000.0
    }

    /// UNIX-epoch milliseconds of the origin.
    pub fn origin_ms(&self) -> f64 {
        self.shared.origin_ms
    }

    /// Current tempo.
    pub fn bpm(&self) -> f64 {
        *self.shared.bpm.read()
    }

    /// Length of one beat in milliseconds at the current tempo.
    pub fn beat_ms(&self) -> f64 {
        60_000.0 / self.bpm()
    }
}
