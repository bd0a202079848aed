//! # thump-core
//!
//! Shared building blocks for the thump relay server.
//!
//! - [`protocol`]: `<kind>#<payload>` frame codec and JSON payload shapes
//! - [`clock`]: the shared logical clock (origin + tempo)
//! - [`presence`]: participant profiles and directory snapshots
//! - [`ids`]: client identifiers
//! - [`errors`]: the error taxonomy shared by every crate
//! - [`logging`]: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod clock;
pub mod errors;
pub mod ids;
pub mod logging;
pub mod presence;
pub mod protocol;

pub use clock::{ClockAuthority, ClockReader, DEFAULT_BPM, MAX_BPM, MIN_BPM, is_valid_bpm};
pub use errors::{Result, ThumpError};
pub use ids::{ClientId, ClientIdAllocator};
pub use presence::PresenceProfile;
pub use protocol::{Frame, FrameKind, RawFrame};
