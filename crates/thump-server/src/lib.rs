//! # thump-server
//!
//! WebSocket relay for shared-clock jam sessions.
//!
//! - [`server`]: axum router, listener, `/health` and `/metrics`
//! - [`session`]: one actor per connected client, with a bounded mailbox
//! - [`bus`]: the single task that owns sessions, tempo and presence
//! - [`robo`]: an optional server-side participant that plays a drum pattern
//! - [`shutdown`]: cancellation and task draining

#![deny(unsafe_code)]

pub mod bus;
pub mod config;
pub mod health;
pub mod metrics;
pub mod robo;
pub mod server;
pub mod session;
pub mod shutdown;

pub use bus::{BusHandle, Command, EventBus};
pub use config::ServerConfig;
pub use server::ThumpServer;
