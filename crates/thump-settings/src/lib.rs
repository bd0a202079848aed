//! # thump-settings
//!
//! Settings are resolved in layers, later layers winning:
//! 1. compiled defaults ([`ThumpSettings::default()`])
//! 2. the user file, `~/.thump/settings.json` by default, deep-merged over
//!    the defaults
//! 3. `THUMP_*` environment variables
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
