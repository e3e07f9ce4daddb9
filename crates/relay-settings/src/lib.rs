//! # relay-settings
//!
//! Layered configuration for the chat relay.
//!
//! Settings are resolved in priority order (last wins):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: `~/.chat-relay/settings.json` or `--config`, deep-merged over defaults
//! 3. **Environment variables**: `PORT` and `RELAY_*`
//!
//! Command-line flags sit above all three and are applied by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{CorsSettings, LoggingSettings, RelaySettings, ServerSettings};
