//! # relay-settings
//!
//! Configuration for the relay, loaded from layered sources (in priority
//! order, later wins):
//! 1. **Compiled defaults**: [`RelaySettings::default()`]
//! 2. **Settings file**: optional JSON file, deep-merged over defaults
//! 3. **`.env` file**: loaded into the process environment when present
//! 4. **Environment variables**: `PORT`, `ALLOWED_ORIGINS`, `RELAY_*`, ...
//!
//! CLI flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_dotenv, load_settings,
    load_settings_from_path,
};
pub use types::*;
