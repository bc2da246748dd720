//! # skein-settings
//!
//! Configuration management with layered sources.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`SkeinSettings::default()`]
//! 2. **Settings file**: `$SKEIN_SETTINGS` or `./skein.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `SKEIN_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use skein_settings::get_settings;
//!
//! let settings = get_settings();
//! println!("heartbeat: {:?}", settings.transport.heartbeat_interval());
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<SkeinSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from [`settings_path`] with env var
/// overrides. If loading fails, falls back to compiled defaults.
pub fn get_settings() -> &'static SkeinSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            SkeinSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: SkeinSettings) -> std::result::Result<(), SkeinSettings> {
    SETTINGS.set(settings)
}
