//! # clive-settings
//!
//! Configuration management with layered sources for the Clive host.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`CliveSettings::default()`]
//! 2. **User file** — `~/.clive/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `CLIVE_*` overrides (highest priority)
//!
//! Binaries call [`init_settings`] once after loading; library code reads
//! the cached snapshot through [`get_settings`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// Global settings cache. Swappable so a reload is visible to later readers
/// while earlier `Arc` snapshots stay consistent.
static SETTINGS: RwLock<Option<Arc<CliveSettings>>> = parking_lot::const_rwlock(None);

/// Get the global settings instance.
///
/// Loads from `~/.clive/settings.json` on first use. If loading fails the
/// compiled defaults are cached instead.
pub fn get_settings() -> Arc<CliveSettings> {
    if let Some(s) = SETTINGS.read().as_ref() {
        return Arc::clone(s);
    }

    let mut guard = SETTINGS.write();
    if let Some(s) = guard.as_ref() {
        return Arc::clone(s);
    }

    let settings = Arc::new(match load_settings() {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            CliveSettings::default()
        }
    });
    *guard = Some(Arc::clone(&settings));
    settings
}

/// Replace the cached settings with `settings`.
pub fn init_settings(settings: CliveSettings) {
    *SETTINGS.write() = Some(Arc::new(settings));
}

/// Reload settings from `path` and swap the cache. Falls back to defaults
/// when the file cannot be loaded.
pub fn reload_settings_from_path(path: &Path) {
    let new = Arc::new(match load_settings_from_path(path) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, ?path, "failed to reload settings, falling back to defaults");
            CliveSettings::default()
        }
    });
    *SETTINGS.write() = Some(new);
    tracing::info!(?path, "settings reloaded");
}

#[cfg(test)]
pub(crate) fn reset_settings() {
    *SETTINGS.write() = None;
}
