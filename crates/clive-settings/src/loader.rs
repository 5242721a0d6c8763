//! Layered settings loading: defaults → user file → environment.

use std::path::{Path, PathBuf};

use clive_core::constants::{ENV_PREFIX, SETTINGS_FILE, clive_home};
use clive_core::logging::LogFormat;
use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::CliveSettings;

/// Default settings file location: `~/.clive/settings.json`.
pub fn settings_path() -> PathBuf {
    clive_home().join(SETTINGS_FILE)
}

/// Load settings from the default path with environment overrides.
pub fn load_settings() -> Result<CliveSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path`, deep-merged over compiled defaults, then
/// apply `CLIVE_*` environment overrides and validate.
///
/// A missing file is not an error: defaults plus env are returned.
pub fn load_settings_from_path(path: &Path) -> Result<CliveSettings> {
    let defaults = serde_json::to_value(CliveSettings::default()).map_err(|source| {
        SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let merged = match std::fs::read_to_string(path) {
        Ok(content) => {
            let user: Value =
                serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            deep_merge(defaults, user)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(?path, "no settings file, using defaults");
            defaults
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let mut settings: CliveSettings =
        serde_json::from_value(merged).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok())?;
    settings.validate();
    Ok(settings)
}

/// Recursively merge `overlay` into `base`. Objects merge key by key;
/// any other overlay value replaces the base value. `null` in the overlay
/// keeps the base value.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Apply `CLIVE_*` overrides using `lookup` to read variables.
///
/// Taking a lookup function keeps tests free of process-global env mutation.
pub fn apply_env_overrides(
    settings: &mut CliveSettings,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    let var = |suffix: &str| {
        let name = format!("{ENV_PREFIX}{suffix}");
        lookup(&name).map(|value| (name, value))
    };

    if let Some((_, dir)) = var("SOCKET_DIR") {
        settings.bridge.socket_dir = Some(dir);
    }
    if let Some((_, prefix)) = var("SOCKET_PREFIX") {
        settings.bridge.socket_prefix = prefix;
    }
    if let Some((_, level)) = var("LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some((name, format)) = var("LOG_FORMAT") {
        settings.logging.format = format
            .parse::<LogFormat>()
            .map_err(|_| SettingsError::InvalidEnv { var: name, value: format })?;
    }
    if let Some((name, raw)) = var("MAX_FRAME_BYTES") {
        let bytes = raw
            .parse::<usize>()
            .map_err(|_| SettingsError::InvalidEnv { var: name, value: raw })?;
        settings.bridge.max_frame_bytes = bytes;
        settings.rpc.max_frame_bytes = bytes;
    }
    if let Some((_, workspace)) = var("WORKSPACE") {
        settings.workspace = Some(workspace);
    }
    Ok(())
}
