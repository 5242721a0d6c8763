//! Well-known names shared across crates.

/// Directory under `$HOME` that holds settings and the default socket directory.
pub const CLIVE_HOME_DIR: &str = ".clive";

/// Settings file name inside [`CLIVE_HOME_DIR`].
pub const SETTINGS_FILE: &str = "settings.json";

/// Sub-directory of [`CLIVE_HOME_DIR`] used for bridge sockets when no
/// explicit socket directory is configured.
pub const SOCKET_SUBDIR: &str = "sockets";

/// Prefix for every environment variable override.
pub const ENV_PREFIX: &str = "CLIVE_";

/// Resolve `$HOME/.clive`, falling back to `/tmp/.clive` when `HOME` is unset.
pub fn clive_home() -> std::path::PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    std::path::PathBuf::from(home).join(CLIVE_HOME_DIR)
}

/// Default upper bound for one newline-delimited JSON frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;
