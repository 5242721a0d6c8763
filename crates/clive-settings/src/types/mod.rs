//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` for the JSON file
//! format and `#[serde(default)]` so partial files are accepted: missing
//! fields keep their compiled default.

mod bridge;
mod tools;

pub use bridge::*;
pub use tools::*;

use clive_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// Root settings type for the Clive host process.
///
/// ```json
/// {
///   "bridge": { "socketDir": "/run/user/1000/clive" },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CliveSettings {
    /// Settings schema version.
    pub version: String,
    /// Workspace root used for file writes and git queries. `None` means
    /// the process working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    /// Bridge channel (tool-server IPC) settings.
    pub bridge: BridgeSettings,
    /// RPC router transport settings.
    pub rpc: RpcSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
    /// Collaborator capability settings.
    pub tools: ToolSettings,
}

impl Default for CliveSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            workspace: None,
            bridge: BridgeSettings::default(),
            rpc: RpcSettings::default(),
            logging: LoggingSettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl CliveSettings {
    /// Correct out-of-range values in place.
    ///
    /// Called automatically during loading. Bad values are clamped with a
    /// warning instead of failing startup.
    pub fn validate(&mut self) {
        fn floor(val: &mut usize, min: usize, name: &str) {
            if *val < min {
                tracing::warn!("{name} too small ({val}), raised to {min}");
                *val = min;
            }
        }

        floor(&mut self.bridge.max_frame_bytes, MIN_FRAME_BYTES, "bridge.maxFrameBytes");
        floor(&mut self.rpc.max_frame_bytes, MIN_FRAME_BYTES, "rpc.maxFrameBytes");
        floor(&mut self.bridge.status_buffer_size, 1, "bridge.statusBufferSize");
        floor(&mut self.rpc.subscription_buffer, 1, "rpc.subscriptionBuffer");
        floor(&mut self.tools.search_default_limit, 1, "tools.searchDefaultLimit");

        if self.bridge.socket_prefix.is_empty() || self.bridge.socket_prefix.contains('/') {
            tracing::warn!(
                prefix = %self.bridge.socket_prefix,
                "invalid bridge.socketPrefix, using default"
            );
            self.bridge.socket_prefix = BridgeSettings::default().socket_prefix;
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}
