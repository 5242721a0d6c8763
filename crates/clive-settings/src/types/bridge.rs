//! Bridge channel and RPC transport settings.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Smallest frame limit `validate` accepts.
pub const MIN_FRAME_BYTES: usize = 1024;

/// Bridge manager settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Directory in which per-instance sockets are created. `None` means
    /// `~/.clive/sockets`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket_dir: Option<String>,
    /// File name prefix for socket files.
    pub socket_prefix: String,
    /// Maximum size of a single newline-delimited JSON frame.
    pub max_frame_bytes: usize,
    /// How long `stop()` waits for connection tasks to drain.
    pub shutdown_grace_ms: u64,
    /// Capacity of the status broadcast buffer.
    pub status_buffer_size: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            socket_dir: None,
            socket_prefix: "clive-bridge".to_string(),
            max_frame_bytes: clive_core::constants::DEFAULT_MAX_FRAME_BYTES,
            shutdown_grace_ms: 2_000,
            status_buffer_size: 64,
        }
    }
}

impl BridgeSettings {
    /// Resolve the socket directory, falling back to `~/.clive/sockets`.
    pub fn resolved_socket_dir(&self) -> PathBuf {
        self.socket_dir.as_ref().map_or_else(
            || clive_core::constants::clive_home().join(clive_core::constants::SOCKET_SUBDIR),
            PathBuf::from,
        )
    }
}

/// RPC router transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RpcSettings {
    /// Maximum size of a single RPC frame on stream transports.
    pub max_frame_bytes: usize,
    /// Per-subscription buffer between resolver and transport.
    pub subscription_buffer: usize,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            max_frame_bytes: clive_core::constants::DEFAULT_MAX_FRAME_BYTES,
            subscription_buffer: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_socket_dir_wins() {
        let s = BridgeSettings {
            socket_dir: Some("/run/clive".into()),
            ..BridgeSettings::default()
        };
        assert_eq!(s.resolved_socket_dir(), PathBuf::from("/run/clive"));
    }

    #[test]
    fn default_socket_dir_is_under_clive_home() {
        let dir = BridgeSettings::default().resolved_socket_dir();
        assert!(dir.ends_with(".clive/sockets"));
    }
}
