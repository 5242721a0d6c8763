//! Collaborator capability settings.

use serde::{Deserialize, Serialize};

/// Settings for file writes, process spawning and knowledge search.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolSettings {
    /// Largest content accepted by the file-write capability.
    pub max_write_bytes: usize,
    /// Grace period between closing a child's stdin and killing it.
    pub process_kill_grace_ms: u64,
    /// Result limit when a knowledge search does not specify one.
    pub search_default_limit: usize,
    /// Base ref compared against for `status.branchChanges`.
    pub diff_base: String,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            max_write_bytes: 10 * 1024 * 1024,
            process_kill_grace_ms: 500,
            search_default_limit: 10,
            diff_base: "HEAD".to_string(),
        }
    }
}
