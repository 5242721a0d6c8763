//! Transport-neutral RPC messages, tagged by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{RpcError, RpcErrorBody};
use crate::procedure::ProcedureKind;

/// Client → host.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RpcMessage {
    /// Invoke a procedure.
    Request {
        /// Caller-chosen id, unique among the caller's live calls.
        id: String,
        /// Dot path of the procedure.
        path: String,
        /// Kind the caller expects.
        kind: ProcedureKind,
        /// Input value. Absent decodes as `null`.
        #[serde(default)]
        input: Value,
    },
    /// Stop a call or subscription. No further frames are sent for `id`.
    Cancel {
        /// Id of the call to stop.
        id: String,
    },
}

impl RpcMessage {
    /// Id this message refers to.
    pub fn id(&self) -> &str {
        match self {
            Self::Request { id, .. } | Self::Cancel { id } => id,
        }
    }
}

/// Host → client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RpcReply {
    /// Query or mutation result.
    Result {
        /// Request id.
        id: String,
        /// Output value.
        data: Value,
    },
    /// One subscription item.
    Next {
        /// Request id.
        id: String,
        /// Item value.
        data: Value,
    },
    /// Subscription ended normally.
    Complete {
        /// Request id.
        id: String,
    },
    /// Call failed, or subscription ended with an error.
    Error {
        /// Request id; empty when the request could not be read at all.
        id: String,
        /// Wire error.
        error: RpcErrorBody,
    },
}

impl RpcReply {
    /// Id this reply answers.
    pub fn id(&self) -> &str {
        match self {
            Self::Result { id, .. }
            | Self::Next { id, .. }
            | Self::Complete { id }
            | Self::Error { id, .. } => id,
        }
    }

    /// Error reply from an [`RpcError`].
    pub fn error(id: impl Into<String>, error: &RpcError) -> Self {
        Self::Error {
            id: id.into(),
            error: error.to_error_body(),
        }
    }

    /// Whether this reply ends the call.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Next { .. })
    }
}
