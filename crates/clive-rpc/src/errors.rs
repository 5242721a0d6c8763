//! RPC error codes and error types.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::procedure::ProcedureKind;

// ── Error code constants ────────────────────────────────────────────

/// Input failed to decode or validate; the resolver never ran.
pub const INPUT_VALIDATION: &str = "INPUT_VALIDATION";
/// No procedure at the requested path.
pub const ROUTE_NOT_FOUND: &str = "ROUTE_NOT_FOUND";
/// Procedure exists but has a different kind.
pub const KIND_MISMATCH: &str = "KIND_MISMATCH";
/// The resolver ran and failed.
pub const RESOLVER: &str = "RESOLVER";
/// Unexpected failure outside the resolver.
pub const INTERNAL: &str = "INTERNAL";
/// The link closed before the call completed.
pub const CLOSED: &str = "CLOSED";
/// The transport failed to deliver a message.
pub const TRANSPORT: &str = "TRANSPORT";

/// RPC error type returned by resolvers, the router and transports.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum RpcError {
    /// Input did not match the procedure's input type or its rules.
    #[error("invalid input for {path}: {message}")]
    InputValidation {
        /// Procedure path.
        path: String,
        /// What was wrong.
        message: String,
    },

    /// Unknown path, or a path naming a branch rather than a procedure.
    #[error("no procedure at '{path}'")]
    RouteNotFound {
        /// Requested path.
        path: String,
    },

    /// Called with the wrong kind (e.g. a query invoked as a subscription).
    #[error("'{path}' is a {actual}, not a {expected}")]
    KindMismatch {
        /// Requested path.
        path: String,
        /// Kind the caller asked for.
        expected: ProcedureKind,
        /// Kind the procedure has.
        actual: ProcedureKind,
    },

    /// The resolver failed while executing.
    #[error("{message}")]
    Resolver {
        /// Human-readable message.
        message: String,
        /// Optional structured details.
        details: Option<Value>,
    },

    /// Unexpected internal error.
    #[error("internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },

    /// The link closed first.
    #[error("rpc link closed")]
    Closed,

    /// The transport failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description.
        message: String,
    },
}

impl RpcError {
    /// Resolver failure with a message.
    pub fn resolver(message: impl Into<String>) -> Self {
        Self::Resolver {
            message: message.into(),
            details: None,
        }
    }

    /// Resolver failure with structured details.
    pub fn resolver_with(message: impl Into<String>, details: Value) -> Self {
        Self::Resolver {
            message: message.into(),
            details: Some(details),
        }
    }

    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InputValidation { .. } => INPUT_VALIDATION,
            Self::RouteNotFound { .. } => ROUTE_NOT_FOUND,
            Self::KindMismatch { .. } => KIND_MISMATCH,
            Self::Resolver { .. } => RESOLVER,
            Self::Internal { .. } => INTERNAL,
            Self::Closed => CLOSED,
            Self::Transport { .. } => TRANSPORT,
        }
    }

    /// The call itself was wrong (bad input, path or kind), as opposed to
    /// a call that failed while executing.
    pub fn is_bad_call(&self) -> bool {
        matches!(
            self,
            Self::InputValidation { .. } | Self::RouteNotFound { .. } | Self::KindMismatch { .. }
        )
    }

    /// Convert to the wire-format error body.
    pub fn to_error_body(&self) -> RpcErrorBody {
        let (message, details) = match self {
            Self::InputValidation { path, message } => {
                (message.clone(), Some(json!({ "path": path })))
            }
            Self::RouteNotFound { path } => (self.to_string(), Some(json!({ "path": path }))),
            Self::KindMismatch {
                path,
                expected,
                actual,
            } => (
                self.to_string(),
                Some(json!({ "path": path, "expected": expected, "actual": actual })),
            ),
            Self::Resolver { message, details } => (message.clone(), details.clone()),
            Self::Internal { message } | Self::Transport { message } => (message.clone(), None),
            Self::Closed => (self.to_string(), None),
        };
        RpcErrorBody {
            code: self.code().to_owned(),
            message,
            details,
        }
    }

    /// Rebuild an error from its wire form. Unknown codes become
    /// [`RpcError::Internal`].
    pub fn from_error_body(body: RpcErrorBody) -> Self {
        let RpcErrorBody {
            code,
            message,
            details,
        } = body;
        let detail_str = |key: &str| {
            details
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned()
        };
        let detail_kind = |key: &str| {
            details
                .as_ref()
                .and_then(|d| d.get(key))
                .and_then(|v| serde_json::from_value::<ProcedureKind>(v.clone()).ok())
        };

        match code.as_str() {
            INPUT_VALIDATION => Self::InputValidation {
                path: detail_str("path"),
                message,
            },
            ROUTE_NOT_FOUND => Self::RouteNotFound {
                path: detail_str("path"),
            },
            KIND_MISMATCH => match (detail_kind("expected"), detail_kind("actual")) {
                (Some(expected), Some(actual)) => Self::KindMismatch {
                    path: detail_str("path"),
                    expected,
                    actual,
                },
                _ => Self::Internal { message },
            },
            RESOLVER => Self::Resolver { message, details },
            CLOSED => Self::Closed,
            TRANSPORT => Self::Transport { message },
            _ => Self::Internal { message },
        }
    }
}

/// Structured error body on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    /// Machine-readable error code (e.g. `ROUTE_NOT_FOUND`).
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional structured details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Router construction errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RouterBuildError {
    /// Names must be non-empty and contain no `.`.
    #[error("invalid route name '{name}'")]
    InvalidName {
        /// Offending name.
        name: String,
    },
    /// The same name was registered twice at one level.
    #[error("duplicate route name '{name}'")]
    Duplicate {
        /// Offending name.
        name: String,
    },
}
