//! Bridge error types.

/// Lifecycle and transport errors surfaced by the manager, client and
/// runtime adapter.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The endpoint could not be created.
    #[error("failed to start bridge: {message}")]
    Start {
        /// Human-readable cause, also stored in `BridgeStatus.error`.
        message: String,
    },
    /// The channel closed before the call completed.
    #[error("bridge closed")]
    Closed,
    /// The remote handler answered with an error.
    #[error("{message}")]
    Remote {
        /// Error text from the response envelope.
        message: String,
    },
    /// Operation not allowed in the current lifecycle state.
    #[error("cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// Current state name.
        state: &'static str,
    },
    /// The runtime adapter was disposed.
    #[error("bridge runtime has been disposed")]
    Disposed,
    /// A frame violated the wire protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description.
        message: String,
    },
    /// Socket I/O failed.
    #[error("bridge i/o: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Start { .. } => "BRIDGE_START",
            Self::Closed => "BRIDGE_CLOSED",
            Self::Remote { .. } => "REMOTE_ERROR",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::Disposed => "DISPOSED",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Whether this is the closed-channel signal rather than a failure.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Error returned by a bridge handler. Its display text becomes the
/// response's `error` string.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// No handler is registered for the method.
    #[error("unknown method: {method}")]
    UnknownMethod {
        /// Requested method name.
        method: String,
    },
    /// `params` did not match what the handler expects.
    #[error("invalid params: {message}")]
    InvalidParams {
        /// Description.
        message: String,
    },
    /// The handler ran and failed.
    #[error("{message}")]
    Failed {
        /// Description.
        message: String,
    },
    /// Unexpected failure (panic, serialization).
    #[error("internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownMethod { .. } => "UNKNOWN_METHOD",
            Self::InvalidParams { .. } => "INVALID_PARAMS",
            Self::Failed { .. } => "HANDLER_FAILED",
            Self::Internal { .. } => "INTERNAL",
        }
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParams {
            message: e.to_string(),
        }
    }
}

/// Handler registration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Method names must be non-empty and must not contain `.`.
    #[error("invalid method name {name:?}: must be non-empty and dot-free")]
    InvalidMethodName {
        /// Rejected name.
        name: String,
    },
}
