//! Capability error types.

/// Errors reported by collaborator capabilities.
///
/// Every variant renders a message fit to show to the caller; resolvers
/// forward it as-is.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The request itself was malformed (empty path, empty command, ...).
    #[error("invalid input: {message}")]
    InvalidInput {
        /// What was wrong.
        message: String,
    },
    /// A path resolved outside the capability's root directory.
    #[error("path escapes workspace root: {path}")]
    OutsideRoot {
        /// Offending path as given.
        path: String,
    },
    /// Content exceeded the configured size limit.
    #[error("content too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size.
        size: usize,
        /// Configured limit.
        max: usize,
    },
    /// Filesystem operation failed.
    #[error("{context}: {source}")]
    Io {
        /// Operation and target, e.g. `writing src/a.test.ts`.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A child process could not be started.
    #[error("failed to spawn {command}: {message}")]
    Spawn {
        /// Program name.
        command: String,
        /// OS error text.
        message: String,
    },
    /// Anything else.
    #[error("{message}")]
    Internal {
        /// Error description.
        message: String,
    },
}

impl ToolError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::OutsideRoot { .. } => "OUTSIDE_ROOT",
            Self::TooLarge { .. } => "TOO_LARGE",
            Self::Io { .. } => "IO_ERROR",
            Self::Spawn { .. } => "SPAWN_FAILED",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Whether the failure was caused by the caller's input rather than
    /// by the environment.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::OutsideRoot { .. } | Self::TooLarge { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ToolError::OutsideRoot { path: "x".into() }.code(), "OUTSIDE_ROOT");
        assert_eq!(ToolError::TooLarge { size: 2, max: 1 }.code(), "TOO_LARGE");
    }

    #[test]
    fn caller_errors_are_classified() {
        assert!(ToolError::InvalidInput { message: "x".into() }.is_caller_error());
        assert!(!ToolError::Internal { message: "x".into() }.is_caller_error());
    }

    #[test]
    fn io_message_includes_context() {
        let err = ToolError::Io {
            context: "writing a.txt".into(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert_eq!(err.to_string(), "writing a.txt: denied");
    }
}
