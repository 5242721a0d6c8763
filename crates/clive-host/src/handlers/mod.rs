//! Bridge method handlers and registration.
//!
//! These answer calls from the tool-server process: the agent proposing and
//! approving plans, handing over a context summary, and writing test files.

pub mod context;
pub mod files;
pub mod plan;

use std::sync::Arc;

use clive_bridge::errors::{HandlerError, RegistryError};
use clive_bridge::methods;
use clive_bridge::registry::HandlerRegistry;
use clive_tools::{FileWriter, ToolError};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::state::HostState;

/// Build the registry for every bridge method.
pub fn register_all(state: &HostState, files: Arc<dyn FileWriter>) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();

    // Plans
    registry.register(
        methods::PROPOSE_TEST_PLAN,
        plan::ProposeTestPlanHandler::new(Arc::clone(&state.plans)),
    )?;
    registry.register(
        methods::APPROVE_PLAN,
        plan::ApprovePlanHandler::new(Arc::clone(&state.plans)),
    )?;

    // Context
    registry.register(
        methods::SUMMARIZE_CONTEXT,
        context::SummarizeContextHandler::new(Arc::clone(&state.summaries)),
    )?;

    // Files
    registry.register(methods::WRITE_TEST_FILE, files::WriteTestFileHandler::new(files))?;

    Ok(registry)
}

/// Decode a handler's `params`.
pub(crate) fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T, HandlerError> {
    Ok(serde_json::from_value(params)?)
}

/// Reject an empty or whitespace-only string param.
pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<(), HandlerError> {
    if value.trim().is_empty() {
        return Err(HandlerError::InvalidParams {
            message: format!("'{field}' must not be empty"),
        });
    }
    Ok(())
}

/// Caller mistakes become invalid params; everything else is a failure.
pub(crate) fn tool_error(e: &ToolError) -> HandlerError {
    if e.is_caller_error() {
        HandlerError::InvalidParams { message: e.to_string() }
    } else {
        HandlerError::failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clive_bridge::{BridgeConfig, BridgeRuntime};
    use clive_settings::CliveSettings;
    use clive_tools::testutil::RecordingFileWriter;

    #[test]
    fn every_bridge_method_is_registered() {
        let dir = tempfile::tempdir().unwrap();
        let state = HostState::new(
            Arc::new(BridgeRuntime::new(BridgeConfig::new(dir.path()))),
            &CliveSettings::default(),
        );
        let registry = register_all(&state, RecordingFileWriter::new()).unwrap();
        for method in methods::ALL {
            assert!(registry.has_method(method), "{method}");
        }
    }

    #[test]
    fn tool_errors_are_classified() {
        assert!(matches!(
            tool_error(&ToolError::OutsideRoot { path: "../x".into() }),
            HandlerError::InvalidParams { .. }
        ));
        assert!(matches!(
            tool_error(&ToolError::Internal { message: "boom".into() }),
            HandlerError::Failed { .. }
        ));
    }
}
