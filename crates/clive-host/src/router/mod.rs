//! Application router served to the UI layers.
//!
//! | Branch | Procedures |
//! |--------|------------|
//! | `bridge` | `status` (query), `onStatusChange` (subscription), `restart` (mutation) |
//! | `plan` | `get`, `list` (queries), `approve` (mutation), `onContent` (subscription) |
//! | `status` | `branchChanges` (query) |
//! | `knowledge` | `search` (query) |
//! | `files` | `write` (mutation) |
//! | `process` | `run` (subscription) |
//!
//! Adding a branch means nesting it here and declaring it in
//! [`client::AppClient`], which also yields [`app_shape`].

pub mod bridge;
pub mod client;
pub mod files;
pub mod knowledge;
pub mod plan;
pub mod process;
pub mod status;

use clive_bridge::BridgeError;
use clive_rpc::{RouterBuildError, RouterShape, RpcError};
use clive_tools::ToolError;
use serde_json::json;

use crate::context::RequestContext;
use crate::stores::PlanError;

/// Router over [`RequestContext`].
pub type AppRouter = clive_rpc::Router<RequestContext>;

/// Assemble every branch.
pub fn app_router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .nest("bridge", bridge::router()?)
        .nest("files", files::router()?)
        .nest("knowledge", knowledge::router()?)
        .nest("plan", plan::router()?)
        .nest("process", process::router()?)
        .nest("status", status::router()?)
        .build()
}

/// Names and kinds of [`app_router`] as the typed client declares them,
/// for building a [`clive_rpc::ClientProxy`] without fetching the shape.
pub fn app_shape() -> RouterShape {
    client::AppClient::shape()
}

pub(crate) fn bridge_error(e: &BridgeError) -> RpcError {
    RpcError::resolver_with(e.to_string(), json!({ "code": e.code() }))
}

/// Caller mistakes surface as input validation on `path`.
pub(crate) fn tool_error(path: &str, e: &ToolError) -> RpcError {
    if e.is_caller_error() {
        RpcError::InputValidation {
            path: path.to_owned(),
            message: e.to_string(),
        }
    } else {
        RpcError::resolver_with(e.to_string(), json!({ "code": e.code() }))
    }
}

pub(crate) fn plan_error(e: &PlanError) -> RpcError {
    let code = match e {
        PlanError::NotFound { .. } => "PLAN_NOT_FOUND",
        PlanError::Invalid { .. } => "PLAN_INVALID",
    };
    RpcError::resolver_with(e.to_string(), json!({ "code": code }))
}


#[cfg(test)]
mod tests {
    use super::*;
    use clive_rpc::ProcedureKind;

    #[test]
    fn typed_client_matches_router() {
        assert_eq!(app_router().unwrap().shape(), app_shape());
    }

    #[test]
    fn shape_lists_every_procedure() {
        let leaves = app_shape().leaves();
        assert_eq!(leaves.len(), 12);
        assert!(leaves.contains(&("process.run".to_owned(), ProcedureKind::Subscription)));
        assert!(leaves.contains(&("status.branchChanges".to_owned(), ProcedureKind::Query)));
    }

    #[test]
    fn caller_tool_errors_are_input_validation() {
        let e = tool_error("files.write", &ToolError::TooLarge { size: 2, max: 1 });
        assert_eq!(e.code(), clive_rpc::errors::INPUT_VALIDATION);
        let e = tool_error(
            "files.write",
            &ToolError::Internal {
                message: "boom".into(),
            },
        );
        assert_eq!(e.code(), clive_rpc::errors::RESOLVER);
    }
}
