//! Plan handlers: proposeTestPlan, approvePlan.

use std::sync::Arc;

use async_trait::async_trait;
use clive_bridge::errors::HandlerError;
use clive_bridge::registry::BridgeHandler;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::instrument;

use super::{parse_params, require_non_empty};
use crate::stores::{PlanError, PlanProposal, PlanStore};

fn plan_error(e: PlanError) -> HandlerError {
    match e {
        PlanError::Invalid { message } => HandlerError::InvalidParams { message },
        other @ PlanError::NotFound { .. } => HandlerError::failed(other.to_string()),
    }
}

// =============================================================================
// proposeTestPlan
// =============================================================================

/// Create or extend a plan and publish the content to plan subscribers.
///
/// Params: `{planId?, title, content, append?}`. Returns `{planId, revision}`.
pub struct ProposeTestPlanHandler {
    plans: Arc<PlanStore>,
}

impl ProposeTestPlanHandler {
    /// Handler over `plans`.
    pub fn new(plans: Arc<PlanStore>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl BridgeHandler for ProposeTestPlanHandler {
    #[instrument(skip_all, fields(method = "proposeTestPlan"))]
    async fn handle(&self, params: Value) -> Result<Value, HandlerError> {
        let proposal: PlanProposal = parse_params(params)?;
        let revision = self.plans.propose(proposal).map_err(plan_error)?;
        Ok(json!({ "planId": revision.plan_id, "revision": revision.revision }))
    }
}

// =============================================================================
// approvePlan
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApproveParams {
    plan_id: String,
}

/// Mark a plan approved. Params: `{planId}`. Returns `{planId, status}`.
pub struct ApprovePlanHandler {
    plans: Arc<PlanStore>,
}

impl ApprovePlanHandler {
    /// Handler over `plans`.
    pub fn new(plans: Arc<PlanStore>) -> Self {
        Self { plans }
    }
}

#[async_trait]
impl BridgeHandler for ApprovePlanHandler {
    #[instrument(skip_all, fields(method = "approvePlan"))]
    async fn handle(&self, params: Value) -> Result<Value, HandlerError> {
        let ApproveParams { plan_id } = parse_params(params)?;
        require_non_empty("planId", &plan_id)?;
        let plan = self.plans.approve(&plan_id).map_err(plan_error)?;
        Ok(json!({ "planId": plan.id, "status": plan.status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::stores::PlanEvent;

    #[tokio::test]
    async fn propose_then_append_publishes_chunks() {
        let plans = Arc::new(PlanStore::default());
        let mut events = plans.subscribe();
        let handler = ProposeTestPlanHandler::new(Arc::clone(&plans));

        let out = handler
            .handle(json!({"title": "Parser", "content": "# Plan\n"}))
            .await
            .unwrap();
        let plan_id = out["planId"].as_str().unwrap().to_owned();
        assert_eq!(out["revision"], json!(1));

        let out = handler
            .handle(json!({"planId": plan_id, "content": "- empty input\n", "append": true}))
            .await
            .unwrap();
        assert_eq!(out["revision"], json!(2));

        assert_matches!(events.recv().await.unwrap(), PlanEvent::Content { append: false, .. });
        assert_matches!(
            events.recv().await.unwrap(),
            PlanEvent::Content { append: true, ref chunk, .. } if chunk == "- empty input\n"
        );
        assert_eq!(plans.get(&plan_id).unwrap().content, "# Plan\n- empty input\n");
    }

    #[tokio::test]
    async fn propose_rejects_bad_params() {
        let handler = ProposeTestPlanHandler::new(Arc::new(PlanStore::default()));
        assert_matches!(
            handler.handle(json!({"title": "t"})).await,
            Err(HandlerError::InvalidParams { .. })
        );
        assert_matches!(
            handler.handle(json!({"title": "t", "content": ""})).await,
            Err(HandlerError::InvalidParams { .. })
        );
    }

    #[tokio::test]
    async fn approve_returns_status() {
        let plans = Arc::new(PlanStore::default());
        let _ = plans
            .propose(PlanProposal {
                plan_id: Some("p1".into()),
                content: "x".into(),
                ..PlanProposal::default()
            })
            .unwrap();
        let handler = ApprovePlanHandler::new(Arc::clone(&plans));
        let out = handler.handle(json!({"planId": "p1"})).await.unwrap();
        assert_eq!(out, json!({"planId": "p1", "status": "approved"}));

        let err = handler.handle(json!({"planId": "nope"})).await.unwrap_err();
        assert_eq!(err.to_string(), "plan not found: nope");
        assert_matches!(
            handler.handle(json!({"planId": " "})).await,
            Err(HandlerError::InvalidParams { .. })
        );
    }
}
