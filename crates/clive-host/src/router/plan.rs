//! `plan.*`: read, approve and follow test plans.

use std::collections::HashMap;
use std::sync::Arc;

use clive_rpc::procedure::{require_max_len, require_non_empty};
use clive_rpc::{RouterBuildError, RpcError, ValidateInput, procedure};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use super::{AppRouter, plan_error};
use crate::context::RequestContext;
use crate::stores::{Plan, PlanEvent, PlanStore, PlanSummary};

const MAX_PLAN_ID_LEN: usize = 128;

/// `{planId}` input of `get` and `approve`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlanIdInput {
    /// Plan to address.
    pub plan_id: String,
}

impl ValidateInput for PlanIdInput {
    fn validate(&self) -> Result<(), String> {
        require_non_empty("planId", &self.plan_id)?;
        require_max_len("planId", &self.plan_id, MAX_PLAN_ID_LEN)
    }
}

/// Optional filter of `onContent`. Without a plan id every plan's events
/// are delivered.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct PlanFilter {
    /// Only events of this plan.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

impl ValidateInput for PlanFilter {
    fn validate(&self) -> Result<(), String> {
        match &self.plan_id {
            Some(id) => require_max_len("planId", id, MAX_PLAN_ID_LEN),
            None => Ok(()),
        }
    }
}

/// `get`, `list`, `approve`, `onContent`.
pub fn router() -> Result<AppRouter, RouterBuildError> {
    AppRouter::builder()
        .procedure(
            "get",
            procedure::<RequestContext>()
                .input::<PlanIdInput>()
                .query(|input, ctx: RequestContext| async move {
                    ctx.plans.get(&input.plan_id).map_err(|e| plan_error(&e))
                }),
        )
        .procedure(
            "list",
            procedure::<RequestContext>().query(|(), ctx: RequestContext| async move {
                Ok::<Vec<PlanSummary>, RpcError>(ctx.plans.list())
            }),
        )
        .procedure(
            "approve",
            procedure::<RequestContext>()
                .input::<PlanIdInput>()
                .mutation(|input, ctx: RequestContext| async move {
                    ctx.plans.approve(&input.plan_id).map_err(|e| plan_error(&e))
                }),
        )
        .procedure(
            "onContent",
            procedure::<RequestContext>()
                .input::<Option<PlanFilter>>()
                .subscription(|filter, ctx: RequestContext| async move {
                    let plan_id = filter.unwrap_or_default().plan_id;
                    Ok(content_feed(ctx.plans, plan_id).map(Ok::<PlanEvent, RpcError>))
                }),
        )
        .build()
}

/// Events of one plan, or of every plan when `plan_id` is `None`.
///
/// A filtered feed opens with a snapshot of the plan. A feed that falls
/// further behind than the store buffers gets a snapshot of every plan it
/// follows in place of the events it lost. Content at or below a revision
/// already sent as a snapshot is skipped, so appending chunks to the last
/// snapshot always rebuilds the stored content.
fn content_feed(plans: Arc<PlanStore>, plan_id: Option<String>) -> impl Stream<Item = PlanEvent> + Send + 'static {
    // Subscribe before taking the snapshot so nothing falls between the two.
    let mut live = BroadcastStream::new(plans.subscribe());
    async_stream::stream! {
        let mut synced = HashMap::new();
        if plan_id.is_some() {
            for event in snapshots(&plans, plan_id.as_deref(), &mut synced) {
                yield event;
            }
        }
        while let Some(event) = live.next().await {
            match event {
                Ok(event) => {
                    if plan_id.as_deref().is_some_and(|id| event.plan_id() != id) {
                        continue;
                    }
                    if let PlanEvent::Content { plan_id, revision, .. } = &event
                        && synced.get(plan_id).is_some_and(|sent| revision <= sent)
                    {
                        continue;
                    }
                    yield event;
                }
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(skipped, "plan content subscriber lagged, resending snapshots");
                    for event in snapshots(&plans, plan_id.as_deref(), &mut synced) {
                        yield event;
                    }
                }
            }
        }
    }
}

/// Current content of `plan_id` (or of every plan), recording the revision
/// each snapshot covers.
fn snapshots(plans: &PlanStore, plan_id: Option<&str>, synced: &mut HashMap<String, u32>) -> Vec<PlanEvent> {
    let ids = match plan_id {
        Some(id) => vec![id.to_owned()],
        None => plans.list().into_iter().map(|summary| summary.id).collect(),
    };
    ids.iter()
        .filter_map(|id| plans.get(id).ok())
        .map(|plan| {
            let _ = synced.insert(plan.id.clone(), plan.revision);
            snapshot_event(plan)
        })
        .collect()
}

/// Full current content of a plan.
fn snapshot_event(plan: Plan) -> PlanEvent {
    PlanEvent::Content {
        plan_id: plan.id,
        revision: plan.revision,
        chunk: plan.content,
        append: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::test_support::Fixture;
    use crate::stores::PlanProposal;
    use clive_rpc::ProcedureKind;
    use clive_tools::testutil::ScriptedSpawner;
    use serde_json::{Value, json};

    fn propose(fx: &Fixture, id: &str, content: &str, append: bool) {
        let _ = fx
            .state
            .plans
            .propose(PlanProposal {
                plan_id: Some(id.into()),
                title: "Parser".into(),
                content: content.into(),
                append,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn get_and_list() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        propose(&fx, "p1", "# Plan\n", false);
        let router = router().unwrap();

        let plan = router
            .call("get", ProcedureKind::Query, json!({"planId": "p1"}), fx.ctx())
            .await
            .unwrap();
        assert_eq!(plan["content"], json!("# Plan\n"));
        assert_eq!(plan["status"], json!("draft"));

        let list = router
            .call("list", ProcedureKind::Query, Value::Null, fx.ctx())
            .await
            .unwrap();
        assert_eq!(list.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn get_unknown_plan_carries_code() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let err = router()
            .unwrap()
            .call("get", ProcedureKind::Query, json!({"planId": "nope"}), fx.ctx())
            .await
            .unwrap_err();
        assert_eq!(err.to_error_body().details, Some(json!({"code": "PLAN_NOT_FOUND"})));
    }

    #[tokio::test]
    async fn blank_plan_id_never_reaches_store() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let err = router()
            .unwrap()
            .call("approve", ProcedureKind::Mutation, json!({"planId": "  "}), fx.ctx())
            .await
            .unwrap_err();
        assert_eq!(err.code(), clive_rpc::errors::INPUT_VALIDATION);
    }

    #[tokio::test]
    async fn on_content_sends_snapshot_then_filtered_chunks() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        propose(&fx, "p1", "# Plan\n", false);
        let mut events = router()
            .unwrap()
            .subscribe("onContent", json!({"planId": "p1"}), fx.ctx())
            .await
            .unwrap();

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first["chunk"], json!("# Plan\n"));
        assert_eq!(first["append"], json!(false));

        propose(&fx, "other", "ignored", false);
        propose(&fx, "p1", "- case\n", true);
        let _ = fx.state.plans.approve("p1").unwrap();

        let next = events.next().await.unwrap().unwrap();
        assert_eq!(next["type"], json!("content"));
        assert_eq!(next["chunk"], json!("- case\n"));
        let next = events.next().await.unwrap().unwrap();
        assert_eq!(next, json!({"type": "approved", "planId": "p1", "revision": 2}));
    }

    #[tokio::test]
    async fn on_content_without_filter_sees_every_plan() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        let mut events = router()
            .unwrap()
            .subscribe("onContent", Value::Null, fx.ctx())
            .await
            .unwrap();
        propose(&fx, "a", "1", false);
        propose(&fx, "b", "2", false);
        assert_eq!(events.next().await.unwrap().unwrap()["planId"], json!("a"));
        assert_eq!(events.next().await.unwrap().unwrap()["planId"], json!("b"));
    }

    /// Rebuild content the way the UI does: replace on `append: false`,
    /// extend otherwise, until the plan is approved.
    async fn rebuild_until_approved(events: &mut clive_rpc::ValueStream) -> String {
        let mut content = String::new();
        while let Some(event) = events.next().await {
            let event: PlanEvent = serde_json::from_value(event.unwrap()).unwrap();
            match event {
                PlanEvent::Content { chunk, append: true, .. } => content.push_str(&chunk),
                PlanEvent::Content { chunk, .. } => content = chunk,
                PlanEvent::Approved { .. } => return content,
            }
        }
        panic!("feed ended before approval");
    }

    #[tokio::test]
    async fn lagging_filtered_subscriber_resyncs_from_snapshot() {
        let fx = Fixture::with_plan_buffer(2);
        propose(&fx, "p1", "A", false);
        let mut events = router()
            .unwrap()
            .subscribe("onContent", json!({"planId": "p1"}), fx.ctx())
            .await
            .unwrap();
        assert_eq!(events.next().await.unwrap().unwrap()["chunk"], json!("A"));

        for chunk in ["B", "C", "D", "E", "F"] {
            propose(&fx, "p1", chunk, true);
        }
        let _ = fx.state.plans.approve("p1").unwrap();

        let stored = fx.state.plans.get("p1").unwrap();
        assert_eq!(stored.content, "ABCDEF");
        assert_eq!(rebuild_until_approved(&mut events).await, stored.content);
    }

    #[tokio::test]
    async fn lagging_unfiltered_subscriber_gets_every_plan_again() {
        let fx = Fixture::with_plan_buffer(1);
        let mut events = router()
            .unwrap()
            .subscribe("onContent", Value::Null, fx.ctx())
            .await
            .unwrap();
        propose(&fx, "a", "1", false);
        propose(&fx, "b", "2", false);
        propose(&fx, "b", "3", true);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event: PlanEvent = serde_json::from_value(events.next().await.unwrap().unwrap()).unwrap();
            seen.push(event);
        }
        seen.sort_by(|x, y| x.plan_id().cmp(y.plan_id()));
        assert_eq!(
            seen,
            vec![
                PlanEvent::Content {
                    plan_id: "a".into(),
                    revision: 1,
                    chunk: "1".into(),
                    append: false,
                },
                PlanEvent::Content {
                    plan_id: "b".into(),
                    revision: 2,
                    chunk: "23".into(),
                    append: false,
                },
            ]
        );
    }

    #[tokio::test]
    async fn content_already_in_the_snapshot_is_not_repeated() {
        let fx = Fixture::new(ScriptedSpawner::new(vec![]));
        propose(&fx, "p1", "A", false);
        let mut events = router()
            .unwrap()
            .subscribe("onContent", json!({"planId": "p1"}), fx.ctx())
            .await
            .unwrap();
        // Lands between subscribing and the first poll, so the snapshot
        // already includes it.
        propose(&fx, "p1", "B", true);
        let _ = fx.state.plans.approve("p1").unwrap();

        assert_eq!(rebuild_until_approved(&mut events).await, "AB");
    }
}
