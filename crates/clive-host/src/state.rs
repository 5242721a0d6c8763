//! Long-lived host state shared by bridge handlers and the context factory.

use std::sync::Arc;

use clive_bridge::BridgeRuntime;
use clive_settings::CliveSettings;
use clive_tools::search::{InMemoryKnowledgeIndex, KnowledgeDocument};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stores::{ContextStore, Plan, PlanEvent, PlanStatus, PlanStore};

/// Tag carried by every knowledge document created from a plan.
pub const PLAN_TAG: &str = "plan";

/// Shared state. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct HostState {
    /// The host's bridge.
    pub bridge: Arc<BridgeRuntime>,
    /// Proposed test plans.
    pub plans: Arc<PlanStore>,
    /// Context summaries from the agent.
    pub summaries: Arc<ContextStore>,
    /// Project knowledge, including approved plans.
    pub knowledge: Arc<InMemoryKnowledgeIndex>,
}

impl HostState {
    /// Fresh stores sized from `settings`.
    pub fn new(bridge: Arc<BridgeRuntime>, settings: &CliveSettings) -> Self {
        Self {
            bridge,
            plans: Arc::new(PlanStore::new(settings.rpc.subscription_buffer)),
            summaries: Arc::new(ContextStore::default()),
            knowledge: Arc::new(InMemoryKnowledgeIndex::new(settings.tools.search_default_limit)),
        }
    }

    /// Make an approved plan searchable. Re-approving replaces the entry.
    pub fn index_approved_plan(&self, plan: &Plan) {
        debug!(plan_id = %plan.id, revision = plan.revision, "indexing approved plan");
        self.knowledge.insert(KnowledgeDocument {
            id: format!("{PLAN_TAG}:{}", plan.id),
            title: plan.title.clone(),
            content: plan.content.clone(),
            tags: vec![PLAN_TAG.to_owned(), "approved".to_owned()],
        });
    }

    /// Index every plan that is currently approved.
    pub fn index_all_approved(&self) {
        for summary in self.plans.list() {
            if summary.status != PlanStatus::Approved {
                continue;
            }
            if let Ok(plan) = self.plans.get(&summary.id) {
                self.index_approved_plan(&plan);
            }
        }
    }

    /// Index every plan approval, whichever side approved it, until
    /// `shutdown` fires.
    pub fn spawn_plan_indexer(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut events = self.plans.subscribe();
        let state = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = shutdown.cancelled() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(PlanEvent::Approved { plan_id, .. }) => match state.plans.get(&plan_id) {
                        Ok(plan) => state.index_approved_plan(&plan),
                        Err(e) => warn!(error = %e, "approved plan vanished before indexing"),
                    },
                    Ok(PlanEvent::Content { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "plan indexer lagged, re-indexing approved plans");
                        state.index_all_approved();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("plan indexer stopped");
        })
    }
}
