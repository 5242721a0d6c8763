//! Test plans proposed by the agent, with revision tracking and a content
//! feed for the UI.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Plan store errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlanError {
    /// No plan with that id.
    #[error("plan not found: {plan_id}")]
    NotFound {
        /// Requested id.
        plan_id: String,
    },
    /// Proposal content was unusable.
    #[error("invalid plan: {message}")]
    Invalid {
        /// What was wrong.
        message: String,
    },
}

/// Approval state of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Open for revision.
    Draft,
    /// Approved by the user; revising moves it back to draft.
    Approved,
}

/// A stored plan.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    /// Plan id.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Full markdown content.
    pub content: String,
    /// Starts at 1, bumped by every proposal.
    pub revision: u32,
    /// Approval state.
    pub status: PlanStatus,
    /// Revision that was approved, if any.
    pub approved_revision: Option<u32>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

/// Listing entry without the content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    /// Plan id.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Current revision.
    pub revision: u32,
    /// Approval state.
    pub status: PlanStatus,
    /// Content length in bytes.
    pub content_length: usize,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl From<&Plan> for PlanSummary {
    fn from(plan: &Plan) -> Self {
        Self {
            id: plan.id.clone(),
            title: plan.title.clone(),
            revision: plan.revision,
            status: plan.status,
            content_length: plan.content.len(),
            updated_at: plan.updated_at,
        }
    }
}

/// A proposal from the agent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanProposal {
    /// Existing plan to revise. A fresh id is assigned when absent.
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Title; an empty title keeps the current one on revision.
    #[serde(default)]
    pub title: String,
    /// Content, or the chunk to add when `append` is set.
    pub content: String,
    /// Add `content` to the end instead of replacing.
    #[serde(default)]
    pub append: bool,
}

/// Result of a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRevision {
    /// Plan id.
    pub plan_id: String,
    /// Revision after the proposal.
    pub revision: u32,
}

/// Change published to plan subscribers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlanEvent {
    /// New content.
    #[serde(rename_all = "camelCase")]
    Content {
        /// Plan id.
        plan_id: String,
        /// Revision the chunk belongs to.
        revision: u32,
        /// The proposed text.
        chunk: String,
        /// Whether `chunk` extends the previous content.
        append: bool,
    },
    /// The plan was approved.
    #[serde(rename_all = "camelCase")]
    Approved {
        /// Plan id.
        plan_id: String,
        /// Approved revision.
        revision: u32,
    },
}

impl PlanEvent {
    /// Plan this event belongs to.
    pub fn plan_id(&self) -> &str {
        match self {
            Self::Content { plan_id, .. } | Self::Approved { plan_id, .. } => plan_id,
        }
    }
}

/// In-memory plan store. Events are published while the store lock is
/// held, so every subscriber sees changes in store order.
#[derive(Debug)]
pub struct PlanStore {
    plans: Mutex<HashMap<String, Plan>>,
    events: broadcast::Sender<PlanEvent>,
}

impl PlanStore {
    /// Empty store; `buffer` bounds how far a subscriber may lag.
    pub fn new(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            plans: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Create a plan or revise an existing one.
    pub fn propose(&self, proposal: PlanProposal) -> Result<PlanRevision, PlanError> {
        if proposal.content.is_empty() && !proposal.append {
            return Err(PlanError::Invalid {
                message: "content must not be empty".into(),
            });
        }
        let now = Utc::now();
        let mut plans = self.plans.lock();
        let plan_id = proposal
            .plan_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("plan-{}", uuid::Uuid::now_v7().simple()));

        let plan = plans.entry(plan_id.clone()).or_insert_with(|| Plan {
            id: plan_id.clone(),
            title: String::new(),
            content: String::new(),
            revision: 0,
            status: PlanStatus::Draft,
            approved_revision: None,
            created_at: now,
            updated_at: now,
        });
        if proposal.append {
            plan.content.push_str(&proposal.content);
        } else {
            plan.content.clone_from(&proposal.content);
        }
        if !proposal.title.trim().is_empty() {
            plan.title = proposal.title;
        } else if plan.title.is_empty() {
            plan.title = "Untitled plan".into();
        }
        plan.revision += 1;
        plan.status = PlanStatus::Draft;
        plan.updated_at = now;

        let revision = plan.revision;
        debug!(plan_id = %plan_id, revision, append = proposal.append, "plan revised");
        let _ = self.events.send(PlanEvent::Content {
            plan_id: plan_id.clone(),
            revision,
            chunk: proposal.content,
            append: proposal.append,
        });
        Ok(PlanRevision { plan_id, revision })
    }

    /// Approve the current revision. Approving twice is a no-op.
    pub fn approve(&self, plan_id: &str) -> Result<Plan, PlanError> {
        let mut plans = self.plans.lock();
        let plan = plans.get_mut(plan_id).ok_or_else(|| PlanError::NotFound {
            plan_id: plan_id.to_owned(),
        })?;
        if plan.status != PlanStatus::Approved {
            plan.status = PlanStatus::Approved;
            plan.approved_revision = Some(plan.revision);
            plan.updated_at = Utc::now();
            info!(plan_id, revision = plan.revision, "plan approved");
            let _ = self.events.send(PlanEvent::Approved {
                plan_id: plan_id.to_owned(),
                revision: plan.revision,
            });
        }
        Ok(plan.clone())
    }

    /// Current state of one plan.
    pub fn get(&self, plan_id: &str) -> Result<Plan, PlanError> {
        self.plans
            .lock()
            .get(plan_id)
            .cloned()
            .ok_or_else(|| PlanError::NotFound {
                plan_id: plan_id.to_owned(),
            })
    }

    /// All plans, most recently changed first.
    pub fn list(&self) -> Vec<PlanSummary> {
        let mut out: Vec<PlanSummary> = self.plans.lock().values().map(PlanSummary::from).collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Receive changes from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }
}

impl Default for PlanStore {
    fn default() -> Self {
        Self::new(64)
    }
}
