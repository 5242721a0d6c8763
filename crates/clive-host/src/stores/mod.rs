//! In-memory state shared by bridge handlers and router resolvers. Lives
//! for the process lifetime.

pub mod plans;
pub mod summaries;

pub use plans::{Plan, PlanError, PlanEvent, PlanProposal, PlanRevision, PlanStatus, PlanStore, PlanSummary};
pub use summaries::{ContextStore, ContextSummary};
