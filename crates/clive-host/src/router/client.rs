//! Typed client for [`app_router`](super::app_router).
//!
//! ```ignore
//! let api = AppClient::new(Arc::new(ChannelTransport::in_process(host.server().clone())));
//! let plan = api.plan().get().call(&PlanIdInput { plan_id }).await?;
//! let mut lines = api.process().run().subscribe(&run).await?;
//! ```

use clive_bridge::BridgeStatus;
use clive_rpc::typed_client;
use clive_tools::{OutputLine, SearchHit, WriteReceipt};

use super::files::WriteInput;
use super::knowledge::SearchInput;
use super::plan::{PlanFilter, PlanIdInput};
use super::process::RunInput;
use super::status::{BranchChanges, BranchChangesInput};
use crate::stores::{Plan, PlanEvent, PlanSummary};

typed_client! {
    /// Root of the host API.
    pub struct AppClient {
        bridge: branch(BridgeApi),
        files: branch(FilesApi),
        knowledge: branch(KnowledgeApi),
        plan: branch(PlanApi),
        process: branch(ProcessApi),
        status: branch(StatusApi),
    }

    /// `bridge.*`.
    pub struct BridgeApi {
        status: query(() => BridgeStatus),
        on_status_change = "onStatusChange": subscription(() => BridgeStatus),
        restart: mutation(() => BridgeStatus),
    }

    /// `files.*`.
    pub struct FilesApi {
        write: mutation(WriteInput => WriteReceipt),
    }

    /// `knowledge.*`.
    pub struct KnowledgeApi {
        search: query(SearchInput => Vec<SearchHit>),
    }

    /// `plan.*`.
    pub struct PlanApi {
        get: query(PlanIdInput => Plan),
        list: query(() => Vec<PlanSummary>),
        approve: mutation(PlanIdInput => Plan),
        on_content = "onContent": subscription(Option<PlanFilter> => PlanEvent),
    }

    /// `process.*`.
    pub struct ProcessApi {
        run: subscription(RunInput => OutputLine),
    }

    /// `status.*`.
    pub struct StatusApi {
        branch_changes = "branchChanges": query(Option<BranchChangesInput> => BranchChanges),
    }
}
