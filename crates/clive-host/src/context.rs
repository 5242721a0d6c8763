//! Per-call request context and the factory that builds it.
//!
//! Every RPC call gets a fresh [`RequestContext`]. Each slot has a default
//! factory closure. A [`ContextOverrides`] entry replaces the slot outright,
//! and the default is then never invoked. Tests use overrides to swap in
//! doubles without touching the filesystem or spawning processes.

use std::path::PathBuf;
use std::sync::Arc;

use clive_bridge::BridgeRuntime;
use clive_settings::ToolSettings;
use clive_tools::fs::write::TokioFileWriter;
use clive_tools::providers::process::TokioProcessSpawner;
use clive_tools::{FileWriter, KnowledgeSearch, ProcessSpawner};

use crate::state::HostState;
use crate::stores::PlanStore;

/// Collaborators available to a resolver.
#[derive(Clone)]
pub struct RequestContext {
    /// Writes files inside the workspace.
    pub files: Arc<dyn FileWriter>,
    /// Searches project knowledge.
    pub knowledge: Arc<dyn KnowledgeSearch>,
    /// Spawns child processes.
    pub processes: Arc<dyn ProcessSpawner>,
    /// The host's bridge.
    pub bridge: Arc<BridgeRuntime>,
    /// Proposed test plans.
    pub plans: Arc<PlanStore>,
    /// Root of the user's workspace.
    pub workspace_root: PathBuf,
    /// Tool settings snapshot.
    pub tools: ToolSettings,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("workspace_root", &self.workspace_root)
            .finish_non_exhaustive()
    }
}

type Slot<T> = Arc<dyn Fn() -> T + Send + Sync>;

fn slot<T, F>(f: F) -> Slot<T>
where
    F: Fn() -> T + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Optional per-slot replacements.
#[derive(Clone, Default)]
pub struct ContextOverrides {
    files: Option<Arc<dyn FileWriter>>,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
    processes: Option<Arc<dyn ProcessSpawner>>,
    bridge: Option<Arc<BridgeRuntime>>,
    plans: Option<Arc<PlanStore>>,
    workspace_root: Option<PathBuf>,
}

impl ContextOverrides {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the file writer.
    #[must_use]
    pub fn files(mut self, files: Arc<dyn FileWriter>) -> Self {
        self.files = Some(files);
        self
    }

    /// Replace the knowledge search.
    #[must_use]
    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// Replace the process spawner.
    #[must_use]
    pub fn processes(mut self, processes: Arc<dyn ProcessSpawner>) -> Self {
        self.processes = Some(processes);
        self
    }

    /// Replace the bridge runtime.
    #[must_use]
    pub fn bridge(mut self, bridge: Arc<BridgeRuntime>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Replace the plan store.
    #[must_use]
    pub fn plans(mut self, plans: Arc<PlanStore>) -> Self {
        self.plans = Some(plans);
        self
    }

    /// Replace the workspace root.
    #[must_use]
    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }
}

/// Builds a [`RequestContext`] per call from default slot factories.
#[derive(Clone)]
pub struct ContextFactory {
    files: Slot<Arc<dyn FileWriter>>,
    knowledge: Slot<Arc<dyn KnowledgeSearch>>,
    processes: Slot<Arc<dyn ProcessSpawner>>,
    bridge: Slot<Arc<BridgeRuntime>>,
    plans: Slot<Arc<PlanStore>>,
    workspace_root: Slot<PathBuf>,
    tools: ToolSettings,
}

impl ContextFactory {
    /// Production defaults rooted at `workspace_root`: a confined
    /// [`TokioFileWriter`] and [`TokioProcessSpawner`]. The bridge, plan
    /// store and knowledge index are the shared instances in `state`.
    pub fn new(workspace_root: impl Into<PathBuf>, state: &HostState, tools: ToolSettings) -> Self {
        let root: PathBuf = workspace_root.into();
        let writer_root = root.clone();
        let max_write_bytes = tools.max_write_bytes;
        let knowledge: Arc<dyn KnowledgeSearch> = Arc::clone(&state.knowledge) as _;
        let spawner: Arc<dyn ProcessSpawner> = Arc::new(TokioProcessSpawner);
        let bridge = Arc::clone(&state.bridge);
        let plans = Arc::clone(&state.plans);
        Self {
            files: slot(move || {
                Arc::new(TokioFileWriter::new(writer_root.clone()).with_max_bytes(max_write_bytes))
                    as Arc<dyn FileWriter>
            }),
            knowledge: slot(move || Arc::clone(&knowledge)),
            processes: slot(move || Arc::clone(&spawner)),
            bridge: slot(move || Arc::clone(&bridge)),
            plans: slot(move || Arc::clone(&plans)),
            workspace_root: slot(move || root.clone()),
            tools,
        }
    }

    /// Replace the default file-writer factory.
    #[must_use]
    pub fn with_files<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Arc<dyn FileWriter> + Send + Sync + 'static,
    {
        self.files = slot(f);
        self
    }

    /// Replace the default knowledge-search factory.
    #[must_use]
    pub fn with_knowledge<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Arc<dyn KnowledgeSearch> + Send + Sync + 'static,
    {
        self.knowledge = slot(f);
        self
    }

    /// Replace the default process-spawner factory.
    #[must_use]
    pub fn with_processes<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Arc<dyn ProcessSpawner> + Send + Sync + 'static,
    {
        self.processes = slot(f);
        self
    }

    /// Build a context. Overridden slots skip their default factory.
    pub fn build(&self, overrides: &ContextOverrides) -> RequestContext {
        RequestContext {
            files: overrides.files.clone().unwrap_or_else(|| (self.files)()),
            knowledge: overrides
                .knowledge
                .clone()
                .unwrap_or_else(|| (self.knowledge)()),
            processes: overrides
                .processes
                .clone()
                .unwrap_or_else(|| (self.processes)()),
            bridge: overrides.bridge.clone().unwrap_or_else(|| (self.bridge)()),
            plans: overrides.plans.clone().unwrap_or_else(|| (self.plans)()),
            workspace_root: overrides
                .workspace_root
                .clone()
                .unwrap_or_else(|| (self.workspace_root)()),
            tools: self.tools.clone(),
        }
    }

    /// Closure for [`clive_rpc::RpcServer::new`] that builds a context per
    /// call with fixed `overrides`.
    pub fn into_context_fn(self, overrides: ContextOverrides) -> impl Fn() -> RequestContext + Send + Sync + 'static {
        move || self.build(&overrides)
    }
}

impl std::fmt::Debug for ContextFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextFactory").finish_non_exhaustive()
    }
}
