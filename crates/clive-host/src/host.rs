//! Host assembly: state, bridge handlers, router and RPC server.

use std::path::PathBuf;
use std::sync::Arc;

use clive_bridge::{BridgeConfig, BridgeError, BridgeRuntime, RegistryError};
use clive_rpc::{RouterBuildError, RpcServer};
use clive_settings::CliveSettings;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::{ContextFactory, ContextOverrides, RequestContext};
use crate::handlers;
use crate::router::app_router;
use crate::state::HostState;

/// Errors while assembling or starting the host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The application router was malformed.
    #[error("router: {0}")]
    Router(#[from] RouterBuildError),
    /// A bridge method was registered twice.
    #[error("handler registry: {0}")]
    Registry(#[from] RegistryError),
    /// Bridge lifecycle failure.
    #[error("bridge: {0}")]
    Bridge(#[from] BridgeError),
}

/// What to build a [`Host`] from.
#[derive(Clone, Debug)]
pub struct HostOptions {
    /// Root of the user's workspace.
    pub workspace_root: PathBuf,
    /// Loaded settings.
    pub settings: CliveSettings,
    /// Bridge endpoint placement; defaults to `settings.bridge`.
    pub bridge: Option<BridgeConfig>,
}

impl HostOptions {
    /// Options rooted at `workspace_root`.
    pub fn new(workspace_root: impl Into<PathBuf>, settings: CliveSettings) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            settings,
            bridge: None,
        }
    }

    /// Place bridge sockets according to `config`.
    #[must_use]
    pub fn bridge(mut self, config: BridgeConfig) -> Self {
        self.bridge = Some(config);
        self
    }
}

/// A wired host: one bridge, one set of stores, one router.
///
/// Must be built inside a Tokio runtime; the plan indexer is spawned
/// immediately.
pub struct Host {
    state: HostState,
    server: RpcServer<RequestContext>,
    shutdown: CancellationToken,
    indexer: JoinHandle<()>,
}

impl Host {
    /// Build with production collaborators.
    pub fn new(options: HostOptions) -> Result<Self, HostError> {
        Self::with_overrides(options, ContextOverrides::new())
    }

    /// Build with some collaborators replaced. The overrides apply to RPC
    /// contexts and to the bridge's file handler alike.
    pub fn with_overrides(options: HostOptions, overrides: ContextOverrides) -> Result<Self, HostError> {
        let HostOptions {
            workspace_root,
            settings,
            bridge,
        } = options;
        let bridge = bridge.unwrap_or_else(|| BridgeConfig::from_settings(&settings.bridge));
        let state = HostState::new(Arc::new(BridgeRuntime::new(bridge)), &settings);
        let factory = ContextFactory::new(workspace_root, &state, settings.tools.clone());

        let files = factory.build(&overrides).files;
        state.bridge.set_handlers(handlers::register_all(&state, files)?)?;

        let server = RpcServer::new(Arc::new(app_router()?), factory.into_context_fn(overrides))
            .with_max_frame_bytes(settings.rpc.max_frame_bytes);
        let shutdown = CancellationToken::new();
        let indexer = state.spawn_plan_indexer(shutdown.child_token());
        Ok(Self {
            state,
            server,
            shutdown,
            indexer,
        })
    }

    /// Shared state.
    pub fn state(&self) -> &HostState {
        &self.state
    }

    /// The RPC server, for in-process transports.
    pub fn server(&self) -> &RpcServer<RequestContext> {
        &self.server
    }

    /// Token that stops [`serve_io`](Self::serve_io) and the indexer.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the bridge endpoint.
    pub async fn start_bridge(&self) -> Result<PathBuf, HostError> {
        Ok(self.state.bridge.start().await?)
    }

    /// Serve RPC on `reader`/`writer` until the reader ends or shutdown.
    pub async fn serve_io<R, W>(&self, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.server
            .serve_io(reader, writer, self.shutdown.child_token())
            .await;
    }

    /// Stop serving, stop the indexer and dispose the bridge.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.indexer.await {
            warn!(error = %e, "plan indexer task failed");
        }
        match self.state.bridge.dispose().await {
            Ok(()) | Err(BridgeError::Disposed) => {}
            Err(e) => warn!(error = %e, "bridge dispose failed"),
        }
        info!("host stopped");
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("state", &self.state)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}
