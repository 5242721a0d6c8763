//! Bridge manager: owns one Unix-domain listening endpoint and its
//! lifecycle state machine.
//!
//! ```text
//! Idle ──start──▶ Starting ──bound──▶ Ready ──stop──▶ Stopping ──▶ Idle
//!                    │                  │
//!                    └──bind failed──▶ Error ◀──listener died
//! ```
//!
//! Every transition is published under the state lock, so all subscribers
//! observe the same order.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clive_settings::BridgeSettings;
use parking_lot::{Mutex, RwLock};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::connection;
use crate::errors::BridgeError;
use crate::registry::HandlerRegistry;
use crate::status::{BridgeState, BridgeStatus, StatusStream};

/// Consecutive accept failures after which the listener is considered dead.
const MAX_ACCEPT_FAILURES: u32 = 32;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Directory in which socket files are created.
    pub socket_dir: PathBuf,
    /// Socket file name prefix.
    pub socket_prefix: String,
    /// Largest accepted frame.
    pub max_frame_bytes: usize,
    /// How long `stop()` waits for connections to drain.
    pub shutdown_grace: Duration,
    /// Status broadcast buffer.
    pub status_buffer: usize,
}

impl BridgeConfig {
    /// Defaults with sockets under `socket_dir`.
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        let defaults = BridgeSettings::default();
        Self {
            socket_dir: socket_dir.into(),
            ..Self::from_settings(&defaults)
        }
    }

    /// Build from loaded settings.
    pub fn from_settings(settings: &BridgeSettings) -> Self {
        Self {
            socket_dir: settings.resolved_socket_dir(),
            socket_prefix: settings.socket_prefix.clone(),
            max_frame_bytes: settings.max_frame_bytes,
            shutdown_grace: Duration::from_millis(settings.shutdown_grace_ms),
            status_buffer: settings.status_buffer_size.max(1),
        }
    }

    /// Fresh endpoint path: `<dir>/<prefix>-<pid>-<uuid>.sock`.
    fn allocate_path(&self) -> PathBuf {
        let nonce = uuid::Uuid::now_v7().simple();
        self.socket_dir.join(format!(
            "{}-{}-{nonce}.sock",
            self.socket_prefix,
            std::process::id()
        ))
    }
}

struct Running {
    socket_path: PathBuf,
    cancel: CancellationToken,
    accept: JoinHandle<()>,
    generation: u64,
}

struct Inner {
    state: BridgeState,
    status: BridgeStatus,
    running: Option<Running>,
    generation: u64,
}

/// State shared between the manager handle and its accept loop.
struct Core {
    config: BridgeConfig,
    inner: Mutex<Inner>,
    handlers: Arc<RwLock<Arc<HandlerRegistry>>>,
    status_tx: broadcast::Sender<BridgeStatus>,
    latest: watch::Sender<BridgeStatus>,
}

impl Core {
    fn transition(&self, inner: &mut Inner, state: BridgeState, status: BridgeStatus) {
        debug!(from = %inner.state, to = %state, "bridge transition");
        inner.state = state;
        inner.status = status.clone();
        let _ = self.latest.send_replace(status.clone());
        // No receivers is not an error.
        let _ = self.status_tx.send(status);
    }

    /// Called by the accept loop when the listener can no longer accept.
    fn listener_failed(&self, generation: u64, message: String) {
        let mut inner = self.inner.lock();
        let current = inner.running.as_ref().map(|r| r.generation);
        if current != Some(generation) {
            return;
        }
        if let Some(running) = inner.running.take() {
            running.cancel.cancel();
            remove_socket(&running.socket_path);
        }
        error!(error = %message, "bridge listener failed");
        self.transition(&mut inner, BridgeState::Error, BridgeStatus::failed(message));
    }
}

/// Owns one listening endpoint, dispatches bridge requests to the installed
/// [`HandlerRegistry`], and publishes lifecycle snapshots.
pub struct BridgeManager {
    core: Arc<Core>,
    /// Serializes start / stop / restart.
    lifecycle: tokio::sync::Mutex<()>,
}

impl BridgeManager {
    /// Create an idle manager.
    pub fn new(config: BridgeConfig) -> Self {
        let (status_tx, _) = broadcast::channel(config.status_buffer.max(1));
        let (latest, _) = watch::channel(BridgeStatus::idle());
        Self {
            core: Arc::new(Core {
                config,
                inner: Mutex::new(Inner {
                    state: BridgeState::Idle,
                    status: BridgeStatus::idle(),
                    running: None,
                    generation: 0,
                }),
                handlers: Arc::new(RwLock::new(Arc::new(HandlerRegistry::new()))),
                status_tx,
                latest,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Manager configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.core.config
    }

    /// Bind a fresh endpoint and start accepting. Returns the socket path.
    ///
    /// Allowed from `Idle` or `Error`. On bind failure the manager moves to
    /// `Error` and may be started again.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<PathBuf, BridgeError> {
        let _guard = self.lifecycle.lock().await;
        self.start_locked()
    }

    fn start_locked(&self) -> Result<PathBuf, BridgeError> {
        let core = &self.core;
        let mut inner = core.inner.lock();
        match inner.state {
            BridgeState::Idle | BridgeState::Error => {}
            other => {
                return Err(BridgeError::InvalidState {
                    operation: "start",
                    state: other.as_str(),
                });
            }
        }

        let path = core.config.allocate_path();
        core.transition(&mut inner, BridgeState::Starting, BridgeStatus::starting(path.clone()));

        let listener = match bind(&path) {
            Ok(listener) => listener,
            Err(e) => {
                let message = format!("cannot listen on {}: {e}", path.display());
                error!(socket_path = %path.display(), error = %e, "bridge start failed");
                core.transition(&mut inner, BridgeState::Error, BridgeStatus::failed(message.clone()));
                return Err(BridgeError::Start { message });
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            Arc::clone(core),
            cancel.clone(),
            generation,
        ));
        inner.running = Some(Running {
            socket_path: path.clone(),
            cancel,
            accept,
            generation,
        });
        core.transition(&mut inner, BridgeState::Ready, BridgeStatus::ready(path.clone()));
        info!(socket_path = %path.display(), "bridge ready");
        Ok(path)
    }

    /// Close the endpoint, answer in-flight calls with `bridge closed`, and
    /// return to `Idle`. No-op when already idle.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        let core = &self.core;
        let running = {
            let mut inner = core.inner.lock();
            if inner.state == BridgeState::Idle && inner.running.is_none() {
                return;
            }
            inner.state = BridgeState::Stopping;
            inner.running.take()
        };

        if let Some(running) = running {
            running.cancel.cancel();
            let mut accept = running.accept;
            match tokio::time::timeout(core.config.shutdown_grace, &mut accept).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "bridge accept loop ended abnormally"),
                Err(_) => {
                    warn!(
                        grace_ms = core.config.shutdown_grace.as_millis(),
                        "bridge connections did not drain in time"
                    );
                    accept.abort();
                }
            }
            remove_socket(&running.socket_path);
            info!(socket_path = %running.socket_path.display(), "bridge stopped");
        }

        let mut inner = core.inner.lock();
        core.transition(&mut inner, BridgeState::Idle, BridgeStatus::idle());
    }

    /// Synchronous stop: cancels everything and returns to `Idle` without
    /// waiting for connection tasks to drain.
    pub fn close_now(&self) {
        let core = &self.core;
        let mut inner = core.inner.lock();
        match inner.running.take() {
            Some(running) => {
                running.cancel.cancel();
                remove_socket(&running.socket_path);
            }
            None if inner.state == BridgeState::Idle => return,
            None => {}
        }
        core.transition(&mut inner, BridgeState::Idle, BridgeStatus::idle());
    }

    /// `stop()` then `start()`. Returns the new socket path.
    #[instrument(skip(self))]
    pub async fn restart(&self) -> Result<PathBuf, BridgeError> {
        let _guard = self.lifecycle.lock().await;
        self.stop_locked().await;
        self.start_locked()
    }

    /// Replace the handler registry. Calls already dispatched keep the
    /// registry they started with.
    pub fn set_handlers(&self, registry: HandlerRegistry) {
        let methods = registry.methods();
        *self.core.handlers.write() = Arc::new(registry);
        debug!(?methods, "bridge handlers installed");
    }

    /// Currently installed registry.
    pub fn handlers(&self) -> Arc<HandlerRegistry> {
        Arc::clone(&*self.core.handlers.read())
    }

    /// Current lifecycle snapshot.
    pub fn status(&self) -> BridgeStatus {
        self.core.inner.lock().status.clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.core.inner.lock().state
    }

    /// Endpoint path while running.
    pub fn socket_path(&self) -> Option<PathBuf> {
        self.core
            .inner
            .lock()
            .running
            .as_ref()
            .map(|r| r.socket_path.clone())
    }

    /// Subscribe to status snapshots. The current snapshot is yielded first.
    pub fn subscribe(&self) -> StatusStream {
        let inner = self.core.inner.lock();
        StatusStream::new(
            inner.status.clone(),
            self.core.status_tx.subscribe(),
            self.core.latest.subscribe(),
        )
    }
}

impl Drop for BridgeManager {
    fn drop(&mut self) {
        if let Some(running) = self.core.inner.lock().running.take() {
            running.cancel.cancel();
            remove_socket(&running.socket_path);
        }
    }
}

impl std::fmt::Debug for BridgeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeManager")
            .field("state", &self.state())
            .field("socket_path", &self.socket_path())
            .finish()
    }
}

fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    UnixListener::bind(path)
}

fn remove_socket(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(socket_path = %path.display(), error = %e, "failed to remove socket file"),
    }
}

async fn accept_loop(
    listener: UnixListener,
    core: Arc<Core>,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut connections = JoinSet::new();
    let mut failures = 0u32;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    failures = 0;
                    debug!("bridge connection accepted");
                    let (reader, writer) = stream.into_split();
                    let _ = connections.spawn(connection::serve(
                        reader,
                        writer,
                        Arc::clone(&core.handlers),
                        core.config.max_frame_bytes,
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "bridge accept failed");
                    if failures >= MAX_ACCEPT_FAILURES {
                        core.listener_failed(generation, format!("listener stopped accepting: {e}"));
                        break;
                    }
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    error!(error = %e, "bridge connection task failed");
                }
            }
        }
    }

    drop(listener);
    while let Some(joined) = connections.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "bridge connection task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use futures::StreamExt;

    fn manager(dir: &Path) -> BridgeManager {
        BridgeManager::new(BridgeConfig {
            shutdown_grace: Duration::from_millis(500),
            ..BridgeConfig::new(dir)
        })
    }

    #[tokio::test]
    async fn start_binds_fresh_socket() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let path = m.start().await.unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("clive-bridge-"));
        assert_eq!(m.state(), BridgeState::Ready);
        assert_eq!(m.status(), BridgeStatus::ready(path.clone()));
        m.stop().await;
        assert!(!path.exists());
        assert_eq!(m.status(), BridgeStatus::idle());
    }

    #[tokio::test]
    async fn start_twice_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let _ = m.start().await.unwrap();
        assert_matches!(
            m.start().await,
            Err(BridgeError::InvalidState { operation: "start", state: "ready" })
        );
        m.stop().await;
    }

    #[tokio::test]
    async fn bind_failure_enters_error_and_can_retry() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "").unwrap();
        let m = manager(&blocker);

        let err = m.start().await.unwrap_err();
        assert_matches!(err, BridgeError::Start { .. });
        assert_eq!(m.state(), BridgeState::Error);
        assert!(m.status().error.is_some());
        assert!(!m.status().bridge_ready);

        // Retry is allowed from Error and fails the same way.
        assert_matches!(m.start().await, Err(BridgeError::Start { .. }));
        m.stop().await;
        assert_eq!(m.status(), BridgeStatus::idle());
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let _ = m.start().await.unwrap();
        m.stop().await;
        let after_first = m.status();
        m.stop().await;
        assert_eq!(m.status(), after_first);
        assert_eq!(m.state(), BridgeState::Idle);
    }

    #[tokio::test]
    async fn restart_allocates_new_path() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let first = m.start().await.unwrap();
        let second = m.restart().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(m.state(), BridgeState::Ready);
        assert_eq!(m.socket_path(), Some(second));
        m.stop().await;
    }

    #[tokio::test]
    async fn subscribe_sees_full_lifecycle_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let mut statuses = m.subscribe();
        let path = m.start().await.unwrap();
        m.stop().await;

        let seen: Vec<BridgeStatus> = statuses.by_ref().take(4).collect().await;
        assert_eq!(
            seen,
            vec![
                BridgeStatus::idle(),
                BridgeStatus::starting(path.clone()),
                BridgeStatus::ready(path),
                BridgeStatus::idle(),
            ]
        );
    }

    #[tokio::test]
    async fn late_subscriber_gets_current_first() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let path = m.start().await.unwrap();
        let mut statuses = m.subscribe();
        assert_eq!(statuses.next().await, Some(BridgeStatus::ready(path)));
        m.stop().await;
        assert_eq!(statuses.next().await, Some(BridgeStatus::idle()));
    }

    #[tokio::test]
    async fn close_now_is_synchronous() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path());
        let path = m.start().await.unwrap();
        m.close_now();
        assert_eq!(m.state(), BridgeState::Idle);
        assert!(!path.exists());
        m.close_now();
        assert_eq!(m.state(), BridgeState::Idle);
    }

    #[test]
    fn config_from_settings() {
        let settings = BridgeSettings {
            socket_dir: Some("/run/clive".into()),
            socket_prefix: "p".into(),
            shutdown_grace_ms: 10,
            ..BridgeSettings::default()
        };
        let c = BridgeConfig::from_settings(&settings);
        assert_eq!(c.socket_dir, PathBuf::from("/run/clive"));
        assert_eq!(c.shutdown_grace, Duration::from_millis(10));
        let path = c.allocate_path();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("p-{}-", std::process::id())));
        assert!(name.ends_with(".sock"));
    }
}
