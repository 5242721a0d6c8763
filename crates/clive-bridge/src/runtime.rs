//! Bridge runtime adapter: one manager, one cancellation scope, and a
//! disposed flag that turns every later call into [`BridgeError::Disposed`].

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::BridgeError;
use crate::manager::{BridgeConfig, BridgeManager};
use crate::registry::HandlerRegistry;
use crate::status::{BridgeStatus, StatusStream};

/// Lifecycle facade handed to request contexts as `Arc<BridgeRuntime>`.
#[derive(Debug)]
pub struct BridgeRuntime {
    manager: BridgeManager,
    scope: CancellationToken,
    disposed: AtomicBool,
}

impl BridgeRuntime {
    /// Wrap a new idle manager.
    pub fn new(config: BridgeConfig) -> Self {
        Self::from_manager(BridgeManager::new(config))
    }

    /// Wrap an existing manager.
    pub fn from_manager(manager: BridgeManager) -> Self {
        Self {
            manager,
            scope: CancellationToken::new(),
            disposed: AtomicBool::new(false),
        }
    }

    fn live(&self) -> Result<&BridgeManager, BridgeError> {
        if self.disposed.load(Ordering::Acquire) {
            Err(BridgeError::Disposed)
        } else {
            Ok(&self.manager)
        }
    }

    /// Start the bridge; returns the socket path.
    pub async fn start(&self) -> Result<PathBuf, BridgeError> {
        self.live()?.start().await
    }

    /// Stop the bridge. Idempotent.
    pub async fn stop(&self) -> Result<(), BridgeError> {
        self.live()?.stop().await;
        Ok(())
    }

    /// Stop then start on a fresh socket path.
    pub async fn restart(&self) -> Result<PathBuf, BridgeError> {
        self.live()?.restart().await
    }

    /// Current status snapshot.
    pub fn status(&self) -> Result<BridgeStatus, BridgeError> {
        Ok(self.live()?.status())
    }

    /// Whether the listener is accepting connections.
    pub fn is_running(&self) -> Result<bool, BridgeError> {
        Ok(self.live()?.status().bridge_ready)
    }

    /// Socket path of the running instance.
    pub fn socket_path(&self) -> Result<Option<PathBuf>, BridgeError> {
        Ok(self.live()?.socket_path())
    }

    /// Install a new handler registry.
    pub fn set_handlers(&self, registry: HandlerRegistry) -> Result<(), BridgeError> {
        self.live()?.set_handlers(registry);
        Ok(())
    }

    /// Raw status stream: current snapshot first, then each transition.
    /// Ends when the runtime is disposed. The stream does not borrow `self`.
    pub fn subscribe(
        &self,
    ) -> Result<impl futures::Stream<Item = BridgeStatus> + Send + use<>, BridgeError> {
        let stream: StatusStream = self.live()?.subscribe();
        Ok(stream.take_until(self.scope.clone().cancelled_owned()))
    }

    /// Invoke `callback` with the current snapshot and then every change,
    /// on a task tied to this runtime's scope.
    ///
    /// Delivery stops when the returned listener is dropped or
    /// unsubscribed, or when the runtime is disposed.
    pub fn on_status_change<F>(&self, callback: F) -> Result<StatusListener, BridgeError>
    where
        F: Fn(BridgeStatus) + Send + 'static,
    {
        let mut stream = self.live()?.subscribe();
        let token = self.scope.child_token();
        let listener_token = token.clone();
        drop(tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    next = stream.next() => match next {
                        Some(status) => callback(status),
                        None => break,
                    },
                }
            }
            debug!("status listener finished");
        }));
        Ok(StatusListener {
            token: listener_token,
        })
    }

    /// Stop the manager, end every listener, and mark the runtime disposed.
    /// Later calls return [`BridgeError::Disposed`].
    pub async fn dispose(&self) -> Result<(), BridgeError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::Disposed);
        }
        self.manager.stop().await;
        self.scope.cancel();
        info!("bridge runtime disposed");
        Ok(())
    }

    /// Synchronous [`dispose`](Self::dispose): closes the endpoint without
    /// waiting for connection tasks to drain.
    pub fn dispose_now(&self) -> Result<(), BridgeError> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::Disposed);
        }
        self.manager.close_now();
        self.scope.cancel();
        info!("bridge runtime disposed");
        Ok(())
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl Drop for BridgeRuntime {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

/// Unsubscribe handle returned by [`BridgeRuntime::on_status_change`].
#[derive(Debug)]
pub struct StatusListener {
    token: CancellationToken,
}

impl StatusListener {
    /// Stop delivery.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Whether callbacks may still be delivered.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for StatusListener {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Shared handle type passed through request contexts.
pub type SharedBridgeRuntime = Arc<BridgeRuntime>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn runtime(dir: &std::path::Path) -> BridgeRuntime {
        BridgeRuntime::new(BridgeConfig {
            shutdown_grace: Duration::from_millis(500),
            ..BridgeConfig::new(dir)
        })
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<BridgeStatus>) -> BridgeStatus {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn callbacks_follow_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _listener = rt
            .on_status_change(move |s| {
                let _ = tx.send(s);
            })
            .unwrap();

        assert_eq!(recv(&mut rx).await, BridgeStatus::idle());
        let path = rt.start().await.unwrap();
        assert_eq!(recv(&mut rx).await, BridgeStatus::starting(path.clone()));
        assert_eq!(recv(&mut rx).await, BridgeStatus::ready(path));
        assert!(rt.is_running().unwrap());
        rt.stop().await.unwrap();
        assert_eq!(recv(&mut rx).await, BridgeStatus::idle());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = rt
            .on_status_change(move |s| {
                let _ = tx.send(s);
            })
            .unwrap();
        assert_eq!(recv(&mut rx).await, BridgeStatus::idle());
        assert!(listener.is_active());
        listener.unsubscribe();

        let _ = rt.start().await.unwrap();
        // The task exits and drops the sender.
        let rest = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(rest, None);
        rt.stop().await.unwrap();
    }

    #[tokio::test]
    async fn disposed_runtime_rejects_everything() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let path = rt.start().await.unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = rt
            .on_status_change(move |s| {
                let _ = tx.send(s);
            })
            .unwrap();
        let _ = recv(&mut rx).await;

        rt.dispose().await.unwrap();
        assert!(rt.is_disposed());
        assert!(!path.exists());
        assert!(!listener.is_active());

        assert_matches!(rt.start().await, Err(BridgeError::Disposed));
        assert_matches!(rt.stop().await, Err(BridgeError::Disposed));
        assert_matches!(rt.restart().await, Err(BridgeError::Disposed));
        assert_matches!(rt.status(), Err(BridgeError::Disposed));
        assert_matches!(rt.is_running(), Err(BridgeError::Disposed));
        assert_matches!(rt.socket_path(), Err(BridgeError::Disposed));
        assert_matches!(rt.set_handlers(HandlerRegistry::new()), Err(BridgeError::Disposed));
        assert_matches!(rt.on_status_change(|_| {}), Err(BridgeError::Disposed));
        assert_matches!(rt.dispose().await, Err(BridgeError::Disposed));
        assert_matches!(rt.dispose_now(), Err(BridgeError::Disposed));
    }

    #[tokio::test]
    async fn dispose_now_is_synchronous() {
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let path = rt.start().await.unwrap();
        rt.dispose_now().unwrap();
        assert!(!path.exists());
        assert!(rt.is_disposed());
    }

    #[tokio::test]
    async fn subscribe_ends_on_dispose() {
        use futures::StreamExt;
        let dir = tempfile::tempdir().unwrap();
        let rt = runtime(dir.path());
        let path = rt.start().await.unwrap();
        let mut stream = Box::pin(rt.subscribe().unwrap());
        assert_eq!(stream.next().await, Some(BridgeStatus::ready(path)));

        rt.dispose_now().unwrap();
        // The scope is cancelled after the `Idle` transition is published,
        // and cancellation wins over buffered items.
        let rest: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect())
            .await
            .unwrap();
        assert_eq!(rest, Vec::<BridgeStatus>::new());
    }

    #[tokio::test]
    async fn subscribe_outlives_the_runtime_handle() {
        use futures::{Stream, StreamExt};

        fn detached(rt: Arc<BridgeRuntime>) -> impl Stream<Item = BridgeStatus> + Send + 'static {
            rt.subscribe().unwrap()
        }

        let dir = tempfile::tempdir().unwrap();
        let rt = Arc::new(runtime(dir.path()));
        let mut stream = Box::pin(detached(Arc::clone(&rt)));
        assert_eq!(stream.next().await, Some(BridgeStatus::idle()));
        let path = rt.start().await.unwrap();
        assert_eq!(stream.next().await, Some(BridgeStatus::starting(path.clone())));
        assert_eq!(stream.next().await, Some(BridgeStatus::ready(path)));
        rt.dispose().await.unwrap();
    }
}
