//! Bridge lifecycle status and status subscriptions.

use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Lifecycle state of a bridge manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeState {
    /// No endpoint.
    Idle,
    /// Endpoint allocated, listener being bound.
    Starting,
    /// Listening and accepting connections.
    Ready,
    /// Shutting down.
    Stopping,
    /// Last start failed or the listener died.
    Error,
}

impl BridgeState {
    /// Lowercase name for messages and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable lifecycle snapshot pushed to subscribers.
///
/// `bridge_ready` and `starting` are never both true; the constructors are
/// the only way the manager builds one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    /// Listener is accepting connections.
    pub bridge_ready: bool,
    /// Start is in progress.
    pub starting: bool,
    /// Human-readable cause of the last failure.
    pub error: Option<String>,
    /// Endpoint path for the current instance.
    pub socket_path: Option<PathBuf>,
}

impl BridgeStatus {
    /// Snapshot for [`BridgeState::Idle`].
    pub fn idle() -> Self {
        Self::default()
    }

    /// Snapshot for [`BridgeState::Starting`].
    pub fn starting(socket_path: PathBuf) -> Self {
        Self {
            starting: true,
            socket_path: Some(socket_path),
            ..Self::default()
        }
    }

    /// Snapshot for [`BridgeState::Ready`].
    pub fn ready(socket_path: PathBuf) -> Self {
        Self {
            bridge_ready: true,
            socket_path: Some(socket_path),
            ..Self::default()
        }
    }

    /// Snapshot for [`BridgeState::Error`].
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// State this snapshot represents. `Stopping` is never published on its
    /// own; observers see it as the following `Idle`.
    pub fn state(&self) -> BridgeState {
        if self.bridge_ready {
            BridgeState::Ready
        } else if self.starting {
            BridgeState::Starting
        } else if self.error.is_some() {
            BridgeState::Error
        } else {
            BridgeState::Idle
        }
    }
}

/// Stream of status snapshots: the current one first, then every published
/// transition in order.
///
/// A subscriber that falls more than the broadcast buffer behind skips to
/// the latest snapshot and logs a warning. Dropping the stream only
/// unsubscribes this subscriber.
pub struct StatusStream {
    initial: Option<BridgeStatus>,
    inner: BroadcastStream<BridgeStatus>,
    latest: watch::Receiver<BridgeStatus>,
}

impl StatusStream {
    pub(crate) fn new(
        initial: BridgeStatus,
        rx: broadcast::Receiver<BridgeStatus>,
        latest: watch::Receiver<BridgeStatus>,
    ) -> Self {
        Self {
            initial: Some(initial),
            inner: BroadcastStream::new(rx),
            latest,
        }
    }
}

impl Stream for StatusStream {
    type Item = BridgeStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.initial.take() {
            return Poll::Ready(Some(first));
        }
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(status))) => Poll::Ready(Some(status)),
            Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                tracing::warn!(skipped, "status subscriber lagged, resyncing to latest");
                Poll::Ready(Some(self.latest.borrow().clone()))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for StatusStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusStream")
            .field("pending_initial", &self.initial.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn payload_shape_keeps_nulls() {
        insta::assert_json_snapshot!(BridgeStatus::idle(), @r###"
        {
          "bridgeReady": false,
          "starting": false,
          "error": null,
          "socketPath": null
        }
        "###);
    }

    #[test]
    fn ready_and_starting_are_exclusive() {
        let path = PathBuf::from("/tmp/a.sock");
        for s in [
            BridgeStatus::idle(),
            BridgeStatus::starting(path.clone()),
            BridgeStatus::ready(path),
            BridgeStatus::failed("x"),
        ] {
            assert!(!(s.bridge_ready && s.starting));
        }
    }

    #[test]
    fn state_is_derived_from_flags() {
        let path = PathBuf::from("/tmp/a.sock");
        assert_eq!(BridgeStatus::idle().state(), BridgeState::Idle);
        assert_eq!(BridgeStatus::starting(path.clone()).state(), BridgeState::Starting);
        assert_eq!(BridgeStatus::ready(path).state(), BridgeState::Ready);
        assert_eq!(BridgeStatus::failed("bind").state(), BridgeState::Error);
    }

    #[tokio::test]
    async fn stream_yields_initial_then_published() {
        let (tx, rx) = broadcast::channel(4);
        let (_wtx, wrx) = watch::channel(BridgeStatus::idle());
        let mut stream = StatusStream::new(BridgeStatus::idle(), rx, wrx);
        let _ = tx.send(BridgeStatus::failed("x")).unwrap();
        assert_eq!(stream.next().await, Some(BridgeStatus::idle()));
        assert_eq!(stream.next().await, Some(BridgeStatus::failed("x")));
        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn lagged_subscriber_resyncs_to_latest() {
        let (tx, rx) = broadcast::channel(1);
        let (wtx, wrx) = watch::channel(BridgeStatus::idle());
        let mut stream = StatusStream::new(BridgeStatus::idle(), rx, wrx);
        for i in 0..3 {
            let s = BridgeStatus::failed(format!("e{i}"));
            let _ = tx.send(s.clone()).unwrap();
            let _ = wtx.send_replace(s);
        }
        assert_eq!(stream.next().await, Some(BridgeStatus::idle()));
        assert_eq!(stream.next().await, Some(BridgeStatus::failed("e2")));
    }
}
