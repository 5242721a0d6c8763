//! Client-side transports.
//!
//! [`ChannelTransport`] is the correlation core: it numbers outgoing
//! requests, routes replies back by id, and fails everything pending when
//! the link closes. It runs over any pair of message channels, so the same
//! code serves the in-process (webview) link and the newline-delimited JSON
//! stdio link to a spawned host.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use clive_core::codec::{Frame, JsonLinesCodec};
use clive_core::constants::DEFAULT_MAX_FRAME_BYTES;
use clive_core::ids::CorrelationId;
use futures::{SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::RpcError;
use crate::message::{RpcMessage, RpcReply};
use crate::procedure::ProcedureKind;
use crate::server::RpcServer;

/// Sends requests and opens subscriptions against a host router.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run a query or mutation.
    async fn request(&self, path: &str, kind: ProcedureKind, input: Value) -> Result<Value, RpcError>;

    /// Open a subscription. Routing and input errors arrive as the first
    /// stream item.
    async fn subscribe(&self, path: &str, input: Value) -> Result<RpcSubscription, RpcError>;
}

// ── Subscriptions ───────────────────────────────────────────────────

/// One event delivered to a subscription.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// An item.
    Next(Value),
    /// Normal end.
    Complete,
    /// Terminal error.
    Error(RpcError),
}

/// How a subscription ended.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriptionEnd {
    /// The source finished.
    Completed,
    /// This side cancelled.
    Cancelled,
    /// The source failed, or the link closed ([`RpcError::Closed`]).
    Failed(RpcError),
}

/// Live subscription: a stream of items plus cancellation.
///
/// Dropping it cancels on the host.
pub struct RpcSubscription {
    id: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
    end: Option<SubscriptionEnd>,
}

impl RpcSubscription {
    /// Build a subscription from an event channel. `on_cancel` runs at most
    /// once, when this side gives up before the source ends.
    pub fn new(
        id: impl Into<String>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            events,
            on_cancel: Some(Box::new(on_cancel)),
            end: None,
        }
    }

    /// Correlation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop the subscription. No further items are yielded.
    pub fn cancel(&mut self) {
        if self.end.is_none() {
            self.end = Some(SubscriptionEnd::Cancelled);
            if let Some(cancel) = self.on_cancel.take() {
                cancel();
            }
            self.events.close();
        }
    }

    /// How the subscription ended, once it has.
    pub fn end_reason(&self) -> Option<&SubscriptionEnd> {
        self.end.as_ref()
    }

    /// Drain remaining items and return how the subscription ended.
    pub async fn finish(mut self) -> SubscriptionEnd {
        while self.next().await.is_some() {}
        self.end.clone().unwrap_or(SubscriptionEnd::Failed(RpcError::Closed))
    }

    fn ended(&mut self, end: SubscriptionEnd) {
        self.end = Some(end);
        // The source ended on its own; nothing to cancel.
        drop(self.on_cancel.take());
    }
}

impl Stream for RpcSubscription {
    type Item = Result<Value, RpcError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.end.is_some() {
            return Poll::Ready(None);
        }
        match self.events.poll_recv(cx) {
            Poll::Ready(Some(SubscriptionEvent::Next(value))) => Poll::Ready(Some(Ok(value))),
            Poll::Ready(Some(SubscriptionEvent::Complete)) => {
                self.ended(SubscriptionEnd::Completed);
                Poll::Ready(None)
            }
            Poll::Ready(Some(SubscriptionEvent::Error(e))) => {
                self.ended(SubscriptionEnd::Failed(e.clone()));
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.ended(SubscriptionEnd::Failed(RpcError::Closed));
                Poll::Ready(Some(Err(RpcError::Closed)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for RpcSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for RpcSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcSubscription")
            .field("id", &self.id)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}

// ── Channel transport ───────────────────────────────────────────────

enum Waiter {
    Call(oneshot::Sender<Result<Value, RpcError>>),
    Stream(mpsc::UnboundedSender<SubscriptionEvent>),
}

/// Correlation state shared with the reader task. The map is `None` once
/// the link has closed.
struct Link {
    outbound: mpsc::UnboundedSender<RpcMessage>,
    pending: Mutex<Option<HashMap<String, Waiter>>>,
}

impl Link {
    fn register(&self, id: &str, waiter: Waiter) -> Result<(), RpcError> {
        let mut guard = self.pending.lock();
        let map = guard.as_mut().ok_or(RpcError::Closed)?;
        let _ = map.insert(id.to_owned(), waiter);
        Ok(())
    }

    fn forget(&self, id: &str) -> Option<Waiter> {
        self.pending.lock().as_mut().and_then(|map| map.remove(id))
    }

    fn send(&self, message: RpcMessage) -> Result<(), RpcError> {
        self.outbound.send(message).map_err(|_| RpcError::Closed)
    }

    fn route(&self, reply: RpcReply) {
        match reply {
            RpcReply::Result { id, data } => match self.forget(&id) {
                Some(Waiter::Call(tx)) => {
                    let _ = tx.send(Ok(data));
                }
                Some(Waiter::Stream(_)) => warn!(id, "result frame for a subscription"),
                None => debug!(id, "result for unknown id dropped"),
            },
            RpcReply::Next { id, data } => {
                let guard = self.pending.lock();
                match guard.as_ref().and_then(|map| map.get(&id)) {
                    Some(Waiter::Stream(tx)) => {
                        let _ = tx.send(SubscriptionEvent::Next(data));
                    }
                    Some(Waiter::Call(_)) => warn!(id, "next frame for a call"),
                    None => debug!(id, "item for unknown id dropped"),
                }
            }
            RpcReply::Complete { id } => match self.forget(&id) {
                Some(Waiter::Stream(tx)) => {
                    let _ = tx.send(SubscriptionEvent::Complete);
                }
                Some(Waiter::Call(tx)) => {
                    let _ = tx.send(Err(RpcError::Internal {
                        message: "call completed without a result".into(),
                    }));
                }
                None => debug!(id, "completion for unknown id dropped"),
            },
            RpcReply::Error { id, error } => {
                self.fail(&id, RpcError::from_error_body(error));
            }
        }
    }

    fn fail(&self, id: &str, error: RpcError) {
        match self.forget(id) {
            Some(Waiter::Call(tx)) => {
                let _ = tx.send(Err(error));
            }
            Some(Waiter::Stream(tx)) => {
                let _ = tx.send(SubscriptionEvent::Error(error));
            }
            None => debug!(id, error = %error, "error for unknown id dropped"),
        }
    }

    /// Drop every waiter: calls see `Closed`, subscriptions end with
    /// `Failed(Closed)`.
    fn close(&self) {
        if let Some(map) = self.pending.lock().take() {
            debug!(pending = map.len(), "rpc link closed");
        }
    }
}

/// [`Transport`] over message channels.
pub struct ChannelTransport {
    link: Arc<Link>,
    reader: JoinHandle<()>,
    writer: Option<JoinHandle<()>>,
    server: Option<CancellationToken>,
    child: Option<Mutex<Child>>,
}

impl ChannelTransport {
    /// Correlate over `outbound` and a stream of replies.
    pub fn new<S>(outbound: mpsc::UnboundedSender<RpcMessage>, inbound: S) -> Self
    where
        S: Stream<Item = RpcReply> + Send + 'static,
    {
        Self::from_frames(outbound, inbound.map(Ok))
    }

    fn from_frames<S>(outbound: mpsc::UnboundedSender<RpcMessage>, frames: S) -> Self
    where
        S: Stream<Item = Frame<RpcReply>> + Send + 'static,
    {
        let link = Arc::new(Link {
            outbound,
            pending: Mutex::new(Some(HashMap::new())),
        });
        let reader = tokio::spawn(read_loop(frames, Arc::clone(&link)));
        Self {
            link,
            reader,
            writer: None,
            server: None,
            child: None,
        }
    }

    /// Link directly to a server in this process. The server loop stops
    /// when the transport is dropped.
    pub fn in_process<C: Send + 'static>(server: RpcServer<C>) -> Self {
        let (to_server, inbound) = mpsc::unbounded_channel();
        let (replies, from_server) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        drop(tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                server
                    .serve(UnboundedReceiverStream::new(inbound), replies, shutdown)
                    .await;
            }
        }));
        let mut transport = Self::new(to_server, UnboundedReceiverStream::new(from_server));
        transport.server = Some(shutdown);
        transport
    }

    /// Newline-delimited JSON over one bidirectional byte stream.
    pub fn from_stream<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        Self::from_io(reader, writer, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Newline-delimited JSON over a reader/writer pair.
    pub fn from_io<R, W>(reader: R, writer: W, max_frame_bytes: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_loop(
            FramedWrite::new(writer, JsonLinesCodec::<RpcReply, RpcMessage>::new(max_frame_bytes)),
            rx,
        ));
        let frames = FramedRead::new(reader, JsonLinesCodec::<RpcReply, RpcMessage>::new(max_frame_bytes))
            .take_while(|frame| {
                if let Err(e) = frame {
                    warn!(error = %e, "rpc framing error, closing link");
                }
                futures::future::ready(frame.is_ok())
            })
            .filter_map(|frame| futures::future::ready(frame.ok()));
        let mut transport = Self::from_frames(outbound, frames);
        transport.writer = Some(writer);
        transport
    }

    /// Spawn `command` with piped stdio and speak newline-delimited JSON to
    /// it. The child is killed when the transport is dropped.
    pub fn spawn_process(mut command: Command) -> Result<Self, RpcError> {
        let mut child = command
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RpcError::Transport {
                message: format!("failed to spawn host: {e}"),
            })?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RpcError::Transport {
                message: "host stdio was not piped".into(),
            });
        };
        let mut transport = Self::from_io(stdout, stdin, DEFAULT_MAX_FRAME_BYTES);
        transport.child = Some(Mutex::new(child));
        Ok(transport)
    }

    /// Whether the link has closed.
    pub fn is_closed(&self) -> bool {
        self.link.pending.lock().is_none()
    }

    /// Calls and subscriptions awaiting replies.
    pub fn pending(&self) -> usize {
        self.link.pending.lock().as_ref().map_or(0, HashMap::len)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn request(&self, path: &str, kind: ProcedureKind, input: Value) -> Result<Value, RpcError> {
        let id = CorrelationId::new().into_inner();
        let (tx, rx) = oneshot::channel();
        self.link.register(&id, Waiter::Call(tx))?;
        let sent = self.link.send(RpcMessage::Request {
            id: id.clone(),
            path: path.to_owned(),
            kind,
            input,
        });
        if let Err(e) = sent {
            drop(self.link.forget(&id));
            return Err(e);
        }

        // Dropping this future mid-call tells the host to stop.
        let guard = CancelOnDrop {
            link: Arc::clone(&self.link),
            id: Some(id),
        };
        let result = rx.await.unwrap_or(Err(RpcError::Closed));
        guard.disarm();
        result
    }

    async fn subscribe(&self, path: &str, input: Value) -> Result<RpcSubscription, RpcError> {
        let id = CorrelationId::new().into_inner();
        let (tx, rx) = mpsc::unbounded_channel();
        self.link.register(&id, Waiter::Stream(tx))?;
        if let Err(e) = self.link.send(RpcMessage::Request {
            id: id.clone(),
            path: path.to_owned(),
            kind: ProcedureKind::Subscription,
            input,
        }) {
            drop(self.link.forget(&id));
            return Err(e);
        }

        let link = Arc::clone(&self.link);
        let cancel_id = id.clone();
        Ok(RpcSubscription::new(id, rx, move || {
            if link.forget(&cancel_id).is_some() {
                let _ = link.send(RpcMessage::Cancel { id: cancel_id });
            }
        }))
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = &self.writer {
            writer.abort();
        }
        if let Some(server) = &self.server {
            server.cancel();
        }
        self.link.close();
        if let Some(child) = &self.child {
            let _ = child.lock().start_kill();
        }
    }
}

impl std::fmt::Debug for ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("pending", &self.pending())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

struct CancelOnDrop {
    link: Arc<Link>,
    id: Option<String>,
}

impl CancelOnDrop {
    fn disarm(mut self) {
        self.id = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            if self.link.forget(&id).is_some() {
                let _ = self.link.send(RpcMessage::Cancel { id });
            }
        }
    }
}

async fn read_loop<S>(frames: S, link: Arc<Link>)
where
    S: Stream<Item = Frame<RpcReply>> + Send,
{
    let mut frames = std::pin::pin!(frames);
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(reply) => link.route(reply),
            Err(malformed) => {
                warn!(id = ?malformed.id, error = %malformed.message, "malformed rpc reply");
                if let Some(id) = malformed.id {
                    link.fail(
                        &id,
                        RpcError::Transport {
                            message: format!("malformed reply: {}", malformed.message),
                        },
                    );
                }
            }
        }
    }
    link.close();
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, JsonLinesCodec<RpcReply, RpcMessage>>,
    mut rx: mpsc::UnboundedReceiver<RpcMessage>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        if let Err(e) = sink.send(message).await {
            warn!(error = %e, "rpc client write failed");
            break;
        }
    }
}
