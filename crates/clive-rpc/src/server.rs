//! Server loop: consumes [`RpcMessage`]s, runs procedures, produces
//! [`RpcReply`]s.

use std::collections::HashMap;
use std::sync::Arc;

use clive_core::codec::JsonLinesCodec;
use clive_core::constants::DEFAULT_MAX_FRAME_BYTES;
use futures::{SinkExt, Stream, StreamExt};
use metrics::gauge;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::errors::RpcError;
use crate::message::{RpcMessage, RpcReply};
use crate::procedure::ProcedureKind;
use crate::router::Router;

/// Ids with a running call or subscription. Removing an id under this lock
/// is what stops further frames for it.
type Live = Arc<Mutex<HashMap<String, CancellationToken>>>;

type ContextFn<C> = dyn Fn() -> C + Send + Sync;

/// Dispatches RPC messages to a [`Router`], building a fresh context for
/// every call.
pub struct RpcServer<C> {
    router: Arc<Router<C>>,
    context: Arc<ContextFn<C>>,
    max_frame_bytes: usize,
}

impl<C> Clone for RpcServer<C> {
    fn clone(&self) -> Self {
        Self {
            router: Arc::clone(&self.router),
            context: Arc::clone(&self.context),
            max_frame_bytes: self.max_frame_bytes,
        }
    }
}

impl<C> std::fmt::Debug for RpcServer<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("router", &self.router)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .finish_non_exhaustive()
    }
}

impl<C: Send + 'static> RpcServer<C> {
    /// Serve `router`; `context` runs once per call.
    pub fn new(router: Arc<Router<C>>, context: impl Fn() -> C + Send + Sync + 'static) -> Self {
        Self {
            router,
            context: Arc::new(context),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Frame limit for [`serve_io`](Self::serve_io).
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    /// The router being served.
    pub fn router(&self) -> &Arc<Router<C>> {
        &self.router
    }

    /// Run until `inbound` ends or `shutdown` fires. Live subscriptions are
    /// cancelled on the way out.
    pub async fn serve<S>(
        &self,
        inbound: S,
        outbound: mpsc::UnboundedSender<RpcReply>,
        shutdown: CancellationToken,
    ) where
        S: Stream<Item = RpcMessage> + Send,
    {
        let mut inbound = std::pin::pin!(inbound);
        let live: Live = Arc::new(Mutex::new(HashMap::new()));
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                message = inbound.next() => match message {
                    None => {
                        debug!("rpc inbound closed");
                        break;
                    }
                    Some(RpcMessage::Request { id, path, kind, input }) => {
                        self.start(Call { id, path, kind, input }, &live, &outbound, &shutdown, &mut tasks);
                    }
                    Some(RpcMessage::Cancel { id }) => {
                        if let Some(token) = live.lock().remove(&id) {
                            token.cancel();
                            debug!(id, "rpc call cancelled");
                        }
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
            }
        }

        let remaining: Vec<CancellationToken> = live.lock().drain().map(|(_, t)| t).collect();
        for token in remaining {
            token.cancel();
        }
        while let Some(joined) = tasks.join_next().await {
            log_join(joined);
        }
    }

    fn start(
        &self,
        call: Call,
        live: &Live,
        outbound: &mpsc::UnboundedSender<RpcReply>,
        shutdown: &CancellationToken,
        tasks: &mut JoinSet<()>,
    ) {
        let Call {
            id,
            path,
            kind,
            input,
        } = call;
        let token = shutdown.child_token();
        {
            let mut map = live.lock();
            if map.contains_key(&id) {
                warn!(id, path, "duplicate live rpc id");
                let err = RpcError::Transport {
                    message: "duplicate request id".into(),
                };
                let _ = outbound.send(RpcReply::error(id, &err));
                return;
            }
            let _ = map.insert(id.clone(), token.clone());
        }

        let ctx = (self.context)();
        let router = Arc::clone(&self.router);
        let live = Arc::clone(live);
        let tx = outbound.clone();
        let span = info_span!("rpc_call", id = %id, path = %path, kind = %kind);

        let _ = match kind {
            ProcedureKind::Query | ProcedureKind::Mutation => tasks.spawn(
                async move {
                    let result = tokio::select! {
                        biased;
                        () = token.cancelled() => return,
                        result = router.call(&path, kind, input, ctx) => result,
                    };
                    let reply = match result {
                        Ok(data) => RpcReply::Result {
                            id: id.clone(),
                            data,
                        },
                        Err(e) => RpcReply::error(id.clone(), &e),
                    };
                    let _ = finish(&live, &id, reply, &tx);
                }
                .instrument(span),
            ),
            ProcedureKind::Subscription => tasks.spawn(
                async move {
                    gauge!("rpc_subscriptions_active").increment(1.0);
                    forward(&router, &path, input, ctx, &id, &token, &live, &tx).await;
                    gauge!("rpc_subscriptions_active").decrement(1.0);
                }
                .instrument(span),
            ),
        };
    }

    /// Serve newline-delimited JSON on a reader/writer pair (e.g. stdin and
    /// stdout).
    pub async fn serve_io<R, W>(&self, reader: R, writer: W, shutdown: CancellationToken)
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_loop(
            FramedWrite::new(
                writer,
                JsonLinesCodec::<RpcMessage, RpcReply>::new(self.max_frame_bytes),
            ),
            rx,
        ));

        let rejects = tx.clone();
        let inbound = FramedRead::new(
            reader,
            JsonLinesCodec::<RpcMessage, RpcReply>::new(self.max_frame_bytes),
        )
        .filter_map(move |frame| {
            let message = match frame {
                Ok(Ok(message)) => Some(message),
                Ok(Err(malformed)) => {
                    warn!(id = ?malformed.id, error = %malformed.message, "malformed rpc message");
                    let err = RpcError::Transport {
                        message: format!("malformed message: {}", malformed.message),
                    };
                    let _ = rejects.send(RpcReply::error(malformed.id.unwrap_or_default(), &err));
                    None
                }
                Err(e) => {
                    warn!(error = %e, "rpc framing error");
                    None
                }
            };
            futures::future::ready(message)
        });

        self.serve(inbound, tx, shutdown).await;
        if let Err(e) = writer_task.await {
            warn!(error = %e, "rpc writer task failed");
        }
    }

    /// Serve newline-delimited JSON on one bidirectional byte stream.
    pub async fn serve_stream<S>(&self, io: S, shutdown: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        self.serve_io(reader, writer, shutdown).await;
    }
}

struct Call {
    id: String,
    path: String,
    kind: ProcedureKind,
    input: Value,
}

/// Send a terminal reply if `id` is still live.
fn finish(live: &Live, id: &str, reply: RpcReply, tx: &mpsc::UnboundedSender<RpcReply>) -> bool {
    let mut map = live.lock();
    if map.remove(id).is_none() {
        return false;
    }
    tx.send(reply).is_ok()
}

/// Send a non-terminal reply if `id` is still live.
fn emit(live: &Live, id: &str, reply: RpcReply, tx: &mpsc::UnboundedSender<RpcReply>) -> bool {
    let map = live.lock();
    map.contains_key(id) && tx.send(reply).is_ok()
}

async fn forward<C: Send + 'static>(
    router: &Router<C>,
    path: &str,
    input: Value,
    ctx: C,
    id: &str,
    token: &CancellationToken,
    live: &Live,
    tx: &mpsc::UnboundedSender<RpcReply>,
) {
    let opened = tokio::select! {
        biased;
        () = token.cancelled() => return,
        opened = router.subscribe(path, input, ctx) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            let _ = finish(live, id, RpcReply::error(id, &e), tx);
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            () = token.cancelled() => break,
            item = stream.next() => match item {
                Some(Ok(data)) => {
                    if !emit(live, id, RpcReply::Next { id: id.to_owned(), data }, tx) {
                        break;
                    }
                }
                Some(Err(e)) => {
                    let _ = finish(live, id, RpcReply::error(id, &e), tx);
                    break;
                }
                None => {
                    let _ = finish(live, id, RpcReply::Complete { id: id.to_owned() }, tx);
                    break;
                }
            },
        }
    }
    // Dropping the stream releases whatever the resolver holds.
    drop(stream);
    debug!("subscription finished");
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "rpc task panicked");
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, JsonLinesCodec<RpcMessage, RpcReply>>,
    mut rx: mpsc::UnboundedReceiver<RpcReply>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(reply) = rx.recv().await {
        if let Err(e) = sink.send(reply).await {
            warn!(error = %e, "rpc write failed");
            break;
        }
    }
}
