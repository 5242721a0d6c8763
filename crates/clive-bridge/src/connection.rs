//! Per-connection dispatch: one reader loop, one writer task, one task per
//! request.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use clive_core::codec::{JsonLinesCodec, MalformedFrame};
use futures::{FutureExt, SinkExt, StreamExt};
use metrics::{counter, gauge};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};

use crate::errors::HandlerError;
use crate::protocol::{BridgeRequest, BridgeResponse, DUPLICATE_REQUEST_ID};
use crate::registry::HandlerRegistry;

type Codec = JsonLinesCodec<BridgeRequest, BridgeResponse>;

/// Ids dispatched on this connection and not yet answered. Whoever removes
/// an id owns the right to send its single response.
type InFlight = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Serve one accepted connection until the peer disconnects or `cancel`
/// fires. On cancel, every unanswered request gets a `bridge closed` error.
pub(crate) async fn serve<R, W>(
    reader: R,
    writer: W,
    handlers: Arc<RwLock<Arc<HandlerRegistry>>>,
    max_frame_bytes: usize,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    gauge!("bridge_connections_active").increment(1.0);

    let mut frames = FramedRead::new(reader, Codec::new(max_frame_bytes));
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_loop(
        FramedWrite::new(writer, Codec::new(max_frame_bytes)),
        rx,
    ));

    let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            frame = frames.next() => match frame {
                None => {
                    debug!("bridge peer disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "bridge read failed, closing connection");
                    break;
                }
                Some(Ok(Err(malformed))) => reject_malformed(&tx, malformed),
                Some(Ok(Ok(request))) => {
                    let registry = Arc::clone(&*handlers.read());
                    dispatch(request, registry, &in_flight, &tx, &cancel, &mut tasks);
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
        }
    }

    // Peer gone but calls still running: let them finish unless shut down.
    while !tasks.is_empty() && !cancel.is_cancelled() {
        tokio::select! {
            () = cancel.cancelled() => {}
            Some(joined) = tasks.join_next() => log_join(joined),
        }
    }

    if cancel.is_cancelled() {
        let pending: Vec<(String, CancellationToken)> = in_flight.lock().drain().collect();
        for (id, token) in pending {
            token.cancel();
            counter!("bridge_request_errors_total", "code" => "BRIDGE_CLOSED").increment(1);
            let _ = tx.send(BridgeResponse::closed(id));
        }
    }
    tasks.abort_all();

    drop(tx);
    if let Err(e) = writer_task.await {
        warn!(error = %e, "bridge writer task failed");
    }
    gauge!("bridge_connections_active").decrement(1.0);
}

fn dispatch(
    request: BridgeRequest,
    registry: Arc<HandlerRegistry>,
    in_flight: &InFlight,
    tx: &mpsc::UnboundedSender<BridgeResponse>,
    cancel: &CancellationToken,
    tasks: &mut JoinSet<()>,
) {
    let BridgeRequest { id, method, params } = request;
    counter!("bridge_requests_total", "method" => method.clone()).increment(1);

    let token = cancel.child_token();
    {
        let mut map = in_flight.lock();
        if map.contains_key(&id) {
            warn!(id, method, "duplicate in-flight request id");
            counter!("bridge_request_errors_total", "code" => "DUPLICATE_ID").increment(1);
            let _ = tx.send(BridgeResponse::error(id, DUPLICATE_REQUEST_ID));
            return;
        }
        let _ = map.insert(id.clone(), token.clone());
    }

    let span = info_span!("bridge_request", method = %method, id = %id);
    let in_flight = Arc::clone(in_flight);
    let tx = tx.clone();
    let _ = tasks.spawn(
        async move {
            let result = tokio::select! {
                () = token.cancelled() => return,
                result = run_handler(&registry, &method, params) => result,
            };
            if in_flight.lock().remove(&id).is_none() {
                return;
            }
            let response = match result {
                Ok(value) => BridgeResponse::ok(id, value),
                Err(e) => {
                    counter!("bridge_request_errors_total", "code" => e.code()).increment(1);
                    debug!(error = %e, "bridge handler failed");
                    BridgeResponse::error(id, e.to_string())
                }
            };
            let _ = tx.send(response);
        }
        .instrument(span),
    );
}

/// Run the handler, converting a panic into [`HandlerError::Internal`].
async fn run_handler(
    registry: &HandlerRegistry,
    method: &str,
    params: serde_json::Value,
) -> Result<serde_json::Value, HandlerError> {
    match AssertUnwindSafe(registry.dispatch(method, params))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(method, panic = %message, "bridge handler panicked");
            Err(HandlerError::Internal {
                message: format!("handler panicked: {message}"),
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn reject_malformed(tx: &mpsc::UnboundedSender<BridgeResponse>, frame: MalformedFrame) {
    warn!(id = ?frame.id, error = %frame.message, "malformed bridge request");
    counter!("bridge_request_errors_total", "code" => "MALFORMED").increment(1);
    let id = frame.id.unwrap_or_default();
    let _ = tx.send(BridgeResponse::error(id, format!("malformed request: {}", frame.message)));
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            tracing::error!(error = %e, "bridge request task panicked");
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, Codec>,
    mut rx: mpsc::UnboundedReceiver<BridgeResponse>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(response) = rx.recv().await {
        if let Err(e) = sink.send(response).await {
            warn!(error = %e, "bridge write failed");
            break;
        }
    }
}
