//! Tool-server side of the bridge: issues requests and correlates responses.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use clive_core::codec::{JsonLinesCodec, MalformedFrame};
use clive_core::constants::DEFAULT_MAX_FRAME_BYTES;
use clive_core::ids::CorrelationId;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, instrument, warn};

use crate::errors::BridgeError;
use crate::protocol::{BRIDGE_CLOSED, BridgeRequest, BridgeResponse, Outcome};

type Reply = Result<Outcome, BridgeError>;

/// Waiting callers keyed by request id. `None` once the connection ended,
/// so late callers fail fast instead of waiting forever.
type Pending = Arc<Mutex<Option<HashMap<String, oneshot::Sender<Reply>>>>>;

/// A connection to a bridge endpoint.
///
/// Cheap to share behind an `Arc`; calls may run concurrently and responses
/// are matched by id in any order.
pub struct BridgeClient {
    outbound: mpsc::UnboundedSender<BridgeRequest>,
    pending: Pending,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BridgeClient {
    /// Connect to the socket at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, BridgeError> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        Ok(Self::from_stream(stream))
    }

    /// Run the client over an already connected byte stream.
    pub fn from_stream<S>(io: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::with_max_frame_bytes(io, DEFAULT_MAX_FRAME_BYTES)
    }

    /// Like [`from_stream`](Self::from_stream) with an explicit frame limit.
    pub fn with_max_frame_bytes<S>(io: S, max_frame_bytes: usize) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read, write) = tokio::io::split(io);
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let (outbound, rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(write_loop(
            FramedWrite::new(write, JsonLinesCodec::new(max_frame_bytes)),
            rx,
        ));
        let reader = tokio::spawn(read_loop(
            FramedRead::new(read, JsonLinesCodec::new(max_frame_bytes)),
            Arc::clone(&pending),
        ));

        Self {
            outbound,
            pending,
            reader,
            writer,
        }
    }

    /// Send one request and wait for its response.
    ///
    /// - `result` → `Ok(value)`
    /// - `error: "bridge closed"` or connection loss → [`BridgeError::Closed`].
    ///   The server only sends that text for shutdown; a handler error with
    ///   the same message arrives prefixed (see [`BridgeResponse::error`]).
    /// - any other `error` → [`BridgeError::Remote`]
    ///
    /// Dropping the future forgets the call; a late response is discarded.
    #[instrument(skip(self, params))]
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, BridgeError> {
        let id = CorrelationId::new().into_inner();
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.pending.lock();
            let Some(map) = guard.as_mut() else {
                return Err(BridgeError::Closed);
            };
            let _ = map.insert(id.clone(), tx);
        }
        let _forget = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        if self
            .outbound
            .send(BridgeRequest::new(id.clone(), method, params))
            .is_err()
        {
            return Err(BridgeError::Closed);
        }

        match rx.await {
            Ok(Ok(Outcome::Result(value))) => Ok(value),
            Ok(Ok(Outcome::Error(message))) if message == BRIDGE_CLOSED => Err(BridgeError::Closed),
            Ok(Ok(Outcome::Error(message))) => Err(BridgeError::Remote { message }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(BridgeError::Closed),
        }
    }

    /// Calls sent and not yet answered.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().as_ref().map_or(0, HashMap::len)
    }

    /// Whether the connection has ended.
    pub fn is_closed(&self) -> bool {
        self.pending.lock().is_none()
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeClient")
            .field("pending_calls", &self.pending_calls())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Removes a call's pending entry when the call ends, answered or not.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(map) = self.pending.lock().as_mut() {
            let _ = map.remove(self.id);
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, JsonLinesCodec<BridgeResponse, BridgeRequest>>,
    mut rx: mpsc::UnboundedReceiver<BridgeRequest>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(request) = rx.recv().await {
        if let Err(e) = sink.send(request).await {
            warn!(error = %e, "bridge client write failed");
            break;
        }
    }
}

async fn read_loop<R>(
    mut frames: FramedRead<R, JsonLinesCodec<BridgeResponse, BridgeRequest>>,
    pending: Pending,
) where
    R: AsyncRead + Unpin,
{
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Ok(response)) => deliver(&pending, response.id, Ok(response.outcome)),
            Ok(Err(MalformedFrame { id, message })) => {
                warn!(id = ?id, error = %message, "malformed bridge response");
                if let Some(id) = id {
                    deliver(&pending, id, Err(BridgeError::Protocol { message }));
                }
            }
            Err(e) => {
                warn!(error = %e, "bridge client framing error");
                break;
            }
        }
    }

    // Dropping the senders fails every waiting call with `Closed`.
    let orphaned = pending.lock().take().map_or(0, |map| map.len());
    debug!(orphaned, "bridge client connection ended");
}

fn deliver(pending: &Pending, id: String, reply: Reply) {
    let waiter = pending.lock().as_mut().and_then(|map| map.remove(&id));
    match waiter {
        Some(tx) => {
            // Caller gave up; nothing to deliver to.
            let _ = tx.send(reply);
        }
        None => warn!(id, "response for unknown or already answered request, dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    /// Scripted server half: hands back each decoded request so the test
    /// decides what to answer.
    struct Server {
        lines: tokio::io::Lines<BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>>,
        write: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    }

    impl Server {
        async fn next_request(&mut self) -> BridgeRequest {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn reply(&mut self, raw: Value) {
            let line = format!("{raw}\n");
            self.write.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn pair() -> (Arc<BridgeClient>, Server) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let client = Arc::new(BridgeClient::from_stream(ours));
        let (r, w) = tokio::io::split(theirs);
        (
            client,
            Server {
                lines: BufReader::new(r).lines(),
                write: w,
            },
        )
    }

    #[tokio::test]
    async fn result_resolves_call() {
        let (client, mut server) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("echo", json!({"x": 1})).await }
        });
        let req = server.next_request().await;
        assert_eq!(req.method, "echo");
        assert_eq!(req.params, json!({"x": 1}));
        server.reply(json!({"id": req.id, "result": {"ok": true}})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!({"ok": true}));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn error_maps_to_remote_and_closed() {
        let (client, mut server) = pair();
        let a = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("a", Value::Null).await }
        });
        let ra = server.next_request().await;
        let b = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("b", Value::Null).await }
        });
        let rb = server.next_request().await;

        server.reply(json!({"id": rb.id, "error": BRIDGE_CLOSED})).await;
        server.reply(json!({"id": ra.id, "error": "unknown method: a"})).await;

        assert_matches!(
            a.await.unwrap(),
            Err(BridgeError::Remote { message }) if message == "unknown method: a"
        );
        assert_matches!(b.await.unwrap(), Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn duplicate_and_unknown_responses_are_dropped() {
        let (client, mut server) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("m", Value::Null).await }
        });
        let req = server.next_request().await;
        server.reply(json!({"id": "nobody", "result": 0})).await;
        server.reply(json!({"id": req.id, "result": 1})).await;
        server.reply(json!({"id": req.id, "result": 2})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!(1));

        // The connection is still usable after the stray frames.
        let next = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("m", Value::Null).await }
        });
        let req = server.next_request().await;
        server.reply(json!({"id": req.id, "result": 3})).await;
        assert_eq!(next.await.unwrap().unwrap(), json!(3));
    }

    #[tokio::test]
    async fn dropped_call_forgets_its_pending_entry() {
        let (client, mut server) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("slow", Value::Null).await }
        });
        let req = server.next_request().await;
        assert_eq!(client.pending_calls(), 1);

        call.abort();
        assert!(call.await.unwrap_err().is_cancelled());
        assert_eq!(client.pending_calls(), 0);

        // The late answer is dropped and the connection stays usable.
        server.reply(json!({"id": req.id, "result": 1})).await;
        let next = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("m", Value::Null).await }
        });
        let req = server.next_request().await;
        server.reply(json!({"id": req.id, "result": 2})).await;
        assert_eq!(next.await.unwrap().unwrap(), json!(2));
        assert_eq!(client.pending_calls(), 0);
    }

    #[tokio::test]
    async fn handler_error_with_shutdown_text_stays_remote() {
        let (client, mut server) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("m", Value::Null).await }
        });
        let req = server.next_request().await;
        let reply = serde_json::to_value(BridgeResponse::error(req.id, BRIDGE_CLOSED)).unwrap();
        server.reply(reply).await;
        assert_matches!(
            call.await.unwrap(),
            Err(BridgeError::Remote { message }) if message == "handler failed: bridge closed"
        );
    }

    #[tokio::test]
    async fn eof_fails_pending_calls_with_closed() {
        let (client, mut server) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("slow", Value::Null).await }
        });
        let _ = server.next_request().await;
        drop(server);
        assert_matches!(call.await.unwrap(), Err(BridgeError::Closed));
        assert!(client.is_closed());
        assert_matches!(client.call("again", Value::Null).await, Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn malformed_response_with_id_fails_that_call() {
        let (client, mut server) = pair();
        let call = tokio::spawn({
            let client = Arc::clone(&client);
            async move { client.call("m", Value::Null).await }
        });
        let req = server.next_request().await;
        server.reply(json!({"id": req.id, "result": 1, "error": "x"})).await;
        assert_matches!(call.await.unwrap(), Err(BridgeError::Protocol { .. }));
    }
}
