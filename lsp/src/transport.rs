//! Duplex JSON-RPC transport over a server's stdout/stdin.
//!
//! One writer task owns the outbound half, so frames from concurrent callers
//! never interleave. One reader task owns the inbound half and routes each
//! response to its waiting caller by request id, in whatever order responses
//! arrive. Closing the transport fails every request still waiting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::SessionError;
use crate::protocol::{self, Incoming, Notification, Request};

const WRITER_CHANNEL_CAPACITY: usize = 64;

type Outcome = Result<Value, SessionError>;

enum WriterCommand {
    Frame(Value),
    Close,
}

#[derive(Default)]
struct PendingState {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<Outcome>>,
}

/// Requests awaiting a response, keyed by correlation id.
///
/// Once closed, no new request can register and every waiter has been
/// failed with [`SessionError::Terminated`]. The lock is never held across
/// an await.
#[derive(Default)]
pub(crate) struct PendingRequests {
    state: Mutex<PendingState>,
}

impl PendingRequests {
    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter for `id`. The entry lives until it is completed,
    /// the map is closed, or the returned guard is dropped.
    fn register(
        self: &Arc<Self>,
        id: u64,
    ) -> Result<(PendingGuard, oneshot::Receiver<Outcome>), SessionError> {
        let mut state = self.state();
        if state.closed {
            return Err(SessionError::Terminated);
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        let guard = PendingGuard {
            pending: Arc::clone(self),
            id,
        };
        Ok((guard, rx))
    }

    /// Deliver `outcome` to the waiter for `id`. Returns false if nobody
    /// was waiting (unknown id, or the caller gave up).
    fn complete(&self, id: u64, outcome: Outcome) -> bool {
        let waiter = self.state().waiters.remove(&id);
        match waiter {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Mark closed and fail all waiters. Returns how many were failed.
    pub(crate) fn close(&self) -> usize {
        let waiters = {
            let mut state = self.state();
            state.closed = true;
            std::mem::take(&mut state.waiters)
        };
        let count = waiters.len();
        for (_, tx) in waiters {
            let _ = tx.send(Err(SessionError::Terminated));
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state().waiters.len()
    }
}

/// Removes a request's waiter when the caller stops waiting, whether it
/// got a response, timed out, or its future was dropped.
///
/// Ids are never reused, so removing an id that was already completed is
/// a no-op.
struct PendingGuard {
    pending: Arc<PendingRequests>,
    id: u64,
}

impl std::fmt::Debug for PendingGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGuard").field("id", &self.id).finish_non_exhaustive()
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.state().waiters.remove(&self.id);
    }
}

/// Cloneable handle that can close a transport from outside it, e.g. from
/// the task watching the server process.
#[derive(Clone)]
pub(crate) struct CloseHandle {
    pending: Arc<PendingRequests>,
    writer_tx: mpsc::Sender<WriterCommand>,
}

impl CloseHandle {
    pub(crate) async fn close(&self) -> usize {
        let failed = self.pending.close();
        let _ = self.writer_tx.send(WriterCommand::Close).await;
        failed
    }
}

pub(crate) struct Transport {
    label: String,
    writer_tx: mpsc::Sender<WriterCommand>,
    pending: Arc<PendingRequests>,
    next_id: AtomicU64,
    request_timeout: Option<Duration>,
}

impl Transport {
    /// Spawn the reader and writer tasks over the given stream halves.
    ///
    /// `label` identifies the session in logs.
    pub(crate) fn start<R, W>(
        inbound: R,
        outbound: W,
        label: String,
        request_timeout: Option<Duration>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let pending = Arc::new(PendingRequests::default());
        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);

        let writer_label = label.clone();
        tokio::spawn(async move {
            let mut writer = FrameWriter::new(outbound);
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Frame(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!(session = %writer_label, "write to language server failed: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Close => break,
                }
            }
            tracing::debug!(session = %writer_label, "transport writer stopped");
        });

        let reader_pending = pending.clone();
        let reader_writer_tx = writer_tx.clone();
        let reader_label = label.clone();
        tokio::spawn(async move {
            let mut reader = FrameReader::new(inbound);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        dispatch_frame(&frame, &reader_pending, &reader_writer_tx, &reader_label)
                            .await;
                    }
                    Ok(None) => {
                        tracing::debug!(session = %reader_label, "language server closed stdout");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(session = %reader_label, "read from language server failed: {e:#}");
                        break;
                    }
                }
            }
            let failed = reader_pending.close();
            if failed > 0 {
                tracing::debug!(session = %reader_label, failed, "failed pending requests on stream end");
            }
        });

        Self {
            label,
            writer_tx,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout,
        }
    }

    pub(crate) fn close_handle(&self) -> CloseHandle {
        CloseHandle {
            pending: self.pending.clone(),
            writer_tx: self.writer_tx.clone(),
        }
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    /// Send a request and wait for its response.
    ///
    /// Returns the raw `result` value (possibly `null`); server error
    /// responses come back as [`SessionError::Protocol`].
    pub(crate) async fn request(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<Value, SessionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(|source| SessionError::Decode { method, source })?;
        let (_waiting, rx) = self.pending.register(id)?;

        tracing::debug!(session = %self.label, id, method, "sending request");
        if self.writer_tx.send(WriterCommand::Frame(frame)).await.is_err() {
            return Err(SessionError::Terminated);
        }

        let received = match self.request_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(received) => received,
                Err(_) => return Err(SessionError::Timeout { method, timeout }),
            },
            None => rx.await,
        };
        received.unwrap_or(Err(SessionError::Terminated))
    }

    /// Queue a notification. Completes once the frame is queued, not written.
    pub(crate) async fn notify(
        &self,
        method: &'static str,
        params: Option<Value>,
    ) -> Result<(), SessionError> {
        if self.pending.is_closed() {
            return Err(SessionError::Terminated);
        }
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|source| SessionError::Decode { method, source })?;
        tracing::debug!(session = %self.label, method, "sending notification");
        self.writer_tx
            .send(WriterCommand::Frame(frame))
            .await
            .map_err(|_| SessionError::Terminated)
    }
}

async fn dispatch_frame(
    frame: &Value,
    pending: &PendingRequests,
    writer_tx: &mpsc::Sender<WriterCommand>,
    label: &str,
) {
    let Some(incoming) = protocol::parse_incoming(frame) else {
        tracing::trace!(session = %label, "ignoring malformed JSON-RPC frame");
        return;
    };

    match incoming {
        Incoming::Response { id, outcome } => {
            let delivered = pending.complete(id, outcome.map_err(SessionError::Protocol));
            if !delivered {
                tracing::trace!(session = %label, id, "response for unknown request id");
            }
        }
        Incoming::ServerRequest { id, method } => {
            // Servers block on some of their own requests; always answer.
            tracing::debug!(session = %label, %method, "server request, replying method not found");
            let reply = protocol::method_not_found(&id, &method);
            let _ = writer_tx.send(WriterCommand::Frame(reply)).await;
        }
        Incoming::Notification { method, params } => {
            tracing::debug!(session = %label, %method, ?params, "server notification");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    type ServerReader = FrameReader<ReadHalf<DuplexStream>>;
    type ServerWriter = FrameWriter<WriteHalf<DuplexStream>>;

    /// Transport wired to an in-process fake server.
    fn connect(request_timeout: Option<Duration>) -> (Transport, ServerReader, ServerWriter) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);
        let transport = Transport::start(
            client_read,
            client_write,
            "example.com/proj".to_string(),
            request_timeout,
        );
        (
            transport,
            FrameReader::new(server_read),
            FrameWriter::new(server_write),
        )
    }

    async fn next(reader: &mut ServerReader) -> Value {
        reader.read_frame().await.unwrap().unwrap()
    }

    async fn next_frame(reader: &mut ServerReader) -> Option<Value> {
        reader.read_frame().await.ok().flatten()
    }

    async fn reply(writer: &mut ServerWriter, id: &Value, result: Value) {
        writer
            .write_frame(&serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn request_receives_matching_response() {
        let (transport, mut server_rx, mut server_tx) = connect(None);

        let server = tokio::spawn(async move {
            let request = next(&mut server_rx).await;
            assert_eq!(request["method"], "textDocument/documentSymbol");
            reply(&mut server_tx, &request["id"], serde_json::json!([])).await;
        });

        let result = transport
            .request("textDocument/documentSymbol", Some(serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(result, serde_json::json!([]));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn null_result_is_delivered_not_dropped() {
        let (transport, mut server_rx, mut server_tx) = connect(None);

        tokio::spawn(async move {
            let request = next(&mut server_rx).await;
            reply(&mut server_tx, &request["id"], Value::Null).await;
        });

        let result = transport.request("textDocument/hover", None).await.unwrap();
        assert!(result.is_null());
    }

    #[tokio::test]
    async fn responses_out_of_order_reach_their_callers() {
        let (transport, mut server_rx, mut server_tx) = connect(None);
        let transport = Arc::new(transport);

        tokio::spawn(async move {
            let first = next(&mut server_rx).await;
            let second = next(&mut server_rx).await;
            reply(&mut server_tx, &second["id"], second["method"].clone()).await;
            reply(&mut server_tx, &first["id"], first["method"].clone()).await;
        });

        let hover = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("textDocument/hover", None).await })
        };
        let definition = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("textDocument/definition", None).await })
        };

        assert_eq!(hover.await.unwrap().unwrap(), "textDocument/hover");
        assert_eq!(
            definition.await.unwrap().unwrap(),
            "textDocument/definition"
        );
    }

    #[tokio::test]
    async fn error_response_surfaces_as_protocol_error() {
        let (transport, mut server_rx, mut server_tx) = connect(None);

        tokio::spawn(async move {
            let request = next(&mut server_rx).await;
            server_tx
                .write_frame(&serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": { "code": -32602, "message": "invalid params" }
                }))
                .await
                .unwrap();
        });

        match transport.request("textDocument/definition", None).await {
            Err(SessionError::Protocol(err)) => {
                assert_eq!(err.code, -32602);
                assert_eq!(err.message, "invalid params");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn stream_end_fails_pending_and_later_requests() {
        let (transport, mut server_rx, server_tx) = connect(None);

        tokio::spawn(async move {
            let _ = next(&mut server_rx).await;
            drop(server_tx);
            drop(server_rx);
        });

        let err = transport.request("shutdown", None).await.unwrap_err();
        assert!(err.is_terminated(), "got {err:?}");

        let err = transport.request("textDocument/hover", None).await.unwrap_err();
        assert!(err.is_terminated(), "got {err:?}");
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn close_handle_fails_waiting_requests() {
        let (transport, mut server_rx, _server_tx) = connect(None);
        let transport = Arc::new(transport);
        let close = transport.close_handle();

        let waiting = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.request("textDocument/hover", None).await })
        };
        // The request is registered once the server has seen it.
        let _ = next(&mut server_rx).await;

        assert_eq!(close.close().await, 1);
        assert!(waiting.await.unwrap().unwrap_err().is_terminated());
        assert!(
            transport
                .notify("initialized", None)
                .await
                .unwrap_err()
                .is_terminated()
        );
    }

    #[tokio::test]
    async fn server_requests_get_method_not_found() {
        let (_transport, mut server_rx, mut server_tx) = connect(None);

        server_tx
            .write_frame(&serde_json::json!({
                "jsonrpc": "2.0",
                "id": 41,
                "method": "client/registerCapability",
                "params": {}
            }))
            .await
            .unwrap();

        let reply = next(&mut server_rx).await;
        assert_eq!(reply["id"], 41);
        assert_eq!(reply["error"]["code"], protocol::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn notifications_are_written_in_order() {
        let (transport, mut server_rx, _server_tx) = connect(None);

        transport
            .notify("initialized", Some(serde_json::json!({})))
            .await
            .unwrap();
        transport
            .notify("textDocument/didOpen", Some(serde_json::json!({})))
            .await
            .unwrap();

        let first = next(&mut server_rx).await;
        let second = next(&mut server_rx).await;
        assert_eq!(first["method"], "initialized");
        assert!(first.get("id").is_none());
        assert_eq!(second["method"], "textDocument/didOpen");
    }

    #[tokio::test]
    async fn request_ids_are_unique() {
        let (transport, mut server_rx, mut server_tx) = connect(None);
        let transport = Arc::new(transport);

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let request = next(&mut server_rx).await;
                seen.push(request["id"].as_u64().unwrap());
                reply(&mut server_tx, &request["id"], Value::Null).await;
            }
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen.len(), 3);
        });

        for _ in 0..3 {
            transport.request("textDocument/hover", None).await.unwrap();
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_releases_pending_entry() {
        let (transport, mut server_rx, _server_tx) =
            connect(Some(Duration::from_millis(50)));

        tokio::spawn(async move {
            // Read and never answer.
            let _ = next(&mut server_rx).await;
            std::future::pending::<()>().await;
        });

        match transport.request("textDocument/hover", None).await {
            Err(SessionError::Timeout { method, .. }) => assert_eq!(method, "textDocument/hover"),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(transport.pending.len(), 0);
    }

    #[tokio::test]
    async fn dropped_request_futures_release_pending_entries() {
        let (transport, mut server_rx, _server_tx) = connect(None);

        tokio::spawn(async move {
            // Read everything and never answer.
            while next_frame(&mut server_rx).await.is_some() {}
        });

        for _ in 0..5 {
            let gave_up = tokio::time::timeout(
                Duration::from_millis(20),
                transport.request("textDocument/hover", None),
            )
            .await;
            assert!(gave_up.is_err());
        }
        assert_eq!(transport.pending.len(), 0);
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn completed_request_leaves_no_entry() {
        let (transport, mut server_rx, mut server_tx) = connect(None);

        tokio::spawn(async move {
            let request = next(&mut server_rx).await;
            reply(&mut server_tx, &request["id"], Value::Null).await;
        });

        transport.request("textDocument/hover", None).await.unwrap();
        assert_eq!(transport.pending.len(), 0);
    }

    #[tokio::test]
    async fn unknown_response_id_is_ignored() {
        let pending = PendingRequests::default();
        let (writer_tx, _writer_rx) = mpsc::channel(4);
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": 999, "result": {} });
        dispatch_frame(&frame, &pending, &writer_tx, "test").await;
        assert_eq!(pending.len(), 0);
    }

    #[tokio::test]
    async fn closed_pending_map_rejects_registration() {
        let pending = Arc::new(PendingRequests::default());
        let (_waiting, rx) = pending.register(1).unwrap();
        assert_eq!(pending.close(), 1);
        assert!(rx.await.unwrap().unwrap_err().is_terminated());
        assert!(pending.register(2).unwrap_err().is_terminated());
    }
}
