use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::jsonrpc::{is_response, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use super::types::CANCELLED;
use crate::error::{ForecastError, Result};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

const INBOUND_CAPACITY: usize = 64;
/// How long a provider gets to exit on its own after stdin closes.
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Line-delimited JSON-RPC session with exactly one peer.
///
/// Inbound lines are parsed by a background task and queued, so waiting for
/// a response can be raced against a deadline without losing half-read
/// frames. Only one request is outstanding at a time.
pub struct Transport {
    label: String,
    writer: Mutex<Option<BoxedWriter>>,
    inbound: Mutex<mpsc::Receiver<Value>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    child: Mutex<Option<Child>>,
    in_flight: Mutex<()>,
    id_counter: AtomicU64,
    closed: AtomicBool,
}

impl Transport {
    /// Spawn the provider process and talk to it over its stdin/stdout.
    pub fn spawn(command: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ForecastError::Connection {
                server: command.to_string(),
                reason: format!("failed to spawn: {e}"),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ForecastError::Connection {
            server: command.to_string(),
            reason: "no stdin from provider process".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ForecastError::Connection {
            server: command.to_string(),
            reason: "no stdout from provider process".into(),
        })?;

        debug!("spawned provider '{}' (pid {:?})", command, child.id());
        Ok(Self::build(command.to_string(), stdout, stdin, Some(child)))
    }

    /// Wrap an already-connected byte stream pair. Must be called inside a
    /// tokio runtime.
    pub fn from_io<R, W>(label: impl Into<String>, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::build(label.into(), reader, writer, None)
    }

    fn build<R, W>(label: String, reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let handle = tokio::spawn(read_loop(label.clone(), reader, tx));
        Self {
            label,
            writer: Mutex::new(Some(Box::new(writer))),
            inbound: Mutex::new(rx),
            reader: Mutex::new(Some(handle)),
            child: Mutex::new(child),
            in_flight: Mutex::new(()),
            id_counter: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Write one framed message.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<()> {
        if self.is_closed() {
            return Err(self.session_closed("closed locally"));
        }
        let mut line = serde_json::to_string(message)?;
        line.push('\n');
        debug!("{} → {}", self.label, line.trim_end());

        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.session_closed("closed locally"))?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| self.session_closed(format!("write failed: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.session_closed(format!("flush failed: {e}")))?;
        Ok(())
    }

    /// Next inbound message in arrival order.
    pub async fn receive(&self) -> Result<Value> {
        if self.is_closed() {
            return Err(self.session_closed("closed locally"));
        }
        let mut inbound = self.inbound.lock().await;
        inbound
            .recv()
            .await
            .ok_or_else(|| self.session_closed("provider closed the connection"))
    }

    /// Send a request and wait for the response carrying the same id.
    ///
    /// Inbound notifications and responses to earlier (timed out) requests
    /// are discarded. On expiry of `timeout` the peer is sent
    /// `notifications/cancelled` for the abandoned id.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<JsonRpcResponse> {
        let _in_flight = self.in_flight.lock().await;
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        self.send(&JsonRpcRequest::new(id, method, params)).await?;

        let Some(after) = timeout else {
            return self.await_response(id).await;
        };
        match tokio::time::timeout(after, self.await_response(id)).await {
            Ok(response) => response,
            Err(_) => {
                warn!("{}: '{}' (id={}) timed out after {:?}", self.label, method, id, after);
                let cancel = json!({ "requestId": id, "reason": "request timed out" });
                if let Err(e) = self.notify(CANCELLED, Some(cancel)).await {
                    debug!("{}: could not send cancellation: {}", self.label, e);
                }
                Err(ForecastError::Timeout {
                    method: method.to_string(),
                    after,
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        self.send(&JsonRpcNotification::new(method, params)).await
    }

    async fn await_response(&self, id: u64) -> Result<JsonRpcResponse> {
        loop {
            let raw = self.receive().await?;
            if !is_response(&raw) {
                debug!("{}: ignoring non-response message", self.label);
                continue;
            }
            let response: JsonRpcResponse = serde_json::from_value(raw)
                .map_err(|e| ForecastError::Protocol(format!("malformed response: {e}")))?;
            if !response.answers(id) {
                debug!(
                    "{}: discarding response for id={} while waiting for id={}",
                    self.label, response.id, id
                );
                continue;
            }
            return Ok(response);
        }
    }

    fn session_closed(&self, reason: impl Into<String>) -> ForecastError {
        ForecastError::SessionClosed {
            server: self.label.clone(),
            reason: reason.into(),
        }
    }

    /// Release the channel and reap the provider. Safe to call repeatedly and
    /// after the provider has already exited.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("closing session with '{}'", self.label);

        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        if let Some(handle) = self.reader.lock().await.take() {
            handle.abort();
        }

        let Some(mut child) = self.child.lock().await.take() else {
            return;
        };
        match tokio::time::timeout(EXIT_GRACE, child.wait()).await {
            Ok(Ok(status)) => debug!("provider '{}' exited: {}", self.label, status),
            Ok(Err(e)) => debug!("provider '{}' wait failed: {}", self.label, e),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!("provider '{}' kill failed: {}", self.label, e);
                }
                let _ = child.wait().await;
                debug!("provider '{}' killed", self.label);
            }
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}


async fn read_loop<R>(label: String, reader: R, tx: mpsc::Sender<Value>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                debug!("{} ← {}", label, trimmed);
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("{}: skipping non-JSON line: {}", label, e),
                }
            }
            Ok(None) => {
                debug!("{}: stream ended", label);
                break;
            }
            Err(e) => {
                warn!("{}: read failed: {}", label, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, split, DuplexStream, Lines, ReadHalf, WriteHalf};

    struct Peer {
        lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl Peer {
        async fn next(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn write(&mut self, value: Value) {
            let mut line = value.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn pair() -> (Transport, Peer) {
        let (ours, theirs) = duplex(8192);
        let (r, w) = split(ours);
        let (pr, pw) = split(theirs);
        (
            Transport::from_io("test", r, w),
            Peer {
                lines: BufReader::new(pr).lines(),
                writer: pw,
            },
        )
    }

    #[tokio::test]
    async fn request_skips_notifications_and_foreign_ids() {
        let (transport, mut peer) = pair();

        let server = tokio::spawn(async move {
            let req = peer.next().await;
            assert_eq!(req["method"], "tools/list");
            let id = req["id"].clone();
            peer.write(json!({"jsonrpc": "2.0", "method": "notifications/progress"}))
                .await;
            peer.write(json!({"jsonrpc": "2.0", "id": 999, "result": {"stale": true}}))
                .await;
            peer.write(json!({"jsonrpc": "2.0", "id": id, "result": {"tools": []}}))
                .await;
            peer
        });

        let resp = transport.request("tools/list", None, None).await.unwrap();
        assert_eq!(resp.result, Some(json!({"tools": []})));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let (transport, mut peer) = pair();

        let server = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..3 {
                let req = peer.next().await;
                seen.push(req["id"].as_u64().unwrap());
                peer.write(json!({"jsonrpc": "2.0", "id": req["id"], "result": {}}))
                    .await;
            }
            seen
        });

        for _ in 0..3 {
            transport.request("ping", None, None).await.unwrap();
        }
        assert_eq!(server.await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn timeout_cancels_and_late_response_is_not_misattributed() {
        let (transport, mut peer) = pair();

        let server = tokio::spawn(async move {
            let slow = peer.next().await;
            let cancel = peer.next().await;
            assert_eq!(cancel["method"], CANCELLED);
            assert_eq!(cancel["params"]["requestId"], slow["id"]);

            // Answer the abandoned request late, then the new one.
            peer.write(json!({"jsonrpc": "2.0", "id": slow["id"], "result": {"late": true}}))
                .await;
            let next = peer.next().await;
            peer.write(json!({"jsonrpc": "2.0", "id": next["id"], "result": {"fresh": true}}))
                .await;
        });

        let err = transport
            .request("tools/call", None, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ForecastError::Timeout { .. }));

        let resp = transport.request("ping", None, None).await.unwrap();
        assert_eq!(resp.result, Some(json!({"fresh": true})));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn peer_hangup_closes_the_session() {
        let (transport, mut peer) = pair();

        let server = tokio::spawn(async move {
            let _ = peer.next().await;
            drop(peer);
        });

        let err = transport.request("tools/list", None, None).await.unwrap_err();
        assert!(matches!(err, ForecastError::SessionClosed { .. }));
        assert!(err.is_fatal_to_session());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (transport, mut peer) = pair();

        let server = tokio::spawn(async move {
            let req = peer.next().await;
            peer.writer.write_all(b"Server ready!\n").await.unwrap();
            peer.write(json!({"jsonrpc": "2.0", "id": req["id"], "result": {}}))
                .await;
        });

        assert!(transport.request("ping", None, None).await.is_ok());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_use() {
        let (transport, _peer) = pair();
        transport.close().await;
        transport.close().await;

        assert!(transport.is_closed());
        let err = transport.request("ping", None, None).await.unwrap_err();
        assert!(matches!(err, ForecastError::SessionClosed { .. }));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_connection_error() {
        let err = match Transport::spawn("/definitely/not/a/provider", &[]) {
            Ok(_) => panic!("spawn should fail"),
            Err(e) => e,
        };
        assert!(matches!(err, ForecastError::Connection { .. }));
    }
}
