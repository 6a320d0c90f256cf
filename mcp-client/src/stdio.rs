//! Subprocess transport: newline-delimited JSON-RPC over a child's stdio.
//!
//! A writer task serializes outbound envelopes to the child's stdin and a
//! reader task correlates inbound responses to waiters by request id. The
//! child's stderr is drained by its own task and logged for diagnostics
//! only; it can never block stdout processing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use mcp_types::JSONRPC_VERSION;
use mcp_types::JSONRPCMessage;
use mcp_types::JSONRPCNotification;
use mcp_types::JSONRPCRequest;
use mcp_types::RequestId;
use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::transport::Transport;
use crate::transport::TransportError;

/// Capacity of the channel feeding the writer task.
const CHANNEL_CAPACITY: usize = 128;

/// How long `close` waits for the child to exit after stdin is closed
/// before killing it.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(5);

type PendingSender = oneshot::Sender<Result<Value, TransportError>>;
type PendingMap = HashMap<i64, PendingSender>;

/// Environment variables passed through to the child on top of any
/// explicitly configured ones. MCP servers are spawned with a clean
/// environment otherwise.
const PASSTHROUGH_ENV_VARS: &[&str] = &[
    "HOME", "LANG", "LC_ALL", "LOGNAME", "PATH", "SHELL", "TERM", "TMPDIR", "TZ", "USER",
];

pub struct StdioTransport {
    /// Retained so `close` can wait for (and if necessary kill) the child.
    child: tokio::sync::Mutex<Option<tokio::process::Child>>,

    /// Pre-serialized lines destined for the child's stdin.
    outgoing_tx: mpsc::Sender<String>,

    /// `request.id -> waiter` used to route responses back to callers.
    pending: Arc<Mutex<PendingMap>>,

    id_counter: AtomicI64,
    closed: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

fn lock_pending(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn fail_all_pending(pending: &Mutex<PendingMap>) {
    let waiters: Vec<PendingSender> = lock_pending(pending).drain().map(|(_, tx)| tx).collect();
    for tx in waiters {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

/// Removes the waiter for `id` when the sending future is dropped, whether
/// by timeout, error, or caller cancellation. Removal after the dispatcher
/// already consumed the entry is a no-op.
struct PendingGuard {
    id: i64,
    pending: Arc<Mutex<PendingMap>>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        lock_pending(&self.pending).remove(&self.id);
    }
}

impl StdioTransport {
    /// Spawn `program` and establish the framing tasks over its stdio.
    pub async fn open(
        program: &str,
        args: &[String],
        env: Option<HashMap<String, String>>,
    ) -> std::io::Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .env_clear()
            .envs(child_env(env))
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture child stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture child stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("failed to capture child stderr"))?;

        let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let pending: Arc<Mutex<PendingMap>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        // Writer task. Exiting drops stdin, which closes the pipe and
        // prompts a graceful child exit.
        {
            let shutdown = shutdown.clone();
            let closed = closed.clone();
            let mut stdin = stdin;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        line = outgoing_rx.recv() => {
                            let Some(line) = line else { break };
                            debug!("mcp -> {line}");
                            if stdin.write_all(line.as_bytes()).await.is_err()
                                || stdin.write_all(b"\n").await.is_err()
                            {
                                error!("failed to write to child stdin");
                                closed.store(true, Ordering::SeqCst);
                                shutdown.cancel();
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Reader task: routes responses to waiters. Child exit (EOF on
        // stdout) terminates the transport and releases every waiter.
        {
            let shutdown = shutdown.clone();
            let closed = closed.clone();
            let pending = pending.clone();
            let mut lines = BufReader::new(stdout).lines();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        line = lines.next_line() => {
                            match line {
                                Ok(Some(line)) => dispatch_line(&line, &pending),
                                Ok(None) | Err(_) => break,
                            }
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                shutdown.cancel();
                fail_all_pending(&pending);
            });
        }

        // Stderr drain: diagnostics only.
        {
            let program = program.to_string();
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(program = %program, "mcp stderr: {line}");
                }
            });
        }

        Ok(Self {
            child: tokio::sync::Mutex::new(Some(child)),
            outgoing_tx,
            pending,
            id_counter: AtomicI64::new(1),
            closed,
            shutdown,
        })
    }
}

fn dispatch_line(line: &str, pending: &Mutex<PendingMap>) {
    match serde_json::from_str::<JSONRPCMessage>(line) {
        Ok(JSONRPCMessage::Response(resp)) => {
            let RequestId::Integer(id) = resp.id else {
                warn!("response with non-integer id has no matching waiter");
                return;
            };
            match lock_pending(pending).remove(&id) {
                Some(tx) => {
                    let _ = tx.send(Ok(resp.result));
                }
                None => debug!(id, "dropping late response"),
            }
        }
        Ok(JSONRPCMessage::Error(err)) => {
            let RequestId::Integer(id) = err.id else {
                return;
            };
            if let Some(tx) = lock_pending(pending).remove(&id) {
                let _ = tx.send(Err(TransportError::Rpc {
                    code: err.error.code,
                    message: err.error.message,
                }));
            }
        }
        Ok(JSONRPCMessage::Notification(JSONRPCNotification { method, .. })) => {
            debug!("<- notification {method}");
        }
        Ok(other) => debug!("<- unhandled message: {other:?}"),
        // Servers may emit banners or other noise before speaking
        // JSON-RPC; skip the line without disturbing correlation.
        Err(_) => warn!("skipping non-JSON-RPC line from server: {line}"),
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let id = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let request = JSONRPCRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: RequestId::Integer(id),
            method: method.to_string(),
            params,
        };
        let line = serde_json::to_string(&request)?;

        // Register before writing so an immediate response cannot be lost.
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            id,
            pending: self.pending.clone(),
        };

        if self.outgoing_tx.send(line).await.is_err() {
            return Err(TransportError::Closed);
        }

        let response = match timeout {
            Some(duration) => match time::timeout(duration, rx).await {
                Ok(result) => result,
                Err(_) => return Err(TransportError::Timeout(duration)),
            },
            None => rx.await,
        };

        match response {
            Ok(result) => result,
            Err(_) => Err(TransportError::Closed),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let notification = JSONRPCNotification {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.to_string(),
            params,
        };
        let line = serde_json::to_string(&notification)?;
        self.outgoing_tx
            .send(line)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Stops the writer, which drops stdin and lets the child exit on
        // EOF. Waiters are released immediately rather than after the
        // grace period.
        self.shutdown.cancel();
        fail_all_pending(&self.pending);

        if let Some(mut child) = self.child.lock().await.take() {
            match time::timeout(CLOSE_GRACE_PERIOD, child.wait()).await {
                Ok(Ok(status)) => debug!("mcp server exited with {status}"),
                Ok(Err(e)) => warn!("failed to reap mcp server: {e}"),
                Err(_) => {
                    warn!("mcp server did not exit within {CLOSE_GRACE_PERIOD:?}; killing");
                    let _ = child.kill().await;
                }
            }
        }

        fail_all_pending(&self.pending);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn child_env(extra: Option<HashMap<String, String>>) -> HashMap<String, String> {
    PASSTHROUGH_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok().map(|value| (var.to_string(), value)))
        .chain(extra.unwrap_or_default())
        .collect()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;

    /// A /bin/sh MCP stand-in: answers every request with a canned result
    /// carrying the request's own id. The result body satisfies both the
    /// initialize and the list deserializers.
    const ECHO_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  if [ -n "$id" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"mock","version":"0"},"tools":[],"resources":[],"prompts":[]}}\n' "$id"
  fi
done
"#;

    /// Same as [`ECHO_SERVER`] but emits a banner line first.
    const BANNER_SERVER: &str = r#"
echo "mock server booting up"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  if [ -n "$id" ]; then
    printf '{"jsonrpc":"2.0","id":%s,"result":{"ok":true}}\n' "$id"
  fi
done
"#;

    /// Consumes requests without ever answering.
    const SILENT_SERVER: &str = "while IFS= read -r line; do :; done";

    async fn open_sh(script: &str) -> StdioTransport {
        StdioTransport::open("/bin/sh", &["-c".to_string(), script.to_string()], None)
            .await
            .expect("spawn /bin/sh")
    }

    #[tokio::test]
    async fn send_correlates_response_by_id() {
        let transport = open_sh(ECHO_SERVER).await;
        let result = transport
            .send("tools/list", None, Some(Duration::from_secs(5)))
            .await
            .expect("send");
        assert_eq!(result["tools"], serde_json::json!([]));
        transport.close().await;
    }

    #[tokio::test]
    async fn banner_line_does_not_disturb_correlation() {
        let transport = open_sh(BANNER_SERVER).await;
        let result = transport
            .send("ping", None, Some(Duration::from_secs(5)))
            .await
            .expect("send");
        assert_eq!(result["ok"], serde_json::json!(true));
        transport.close().await;
    }

    #[tokio::test]
    async fn timeout_deregisters_waiter() {
        let transport = open_sh(SILENT_SERVER).await;
        let err = transport
            .send("tools/list", None, Some(Duration::from_millis(100)))
            .await
            .expect_err("must time out");
        assert!(matches!(err, TransportError::Timeout(_)), "{err:?}");
        assert!(lock_pending(&transport.pending).is_empty());
        transport.close().await;
    }

    #[tokio::test]
    async fn close_releases_pending_waiters() {
        let transport = std::sync::Arc::new(open_sh(SILENT_SERVER).await);
        let waiter = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send("tools/list", None, None).await })
        };
        // Give the send a moment to register its waiter.
        time::sleep(Duration::from_millis(50)).await;
        transport.close().await;
        let err = waiter.await.expect("join").expect_err("must fail");
        assert!(matches!(err, TransportError::Closed), "{err:?}");
    }

    #[tokio::test]
    async fn send_after_close_fails_immediately() {
        let transport = open_sh(ECHO_SERVER).await;
        transport.close().await;
        let err = transport
            .send("tools/list", None, None)
            .await
            .expect_err("must fail");
        assert!(matches!(err, TransportError::Closed), "{err:?}");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = open_sh(ECHO_SERVER).await;
        transport.close().await;
        transport.close().await;
    }
}
