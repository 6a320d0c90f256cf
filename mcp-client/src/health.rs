//! Periodic liveness probing of registered MCP clients.
//!
//! Each cycle issues a lightweight `tools/list` per server and records
//! status, latency, and the last error. Readers get snapshot copies.
//! Start and Stop are idempotent: the lifecycle is a state machine
//! (Idle → Running → Stopped, terminal stop) transitioned under a lock,
//! and shutdown is signalled through a cancellation token rather than a
//! channel that could be closed twice.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::client::McpClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    /// Unix seconds of the most recent probe.
    pub last_check_at: Option<u64>,
    /// Unix seconds of the most recent successful probe.
    pub last_success_at: Option<u64>,
    pub last_error: Option<String>,
    pub latency_ms: Option<u64>,
}

impl HealthRecord {
    fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            last_check_at: None,
            last_success_at: None,
            last_error: None,
            latency_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Stopped,
}

pub struct HealthMonitor {
    interval: Duration,
    check_timeout: Duration,
    clients: Mutex<HashMap<String, Arc<McpClient>>>,
    results: Mutex<HashMap<String, HealthRecord>>,
    lifecycle: Mutex<Lifecycle>,
    stop: CancellationToken,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

impl HealthMonitor {
    pub fn new(interval: Duration, check_timeout: Duration) -> Self {
        Self {
            interval,
            check_timeout,
            clients: Mutex::new(HashMap::new()),
            results: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::Idle),
            stop: CancellationToken::new(),
        }
    }

    pub fn register(&self, name: impl Into<String>, client: Arc<McpClient>) {
        let name = name.into();
        lock(&self.results).insert(name.clone(), HealthRecord::unknown());
        lock(&self.clients).insert(name, client);
    }

    pub fn unregister(&self, name: &str) {
        lock(&self.clients).remove(name);
        lock(&self.results).remove(name);
    }

    /// Spawn the probe loop. Safe to call any number of times: at most one
    /// loop ever runs, and a stopped monitor is never resurrected.
    pub fn start(self: &Arc<Self>) {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if *lifecycle != Lifecycle::Idle {
                return;
            }
            *lifecycle = Lifecycle::Running;
        }

        let monitor = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = monitor.stop.cancelled() => break,
                    _ = time::sleep(monitor.interval) => monitor.run_probes().await,
                }
            }
            debug!("health monitor stopped");
        });
    }

    /// Idempotent; concurrent callers may race the first probe but the
    /// stop signal itself cannot be corrupted.
    pub fn stop(&self) {
        *lock(&self.lifecycle) = Lifecycle::Stopped;
        self.stop.cancel();
    }

    pub fn get(&self, name: &str) -> Option<HealthRecord> {
        lock(&self.results).get(name).cloned()
    }

    pub fn all(&self) -> HashMap<String, HealthRecord> {
        lock(&self.results).clone()
    }

    /// Probe one server immediately and return the fresh record.
    pub async fn check_now(&self, name: &str) -> Option<HealthRecord> {
        let client = lock(&self.clients).get(name).cloned()?;
        let record = probe_client(&client, self.check_timeout, self.get(name)).await;
        lock(&self.results).insert(name.to_string(), record.clone());
        Some(record)
    }

    async fn run_probes(&self) {
        let snapshot: Vec<(String, Arc<McpClient>)> = lock(&self.clients)
            .iter()
            .map(|(name, client)| (name.clone(), client.clone()))
            .collect();

        let mut join_set = JoinSet::new();
        for (name, client) in snapshot {
            let check_timeout = self.check_timeout;
            let previous = self.get(&name);
            join_set.spawn(async move {
                let record = probe_client(&client, check_timeout, previous).await;
                (name, record)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, record)) => {
                    if record.status == HealthStatus::Unhealthy {
                        warn!(server = %name, error = ?record.last_error, "mcp server unhealthy");
                    }
                    lock(&self.results).insert(name, record);
                }
                Err(e) => warn!("health probe task panicked: {e}"),
            }
        }
    }

}

async fn probe_client(
    client: &Arc<McpClient>,
    check_timeout: Duration,
    previous: Option<HealthRecord>,
) -> HealthRecord {
    let last_success_at = previous.and_then(|r| r.last_success_at);
    let checked_at = unix_now();

    if client.is_closed() {
        return HealthRecord {
            status: HealthStatus::Unhealthy,
            last_check_at: Some(checked_at),
            last_success_at,
            last_error: Some("transport closed".to_string()),
            latency_ms: None,
        };
    }

    let started = Instant::now();
    let outcome = time::timeout(check_timeout, client.refresh_tools()).await;
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(Ok(_)) => HealthRecord {
            status: HealthStatus::Healthy,
            last_check_at: Some(checked_at),
            last_success_at: Some(checked_at),
            last_error: None,
            latency_ms: Some(latency_ms),
        },
        Ok(Err(e)) => HealthRecord {
            status: HealthStatus::Unhealthy,
            last_check_at: Some(checked_at),
            last_success_at,
            last_error: Some(format!("{e:#}")),
            latency_ms: Some(latency_ms),
        },
        Err(_) => HealthRecord {
            status: HealthStatus::Unhealthy,
            last_check_at: Some(checked_at),
            last_success_at,
            last_error: Some(format!("probe timed out after {check_timeout:?}")),
            latency_ms: Some(latency_ms),
        },
    }
}
