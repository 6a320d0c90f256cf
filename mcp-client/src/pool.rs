//! Bounded pool of MCP clients for a single HTTP-backed server.
//!
//! Clients are created lazily by a caller-supplied factory, which always
//! runs outside the pool lock; a post-factory size recheck keeps racing
//! acquires from exceeding the cap. Idle entries are reaped once a minute.

use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use serde::Serialize;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::McpClient;

const ACQUIRE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool exhausted: no client available before the acquire timeout")]
    Exhausted,

    #[error("pool closed")]
    Closed,

    #[error("failed to create pooled client")]
    Factory(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub max_idle: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 5,
            max_idle: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub in_use: usize,
    pub idle: usize,
    pub max: usize,
}

struct PoolEntry {
    client: Arc<McpClient>,
    in_use: bool,
    last_used: Instant,
}

struct PoolState {
    entries: Vec<PoolEntry>,
    closed: bool,
}

pub struct ClientPool {
    server_name: String,
    config: PoolConfig,
    state: Arc<Mutex<PoolState>>,
    reaper: CancellationToken,
}

fn lock(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl ClientPool {
    pub fn new(server_name: impl Into<String>, config: PoolConfig) -> Self {
        let state = Arc::new(Mutex::new(PoolState {
            entries: Vec::new(),
            closed: false,
        }));
        let reaper = CancellationToken::new();

        {
            let state = state.clone();
            let reaper = reaper.clone();
            let max_idle = config.max_idle;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = reaper.cancelled() => break,
                        _ = time::sleep(REAPER_INTERVAL) => {
                            let expired: Vec<Arc<McpClient>> = {
                                let mut guard = lock(&state);
                                let now = Instant::now();
                                let mut removed = Vec::new();
                                guard.entries.retain(|entry| {
                                    let stale = !entry.in_use
                                        && now.duration_since(entry.last_used) > max_idle;
                                    if stale {
                                        removed.push(entry.client.clone());
                                    }
                                    !stale
                                });
                                removed
                            };
                            for client in expired {
                                debug!("reaping idle pooled client");
                                client.close().await;
                            }
                        }
                    }
                }
            });
        }

        Self {
            server_name: server_name.into(),
            config,
            state,
            reaper,
        }
    }

    /// Acquire an idle client, creating one via `factory` when the pool has
    /// room. Blocks (polling) while the pool is at capacity, up to the
    /// configured acquire timeout.
    pub async fn acquire<F, Fut>(&self, factory: F) -> Result<Arc<McpClient>, PoolError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<McpClient>>,
    {
        let deadline = Instant::now() + self.config.acquire_timeout;
        loop {
            let has_room = {
                let mut state = lock(&self.state);
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(entry) = state
                    .entries
                    .iter_mut()
                    .find(|entry| !entry.in_use && !entry.client.is_closed())
                {
                    entry.in_use = true;
                    entry.last_used = Instant::now();
                    return Ok(entry.client.clone());
                }
                state.entries.len() < self.config.max_size
            };

            if has_room {
                let client = Arc::new(factory().await.map_err(PoolError::Factory)?);
                let kept = {
                    let mut state = lock(&self.state);
                    if state.closed {
                        None
                    } else if state.entries.len() < self.config.max_size {
                        state.entries.push(PoolEntry {
                            client: client.clone(),
                            in_use: true,
                            last_used: Instant::now(),
                        });
                        Some(true)
                    } else {
                        // Another acquire won the race to the last slot.
                        Some(false)
                    }
                };
                match kept {
                    Some(true) => {
                        debug!(server = %self.server_name, "pooled client created");
                        return Ok(client);
                    }
                    Some(false) => client.close().await,
                    None => {
                        client.close().await;
                        return Err(PoolError::Closed);
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PoolError::Exhausted);
            }
            time::sleep(ACQUIRE_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    /// Return a client to the pool. Matching is by identity.
    pub fn release(&self, client: &Arc<McpClient>) {
        let mut state = lock(&self.state);
        if let Some(entry) = state
            .entries
            .iter_mut()
            .find(|entry| Arc::ptr_eq(&entry.client, client))
        {
            entry.in_use = false;
            entry.last_used = Instant::now();
        }
    }

    /// Drop a client observed broken; the entry is deleted and the client
    /// closed.
    pub async fn remove(&self, client: &Arc<McpClient>) {
        let removed = {
            let mut state = lock(&self.state);
            state
                .entries
                .iter()
                .position(|entry| Arc::ptr_eq(&entry.client, client))
                .map(|index| state.entries.remove(index))
        };
        if let Some(entry) = removed {
            entry.client.close().await;
        }
    }

    /// Idempotent: marks closed, stops the reaper, closes every client.
    /// Subsequent acquires fail with [`PoolError::Closed`].
    pub async fn close(&self) {
        let entries: Vec<PoolEntry> = {
            let mut state = lock(&self.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.entries.drain(..).collect()
        };
        self.reaper.cancel();
        for entry in entries {
            entry.client.close().await;
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = lock(&self.state);
        let in_use = state.entries.iter().filter(|entry| entry.in_use).count();
        PoolStats {
            total: state.entries.len(),
            in_use,
            idle: state.entries.len() - in_use,
            max: self.config.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::null_client;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn pool_with(max_size: usize, acquire_timeout: Duration) -> ClientPool {
        ClientPool::new(
            "test",
            PoolConfig {
                max_size,
                acquire_timeout,
                ..PoolConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn acquire_reuses_released_client() {
        let pool = pool_with(1, Duration::from_millis(200));
        let first = pool.acquire(|| async { Ok(null_client("a")) }).await.expect("acquire");
        pool.release(&first);
        let second = pool.acquire(|| async { Ok(null_client("b")) }).await.expect("acquire");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats().total, 1);
    }

    #[tokio::test]
    async fn exhausted_after_acquire_timeout() {
        let pool = pool_with(1, Duration::from_millis(200));
        let _held = pool.acquire(|| async { Ok(null_client("a")) }).await.expect("acquire");
        let started = Instant::now();
        let err = pool
            .acquire(|| async { Ok(null_client("b")) })
            .await
            .expect_err("pool is full");
        assert!(matches!(err, PoolError::Exhausted), "{err:?}");
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn release_unblocks_waiting_acquire() {
        let pool = Arc::new(pool_with(1, Duration::from_secs(5)));
        let held = pool.acquire(|| async { Ok(null_client("a")) }).await.expect("acquire");

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(|| async { Ok(null_client("b")) }).await })
        };
        time::sleep(Duration::from_millis(150)).await;
        pool.release(&held);

        let acquired = waiter.await.expect("join").expect("acquire after release");
        assert!(Arc::ptr_eq(&held, &acquired));
    }

    #[tokio::test]
    async fn concurrent_acquires_never_exceed_cap() {
        let pool = Arc::new(pool_with(3, Duration::from_secs(5)));
        let created = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let pool = pool.clone();
            let created = created.clone();
            tasks.push(tokio::spawn(async move {
                let client = pool
                    .acquire(|| {
                        let created = created.clone();
                        async move {
                            created.fetch_add(1, Ordering::SeqCst);
                            time::sleep(Duration::from_millis(10)).await;
                            Ok(null_client("n"))
                        }
                    })
                    .await
                    .expect("acquire");
                time::sleep(Duration::from_millis(20)).await;
                pool.release(&client);
            }));
        }
        for task in tasks {
            task.await.expect("join");
        }

        let stats = pool.stats();
        assert!(stats.total <= 3, "pool overfilled: {stats:?}");
        assert_eq!(stats.in_use, 0);
    }

    #[tokio::test]
    async fn close_fails_subsequent_acquires_and_is_idempotent() {
        let pool = pool_with(2, Duration::from_millis(200));
        let _client = pool.acquire(|| async { Ok(null_client("a")) }).await.expect("acquire");
        pool.close().await;
        pool.close().await;
        let err = pool
            .acquire(|| async { Ok(null_client("b")) })
            .await
            .expect_err("closed");
        assert!(matches!(err, PoolError::Closed), "{err:?}");
        assert_eq!(pool.stats().total, 0);
    }

    #[tokio::test]
    async fn remove_deletes_entry() {
        let pool = pool_with(2, Duration::from_millis(200));
        let client = pool.acquire(|| async { Ok(null_client("a")) }).await.expect("acquire");
        pool.remove(&client).await;
        assert_eq!(pool.stats().total, 0);
        assert!(client.is_closed());
    }
}
