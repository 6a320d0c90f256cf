//! TTL cache for discovered server metadata.
//!
//! Three maps keyed by server name hold tool, resource, and prompt
//! snapshots with an absolute expiry each. Reads hand out defensive
//! copies; a background sweeper deletes expired entries once a minute
//! until the cache is shut down.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;
use std::time::Instant;

use mcp_types::Prompt;
use mcp_types::Resource;
use mcp_types::Tool;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T> Expiring<T> {
    fn live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Default)]
struct Maps {
    tools: HashMap<String, Expiring<Vec<Tool>>>,
    resources: HashMap<String, Expiring<Vec<Resource>>>,
    prompts: HashMap<String, Expiring<Vec<Prompt>>>,
}

pub struct MetadataCache {
    ttl: Duration,
    maps: Arc<Mutex<Maps>>,
    sweeper: CancellationToken,
}

fn lock(maps: &Mutex<Maps>) -> MutexGuard<'_, Maps> {
    match maps.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        let maps = Arc::new(Mutex::new(Maps::default()));
        let sweeper = CancellationToken::new();

        {
            let maps = maps.clone();
            let sweeper = sweeper.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = sweeper.cancelled() => break,
                        _ = time::sleep(SWEEP_INTERVAL) => {
                            let mut guard = lock(&maps);
                            guard.tools.retain(|_, entry| entry.live());
                            guard.resources.retain(|_, entry| entry.live());
                            guard.prompts.retain(|_, entry| entry.live());
                        }
                    }
                }
                debug!("metadata cache sweeper stopped");
            });
        }

        Self { ttl, maps, sweeper }
    }

    pub fn get_tools(&self, server: &str) -> Option<Vec<Tool>> {
        let guard = lock(&self.maps);
        guard
            .tools
            .get(server)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
    }

    pub fn set_tools(&self, server: &str, tools: Vec<Tool>) {
        lock(&self.maps).tools.insert(
            server.to_string(),
            Expiring {
                value: tools,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get_resources(&self, server: &str) -> Option<Vec<Resource>> {
        let guard = lock(&self.maps);
        guard
            .resources
            .get(server)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
    }

    pub fn set_resources(&self, server: &str, resources: Vec<Resource>) {
        lock(&self.maps).resources.insert(
            server.to_string(),
            Expiring {
                value: resources,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn get_prompts(&self, server: &str) -> Option<Vec<Prompt>> {
        let guard = lock(&self.maps);
        guard
            .prompts
            .get(server)
            .filter(|entry| entry.live())
            .map(|entry| entry.value.clone())
    }

    pub fn set_prompts(&self, server: &str, prompts: Vec<Prompt>) {
        lock(&self.maps).prompts.insert(
            server.to_string(),
            Expiring {
                value: prompts,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    pub fn invalidate_tools(&self, server: &str) {
        lock(&self.maps).tools.remove(server);
    }

    pub fn invalidate_resources(&self, server: &str) {
        lock(&self.maps).resources.remove(server);
    }

    pub fn invalidate_prompts(&self, server: &str) {
        lock(&self.maps).prompts.remove(server);
    }

    pub fn invalidate_all(&self, server: &str) {
        let mut guard = lock(&self.maps);
        guard.tools.remove(server);
        guard.resources.remove(server);
        guard.prompts.remove(server);
    }

    /// Stop the sweeper. The cache itself stays readable.
    pub fn close(&self) {
        self.sweeper.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            description: None,
            input_schema: serde_json::json!({ "type": "object" }),
        }
    }

    #[tokio::test]
    async fn set_then_get_returns_copy() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.set_tools("srv", vec![tool("a")]);

        let mut copy = cache.get_tools("srv").expect("hit");
        copy.push(tool("b"));

        // Mutating the returned slice must not affect the cache.
        assert_eq!(cache.get_tools("srv").expect("hit").len(), 1);
    }

    #[tokio::test]
    async fn entry_expires_after_ttl() {
        let cache = MetadataCache::new(Duration::from_millis(50));
        cache.set_tools("srv", vec![tool("a")]);
        assert!(cache.get_tools("srv").is_some());

        time::sleep(Duration::from_millis(80)).await;
        assert!(cache.get_tools("srv").is_none());
    }

    #[tokio::test]
    async fn invalidate_kinds_are_independent() {
        let cache = MetadataCache::new(Duration::from_secs(60));
        cache.set_tools("srv", vec![tool("a")]);
        cache.set_prompts(
            "srv",
            vec![Prompt {
                name: "p".to_string(),
                description: None,
                arguments: Vec::new(),
            }],
        );

        cache.invalidate_tools("srv");
        assert!(cache.get_tools("srv").is_none());
        assert!(cache.get_prompts("srv").is_some());

        cache.invalidate_all("srv");
        assert!(cache.get_prompts("srv").is_none());
    }

    #[tokio::test]
    async fn set_replaces_with_fresh_expiry() {
        let cache = MetadataCache::new(Duration::from_millis(100));
        cache.set_tools("srv", vec![tool("a")]);
        time::sleep(Duration::from_millis(60)).await;
        cache.set_tools("srv", vec![tool("b")]);
        time::sleep(Duration::from_millis(60)).await;

        // The second set reset the clock, so the entry is still live.
        let tools = cache.get_tools("srv").expect("hit");
        assert_eq!(tools[0].name, "b");
    }
}
