//! In-memory response cache keyed by a semantic request fingerprint.
//!
//! The fingerprint covers everything that changes what Ollama would
//! return: model, the ordered message list (string vs. structured content
//! preserved), temperature, max_tokens, tools, functions, and tool_choice.
//! Streaming responses are never stored. Entries are evicted LRU once the
//! size cap is reached; eviction is a memory bound, not a correctness
//! concern.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;

use bytes::Bytes;
use sha2::Digest;
use sha2::Sha256;

use crate::openai::ChatCompletionRequest;

pub const DEFAULT_MAX_ENTRIES: usize = 1024;

struct CacheEntry {
    body: Bytes,
    last_used: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    use_counter: u64,
}

pub struct ResponseCache {
    max_entries: usize,
    state: Mutex<CacheState>,
}

fn lock(state: &Mutex<CacheState>) -> MutexGuard<'_, CacheState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Canonical fingerprint of the semantically significant request fields.
/// Message order is significant; two requests differing only in message
/// order hash differently.
pub fn fingerprint(request: &ChatCompletionRequest) -> String {
    let canonical = serde_json::json!({
        "model": request.model,
        "messages": request.messages,
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
        "tools": request.tools,
        "functions": request.functions,
        "tool_choice": request.tool_choice,
    });
    let serialized = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&serialized);
    format!("{digest:x}")
}

impl ResponseCache {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries: max_entries.max(1),
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                use_counter: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut state = lock(&self.state);
        state.use_counter += 1;
        let stamp = state.use_counter;
        let entry = state.entries.get_mut(key)?;
        entry.last_used = stamp;
        Some(entry.body.clone())
    }

    pub fn set(&self, key: String, body: Bytes) {
        let mut state = lock(&self.state);
        state.use_counter += 1;
        let stamp = state.use_counter;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.max_entries {
            if let Some(oldest) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone())
            {
                state.entries.remove(&oldest);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                body,
                last_used: stamp,
            },
        );
    }

    pub fn clear(&self) {
        lock(&self.state).entries.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openai::ChatMessage;
    use crate::openai::MessageContent;
    use pretty_assertions::assert_eq;

    fn request(messages: Vec<&str>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "llama2".to_string(),
            messages: messages
                .into_iter()
                .map(|text| ChatMessage {
                    role: "user".to_string(),
                    content: Some(MessageContent::Text(text.to_string())),
                    tool_calls: None,
                    tool_call_id: None,
                })
                .collect(),
            stream: None,
            temperature: None,
            max_tokens: None,
            tools: None,
            functions: None,
            tool_choice: None,
        }
    }

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(
            fingerprint(&request(vec!["a", "b"])),
            fingerprint(&request(vec!["a", "b"]))
        );
    }

    #[test]
    fn message_order_is_significant() {
        assert_ne!(
            fingerprint(&request(vec!["a", "b"])),
            fingerprint(&request(vec!["b", "a"]))
        );
    }

    #[test]
    fn temperature_changes_the_fingerprint() {
        let base = request(vec!["a"]);
        let mut warmer = request(vec!["a"]);
        warmer.temperature = Some(0.9);
        assert_ne!(fingerprint(&base), fingerprint(&warmer));
    }

    #[test]
    fn set_then_get_round_trips_bytes() {
        let cache = ResponseCache::new(8);
        let key = fingerprint(&request(vec!["a"]));
        let body = Bytes::from_static(b"{\"ok\":true}");
        cache.set(key.clone(), body.clone());
        assert_eq!(cache.get(&key), Some(body));
    }

    #[test]
    fn lru_eviction_respects_the_cap() {
        let cache = ResponseCache::new(2);
        cache.set("a".to_string(), Bytes::from_static(b"1"));
        cache.set("b".to_string(), Bytes::from_static(b"2"));
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get("a");
        cache.set("c".to_string(), Bytes::from_static(b"3"));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn clear_empties_the_cache() {
        let cache = ResponseCache::new(8);
        cache.set("a".to_string(), Bytes::from_static(b"1"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
