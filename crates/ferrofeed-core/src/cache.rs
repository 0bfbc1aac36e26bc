//! TTL cache for slow-changing provider reports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    expires_at: Instant,
}

#[derive(Debug)]
struct CacheInner {
    map: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CacheInner {
    fn get(&self, key: &str) -> Option<Value> {
        self.map
            .get(key)
            .filter(|entry| Instant::now() <= entry.expires_at)
            .map(|entry| entry.payload.clone())
    }

    fn put(&mut self, key: String, payload: Value) {
        let expires_at = Instant::now() + self.ttl;
        self.map.insert(key, CacheEntry { payload, expires_at });
    }

    fn clear_expired(&mut self) {
        let now = Instant::now();
        self.map.retain(|_, entry| entry.expires_at > now);
    }
}

/// Thread-safe response cache keyed by endpoint, symbol and parameters.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    inner: Arc<tokio::sync::RwLock<CacheInner>>,
    hits: Arc<AtomicU64>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(CacheInner {
                map: HashMap::new(),
                ttl,
            })),
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A zero TTL turns every operation into a no-op.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Parameter order does not affect the key.
    pub fn key(endpoint: &str, symbol: &str, params: &[(String, String)]) -> String {
        let mut params: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        params.sort();
        format!("{endpoint}|{symbol}|{}", params.join("&"))
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let store = self.inner.read().await;
        let found = store.get(key);
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub async fn put(&self, key: String, payload: Value) {
        let mut store = self.inner.write().await;
        if store.ttl == Duration::ZERO {
            return;
        }
        store.clear_expired();
        store.put(key, payload);
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}
