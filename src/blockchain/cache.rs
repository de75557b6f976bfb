// src/blockchain/cache.rs

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tracing::debug;

/// Identity of a fully-resolved upstream request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    chain: String,
    endpoint: String,
    params: String,
}

impl CacheKey {
    /// `endpoint` should already be qualified by provider so that two providers
    /// answering the same question never share an entry.
    pub fn new(chain: &str, endpoint: impl Into<String>, params: &Value) -> Self {
        let mut canonical = String::new();
        write_canonical(params, &mut canonical);
        Self {
            chain: chain.to_string(),
            endpoint: endpoint.into(),
            params: canonical,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Serialize with object keys sorted, independent of map ordering features.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    inserted_at: Instant,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

struct CacheInner {
    capacity: usize,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    // One async lock per key being fetched, so concurrent misses share a fetch.
    in_flight: DashMap<CacheKey, Arc<AsyncMutex<()>>>,
}

/// TTL- and capacity-bounded cache in front of provider calls.
///
/// When full, the entry closest to expiry is evicted. Failed fetches are never stored.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                capacity,
                entries: Mutex::new(HashMap::new()),
                in_flight: DashMap::new(),
            }),
        }
    }

    /// Return the live entry for `key`, or run `fetch` once and store its result for `ttl`.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: CacheKey, ttl: Duration, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(hit) = self.lookup(&key) {
            debug!(endpoint = %key.endpoint, "cache hit");
            return Ok(hit);
        }

        let key_lock = self
            .inner
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();

        let result = {
            let _guard = key_lock.lock().await;
            // Another caller may have filled the entry while we waited.
            match self.lookup(&key) {
                Some(hit) => Ok(hit),
                None => {
                    debug!(endpoint = %key.endpoint, "cache miss, fetching");
                    match fetch().await {
                        Ok(payload) => {
                            self.insert(key.clone(), payload.clone(), ttl);
                            Ok(payload)
                        }
                        Err(err) => Err(err),
                    }
                }
            }
        };

        drop(key_lock);
        self.inner
            .in_flight
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// True if a live entry exists for `key`.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = Instant::now();
        self.entries()
            .get(key)
            .map(|entry| entry.is_live(now))
            .unwrap_or(false)
    }

    /// Drop the entry for `key`, live or not. Used when a stored payload turns
    /// out to be unusable.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries().remove(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of the live entries.
    pub fn keys(&self) -> Vec<CacheKey> {
        let now = Instant::now();
        self.entries()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let now = Instant::now();
        let mut entries = self.entries();
        match entries.get(key).map(|entry| entry.is_live(now)) {
            Some(true) => entries.get(key).map(|entry| entry.payload.clone()),
            Some(false) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: CacheKey, payload: Value, ttl: Duration) {
        if self.inner.capacity == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries();
        entries.retain(|_, entry| entry.is_live(now));

        if !entries.contains_key(&key) && entries.len() >= self.inner.capacity {
            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| (entry.expires_at, entry.inserted_at))
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                debug!(endpoint = %victim.endpoint, "evicting entry nearest expiry");
                entries.remove(&victim);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: now,
                expires_at: now + ttl,
            },
        );
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.inner.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(name: &str) -> CacheKey {
        CacheKey::new("eth", format!("indexer:/{}", name), &json!({}))
    }

    async fn counted(counter: &AtomicUsize, payload: Value) -> Result<Value, String> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(payload)
    }

    #[test]
    fn key_ignores_parameter_order() {
        let a = CacheKey::new("eth", "explorer:account/tokentx", &json!({"address": "0xabc", "page": "1"}));
        let b = CacheKey::new("eth", "explorer:account/tokentx", &json!({"page": "1", "address": "0xabc"}));
        let other_chain = CacheKey::new("polygon", "explorer:account/tokentx", &json!({"page": "1", "address": "0xabc"}));
        assert_eq!(a, b);
        assert_ne!(a, other_chain);
    }

    #[tokio::test(start_paused = true)]
    async fn serves_within_ttl_and_refetches_after() {
        let cache = ResponseCache::new(8);
        let fetches = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        let first = cache.get_or_fetch(key("a"), ttl, || counted(&fetches, json!(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        let second = cache.get_or_fetch(key("a"), ttl, || counted(&fetches, json!(2))).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let third = cache.get_or_fetch(key("a"), ttl, || counted(&fetches, json!(3))).await.unwrap();
        assert_eq!(third, json!(3));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_not_cached() {
        let cache = ResponseCache::new(8);
        let fetches = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        let failed: Result<Value, String> = cache
            .get_or_fetch(key("a"), ttl, || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Err("HTTP 500".to_string())
            })
            .await;
        assert!(failed.is_err());
        assert!(cache.is_empty());

        let ok = cache.get_or_fetch(key("a"), ttl, || counted(&fetches, json!("ok"))).await.unwrap();
        assert_eq!(ok, json!("ok"));
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_entry_nearest_expiry() {
        let cache = ResponseCache::new(2);
        let fetches = AtomicUsize::new(0);

        cache.get_or_fetch(key("short"), Duration::from_secs(10), || counted(&fetches, json!("a"))).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_fetch(key("long"), Duration::from_secs(100), || counted(&fetches, json!("b"))).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get_or_fetch(key("new"), Duration::from_secs(50), || counted(&fetches, json!("c"))).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&key("short")));
        assert!(cache.contains(&key("long")));
        assert!(cache.contains(&key("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_is_by_expiry_not_recency() {
        let cache = ResponseCache::new(2);
        let fetches = AtomicUsize::new(0);

        cache.get_or_fetch(key("old-far"), Duration::from_secs(300), || counted(&fetches, json!(1))).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.get_or_fetch(key("recent-near"), Duration::from_secs(10), || counted(&fetches, json!(2))).await.unwrap();
        cache.get_or_fetch(key("third"), Duration::from_secs(60), || counted(&fetches, json!(3))).await.unwrap();

        assert!(cache.contains(&key("old-far")));
        assert!(!cache.contains(&key("recent-near")));
        assert!(cache.contains(&key("third")));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_share_one_fetch() {
        let cache = ResponseCache::new(8);
        let fetches = AtomicUsize::new(0);
        let ttl = Duration::from_secs(60);

        let slow_fetch = || async {
            fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, String>(json!("payload"))
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch(key("a"), ttl, slow_fetch),
            cache.get_or_fetch(key("a"), ttl, slow_fetch),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }
}
