//! Bounded TTL+LRU cache for list-of-kind payloads.
//!
//! One map per kind plus a shared access-order list. Every mutation happens
//! under one exclusive lock; `get` also takes it because a hit must touch the
//! access-order list. The order update is an O(n) list splice, which is fine
//! for capacities in the low thousands.
//!
//! Invariants, checked by the test suite:
//! 1. `|access order| == Σ |kind maps|`, with no duplicate keys.
//! 2. Eviction removes the least-recently-accessed key everywhere at once.
//! 3. `hits + misses` equals the number of `get` calls.
//! 4. Total entries never exceed the configured capacity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::resource::Resource;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_CAPACITY: usize = 1000;
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Cache key for a list-of-kind result. The context component keeps
/// multi-cluster payloads from aliasing; a cluster-scoped or all-namespace
/// list uses `"*"` as its namespace component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: String,
    pub context: String,
    pub namespace: String,
}

impl CacheKey {
    pub fn new(
        kind: impl Into<String>,
        context: impl Into<String>,
        namespace: Option<&str>,
    ) -> Self {
        Self {
            kind: kind.into(),
            context: context.into(),
            namespace: namespace.unwrap_or("*").to_string(),
        }
    }
}

struct CacheEntry {
    payload: Arc<Vec<Resource>>,
    fetched_at: Instant,
    #[allow(dead_code)] // kept for watch bookmark resumption
    resource_version: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    /// Fraction of `get` calls served from a fresh entry; 0.0 when unused.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.hits as f64 / total as f64;
        ratio
    }
}

#[derive(Default)]
struct CacheInner {
    /// Per-kind entry maps, keyed by (context, namespace).
    kinds: HashMap<String, HashMap<(String, String), CacheEntry>>,
    /// Shared access order; front is least recently used.
    access: Vec<CacheKey>,
    entries: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.access.iter().position(|k| k == key) {
            let key = self.access.remove(pos);
            self.access.push(key);
        }
    }

    fn remove_key(&mut self, key: &CacheKey) -> bool {
        let removed = self
            .kinds
            .get_mut(&key.kind)
            .and_then(|m| m.remove(&(key.context.clone(), key.namespace.clone())))
            .is_some();
        if removed {
            if let Some(pos) = self.access.iter().position(|k| k == key) {
                self.access.remove(pos);
            }
            self.entries -= 1;
        }
        removed
    }

    fn evict_lru(&mut self) {
        if self.access.is_empty() {
            return;
        }
        let victim = self.access[0].clone();
        if self.remove_key(&victim) {
            self.evictions += 1;
            debug!(kind = %victim.kind, context = %victim.context, namespace = %victim.namespace, "cache eviction");
        }
    }
}

pub struct ResourceCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl ResourceCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up a fresh entry. A stale or absent entry is a miss; a hit moves
    /// the key to the back of the access order.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<Resource>>> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let fresh = inner
            .kinds
            .get(&key.kind)
            .and_then(|m| m.get(&(key.context.clone(), key.namespace.clone())))
            .filter(|e| e.fetched_at.elapsed() <= self.ttl)
            .map(|e| Arc::clone(&e.payload));
        match fresh {
            Some(payload) => {
                inner.touch(key);
                inner.hits += 1;
                Some(payload)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Look up an entry ignoring TTL, without touching metrics or the access
    /// order. Used when a fetch fails and stale data is better than none;
    /// the returned age lets the caller surface freshness.
    pub fn peek(&self, key: &CacheKey) -> Option<(Arc<Vec<Resource>>, Duration)> {
        let inner = self.inner.lock().expect("cache lock poisoned");
        inner
            .kinds
            .get(&key.kind)
            .and_then(|m| m.get(&(key.context.clone(), key.namespace.clone())))
            .map(|e| (Arc::clone(&e.payload), e.fetched_at.elapsed()))
    }

    /// Store a payload. Capacity is enforced before inserting a new key:
    /// the LRU key is evicted from every map and from the order list until
    /// there is room. Replacing an existing key refreshes it in place.
    pub fn set(&self, key: &CacheKey, payload: Vec<Resource>, resource_version: impl Into<String>) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let entry = CacheEntry {
            payload: Arc::new(payload),
            fetched_at: Instant::now(),
            resource_version: resource_version.into(),
        };
        let map_key = (key.context.clone(), key.namespace.clone());
        let exists = inner
            .kinds
            .get(&key.kind)
            .is_some_and(|m| m.contains_key(&map_key));
        if exists {
            if let Some(map) = inner.kinds.get_mut(&key.kind) {
                map.insert(map_key, entry);
            }
            inner.touch(key);
            return;
        }
        while inner.entries >= self.capacity {
            inner.evict_lru();
        }
        inner
            .kinds
            .entry(key.kind.clone())
            .or_default()
            .insert(map_key, entry);
        inner.access.push(key.clone());
        inner.entries += 1;
    }

    /// Drop every entry whose namespace component matches, in all contexts
    /// and for all kinds.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.invalidate_where(|k| k.namespace == namespace)
    }

    /// Drop every entry belonging to a context (used on context switches).
    pub fn invalidate_context(&self, context: &str) -> usize {
        self.invalidate_where(|k| k.context == context)
    }

    /// Drop a single key, if present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.remove_key(key)
    }

    fn invalidate_where(&self, pred: impl Fn(&CacheKey) -> bool) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let victims: Vec<CacheKey> = inner.access.iter().filter(|k| pred(k)).cloned().collect();
        let mut removed = 0;
        for key in &victims {
            if inner.remove_key(key) {
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.kinds.clear();
        inner.access.clear();
        inner.entries = 0;
    }

    /// Remove entries whose TTL has elapsed. Each removal counts as an
    /// eviction. Returns how many entries were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        let mut victims = Vec::new();
        for (kind, map) in &inner.kinds {
            for ((context, namespace), entry) in map {
                if entry.fetched_at.elapsed() > self.ttl {
                    victims.push(CacheKey {
                        kind: kind.clone(),
                        context: context.clone(),
                        namespace: namespace.clone(),
                    });
                }
            }
        }
        let mut removed = 0;
        for key in &victims {
            if inner.remove_key(key) {
                inner.evictions += 1;
                removed += 1;
            }
        }
        removed
    }

    pub fn metrics(&self) -> CacheMetrics {
        let inner = self.inner.lock().expect("cache lock poisoned");
        CacheMetrics {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            entries: inner.entries,
        }
    }

    /// Number of cached entries across all kinds.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The access-order list, oldest first. Exposed for invariant tests.
    pub fn access_order(&self) -> Vec<CacheKey> {
        self.inner.lock().expect("cache lock poisoned").access.clone()
    }

    /// Periodic cleanup task; stops when the token is cancelled.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = cache.cleanup_expired();
                        if removed > 0 {
                            debug!(removed, "cache cleanup");
                        }
                    }
                }
            }
        });
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_TTL)
    }
}
