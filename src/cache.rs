// Content cache: keyed entries with per-entry TTL, tag membership and
// single-flight coalescing of concurrent computations for the same key.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::ContentResult;
use crate::query::QueryOptions;

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        *self.now.lock() += Duration::seconds(secs);
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub hit_count: AtomicUsize,
    pub miss_count: AtomicUsize,
    pub expired_count: AtomicUsize,
    pub invalidated_count: AtomicUsize,
    pub eviction_count: AtomicUsize,
    pub computation_count: AtomicUsize,
    pub coalesced_count: AtomicUsize,
    pub failed_count: AtomicUsize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheStatsReport {
    pub items_count: usize,
    pub pending_count: usize,
    pub hit_count: usize,
    pub miss_count: usize,
    pub expired_count: usize,
    pub invalidated_count: usize,
    pub eviction_count: usize,
    pub computation_count: usize,
    pub coalesced_count: usize,
    pub failed_count: usize,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    ttl_seconds: u64,
    tags: HashSet<String>,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        let expires_at = i64::try_from(self.ttl_seconds)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl));
        match expires_at {
            Some(expires_at) => now < expires_at,
            // beyond the representable range: effectively never expires
            None => true,
        }
    }
}

// Entries and the tag index change together under one lock.
// Invalidation counters exist only for tags some computation is watching.
struct Store<V> {
    entries: HashMap<String, Arc<CacheEntry<V>>>,
    tag_index: HashMap<String, HashSet<String>>,
    tag_generations: HashMap<String, u64>,
    tag_watchers: HashMap<String, usize>,
}

impl<V> Store<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            tag_index: HashMap::new(),
            tag_generations: HashMap::new(),
            tag_watchers: HashMap::new(),
        }
    }

    fn insert(&mut self, key: String, entry: Arc<CacheEntry<V>>) {
        self.remove(&key);
        for tag in &entry.tags {
            self.tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.clone());
        }
        self.entries.insert(key, entry);
    }

    fn remove(&mut self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(bucket) = self.tag_index.get_mut(tag) {
                bucket.remove(key);
                if bucket.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        Some(entry)
    }

    fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn oldest_key(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(key, _)| key.clone())
    }

    // Sum of invalidation counters; changes iff one of the tags was invalidated
    fn generation(&self, tags: &[String]) -> u64 {
        tags.iter()
            .filter_map(|tag| self.tag_generations.get(tag))
            .sum()
    }

    fn watch(&mut self, tags: &[String]) -> u64 {
        for tag in tags {
            *self.tag_watchers.entry(tag.clone()).or_insert(0) += 1;
        }
        self.generation(tags)
    }

    fn unwatch(&mut self, tags: &[String]) {
        for tag in tags {
            let Some(count) = self.tag_watchers.get_mut(tag) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.tag_watchers.remove(tag);
                self.tag_generations.remove(tag);
            }
        }
    }

    fn bump_generation(&mut self, tag: &str) {
        if self.tag_watchers.contains_key(tag) {
            *self.tag_generations.entry(tag.to_string()).or_insert(0) += 1;
        }
    }
}

type Outcome<V> = Option<ContentResult<V>>;

// Owned by the computing caller. Dropping it (completion, error or
// cancellation) frees the pending slot before the channel closes.
struct PendingSlot<'a, V> {
    pending: &'a DashMap<String, watch::Receiver<Outcome<V>>>,
    key: &'a str,
    tx: watch::Sender<Outcome<V>>,
}

impl<V> Drop for PendingSlot<'_, V> {
    fn drop(&mut self) {
        self.pending.remove(self.key);
    }
}

// Held by the computing caller for the duration of `compute`
struct TagWatch<'a, V> {
    store: &'a RwLock<Store<V>>,
    tags: &'a [String],
    generation: u64,
}

impl<'a, V> TagWatch<'a, V> {
    fn new(store: &'a RwLock<Store<V>>, tags: &'a [String]) -> Self {
        let generation = store.write().watch(tags);
        Self {
            store,
            tags,
            generation,
        }
    }
}

impl<V> Drop for TagWatch<'_, V> {
    fn drop(&mut self) {
        self.store.write().unwatch(self.tags);
    }
}

enum Role<V> {
    Leader(watch::Sender<Outcome<V>>),
    Follower(watch::Receiver<Outcome<V>>),
}

pub struct ContentCache<V> {
    store: RwLock<Store<V>>,
    pending: DashMap<String, watch::Receiver<Outcome<V>>>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    stats: CacheStats,
}

impl<V> ContentCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(Store::new()),
            pending: DashMap::new(),
            clock,
            config,
            stats: CacheStats::default(),
        }
    }

    /// Returns the live value for `key`, or runs `compute` to produce it.
    ///
    /// Concurrent callers for the same key share one execution of `compute`
    /// and all receive its outcome, errors included. Errors are never
    /// stored. A `ttl_seconds` of zero still coalesces callers but stores
    /// nothing. If the computing caller is dropped mid-flight, one of the
    /// waiting callers takes over with its own `compute`.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl_seconds: u64,
        tags: &[String],
        compute: F,
    ) -> ContentResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ContentResult<V>>,
    {
        let tx = loop {
            if let Some(value) = self.lookup(key) {
                self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
                debug!(key, "cache hit");
                return Ok(value);
            }

            let role = match self.pending.entry(key.to_string()) {
                Entry::Occupied(e) => Role::Follower(e.get().clone()),
                Entry::Vacant(e) => {
                    let (tx, rx) = watch::channel(None);
                    e.insert(rx);
                    Role::Leader(tx)
                }
            };

            match role {
                Role::Leader(tx) => break tx,
                Role::Follower(mut rx) => {
                    self.stats.coalesced_count.fetch_add(1, Ordering::SeqCst);
                    debug!(key, "joining in-flight computation");
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(result) => return result,
                        None => debug!(key, "in-flight computation abandoned, retrying"),
                    }
                }
            }
        };

        let slot = PendingSlot {
            pending: &self.pending,
            key,
            tx,
        };

        // A previous computation may have stored between our lookup and election
        if let Some(value) = self.lookup(key) {
            self.stats.hit_count.fetch_add(1, Ordering::SeqCst);
            let _ = slot.tx.send(Some(Ok(value.clone())));
            return Ok(value);
        }

        self.stats.miss_count.fetch_add(1, Ordering::SeqCst);
        self.stats.computation_count.fetch_add(1, Ordering::SeqCst);
        let watch = TagWatch::new(&self.store, tags);
        debug!(key, ttl_seconds, "cache miss, computing");

        let result = compute().await;
        match &result {
            Ok(value) => self.store_value(key, value.clone(), ttl_seconds, tags, watch.generation),
            Err(err) => {
                self.stats.failed_count.fetch_add(1, Ordering::SeqCst);
                warn!(key, error = %err, "computation failed, nothing cached");
            }
        }

        let _ = slot.tx.send(Some(result.clone()));
        result
    }

    // Live value without computing; expired entries are dropped on the way
    pub fn get(&self, key: &str) -> Option<V> {
        self.lookup(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Removes every entry carrying at least one of `tags`. Returns how many
    /// entries were removed.
    pub fn invalidate<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let mut store = self.store.write();
        let mut doomed = HashSet::new();
        for tag in tags {
            let tag = tag.as_ref();
            store.bump_generation(tag);
            if let Some(keys) = store.tag_index.get(tag) {
                doomed.extend(keys.iter().cloned());
            }
        }
        for key in &doomed {
            store.remove(key);
        }
        drop(store);

        self.stats
            .invalidated_count
            .fetch_add(doomed.len(), Ordering::SeqCst);
        debug!(
            tags = ?tags.iter().map(|t| t.as_ref()).collect::<Vec<&str>>(),
            removed = doomed.len(),
            "invalidated cache tags"
        );
        doomed.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = self.store.write().purge_expired(now);
        self.stats.expired_count.fetch_add(removed, Ordering::SeqCst);
        removed
    }

    pub fn clear(&self) {
        let mut store = self.store.write();
        store.entries.clear();
        store.tag_index.clear();
    }

    pub fn len(&self) -> usize {
        self.store.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn keys_for_tag(&self, tag: &str) -> Vec<String> {
        let store = self.store.read();
        let mut keys: Vec<String> = store
            .tag_index
            .get(tag)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            items_count: self.len(),
            pending_count: self.pending_count(),
            hit_count: self.stats.hit_count.load(Ordering::SeqCst),
            miss_count: self.stats.miss_count.load(Ordering::SeqCst),
            expired_count: self.stats.expired_count.load(Ordering::SeqCst),
            invalidated_count: self.stats.invalidated_count.load(Ordering::SeqCst),
            eviction_count: self.stats.eviction_count.load(Ordering::SeqCst),
            computation_count: self.stats.computation_count.load(Ordering::SeqCst),
            coalesced_count: self.stats.coalesced_count.load(Ordering::SeqCst),
            failed_count: self.stats.failed_count.load(Ordering::SeqCst),
        }
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        {
            let store = self.store.read();
            match store.entries.get(key) {
                None => return None,
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        let mut store = self.store.write();
        let expired = store
            .entries
            .get(key)
            .map_or(false, |entry| !entry.is_live(now));
        if expired {
            store.remove(key);
            self.stats.expired_count.fetch_add(1, Ordering::SeqCst);
            debug!(key, "cache entry expired");
        }
        None
    }

    fn store_value(
        &self,
        key: &str,
        value: V,
        ttl_seconds: u64,
        tags: &[String],
        generation: u64,
    ) {
        if ttl_seconds == 0 {
            return;
        }

        let now = self.clock.now();
        let mut store = self.store.write();
        if store.generation(tags) != generation {
            debug!(key, "tags invalidated during computation, result not stored");
            return;
        }

        if !store.entries.contains_key(key) && store.entries.len() >= self.config.max_entries {
            let expired = store.purge_expired(now);
            self.stats.expired_count.fetch_add(expired, Ordering::SeqCst);
            while store.entries.len() >= self.config.max_entries {
                let Some(oldest) = store.oldest_key() else {
                    break;
                };
                store.remove(&oldest);
                self.stats.eviction_count.fetch_add(1, Ordering::SeqCst);
                debug!(key = %oldest, "evicted oldest entry to make room");
            }
        }

        let entry = CacheEntry {
            value,
            created_at: now,
            ttl_seconds,
            tags: tags.iter().cloned().collect(),
        };
        store.insert(key.to_string(), Arc::new(entry));
    }
}

/// Derives the cache key for an accessor call.
///
/// The options part is the canonical JSON of the query, so two option sets
/// that differ only in construction order or in equality shorthand map to
/// the same key.
pub fn build_key(entity_type: &str, locale: &str, options: &QueryOptions) -> String {
    format!("{entity_type}:{locale}:{}", options.canonical())
}
