use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use tabula_core::clock::Clock;
use tabula_core::domain::date_range::DateRange;
use tabula_core::domain::query::Filter;
use tabula_core::schema::SchemaRegistry;

/// Identity of a cached read: sheet, optional date window and the filter
/// list in its serialized form. Limits are deliberately not part of the key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    sheet: String,
    window: Option<(NaiveDate, NaiveDate)>,
    filters: String,
}

impl CacheKey {
    pub fn new(sheet: &str, date_range: Option<&DateRange>, filters: &[Filter]) -> Self {
        let filters = if filters.is_empty() {
            String::new()
        } else {
            serde_json::to_string(filters).unwrap_or_default()
        };
        Self {
            sheet: sheet.to_owned(),
            window: date_range.map(|range| (range.start(), range.end())),
            filters,
        }
    }

    pub fn sheet(&self) -> &str {
        &self.sheet
    }
}

/// Per-sheet TTLs derived from schema freshness classes.
#[derive(Clone, Debug)]
pub struct TtlPolicy {
    default_ttl: Duration,
    per_sheet: HashMap<String, Duration>,
}

impl TtlPolicy {
    pub fn new(default_ttl_secs: u64) -> Self {
        Self { default_ttl: secs(default_ttl_secs), per_sheet: HashMap::new() }
    }

    pub fn from_schema(schema: &SchemaRegistry, default_ttl_secs: u64) -> Self {
        let per_sheet = schema
            .sheets()
            .map(|sheet| (sheet.key.to_owned(), secs(sheet.freshness.ttl_secs())))
            .collect();
        Self { default_ttl: secs(default_ttl_secs), per_sheet }
    }

    pub fn with_sheet_ttl(mut self, sheet: &str, ttl_secs: u64) -> Self {
        self.per_sheet.insert(sheet.to_owned(), secs(ttl_secs));
        self
    }

    pub fn ttl_for(&self, sheet: &str) -> Duration {
        self.per_sheet.get(sheet).copied().unwrap_or(self.default_ttl)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1_000))
}

struct CacheEntry<T> {
    data: T,
    inserted_at: DateTime<Utc>,
    ttl: Duration,
    hits: AtomicU64,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.inserted_at > self.ttl
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Percentage (0-100) of lookups served from cache.
    pub hit_rate_pct: f64,
    pub evictions: u64,
}

/// Capacity-bounded TTL cache. Expired entries are dropped lazily on lookup
/// and by `sweep_expired`; inserting past capacity evicts the oldest entry.
pub struct DataCache<T> {
    entries: RwLock<HashMap<CacheKey, CacheEntry<T>>>,
    clock: Arc<dyn Clock>,
    policy: TtlPolicy,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl<T> DataCache<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(clock: Arc<dyn Clock>, policy: TtlPolicy, capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            policy,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<T> {
        let now = self.clock.now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    entry.hits.fetch_add(1, Ordering::Relaxed);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(event_name = "data.cache.hit", sheet = %key.sheet, "cache hit");
                    return Some(entry.data.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(event_name = "data.cache.miss", sheet = %key.sheet, "cache miss");
                    return None;
                }
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(event_name = "data.cache.expired", sheet = %key.sheet, "cache entry expired");
        None
    }

    pub async fn insert(&self, key: CacheKey, data: T) {
        let ttl = self.policy.ttl_for(&key.sheet);
        let entry = CacheEntry { data, inserted_at: self.clock.now(), ttl, hits: AtomicU64::new(0) };

        let mut entries = self.entries.write().await;
        entries.insert(key, entry);

        while entries.len() > self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else { break };
            entries.remove(&oldest);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(event_name = "data.cache.evicted", sheet = %oldest.sheet, "evicted oldest entry");
        }
    }

    /// Drops every entry for `sheet`; returns how many were removed.
    pub async fn invalidate(&self, sheet: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key.sheet != sheet);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
    }

    /// Removes entries whose TTL elapsed; returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Total hits recorded against currently cached entries.
    pub async fn entry_hits(&self) -> u64 {
        self.entries.read().await.values().map(|entry| entry.hits.load(Ordering::Relaxed)).sum()
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            entries: self.len().await,
            capacity: self.capacity,
            hits,
            misses,
            hit_rate_pct: if total > 0 { hits as f64 / total as f64 * 100.0 } else { 0.0 },
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
