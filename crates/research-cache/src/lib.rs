use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use arena_core::{Briefing, ResearchType};

/// Cache key: one briefing per (symbol, research type).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub research_type: ResearchType,
}

impl CacheKey {
    pub fn new(symbol: &str, research_type: ResearchType) -> Self {
        Self {
            symbol: symbol.to_string(),
            research_type,
        }
    }

    fn id(&self) -> String {
        format!("{}:{}", self.symbol, self.research_type.as_str())
    }

    /// Content-addressed persistence file name.
    fn file_name(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id().as_bytes());
        format!("{}.json", hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub symbol: String,
    pub briefing: Briefing,
    pub research_type: ResearchType,
    pub model_used: String,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cost: f64,
}

/// Running counters for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    /// Estimated spend: every miss paid for one research run.
    pub cost_spent: f64,
    /// Estimated avoidance: every hit skipped one research run.
    pub cost_saved: f64,
}

/// Outcome of asking for the fill slot of a key.
pub enum FillSlot {
    /// Somebody filled the key while we waited; use their entry.
    Ready(CacheEntry),
    /// The caller owns the fill; complete it via `complete_fill`.
    MustFill(FillPermit),
    /// Non-blocking mode only: another fill is in flight.
    Busy,
}

/// Exclusive right to fill one key. Dropping it without completing
/// releases the slot without writing.
pub struct FillPermit {
    id: String,
    _guard: OwnedMutexGuard<()>,
}

/// TTL-keyed briefing cache, shared across agents.
///
/// Disk persistence is one file per key under `dir`, loaded on
/// construction; writes are best-effort and never fail the in-memory put.
pub struct ResearchCache {
    entries: DashMap<String, CacheEntry>,
    inflight: DashMap<String, Arc<Mutex<()>>>,
    dir: PathBuf,
    cost_per_research: f64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResearchCache {
    pub fn new(dir: impl AsRef<Path>, cost_per_research: f64) -> Self {
        let cache = Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            dir: dir.as_ref().to_path_buf(),
            cost_per_research,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        };
        cache.load_from_disk();
        cache
    }

    fn load_from_disk(&self) {
        let Ok(dir) = std::fs::read_dir(&self.dir) else {
            return;
        };
        let mut loaded = 0usize;
        for entry in dir.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok())
            {
                Some(cached) => {
                    self.entries.insert(cached.key.clone(), cached);
                    loaded += 1;
                }
                None => {
                    tracing::warn!(path = %path.display(), "skipping corrupt cache file");
                }
            }
        }
        if loaded > 0 {
            tracing::info!(loaded, "research cache warmed from disk");
        }
    }

    /// Fresh entry or counted miss. Expiry is strict: an entry whose
    /// `expires_at` equals now is already a miss, and is lazily evicted.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let id = key.id();
        let now = Utc::now();

        // Clone out of the shard guard before any mutation of the map
        let (fresh, expired) = match self.entries.get(&id) {
            Some(entry) if now < entry.expires_at => (Some(entry.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };

        if let Some(entry) = fresh {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }
        if expired {
            self.entries.remove(&id);
            self.remove_file(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Entry regardless of TTL, for the orchestrator's optional stale
    /// fallback. Does not touch the counters.
    pub fn get_stale(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(&key.id()).map(|e| e.clone())
    }

    /// Acquire the single-flight fill slot for `key`, waiting for any
    /// in-flight fill. Re-checks the store after the wait so late
    /// arrivals reuse the winner's entry.
    pub async fn begin_fill(&self, key: &CacheKey) -> FillSlot {
        let id = key.id();
        let lock = self
            .inflight
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;

        let now = Utc::now();
        if let Some(entry) = self.entries.get(&id) {
            if now < entry.expires_at {
                return FillSlot::Ready(entry.clone());
            }
        }
        FillSlot::MustFill(FillPermit { id, _guard: guard })
    }

    /// Fill slot for a forced refresh: waits like `begin_fill` but never
    /// short-circuits on an existing fresh entry.
    pub async fn begin_refresh(&self, key: &CacheKey) -> FillPermit {
        let id = key.id();
        let lock = self
            .inflight
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        FillPermit { id, _guard: guard }
    }

    /// Non-blocking variant: report Busy instead of waiting.
    pub fn try_begin_fill(&self, key: &CacheKey) -> FillSlot {
        let id = key.id();
        let lock = self
            .inflight
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        match lock.try_lock_owned() {
            Ok(guard) => {
                let now = Utc::now();
                if let Some(entry) = self.entries.get(&id) {
                    if now < entry.expires_at {
                        return FillSlot::Ready(entry.clone());
                    }
                }
                FillSlot::MustFill(FillPermit { id, _guard: guard })
            }
            Err(_) => FillSlot::Busy,
        }
    }

    /// Store the filled entry and release the slot. Last writer wins by
    /// construction: only one permit per key exists at a time.
    pub async fn complete_fill(&self, permit: FillPermit, entry: CacheEntry) {
        debug_assert_eq!(permit.id, entry.key);
        self.entries.insert(entry.key.clone(), entry.clone());
        self.persist(&entry).await;
        // permit guard drops here, releasing the key's slot
    }

    async fn persist(&self, entry: &CacheEntry) {
        let key = CacheKey::new(&entry.symbol, entry.research_type);
        let path = self.dir.join(key.file_name());
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(error = %e, "cache dir creation failed; in-memory only");
            return;
        }
        let payload = match serde_json::to_vec_pretty(entry) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "cache entry serialization failed");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(&path, payload).await {
            tracing::warn!(path = %path.display(), error = %e, "cache persist failed; in-memory only");
        }
    }

    fn remove_file(&self, key: &CacheKey) {
        let path = self.dir.join(key.file_name());
        let _ = std::fs::remove_file(path);
    }

    /// Drop every entry for one symbol. Idempotent.
    pub fn invalidate(&self, symbol: &str) {
        let doomed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.symbol == symbol)
            .map(|e| e.key().clone())
            .collect();
        for id in doomed {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.remove_file(&CacheKey::new(&entry.symbol, entry.research_type));
            }
        }
        tracing::info!(symbol, "research cache invalidated for symbol");
    }

    /// Drop everything, e.g. on a market-wide event. Idempotent.
    pub fn invalidate_all(&self, reason: &str) {
        let doomed: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in doomed {
            if let Some((_, entry)) = self.entries.remove(&id) {
                self.remove_file(&CacheKey::new(&entry.symbol, entry.research_type));
            }
        }
        tracing::warn!(reason, "research cache fully invalidated");
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        CacheMetrics {
            hits,
            misses,
            cost_spent: misses as f64 * self.cost_per_research,
            cost_saved: hits as f64 * self.cost_per_research,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arena_core::Recommendation;
    use chrono::Duration;

    fn entry_for(key: &CacheKey, ttl_secs: i64) -> CacheEntry {
        let briefing = Briefing::degraded(&key.symbol, key.research_type, "test-model", "seed");
        let now = Utc::now();
        CacheEntry {
            key: format!("{}:{}", key.symbol, key.research_type.as_str()),
            symbol: key.symbol.clone(),
            briefing,
            research_type: key.research_type,
            model_used: "test-model".to_string(),
            quality_score: 70.0,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_secs),
            cost: 0.05,
        }
    }

    async fn fill(cache: &ResearchCache, key: &CacheKey, ttl_secs: i64) {
        match cache.begin_fill(key).await {
            FillSlot::MustFill(permit) => {
                cache.complete_fill(permit, entry_for(key, ttl_secs)).await;
            }
            _ => panic!("expected to own the fill"),
        }
    }

    #[tokio::test]
    async fn hit_returns_exact_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResearchCache::new(dir.path(), 0.05);
        let key = CacheKey::new("SAP.DE", ResearchType::Complete);

        assert!(cache.get(&key).is_none());
        fill(&cache, &key, 3600).await;

        let first = cache.get(&key).unwrap();
        let second = cache.get(&key).unwrap();
        assert_eq!(first, second);

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 2);
        assert_eq!(metrics.misses, 1);
        assert!((metrics.cost_spent - 0.05).abs() < 1e-12);
        assert!((metrics.cost_saved - 0.10).abs() < 1e-12);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResearchCache::new(dir.path(), 0.05);
        let key = CacheKey::new("BMW.DE", ResearchType::Technical);

        fill(&cache, &key, -1).await;
        assert!(cache.get(&key).is_none());
        // Lazy eviction removed it entirely
        assert!(cache.get_stale(&key).is_none());
    }

    #[tokio::test]
    async fn entry_expiring_now_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResearchCache::new(dir.path(), 0.05);
        let key = CacheKey::new("BAS.DE", ResearchType::Complete);

        // expires_at == now (within clock resolution): strict inequality
        fill(&cache, &key, 0).await;
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn persistence_survives_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        let key = CacheKey::new("SIE.DE", ResearchType::Complete);
        {
            let cache = ResearchCache::new(dir.path(), 0.05);
            fill(&cache, &key, 3600).await;
        }
        let warmed = ResearchCache::new(dir.path(), 0.05);
        assert_eq!(warmed.len(), 1);
        let entry = warmed.get(&key).unwrap();
        assert_eq!(entry.symbol, "SIE.DE");
    }

    #[tokio::test]
    async fn invalidate_symbol_only_hits_that_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResearchCache::new(dir.path(), 0.05);
        let sap = CacheKey::new("SAP.DE", ResearchType::Complete);
        let sap_tech = CacheKey::new("SAP.DE", ResearchType::Technical);
        let bmw = CacheKey::new("BMW.DE", ResearchType::Complete);

        fill(&cache, &sap, 3600).await;
        fill(&cache, &sap_tech, 3600).await;
        fill(&cache, &bmw, 3600).await;

        cache.invalidate("SAP.DE");
        assert!(cache.get(&sap).is_none());
        assert!(cache.get(&sap_tech).is_none());
        assert!(cache.get(&bmw).is_some());

        // Idempotent
        cache.invalidate("SAP.DE");
        assert!(cache.get(&sap).is_none());
    }

    #[tokio::test]
    async fn invalidate_all_empties_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResearchCache::new(dir.path(), 0.05);
        fill(&cache, &CacheKey::new("SAP.DE", ResearchType::Complete), 3600).await;
        fill(&cache, &CacheKey::new("BMW.DE", ResearchType::Complete), 3600).await;

        cache.invalidate_all("rate decision");
        assert!(cache.is_empty());
        cache.invalidate_all("rate decision");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn single_flight_blocks_duplicate_fills() {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ResearchCache::new(dir.path(), 0.05));
        let key = CacheKey::new("RWE.DE", ResearchType::Complete);

        let permit = match cache.begin_fill(&key).await {
            FillSlot::MustFill(permit) => permit,
            _ => panic!("first caller owns the fill"),
        };

        // Second caller in non-blocking mode sees Busy
        assert!(matches!(cache.try_begin_fill(&key), FillSlot::Busy));

        // A blocking caller waits and then reuses the winner's entry
        let waiter = {
            let cache = Arc::clone(&cache);
            let key = key.clone();
            tokio::spawn(async move {
                match cache.begin_fill(&key).await {
                    FillSlot::Ready(entry) => entry,
                    _ => panic!("waiter should observe the filled entry"),
                }
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cache.complete_fill(permit, entry_for(&key, 3600)).await;

        let entry = waiter.await.unwrap();
        assert_eq!(entry.symbol, "RWE.DE");
    }
}
