pub mod singleflight;

pub use singleflight::{FlightError, SingleFlight};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::configs::CacheConfig;

/// One cached value. Immutable once written; readers share the `Arc`
/// instead of mutating in place, which keeps concurrent access safe.
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    hits: AtomicU64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            hits: AtomicU64::new(0),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.created_at.elapsed() < self.ttl
    }

    fn within(&self, grace: Duration) -> bool {
        self.created_at.elapsed() < self.ttl + grace
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

/// TTL + capacity bounded concurrent cache. Entries linger for `grace`
/// past their TTL so bounded-staleness reads can still see them.
pub struct TtlCache<V> {
    entries: DashMap<String, Arc<CacheEntry<V>>>,
    ttl: Duration,
    capacity: usize,
    grace: Duration,
}

impl<V> TtlCache<V> {
    pub fn new(ttl: Duration, capacity: usize, grace: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            capacity,
            grace,
        }
    }

    /// Fresh entries only.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        let entry = self.entries.get(key)?;
        if entry.is_fresh() {
            entry.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.clone())
        } else {
            None
        }
    }

    /// Fresh entries, or expired ones still inside the grace window.
    pub fn get_stale(&self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        let entry = self.entries.get(key)?;
        if entry.within(self.grace) {
            entry.hits.fetch_add(1, Ordering::Relaxed);
            Some(entry.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: &str, value: V) {
        self.entries
            .insert(key.to_string(), Arc::new(CacheEntry::new(value, self.ttl)));
        self.evict();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop entries past TTL plus grace (they can no longer satisfy even
    /// stale reads), then oldest-first while over capacity.
    fn evict(&self) {
        let grace = self.grace;
        self.entries.retain(|_, e| e.within(grace));

        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().created_at)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    debug!("cache over capacity, evicting {}", key);
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// Single-flight TTL cache for resolved values: concurrent callers for the
/// same key collapse into one computation, and a bounded-staleness value is
/// served when a recompute fails transiently.
pub struct ResolveCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    cache: TtlCache<V>,
    flight: SingleFlight<String, V, E>,
}

impl<V, E> ResolveCache<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: TtlCache::new(
                Duration::from_secs(config.descriptor_ttl_secs),
                config.capacity,
                Duration::from_secs(config.stale_serve_secs),
            ),
            flight: SingleFlight::new(),
        }
    }

    pub fn cached(&self, key: &str) -> Option<V> {
        self.cache.get(key).map(|e| e.value.clone())
    }

    /// Look up `key`, running `fut` (collapsed with concurrent callers) on
    /// miss. `stale_ok` decides per error whether an expired-but-graced
    /// value may stand in for the failure; `flight_err` supplies the error
    /// used when the single-flight leader dies without a result.
    pub async fn get_or_compute<Fut>(
        &self,
        key: &str,
        fut: Fut,
        stale_ok: impl Fn(&E) -> bool,
        flight_err: impl FnOnce() -> E,
    ) -> Result<V, E>
    where
        Fut: std::future::Future<Output = Result<V, E>> + Send,
    {
        if let Some(entry) = self.cache.get(key) {
            return Ok(entry.value.clone());
        }

        let result = self
            .flight
            .run(key.to_string(), async {
                let value = fut.await?;
                self.cache.insert(key, value.clone());
                Ok(value)
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FlightError::LeaderFailed) => Err(flight_err()),
            Err(FlightError::Inner(err)) => {
                if stale_ok(&err) {
                    if let Some(entry) = self.cache.get_stale(key) {
                        warn!("serving stale cache entry for {} after transient failure", key);
                        return Ok(entry.value.clone());
                    }
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn config(ttl: u64, capacity: usize, grace: u64) -> CacheConfig {
        CacheConfig {
            descriptor_ttl_secs: ttl,
            capacity,
            stale_serve_secs: grace,
        }
    }

    #[tokio::test]
    async fn concurrent_get_or_compute_runs_once() {
        let cache: Arc<ResolveCache<String, String>> =
            Arc::new(ResolveCache::new(&config(60, 16, 30)));
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = vec![];
        for _ in 0..12 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(
                        "vidcloud:tt42",
                        async move {
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok("descriptor".to_string())
                        },
                        |_| false,
                        || "flight failed".to_string(),
                    )
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "descriptor");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Now cached: a subsequent call must not recompute.
        let res = cache
            .get_or_compute(
                "vidcloud:tt42",
                async {
                    panic!("must not run");
                    #[allow(unreachable_code)]
                    Ok(String::new())
                },
                |_| false,
                || "flight failed".to_string(),
            )
            .await;
        assert_eq!(res.unwrap(), "descriptor");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_value_served_on_transient_failure() {
        // Zero TTL: every entry is immediately stale but inside the grace
        // window.
        let cache: ResolveCache<String, String> = ResolveCache::new(&config(0, 16, 300));
        cache.cache.insert("k", "old".to_string());

        let res = cache
            .get_or_compute(
                "k",
                async { Err("origin flapped".to_string()) },
                |_| true,
                || "flight failed".to_string(),
            )
            .await;
        assert_eq!(res.unwrap(), "old");

        // Same failure with stale serving refused propagates the error.
        let res = cache
            .get_or_compute(
                "k",
                async { Err("origin gone".to_string()) },
                |_| false,
                || "flight failed".to_string(),
            )
            .await;
        assert_eq!(res.unwrap_err(), "origin gone");
    }

    #[test]
    fn capacity_evicts_oldest() {
        let cache: TtlCache<u32> =
            TtlCache::new(Duration::from_secs(60), 3, Duration::from_secs(60));
        for (i, key) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.insert(key, i as u32);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_none());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn hit_count_increments() {
        let cache: TtlCache<u32> =
            TtlCache::new(Duration::from_secs(60), 8, Duration::from_secs(60));
        cache.insert("k", 1);
        let _ = cache.get("k");
        let _ = cache.get("k");
        let entry = cache.get("k").unwrap();
        assert_eq!(entry.hits(), 3);
    }
}
