/// TTL cache over assembled token records.
///
/// Two horizons: records younger than the freshness window are served
/// without any provider traffic; records older than the TTL are
/// evicted. In between, the entry stays resident but `get_fresh`
/// returns nothing, so the next enrichment refetches.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::core::types::TokenRecord;

#[derive(Debug, Clone)]
struct CachedRecord {
    record: TokenRecord,
    cached_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct MetadataCache {
    entries: DashMap<String, CachedRecord>,
    /// Per-mint fetch guards, the single-flight mechanism
    inflight: DashMap<String, Arc<Mutex<()>>>,
    fresh_secs: i64,
    ttl_secs: i64,
}

impl MetadataCache {
    pub fn new(fresh_secs: i64, ttl_secs: i64) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            fresh_secs,
            ttl_secs,
        }
    }

    /// A record younger than the freshness window, if present. Evicts
    /// anything past the TTL as a side effect.
    pub fn get_fresh(&self, mint: &str) -> Option<TokenRecord> {
        let now = Utc::now();
        if let Some(entry) = self.entries.get(mint) {
            let age = now.signed_duration_since(entry.cached_at);
            if age <= Duration::seconds(self.fresh_secs) {
                debug!(mint, age_secs = age.num_seconds(), "Cache hit");
                return Some(entry.record.clone());
            }
        }
        self.entries
            .remove_if(mint, |_, entry| {
                now.signed_duration_since(entry.cached_at) > Duration::seconds(self.ttl_secs)
            });
        None
    }

    pub fn insert(&self, record: TokenRecord) {
        self.entries.insert(
            record.mint.clone(),
            CachedRecord {
                record,
                cached_at: Utc::now(),
            },
        );
    }

    /// The fetch guard for `mint`. Hold the guard's mutex across the
    /// provider fan-out; concurrent enrichers for the same mint queue
    /// on it and find the cache warm when they wake.
    pub fn flight_guard(&self, mint: &str) -> Arc<Mutex<()>> {
        self.inflight
            .entry(mint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the fetch guard once the record is cached.
    pub fn clear_flight_guard(&self, mint: &str) {
        self.inflight.remove(mint);
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

    #[test]
    fn fresh_record_is_served() {
        let cache = MetadataCache::new(60, 3600);
        let mut record = TokenRecord::new("mint1");
        record.price_usd = Some(1.5);
        cache.insert(record);

        let hit = cache.get_fresh("mint1").unwrap();
        assert_eq!(hit.price_usd, Some(1.5));
    }

    #[test]
    fn stale_record_is_not_served() {
        let cache = MetadataCache::new(0, 3600);
        cache.insert(TokenRecord::new("mint1"));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(cache.get_fresh("mint1").is_none());
        // Still within TTL so the entry is kept for non-strict readers
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn expired_record_is_evicted() {
        let cache = MetadataCache::new(0, 0);
        cache.insert(TokenRecord::new("mint1"));
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(cache.get_fresh("mint1").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn flight_guard_is_shared_per_mint() {
        let cache = MetadataCache::new(60, 3600);
        let a = cache.flight_guard("mint1");
        let b = cache.flight_guard("mint1");
        let other = cache.flight_guard("mint2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));

        let _held = a.lock().await;
        assert!(b.try_lock().is_err());
        assert!(other.try_lock().is_ok());
    }
}
