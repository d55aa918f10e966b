//! C5: content-addressed memoization of plans with LRU+TTL eviction and
//! hit-rate stats.

use std::time::Duration;

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use parking_lot::Mutex;

use crate::model::Plan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlanCacheKey([u8; 16]);

impl PlanCacheKey {
    /// 128-bit fingerprint of `(request, hash(document_full), task_type)`.
    pub fn compute(request: &str, document_full: &str, task_type: &str) -> Self {
        let doc_hash = format!("{:x}", md5::compute(document_full.as_bytes()));
        let composite = format!("{request}\u{0}{doc_hash}\u{0}{task_type}");
        PlanCacheKey(md5::compute(composite.as_bytes()).0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
}

pub struct PlanCache {
    cache: Cache<PlanCacheKey, Plan>,
    stats: Mutex<CacheStats>,
}

impl PlanCache {
    pub fn new(max_size: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_size)
            .time_to_live(ttl)
            .eviction_policy(EvictionPolicy::lru())
            .build();
        PlanCache { cache, stats: Mutex::new(CacheStats::default()) }
    }

    /// Returns the cached plan iff it hasn't expired; bumps `last_access`
    /// (moka's TTL read path) and the hit/miss counters.
    pub async fn get(&self, key: &PlanCacheKey) -> Option<Plan> {
        let hit = self.cache.get(key).await;
        let mut stats = self.stats.lock();
        if hit.is_some() {
            stats.hit_count += 1;
        } else {
            stats.miss_count += 1;
        }
        hit
    }

    pub async fn set(&self, key: PlanCacheKey, plan: Plan) {
        self.cache.insert(key, plan).await;
    }

    pub fn stats(&self) -> CacheStats {
        *self.stats.lock()
    }

    pub fn size(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn miss_then_set_then_hit_updates_stats() {
        let cache = PlanCache::new(10, Duration::from_secs(60));
        let key = PlanCacheKey::compute("sum sales", "a|b\n1|2", "basic");
        assert!(cache.get(&key).await.is_none());

        let plan = Plan { task_type: "basic".to_string(), ..Default::default() };
        cache.set(key, plan.clone()).await;
        let hit = cache.get(&key).await;
        assert_eq!(hit, Some(plan));

        let stats = cache.stats();
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.hit_count, 1);
    }

    #[test]
    fn distinct_inputs_produce_distinct_keys() {
        let a = PlanCacheKey::compute("sum sales", "doc", "basic");
        let b = PlanCacheKey::compute("sum profit", "doc", "basic");
        assert_ne!(a, b);
    }

    #[test]
    fn identical_inputs_produce_the_same_key() {
        let a = PlanCacheKey::compute("sum sales", "doc", "basic");
        let b = PlanCacheKey::compute("sum sales", "doc", "basic");
        assert_eq!(a, b);
    }
}
