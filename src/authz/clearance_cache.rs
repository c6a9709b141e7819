// Moka TTL cache over the clearance store

use crate::core::errors::GovernanceError;
use crate::core::models::AgentClearanceRecord;
use crate::loader::ClearanceStore;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// In-memory clearance cache with TTL expiration.
///
/// Cache misses load through the underlying store. Only found records are
/// cached: store errors and unknown agents always re-consult the source,
/// so an entry is never served past its TTL without revalidation and an
/// outage is never masked by a stale hit for a different agent.
pub struct ClearanceCache {
    cache: Cache<String, Arc<AgentClearanceRecord>>,
    store: Arc<dyn ClearanceStore>,
}

impl ClearanceCache {
    pub fn new(store: Arc<dyn ClearanceStore>, ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_secs))
            .max_capacity(max_capacity)
            .build();
        Self { cache, store }
    }

    pub async fn get(
        &self,
        agent_id: &str,
    ) -> Result<Option<Arc<AgentClearanceRecord>>, GovernanceError> {
        if let Some(record) = self.cache.get(agent_id).await {
            return Ok(Some(record));
        }

        match self.store.get_clearance(agent_id).await {
            Ok(Some(record)) => {
                let record = Arc::new(record);
                self.cache
                    .insert(agent_id.to_string(), Arc::clone(&record))
                    .await;
                Ok(Some(record))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Explicit eviction, for administrative updates that cannot wait out
    /// the TTL.
    pub async fn invalidate(&self, agent_id: &str) {
        self.cache.invalidate(agent_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::ClearanceTier;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingStore {
        lookups: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl ClearanceStore for CountingStore {
        async fn get_clearance(
            &self,
            agent_id: &str,
        ) -> Result<Option<AgentClearanceRecord>, GovernanceError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(GovernanceError::ClearanceStoreUnavailable("down".to_string()));
            }
            if agent_id == "ghost" {
                return Ok(None);
            }
            let now = Utc::now();
            Ok(Some(AgentClearanceRecord {
                agent_id: agent_id.to_string(),
                tier: ClearanceTier::Internal,
                allowed_tables: BTreeSet::from(["Orders".to_string()]),
                max_queries_per_hour: 100,
                active: true,
                created_at: now,
                updated_at: now,
            }))
        }
    }

    #[tokio::test]
    async fn test_hit_avoids_second_lookup() {
        let store = Arc::new(CountingStore { lookups: AtomicU32::new(0), fail: false });
        let cache = ClearanceCache::new(store.clone(), 900, 100);

        assert!(cache.get("agent-7").await.unwrap().is_some());
        assert!(cache.get("agent-7").await.unwrap().is_some());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_reload() {
        let store = Arc::new(CountingStore { lookups: AtomicU32::new(0), fail: false });
        let cache = ClearanceCache::new(store.clone(), 900, 100);

        cache.get("agent-7").await.unwrap();
        cache.invalidate("agent-7").await;
        cache.get("agent-7").await.unwrap();
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_misses_are_not_cached() {
        let store = Arc::new(CountingStore { lookups: AtomicU32::new(0), fail: false });
        let cache = ClearanceCache::new(store.clone(), 900, 100);

        assert!(cache.get("ghost").await.unwrap().is_none());
        assert!(cache.get("ghost").await.unwrap().is_none());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let store = Arc::new(CountingStore { lookups: AtomicU32::new(0), fail: true });
        let cache = ClearanceCache::new(store, 900, 100);
        assert!(cache.get("agent-7").await.is_err());
    }
}
