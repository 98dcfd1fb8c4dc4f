//! JobSetMapper — bounded cache over (queue, job_set) → id handles.
//!
//! Handles live durably in the store; this layer keeps a bounded LRU in
//! front of it so hot job sets never hit the database. Concurrent misses
//! for the same key are coalesced into a single store round-trip.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

use crate::error::StateResult;
use crate::store::StateStore;

struct MapperInner {
    entries: HashMap<String, u64>,
    /// Keys in least-recently-used order, front = coldest.
    order: VecDeque<String>,
    /// Keys with a store lookup in flight; later callers await the same cell.
    in_flight: HashMap<String, Arc<OnceCell<u64>>>,
}

/// Bounded LRU mapper from (queue, job_set) names to their numeric handle.
pub struct JobSetMapper {
    store: StateStore,
    capacity: usize,
    inner: Mutex<MapperInner>,
}

impl JobSetMapper {
    pub fn new(store: StateStore, capacity: usize) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            inner: Mutex::new(MapperInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    /// Resolve the id handle for a (queue, job_set) pair.
    ///
    /// Cache hits refresh recency. Misses fall through to the store,
    /// which allocates a fresh handle if the pair is new.
    pub async fn get(&self, queue: &str, job_set: &str) -> StateResult<u64> {
        let key = format!("{queue}:{job_set}");

        let cell = {
            let mut inner = self.inner.lock().await;
            if let Some(&id) = inner.entries.get(&key) {
                Self::touch(&mut inner.order, &key);
                return Ok(id);
            }
            inner
                .in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let result = cell
            .get_or_try_init(|| async {
                debug!(%key, "job-set handle cache miss");
                self.store.get_or_create_job_set_id(queue, job_set)
            })
            .await
            .copied();

        let mut inner = self.inner.lock().await;
        inner.in_flight.remove(&key);
        if let Ok(id) = result {
            Self::insert(&mut inner, self.capacity, key, id);
        }
        result
    }

    /// Current number of cached entries.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn touch(order: &mut VecDeque<String>, key: &str) {
        if let Some(pos) = order.iter().position(|k| k == key) {
            order.remove(pos);
        }
        order.push_back(key.to_string());
    }

    fn insert(inner: &mut MapperInner, capacity: usize, key: String, id: u64) {
        if inner.entries.insert(key.clone(), id).is_none() {
            inner.order.push_back(key);
        } else {
            Self::touch(&mut inner.order, &key);
        }
        while inner.entries.len() > capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.entries.remove(&evicted);
                debug!(key = %evicted, "job-set handle evicted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaRegistry;

    fn test_mapper(capacity: usize) -> JobSetMapper {
        let store = StateStore::open_in_memory(&SchemaRegistry::new()).unwrap();
        JobSetMapper::new(store, capacity)
    }

    #[tokio::test]
    async fn miss_populates_from_store() {
        let mapper = test_mapper(8);

        let id = mapper.get("alpha", "s1").await.unwrap();
        assert_eq!(mapper.len().await, 1);

        // Second call is a cache hit and returns the same handle.
        assert_eq!(mapper.get("alpha", "s1").await.unwrap(), id);
        assert_eq!(mapper.len().await, 1);
    }

    #[tokio::test]
    async fn distinct_pairs_get_distinct_handles() {
        let mapper = test_mapper(8);

        let a = mapper.get("alpha", "s1").await.unwrap();
        let b = mapper.get("alpha", "s2").await.unwrap();
        let c = mapper.get("beta", "s1").await.unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[tokio::test]
    async fn eviction_respects_capacity_and_recency() {
        let mapper = test_mapper(2);

        let a = mapper.get("q", "a").await.unwrap();
        mapper.get("q", "b").await.unwrap();
        // Touch "a" so "b" becomes the coldest entry.
        mapper.get("q", "a").await.unwrap();
        mapper.get("q", "c").await.unwrap();

        assert_eq!(mapper.len().await, 2);
        // "a" survived eviction; the store still resolves evicted keys
        // to the same durable handle.
        assert_eq!(mapper.get("q", "a").await.unwrap(), a);
    }

    #[tokio::test]
    async fn evicted_handle_is_stable_across_reload() {
        let mapper = test_mapper(1);

        let a = mapper.get("q", "a").await.unwrap();
        mapper.get("q", "b").await.unwrap();
        // "a" was evicted; reloading it must not allocate a new id.
        assert_eq!(mapper.get("q", "a").await.unwrap(), a);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_handle() {
        let mapper = Arc::new(test_mapper(8));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mapper = mapper.clone();
            handles.push(tokio::spawn(async move {
                mapper.get("alpha", "shared").await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
