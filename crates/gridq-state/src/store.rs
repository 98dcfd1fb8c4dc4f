//! StateStore — redb-backed persistence for jobs and leases.
//!
//! Provides typed CRUD operations over jobs, lease records, and job-set
//! id handles. All structured values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use gridq_core::Job;

use crate::error::{StateError, StateResult};
use crate::schema::SchemaRegistry;
use crate::tables::*;
use crate::types::{LeaseRecord, lease_key};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// Record column mappings are verified against the registry before
    /// any data is touched.
    pub fn open(path: &Path, registry: &SchemaRegistry) -> StateResult<Self> {
        registry.verify::<Job>()?;
        registry.verify::<LeaseRecord>()?;
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory(registry: &SchemaRegistry) -> StateResult<Self> {
        registry.verify::<Job>()?;
        registry.verify::<LeaseRecord>()?;
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(ARCHIVED_JOBS).map_err(map_err!(Table))?;
        txn.open_table(LEASES).map_err(map_err!(Table))?;
        txn.open_table(JOB_SETS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job.
    pub fn put_job(&self, job: &Job) -> StateResult<()> {
        let value = serde_json::to_vec(job).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(job.table_key(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %job.id, queue = %job.queue, "job stored");
        Ok(())
    }

    /// Get a job by id.
    pub fn get_job(&self, job_id: &str) -> StateResult<Option<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(job_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let job: Job =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// List all active jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<Job>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let job: Job =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(job);
        }
        Ok(results)
    }

    /// List all active jobs belonging to one queue.
    pub fn list_jobs_for_queue(&self, queue: &str) -> StateResult<Vec<Job>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.queue == queue)
            .collect())
    }

    /// Move a terminal job from the active set to the archive.
    ///
    /// Returns false if the job was not in the active set (already
    /// archived, or never known).
    pub fn archive_job(&self, job_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let moved;
        {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let removed = jobs.remove(job_id).map_err(map_err!(Write))?;
            match removed {
                Some(guard) => {
                    let value = guard.value().to_vec();
                    drop(guard);
                    let mut archive =
                        txn.open_table(ARCHIVED_JOBS).map_err(map_err!(Table))?;
                    archive
                        .insert(job_id, value.as_slice())
                        .map_err(map_err!(Write))?;
                    moved = true;
                }
                None => moved = false,
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%job_id, moved, "job archived");
        Ok(moved)
    }

    // ── Leases ─────────────────────────────────────────────────────

    /// Insert or update a lease record.
    pub fn put_lease(&self, lease: &LeaseRecord) -> StateResult<()> {
        let key = lease.table_key();
        let value = serde_json::to_vec(lease).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a lease by cluster and job id.
    pub fn get_lease(&self, cluster_id: &str, job_id: &str) -> StateResult<Option<LeaseRecord>> {
        let key = lease_key(cluster_id, job_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let lease: LeaseRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    /// List all lease records for a cluster (prefix scan).
    pub fn list_leases_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<LeaseRecord>> {
        let prefix = format!("{cluster_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let lease: LeaseRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(lease);
            }
        }
        Ok(results)
    }

    /// List every lease record.
    pub fn list_leases(&self) -> StateResult<Vec<LeaseRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(LEASES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let lease: LeaseRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(lease);
        }
        Ok(results)
    }

    /// Delete a lease record. Returns true if it existed.
    pub fn delete_lease(&self, cluster_id: &str, job_id: &str) -> StateResult<bool> {
        let key = lease_key(cluster_id, job_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(LEASES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    // ── Job-set handles ────────────────────────────────────────────

    /// Get the id handle for a (queue, job_set) pair, allocating one if
    /// absent. Allocation is transactional: the counter bump and the
    /// insert commit together.
    pub fn get_or_create_job_set_id(&self, queue: &str, job_set: &str) -> StateResult<u64> {
        let key = format!("{queue}:{job_set}");

        // Fast path: existing handle.
        {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(JOB_SETS).map_err(map_err!(Table))?;
            if let Some(guard) = table.get(key.as_str()).map_err(map_err!(Read))? {
                return Ok(guard.value());
            }
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id;
        {
            let mut table = txn.open_table(JOB_SETS).map_err(map_err!(Table))?;
            // Re-check under the write transaction; another writer may
            // have allocated between our read and write.
            if let Some(guard) = table.get(key.as_str()).map_err(map_err!(Read))? {
                return Ok(guard.value());
            }
            let mut meta = txn.open_table(META).map_err(map_err!(Table))?;
            let next = meta
                .get(NEXT_JOB_SET_ID)
                .map_err(map_err!(Read))?
                .map(|g| g.value())
                .unwrap_or(1);
            meta.insert(NEXT_JOB_SET_ID, next + 1)
                .map_err(map_err!(Write))?;
            table.insert(key.as_str(), next).map_err(map_err!(Write))?;
            id = next;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, id, "job-set handle allocated");
        Ok(id)
    }

    /// List known (queue:job_set, id) handles.
    pub fn list_job_set_ids(&self) -> StateResult<Vec<(String, u64)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOB_SETS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            results.push((key.value().to_string(), value.value()));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LeaseState;
    use gridq_core::resource::cpu_mem;
    use std::collections::BTreeMap;

    fn test_store() -> StateStore {
        StateStore::open_in_memory(&SchemaRegistry::new()).unwrap()
    }

    fn test_job(id: &str, queue: &str) -> Job {
        Job {
            id: id.to_string(),
            queue: queue.to_string(),
            job_set: "set-1".to_string(),
            priority: 1,
            resources: cpu_mem(1000, 64),
            scheduler: "gridq".to_string(),
            created_at: 1000,
        }
    }

    fn test_lease(cluster: &str, job_id: &str) -> LeaseRecord {
        LeaseRecord {
            job_id: job_id.to_string(),
            cluster_id: cluster.to_string(),
            pool: "default".to_string(),
            state: LeaseState::Issued,
            priority: 1,
            resources: cpu_mem(1000, 64),
            delivered: false,
            avoid_node_labels: BTreeMap::new(),
            return_reason: None,
            issued_at: 1000,
            updated_at: 1000,
        }
    }

    // ── Job CRUD ───────────────────────────────────────────────────

    #[test]
    fn job_put_and_get() {
        let store = test_store();
        let job = test_job("job-1", "alpha");

        store.put_job(&job).unwrap();
        assert_eq!(store.get_job("job-1").unwrap(), Some(job));
        assert!(store.get_job("nope").unwrap().is_none());
    }

    #[test]
    fn jobs_filter_by_queue() {
        let store = test_store();
        store.put_job(&test_job("j1", "alpha")).unwrap();
        store.put_job(&test_job("j2", "alpha")).unwrap();
        store.put_job(&test_job("j3", "beta")).unwrap();

        assert_eq!(store.list_jobs_for_queue("alpha").unwrap().len(), 2);
        assert_eq!(store.list_jobs_for_queue("beta").unwrap().len(), 1);
        assert!(store.list_jobs_for_queue("gamma").unwrap().is_empty());
    }

    #[test]
    fn archive_removes_from_active_set() {
        let store = test_store();
        store.put_job(&test_job("j1", "alpha")).unwrap();

        assert!(store.archive_job("j1").unwrap());
        assert!(store.get_job("j1").unwrap().is_none());
        // Second archive is a no-op, not an error.
        assert!(!store.archive_job("j1").unwrap());
    }

    // ── Lease CRUD ─────────────────────────────────────────────────

    #[test]
    fn lease_put_and_get() {
        let store = test_store();
        let lease = test_lease("c1", "j1");

        store.put_lease(&lease).unwrap();
        assert_eq!(store.get_lease("c1", "j1").unwrap(), Some(lease));
        assert!(store.get_lease("c2", "j1").unwrap().is_none());
    }

    #[test]
    fn leases_scan_by_cluster() {
        let store = test_store();
        store.put_lease(&test_lease("c1", "j1")).unwrap();
        store.put_lease(&test_lease("c1", "j2")).unwrap();
        store.put_lease(&test_lease("c2", "j3")).unwrap();

        assert_eq!(store.list_leases_for_cluster("c1").unwrap().len(), 2);
        assert_eq!(store.list_leases_for_cluster("c2").unwrap().len(), 1);
        assert_eq!(store.list_leases().unwrap().len(), 3);
    }

    #[test]
    fn lease_delete() {
        let store = test_store();
        store.put_lease(&test_lease("c1", "j1")).unwrap();

        assert!(store.delete_lease("c1", "j1").unwrap());
        assert!(!store.delete_lease("c1", "j1").unwrap());
    }

    // ── Job-set handles ────────────────────────────────────────────

    #[test]
    fn job_set_ids_are_stable_and_distinct() {
        let store = test_store();

        let a = store.get_or_create_job_set_id("alpha", "s1").unwrap();
        let b = store.get_or_create_job_set_id("alpha", "s2").unwrap();
        let a_again = store.get_or_create_job_set_id("alpha", "s1").unwrap();

        assert_eq!(a, a_again);
        assert_ne!(a, b);

        // Same job-set name under a different queue is a different handle.
        let other_queue = store.get_or_create_job_set_id("beta", "s1").unwrap();
        assert_ne!(a, other_queue);
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("gridq.redb");
        let registry = SchemaRegistry::new();

        let id = {
            let store = StateStore::open(&db_path, &registry).unwrap();
            store.put_job(&test_job("j1", "alpha")).unwrap();
            store.get_or_create_job_set_id("alpha", "s1").unwrap()
        };

        let store = StateStore::open(&db_path, &registry).unwrap();
        assert!(store.get_job("j1").unwrap().is_some());
        assert_eq!(store.get_or_create_job_set_id("alpha", "s1").unwrap(), id);
    }
}
