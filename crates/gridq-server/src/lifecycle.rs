//! Lease lifecycle manager.
//!
//! Owns every lease independent of the connection that delivered it:
//! `Issued → Renewed (loop) → {Done | Returned | Expired}`. Sessions only
//! propose transitions. Renewal deadlines run on the monotonic clock
//! (`tokio::time::Instant`), so wall-clock adjustments never expire or
//! revive a lease.
//!
//! Every transition pairs its accounting effect with the persisted state
//! change under the pool's lock: commit happens only after the record is
//! durably written, release only alongside a terminal transition.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use gridq_accounting::{AccountantRegistry, PoolKey};
use gridq_core::Job;
use gridq_state::{LeaseRecord, LeaseState, StateStore};

use crate::error::LeaseResult;

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

struct LifecycleInner {
    /// Lease table key → renewal deadline.
    deadlines: HashMap<String, Instant>,
    /// Job id → cluster currently holding a live lease on it.
    cluster_by_job: HashMap<String, String>,
    /// Job id → node labels its last returned lease asked to avoid.
    /// Consulted by the next scheduling attempt, dropped once it issues.
    avoid_labels: HashMap<String, BTreeMap<String, String>>,
}

pub struct LeaseLifecycleManager {
    store: StateStore,
    accountants: Arc<AccountantRegistry>,
    ttl: Duration,
    inner: Mutex<LifecycleInner>,
}

impl LeaseLifecycleManager {
    pub fn new(
        store: StateStore,
        accountants: Arc<AccountantRegistry>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            accountants,
            ttl,
            inner: Mutex::new(LifecycleInner {
                deadlines: HashMap::new(),
                cluster_by_job: HashMap::new(),
                avoid_labels: HashMap::new(),
            }),
        }
    }

    /// Rebuild in-memory state from persisted leases after a restart.
    ///
    /// Live leases get a fresh renewal deadline and their resources
    /// re-committed; executors are expected to renew within one TTL.
    pub fn recover(&self) -> LeaseResult<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut recovered = 0;
        for lease in self.store.list_leases()? {
            if !lease.state.is_live() {
                if lease.state == LeaseState::Returned && !lease.avoid_node_labels.is_empty() {
                    inner
                        .avoid_labels
                        .insert(lease.job_id.clone(), lease.avoid_node_labels.clone());
                }
                continue;
            }
            let key = PoolKey::new(lease.cluster_id.clone(), lease.pool.clone());
            let pool = self.accountants.pool(&key);
            pool.lock()
                .unwrap_or_else(|e| e.into_inner())
                .commit(lease.priority, &lease.resources);
            inner
                .deadlines
                .insert(lease.table_key(), Instant::now() + self.ttl);
            inner
                .cluster_by_job
                .insert(lease.job_id.clone(), lease.cluster_id.clone());
            recovered += 1;
        }
        if recovered > 0 {
            info!(leases = recovered, "recovered live leases from store");
        }
        Ok(recovered)
    }

    /// Issue a lease for `job` to `cluster_id`/`pool`.
    ///
    /// Returns false without side effects when the job already holds a
    /// live lease or when committing it would overcommit a priority band.
    pub fn issue(&self, cluster_id: &str, pool: &str, job: &Job) -> LeaseResult<bool> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.cluster_by_job.contains_key(&job.id) {
            return Ok(false);
        }

        let key = PoolKey::new(cluster_id, pool);
        let accountant = self.accountants.pool(&key);
        let mut accountant = accountant.lock().unwrap_or_else(|e| e.into_inner());

        let priority = job.priority_band();
        if !accountant.can_admit(priority, &job.resources) {
            debug!(job_id = %job.id, %cluster_id, "admission deferred, no headroom");
            return Ok(false);
        }

        let now = epoch_secs();
        let lease = LeaseRecord {
            job_id: job.id.clone(),
            cluster_id: cluster_id.to_string(),
            pool: pool.to_string(),
            state: LeaseState::Issued,
            priority,
            resources: job.resources.clone(),
            delivered: false,
            avoid_node_labels: BTreeMap::new(),
            return_reason: None,
            issued_at: now,
            updated_at: now,
        };
        // Persist before committing: a failed write must leave the
        // accounting untouched.
        self.store.put_lease(&lease)?;
        accountant.commit(priority, &job.resources);

        inner
            .deadlines
            .insert(lease.table_key(), Instant::now() + self.ttl);
        inner
            .cluster_by_job
            .insert(job.id.clone(), cluster_id.to_string());
        // The avoid hint applied to this attempt; a later return sets a
        // fresh one.
        inner.avoid_labels.remove(&job.id);
        info!(job_id = %job.id, %cluster_id, %pool, "lease issued");
        Ok(true)
    }

    /// Mark leases the executor has confirmed receiving. Unknown or
    /// terminal ids are ignored. Returns the ids newly marked.
    pub fn mark_delivered(&self, cluster_id: &str, ids: &[String]) -> LeaseResult<Vec<String>> {
        let mut marked = Vec::new();
        for id in ids {
            if let Some(mut lease) = self.store.get_lease(cluster_id, id)? {
                if lease.state.is_live() && !lease.delivered {
                    lease.delivered = true;
                    lease.updated_at = epoch_secs();
                    self.store.put_lease(&lease)?;
                    marked.push(id.clone());
                }
            }
        }
        if !marked.is_empty() {
            debug!(%cluster_id, count = marked.len(), "leases confirmed delivered");
        }
        Ok(marked)
    }

    /// All live leases held by one cluster.
    pub fn live_leases(&self, cluster_id: &str) -> LeaseResult<Vec<LeaseRecord>> {
        Ok(self
            .store
            .list_leases_for_cluster(cluster_id)?
            .into_iter()
            .filter(|l| l.state.is_live())
            .collect())
    }

    /// Ids of every job with a live lease anywhere.
    pub fn leased_job_ids(&self) -> HashSet<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.cluster_by_job.keys().cloned().collect()
    }

    /// Node labels the job's last returned lease asked to avoid, if any.
    pub fn avoid_labels_for(&self, job_id: &str) -> Option<BTreeMap<String, String>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.avoid_labels.get(job_id).cloned()
    }

    /// Extend the renewal deadline for each id still live on this
    /// cluster. Ids unknown, terminal, or already past their deadline are
    /// dropped from the reply; an overdue lease expires instead.
    pub fn renew(&self, cluster_id: &str, ids: &[String]) -> LeaseResult<Vec<String>> {
        let now = Instant::now();
        let mut renewed = Vec::new();
        for id in ids {
            let Some(mut lease) = self.store.get_lease(cluster_id, id)? else {
                continue;
            };
            if !lease.state.is_live() {
                continue;
            }
            let overdue = {
                let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner
                    .deadlines
                    .get(&lease.table_key())
                    .is_none_or(|deadline| *deadline <= now)
            };
            if overdue {
                self.expire(lease)?;
                continue;
            }
            lease.state = LeaseState::Renewed;
            lease.updated_at = epoch_secs();
            self.store.put_lease(&lease)?;
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.deadlines.insert(lease.table_key(), now + self.ttl);
            renewed.push(id.clone());
        }
        Ok(renewed)
    }

    /// Return a lease to the scheduler: terminal `Returned` state,
    /// resources released, avoid-labels recorded for the next attempt.
    /// Unknown or already-terminal ids are a silent no-op.
    pub fn return_lease(
        &self,
        cluster_id: &str,
        job_id: &str,
        avoid_node_labels: BTreeMap<String, String>,
        reason: &str,
    ) -> LeaseResult<()> {
        let Some(mut lease) = self.store.get_lease(cluster_id, job_id)? else {
            debug!(%cluster_id, %job_id, "return for unknown lease ignored");
            return Ok(());
        };
        if !lease.state.is_live() {
            return Ok(());
        }
        lease.state = LeaseState::Returned;
        lease.avoid_node_labels = avoid_node_labels;
        lease.return_reason = if reason.is_empty() {
            None
        } else {
            Some(reason.to_string())
        };
        lease.updated_at = epoch_secs();
        self.store.put_lease(&lease)?;
        self.release(&lease);
        if !lease.avoid_node_labels.is_empty() {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .avoid_labels
                .insert(lease.job_id.clone(), lease.avoid_node_labels.clone());
        }
        info!(%cluster_id, %job_id, %reason, "lease returned");
        Ok(())
    }

    /// Mark jobs done and archive them. Returns every id whose lease is
    /// in the `Done` state afterwards, making the call idempotent: a
    /// repeated report yields the same list and releases nothing twice.
    pub fn report_done(&self, ids: &[String]) -> LeaseResult<Vec<String>> {
        let mut done = Vec::new();
        for id in ids {
            let cluster = {
                let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner.cluster_by_job.get(id).cloned()
            };
            match cluster {
                Some(cluster_id) => {
                    let Some(mut lease) = self.store.get_lease(&cluster_id, id)? else {
                        continue;
                    };
                    if !lease.state.is_live() {
                        continue;
                    }
                    lease.state = LeaseState::Done;
                    lease.updated_at = epoch_secs();
                    self.store.put_lease(&lease)?;
                    self.release(&lease);
                    self.store.archive_job(id)?;
                    info!(job_id = %id, %cluster_id, "job done");
                    done.push(id.clone());
                }
                None => {
                    // Possibly a repeat of an earlier report.
                    if self
                        .store
                        .list_leases()?
                        .iter()
                        .any(|l| l.job_id == *id && l.state == LeaseState::Done)
                    {
                        done.push(id.clone());
                    }
                }
            }
        }
        Ok(done)
    }

    /// Expire every lease whose renewal deadline has elapsed. Returns the
    /// expired job ids; called periodically by the daemon's sweep task.
    pub fn expire_overdue(&self) -> LeaseResult<Vec<String>> {
        let now = Instant::now();
        let overdue: Vec<String> = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .deadlines
                .iter()
                .filter(|(_, deadline)| **deadline <= now)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut expired = Vec::new();
        for key in overdue {
            let Some((cluster_id, job_id)) = key.split_once(':') else {
                continue;
            };
            let Some(lease) = self.store.get_lease(cluster_id, job_id)? else {
                continue;
            };
            if lease.state.is_live() {
                let job_id = lease.job_id.clone();
                self.expire(lease)?;
                expired.push(job_id);
            }
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "leases expired without renewal");
        }
        Ok(expired)
    }

    fn expire(&self, mut lease: LeaseRecord) -> LeaseResult<()> {
        lease.state = LeaseState::Expired;
        lease.updated_at = epoch_secs();
        self.store.put_lease(&lease)?;
        self.release(&lease);
        warn!(job_id = %lease.job_id, cluster_id = %lease.cluster_id, "lease expired");
        Ok(())
    }

    /// Release the accounting commitment and drop session-independent
    /// tracking for a lease that just went terminal.
    fn release(&self, lease: &LeaseRecord) {
        let key = PoolKey::new(lease.cluster_id.clone(), lease.pool.clone());
        let pool = self.accountants.pool(&key);
        pool.lock()
            .unwrap_or_else(|e| e.into_inner())
            .release(lease.priority, &lease.resources);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.deadlines.remove(&lease.table_key());
        inner.cluster_by_job.remove(&lease.job_id);
    }
}
