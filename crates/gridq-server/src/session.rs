//! Lease session — the per-connection protocol state machine.
//!
//! One session per live executor stream for a given cluster/pool:
//! `Handshake → Streaming → AwaitingAcks → Draining → Closed`. The first
//! message must carry a cluster id; pool, resources, report, minimum job
//! size, and node snapshots are sticky, reusing the last non-empty value
//! on later messages.
//!
//! Closing the stream destroys the session but never its leases: those
//! persist in the lifecycle manager, and a reconnecting executor resumes
//! them through `received_job_ids`. The session runs over a generic
//! inbound `Stream` and an outbound `mpsc::Sender`, so the whole machine
//! is unit-testable without a socket.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tonic::Status;
use tracing::{debug, info, warn};

use gridq_accounting::{AccountantRegistry, ClusterCapacity, LeasedReportAggregator, PoolKey};
use gridq_core::{Job, ResourceList};
use gridq_state::{JobSetMapper, StateStore};

use crate::convert;
use crate::error::{LeaseError, LeaseResult};
use crate::lifecycle::LeaseLifecycleManager;
use crate::oracle::{BatchContext, FairnessOracle};
use crate::proto;

type Outbound = mpsc::Sender<Result<proto::StreamingJobLease, Status>>;

/// Shared dependencies handed to every session.
pub struct SessionContext {
    pub store: StateStore,
    pub lifecycle: Arc<LeaseLifecycleManager>,
    pub oracle: Arc<dyn FairnessOracle>,
    pub aggregator: Arc<LeasedReportAggregator>,
    pub accountants: Arc<AccountantRegistry>,
    /// Resolves (queue, job_set) to the durable handle lease events are
    /// recorded under.
    pub job_sets: Arc<JobSetMapper>,
    pub max_batch_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshake,
    Streaming,
    AwaitingAcks,
    Draining,
    Closed,
}

/// Guards against two live sessions claiming the same cluster/pool.
///
/// The newer claimant is rejected; the claim is released when the
/// holding session's guard drops.
#[derive(Default)]
pub struct SessionRegistry {
    active: Mutex<HashSet<PoolKey>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(self: &Arc<Self>, key: PoolKey) -> LeaseResult<SessionGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(key.clone()) {
            return Err(LeaseError::Conflict(format!(
                "{}/{} already has a live session",
                key.cluster_id, key.pool
            )));
        }
        Ok(SessionGuard {
            registry: self.clone(),
            key,
        })
    }
}

pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    key: PoolKey,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut active = self
            .registry
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        active.remove(&self.key);
    }
}

pub struct LeaseSession {
    ctx: Arc<SessionContext>,
    registry: Arc<SessionRegistry>,
    state: SessionState,
    guard: Option<SessionGuard>,
    cluster_id: String,
    pool: String,
    /// Sticky pool-wide resource total from the last non-empty report.
    resources: ResourceList,
    /// Sticky minimum job size.
    minimum_job_size: ResourceList,
    /// Capacity view from the last non-empty node snapshot; batch
    /// selection reserves against it until the next snapshot replaces it.
    capacity: ClusterCapacity,
}

impl LeaseSession {
    pub fn new(ctx: Arc<SessionContext>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            ctx,
            registry,
            state: SessionState::Handshake,
            guard: None,
            cluster_id: String::new(),
            pool: String::new(),
            resources: ResourceList::new(),
            minimum_job_size: ResourceList::new(),
            capacity: ClusterCapacity::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session over an inbound stream until it ends.
    pub async fn run<S>(mut self, mut inbound: S, out: Outbound)
    where
        S: futures_util::Stream<Item = Result<proto::StreamingLeaseRequest, Status>> + Unpin,
    {
        while let Some(next) = inbound.next().await {
            let req = match next {
                Ok(req) => req,
                Err(status) => {
                    debug!(cluster_id = %self.cluster_id, %status, "inbound stream error");
                    break;
                }
            };
            match self.handle_message(req, &out).await {
                Ok(()) if self.state == SessionState::Draining => break,
                Ok(()) => {}
                Err(err) => {
                    warn!(cluster_id = %self.cluster_id, error = %err, "session failed");
                    let _ = out.send(Err(err.into())).await;
                    break;
                }
            }
        }
        // Issued leases stay committed; only session-local state dies.
        self.state = SessionState::Closed;
        info!(cluster_id = %self.cluster_id, pool = %self.pool, "lease session closed");
    }

    /// Process one inbound request: refresh sticky state, reconcile
    /// acknowledgments, select a batch, stream it out.
    pub async fn handle_message(
        &mut self,
        req: proto::StreamingLeaseRequest,
        out: &Outbound,
    ) -> LeaseResult<()> {
        if self.state == SessionState::AwaitingAcks {
            self.state = SessionState::Streaming;
        }
        if self.state == SessionState::Handshake {
            self.handshake(&req)?;
        }
        self.absorb_report(&req)?;

        // Acknowledgments: everything the executor claims to have
        // received is marked delivered, whatever stream delivered it.
        self.ctx
            .lifecycle
            .mark_delivered(&self.cluster_id, &req.received_job_ids)?;

        let batch = self.select_batch().await?;
        let num_jobs = batch.num_jobs;
        let num_acked = batch.num_acked;
        for job in batch.jobs {
            let lease = proto::StreamingJobLease {
                job: Some(convert::job_to_proto(&job)),
                num_jobs,
                num_acked,
            };
            if out.send(Ok(lease)).await.is_err() {
                // Receiver gone: connection loss. The issued leases
                // survive for resumption on the next stream.
                self.state = SessionState::Draining;
                return Ok(());
            }
        }
        debug!(
            cluster_id = %self.cluster_id,
            pool = %self.pool,
            num_jobs,
            num_acked,
            "batch streamed"
        );
        self.state = SessionState::AwaitingAcks;
        Ok(())
    }

    fn handshake(&mut self, req: &proto::StreamingLeaseRequest) -> LeaseResult<()> {
        if req.cluster_id.is_empty() {
            return Err(LeaseError::Protocol(
                "handshake missing cluster id".to_string(),
            ));
        }
        // Lease table keys are `{cluster_id}:{job_id}`; a colon in the
        // cluster id would collide with them.
        if req.cluster_id.contains(':') {
            return Err(LeaseError::Protocol(format!(
                "cluster id {:?} must not contain ':'",
                req.cluster_id
            )));
        }
        self.cluster_id = req.cluster_id.clone();
        self.pool = if req.pool.is_empty() {
            "default".to_string()
        } else {
            req.pool.clone()
        };
        self.guard = Some(
            self.registry
                .claim(PoolKey::new(self.cluster_id.clone(), self.pool.clone()))?,
        );
        self.state = SessionState::Streaming;
        info!(cluster_id = %self.cluster_id, pool = %self.pool, "lease session opened");
        Ok(())
    }

    /// Fold the request's capacity view into sticky session state and the
    /// shared accounting structures. Empty fields keep the prior value.
    fn absorb_report(&mut self, req: &proto::StreamingLeaseRequest) -> LeaseResult<()> {
        if !req.resources.is_empty() {
            self.resources = convert::resource_list(&req.resources)?;
        }
        if !req.minimum_job_size.is_empty() {
            self.minimum_job_size = convert::resource_list(&req.minimum_job_size)?;
        }
        if !req.nodes.is_empty() {
            let mut nodes = Vec::with_capacity(req.nodes.len());
            for raw in &req.nodes {
                nodes.push(convert::node_info(raw)?);
            }
            self.capacity = ClusterCapacity::from_nodes(&nodes);
        }

        // Pool total: the explicit resource report wins, else the summed
        // allocatable of the reported nodes.
        let total = if !self.resources.is_empty() {
            self.resources.clone()
        } else {
            let mut sum = ResourceList::new();
            for agg in self.capacity.node_types().values() {
                sum.add_assign(&agg.allocatable);
            }
            sum
        };
        if !total.is_empty() {
            let key = PoolKey::new(self.cluster_id.clone(), self.pool.clone());
            let pool = self.ctx.accountants.pool(&key);
            pool.lock().unwrap_or_else(|e| e.into_inner()).set_total(total);
        }

        if let Some(report) = &req.cluster_leased_report {
            self.ctx.aggregator.update(convert::leased_report(report)?);
        }
        Ok(())
    }

    /// Assemble the next batch: confirmed leases count toward
    /// `num_acked`, undelivered live leases are re-sent, and new jobs are
    /// drawn from the oracle bounded by node-shape fit and priority
    /// headroom.
    async fn select_batch(&mut self) -> LeaseResult<SelectedBatch> {
        let live = self.ctx.lifecycle.live_leases(&self.cluster_id)?;
        let acked = live.iter().filter(|l| l.delivered).count();

        let mut jobs = Vec::new();
        for lease in live.iter().filter(|l| !l.delivered) {
            match self.ctx.store.get_job(&lease.job_id)? {
                Some(job) => jobs.push(job),
                // The job vanished under a live lease; skip, expiry will
                // reclaim the commitment.
                None => warn!(job_id = %lease.job_id, "live lease without a job"),
            }
        }
        let resent = jobs.len();

        let exclude = self.ctx.lifecycle.leased_job_ids();
        let limit = self.ctx.max_batch_size.saturating_sub(resent);
        let candidates = if limit > 0 {
            self.ctx
                .oracle
                .next_batch(BatchContext {
                    cluster_id: &self.cluster_id,
                    pool: &self.pool,
                    minimum_job_size: &self.minimum_job_size,
                    exclude: &exclude,
                    limit,
                })
                .await?
        } else {
            Vec::new()
        };

        for job in candidates {
            if !self.reserve_capacity(&job) {
                continue;
            }
            if self.ctx.lifecycle.issue(&self.cluster_id, &self.pool, &job)? {
                let job_set_id = self.ctx.job_sets.get(&job.queue, &job.job_set).await?;
                debug!(job_id = %job.id, job_set_id, "lease selected");
                jobs.push(job);
            }
        }

        Ok(SelectedBatch {
            num_jobs: (acked + jobs.len()) as u32,
            num_acked: acked as u32,
            jobs,
        })
    }

    /// Node-shape admission. Without a node snapshot the session falls
    /// back to pool-level accounting alone (the lifecycle manager's
    /// `can_admit` check). A job whose last lease was returned with
    /// avoid labels is steered away from matching node types.
    fn reserve_capacity(&mut self, job: &Job) -> bool {
        if self.capacity.is_empty() {
            return true;
        }
        match self.ctx.lifecycle.avoid_labels_for(&job.id) {
            Some(avoid) => {
                self.capacity
                    .try_reserve_avoiding(&job.resources, job.priority_band(), &avoid)
            }
            None => self.capacity.try_reserve(&job.resources, job.priority_band()),
        }
    }
}

/// One selected batch, sized and annotated at selection time.
struct SelectedBatch {
    jobs: Vec<Job>,
    num_jobs: u32,
    num_acked: u32,
}
