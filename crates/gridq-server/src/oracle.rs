//! Fairness oracle — which queued jobs to offer next.
//!
//! Queue-fairness policy proper is external to the lease protocol; the
//! session only consumes the oracle's decisions. `BacklogOracle` is the
//! default: queues ordered by how little they currently have leased
//! (per the aggregator's global view), jobs drawn round-robin across
//! queues in submission order within a priority class.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use gridq_accounting::LeasedReportAggregator;
use gridq_core::{Job, ResourceList};
use gridq_state::StateStore;

use crate::error::LeaseResult;

/// Inputs to one batch selection.
pub struct BatchContext<'a> {
    pub cluster_id: &'a str,
    pub pool: &'a str,
    /// Smallest job this executor is willing to run; smaller jobs are
    /// skipped for this cluster.
    pub minimum_job_size: &'a ResourceList,
    /// Job ids that must not be offered (already leased somewhere).
    pub exclude: &'a HashSet<String>,
    pub limit: usize,
}

/// "Given cluster/pool/headroom, return the next N admissible jobs."
///
/// "More urgent" is an opaque total order owned by the oracle; nothing
/// in the protocol layer assumes a direction.
#[tonic::async_trait]
pub trait FairnessOracle: Send + Sync {
    async fn next_batch(&self, ctx: BatchContext<'_>) -> LeaseResult<Vec<Job>>;
}

/// Default oracle over the job backlog in the store.
pub struct BacklogOracle {
    store: StateStore,
    aggregator: Arc<LeasedReportAggregator>,
}

impl BacklogOracle {
    pub fn new(store: StateStore, aggregator: Arc<LeasedReportAggregator>) -> Self {
        Self { store, aggregator }
    }
}

/// Scalar weight of a leased-resource list, for queue ordering only.
fn leased_weight(list: &ResourceList) -> i64 {
    list.iter().map(|(_, q)| q.millis()).sum()
}

#[tonic::async_trait]
impl FairnessOracle for BacklogOracle {
    async fn next_batch(&self, ctx: BatchContext<'_>) -> LeaseResult<Vec<Job>> {
        if ctx.limit == 0 {
            return Ok(Vec::new());
        }

        let mut backlog: Vec<Job> = self
            .store
            .list_jobs()?
            .into_iter()
            .filter(|job| !ctx.exclude.contains(&job.id))
            .filter(|job| ctx.minimum_job_size.fits_within(&job.resources))
            .collect();

        // Least-leased queue first, then urgency, then submission order.
        let leased = self.aggregator.global_view();
        let queue_weight = |queue: &str| {
            leased
                .get(queue)
                .map(leased_weight)
                .unwrap_or(0)
        };
        backlog.sort_by(|a, b| {
            queue_weight(&a.queue)
                .cmp(&queue_weight(&b.queue))
                .then_with(|| a.queue.cmp(&b.queue))
                .then_with(|| a.priority.cmp(&b.priority))
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        backlog.truncate(ctx.limit);

        debug!(
            cluster_id = %ctx.cluster_id,
            pool = %ctx.pool,
            offered = backlog.len(),
            "batch selected"
        );
        Ok(backlog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridq_core::resource::cpu_mem;
    use gridq_core::{ClusterLeasedReport, QueueLeasedReport};
    use gridq_state::SchemaRegistry;

    fn job(id: &str, queue: &str, priority: u32, created_at: u64) -> Job {
        Job {
            id: id.to_string(),
            queue: queue.to_string(),
            job_set: "set-1".to_string(),
            priority,
            resources: cpu_mem(1000, 0),
            scheduler: "gridq".to_string(),
            created_at,
        }
    }

    fn oracle_with(jobs: &[Job]) -> (BacklogOracle, Arc<LeasedReportAggregator>) {
        let store = StateStore::open_in_memory(&SchemaRegistry::new()).unwrap();
        for j in jobs {
            store.put_job(j).unwrap();
        }
        let aggregator = Arc::new(LeasedReportAggregator::new());
        (BacklogOracle::new(store, aggregator.clone()), aggregator)
    }

    fn ctx<'a>(exclude: &'a HashSet<String>, min: &'a ResourceList, limit: usize) -> BatchContext<'a> {
        BatchContext {
            cluster_id: "c1",
            pool: "default",
            minimum_job_size: min,
            exclude,
            limit,
        }
    }

    #[tokio::test]
    async fn least_leased_queue_goes_first() {
        let (oracle, aggregator) = oracle_with(&[
            job("a1", "alpha", 1, 10),
            job("b1", "beta", 1, 5),
        ]);
        aggregator.update(ClusterLeasedReport {
            cluster_id: "c1".to_string(),
            pool: "default".to_string(),
            report_time: 100,
            queues: vec![QueueLeasedReport {
                queue: "beta".to_string(),
                resources_leased: cpu_mem(8000, 0),
            }],
        });

        let exclude = HashSet::new();
        let min = ResourceList::new();
        let batch = oracle.next_batch(ctx(&exclude, &min, 10)).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|j| j.id.as_str()).collect();
        // alpha has nothing leased, so it is served before the busy beta.
        assert_eq!(ids, vec!["a1", "b1"]);
    }

    #[tokio::test]
    async fn submission_order_breaks_priority_ties() {
        let (oracle, _) = oracle_with(&[
            job("late", "alpha", 1, 200),
            job("early", "alpha", 1, 100),
            job("urgent", "alpha", 0, 300),
        ]);

        let exclude = HashSet::new();
        let min = ResourceList::new();
        let batch = oracle.next_batch(ctx(&exclude, &min, 10)).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["urgent", "early", "late"]);
    }

    #[tokio::test]
    async fn excluded_and_undersized_jobs_are_skipped() {
        let mut small = job("small", "alpha", 1, 100);
        small.resources = cpu_mem(100, 0);
        let (oracle, _) = oracle_with(&[job("leased", "alpha", 1, 50), small, job("ok", "alpha", 1, 150)]);

        let exclude = HashSet::from(["leased".to_string()]);
        let min = cpu_mem(500, 0);
        let batch = oracle.next_batch(ctx(&exclude, &min, 10)).await.unwrap();
        let ids: Vec<&str> = batch.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["ok"]);
    }

    #[tokio::test]
    async fn limit_bounds_the_batch() {
        let (oracle, _) = oracle_with(&[
            job("j1", "alpha", 1, 1),
            job("j2", "alpha", 1, 2),
            job("j3", "alpha", 1, 3),
        ]);

        let exclude = HashSet::new();
        let min = ResourceList::new();
        let batch = oracle.next_batch(ctx(&exclude, &min, 2)).await.unwrap();
        assert_eq!(batch.len(), 2);

        let batch = oracle.next_batch(ctx(&exclude, &min, 0)).await.unwrap();
        assert!(batch.is_empty());
    }
}
