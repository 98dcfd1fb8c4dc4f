//! Queue leased-report aggregation.
//!
//! Executors report per-queue resource consumption with every lease
//! request. The aggregator keeps the newest report per (cluster, pool)
//! and rolls the set up into the global per-queue view the fairness
//! oracle sorts by. Reports supersede, they never merge: a report is a
//! full snapshot of its cluster, and merging two generations would
//! double-count.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use tracing::debug;

use gridq_core::{ClusterLeasedReport, ResourceList};

use crate::accountant::PoolKey;

/// Keeps the freshest `ClusterLeasedReport` per cluster/pool.
#[derive(Default)]
pub struct LeasedReportAggregator {
    reports: Mutex<HashMap<PoolKey, ClusterLeasedReport>>,
}

impl LeasedReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a report. A report older than the stored one for the same
    /// cluster/pool is dropped; an equal `report_time` replaces (last
    /// writer wins).
    pub fn update(&self, report: ClusterLeasedReport) {
        let key = PoolKey::new(report.cluster_id.clone(), report.pool.clone());
        let mut reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        match reports.get(&key) {
            Some(existing) if existing.report_time > report.report_time => {
                debug!(
                    cluster_id = %report.cluster_id,
                    pool = %report.pool,
                    stale = report.report_time,
                    current = existing.report_time,
                    "stale leased report dropped"
                );
            }
            _ => {
                reports.insert(key, report);
            }
        }
    }

    /// The stored report for one cluster/pool, if any.
    pub fn cluster_view(&self, key: &PoolKey) -> Option<ClusterLeasedReport> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).get(key).cloned()
    }

    /// Per-queue resources leased across all clusters.
    pub fn global_view(&self) -> BTreeMap<String, ResourceList> {
        let reports = self.reports.lock().unwrap_or_else(|e| e.into_inner());
        let mut view: BTreeMap<String, ResourceList> = BTreeMap::new();
        for report in reports.values() {
            for queue in &report.queues {
                view.entry(queue.queue.clone())
                    .or_default()
                    .add_assign(&queue.resources_leased);
            }
        }
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridq_core::QueueLeasedReport;
    use gridq_core::resource::cpu_mem;

    fn report(cluster: &str, time: u64, queue: &str, cpu_millis: i64) -> ClusterLeasedReport {
        ClusterLeasedReport {
            cluster_id: cluster.to_string(),
            pool: "default".to_string(),
            report_time: time,
            queues: vec![QueueLeasedReport {
                queue: queue.to_string(),
                resources_leased: cpu_mem(cpu_millis, 0),
            }],
        }
    }

    #[test]
    fn newest_report_supersedes() {
        let agg = LeasedReportAggregator::new();
        agg.update(report("c1", 100, "alpha", 1000));
        agg.update(report("c1", 200, "alpha", 2000));

        let key = PoolKey::new("c1", "default");
        let view = agg.cluster_view(&key).unwrap();
        assert_eq!(view.report_time, 200);
        assert_eq!(view.total_leased().get("cpu").millis(), 2000);
    }

    #[test]
    fn stale_report_is_dropped_not_merged() {
        let agg = LeasedReportAggregator::new();
        agg.update(report("c1", 200, "alpha", 2000));
        agg.update(report("c1", 100, "alpha", 9000));

        let key = PoolKey::new("c1", "default");
        let view = agg.cluster_view(&key).unwrap();
        assert_eq!(view.report_time, 200);
        assert_eq!(view.total_leased().get("cpu").millis(), 2000);
    }

    #[test]
    fn global_view_sums_across_clusters() {
        let agg = LeasedReportAggregator::new();
        agg.update(report("c1", 100, "alpha", 1000));
        agg.update(report("c2", 100, "alpha", 500));
        agg.update(report("c2", 100, "beta", 300));

        // The c2 update above replaced its own earlier queues entry, so
        // re-send both queues in one report as an executor would.
        let mut combined = report("c2", 101, "alpha", 500);
        combined.queues.push(QueueLeasedReport {
            queue: "beta".to_string(),
            resources_leased: cpu_mem(300, 0),
        });
        agg.update(combined);

        let view = agg.global_view();
        assert_eq!(view.get("alpha").unwrap().get("cpu").millis(), 1500);
        assert_eq!(view.get("beta").unwrap().get("cpu").millis(), 300);
    }

    #[test]
    fn unknown_cluster_has_no_view() {
        let agg = LeasedReportAggregator::new();
        assert!(agg.cluster_view(&PoolKey::new("nope", "default")).is_none());
    }
}
