//! Leased-resource reports — the fairness accounting input.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceList;

/// Resources currently leased to one queue on one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueLeasedReport {
    pub queue: String,
    pub resources_leased: ResourceList,
}

/// Per-cluster breakdown of leased resources by queue.
///
/// Executors send one of these with every lease request. Reports
/// supersede by `report_time`; a stale report is dropped, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterLeasedReport {
    pub cluster_id: String,
    pub pool: String,
    /// Unix timestamp (seconds) the executor took this snapshot.
    pub report_time: u64,
    pub queues: Vec<QueueLeasedReport>,
}

impl ClusterLeasedReport {
    /// Total resources leased across all queues in this report.
    pub fn total_leased(&self) -> ResourceList {
        let mut total = ResourceList::new();
        for q in &self.queues {
            total.add_assign(&q.resources_leased);
        }
        total
    }
}
