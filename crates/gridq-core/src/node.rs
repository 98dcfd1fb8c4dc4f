//! NodeInfo — executor-reported node snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resource::ResourceList;

/// Snapshot of one physical node, as reported by an executor.
///
/// Replaced wholesale on every capacity report; there are no partial
/// updates. Two nodes with identical taints, labels, and allocatable
/// resources are interchangeable for admission purposes (see the
/// NodeType classifier in gridq-accounting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    /// Taints restricting which jobs may land here.
    pub taints: Vec<String>,
    /// Scheduling labels.
    pub labels: BTreeMap<String, String>,
    /// Total resources schedulable on this node.
    pub allocatable: ResourceList,
    /// Resources currently free.
    pub available: ResourceList,
    /// Raw machine total (allocatable plus system reservations).
    pub total: ResourceList,
    /// Resources already consumed on this node, per priority class.
    pub allocated_by_priority: BTreeMap<i32, ResourceList>,
}

impl NodeInfo {
    /// Resources free to a job at `priority`: currently available plus
    /// everything consumed by lazier classes (numerically greater, lower
    /// urgency), which a job at `priority` could displace.
    pub fn available_at_priority(&self, priority: i32) -> ResourceList {
        let mut avail = self.available.clone();
        for (p, used) in &self.allocated_by_priority {
            if *p > priority {
                avail.add_assign(used);
            }
        }
        avail
    }
}
