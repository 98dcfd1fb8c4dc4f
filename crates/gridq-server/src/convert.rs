//! Wire ↔ domain conversions.
//!
//! Resource maps cross the wire as `resource name → quantity string`;
//! an unparseable quantity fails the carrying request as a protocol
//! error rather than being silently dropped.

use std::collections::{BTreeMap, HashMap};

use gridq_core::{ClusterLeasedReport, Job, NodeInfo, QueueLeasedReport, ResourceList};

use crate::error::LeaseResult;
use crate::proto;

/// Parse a wire resource map. An empty map parses to an empty list.
pub fn resource_list(raw: &HashMap<String, String>) -> LeaseResult<ResourceList> {
    let ordered: BTreeMap<String, String> =
        raw.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(ResourceList::parse(&ordered)?)
}

fn quantity_strings(list: &ResourceList) -> HashMap<String, String> {
    list.iter().map(|(k, q)| (k.to_string(), q.to_string())).collect()
}

pub fn node_info(raw: &proto::NodeInfo) -> LeaseResult<NodeInfo> {
    let mut allocated_by_priority = BTreeMap::new();
    for (priority, res) in &raw.allocated_by_priority {
        allocated_by_priority.insert(*priority, resource_list(&res.resources)?);
    }
    Ok(NodeInfo {
        name: raw.name.clone(),
        taints: raw.taints.clone(),
        labels: raw.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        allocatable: resource_list(&raw.allocatable)?,
        available: resource_list(&raw.available)?,
        total: resource_list(&raw.total)?,
        allocated_by_priority,
    })
}

pub fn leased_report(raw: &proto::ClusterLeasedReport) -> LeaseResult<ClusterLeasedReport> {
    let mut queues = Vec::with_capacity(raw.queues.len());
    for q in &raw.queues {
        queues.push(QueueLeasedReport {
            queue: q.queue.clone(),
            resources_leased: resource_list(&q.resources_leased)?,
        });
    }
    Ok(ClusterLeasedReport {
        cluster_id: raw.cluster_id.clone(),
        pool: raw.pool.clone(),
        report_time: raw.report_time.max(0) as u64,
        queues,
    })
}

pub fn job_to_proto(job: &Job) -> proto::Job {
    proto::Job {
        id: job.id.clone(),
        queue: job.queue.clone(),
        job_set: job.job_set.clone(),
        priority: job.priority,
        resources: quantity_strings(&job.resources),
        scheduler: job.scheduler.clone(),
        created_at: job.created_at as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridq_core::Quantity;
    use gridq_core::resource::cpu_mem;

    #[test]
    fn resource_map_round_trips() {
        let list = cpu_mem(1500, 64);
        let raw = quantity_strings(&list);
        assert_eq!(resource_list(&raw).unwrap(), list);
    }

    #[test]
    fn bad_quantity_is_a_protocol_error() {
        let mut raw = HashMap::new();
        raw.insert("cpu".to_string(), "lots".to_string());
        assert!(resource_list(&raw).is_err());
    }

    #[test]
    fn node_info_parses_priority_nesting() {
        let mut raw = proto::NodeInfo {
            name: "node-a".to_string(),
            taints: vec!["gpu".to_string()],
            ..Default::default()
        };
        raw.allocatable.insert("cpu".to_string(), "4".to_string());
        raw.available.insert("cpu".to_string(), "2".to_string());
        raw.allocated_by_priority.insert(
            1,
            proto::PriorityResources {
                resources: HashMap::from([("cpu".to_string(), "2".to_string())]),
            },
        );

        let node = node_info(&raw).unwrap();
        assert_eq!(node.allocatable.get("cpu"), Quantity::from_whole(4));
        assert_eq!(
            node.allocated_by_priority.get(&1).unwrap().get("cpu"),
            Quantity::from_whole(2)
        );
    }
}
