//! NodeType classification.
//!
//! A NodeType is the equivalence class of a node under (taint set, label
//! set, allocatable resources). Pools routinely hold hundreds of
//! near-identical nodes; grouping them lets batch selection ask "how many
//! units of shape T are free" rather than walking nodes one by one.
//!
//! Classification is a pure function of the reported snapshot; nothing
//! here holds state across reports.

use std::collections::{BTreeMap, HashMap};

use gridq_core::{NodeInfo, ResourceList};

/// Equivalence-class key: normalized taints, labels, and the exact
/// allocatable vector (exact equality, not within-tolerance).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeTypeKey {
    /// Sorted, deduplicated taints.
    taints: Vec<String>,
    /// Sorted label pairs.
    labels: Vec<(String, String)>,
    /// Allocatable resources of a single node of this type.
    allocatable: ResourceList,
}

impl NodeTypeKey {
    pub fn from_node(node: &NodeInfo) -> Self {
        let mut taints = node.taints.clone();
        taints.sort();
        taints.dedup();
        // BTreeMap iteration is already sorted by key.
        let labels = node
            .labels
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            taints,
            labels,
            allocatable: node.allocatable.clone(),
        }
    }

    /// Allocatable resources of one node of this type.
    pub fn node_allocatable(&self) -> &ResourceList {
        &self.allocatable
    }

    pub fn labels(&self) -> &[(String, String)] {
        &self.labels
    }

    pub fn taints(&self) -> &[String] {
        &self.taints
    }
}

/// Aggregate view of all nodes sharing one NodeType.
///
/// Nodes differing only in already-consumed resources land in the same
/// aggregate; their available resources are summed, never compared.
#[derive(Debug, Clone, Default)]
pub struct NodeTypeAggregate {
    /// Number of nodes in this class.
    pub count: u32,
    /// Summed allocatable resources.
    pub allocatable: ResourceList,
    /// Summed currently-free resources.
    pub available: ResourceList,
    /// Summed per-priority consumption across the class.
    pub allocated_by_priority: BTreeMap<i32, ResourceList>,
}

impl NodeTypeAggregate {
    fn absorb(&mut self, node: &NodeInfo) {
        self.count += 1;
        self.allocatable.add_assign(&node.allocatable);
        self.available.add_assign(&node.available);
        for (priority, used) in &node.allocated_by_priority {
            self.allocated_by_priority
                .entry(*priority)
                .or_default()
                .add_assign(used);
        }
    }

    /// Resources free to a job at `priority`: currently available plus
    /// whatever lazier classes (numerically greater) consume, which the
    /// job could displace.
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

/// Group a node snapshot into NodeType classes.
pub fn classify_nodes(nodes: &[NodeInfo]) -> HashMap<NodeTypeKey, NodeTypeAggregate> {
    let mut classes: HashMap<NodeTypeKey, NodeTypeAggregate> = HashMap::new();
    for node in nodes {
        classes
            .entry(NodeTypeKey::from_node(node))
            .or_default()
            .absorb(node);
    }
    classes
}

/// Mutable capacity view used while selecting one batch.
///
/// Batch selection reserves capacity job by job; the reservation is local
/// to the batch and rebuilt from the next capacity report.
#[derive(Debug, Clone, Default)]
pub struct ClusterCapacity {
    types: HashMap<NodeTypeKey, NodeTypeAggregate>,
}

impl ClusterCapacity {
    pub fn from_nodes(nodes: &[NodeInfo]) -> Self {
        Self {
            types: classify_nodes(nodes),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn node_types(&self) -> &HashMap<NodeTypeKey, NodeTypeAggregate> {
        &self.types
    }

    /// Total resources free at `priority` across all node types.
    pub fn total_available_at_priority(&self, priority: i32) -> ResourceList {
        let mut total = ResourceList::new();
        for agg in self.types.values() {
            total.add_assign(&agg.available_at_priority(priority));
        }
        total
    }

    /// Reserve capacity for one job, if any node type can take it.
    ///
    /// The request must fit the single-node allocatable shape of the type
    /// (a summed class can look roomy while no one node fits the job) and
    /// the class's summed availability at the job's priority.
    pub fn try_reserve(&mut self, request: &ResourceList, priority: i32) -> bool {
        self.reserve_where(request, priority, |_| true)
    }

    /// Reserve, preferring node types whose labels share no pair with
    /// `avoid`. The preference is soft: when only avoided types fit, the
    /// job still lands on one of them.
    pub fn try_reserve_avoiding(
        &mut self,
        request: &ResourceList,
        priority: i32,
        avoid: &BTreeMap<String, String>,
    ) -> bool {
        if avoid.is_empty() {
            return self.try_reserve(request, priority);
        }
        self.reserve_where(request, priority, |key| {
            !key.labels.iter().any(|(k, v)| avoid.get(k) == Some(v))
        }) || self.try_reserve(request, priority)
    }

    fn reserve_where(
        &mut self,
        request: &ResourceList,
        priority: i32,
        eligible: impl Fn(&NodeTypeKey) -> bool,
    ) -> bool {
        let key = self
            .types
            .iter()
            .find(|(key, agg)| {
                eligible(key)
                    && request.fits_within(key.node_allocatable())
                    && request.fits_within(&agg.available_at_priority(priority))
            })
            .map(|(key, _)| key.clone());

        match key {
            Some(key) => {
                if let Some(agg) = self.types.get_mut(&key) {
                    agg.available.sub_assign_saturating(request);
                }
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridq_core::Quantity;
    use gridq_core::resource::cpu_mem;

    fn node(name: &str, taints: &[&str], labels: &[(&str, &str)], cpu_millis: i64) -> NodeInfo {
        NodeInfo {
            name: name.to_string(),
            taints: taints.iter().map(|t| t.to_string()).collect(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            allocatable: cpu_mem(cpu_millis, 0),
            available: cpu_mem(cpu_millis, 0),
            total: cpu_mem(cpu_millis, 0),
            allocated_by_priority: BTreeMap::new(),
        }
    }

    #[test]
    fn identical_nodes_share_a_class() {
        let nodes = vec![
            node("a", &["gpu"], &[("zone", "1")], 4000),
            node("b", &["gpu"], &[("zone", "1")], 4000),
        ];
        let classes = classify_nodes(&nodes);
        assert_eq!(classes.len(), 1);
        let agg = classes.values().next().unwrap();
        assert_eq!(agg.count, 2);
        assert_eq!(agg.available.get("cpu"), Quantity::from_millis(8000));
    }

    #[test]
    fn key_is_order_and_duplicate_independent() {
        let a = node("a", &["t1", "t2"], &[("x", "1")], 4000);
        let b = node("b", &["t2", "t1", "t1"], &[("x", "1")], 4000);
        assert_eq!(NodeTypeKey::from_node(&a), NodeTypeKey::from_node(&b));
    }

    #[test]
    fn allocatable_difference_splits_classes() {
        let nodes = vec![
            node("a", &[], &[], 4000),
            node("b", &[], &[], 8000),
        ];
        assert_eq!(classify_nodes(&nodes).len(), 2);
    }

    #[test]
    fn consumed_resources_do_not_split_classes() {
        let mut busy = node("busy", &[], &[], 4000);
        busy.available = cpu_mem(1000, 0);
        let idle = node("idle", &[], &[], 4000);

        let classes = classify_nodes(&[busy, idle]);
        assert_eq!(classes.len(), 1);
        let agg = classes.values().next().unwrap();
        // Available is summed, not compared.
        assert_eq!(agg.available.get("cpu"), Quantity::from_millis(5000));
    }

    #[test]
    fn classification_is_submission_order_independent() {
        let a = node("a", &["t"], &[("k", "v")], 2000);
        let b = node("b", &[], &[], 2000);
        let c = node("c", &["t"], &[("k", "v")], 2000);

        let forward = classify_nodes(&[a.clone(), b.clone(), c.clone()]);
        let reverse = classify_nodes(&[c, b, a]);

        assert_eq!(forward.len(), reverse.len());
        for (key, agg) in &forward {
            let other = reverse.get(key).unwrap();
            assert_eq!(agg.count, other.count);
            assert_eq!(agg.available, other.available);
        }
    }

    #[test]
    fn preemption_headroom_counts_lower_priorities() {
        let mut n = node("a", &[], &[], 10_000);
        n.available = cpu_mem(2000, 0);
        n.allocated_by_priority.insert(1, cpu_mem(5000, 0));
        n.allocated_by_priority.insert(5, cpu_mem(3000, 0));

        let classes = classify_nodes(&[n]);
        let agg = classes.values().next().unwrap();

        // Priority 3 can displace lazier priority-5 work, not priority-1.
        assert_eq!(
            agg.available_at_priority(3).get("cpu"),
            Quantity::from_millis(5000)
        );
        assert_eq!(
            agg.available_at_priority(0).get("cpu"),
            Quantity::from_millis(10_000)
        );
        assert_eq!(
            agg.available_at_priority(10).get("cpu"),
            Quantity::from_millis(2000)
        );
    }

    #[test]
    fn reserve_steers_away_from_avoided_labels() {
        let nodes = vec![
            node("a", &[], &[("zone", "1")], 4000),
            node("b", &[], &[("zone", "2")], 4000),
        ];
        let mut cap = ClusterCapacity::from_nodes(&nodes);

        let avoid = BTreeMap::from([("zone".to_string(), "1".to_string())]);
        assert!(cap.try_reserve_avoiding(&cpu_mem(3000, 0), 0, &avoid));

        // The reservation landed on zone 2, leaving zone 1 untouched.
        for (key, agg) in cap.node_types() {
            let expected = if key.labels() == [("zone".to_string(), "1".to_string())] {
                4000
            } else {
                1000
            };
            assert_eq!(agg.available.get("cpu"), Quantity::from_millis(expected));
        }
    }

    #[test]
    fn reserve_falls_back_when_only_avoided_types_fit() {
        let nodes = vec![node("a", &[], &[("zone", "1")], 4000)];
        let mut cap = ClusterCapacity::from_nodes(&nodes);

        let avoid = BTreeMap::from([("zone".to_string(), "1".to_string())]);
        // Soft constraint: the avoided type is the only fit, so take it.
        assert!(cap.try_reserve_avoiding(&cpu_mem(3000, 0), 0, &avoid));
        assert!(!cap.try_reserve_avoiding(&cpu_mem(3000, 0), 0, &avoid));
    }

    #[test]
    fn reserve_respects_single_node_shape() {
        // Two 4-CPU nodes: 8 CPU summed, but a 6-CPU job fits no node.
        let nodes = vec![node("a", &[], &[], 4000), node("b", &[], &[], 4000)];
        let mut cap = ClusterCapacity::from_nodes(&nodes);

        assert!(!cap.try_reserve(&cpu_mem(6000, 0), 0));
        assert!(cap.try_reserve(&cpu_mem(3000, 0), 0));
        assert!(cap.try_reserve(&cpu_mem(3000, 0), 0));
        // 2 CPU left in the class.
        assert!(!cap.try_reserve(&cpu_mem(3000, 0), 0));
    }
}
