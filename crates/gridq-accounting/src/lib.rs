//! gridq-accounting — admission math for the lease scheduler.
//!
//! Three pieces, all operating on executor-reported snapshots:
//!
//! - [`node_type`]: groups near-identical nodes into equivalence classes
//!   so admission reasons about "units of node shape T free" instead of
//!   individual nodes.
//! - [`accountant`]: the single source of truth for resources committed
//!   to live leases, per cluster/pool and priority band.
//! - [`aggregator`]: newest-wins rollup of per-queue leased resources,
//!   feeding the fairness oracle.

pub mod accountant;
pub mod aggregator;
pub mod node_type;

pub use accountant::{AccountantRegistry, PoolAccountant, PoolKey};
pub use aggregator::LeasedReportAggregator;
pub use node_type::{ClusterCapacity, NodeTypeAggregate, NodeTypeKey, classify_nodes};
