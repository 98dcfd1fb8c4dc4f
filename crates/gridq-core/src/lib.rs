//! gridq-core — shared domain model for the gridq scheduler.
//!
//! Defines the resource-quantity arithmetic used by admission decisions,
//! the Job/NodeInfo/leased-report types exchanged with executors, and the
//! TOML server configuration.
//!
//! Resource quantities are integer milli-units end to end: `"100m"` is
//! 100, `"2"` is 2000. Keeping the math in integers makes the accounting
//! invariant ("allocated never exceeds allocatable in any priority band")
//! checkable without tolerance fudging.

pub mod config;
pub mod job;
pub mod node;
pub mod report;
pub mod resource;

pub use config::ServerConfig;
pub use job::Job;
pub use node::NodeInfo;
pub use report::{ClusterLeasedReport, QueueLeasedReport};
pub use resource::{Quantity, QuantityError, ResourceList};
