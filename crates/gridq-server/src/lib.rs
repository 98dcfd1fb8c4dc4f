//! gridq-server — the lease negotiation protocol.
//!
//! Executors negotiate work over one bidirectional stream per
//! connection; delivery is at-least-once and survives reconnects.
//!
//! # Architecture
//!
//! ```text
//! Executor stream
//!   └── LeaseSession (per connection, per cluster/pool)
//!       ├── absorbs NodeInfo + leased reports
//!       │     → ClusterCapacity + PoolAccountant + Aggregator
//!       ├── reconciles received_job_ids
//!       │     → LeaseLifecycleManager::mark_delivered
//!       └── selects a batch via the FairnessOracle,
//!           bounded by node shape + priority headroom,
//!           streams StreamingJobLease{job, num_jobs, num_acked}
//!
//! LeaseLifecycleManager (connection-independent)
//!   ├── Issued → Renewed → {Done | Returned | Expired}
//!   └── monotonic-clock expiry sweep
//! ```

pub mod convert;
pub mod error;
pub mod lifecycle;
pub mod oracle;
pub mod service;
pub mod session;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("gridq.lease");
}

pub use error::{LeaseError, LeaseResult};
pub use lifecycle::LeaseLifecycleManager;
pub use oracle::{BacklogOracle, BatchContext, FairnessOracle};
pub use service::LeaseServer;
pub use session::{LeaseSession, SessionContext, SessionRegistry, SessionState};
