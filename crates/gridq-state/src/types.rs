//! Persisted lease records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use gridq_core::ResourceList;

/// Lifecycle state of a lease.
///
/// A lease survives the connection that issued it: connection loss keeps
/// it `Issued`/`Renewed` until an explicit return, a done report, or the
/// renewal deadline expiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    Issued,
    Renewed,
    Returned,
    Expired,
    Done,
}

impl LeaseState {
    /// States still holding committed resources.
    pub fn is_live(self) -> bool {
        matches!(self, LeaseState::Issued | LeaseState::Renewed)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_live()
    }
}

/// Relationship binding one job to one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub job_id: String,
    pub cluster_id: String,
    pub pool: String,
    pub state: LeaseState,
    /// Priority class the lease's resources were committed at.
    pub priority: i32,
    /// Resources committed for this lease.
    pub resources: ResourceList,
    /// Whether the executor has confirmed receipt of the job.
    pub delivered: bool,
    /// Soft constraint recorded on return: avoid nodes with these labels
    /// on the next scheduling attempt.
    pub avoid_node_labels: BTreeMap<String, String>,
    /// Executor-supplied reason for a return, if any.
    pub return_reason: Option<String>,
    /// Unix timestamp (seconds) the lease was issued.
    pub issued_at: u64,
    /// Unix timestamp (seconds) of the last state change.
    pub updated_at: u64,
}

impl LeaseRecord {
    /// Key for the leases table.
    pub fn table_key(&self) -> String {
        lease_key(&self.cluster_id, &self.job_id)
    }
}

/// Build the composite leases-table key.
///
/// Cluster ids must not contain `:` (the session handshake rejects
/// them); otherwise the key could not be split back apart and the
/// per-cluster prefix scan would match a neighboring cluster.
pub fn lease_key(cluster_id: &str, job_id: &str) -> String {
    format!("{cluster_id}:{job_id}")
}
