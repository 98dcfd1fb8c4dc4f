//! redb table definitions for the gridq state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types, except `job_sets` which stores a bare u64 handle).

use redb::TableDefinition;

/// Active jobs keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Terminal jobs moved out of the active set, keyed by `{job_id}`.
pub const ARCHIVED_JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("archived_jobs");

/// Lease records keyed by `{cluster_id}:{job_id}`.
pub const LEASES: TableDefinition<&str, &[u8]> = TableDefinition::new("leases");

/// Job-set id handles keyed by `{queue}:{job_set}`.
pub const JOB_SETS: TableDefinition<&str, u64> = TableDefinition::new("job_sets");

/// Store-wide counters (next job-set id).
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Meta key holding the next unassigned job-set id.
pub const NEXT_JOB_SET_ID: &str = "next_job_set_id";
