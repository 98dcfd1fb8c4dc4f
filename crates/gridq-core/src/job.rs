//! Job — the immutable unit of work.

use serde::{Deserialize, Serialize};

use crate::resource::ResourceList;

/// A submitted batch job.
///
/// Immutable after submission; the scheduler only ever reads it. Terminal
/// jobs (done or failed for good) are archived out of the active store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Owning queue.
    pub queue: String,
    /// Job-set grouping within the queue (event subscription scope).
    pub job_set: String,
    /// Priority class. The direction of "more urgent" is owned by the
    /// fairness oracle; nothing in the core treats it as ordered.
    pub priority: u32,
    /// Resources requested for one run of this job.
    pub resources: ResourceList,
    /// Which scheduling authority owns this job.
    pub scheduler: String,
    /// Unix timestamp (seconds) at submission.
    pub created_at: u64,
}

impl Job {
    /// Key for the jobs table.
    pub fn table_key(&self) -> &str {
        &self.id
    }

    /// Priority as a signed accounting band. Values beyond `i32::MAX`
    /// clamp to the laziest band rather than wrapping negative (which
    /// would read as most urgent).
    pub fn priority_band(&self) -> i32 {
        i32::try_from(self.priority).unwrap_or(i32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::cpu_mem;

    #[test]
    fn priority_band_clamps_instead_of_wrapping() {
        let mut job = Job {
            id: "j1".to_string(),
            queue: "alpha".to_string(),
            job_set: "set-1".to_string(),
            priority: 7,
            resources: cpu_mem(1000, 0),
            scheduler: "gridq".to_string(),
            created_at: 0,
        };
        assert_eq!(job.priority_band(), 7);

        job.priority = u32::MAX;
        assert_eq!(job.priority_band(), i32::MAX);
    }
}
