//! Explicit schema registry and per-entity field mapping.
//!
//! Every persisted entity implements [`Record`] with a hand-written
//! `field_values()` returning its columns as an ordered list — a
//! compile-time-checked table instead of runtime introspection. The
//! [`SchemaRegistry`] holds the declared column set per table; it is
//! constructed once during startup and passed by reference to whatever
//! needs it (the store verifies records against it when opening).

use serde_json::Value;

use gridq_core::Job;

use crate::error::{StateError, StateResult};
use crate::types::LeaseRecord;

/// A single column value, typed at the storage boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    U64(u64),
    I64(i64),
    Bool(bool),
    /// Structured columns (resource lists, label maps).
    Json(Value),
}

/// Declared columns for one table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: &'static str,
    pub columns: &'static [&'static str],
}

/// A persistable entity with an explicit column mapping.
pub trait Record {
    /// Table this record belongs to.
    const TABLE: &'static str;

    /// Declared column names, in field order.
    fn columns() -> &'static [&'static str];

    /// Ordered (column, value) pairs. Order and names must match
    /// `columns()` exactly.
    fn field_values(&self) -> Vec<(&'static str, FieldValue)>;
}

const JOB_COLUMNS: &[&str] = &[
    "id",
    "queue",
    "job_set",
    "priority",
    "resources",
    "scheduler",
    "created_at",
];

const LEASE_COLUMNS: &[&str] = &[
    "job_id",
    "cluster_id",
    "pool",
    "state",
    "priority",
    "resources",
    "delivered",
    "avoid_node_labels",
    "return_reason",
    "issued_at",
    "updated_at",
];

/// All declared table schemas.
///
/// Built once at startup; components hold a shared reference rather than
/// consulting global state.
#[derive(Debug)]
pub struct SchemaRegistry {
    tables: Vec<TableSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            tables: vec![
                TableSchema {
                    table: "jobs",
                    columns: JOB_COLUMNS,
                },
                TableSchema {
                    table: "leases",
                    columns: LEASE_COLUMNS,
                },
            ],
        }
    }

    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.table == table)
    }

    /// Check that a record type's declared columns match the registry,
    /// name for name and in order.
    pub fn verify<R: Record>(&self) -> StateResult<()> {
        let schema = self.get(R::TABLE).ok_or_else(|| {
            StateError::Schema(format!("no schema declared for table {}", R::TABLE))
        })?;
        if R::columns() != schema.columns {
            return Err(StateError::Schema(format!(
                "table {}: record columns {:?} do not match schema {:?}",
                R::TABLE,
                R::columns(),
                schema.columns
            )));
        }
        Ok(())
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Record for Job {
    const TABLE: &'static str = "jobs";

    fn columns() -> &'static [&'static str] {
        JOB_COLUMNS
    }

    fn field_values(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("id", FieldValue::Str(self.id.clone())),
            ("queue", FieldValue::Str(self.queue.clone())),
            ("job_set", FieldValue::Str(self.job_set.clone())),
            ("priority", FieldValue::U64(u64::from(self.priority))),
            (
                "resources",
                FieldValue::Json(serde_json::to_value(&self.resources).unwrap_or(Value::Null)),
            ),
            ("scheduler", FieldValue::Str(self.scheduler.clone())),
            ("created_at", FieldValue::U64(self.created_at)),
        ]
    }
}

impl Record for LeaseRecord {
    const TABLE: &'static str = "leases";

    fn columns() -> &'static [&'static str] {
        LEASE_COLUMNS
    }

    fn field_values(&self) -> Vec<(&'static str, FieldValue)> {
        vec![
            ("job_id", FieldValue::Str(self.job_id.clone())),
            ("cluster_id", FieldValue::Str(self.cluster_id.clone())),
            ("pool", FieldValue::Str(self.pool.clone())),
            (
                "state",
                FieldValue::Json(serde_json::to_value(self.state).unwrap_or(Value::Null)),
            ),
            ("priority", FieldValue::I64(i64::from(self.priority))),
            (
                "resources",
                FieldValue::Json(serde_json::to_value(&self.resources).unwrap_or(Value::Null)),
            ),
            ("delivered", FieldValue::Bool(self.delivered)),
            (
                "avoid_node_labels",
                FieldValue::Json(
                    serde_json::to_value(&self.avoid_node_labels).unwrap_or(Value::Null),
                ),
            ),
            (
                "return_reason",
                FieldValue::Json(
                    serde_json::to_value(&self.return_reason).unwrap_or(Value::Null),
                ),
            ),
            ("issued_at", FieldValue::U64(self.issued_at)),
            ("updated_at", FieldValue::U64(self.updated_at)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridq_core::resource::cpu_mem;
    use std::collections::BTreeMap;

    fn sample_job() -> Job {
        Job {
            id: "job-1".to_string(),
            queue: "alpha".to_string(),
            job_set: "set-1".to_string(),
            priority: 1,
            resources: cpu_mem(1000, 64),
            scheduler: "gridq".to_string(),
            created_at: 1000,
        }
    }

    fn sample_lease() -> LeaseRecord {
        LeaseRecord {
            job_id: "job-1".to_string(),
            cluster_id: "c1".to_string(),
            pool: "default".to_string(),
            state: crate::types::LeaseState::Issued,
            priority: 1,
            resources: cpu_mem(1000, 64),
            delivered: false,
            avoid_node_labels: BTreeMap::new(),
            return_reason: None,
            issued_at: 1000,
            updated_at: 1000,
        }
    }

    #[test]
    fn records_match_schema() {
        let registry = SchemaRegistry::new();
        registry.verify::<Job>().unwrap();
        registry.verify::<LeaseRecord>().unwrap();
    }

    #[test]
    fn field_values_follow_declared_columns() {
        for (record, declared) in [
            (
                sample_job().field_values().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
                Job::columns(),
            ),
            (
                sample_lease().field_values().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
                LeaseRecord::columns(),
            ),
        ] {
            assert_eq!(record.as_slice(), declared);
        }
    }

    #[test]
    fn unknown_table_is_rejected() {
        let registry = SchemaRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn field_values_are_ordered() {
        let names: Vec<&str> = sample_lease()
            .field_values()
            .iter()
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(names.first(), Some(&"job_id"));
        assert_eq!(names.last(), Some(&"updated_at"));
    }
}
