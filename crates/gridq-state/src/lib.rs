//! gridq-state — embedded state store for the lease scheduler.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and
//! in-memory storage for jobs, lease records, and job-set id handles.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{cluster_id}:{job_id}`, `{queue}:{job_set}`) enable
//! prefix scans for related records.
//!
//! Persisted entities carry an explicit, hand-written column mapping
//! (the [`schema::Record`] trait) checked against a [`schema::SchemaRegistry`]
//! built once at startup — no runtime reflection, no global schema state.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod jobset_mapper;
pub mod schema;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use jobset_mapper::JobSetMapper;
pub use schema::{Record, SchemaRegistry};
pub use store::StateStore;
pub use types::{LeaseRecord, LeaseState};
