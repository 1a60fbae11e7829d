//! TCR Schema Synchronizer
//!
//! Keeps each storage partition's structure aligned with the entity
//! declarations registered for it.
//!
//! # Core Concepts
//!
//! - [`StorageEngine`]: partitions + structural operations ([`MemoryEngine`],
//!   and `SqliteEngine` behind the `sqlite` feature)
//! - [`plan_tables`]: expected tables of a batch of declarations
//! - [`SchemaSynchronizer`]: per-partition state machine with an
//!   idempotent, additive change-set pipeline

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod engine;
mod error;
mod model;
mod plan;
#[cfg(feature = "sqlite")]
mod sqlite;
mod sync;

pub use engine::{MemoryEngine, StorageEngine};
pub use error::{EngineError, SchemaError};
pub use model::{ColumnRef, ColumnSpec, ColumnType, SchemaOp, StorageStructure, TableSpec};
pub use plan::{column_type, plan_tables, IMPLICIT_PRIMARY_KEY};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteEngine;
pub use sync::{ApplyReport, ChangeSet, SchemaSynchronizer, SyncPhase, SyncReport};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
