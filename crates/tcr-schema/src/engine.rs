//! Storage engines
//!
//! A [`StorageEngine`] owns isolated partitions addressed by
//! [`StorageAlias`] and executes [`SchemaOp`]s against them. Engines are not
//! assumed to support transactional DDL: each operation stands alone.

use crate::error::EngineError;
use crate::model::{ColumnSpec, SchemaOp, StorageStructure, TableSpec};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tcr_record::StorageAlias;

/// Backend holding the storage partitions
#[async_trait]
pub trait StorageEngine: Send + Sync + std::fmt::Debug {
    /// Short engine name for logs
    fn name(&self) -> &'static str;

    /// Create the partition if it does not exist
    async fn ensure_partition(&self, alias: &StorageAlias) -> Result<(), EngineError>;

    /// Drop the partition; returns whether it existed
    async fn drop_partition(&self, alias: &StorageAlias) -> Result<bool, EngineError>;

    /// Tables and columns that exist in the partition
    async fn list_structures(&self, alias: &StorageAlias) -> Result<StorageStructure, EngineError>;

    /// Execute one structural operation
    async fn execute(&self, alias: &StorageAlias, op: &SchemaOp) -> Result<(), EngineError>;
}

type Tables = BTreeMap<String, BTreeMap<String, ColumnSpec>>;

/// In-process engine with fault injection
#[derive(Debug)]
pub struct MemoryEngine {
    partitions: DashMap<StorageAlias, Tables>,
    available: AtomicBool,
    rejected: DashSet<String>,
    executed: AtomicUsize,
}

impl MemoryEngine {
    /// Empty, available engine
    #[must_use]
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
            available: AtomicBool::new(true),
            rejected: DashSet::new(),
            executed: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with [`EngineError::Unavailable`] (or recover)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Reject every operation touching `table`
    pub fn reject_table(&self, table: impl Into<String>) {
        self.rejected.insert(table.into());
    }

    /// Stop rejecting operations on `table`
    pub fn accept_table(&self, table: &str) {
        self.rejected.remove(table);
    }

    /// Number of operations that changed structure
    #[must_use]
    pub fn executed(&self) -> usize {
        self.executed.load(Ordering::SeqCst)
    }

    /// Whether the partition exists
    #[must_use]
    pub fn has_partition(&self, alias: &StorageAlias) -> bool {
        self.partitions.contains_key(alias)
    }

    /// Current shape of a table
    #[must_use]
    pub fn table(&self, alias: &StorageAlias, table: &str) -> Option<TableSpec> {
        let partition = self.partitions.get(alias)?;
        let columns = partition.get(table)?;
        Some(TableSpec {
            name: table.to_string(),
            columns: columns.values().cloned().collect(),
        })
    }

    /// Drop a table behind the synchronizer's back
    pub fn drop_table(&self, alias: &StorageAlias, table: &str) -> bool {
        self.partitions
            .get_mut(alias)
            .is_some_and(|mut p| p.remove(table).is_some())
    }

    fn check_available(&self) -> Result<(), EngineError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::Unavailable("memory engine switched off".into()))
        }
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ensure_partition(&self, alias: &StorageAlias) -> Result<(), EngineError> {
        self.check_available()?;
        self.partitions.entry(alias.clone()).or_default();
        Ok(())
    }

    async fn drop_partition(&self, alias: &StorageAlias) -> Result<bool, EngineError> {
        self.check_available()?;
        Ok(self.partitions.remove(alias).is_some())
    }

    async fn list_structures(&self, alias: &StorageAlias) -> Result<StorageStructure, EngineError> {
        self.check_available()?;
        let partition = self
            .partitions
            .get(alias)
            .ok_or_else(|| EngineError::Missing(format!("partition {alias}")))?;
        let mut structure = StorageStructure::new();
        for (table, columns) in partition.iter() {
            structure.insert_table(table.clone(), columns.keys().cloned());
        }
        Ok(structure)
    }

    async fn execute(&self, alias: &StorageAlias, op: &SchemaOp) -> Result<(), EngineError> {
        self.check_available()?;
        if self.rejected.contains(op.table()) {
            return Err(EngineError::Rejected(format!("{op}")));
        }
        let mut partition = self
            .partitions
            .get_mut(alias)
            .ok_or_else(|| EngineError::Missing(format!("partition {alias}")))?;

        match op {
            SchemaOp::CreateTable(spec) => {
                if partition.contains_key(&spec.name) {
                    return Err(EngineError::AlreadyExists(format!("table {}", spec.name)));
                }
                let columns = spec
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.clone()))
                    .collect();
                partition.insert(spec.name.clone(), columns);
            }
            SchemaOp::AddColumn { table, column } => {
                let columns = partition
                    .get_mut(table)
                    .ok_or_else(|| EngineError::Missing(format!("table {table}")))?;
                if columns.contains_key(&column.name) {
                    return Err(EngineError::AlreadyExists(format!(
                        "column {table}.{}",
                        column.name
                    )));
                }
                columns.insert(column.name.clone(), column.clone());
            }
            SchemaOp::AlterColumn { table, column } => {
                let existing = partition
                    .get_mut(table)
                    .and_then(|columns| columns.get_mut(&column.name))
                    .ok_or_else(|| EngineError::Missing(format!("column {table}.{}", column.name)))?;
                *existing = column.clone();
            }
        }
        self.executed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ColumnType;

    fn alias() -> StorageAlias {
        StorageAlias::named("tenant_7")
    }

    fn create(name: &str) -> SchemaOp {
        SchemaOp::CreateTable(TableSpec {
            name: name.into(),
            columns: vec![ColumnSpec::primary_key("id")],
        })
    }

    #[tokio::test]
    async fn executes_additive_operations() {
        let engine = MemoryEngine::new();
        engine.ensure_partition(&alias()).await.unwrap();
        engine.execute(&alias(), &create("post")).await.unwrap();
        engine
            .execute(
                &alias(),
                &SchemaOp::AddColumn {
                    table: "post".into(),
                    column: ColumnSpec::new("title", ColumnType::Text),
                },
            )
            .await
            .unwrap();

        let structure = engine.list_structures(&alias()).await.unwrap();
        assert!(structure.has_column("post", "title"));
        assert_eq!(engine.executed(), 2);

        assert!(matches!(
            engine.execute(&alias(), &create("post")).await,
            Err(EngineError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn fault_injection() {
        let engine = MemoryEngine::new();
        engine.ensure_partition(&alias()).await.unwrap();

        engine.reject_table("post");
        assert!(matches!(
            engine.execute(&alias(), &create("post")).await,
            Err(EngineError::Rejected(_))
        ));
        engine.accept_table("post");

        engine.set_available(false);
        assert!(matches!(
            engine.list_structures(&alias()).await,
            Err(EngineError::Unavailable(_))
        ));
        engine.set_available(true);
        assert!(engine.execute(&alias(), &create("post")).await.is_ok());
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let engine = MemoryEngine::new();
        let other = StorageAlias::named("tenant_8");
        engine.ensure_partition(&alias()).await.unwrap();
        engine.ensure_partition(&other).await.unwrap();
        engine.execute(&alias(), &create("post")).await.unwrap();

        assert!(!engine.list_structures(&other).await.unwrap().has_table("post"));
        assert!(engine.drop_partition(&alias()).await.unwrap());
        assert!(!engine.drop_partition(&alias()).await.unwrap());
        assert!(matches!(
            engine.execute(&alias(), &create("post")).await,
            Err(EngineError::Missing(_))
        ));
    }
}
