//! SQLite storage engine
//!
//! One database per partition: `<root>/<alias>.db`, or a private in-memory
//! database per alias when no root is configured. DDL is rendered with
//! `sea-query`; introspection reads `sqlite_master` and `pragma_table_info`.

use crate::engine::StorageEngine;
use crate::error::EngineError;
use crate::model::{ColumnSpec, ColumnType, SchemaOp, StorageStructure, TableSpec};
use async_trait::async_trait;
use dashmap::DashMap;
use sea_query::{Alias, ColumnDef, ForeignKey, SqliteQueryBuilder, Table};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use tcr_record::StorageAlias;

/// SQLite-backed engine
#[derive(Debug)]
pub struct SqliteEngine {
    root: Option<PathBuf>,
    pools: DashMap<StorageAlias, SqlitePool>,
}

impl SqliteEngine {
    /// Engine storing one database file per partition under `root`
    #[must_use]
    pub fn on_disk(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            pools: DashMap::new(),
        }
    }

    /// Engine keeping every partition in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            root: None,
            pools: DashMap::new(),
        }
    }

    fn database_path(&self, alias: &StorageAlias) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("{alias}.db")))
    }

    async fn connect(&self, alias: &StorageAlias) -> Result<SqlitePool, EngineError> {
        let pool = match self.database_path(alias) {
            Some(path) => {
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                SqlitePoolOptions::new().connect_with(options).await
            }
            // A memory database lives as long as its single connection.
            None => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .min_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect("sqlite::memory:")
                    .await
            }
        };
        pool.map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    fn pool(&self, alias: &StorageAlias) -> Result<SqlitePool, EngineError> {
        self.pools
            .get(alias)
            .map(|p| p.value().clone())
            .ok_or_else(|| EngineError::Missing(format!("partition {alias}")))
    }
}

fn column_def(spec: &ColumnSpec) -> ColumnDef {
    let mut def = ColumnDef::new(Alias::new(spec.name.as_str()));
    match spec.column_type {
        ColumnType::Text => def.text(),
        ColumnType::Integer => def.integer(),
        ColumnType::BigInteger => def.big_integer(),
        ColumnType::Boolean => def.boolean(),
        ColumnType::Double => def.double(),
        ColumnType::Decimal => def.decimal(),
        ColumnType::Timestamp => def.timestamp(),
        ColumnType::Date => def.date(),
        ColumnType::Json => def.json(),
        ColumnType::Uuid => def.uuid(),
    };
    if spec.primary_key {
        def.primary_key();
    } else if spec.nullable {
        def.null();
    } else {
        def.not_null();
    }
    if spec.unique && !spec.primary_key {
        def.unique_key();
    }
    def
}

fn create_table_sql(spec: &TableSpec) -> String {
    let mut stmt = Table::create();
    stmt.table(Alias::new(spec.name.as_str()));
    for column in &spec.columns {
        stmt.col(&mut column_def(column));
    }
    for column in &spec.columns {
        if let Some(target) = &column.references {
            stmt.foreign_key(
                ForeignKey::create()
                    .from(Alias::new(spec.name.as_str()), Alias::new(column.name.as_str()))
                    .to(Alias::new(target.table.as_str()), Alias::new(target.column.as_str())),
            );
        }
    }
    stmt.to_string(SqliteQueryBuilder)
}

fn add_column_sql(table: &str, column: &ColumnSpec) -> String {
    // SQLite cannot add a NOT NULL column without a default to existing rows.
    let mut column = column.clone();
    column.nullable = true;
    column.primary_key = false;
    column.unique = false;
    Table::alter()
        .table(Alias::new(table))
        .add_column(&mut column_def(&column))
        .to_string(SqliteQueryBuilder)
}

fn classify(err: sqlx::Error, what: &str) -> EngineError {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            if message.contains("already exists") || message.contains("duplicate column") {
                EngineError::AlreadyExists(what.to_string())
            } else if message.contains("no such table") {
                EngineError::Missing(what.to_string())
            } else {
                EngineError::Rejected(format!("{what}: {message}"))
            }
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            EngineError::Unavailable(err.to_string())
        }
        other => EngineError::Rejected(format!("{what}: {other}")),
    }
}

#[async_trait]
impl StorageEngine for SqliteEngine {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn ensure_partition(&self, alias: &StorageAlias) -> Result<(), EngineError> {
        if self.pools.contains_key(alias) {
            return Ok(());
        }
        if let Some(root) = &self.root {
            tokio::fs::create_dir_all(root)
                .await
                .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        }
        let pool = self.connect(alias).await?;
        self.pools.entry(alias.clone()).or_insert(pool);
        tracing::debug!(alias = %alias, "sqlite partition opened");
        Ok(())
    }

    async fn drop_partition(&self, alias: &StorageAlias) -> Result<bool, EngineError> {
        let Some((_, pool)) = self.pools.remove(alias) else {
            return Ok(false);
        };
        pool.close().await;
        if let Some(path) = self.database_path(alias) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(EngineError::Unavailable(e.to_string())),
            }
        }
        Ok(true)
    }

    async fn list_structures(&self, alias: &StorageAlias) -> Result<StorageStructure, EngineError> {
        let pool = self.pool(alias)?;
        let tables = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await
        .map_err(|e| classify(e, "list tables"))?;

        let mut structure = StorageStructure::new();
        for row in tables {
            let table: String = row
                .try_get("name")
                .map_err(|e| classify(e, "list tables"))?;
            let columns = sqlx::query("SELECT name FROM pragma_table_info(?1)")
                .bind(&table)
                .fetch_all(&pool)
                .await
                .map_err(|e| classify(e, &table))?
                .into_iter()
                .map(|r| r.try_get::<String, _>("name"))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| classify(e, &table))?;
            structure.insert_table(table, columns);
        }
        Ok(structure)
    }

    async fn execute(&self, alias: &StorageAlias, op: &SchemaOp) -> Result<(), EngineError> {
        let sql = match op {
            SchemaOp::CreateTable(spec) => create_table_sql(spec),
            SchemaOp::AddColumn { table, column } => add_column_sql(table, column),
            SchemaOp::AlterColumn { .. } => {
                return Err(EngineError::Unsupported(format!("{op} on sqlite")));
            }
        };
        let pool = self.pool(alias)?;
        tracing::trace!(alias = %alias, %sql, "executing ddl");
        sqlx::query(&sql)
            .execute(&pool)
            .await
            .map_err(|e| classify(e, &op.to_string()))?;
        Ok(())
    }
}
