//! Storage structure model and schema operations

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tcr_record::{ContentHash, HashError};

/// Logical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    /// Unbounded text
    Text,
    /// 32-bit integer
    Integer,
    /// 64-bit integer
    BigInteger,
    /// Boolean
    Boolean,
    /// Double precision float
    Double,
    /// Fixed-point decimal
    Decimal,
    /// Date and time
    Timestamp,
    /// Date
    Date,
    /// JSON document
    Json,
    /// UUID
    Uuid,
}

/// Column referenced by a foreign key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    /// Referenced table
    pub table: String,
    /// Referenced column
    pub column: String,
}

/// Expected shape of one column
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name
    pub name: String,
    /// Logical type
    pub column_type: ColumnType,
    /// Accepts NULL
    pub nullable: bool,
    /// Unique constraint
    pub unique: bool,
    /// Primary key
    pub primary_key: bool,
    /// Foreign key target, when it lives in the same partition
    pub references: Option<ColumnRef>,
}

impl ColumnSpec {
    /// Non-null column without constraints
    #[must_use]
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable: false,
            unique: false,
            primary_key: false,
            references: None,
        }
    }

    /// Big-integer primary key
    #[must_use]
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name, ColumnType::BigInteger)
        }
    }
}

/// Expected shape of one table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableSpec {
    /// Table name
    pub name: String,
    /// Columns in declaration order
    pub columns: Vec<ColumnSpec>,
}

impl TableSpec {
    /// Column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// One structural storage operation
///
/// Reconciliation is additive: there are no drop operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaOp {
    /// Create a table with all its columns
    CreateTable(TableSpec),
    /// Add a column to an existing table
    AddColumn {
        /// Table
        table: String,
        /// New column
        column: ColumnSpec,
    },
    /// Change an existing column's shape
    AlterColumn {
        /// Table
        table: String,
        /// New shape
        column: ColumnSpec,
    },
}

impl SchemaOp {
    /// Table the operation touches
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable(spec) => &spec.name,
            Self::AddColumn { table, .. } | Self::AlterColumn { table, .. } => table,
        }
    }

    /// Stable identity of the operation, used to skip already-applied work
    ///
    /// # Errors
    /// Returns error if the operation cannot be serialized
    pub fn fingerprint(&self) -> Result<ContentHash, HashError> {
        ContentHash::compute_serializable(self)
    }
}

impl fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable(spec) => write!(f, "create table {}", spec.name),
            Self::AddColumn { table, column } => write!(f, "add column {table}.{}", column.name),
            Self::AlterColumn { table, column } => {
                write!(f, "alter column {table}.{}", column.name)
            }
        }
    }
}

/// Tables and column names that actually exist in a partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StorageStructure {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl StorageStructure {
    /// Empty structure
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a table and its columns
    pub fn insert_table<I, S>(&mut self, table: impl Into<String>, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .insert(table.into(), columns.into_iter().map(Into::into).collect());
    }

    /// Whether the table exists
    #[inline]
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    /// Whether the column exists
    #[must_use]
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables.get(table).is_some_and(|c| c.contains(column))
    }

    /// Table names
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Column names of a table
    pub fn columns(&self, table: &str) -> impl Iterator<Item = &str> {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|c| c.iter().map(String::as_str))
    }
}
