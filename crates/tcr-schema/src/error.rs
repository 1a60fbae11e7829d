//! Schema error types

use tcr_record::{HashError, StorageAlias};

/// Errors reported by a storage engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Engine cannot be reached
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Structure already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Partition, table or column does not exist
    #[error("missing: {0}")]
    Missing(String),

    /// Engine refused the operation
    #[error("rejected: {0}")]
    Rejected(String),

    /// Engine cannot perform this kind of operation
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl EngineError {
    /// Whether a retry may succeed without changing anything
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors raised by the schema synchronizer
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// Engine failure outside of change-set application
    #[error("storage engine error on {alias}: {source}")]
    Engine {
        /// Partition
        alias: StorageAlias,
        /// Engine error
        #[source]
        source: EngineError,
    },

    /// Change-set application stopped part way
    #[error("schema apply failed on {alias} at '{failed}' after {} applied operation(s): {source}", applied.len())]
    ApplyFailed {
        /// Partition
        alias: StorageAlias,
        /// Operations applied before the failure, in order
        applied: Vec<String>,
        /// Operation that failed
        failed: String,
        /// Engine error
        #[source]
        source: EngineError,
    },

    /// Operation fingerprint could not be computed
    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] HashError),
}

impl SchemaError {
    /// Create engine error for a partition
    pub fn engine(alias: &StorageAlias, source: EngineError) -> Self {
        Self::Engine {
            alias: alias.clone(),
            source,
        }
    }

    /// Whether the caller may retry
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApplyFailed { .. } => true,
            Self::Engine { source, .. } => source.is_transient(),
            Self::Fingerprint(_) => false,
        }
    }

    /// Partition the error belongs to
    #[must_use]
    pub fn alias(&self) -> Option<&StorageAlias> {
        match self {
            Self::Engine { alias, .. } | Self::ApplyFailed { alias, .. } => Some(alias),
            Self::Fingerprint(_) => None,
        }
    }
}
