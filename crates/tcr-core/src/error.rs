//! Error types for the tenant pipeline
//!
//! Taxonomy:
//! - `NotFound`: expected negative result, never logged as an error
//! - `StoreUnavailable`: transient infrastructure failure, retried by the caller
//! - `Transform`: malformed tenant source
//! - `SchemaApplyFailed`: structural change stopped part way, retried by the caller
//! - `UnverifiedSchema`: guard state, blocks entity operations only

use std::path::PathBuf;
use tcr_record::{PathError, StorageAlias};
use tcr_registry::RegistryError;
use tcr_schema::SchemaError;
use tcr_transform::TransformError;

/// Errors from a [`CodeRecordStore`](crate::store::CodeRecordStore)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store cannot be reached
    #[error("code record store unavailable: {0}")]
    Unavailable(String),
}

/// Errors reading a [`RecordManifest`](crate::store::RecordManifest)
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// Manifest file cannot be read
    #[error("reading manifest {path}: {source}")]
    Io {
        /// Manifest path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Manifest text is not valid YAML or JSON for a record list
    #[error("parsing manifest{}: {source}", manifest_path(.path))]
    Parse {
        /// Manifest path, when parsed from a file
        path: Option<PathBuf>,
        /// Parser error
        #[source]
        source: serde_yaml::Error,
    },
}

fn manifest_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

/// Errors from module resolution
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolveError {
    /// No resolver produced a unit for the path
    #[error("module not found: {0}")]
    NotFound(String),

    /// The record store failed while looking up candidates
    #[error("resolving {path}: {source}")]
    StoreUnavailable {
        /// Logical path being resolved
        path: String,
        /// Store error
        #[source]
        source: StoreError,
    },

    /// The record was found but its source is malformed
    #[error("transforming {path}: {source}")]
    Transform {
        /// Logical path being resolved
        path: String,
        /// Transform error
        #[source]
        source: TransformError,
    },
}

impl ResolveError {
    /// Whether this is a plain negative result
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Errors from the namespace materializer
#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    /// Listing records failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Filesystem operation failed
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being written or removed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A record path cannot be mirrored to disk
    #[error("record path cannot be materialized: {0}")]
    InvalidPath(#[from] PathError),
}

impl MaterializeError {
    /// Create IO error for path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Main error type of the platform
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    /// Expected negative result
    #[error("not found: {0}")]
    NotFound(String),

    /// Code record store unavailable
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),

    /// Malformed tenant source
    #[error("transform error in {path}: {source}")]
    Transform {
        /// Module or namespace the error came from
        path: String,
        /// Transform error
        #[source]
        source: TransformError,
    },

    /// Schema synchronization failed; descriptors stay registered
    #[error("schema synchronization failed: {0}")]
    SchemaApplyFailed(#[from] SchemaError),

    /// Entity operation refused because the partition is not verified
    #[error("unverified schema on {alias}: {reason}")]
    UnverifiedSchema {
        /// Partition
        alias: StorageAlias,
        /// Why it is not verified
        reason: String,
    },

    /// Writing the mirrored namespace failed
    #[error("materialization failed: {0}")]
    Materialize(#[source] MaterializeError),

    /// Patch set does not apply to the tenant
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// Invalid identifier or label
    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl PlatformError {
    /// Whether the caller may retry the operation as is
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::SchemaApplyFailed(_))
    }

    /// Whether this is a plain negative result
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Create transform error
    pub fn transform(path: impl Into<String>, source: TransformError) -> Self {
        Self::Transform {
            path: path.into(),
            source,
        }
    }
}

impl From<ResolveError> for PlatformError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(path) => Self::NotFound(path),
            ResolveError::StoreUnavailable { source, .. } => Self::StoreUnavailable(source),
            ResolveError::Transform { path, source } => Self::Transform { path, source },
        }
    }
}

impl From<RegistryError> for PlatformError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(label) => Self::NotFound(label.to_string()),
            RegistryError::UnknownTenant(tenant) => Self::NotFound(format!("tenant {tenant}")),
            RegistryError::UnverifiedSchema { alias, reason } => {
                Self::UnverifiedSchema { alias, reason }
            }
        }
    }
}

impl From<MaterializeError> for PlatformError {
    fn from(err: MaterializeError) -> Self {
        match err {
            MaterializeError::Store(source) => Self::StoreUnavailable(source),
            other => Self::Materialize(other),
        }
    }
}
