//! Registry error types

use tcr_record::{NamespaceLabel, StorageAlias, TenantId};

/// Errors raised by the tenant registry and the storage router
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No descriptor is registered under the label
    #[error("namespace not registered: {0}")]
    NotFound(NamespaceLabel),

    /// Tenant is not known to this process
    #[error("unknown tenant: {0}")]
    UnknownTenant(TenantId),

    /// The storage partition's schema has not been verified
    #[error("unverified schema on {alias}: {reason}")]
    UnverifiedSchema {
        /// Partition the operation was routed to
        alias: StorageAlias,
        /// Why the schema is not verified
        reason: String,
    },
}

impl RegistryError {
    /// Create unverified schema error
    pub fn unverified(alias: StorageAlias, reason: impl Into<String>) -> Self {
        Self::UnverifiedSchema {
            alias,
            reason: reason.into(),
        }
    }

    /// Whether this is a plain negative lookup
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::UnknownTenant(_))
    }
}
