//! Storage routing
//!
//! Every entity read or write asks the [`StorageRouter`] which partition to
//! use. The ambient tenant comes in as an explicit [`TenantContext`]; nothing
//! is read from thread-local or global state.

use crate::descriptor::SchemaStatus;
use crate::error::RegistryError;
use crate::registry::TenantRegistry;
use std::sync::Arc;
use tcr_record::{NamespaceKind, NamespaceLabel, StorageAlias, TenantId};

/// Tenant a unit of work runs on behalf of
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant: Option<TenantId>,
}

impl TenantContext {
    /// Context with no tenant (default storage)
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Context acting for `tenant`
    #[inline]
    #[must_use]
    pub fn for_tenant(tenant: TenantId) -> Self {
        Self {
            tenant: Some(tenant),
        }
    }

    /// Ambient tenant, if any
    #[inline]
    #[must_use]
    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }
}

/// Kind of entity operation being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Read
    Read,
    /// Write
    Write,
}

/// Outcome of the relation-crossing check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationVerdict {
    /// Relation permitted
    Allow,
    /// No opinion; the storage layer's default applies
    Defer,
}

/// Chooses the storage partition for entity operations
#[derive(Debug, Clone)]
pub struct StorageRouter {
    registry: Arc<TenantRegistry>,
    default_alias: StorageAlias,
}

impl StorageRouter {
    /// Create a router over `registry`
    #[must_use]
    pub fn new(registry: Arc<TenantRegistry>, default_alias: StorageAlias) -> Self {
        Self {
            registry,
            default_alias,
        }
    }

    /// Partition for entities of `label`, without the schema guard
    ///
    /// 1. A tenant context plus a system label routes to the context tenant
    ///    (tenants shadow system entities in their own storage).
    /// 2. A label encoding a tenant routes to that tenant.
    /// 3. Everything else goes to the default partition.
    #[must_use]
    pub fn alias_for(&self, label: &NamespaceLabel, ctx: &TenantContext) -> StorageAlias {
        if let Some(tenant) = ctx.tenant() {
            if label.kind() == NamespaceKind::System {
                return self.tenant_alias(tenant);
            }
        }
        match label.tenant_id() {
            Some(owner) => self.tenant_alias(&owner),
            None => self.default_alias.clone(),
        }
    }

    fn tenant_alias(&self, tenant: &TenantId) -> StorageAlias {
        self.registry
            .alias_of(tenant)
            .unwrap_or_else(|_| StorageAlias::for_tenant(tenant))
    }

    /// Partition for an entity operation
    ///
    /// # Errors
    /// Returns [`RegistryError::UnverifiedSchema`] unless the partition's
    /// schema is verified
    pub fn route(
        &self,
        label: &NamespaceLabel,
        ctx: &TenantContext,
        access: Access,
    ) -> Result<StorageAlias, RegistryError> {
        let alias = self.alias_for(label, ctx);
        match self.registry.schema_status(&alias) {
            Some(SchemaStatus::Verified) => {
                tracing::trace!(label = %label, alias = %alias, ?access, "routed");
                Ok(alias)
            }
            Some(SchemaStatus::Pending) => Err(RegistryError::unverified(
                alias,
                "schema synchronization in progress",
            )),
            Some(SchemaStatus::Unverified { reason }) => {
                Err(RegistryError::unverified(alias, reason))
            }
            None => Err(RegistryError::unverified(alias, "never synchronized")),
        }
    }

    /// Partition for a read
    ///
    /// # Errors
    /// See [`StorageRouter::route`]
    #[inline]
    pub fn route_read(
        &self,
        label: &NamespaceLabel,
        ctx: &TenantContext,
    ) -> Result<StorageAlias, RegistryError> {
        self.route(label, ctx, Access::Read)
    }

    /// Partition for a write
    ///
    /// # Errors
    /// See [`StorageRouter::route`]
    #[inline]
    pub fn route_write(
        &self,
        label: &NamespaceLabel,
        ctx: &TenantContext,
    ) -> Result<StorageAlias, RegistryError> {
        self.route(label, ctx, Access::Write)
    }

    /// Whether a relation between entities of `a` and `b` is permitted
    ///
    /// Permissive on purpose: any relation touching a tenant namespace is
    /// allowed, even between two different tenants.
    #[must_use]
    pub fn allow_relation(&self, a: &NamespaceLabel, b: &NamespaceLabel) -> RelationVerdict {
        match (a.kind(), b.kind()) {
            (NamespaceKind::Tenant, _) | (_, NamespaceKind::Tenant) => RelationVerdict::Allow,
            (NamespaceKind::System, NamespaceKind::System) => RelationVerdict::Allow,
            _ => RelationVerdict::Defer,
        }
    }
}
