//! Tenant registry
//!
//! Process-wide map from namespace label to [`NamespaceDescriptor`], plus the
//! per-tenant entries (storage alias, components, loaded flag) and the schema
//! status of every storage partition.
//!
//! Descriptors live in a radix trie so that all labels of one tenant can be
//! found by the `tenant.<id>.` prefix. Each value is an `Arc`; re-registering
//! a label swaps the `Arc` under the write lock, so a reader holds either the
//! old descriptor or the new one, never a mix.

use crate::descriptor::{NamespaceDescriptor, SchemaStatus};
use crate::error::RegistryError;
use dashmap::DashMap;
use moka::sync::Cache;
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use std::collections::BTreeSet;
use std::sync::Arc;
use tcr_record::{NamespaceLabel, StorageAlias, TenantId};
use tcr_transform::{EntityDecl, EntityLookup};

/// Default capacity of the resolved-type cache
pub const DEFAULT_RESOLVED_CAPACITY: u64 = 10_000;

/// What the process knows about one tenant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantEntry {
    /// Storage partition of the tenant
    pub alias: StorageAlias,
    /// Components registered for the tenant
    pub components: BTreeSet<String>,
    /// Whether the tenant's code has been loaded
    pub loaded: bool,
}

type ResolvedKey = (NamespaceLabel, String);

/// Process-wide registry of namespaces, tenants and schema status
#[derive(Debug)]
pub struct TenantRegistry {
    namespaces: RwLock<Trie<String, Arc<NamespaceDescriptor>>>,
    tenants: DashMap<TenantId, TenantEntry>,
    schema: DashMap<StorageAlias, SchemaStatus>,
    resolved: Cache<ResolvedKey, Arc<EntityDecl>>,
}

impl TenantRegistry {
    /// Create an empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RESOLVED_CAPACITY)
    }

    /// Create an empty registry with a bounded resolved-type cache
    #[must_use]
    pub fn with_capacity(resolved_capacity: u64) -> Self {
        Self {
            namespaces: RwLock::new(Trie::new()),
            tenants: DashMap::new(),
            schema: DashMap::new(),
            resolved: Cache::new(resolved_capacity),
        }
    }

    /// Register or atomically replace a descriptor
    ///
    /// Returns the descriptor it replaced. Invalidates the resolved-type
    /// cache.
    pub fn register(&self, descriptor: NamespaceDescriptor) -> Option<Arc<NamespaceDescriptor>> {
        let label = descriptor.label.clone();
        if let Some(tenant) = label.tenant_id() {
            let mut entry = self.ensure_tenant(&tenant);
            if let Some(component) = label.component() {
                entry.components.insert(component.to_string());
            }
        }

        let previous = {
            let mut trie = self.namespaces.write();
            let previous = trie.insert(label.as_str().to_string(), Arc::new(descriptor));
            self.resolved.invalidate_all();
            previous
        };

        tracing::debug!(label = %label, replaced = previous.is_some(), "namespace registered");
        previous
    }

    /// Descriptor by label
    ///
    /// # Errors
    /// Returns [`RegistryError::NotFound`] if the label is not registered
    pub fn lookup(&self, label: &NamespaceLabel) -> Result<Arc<NamespaceDescriptor>, RegistryError> {
        self.get(label)
            .ok_or_else(|| RegistryError::NotFound(label.clone()))
    }

    /// Descriptor by label, if registered
    #[must_use]
    pub fn get(&self, label: &NamespaceLabel) -> Option<Arc<NamespaceDescriptor>> {
        self.namespaces.read().get(label.as_str()).cloned()
    }

    /// Whether the label is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, label: &NamespaceLabel) -> bool {
        self.get(label).is_some()
    }

    /// All registered descriptors
    #[must_use]
    pub fn all(&self) -> Vec<Arc<NamespaceDescriptor>> {
        self.namespaces.read().values().cloned().collect()
    }

    /// Number of registered descriptors
    #[must_use]
    pub fn len(&self) -> usize {
        self.namespaces.read().len()
    }

    /// Whether nothing is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Labels registered for a tenant, the tenant root included
    #[must_use]
    pub fn labels_for_tenant(&self, tenant: &TenantId) -> Vec<NamespaceLabel> {
        self.tenant_descriptors(tenant)
            .into_iter()
            .map(|d| d.label.clone())
            .collect()
    }

    fn tenant_descriptors(&self, tenant: &TenantId) -> Vec<Arc<NamespaceDescriptor>> {
        let prefix = NamespaceLabel::tenant_prefix(tenant);
        let root = prefix.trim_end_matches('.');
        let trie = self.namespaces.read();

        let mut found: Vec<Arc<NamespaceDescriptor>> = trie.get(root).cloned().into_iter().collect();
        if let Some(subtrie) = trie.get_raw_descendant(&prefix) {
            found.extend(
                subtrie
                    .values()
                    .filter(|d| d.label.as_str().starts_with(&prefix))
                    .cloned(),
            );
        }
        found
    }

    /// Remove one label
    pub fn remove(&self, label: &NamespaceLabel) -> Option<Arc<NamespaceDescriptor>> {
        let removed = {
            let mut trie = self.namespaces.write();
            let removed = trie.remove(label.as_str());
            if removed.is_some() {
                self.resolved.invalidate_all();
            }
            removed
        };
        if removed.is_some() {
            if let (Some(tenant), Some(component)) = (label.tenant_id(), label.component()) {
                if let Some(mut entry) = self.tenants.get_mut(&tenant) {
                    entry.components.remove(component);
                }
            }
            tracing::debug!(label = %label, "namespace removed");
        }
        removed
    }

    /// Remove every label of a tenant, its entry and its schema status
    ///
    /// Returns the number of labels removed. Removing an unknown tenant is a
    /// no-op.
    pub fn remove_tenant(&self, tenant: &TenantId) -> usize {
        let labels = self.labels_for_tenant(tenant);
        {
            let mut trie = self.namespaces.write();
            for label in &labels {
                trie.remove(label.as_str());
            }
            self.resolved.invalidate_all();
        }
        if let Some((_, entry)) = self.tenants.remove(tenant) {
            self.schema.remove(&entry.alias);
        }
        self.schema.remove(&StorageAlias::for_tenant(tenant));

        if !labels.is_empty() {
            tracing::debug!(tenant = %tenant, removed = labels.len(), "tenant removed from registry");
        }
        labels.len()
    }

    /// Entry of a tenant, created with a derived alias on first access
    pub fn ensure_tenant(
        &self,
        tenant: &TenantId,
    ) -> dashmap::mapref::one::RefMut<'_, TenantId, TenantEntry> {
        self.tenants
            .entry(tenant.clone())
            .or_insert_with(|| TenantEntry {
                alias: StorageAlias::for_tenant(tenant),
                components: BTreeSet::new(),
                loaded: false,
            })
    }

    /// Snapshot of a tenant's entry
    #[must_use]
    pub fn tenant(&self, tenant: &TenantId) -> Option<TenantEntry> {
        self.tenants.get(tenant).map(|e| e.value().clone())
    }

    /// Storage alias of a known tenant
    ///
    /// # Errors
    /// Returns [`RegistryError::UnknownTenant`] if the tenant was never seen
    pub fn alias_of(&self, tenant: &TenantId) -> Result<StorageAlias, RegistryError> {
        self.tenants
            .get(tenant)
            .map(|e| e.alias.clone())
            .ok_or_else(|| RegistryError::UnknownTenant(tenant.clone()))
    }

    /// Known tenants, sorted
    #[must_use]
    pub fn tenants(&self) -> Vec<TenantId> {
        let mut ids: Vec<TenantId> = self.tenants.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Whether a tenant's code has been loaded
    #[must_use]
    pub fn is_loaded(&self, tenant: &TenantId) -> bool {
        self.tenants.get(tenant).is_some_and(|e| e.loaded)
    }

    /// Set a tenant's loaded flag
    pub fn set_loaded(&self, tenant: &TenantId, loaded: bool) {
        self.ensure_tenant(tenant).loaded = loaded;
    }

    /// Record the schema status of a partition
    pub fn set_schema_status(&self, alias: &StorageAlias, status: SchemaStatus) {
        tracing::debug!(alias = %alias, status = ?status, "schema status updated");
        self.schema.insert(alias.clone(), status);
    }

    /// Schema status of a partition
    #[must_use]
    pub fn schema_status(&self, alias: &StorageAlias) -> Option<SchemaStatus> {
        self.schema.get(alias).map(|s| s.value().clone())
    }

    /// Declaration of `name` under `label`, through the resolved-type cache
    #[must_use]
    pub fn resolve_entity(&self, label: &NamespaceLabel, name: &str) -> Option<Arc<EntityDecl>> {
        let key = (label.clone(), name.to_string());
        if let Some(hit) = self.resolved.get(&key) {
            return Some(hit);
        }
        // Writers invalidate under the write lock, so an insert made while
        // this read guard is held cannot outlive a later replacement.
        let namespaces = self.namespaces.read();
        let decl = Arc::new(namespaces.get(label.as_str())?.entity(name)?.clone());
        self.resolved.insert(key, Arc::clone(&decl));
        drop(namespaces);
        Some(decl)
    }

    /// Declarations of every namespace stored in `alias`
    #[must_use]
    pub fn entities_in(&self, alias: &StorageAlias) -> Vec<EntityDecl> {
        self.all()
            .iter()
            .filter(|d| &d.alias == alias)
            .flat_map(|d| d.entities.iter().cloned())
            .collect()
    }
}

impl Default for TenantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityLookup for TenantRegistry {
    fn contains(&self, label: &NamespaceLabel, name: &str) -> bool {
        self.resolve_entity(label, name).is_some()
    }
}
