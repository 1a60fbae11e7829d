//! Tenant loading pipeline
//!
//! Loading a tenant runs, in order:
//!
//! 1. materialize the namespace to disk (resolvers refuse the tenant while
//!    this runs)
//! 2. resolve and transform every entity module of every component
//! 3. capture and bind declarations
//! 4. register one descriptor per component plus the tenant root, with the
//!    partition marked `Pending`
//! 5. synchronize the partition against tenant and system declarations
//! 6. mark the partition `Verified` (or `Unverified` with the reason)
//!
//! Nothing is registered until steps 1–3 have succeeded.

use crate::config::PlatformConfig;
use crate::error::PlatformError;
use crate::materialize::{MaterializationGuard, MaterializeReport, NamespaceMaterializer};
use crate::resolve::{ModuleCache, RecordResolver, ResolverChain};
use crate::store::CodeRecordStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use tcr_record::{
    ContentHash, LogicalPath, NamespaceKind, NamespaceLabel, StorageAlias, TenantId,
    COMPONENTS_SEGMENT,
};
use tcr_registry::{NamespaceDescriptor, SchemaStatus, TenantRegistry};
use tcr_schema::{SchemaSynchronizer, SyncReport};
use tcr_transform::{Binder, EntityDecl, EntityRef, IdentityRebind};

/// Outcome of loading one tenant
#[derive(Debug, Clone)]
pub struct LoadReport {
    /// Loaded tenant
    pub tenant: TenantId,
    /// Its storage partition
    pub alias: StorageAlias,
    /// Labels registered, tenant root first
    pub labels: Vec<NamespaceLabel>,
    /// Labels dropped because their component vanished
    pub removed: Vec<NamespaceLabel>,
    /// Number of entity declarations registered
    pub entities: usize,
    /// Relations bound through the identity shim
    pub rebinds: Vec<IdentityRebind>,
    /// Disk mirror outcome
    pub materialized: MaterializeReport,
    /// Schema synchronization outcome
    pub sync: SyncReport,
}

/// Declarations captured for one label
#[derive(Debug)]
struct Captured {
    label: NamespaceLabel,
    modules: Vec<LogicalPath>,
    hashes: Vec<ContentHash>,
}

impl Captured {
    fn source_hash(&self) -> ContentHash {
        ContentHash::compute_parts(self.hashes.iter().map(|h| &h.as_bytes()[..]))
    }
}

/// Runs the per-tenant pipeline
#[derive(Debug, Clone)]
pub struct TenantLoader {
    config: Arc<PlatformConfig>,
    store: Arc<dyn CodeRecordStore>,
    resolvers: ResolverChain,
    cache: ModuleCache,
    registry: Arc<TenantRegistry>,
    synchronizer: SchemaSynchronizer,
    materializer: NamespaceMaterializer,
    identity: EntityRef,
}

impl TenantLoader {
    /// Wire a loader over `store`
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] if the identity label is invalid
    pub fn new(
        config: Arc<PlatformConfig>,
        store: Arc<dyn CodeRecordStore>,
        registry: Arc<TenantRegistry>,
        synchronizer: SchemaSynchronizer,
    ) -> Result<Self, PlatformError> {
        let identity = config.identity_ref()?;
        let guard = MaterializationGuard::new();
        let cache = ModuleCache::new(config.module_cache_capacity);
        let resolvers = ResolverChain::new().with(Arc::new(RecordResolver::new(
            config.namespace_prefix.clone(),
            Arc::clone(&store),
            guard.clone(),
            cache.clone(),
        )));
        let materializer =
            NamespaceMaterializer::new(config.materialize_root.clone(), Arc::clone(&store), guard);
        Ok(Self {
            config,
            store,
            resolvers,
            cache,
            registry,
            synchronizer,
            materializer,
            identity,
        })
    }

    /// Resolver chain used for tenant modules
    #[inline]
    #[must_use]
    pub fn resolvers(&self) -> &ResolverChain {
        &self.resolvers
    }

    /// Module cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }

    /// Disk materializer
    #[inline]
    #[must_use]
    pub fn materializer(&self) -> &NamespaceMaterializer {
        &self.materializer
    }

    /// Registry the loader writes to
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Schema synchronizer
    #[inline]
    #[must_use]
    pub fn synchronizer(&self) -> &SchemaSynchronizer {
        &self.synchronizer
    }

    /// Register the configured system namespaces and synchronize the
    /// default partition
    ///
    /// # Errors
    /// Returns [`PlatformError::Transform`] for malformed system source and
    /// [`PlatformError::SchemaApplyFailed`] if the default partition cannot
    /// be synchronized (it is then `Unverified`)
    #[tracing::instrument(skip(self))]
    pub async fn bootstrap(&self) -> Result<SyncReport, PlatformError> {
        let alias = self.config.default_alias();
        self.registry.set_schema_status(&alias, SchemaStatus::Pending);

        let mut captured = Vec::new();
        let mut decls = Vec::new();
        for (label, source) in self.config.system_labels()? {
            let module = tcr_transform::process(source, &label)
                .map_err(|e| PlatformError::transform(label.as_str(), e))?;
            captured.push(Captured {
                modules: vec![label.as_str().parse()?],
                hashes: vec![ContentHash::compute(source.as_bytes())],
                label,
            });
            decls.extend(module.entities);
        }

        let registry = Arc::clone(&self.registry);
        let system_lookup = move |label: &NamespaceLabel, name: &str| {
            label.kind() != NamespaceKind::Tenant && registry.resolve_entity(label, name).is_some()
        };
        Binder::new(None, &self.identity, &system_lookup)
            .bind(&mut decls)
            .map_err(|e| PlatformError::transform("bootstrap", e))?;

        for ns in &captured {
            let entities: Vec<EntityDecl> =
                decls.iter().filter(|d| d.label == ns.label).cloned().collect();
            self.registry.register(
                NamespaceDescriptor::new(ns.label.clone(), alias.clone())
                    .with_modules(ns.modules.clone(), ns.source_hash())
                    .with_entities(entities),
            );
        }
        if self
            .registry
            .resolve_entity(&self.identity.label, &self.identity.name)
            .is_none()
        {
            tracing::warn!(identity = %self.identity, "identity type is not declared by any system namespace");
        }

        let partition = self.registry.entities_in(&alias);
        self.finish_sync(&alias, &partition).await
    }

    /// Load (or re-load) a tenant's code
    ///
    /// # Errors
    /// - [`PlatformError::StoreUnavailable`] if records cannot be read; nothing
    ///   is registered
    /// - [`PlatformError::Transform`] for malformed source or unresolvable
    ///   relations; nothing is registered
    /// - [`PlatformError::SchemaApplyFailed`] if storage could not be brought
    ///   in line; descriptors stay registered and the partition is
    ///   `Unverified`
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn load_tenant(&self, tenant: &TenantId) -> Result<LoadReport, PlatformError> {
        let materialized = self.materializer.materialize(tenant).await?;

        let components = self.store.list_components(tenant).await?;
        let mut decls = Vec::new();
        let mut captured = vec![self.capture(tenant, None, &mut decls).await?];
        for component in &components {
            captured.push(self.capture(tenant, Some(component), &mut decls).await?);
        }

        let rebinds = self.bind(tenant, &mut decls)?;

        let alias = self.registry.ensure_tenant(tenant).alias.clone();
        self.registry.set_schema_status(&alias, SchemaStatus::Pending);

        let previous: BTreeSet<NamespaceLabel> =
            self.registry.labels_for_tenant(tenant).into_iter().collect();
        let mut labels = Vec::with_capacity(captured.len());
        for ns in captured {
            let entities: Vec<EntityDecl> =
                decls.iter().filter(|d| d.label == ns.label).cloned().collect();
            self.registry.register(
                NamespaceDescriptor::new(ns.label.clone(), alias.clone())
                    .with_modules(ns.modules.clone(), ns.source_hash())
                    .with_entities(entities),
            );
            labels.push(ns.label);
        }
        let removed: Vec<NamespaceLabel> = previous
            .into_iter()
            .filter(|label| !labels.contains(label))
            .collect();
        for label in &removed {
            self.registry.remove(label);
        }
        self.registry.set_loaded(tenant, true);

        let mut partition = self.registry.entities_in(&alias);
        partition.extend(self.system_entities());
        let sync = self.finish_sync(&alias, &partition).await?;

        tracing::info!(
            tenant = %tenant,
            alias = %alias,
            labels = labels.len(),
            entities = decls.len(),
            removed = removed.len(),
            rebinds = rebinds.len(),
            "tenant loaded"
        );
        Ok(LoadReport {
            tenant: tenant.clone(),
            alias,
            labels,
            removed,
            entities: decls.len(),
            rebinds,
            materialized,
            sync,
        })
    }

    /// Drop cached modules of the tenant and load it again
    ///
    /// # Errors
    /// See [`TenantLoader::load_tenant`]
    pub async fn reload_tenant(&self, tenant: &TenantId) -> Result<LoadReport, PlatformError> {
        self.cache.invalidate_tenant(tenant);
        self.load_tenant(tenant).await
    }

    /// Forget a tenant everywhere: caches, registry, disk mirror and
    /// storage partition. Failures are logged, never returned.
    ///
    /// Returns the number of labels that were registered.
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn unload_tenant(&self, tenant: &TenantId) -> usize {
        self.cache.invalidate_tenant(tenant);
        let alias = self
            .registry
            .alias_of(tenant)
            .unwrap_or_else(|_| StorageAlias::for_tenant(tenant));
        let labels = self.registry.remove_tenant(tenant);

        if let Err(e) = self.materializer.remove(tenant).await {
            tracing::warn!(error = %e, "failed to remove materialized namespace");
        }
        match self.synchronizer.engine().drop_partition(&alias).await {
            Ok(existed) => tracing::debug!(alias = %alias, existed, "partition dropped"),
            Err(e) => tracing::warn!(alias = %alias, error = %e, "failed to drop partition"),
        }
        self.synchronizer.forget(&alias);
        labels
    }

    async fn capture(
        &self,
        tenant: &TenantId,
        component: Option<&str>,
        decls: &mut Vec<EntityDecl>,
    ) -> Result<Captured, PlatformError> {
        let label = NamespaceLabel::tenant(tenant, component)?;
        let mut base = vec![self.config.namespace_prefix.clone(), tenant.to_string()];
        if let Some(c) = component {
            base.push(COMPONENTS_SEGMENT.to_string());
            base.push(c.to_string());
        }

        let mut captured = Captured {
            label,
            modules: Vec::new(),
            hashes: Vec::new(),
        };
        for module in &self.config.entity_modules {
            let path = LogicalPath::new(base.iter().cloned().chain([module.clone()]))?;
            let unit = match self.resolvers.resolve(&path).await {
                Ok(unit) => unit,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if unit.is_synthesized() {
                continue;
            }
            let entities = tcr_transform::capture(&unit.source, &captured.label)
                .map_err(|e| PlatformError::transform(path.to_string(), e))?;
            tracing::debug!(path = %path, entities = entities.len(), "entity module captured");
            decls.extend(entities);
            captured.hashes.push(unit.content_hash);
            captured.modules.push(path);
        }
        Ok(captured)
    }

    fn bind(
        &self,
        tenant: &TenantId,
        decls: &mut [EntityDecl],
    ) -> Result<Vec<IdentityRebind>, PlatformError> {
        // The tenant's own previous registration is stale; only the batch
        // speaks for it.
        let registry = Arc::clone(&self.registry);
        let owner = tenant.clone();
        let lookup = move |label: &NamespaceLabel, name: &str| {
            label.tenant_id().as_ref() != Some(&owner)
                && registry.resolve_entity(label, name).is_some()
        };
        Binder::new(Some(tenant), &self.identity, &lookup)
            .bind(decls)
            .map_err(|e| PlatformError::transform(NamespaceLabel::tenant_prefix(tenant), e))
    }

    fn system_entities(&self) -> Vec<EntityDecl> {
        self.registry
            .all()
            .iter()
            .filter(|d| d.label.kind() == NamespaceKind::System)
            .flat_map(|d| d.entities.iter().cloned())
            .collect()
    }

    async fn finish_sync(
        &self,
        alias: &StorageAlias,
        decls: &[EntityDecl],
    ) -> Result<SyncReport, PlatformError> {
        match self.synchronizer.synchronize(alias, decls).await {
            Ok(report) => {
                self.registry.set_schema_status(alias, SchemaStatus::Verified);
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(alias = %alias, error = %e, "schema synchronization failed");
                self.registry.set_schema_status(
                    alias,
                    SchemaStatus::Unverified {
                        reason: e.to_string(),
                    },
                );
                Err(e.into())
            }
        }
    }
}
