//! Platform facade
//!
//! Owns the shared registry, router, resolver chain, loader and overlay
//! manager, and exposes the operations callers use:
//! - bootstrap the system namespaces
//! - load and reload tenants
//! - resolve modules and route entity operations
//! - create and dispose preview overlays

use crate::config::PlatformConfig;
use crate::error::PlatformError;
use crate::loader::{LoadReport, TenantLoader};
use crate::overlay::{LayeredRecordStore, OverlayHandle, PreviewOverlayManager};
use crate::resolve::LoadableUnit;
use crate::store::CodeRecordStore;
use std::sync::Arc;
use tcr_record::{LogicalPath, NamespaceLabel, PatchSet, StorageAlias, TenantId};
use tcr_registry::{Access, RelationVerdict, StorageRouter, TenantContext, TenantRegistry};
use tcr_schema::{SchemaSynchronizer, StorageEngine, SyncReport};
use ulid::Ulid;

/// Multi-tenant code and schema platform
#[derive(Debug, Clone)]
pub struct Platform {
    config: Arc<PlatformConfig>,
    registry: Arc<TenantRegistry>,
    router: StorageRouter,
    loader: TenantLoader,
    overlays: PreviewOverlayManager,
}

impl Platform {
    /// Wire a platform over a record store and a storage engine
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] if the configuration is invalid
    pub fn new(
        config: PlatformConfig,
        store: Arc<dyn CodeRecordStore>,
        engine: Arc<dyn StorageEngine>,
    ) -> Result<Self, PlatformError> {
        config.validate()?;
        let config = Arc::new(config);
        let registry = Arc::new(TenantRegistry::with_capacity(config.resolved_cache_capacity));
        let router = StorageRouter::new(Arc::clone(&registry), config.default_alias());

        let layered = Arc::new(LayeredRecordStore::new(store));
        let loader = TenantLoader::new(
            Arc::clone(&config),
            Arc::clone(&layered) as Arc<dyn CodeRecordStore>,
            Arc::clone(&registry),
            SchemaSynchronizer::new(engine),
        )?;
        let overlays = PreviewOverlayManager::new(loader.clone(), layered);

        tracing::info!(
            prefix = %config.namespace_prefix,
            root = %config.materialize_root.display(),
            "platform created"
        );
        Ok(Self {
            config,
            registry,
            router,
            loader,
            overlays,
        })
    }

    /// Active configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// Shared registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<TenantRegistry> {
        &self.registry
    }

    /// Storage router
    #[inline]
    #[must_use]
    pub fn router(&self) -> &StorageRouter {
        &self.router
    }

    /// Tenant pipeline
    #[inline]
    #[must_use]
    pub fn loader(&self) -> &TenantLoader {
        &self.loader
    }

    /// Register system namespaces and synchronize the default partition
    ///
    /// # Errors
    /// See [`TenantLoader::bootstrap`]
    pub async fn bootstrap(&self) -> Result<SyncReport, PlatformError> {
        self.loader.bootstrap().await
    }

    /// Load a tenant
    ///
    /// # Errors
    /// See [`TenantLoader::load_tenant`]
    pub async fn load_tenant(&self, tenant: &TenantId) -> Result<LoadReport, PlatformError> {
        self.loader.load_tenant(tenant).await
    }

    /// Reload a tenant after its records changed
    ///
    /// # Errors
    /// See [`TenantLoader::load_tenant`]
    pub async fn reload_tenant(&self, tenant: &TenantId) -> Result<LoadReport, PlatformError> {
        self.loader.reload_tenant(tenant).await
    }

    /// Load a tenant unless it is already loaded
    ///
    /// # Errors
    /// See [`TenantLoader::load_tenant`]
    pub async fn ensure_loaded(&self, tenant: &TenantId) -> Result<Option<LoadReport>, PlatformError> {
        if self.registry.is_loaded(tenant) {
            return Ok(None);
        }
        self.loader.load_tenant(tenant).await.map(Some)
    }

    /// Resolve a dotted module path
    ///
    /// # Errors
    /// - [`PlatformError::NotFound`] if no resolver owns the path
    /// - [`PlatformError::StoreUnavailable`] if the store failed
    /// - [`PlatformError::Transform`] if the source is malformed
    pub async fn resolve(&self, path: &str) -> Result<LoadableUnit, PlatformError> {
        let path: LogicalPath = path.parse()?;
        Ok(self.loader.resolvers().resolve(&path).await?)
    }

    /// Partition for an entity operation
    ///
    /// # Errors
    /// Returns [`PlatformError::UnverifiedSchema`] unless the partition is
    /// verified
    pub fn route(
        &self,
        label: &NamespaceLabel,
        ctx: &TenantContext,
        access: Access,
    ) -> Result<StorageAlias, PlatformError> {
        Ok(self.router.route(label, ctx, access)?)
    }

    /// Whether a relation between two namespaces is allowed
    #[inline]
    #[must_use]
    pub fn allow_relation(&self, a: &NamespaceLabel, b: &NamespaceLabel) -> RelationVerdict {
        self.router.allow_relation(a, b)
    }

    /// Label for a request path, header value or bare tenant id
    #[must_use]
    pub fn lookup_by_request(&self, input: &str) -> Option<NamespaceLabel> {
        self.registry.lookup_by_request(input)
    }

    /// Create a preview overlay of `base` with `patch` applied
    ///
    /// # Errors
    /// See [`PreviewOverlayManager::create`]
    pub async fn create_overlay(
        &self,
        base: &TenantId,
        patch: &PatchSet,
    ) -> Result<OverlayHandle, PlatformError> {
        self.overlays.create(base, patch).await
    }

    /// Dispose an overlay; returns whether it was live
    pub async fn dispose_overlay(&self, id: Ulid) -> bool {
        self.overlays.dispose(id).await
    }

    /// Live overlays
    #[must_use]
    pub fn overlays(&self) -> Vec<OverlayHandle> {
        self.overlays.list()
    }

    /// Overlay manager
    #[inline]
    #[must_use]
    pub fn overlay_manager(&self) -> &PreviewOverlayManager {
        &self.overlays
    }

    /// Start the overlay reaper if an interval is configured
    #[must_use]
    pub fn start_reaper(&self) -> Option<tokio::task::JoinHandle<()>> {
        let interval = std::time::Duration::from_secs(self.config.reaper_interval_secs?);
        tracing::info!(interval_secs = interval.as_secs(), "overlay reaper started");
        Some(self.overlays.spawn_reaper(interval, self.config.overlay_ttl()))
    }
}
