//! Module resolution
//!
//! A [`ResolverChain`] asks each registered [`ModuleResolver`] in turn to
//! turn a dotted logical path into a [`LoadableUnit`]. A resolver that does
//! not own a path declines with `Ok(None)` so the next one can try.
//!
//! [`RecordResolver`] owns the reserved tenant prefix. For
//! `tenant.<id>.components.<c>.<f>` it tries, in order:
//!
//! 1. `<f>.py`
//! 2. `<f>/__init__.py`
//! 3. `<c>/<f>.py`
//! 4. `<c>/<f>/__init__.py`
//! 5. `apps/<c>/<f>.py`
//! 6. `apps/<c>/<f>/__init__.py`
//!
//! Paths naming only a container (`tenant`, `tenant.<id>`,
//! `tenant.<id>.components`, `tenant.<id>.components.<c>`) resolve to a
//! synthesized empty package without touching the store.

use crate::error::{ResolveError, StoreError};
use crate::materialize::MaterializationGuard;
use crate::store::CodeRecordStore;
use async_trait::async_trait;
use moka::future::Cache;
use std::sync::Arc;
use tcr_record::{
    ContentHash, LogicalPath, RecordKey, TenantId, COMPONENTS_SEGMENT, PACKAGE_MARKER,
    SOURCE_SUFFIX,
};

/// Source ready to be executed under a logical path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadableUnit {
    /// Full logical path, including the reserved prefix
    pub path: LogicalPath,
    /// Owning tenant, when the unit came from tenant records
    pub tenant: Option<TenantId>,
    /// Store key the source came from; `None` for synthesized packages
    pub origin: Option<RecordKey>,
    /// Transformed source
    pub source: String,
    /// Whether submodules may be resolved beneath this unit
    pub is_package: bool,
    /// Hash of the stored (untransformed) content
    pub content_hash: ContentHash,
}

impl LoadableUnit {
    /// Empty package standing in for a namespace or component directory
    #[must_use]
    pub fn package_marker(path: LogicalPath, tenant: Option<TenantId>) -> Self {
        Self {
            path,
            tenant,
            origin: None,
            source: String::new(),
            is_package: true,
            content_hash: ContentHash::compute(b""),
        }
    }

    /// Whether the unit was synthesized rather than read from a record
    #[inline]
    #[must_use]
    pub fn is_synthesized(&self) -> bool {
        self.origin.is_none()
    }
}

/// One link of the resolver chain
#[async_trait]
pub trait ModuleResolver: Send + Sync + std::fmt::Debug {
    /// Name for logs
    fn name(&self) -> &'static str;

    /// Resolve `path`, or decline with `Ok(None)`
    async fn resolve(&self, path: &LogicalPath) -> Result<Option<LoadableUnit>, ResolveError>;
}

/// Cache of resolved units, invalidated per tenant
#[derive(Debug, Clone)]
pub struct ModuleCache {
    inner: Cache<LogicalPath, Arc<LoadableUnit>>,
}

impl ModuleCache {
    /// Create a cache holding at most `capacity` units
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(capacity)
                .support_invalidation_closures()
                .build(),
        }
    }

    /// Cached unit
    pub async fn get(&self, path: &LogicalPath) -> Option<Arc<LoadableUnit>> {
        self.inner.get(path).await
    }

    /// Cache a unit
    pub async fn insert(&self, unit: Arc<LoadableUnit>) {
        self.inner.insert(unit.path.clone(), unit).await;
    }

    /// Drop every unit of a tenant
    pub fn invalidate_tenant(&self, tenant: &TenantId) {
        let tenant = tenant.clone();
        let result = self
            .inner
            .invalidate_entries_if(move |_, unit| unit.tenant.as_ref() == Some(&tenant));
        if let Err(e) = result {
            tracing::warn!(error = %e, "predicate invalidation unavailable, clearing module cache");
            self.inner.invalidate_all();
        }
    }

    /// Drop everything
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of cached units
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

/// Resolves tenant paths from the code record store
#[derive(Debug, Clone)]
pub struct RecordResolver {
    prefix: String,
    store: Arc<dyn CodeRecordStore>,
    guard: MaterializationGuard,
    cache: ModuleCache,
}

impl RecordResolver {
    /// Create a resolver owning paths that start with `prefix`
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        store: Arc<dyn CodeRecordStore>,
        guard: MaterializationGuard,
        cache: ModuleCache,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            store,
            guard,
            cache,
        }
    }

    /// Store keys tried for `module` (dotted, relative to the component), in
    /// precedence order
    #[must_use]
    pub fn candidates(component: Option<&str>, module: &[String]) -> Vec<RecordKey> {
        let file = module.join("/");
        let mut dirs = vec![String::new()];
        if let Some(c) = component {
            dirs.push(format!("{c}/"));
            dirs.push(format!("apps/{c}/"));
        }
        dirs.iter()
            .flat_map(|dir| {
                [
                    RecordKey::new(component, format!("{dir}{file}{SOURCE_SUFFIX}")),
                    RecordKey::new(component, format!("{dir}{file}/{PACKAGE_MARKER}")),
                ]
            })
            .collect()
    }

    fn refused(&self, path: &LogicalPath, tenant: &TenantId) -> bool {
        if self.guard.is_active(tenant) {
            tracing::debug!(path = %path, tenant = %tenant, "tenant mid-materialization, refusing lookup");
            return true;
        }
        false
    }

    async fn lookup(
        &self,
        path: &LogicalPath,
        tenant: &TenantId,
        component: Option<&str>,
        module: &[String],
    ) -> Result<Option<LoadableUnit>, ResolveError> {
        for key in Self::candidates(component, module) {
            let record = self
                .store
                .get(tenant, key.component.as_deref(), &key.path)
                .await
                .map_err(|source: StoreError| ResolveError::StoreUnavailable {
                    path: path.to_string(),
                    source,
                })?;
            let Some(record) = record else {
                continue;
            };
            let source = tcr_transform::transform(&record.content).map_err(|source| {
                ResolveError::Transform {
                    path: path.to_string(),
                    source,
                }
            })?;
            tracing::trace!(path = %path, record = %key.path, "resolved from record");
            return Ok(Some(LoadableUnit {
                path: path.clone(),
                tenant: Some(tenant.clone()),
                is_package: key.is_package(),
                content_hash: record.content_hash(),
                origin: Some(key),
                source,
            }));
        }
        Ok(None)
    }
}

#[async_trait]
impl ModuleResolver for RecordResolver {
    fn name(&self) -> &'static str {
        "records"
    }

    async fn resolve(&self, path: &LogicalPath) -> Result<Option<LoadableUnit>, ResolveError> {
        let segments = path.segments();
        if segments.first().map(String::as_str) != Some(self.prefix.as_str()) {
            return Ok(None);
        }
        let Some(id) = segments.get(1) else {
            return Ok(Some(LoadableUnit::package_marker(path.clone(), None)));
        };
        let Ok(tenant) = TenantId::new(id.clone()) else {
            return Ok(None);
        };
        if self.refused(path, &tenant) {
            return Ok(None);
        }
        if let Some(hit) = self.cache.get(path).await {
            return Ok(Some((*hit).clone()));
        }

        let rest = &segments[2..];
        let unit = match rest {
            [] => Some(LoadableUnit::package_marker(path.clone(), Some(tenant.clone()))),
            [head] if head == COMPONENTS_SEGMENT => {
                Some(LoadableUnit::package_marker(path.clone(), Some(tenant.clone())))
            }
            [head, _component] if head == COMPONENTS_SEGMENT => {
                Some(LoadableUnit::package_marker(path.clone(), Some(tenant.clone())))
            }
            [head, component, module @ ..] if head == COMPONENTS_SEGMENT => {
                self.lookup(path, &tenant, Some(component.as_str()), module).await?
            }
            module => self.lookup(path, &tenant, None, module).await?,
        };

        // Materialization may have started while the store was being read.
        if self.refused(path, &tenant) {
            return Ok(None);
        }
        if let Some(unit) = &unit {
            self.cache.insert(Arc::new(unit.clone())).await;
        }
        Ok(unit)
    }
}

/// Ordered list of resolvers
#[derive(Debug, Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn ModuleResolver>>,
}

impl ResolverChain {
    /// Empty chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver
    #[must_use]
    pub fn with(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.resolvers.push(resolver);
        self
    }

    /// Names of the registered resolvers, in order
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Resolve through the first resolver that accepts `path`
    ///
    /// # Errors
    /// Returns [`ResolveError::NotFound`] when every resolver declines, or
    /// the first resolver failure
    pub async fn resolve(&self, path: &LogicalPath) -> Result<LoadableUnit, ResolveError> {
        for resolver in &self.resolvers {
            if let Some(unit) = resolver.resolve(path).await? {
                return Ok(unit);
            }
        }
        Err(ResolveError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use pretty_assertions::assert_eq;
    use tcr_record::CodeRecord;

    fn path(s: &str) -> LogicalPath {
        s.parse().unwrap()
    }

    fn setup() -> (Arc<MemoryRecordStore>, MaterializationGuard, ModuleCache, ResolverChain) {
        let store = Arc::new(MemoryRecordStore::new());
        let guard = MaterializationGuard::new();
        let cache = ModuleCache::new(100);
        let resolver = RecordResolver::new("tenant", store.clone(), guard.clone(), cache.clone());
        let chain = ResolverChain::new().with(Arc::new(resolver));
        (store, guard, cache, chain)
    }

    #[test]
    fn candidate_order() {
        let paths: Vec<String> = RecordResolver::candidates(Some("blog"), &["entities".into()])
            .into_iter()
            .map(|k| k.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "entities.py",
                "entities/__init__.py",
                "blog/entities.py",
                "blog/entities/__init__.py",
                "apps/blog/entities.py",
                "apps/blog/entities/__init__.py",
            ]
        );
        assert_eq!(RecordResolver::candidates(None, &["settings".into()]).len(), 2);
    }

    #[tokio::test]
    async fn resolves_legacy_shape_and_transforms() {
        let (store, _, _, chain) = setup();
        store.insert(CodeRecord::new(
            TenantId::from(7),
            Some("blog"),
            "apps/blog/entities.py",
            "class Post(models.Model):\n    author = models.ForeignKey('auth.User', related_name='posts')\n",
        ));

        let unit = chain.resolve(&path("tenant.7.components.blog.entities")).await.unwrap();
        assert_eq!(unit.origin.unwrap().path, "apps/blog/entities.py");
        assert!(unit.source.contains("related_name=\"+\""));
        assert!(!unit.is_package);
        assert_eq!(store.reads(), 5);
    }

    #[tokio::test]
    async fn containers_are_synthesized_without_store_reads() {
        let (store, _, _, chain) = setup();
        for p in ["tenant", "tenant.7", "tenant.7.components", "tenant.7.components.blog"] {
            let unit = chain.resolve(&path(p)).await.unwrap();
            assert!(unit.is_package && unit.is_synthesized(), "{p}");
            assert!(unit.source.is_empty());
        }
        assert_eq!(store.reads(), 0);
    }

    #[tokio::test]
    async fn missing_modules_are_not_found() {
        let (_, _, _, chain) = setup();
        let err = chain.resolve(&path("tenant.7.components.blog.views")).await.unwrap_err();
        assert!(err.is_not_found());
        let err = chain.resolve(&path("django.db")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn store_outage_is_not_a_miss() {
        let (store, _, _, chain) = setup();
        store.set_available(false);
        let err = chain.resolve(&path("tenant.7.components.blog.entities")).await.unwrap_err();
        assert!(matches!(err, ResolveError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn refuses_tenants_mid_materialization() {
        let (store, guard, _, chain) = setup();
        store.insert(CodeRecord::new(TenantId::from(7), Some("blog"), "entities.py", ""));
        let p = path("tenant.7.components.blog.entities");
        assert!(chain.resolve(&p).await.is_ok());

        let ticket = guard.enter(&TenantId::from(7)).await;
        assert!(chain.resolve(&p).await.unwrap_err().is_not_found());
        assert!(chain.resolve(&path("tenant.7")).await.unwrap_err().is_not_found());
        drop(ticket);
        assert!(chain.resolve(&p).await.is_ok());
    }

    #[tokio::test]
    async fn cache_serves_until_tenant_invalidated() {
        let (store, _, cache, chain) = setup();
        let t = TenantId::from(7);
        store.insert(CodeRecord::new(t.clone(), Some("blog"), "entities.py", "A = 1\n"));
        let p = path("tenant.7.components.blog.entities");

        chain.resolve(&p).await.unwrap();
        let reads = store.reads();
        store.insert(CodeRecord::new(t.clone(), Some("blog"), "entities.py", "A = 2\n"));
        assert_eq!(chain.resolve(&p).await.unwrap().source, "A = 1\n");
        assert_eq!(store.reads(), reads);

        cache.invalidate_tenant(&t);
        assert_eq!(chain.resolve(&p).await.unwrap().source, "A = 2\n");
    }

    #[tokio::test]
    async fn syntax_errors_surface_as_transform_errors() {
        let (store, _, _, chain) = setup();
        store.insert(CodeRecord::new(TenantId::from(7), Some("blog"), "entities.py", "class (:\n"));
        let err = chain.resolve(&path("tenant.7.components.blog.entities")).await.unwrap_err();
        assert!(matches!(err, ResolveError::Transform { .. }));
    }
}
