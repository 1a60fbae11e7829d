//! Preview overlays
//!
//! An overlay is a throwaway copy of a tenant with a [`PatchSet`] applied,
//! loaded under a scratch tenant id (`<id>__preview_<ulid>`) so it gets its
//! own labels, its own storage partition and its own materialized directory.
//! Records are copy-on-write: the scratch tenant reads its base tenant's
//! records except where the patch replaces or adds a file.
//!
//! A handle is tracked from the moment creation starts, so an overlay whose
//! creation was cancelled can still be disposed by id or by the reaper.
//! Disposal is idempotent and never fails; leaked overlays are reaped after
//! a time-to-live.

use crate::error::{PlatformError, StoreError};
use crate::loader::TenantLoader;
use crate::store::CodeRecordStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tcr_record::{
    logical_path_for, CodeRecord, ContentHash, LogicalPath, NamespaceLabel, PatchSet, RecordKey,
    StorageAlias, TenantId, COMPONENTS_SEGMENT, PACKAGE_MARKER, SOURCE_SUFFIX,
};
use ulid::Ulid;

/// Patched records of one scratch tenant
#[derive(Debug, Clone)]
struct Layer {
    base: TenantId,
    patched: BTreeMap<RecordKey, CodeRecord>,
}

/// Record store that overlays scratch tenants on their base tenants
#[derive(Debug)]
pub struct LayeredRecordStore {
    inner: Arc<dyn CodeRecordStore>,
    layers: DashMap<TenantId, Layer>,
}

impl LayeredRecordStore {
    /// Wrap `inner`
    #[must_use]
    pub fn new(inner: Arc<dyn CodeRecordStore>) -> Self {
        Self {
            inner,
            layers: DashMap::new(),
        }
    }

    /// Store being overlaid
    #[inline]
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn CodeRecordStore> {
        &self.inner
    }

    /// Add a scratch tenant reading through to `base`
    pub fn add_layer(&self, scratch: TenantId, base: TenantId, patched: Vec<CodeRecord>) {
        let patched = patched.into_iter().map(|r| (r.key(), r)).collect();
        self.layers.insert(scratch, Layer { base, patched });
    }

    /// Remove a scratch tenant; returns whether it existed
    pub fn remove_layer(&self, scratch: &TenantId) -> bool {
        self.layers.remove(scratch).is_some()
    }

    /// Whether `tenant` is a scratch tenant of this store
    #[must_use]
    pub fn is_layered(&self, tenant: &TenantId) -> bool {
        self.layers.contains_key(tenant)
    }

    fn layer(&self, tenant: &TenantId) -> Option<Layer> {
        self.layers.get(tenant).map(|l| l.value().clone())
    }
}

#[async_trait]
impl CodeRecordStore for LayeredRecordStore {
    async fn get(
        &self,
        tenant: &TenantId,
        component: Option<&str>,
        path: &str,
    ) -> Result<Option<CodeRecord>, StoreError> {
        let Some(layer) = self.layer(tenant) else {
            return self.inner.get(tenant, component, path).await;
        };
        if let Some(record) = layer.patched.get(&RecordKey::new(component, path)) {
            return Ok(Some(record.clone()));
        }
        Ok(self
            .inner
            .get(&layer.base, component, path)
            .await?
            .map(|r| r.with_tenant(tenant.clone())))
    }

    async fn list_components(&self, tenant: &TenantId) -> Result<BTreeSet<String>, StoreError> {
        let Some(layer) = self.layer(tenant) else {
            return self.inner.list_components(tenant).await;
        };
        let mut components = self.inner.list_components(&layer.base).await?;
        components.extend(layer.patched.keys().filter_map(|k| k.component.clone()));
        Ok(components)
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<CodeRecord>, StoreError> {
        let Some(layer) = self.layer(tenant) else {
            return self.inner.list(tenant).await;
        };
        let mut merged: BTreeMap<RecordKey, CodeRecord> = self
            .inner
            .list(&layer.base)
            .await?
            .into_iter()
            .map(|r| (r.key(), r.with_tenant(tenant.clone())))
            .collect();
        merged.extend(layer.patched);
        Ok(merged.into_values().collect())
    }
}

/// Whether an overlay's schema came up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Reconciliation {
    /// Creation still running (or was cancelled before it finished)
    Pending,
    /// Partition verified
    Verified,
    /// Synchronization failed; the overlay exists but entity operations are
    /// refused
    Failed(String),
}

/// A live preview overlay
#[derive(Debug, Clone, Serialize)]
pub struct OverlayHandle {
    /// Overlay id
    pub id: Ulid,
    /// Tenant the overlay was copied from
    pub base: TenantId,
    /// Scratch tenant id
    pub scratch: TenantId,
    /// Labels registered for the scratch tenant
    pub labels: Vec<NamespaceLabel>,
    /// Scratch storage partition
    pub alias: StorageAlias,
    /// Identity of the applied patch set
    pub patch: ContentHash,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Schema outcome
    pub reconciliation: Reconciliation,
}

impl OverlayHandle {
    /// Whether the overlay outlived `ttl` at `now`
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        chrono::Duration::from_std(ttl).is_ok_and(|ttl| self.created_at + ttl <= now)
    }
}

/// Creates, tracks and disposes preview overlays
#[derive(Debug, Clone)]
pub struct PreviewOverlayManager {
    loader: TenantLoader,
    store: Arc<LayeredRecordStore>,
    overlays: Arc<DashMap<Ulid, OverlayHandle>>,
}

impl PreviewOverlayManager {
    /// Create a manager; `loader` must read records through `store`
    #[must_use]
    pub fn new(loader: TenantLoader, store: Arc<LayeredRecordStore>) -> Self {
        Self {
            loader,
            store,
            overlays: Arc::new(DashMap::new()),
        }
    }

    /// Copy `base`, apply `patch` and load the copy under a scratch tenant
    ///
    /// A schema failure still yields a handle, with
    /// [`Reconciliation::Failed`]. Any other failure tears the scratch tenant
    /// down before returning.
    ///
    /// # Errors
    /// - [`PlatformError::InvalidPatch`] if the patch touches another tenant
    /// - [`PlatformError::StoreUnavailable`] if the base records cannot be read
    /// - [`PlatformError::Transform`] if the patched code does not load
    #[tracing::instrument(skip(self, base, patch), fields(base = %base, files = patch.len()))]
    pub async fn create(
        &self,
        base: &TenantId,
        patch: &PatchSet,
    ) -> Result<OverlayHandle, PlatformError> {
        let foreign = patch.foreign_paths(base);
        if let Some(path) = foreign.first() {
            return Err(PlatformError::InvalidPatch(format!(
                "{path} does not belong to tenant {base}"
            )));
        }

        let id = Ulid::new();
        let scratch = base.scratch(&id.to_string());
        self.overlays.insert(
            id,
            OverlayHandle {
                id,
                base: base.clone(),
                scratch: scratch.clone(),
                labels: Vec::new(),
                alias: StorageAlias::for_tenant(&scratch),
                patch: patch.identity(),
                created_at: Utc::now(),
                reconciliation: Reconciliation::Pending,
            },
        );
        let mut pending = PendingCreation::new(self.clone(), id);

        let existing = match self.store.inner().list(base).await {
            Ok(existing) => existing,
            Err(e) => {
                pending.disarm();
                self.dispose(id).await;
                return Err(e.into());
            }
        };
        let patched = match patched_records(base, &scratch, &existing, patch) {
            Ok(patched) => patched,
            Err(e) => {
                pending.disarm();
                self.dispose(id).await;
                return Err(e);
            }
        };
        self.store.add_layer(scratch.clone(), base.clone(), patched);

        let reconciliation = match self.loader.load_tenant(&scratch).await {
            Ok(_) => Reconciliation::Verified,
            Err(PlatformError::SchemaApplyFailed(e)) => {
                tracing::warn!(scratch = %scratch, error = %e, "overlay schema failed");
                Reconciliation::Failed(e.to_string())
            }
            Err(e) => {
                pending.disarm();
                self.dispose(id).await;
                return Err(e);
            }
        };
        pending.disarm();

        let registry = self.loader.registry();
        let labels = registry.labels_for_tenant(&scratch);
        let alias = registry
            .alias_of(&scratch)
            .unwrap_or_else(|_| StorageAlias::for_tenant(&scratch));
        let updated = self.overlays.get_mut(&id).map(|mut live| {
            live.labels = labels;
            live.alias = alias;
            live.reconciliation = reconciliation;
            live.clone()
        });
        let Some(handle) = updated else {
            // Disposed while loading; the load may have re-created state.
            self.teardown(&scratch).await;
            return Err(PlatformError::NotFound(format!(
                "overlay {id} was disposed during creation"
            )));
        };
        tracing::info!(overlay = %id, scratch = %handle.scratch, "overlay created");
        Ok(handle)
    }

    /// Dispose an overlay; returns whether it was live
    ///
    /// Safe to call repeatedly and from cleanup paths.
    pub async fn dispose(&self, id: Ulid) -> bool {
        let Some((_, handle)) = self.overlays.remove(&id) else {
            tracing::debug!(overlay = %id, "overlay already disposed");
            return false;
        };
        self.teardown(&handle.scratch).await;
        tracing::info!(overlay = %id, scratch = %handle.scratch, "overlay disposed");
        true
    }

    /// Dispose every overlay older than `ttl`; returns how many
    pub async fn dispose_expired(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let expired: Vec<Ulid> = self
            .overlays
            .iter()
            .filter(|h| h.is_expired(ttl, now))
            .map(|h| h.id)
            .collect();
        let disposed = futures::future::join_all(expired.into_iter().map(|id| self.dispose(id)))
            .await
            .into_iter()
            .filter(|d| *d)
            .count();
        if disposed > 0 {
            tracing::info!(disposed, "expired overlays reaped");
        }
        disposed
    }

    /// Reap expired overlays every `interval` until the task is aborted
    #[must_use]
    pub fn spawn_reaper(&self, interval: Duration, ttl: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.dispose_expired(ttl).await;
            }
        })
    }

    /// Live overlay by id
    #[must_use]
    pub fn get(&self, id: Ulid) -> Option<OverlayHandle> {
        self.overlays.get(&id).map(|h| h.value().clone())
    }

    /// Live overlays, oldest first
    #[must_use]
    pub fn list(&self) -> Vec<OverlayHandle> {
        let mut handles: Vec<OverlayHandle> =
            self.overlays.iter().map(|h| h.value().clone()).collect();
        handles.sort_by_key(|h| h.id);
        handles
    }

    async fn teardown(&self, scratch: &TenantId) {
        self.store.remove_layer(scratch);
        self.loader.unload_tenant(scratch).await;
    }
}

/// Disposes an overlay whose creation future was dropped before finishing
#[derive(Debug)]
struct PendingCreation {
    manager: Option<PreviewOverlayManager>,
    id: Ulid,
}

impl PendingCreation {
    fn new(manager: PreviewOverlayManager, id: Ulid) -> Self {
        Self {
            manager: Some(manager),
            id,
        }
    }

    fn disarm(&mut self) {
        self.manager = None;
    }
}

impl Drop for PendingCreation {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        let id = self.id;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(overlay = %id, "overlay creation cancelled, disposing");
                runtime.spawn(async move {
                    manager.dispose(id).await;
                });
            }
            // Still listed as pending; the reaper picks it up.
            Err(_) => tracing::warn!(overlay = %id, "overlay creation cancelled outside a runtime"),
        }
    }
}

/// Records of `scratch` carrying the patched content
///
/// A patch path that matches an existing record replaces that record in
/// place; a new path becomes a new record at its canonical location.
fn patched_records(
    base: &TenantId,
    scratch: &TenantId,
    existing: &[CodeRecord],
    patch: &PatchSet,
) -> Result<Vec<CodeRecord>, PlatformError> {
    let mut by_path: BTreeMap<LogicalPath, RecordKey> = BTreeMap::new();
    for record in existing {
        if let Ok(path) = logical_path_for(base, &record.key()) {
            by_path.entry(path).or_insert_with(|| record.key());
        }
    }

    patch
        .iter()
        .map(|(path, content)| {
            let key = match by_path.get(path) {
                Some(key) => key.clone(),
                None => new_key(path)?,
            };
            Ok(CodeRecord {
                tenant: scratch.clone(),
                component: key.component,
                path: key.path,
                content: content.to_string(),
            })
        })
        .collect()
}

/// Canonical store key for a patch path that has no record yet
fn new_key(path: &LogicalPath) -> Result<RecordKey, PlatformError> {
    let rest = &path.segments()[1..];
    let (component, module) = match rest {
        [head, component, module @ ..] if head == COMPONENTS_SEGMENT => {
            (Some(component.as_str()), module)
        }
        [head, ..] if head == COMPONENTS_SEGMENT => {
            return Err(PlatformError::InvalidPatch(format!(
                "{path} names no component"
            )))
        }
        [] => {
            return Err(PlatformError::InvalidPatch(format!(
                "{path} names the tenant itself"
            )))
        }
        module => (None, module),
    };
    let file = if module.is_empty() {
        PACKAGE_MARKER.to_string()
    } else {
        format!("{}{SOURCE_SUFFIX}", module.join("/"))
    };
    Ok(RecordKey::new(component, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRecordStore;
    use pretty_assertions::assert_eq;

    fn base() -> TenantId {
        TenantId::from(7)
    }

    fn layered() -> (Arc<MemoryRecordStore>, LayeredRecordStore) {
        let inner = Arc::new(MemoryRecordStore::new());
        inner.insert(CodeRecord::new(base(), Some("blog"), "apps/blog/entities.py", "A = 1\n"));
        inner.insert(CodeRecord::new(base(), Some("blog"), "views.py", "V = 1\n"));
        let store = LayeredRecordStore::new(inner.clone());
        (inner, store)
    }

    #[test]
    fn patch_keeps_existing_record_location() {
        let existing = vec![CodeRecord::new(base(), Some("blog"), "apps/blog/entities.py", "")];
        let patch = PatchSet::new()
            .with("7.components.blog.entities", "B = 2\n")
            .unwrap();
        let scratch = base().scratch("x");
        let records = patched_records(&base(), &scratch, &existing, &patch).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "apps/blog/entities.py");
        assert_eq!(records[0].tenant, scratch);
    }

    #[test]
    fn new_paths_get_canonical_keys() {
        let key = new_key(&"7.components.shop.models".parse().unwrap()).unwrap();
        assert_eq!(key, RecordKey::new(Some("shop"), "models.py"));
        let key = new_key(&"7.components.shop".parse().unwrap()).unwrap();
        assert_eq!(key, RecordKey::new(Some("shop"), "__init__.py"));
        let key = new_key(&"7.settings".parse().unwrap()).unwrap();
        assert_eq!(key, RecordKey::new(None, "settings.py"));
        assert!(new_key(&"7".parse().unwrap()).is_err());
        assert!(new_key(&"7.components".parse().unwrap()).is_err());
    }

    #[tokio::test]
    async fn layers_read_through_to_base() {
        let (inner, store) = layered();
        let scratch = base().scratch("x");
        store.add_layer(
            scratch.clone(),
            base(),
            vec![
                CodeRecord::new(scratch.clone(), Some("blog"), "apps/blog/entities.py", "A = 2\n"),
                CodeRecord::new(scratch.clone(), Some("shop"), "models.py", ""),
            ],
        );

        let patched = store
            .get(&scratch, Some("blog"), "apps/blog/entities.py")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched.content, "A = 2\n");
        let through = store.get(&scratch, Some("blog"), "views.py").await.unwrap().unwrap();
        assert_eq!(through.tenant, scratch);

        let components = store.list_components(&scratch).await.unwrap();
        assert_eq!(components.into_iter().collect::<Vec<_>>(), vec!["blog", "shop"]);
        assert_eq!(store.list(&scratch).await.unwrap().len(), 3);

        // the base tenant is untouched
        let original = inner
            .get(&base(), Some("blog"), "apps/blog/entities.py")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.content, "A = 1\n");

        assert!(store.remove_layer(&scratch));
        assert!(!store.remove_layer(&scratch));
        assert!(store.list(&scratch).await.unwrap().is_empty());
    }

    #[test]
    fn expiry_uses_creation_time() {
        let handle = OverlayHandle {
            id: Ulid::new(),
            base: base(),
            scratch: base().scratch("x"),
            labels: Vec::new(),
            alias: StorageAlias::for_tenant(&base().scratch("x")),
            patch: ContentHash::compute(b""),
            created_at: Utc::now() - chrono::Duration::seconds(120),
            reconciliation: Reconciliation::Verified,
        };
        assert!(handle.is_expired(Duration::from_secs(60), Utc::now()));
        assert!(!handle.is_expired(Duration::from_secs(600), Utc::now()));
    }
}
