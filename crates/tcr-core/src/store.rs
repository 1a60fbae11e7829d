//! Code record stores
//!
//! The durable store of tenant source text is external; the platform only
//! reads it through [`CodeRecordStore`]. [`MemoryRecordStore`] is the
//! in-process implementation used by tests and the CLI, seeded from a YAML
//! or JSON manifest.

use crate::error::{ManifestError, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tcr_record::{CodeRecord, RecordKey, TenantId};

/// Read access to stored tenant source
#[async_trait]
pub trait CodeRecordStore: Send + Sync + std::fmt::Debug {
    /// Record at `(tenant, component, path)`
    async fn get(
        &self,
        tenant: &TenantId,
        component: Option<&str>,
        path: &str,
    ) -> Result<Option<CodeRecord>, StoreError>;

    /// Components with at least one record
    async fn list_components(&self, tenant: &TenantId) -> Result<BTreeSet<String>, StoreError>;

    /// Every record of a tenant, ordered by key
    async fn list(&self, tenant: &TenantId) -> Result<Vec<CodeRecord>, StoreError>;
}

/// Serialized set of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordManifest {
    /// Records to load
    #[serde(default)]
    pub records: Vec<CodeRecord>,
}

impl RecordManifest {
    /// Parse YAML (JSON is accepted as a YAML subset)
    ///
    /// # Errors
    /// Returns [`ManifestError::Parse`] without a path
    pub fn from_yaml_str(text: &str) -> Result<Self, ManifestError> {
        serde_yaml::from_str(text).map_err(|source| ManifestError::Parse { path: None, source })
    }

    /// Read a manifest file
    ///
    /// # Errors
    /// Returns [`ManifestError::Io`] if the file cannot be read and
    /// [`ManifestError::Parse`] if it cannot be parsed
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ManifestError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&text).map_err(|source| ManifestError::Parse {
            path: Some(path.to_path_buf()),
            source,
        })
    }
}

/// In-process record store with an availability switch
#[derive(Debug)]
pub struct MemoryRecordStore {
    tenants: DashMap<TenantId, BTreeMap<RecordKey, CodeRecord>>,
    available: AtomicBool,
    reads: AtomicUsize,
}

impl MemoryRecordStore {
    /// Empty, available store
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            available: AtomicBool::new(true),
            reads: AtomicUsize::new(0),
        }
    }

    /// Store seeded with a manifest's records
    #[must_use]
    pub fn from_manifest(manifest: RecordManifest) -> Self {
        let store = Self::new();
        for record in manifest.records {
            store.insert(record);
        }
        store
    }

    /// Insert or replace a record, returning the previous one
    pub fn insert(&self, record: CodeRecord) -> Option<CodeRecord> {
        self.tenants
            .entry(record.tenant.clone())
            .or_default()
            .insert(record.key(), record)
    }

    /// Remove a record
    pub fn remove(&self, tenant: &TenantId, key: &RecordKey) -> Option<CodeRecord> {
        self.tenants.get_mut(tenant)?.remove(key)
    }

    /// Remove every record of a component; returns how many were removed
    pub fn remove_component(&self, tenant: &TenantId, component: &str) -> usize {
        let Some(mut records) = self.tenants.get_mut(tenant) else {
            return 0;
        };
        let before = records.len();
        records.retain(|k, _| k.component.as_deref() != Some(component));
        before - records.len()
    }

    /// Make every call fail with [`StoreError::Unavailable`] (or recover)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of single-record reads served so far
    #[must_use]
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".into()))
        }
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CodeRecordStore for MemoryRecordStore {
    async fn get(
        &self,
        tenant: &TenantId,
        component: Option<&str>,
        path: &str,
    ) -> Result<Option<CodeRecord>, StoreError> {
        self.check()?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        let key = RecordKey::new(component, path);
        Ok(self
            .tenants
            .get(tenant)
            .and_then(|records| records.get(&key).cloned()))
    }

    async fn list_components(&self, tenant: &TenantId) -> Result<BTreeSet<String>, StoreError> {
        self.check()?;
        Ok(self
            .tenants
            .get(tenant)
            .map(|records| records.keys().filter_map(|k| k.component.clone()).collect())
            .unwrap_or_default())
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<CodeRecord>, StoreError> {
        self.check()?;
        Ok(self
            .tenants
            .get(tenant)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"
records:
  - tenant: "7"
    component: blog
    path: entities.py
    content: "class Post(models.Model):\n    title = models.CharField()\n"
  - tenant: "7"
    component: shop
    path: apps/shop/models.py
    content: ""
  - tenant: "8"
    path: settings.py
    content: "DEBUG = False\n"
"#;

    #[tokio::test]
    async fn manifest_seeds_tenants() {
        let store = MemoryRecordStore::from_manifest(RecordManifest::from_yaml_str(MANIFEST).unwrap());
        let seven = TenantId::from(7);

        let components = store.list_components(&seven).await.unwrap();
        assert_eq!(components.into_iter().collect::<Vec<_>>(), vec!["blog", "shop"]);

        let hit = store.get(&seven, Some("blog"), "entities.py").await.unwrap();
        assert!(hit.unwrap().content.contains("class Post"));
        assert!(store.get(&seven, Some("blog"), "views.py").await.unwrap().is_none());

        let eight = store.list(&TenantId::from(8)).await.unwrap();
        assert_eq!(eight.len(), 1);
        assert_eq!(eight[0].component, None);
        assert_eq!(store.reads(), 2);
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryRecordStore::new();
        store.set_available(false);
        let tenant = TenantId::from(7);
        assert!(store.get(&tenant, None, "x.py").await.is_err());
        assert!(store.list(&tenant).await.is_err());

        store.set_available(true);
        assert!(store.list(&tenant).await.unwrap().is_empty());
    }

    #[test]
    fn json_manifests_parse() {
        let manifest = RecordManifest::from_yaml_str(
            r#"{"records": [{"tenant": "7", "component": "blog", "path": "entities.py", "content": ""}]}"#,
        )
        .unwrap();
        assert_eq!(manifest.records.len(), 1);
    }

    #[tokio::test]
    async fn manifest_errors_name_the_failure() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        match RecordManifest::load(&missing).await {
            Err(ManifestError::Io { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("expected io error, got {other:?}"),
        }

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "records: [unclosed").unwrap();
        let err = RecordManifest::load(&broken).await.unwrap_err();
        assert!(matches!(&err, ManifestError::Parse { path: Some(p), .. } if p == &broken));
        assert!(err.to_string().contains("broken.yaml"));

        let err = RecordManifest::from_yaml_str("records: 7").unwrap_err();
        assert!(matches!(err, ManifestError::Parse { path: None, .. }));
    }

    #[test]
    fn remove_component_drops_only_that_component() {
        let store = MemoryRecordStore::new();
        let t = TenantId::from(7);
        store.insert(CodeRecord::new(t.clone(), Some("blog"), "entities.py", ""));
        store.insert(CodeRecord::new(t.clone(), Some("blog"), "views.py", ""));
        store.insert(CodeRecord::new(t.clone(), Some("shop"), "models.py", ""));
        assert_eq!(store.remove_component(&t, "blog"), 2);
        assert_eq!(store.remove_component(&TenantId::from(9), "blog"), 0);
    }
}
