//! Concurrency and idempotence properties of the pipeline

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tcr_core::{
    CodeRecord, CodeRecordStore, MaterializationGuard, MemoryEngine, MemoryRecordStore, PatchSet,
    Platform, PlatformConfig, Reconciliation, StorageAlias, StoreError, TenantId,
};
use tcr_record::NamespaceLabel;
use tcr_schema::SchemaSynchronizer;
use tcr_test_utils::{bootstrapped_platform, seeded_store, BLOG_ENTITIES_PATCHED};

/// Store whose single-record reads hang while `stalled` is set
#[derive(Debug)]
struct StallingStore {
    inner: Arc<MemoryRecordStore>,
    stalled: AtomicBool,
}

#[async_trait]
impl CodeRecordStore for StallingStore {
    async fn get(
        &self,
        tenant: &TenantId,
        component: Option<&str>,
        path: &str,
    ) -> Result<Option<CodeRecord>, StoreError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.get(tenant, component, path).await
    }

    async fn list_components(&self, tenant: &TenantId) -> Result<BTreeSet<String>, StoreError> {
        self.inner.list_components(tenant).await
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<CodeRecord>, StoreError> {
        self.inner.list(tenant).await
    }
}

#[tokio::test]
async fn same_named_entities_of_two_tenants_never_collide() {
    let seven = TenantId::from(7);
    let eight = TenantId::from(8);
    let test = bootstrapped_platform(seeded_store(&[seven.clone(), eight.clone()])).await;

    let a = test.platform.load_tenant(&seven).await.unwrap();
    let b = test.platform.load_tenant(&eight).await.unwrap();
    assert_ne!(a.alias, b.alias);

    let la = NamespaceLabel::tenant(&seven, Some("blog")).unwrap();
    let lb = NamespaceLabel::tenant(&eight, Some("blog")).unwrap();
    assert_ne!(la, lb);
    let registry = test.platform.registry();
    let pa = registry.resolve_entity(&la, "Post").unwrap();
    let pb = registry.resolve_entity(&lb, "Post").unwrap();
    assert_ne!(pa.storage_object(), pb.storage_object());
    assert!(test.engine.table(&a.alias, &pa.storage_object()).is_some());
    assert!(test.engine.table(&a.alias, &pb.storage_object()).is_none());
}

#[tokio::test]
async fn resolution_mid_materialization_is_not_found() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    let path = "tenant.7.components.blog.entities";
    assert!(test.platform.resolve(path).await.is_ok());

    let guard: &MaterializationGuard = test.platform.loader().materializer().guard();
    let ticket = guard.enter(&seven).await;
    let err = test.platform.resolve(path).await.unwrap_err();
    assert!(err.is_not_found());
    // other tenants are not blocked
    assert!(test.platform.resolve("tenant.8").await.is_ok());
    drop(ticket);

    assert!(test.platform.resolve(path).await.is_ok());
}

#[tokio::test]
async fn reloading_unchanged_code_applies_nothing() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.platform.load_tenant(&seven).await.unwrap();
    let executed = test.engine.executed();

    let report = test.platform.reload_tenant(&seven).await.unwrap();
    assert!(report.sync.change_set.is_empty());
    assert!(report.sync.apply.applied.is_empty());
    assert_eq!(report.materialized.written, 0);
    assert_eq!(test.engine.executed(), executed);
}

#[tokio::test]
async fn reapplying_a_change_set_is_a_no_op() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    let report = test.platform.load_tenant(&seven).await.unwrap();

    let sync = SchemaSynchronizer::clone(test.platform.loader().synchronizer());
    let again = sync.apply(&report.alias, &report.sync.change_set).await.unwrap();
    assert!(again.applied.is_empty());
    assert_eq!(again.skipped.len(), report.sync.change_set.len());
}

#[tokio::test]
async fn disposing_twice_never_fails() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.platform.load_tenant(&seven).await.unwrap();

    let patch = PatchSet::new()
        .with("tenant.7.components.blog.entities", BLOG_ENTITIES_PATCHED)
        .unwrap();
    let handle = test.platform.create_overlay(&seven, &patch).await.unwrap();
    assert!(test.platform.dispose_overlay(handle.id).await);
    assert!(!test.platform.dispose_overlay(handle.id).await);
    assert!(!test.platform.dispose_overlay(ulid::Ulid::new()).await);
}

#[tokio::test]
async fn expired_overlays_are_reaped() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.platform.load_tenant(&seven).await.unwrap();

    let patch = PatchSet::new()
        .with("7.components.blog.entities", BLOG_ENTITIES_PATCHED)
        .unwrap();
    let a = test.platform.create_overlay(&seven, &patch).await.unwrap();
    let b = test.platform.create_overlay(&seven, &patch).await.unwrap();
    assert_ne!(a.scratch, b.scratch);

    let manager = test.platform.overlay_manager();
    assert_eq!(manager.dispose_expired(Duration::from_secs(3600)).await, 0);
    assert_eq!(manager.dispose_expired(Duration::ZERO).await, 2);
    assert!(test.platform.overlays().is_empty());
}

#[tokio::test]
async fn cancelled_overlay_creation_is_disposed() {
    let seven = TenantId::from(7);
    let store = Arc::new(StallingStore {
        inner: seeded_store(&[seven.clone()]),
        stalled: AtomicBool::new(false),
    });
    let dir = tempfile::tempdir().unwrap();
    let config = PlatformConfig::new().with_materialize_root(dir.path());
    let platform = Platform::new(config, store.clone(), Arc::new(MemoryEngine::new())).unwrap();
    platform.bootstrap().await.unwrap();
    platform.load_tenant(&seven).await.unwrap();

    // Creation materializes the scratch tenant, then hangs reading entity
    // modules.
    store.stalled.store(true, Ordering::SeqCst);
    let patch = PatchSet::new()
        .with("7.components.blog.entities", BLOG_ENTITIES_PATCHED)
        .unwrap();
    let creating = {
        let platform = platform.clone();
        let seven = seven.clone();
        tokio::spawn(async move { platform.create_overlay(&seven, &patch).await })
    };

    let mut pending = None;
    for _ in 0..200 {
        if let Some(handle) = platform.overlays().pop() {
            let scratch_dir = dir.path().join(StorageAlias::for_tenant(&handle.scratch).as_str());
            if scratch_dir.join("blog").join("entities.py").exists() {
                pending = Some(handle);
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let pending = pending.expect("overlay creation never reached materialization");
    assert_eq!(pending.reconciliation, Reconciliation::Pending);

    creating.abort();
    assert!(creating.await.unwrap_err().is_cancelled());
    store.stalled.store(false, Ordering::SeqCst);

    let scratch_dir = dir.path().join(StorageAlias::for_tenant(&pending.scratch).as_str());
    for _ in 0..200 {
        if platform.overlays().is_empty() && !scratch_dir.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(platform.overlays().is_empty());
    assert!(!scratch_dir.exists());
    assert!(platform.registry().labels_for_tenant(&pending.scratch).is_empty());
    let path = format!("tenant.{}.components.blog.entities", pending.scratch);
    assert!(platform.resolve(&path).await.unwrap_err().is_not_found());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_loads_of_different_tenants() {
    let tenants: Vec<TenantId> = (1..=4).map(TenantId::from).collect();
    let test = bootstrapped_platform(seeded_store(&tenants)).await;
    let platform = Arc::new(test.platform.clone());

    let handles: Vec<_> = tenants
        .iter()
        .cloned()
        .map(|t| {
            let platform = Arc::clone(&platform);
            tokio::spawn(async move { platform.load_tenant(&t).await.map(|r| r.alias) })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    for t in &tenants {
        assert!(platform.registry().is_loaded(t));
    }
}
