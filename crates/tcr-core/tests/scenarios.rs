//! End-to-end tenant scenarios

use pretty_assertions::assert_eq;
use tcr_core::{
    Access, CodeRecordStore, PatchSet, PlatformError, Reconciliation, SchemaStatus, StorageAlias,
    TenantContext, TenantId,
};
use tcr_record::NamespaceLabel;
use tcr_schema::SyncPhase;
use tcr_test_utils::{bootstrapped_platform, seeded_store, shop_record, BLOG_ENTITIES_PATCHED};
use tcr_transform::{RelationTarget, ReverseLink};

fn label(s: &str) -> NamespaceLabel {
    s.parse().unwrap()
}

#[tokio::test]
async fn tenant_load_registers_labels_and_verifies_schema() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;

    let report = test.platform.load_tenant(&seven).await.unwrap();
    assert_eq!(report.alias, StorageAlias::for_tenant(&seven));
    assert_eq!(report.labels, vec![label("tenant.7"), label("tenant.7.blog")]);
    assert_eq!(report.sync.phase, SyncPhase::Verified);
    assert_eq!(report.rebinds.len(), 1);

    let post = test
        .platform
        .registry()
        .resolve_entity(&label("tenant.7.blog"), "Post")
        .unwrap();
    assert_eq!(post.label, label("tenant.7.blog"));
    let author = post.field("author").unwrap().relation().unwrap();
    assert_eq!(author.reverse_link, ReverseLink::None);
    match &author.target {
        RelationTarget::Bound(target) => assert_eq!(target.to_string(), "system.auth.User"),
        other => panic!("unbound target {other:?}"),
    }

    assert_eq!(
        test.platform.registry().schema_status(&report.alias),
        Some(SchemaStatus::Verified)
    );
    assert!(test.engine.table(&report.alias, "tenant_7_blog_post").is_some());
    assert!(test.engine.table(&report.alias, "system_auth_user").is_some());

    let ctx = TenantContext::for_tenant(seven.clone());
    let routed = test
        .platform
        .route(&label("tenant.7.blog"), &ctx, Access::Write)
        .unwrap();
    assert_eq!(routed, report.alias);
    // system entities are shadowed in the tenant partition
    let routed = test
        .platform
        .route(&label("system.auth"), &ctx, Access::Read)
        .unwrap();
    assert_eq!(routed, report.alias);
    let routed = test
        .platform
        .route(&label("system.auth"), &TenantContext::none(), Access::Read)
        .unwrap();
    assert!(routed.is_default());

    assert!(test.dir.path().join("tenant_7/blog/entities.py").exists());
    assert!(test.dir.path().join("tenant_7/__init__.py").exists());
}

#[tokio::test]
async fn overlay_is_isolated_and_disposable() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    let base = test.platform.load_tenant(&seven).await.unwrap();

    let patch = PatchSet::new()
        .with("7.components.blog.entities", BLOG_ENTITIES_PATCHED)
        .unwrap();
    let handle = test.platform.create_overlay(&seven, &patch).await.unwrap();
    assert_eq!(handle.reconciliation, Reconciliation::Verified);
    assert_eq!(handle.base, seven);
    assert!(handle.scratch.is_scratch());
    assert_ne!(handle.alias, base.alias);
    assert_eq!(handle.patch, patch.identity());

    let real = label("tenant.7.blog");
    let scratch_blog = NamespaceLabel::tenant(&handle.scratch, Some("blog")).unwrap();
    assert!(handle.labels.contains(&scratch_blog));
    assert!(!handle.labels.contains(&real));

    let registry = test.platform.registry();
    assert!(registry.resolve_entity(&scratch_blog, "Tag").is_some());
    assert!(registry.resolve_entity(&real, "Tag").is_none());
    assert!(test.engine.table(&handle.alias, &scratch_blog.storage_object("Tag")).is_some());
    assert!(test.engine.table(&base.alias, "tenant_7_blog_tag").is_none());
    assert_eq!(test.platform.overlays().len(), 1);

    assert!(test.platform.dispose_overlay(handle.id).await);
    assert!(!registry.contains(&scratch_blog));
    assert!(!test.engine.has_partition(&handle.alias));
    assert!(test.platform.overlays().is_empty());

    assert!(registry.contains(&real));
    assert!(test.engine.table(&base.alias, "tenant_7_blog_post").is_some());
    assert_eq!(registry.schema_status(&base.alias), Some(SchemaStatus::Verified));
    let original = test.store.list(&seven).await.unwrap();
    assert!(original.iter().all(|r| !r.content.contains("class Tag")));
}

#[tokio::test]
async fn store_outage_is_distinct_and_registers_nothing() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.store.set_available(false);

    let err = test
        .platform
        .resolve("tenant.7.components.blog.entities")
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::StoreUnavailable(_)));
    assert!(err.is_retryable());
    assert!(!err.is_not_found());

    let err = test.platform.load_tenant(&seven).await.unwrap_err();
    assert!(matches!(err, PlatformError::StoreUnavailable(_)));
    assert!(test.platform.registry().labels_for_tenant(&seven).is_empty());
    assert!(!test.platform.registry().is_loaded(&seven));

    test.store.set_available(true);
    let err = test
        .platform
        .resolve("tenant.7.components.blog.views")
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(test.platform.load_tenant(&seven).await.is_ok());
}

#[tokio::test]
async fn reload_picks_up_new_and_vanished_components() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.platform.load_tenant(&seven).await.unwrap();

    test.store.insert(shop_record(&seven));
    let report = test.platform.reload_tenant(&seven).await.unwrap();
    assert!(report.labels.contains(&label("tenant.7.shop")));
    let product = test
        .platform
        .registry()
        .resolve_entity(&label("tenant.7.shop"), "Product")
        .unwrap();
    let featured = product.field("featured_in").unwrap().relation().unwrap();
    match &featured.target {
        RelationTarget::Bound(target) => assert_eq!(target.to_string(), "tenant.7.blog.Post"),
        other => panic!("unbound target {other:?}"),
    }

    test.store.remove_component(&seven, "shop");
    let report = test.platform.reload_tenant(&seven).await.unwrap();
    assert_eq!(report.removed, vec![label("tenant.7.shop")]);
    assert!(!test.platform.registry().contains(&label("tenant.7.shop")));
    assert!(!test.dir.path().join("tenant_7/shop").exists());
}

#[tokio::test]
async fn schema_failure_keeps_descriptors_but_blocks_routing() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.engine.reject_table("tenant_7_blog_comment");

    let err = test.platform.load_tenant(&seven).await.unwrap_err();
    assert!(matches!(err, PlatformError::SchemaApplyFailed(_)));
    assert!(err.is_retryable());
    assert!(test.platform.registry().contains(&label("tenant.7.blog")));

    let ctx = TenantContext::for_tenant(seven.clone());
    let err = test
        .platform
        .route(&label("tenant.7.blog"), &ctx, Access::Read)
        .unwrap_err();
    assert!(matches!(err, PlatformError::UnverifiedSchema { .. }));

    // code inspection stays available
    assert!(test.platform.resolve("tenant.7.components.blog.entities").await.is_ok());

    test.engine.accept_table("tenant_7_blog_comment");
    test.platform.load_tenant(&seven).await.unwrap();
    assert!(test.platform.route(&label("tenant.7.blog"), &ctx, Access::Read).is_ok());
}

#[tokio::test]
async fn overlay_with_failing_schema_still_yields_a_handle() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.platform.load_tenant(&seven).await.unwrap();

    let patch = PatchSet::new()
        .with("7.components.blog.entities", BLOG_ENTITIES_PATCHED)
        .unwrap();
    test.engine.set_available(false);
    let handle = test.platform.create_overlay(&seven, &patch).await.unwrap();
    assert!(matches!(handle.reconciliation, Reconciliation::Failed(_)));
    assert!(!handle.labels.is_empty());
    test.engine.set_available(true);

    assert!(test.platform.dispose_overlay(handle.id).await);
    assert!(test.platform.registry().labels_for_tenant(&handle.scratch).is_empty());
}

#[tokio::test]
async fn overlay_with_broken_code_leaves_nothing_behind() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;

    let patch = PatchSet::new()
        .with("7.components.blog.entities", "class Broken(models.Model:\n")
        .unwrap();
    let err = test.platform.create_overlay(&seven, &patch).await.unwrap_err();
    assert!(matches!(err, PlatformError::Transform { .. }));
    assert!(test.platform.overlays().is_empty());

    let scratch_tenants: Vec<TenantId> = test
        .platform
        .registry()
        .tenants()
        .into_iter()
        .filter(TenantId::is_scratch)
        .collect();
    assert!(scratch_tenants.is_empty());

    let foreign = PatchSet::new().with("8.components.blog.entities", "").unwrap();
    let err = test.platform.create_overlay(&seven, &foreign).await.unwrap_err();
    assert!(matches!(err, PlatformError::InvalidPatch(_)));
}

#[tokio::test]
async fn request_lookup_finds_most_specific_label() {
    let seven = TenantId::from(7);
    let test = bootstrapped_platform(seeded_store(&[seven.clone()])).await;
    test.platform.load_tenant(&seven).await.unwrap();

    assert_eq!(test.platform.lookup_by_request("7"), Some(label("tenant.7")));
    assert_eq!(
        test.platform.lookup_by_request("/tenants/7/blog/posts/1"),
        Some(label("tenant.7.blog"))
    );
    assert_eq!(
        test.platform.lookup_by_request("tenant.7.blog"),
        Some(label("tenant.7.blog"))
    );
    assert_eq!(test.platform.lookup_by_request("/tenants/9/blog"), None);
}
