//! Testing utilities for TCR workspace
//!
//! Shared fixtures: tenant sources, seeded stores and a platform wired to
//! in-memory backends with a temporary materialization root.

#![allow(missing_docs)]

use std::sync::Arc;
use tcr_core::{MemoryRecordStore, Platform, PlatformConfig};
use tcr_record::{CodeRecord, TenantId};
use tcr_schema::MemoryEngine;
use tempfile::TempDir;

/// Blog component: two entities, a relation to the identity type written
/// the legacy way, and an author-chosen reverse link
pub const BLOG_ENTITIES: &str = "\
from django.db import models


class Post(models.Model):
    title = models.CharField(max_length=200)
    body = models.TextField()
    author = models.ForeignKey('auth.User', on_delete=models.CASCADE, related_name='posts')


class Comment(models.Model):
    post = models.ForeignKey(Post, on_delete=models.CASCADE, related_name='comments')
    text = models.TextField()
";

/// Shop component relating to the blog component of the same tenant
pub const SHOP_MODELS: &str = "\
from django.db import models


class Product(models.Model):
    name = models.CharField(max_length=100)
    price = models.DecimalField(max_digits=8, decimal_places=2)
    featured_in = models.ForeignKey('blog.Post', null=True, on_delete=models.SET_NULL)
";

/// Blog entities with an extra entity, used as a preview patch
pub const BLOG_ENTITIES_PATCHED: &str = "\
from django.db import models


class Post(models.Model):
    title = models.CharField(max_length=200)
    body = models.TextField()
    author = models.ForeignKey('auth.User', on_delete=models.CASCADE, related_name='posts')


class Comment(models.Model):
    post = models.ForeignKey(Post, on_delete=models.CASCADE, related_name='comments')
    text = models.TextField()


class Tag(models.Model):
    name = models.CharField(max_length=50, unique=True)
";

pub fn blog_record(tenant: &TenantId) -> CodeRecord {
    CodeRecord::new(tenant.clone(), Some("blog"), "entities.py", BLOG_ENTITIES)
}

pub fn shop_record(tenant: &TenantId) -> CodeRecord {
    CodeRecord::new(tenant.clone(), Some("shop"), "apps/shop/models.py", SHOP_MODELS)
}

/// Store holding the blog component for every given tenant
pub fn seeded_store(tenants: &[TenantId]) -> Arc<MemoryRecordStore> {
    let store = MemoryRecordStore::new();
    for tenant in tenants {
        store.insert(blog_record(tenant));
    }
    Arc::new(store)
}

/// Platform over in-memory backends; keep the struct alive for the
/// materialization directory to survive
pub struct TestPlatform {
    pub platform: Platform,
    pub store: Arc<MemoryRecordStore>,
    pub engine: Arc<MemoryEngine>,
    pub dir: TempDir,
}

pub fn setup_test_platform(store: Arc<MemoryRecordStore>) -> TestPlatform {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(MemoryEngine::new());
    let config = PlatformConfig::new().with_materialize_root(dir.path());
    let platform = Platform::new(config, store.clone(), engine.clone()).unwrap();
    TestPlatform {
        platform,
        store,
        engine,
        dir,
    }
}

/// Test platform with the system namespaces already bootstrapped
pub async fn bootstrapped_platform(store: Arc<MemoryRecordStore>) -> TestPlatform {
    let test = setup_test_platform(store);
    test.platform.bootstrap().await.unwrap();
    test
}
