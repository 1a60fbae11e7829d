//! Namespace materialization
//!
//! Mirrors a tenant's records as a real directory tree under
//! `<root>/tenant_<id>/` for tooling that needs files on disk. Only files
//! whose content changed are written; files and directories that no longer
//! correspond to a record are removed.
//!
//! While a tenant is being materialized its id sits in the
//! [`MaterializationGuard`]; resolvers refuse every lookup for it until the
//! ticket is dropped.

use crate::error::MaterializeError;
use crate::store::CodeRecordStore;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tcr_record::{CodeRecord, StorageAlias, TenantId, PACKAGE_MARKER, SOURCE_SUFFIX};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Tenants currently being materialized, plus one lock per tenant
#[derive(Debug, Clone, Default)]
pub struct MaterializationGuard {
    active: Arc<DashSet<TenantId>>,
    locks: Arc<DashMap<TenantId, Arc<Mutex<()>>>>,
}

impl MaterializationGuard {
    /// Empty guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `tenant` is mid-materialization
    #[inline]
    #[must_use]
    pub fn is_active(&self, tenant: &TenantId) -> bool {
        self.active.contains(tenant)
    }

    /// Wait for the tenant's lock and mark it active until the ticket drops
    pub async fn enter(&self, tenant: &TenantId) -> MaterializationTicket {
        let lock = Arc::clone(
            self.locks
                .entry(tenant.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let held = lock.lock_owned().await;
        self.active.insert(tenant.clone());
        MaterializationTicket {
            active: Arc::clone(&self.active),
            tenant: tenant.clone(),
            _held: held,
        }
    }
}

/// Exclusive right to rewrite one tenant's namespace
#[derive(Debug)]
pub struct MaterializationTicket {
    active: Arc<DashSet<TenantId>>,
    tenant: TenantId,
    _held: OwnedMutexGuard<()>,
}

impl Drop for MaterializationTicket {
    fn drop(&mut self) {
        self.active.remove(&self.tenant);
    }
}

/// Outcome of one materialization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializeReport {
    /// Tenant directory
    pub dir: PathBuf,
    /// Files created or rewritten
    pub written: usize,
    /// Files already up to date
    pub unchanged: usize,
    /// Stale files and directories removed
    pub removed: usize,
}

/// Writes tenant namespaces to disk
#[derive(Debug, Clone)]
pub struct NamespaceMaterializer {
    root: PathBuf,
    store: Arc<dyn CodeRecordStore>,
    guard: MaterializationGuard,
}

impl NamespaceMaterializer {
    /// Create a materializer writing under `root`
    #[must_use]
    pub fn new(
        root: impl Into<PathBuf>,
        store: Arc<dyn CodeRecordStore>,
        guard: MaterializationGuard,
    ) -> Self {
        Self {
            root: root.into(),
            store,
            guard,
        }
    }

    /// Guard shared with the resolvers
    #[inline]
    #[must_use]
    pub fn guard(&self) -> &MaterializationGuard {
        &self.guard
    }

    /// Directory of a tenant's namespace
    #[must_use]
    pub fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(StorageAlias::for_tenant(tenant).as_str())
    }

    /// Mirror the tenant's current records to disk
    ///
    /// # Errors
    /// Returns [`MaterializeError`] if the store or the filesystem fails;
    /// the guard is released either way
    #[tracing::instrument(skip(self, tenant), fields(tenant = %tenant))]
    pub async fn materialize(&self, tenant: &TenantId) -> Result<MaterializeReport, MaterializeError> {
        let _ticket = self.guard.enter(tenant).await;

        let records = self.store.list(tenant).await?;
        let desired = layout(&records);
        let dir = self.tenant_dir(tenant);

        let mut report = MaterializeReport {
            dir: dir.clone(),
            ..MaterializeReport::default()
        };
        for (rel, content) in &desired {
            let path = dir.join(rel);
            if write_if_changed(&path, content).await? {
                report.written += 1;
            } else {
                report.unchanged += 1;
            }
        }
        report.removed = prune(&dir, &desired).await?;

        tracing::debug!(
            written = report.written,
            unchanged = report.unchanged,
            removed = report.removed,
            "namespace materialized"
        );
        Ok(report)
    }

    /// Delete a tenant's namespace directory; returns whether it existed
    ///
    /// # Errors
    /// Returns [`MaterializeError::Io`] if removal fails
    pub async fn remove(&self, tenant: &TenantId) -> Result<bool, MaterializeError> {
        let _ticket = self.guard.enter(tenant).await;
        let dir = self.tenant_dir(tenant);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MaterializeError::io(dir, e)),
        }
    }
}

/// Order in which legacy path shapes claim a file: plain paths first
fn precedence(record: &CodeRecord) -> u8 {
    match record.component.as_deref() {
        Some(c) if record.path.starts_with(&format!("apps/{c}/")) => 2,
        Some(c) if record.path.starts_with(&format!("{c}/")) => 1,
        _ => 0,
    }
}

/// Relative file path → content for every record, plus package markers for
/// the tenant root, each component and every intermediate package
fn layout(records: &[CodeRecord]) -> BTreeMap<PathBuf, String> {
    let mut ordered: Vec<&CodeRecord> = records.iter().collect();
    ordered.sort_by_key(|r| precedence(r));

    let mut files: BTreeMap<PathBuf, String> = BTreeMap::new();
    let mut packages: BTreeSet<PathBuf> = BTreeSet::new();
    packages.insert(PathBuf::new());

    for record in ordered {
        let mut dir = PathBuf::new();
        if let Some(component) = &record.component {
            dir.push(component);
            packages.insert(dir.clone());
        }
        let key = record.key();
        let module = key.module_path();
        let parts: Vec<&str> = if module.is_empty() {
            Vec::new()
        } else {
            module.split('.').collect()
        };

        let file = if key.is_package() || parts.is_empty() {
            for part in &parts {
                dir.push(part);
                packages.insert(dir.clone());
            }
            dir.join(PACKAGE_MARKER)
        } else {
            let (name, parents) = parts.split_last().map_or(("", &[][..]), |(n, p)| (*n, p));
            for part in parents {
                dir.push(part);
                packages.insert(dir.clone());
            }
            dir.join(format!("{name}{SOURCE_SUFFIX}"))
        };
        files.entry(file).or_insert_with(|| record.content.clone());
    }

    for package in packages {
        files.entry(package.join(PACKAGE_MARKER)).or_default();
    }
    files
}

async fn write_if_changed(path: &Path, content: &str) -> Result<bool, MaterializeError> {
    match tokio::fs::read(path).await {
        Ok(existing) if existing == content.as_bytes() => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(MaterializeError::io(path, e)),
    }
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| MaterializeError::io(parent, e))?;
    }
    tokio::fs::write(path, content)
        .await
        .map_err(|e| MaterializeError::io(path, e))?;
    Ok(true)
}

/// Remove everything under `dir` that is neither a desired file nor an
/// ancestor of one
async fn prune(dir: &Path, desired: &BTreeMap<PathBuf, String>) -> Result<usize, MaterializeError> {
    let keep_dirs: BTreeSet<PathBuf> = desired
        .keys()
        .flat_map(|file| file.ancestors().skip(1).map(Path::to_path_buf))
        .collect();

    let mut removed = 0;
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        let abs = dir.join(&rel);
        let mut entries = match tokio::fs::read_dir(&abs).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(MaterializeError::io(abs, e)),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MaterializeError::io(&abs, e))?
        {
            let child = rel.join(entry.file_name());
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| MaterializeError::io(entry.path(), e))?
                .is_dir();
            if is_dir && keep_dirs.contains(&child) {
                pending.push(child);
            } else if is_dir {
                tokio::fs::remove_dir_all(entry.path())
                    .await
                    .map_err(|e| MaterializeError::io(entry.path(), e))?;
                removed += 1;
            } else if !desired.contains_key(&child) {
                tokio::fs::remove_file(entry.path())
                    .await
                    .map_err(|e| MaterializeError::io(entry.path(), e))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
