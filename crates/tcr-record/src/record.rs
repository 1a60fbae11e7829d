//! Code records
//!
//! A [`CodeRecord`] is one stored virtual file of a tenant. The store keys
//! records by `(tenant, component, path)` where `path` is an on-disk style
//! relative path. Over time authors have stored the same module under several
//! path shapes (`entities.py`, `blog/entities.py`, `apps/blog/entities.py`),
//! so the logical path is derived by stripping those prefixes.

use crate::hash::ContentHash;
use crate::ids::TenantId;
use crate::path::{LogicalPath, PathError};
use serde::{Deserialize, Serialize};

/// Segment separating the tenant id from component names in logical paths
pub const COMPONENTS_SEGMENT: &str = "components";

/// Suffix of source files
pub const SOURCE_SUFFIX: &str = ".py";

/// Package marker file name
pub const PACKAGE_MARKER: &str = "__init__.py";

/// Store key of a record
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    /// Owning component, `None` for tenant-level files
    pub component: Option<String>,
    /// On-disk style relative path
    pub path: String,
}

impl RecordKey {
    /// Create a key
    #[inline]
    #[must_use]
    pub fn new(component: Option<&str>, path: impl Into<String>) -> Self {
        Self {
            component: component.map(str::to_string),
            path: path.into(),
        }
    }

    /// Module path relative to the component, with legacy prefixes, the
    /// source suffix and a trailing package marker removed.
    ///
    /// `apps/blog/entities.py` → `entities`, `blog/__init__.py` → ``
    #[must_use]
    pub fn module_path(&self) -> String {
        let mut path = self.path.as_str();
        if let Some(component) = self.component.as_deref() {
            for prefix in [format!("apps/{component}/"), format!("{component}/")] {
                if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                    path = rest;
                    break;
                }
            }
        }
        let path = path.strip_suffix(SOURCE_SUFFIX).unwrap_or(path);
        let path = path
            .strip_suffix("/__init__")
            .or_else(|| (path == "__init__").then_some(""))
            .unwrap_or(path);
        path.trim_matches('/').replace('/', ".")
    }

    /// Whether this key names a package marker
    #[inline]
    #[must_use]
    pub fn is_package(&self) -> bool {
        self.path == PACKAGE_MARKER || self.path.ends_with(&format!("/{PACKAGE_MARKER}"))
    }
}

/// One stored virtual file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeRecord {
    /// Owning tenant
    pub tenant: TenantId,
    /// Owning component, `None` for tenant-level files
    #[serde(default)]
    pub component: Option<String>,
    /// On-disk style relative path
    pub path: String,
    /// Source text
    pub content: String,
}

impl CodeRecord {
    /// Create a record
    #[must_use]
    pub fn new(
        tenant: TenantId,
        component: Option<&str>,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            tenant,
            component: component.map(str::to_string),
            path: path.into(),
            content: content.into(),
        }
    }

    /// Store key
    #[inline]
    #[must_use]
    pub fn key(&self) -> RecordKey {
        RecordKey {
            component: self.component.clone(),
            path: self.path.clone(),
        }
    }

    /// Hash of the content
    #[inline]
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        ContentHash::compute(self.content.as_bytes())
    }

    /// Logical path of the record within its tenant namespace, without the
    /// reserved namespace prefix: `7.components.blog.entities`
    ///
    /// # Errors
    /// Returns error if the stored path does not map onto valid segments
    pub fn logical_path(&self) -> Result<LogicalPath, PathError> {
        logical_path_for(&self.tenant, &self.key())
    }

    /// Same record re-owned by another tenant (used for scratch copies)
    #[must_use]
    pub fn with_tenant(mut self, tenant: TenantId) -> Self {
        self.tenant = tenant;
        self
    }
}

/// Logical path of a store key within a tenant namespace
///
/// # Errors
/// Returns error if the key does not map onto valid segments
pub fn logical_path_for(tenant: &TenantId, key: &RecordKey) -> Result<LogicalPath, PathError> {
    let mut segments = vec![tenant.as_str().to_string()];
    if let Some(component) = &key.component {
        segments.push(COMPONENTS_SEGMENT.to_string());
        segments.push(component.clone());
    }
    let module = key.module_path();
    if !module.is_empty() {
        segments.extend(module.split('.').map(str::to_string));
    }
    LogicalPath::new(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(component: Option<&str>, path: &str) -> CodeRecord {
        CodeRecord::new(TenantId::from(7), component, path, "")
    }

    #[test]
    fn legacy_path_shapes_share_a_logical_path() {
        for path in ["entities.py", "blog/entities.py", "apps/blog/entities.py"] {
            let lp = record(Some("blog"), path).logical_path().unwrap();
            assert_eq!(lp.to_string(), "7.components.blog.entities");
        }
    }

    #[test]
    fn packages_collapse_to_their_directory() {
        let lp = record(Some("blog"), "blog/__init__.py").logical_path().unwrap();
        assert_eq!(lp.to_string(), "7.components.blog");

        let lp = record(Some("blog"), "views/__init__.py").logical_path().unwrap();
        assert_eq!(lp.to_string(), "7.components.blog.views");
        assert!(record(Some("blog"), "views/__init__.py").key().is_package());
    }

    #[test]
    fn tenant_level_files_have_no_components_segment() {
        let lp = record(None, "settings.py").logical_path().unwrap();
        assert_eq!(lp.to_string(), "7.settings");
    }

    #[test]
    fn nested_modules_become_dotted() {
        let lp = record(Some("shop"), "api/views.py").logical_path().unwrap();
        assert_eq!(lp.to_string(), "7.components.shop.api.views");
    }

    #[test]
    fn invalid_file_names_are_rejected() {
        assert!(record(Some("blog"), "my-views.py").logical_path().is_err());
    }
}
