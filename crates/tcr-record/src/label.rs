//! Namespace labels
//!
//! Every registered group of entity declarations is tagged with a label:
//! `tenant.<id>.<component>` for tenant code, `system.<component>` for the
//! entity types the platform itself owns, and any other dotted name for shared
//! platform namespaces. Because the tenant id is a label segment, two tenants'
//! same-named components can never share a label.

use crate::ids::TenantId;
use crate::path::{is_valid_segment, PathError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Root segment of tenant labels
pub const TENANT_ROOT: &str = "tenant";

/// Root segment of system labels
pub const SYSTEM_ROOT: &str = "system";

/// Classification of a label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Owned by a tenant
    Tenant,
    /// Owned by the platform; tenants may shadow these in their own storage
    System,
    /// Platform namespace that is neither tenant nor system
    Shared,
}

/// Unique label of a namespace component
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceLabel(String);

impl NamespaceLabel {
    /// Label of a tenant component, or of the tenant root when `component`
    /// is `None`
    ///
    /// # Errors
    /// Returns error if the component is not a valid segment
    pub fn tenant(tenant: &TenantId, component: Option<&str>) -> Result<Self, PathError> {
        match component {
            Some(c) if !is_valid_segment(c) => Err(PathError::InvalidSegment(c.to_string())),
            Some(c) => Ok(Self(format!("{TENANT_ROOT}.{tenant}.{c}"))),
            None => Ok(Self(format!("{TENANT_ROOT}.{tenant}"))),
        }
    }

    /// Label of a platform-owned component
    ///
    /// # Errors
    /// Returns error if the component is not a valid segment
    pub fn system(component: &str) -> Result<Self, PathError> {
        if is_valid_segment(component) {
            Ok(Self(format!("{SYSTEM_ROOT}.{component}")))
        } else {
            Err(PathError::InvalidSegment(component.to_string()))
        }
    }

    /// Label prefix shared by every label of a tenant (with trailing dot)
    #[must_use]
    pub fn tenant_prefix(tenant: &TenantId) -> String {
        format!("{TENANT_ROOT}.{tenant}.")
    }

    /// Label as string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// Classify the label
    #[must_use]
    pub fn kind(&self) -> NamespaceKind {
        match self.segments().next() {
            Some(TENANT_ROOT) => NamespaceKind::Tenant,
            Some(SYSTEM_ROOT) => NamespaceKind::System,
            _ => NamespaceKind::Shared,
        }
    }

    /// Tenant encoded in the label, if any
    #[must_use]
    pub fn tenant_id(&self) -> Option<TenantId> {
        if self.kind() != NamespaceKind::Tenant {
            return None;
        }
        self.segments().nth(1).and_then(|id| TenantId::new(id).ok())
    }

    /// Component segment, if any
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        match self.kind() {
            NamespaceKind::Tenant => self.segments().nth(2),
            NamespaceKind::System => self.segments().nth(1),
            NamespaceKind::Shared => self.segments().last(),
        }
    }

    /// Storage object (table) name of an entity declared under this label
    #[must_use]
    pub fn storage_object(&self, entity: &str) -> String {
        format!("{}_{}", self.0.replace('.', "_"), entity.to_ascii_lowercase())
    }
}

impl FromStr for NamespaceLabel {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments: Vec<&str> = s.split('.').collect();
        if let Some(bad) = segments.iter().find(|seg| !is_valid_segment(seg)) {
            return Err(if bad.is_empty() {
                PathError::EmptySegment
            } else {
                PathError::InvalidSegment((*bad).to_string())
            });
        }
        let well_formed = match segments[0] {
            TENANT_ROOT => (2..=3).contains(&segments.len()),
            SYSTEM_ROOT => segments.len() == 2,
            _ => true,
        };
        if well_formed {
            Ok(Self(s.to_string()))
        } else {
            Err(PathError::MalformedLabel(s.to_string()))
        }
    }
}

impl TryFrom<String> for NamespaceLabel {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NamespaceLabel> for String {
    fn from(label: NamespaceLabel) -> Self {
        label.0
    }
}

impl fmt::Display for NamespaceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
