//! Tenant and storage identifiers

use crate::path::{is_valid_segment, PathError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tenant identifier.
///
/// Integer and string ids are both accepted; the id must be usable as a
/// single label segment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

impl TenantId {
    /// Create a tenant id
    ///
    /// # Errors
    /// Returns error if the id is not a valid label segment
    pub fn new(id: impl Into<String>) -> Result<Self, PathError> {
        let id = id.into();
        if is_valid_segment(&id) {
            Ok(Self(id))
        } else if id.is_empty() {
            Err(PathError::EmptySegment)
        } else {
            Err(PathError::InvalidSegment(id))
        }
    }

    /// Id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id of a scratch tenant derived from this one
    #[must_use]
    pub fn scratch(&self, suffix: &str) -> Self {
        Self(format!("{}__preview_{}", self.0, suffix.to_ascii_lowercase()))
    }

    /// Whether this id was produced by [`TenantId::scratch`]
    #[inline]
    #[must_use]
    pub fn is_scratch(&self) -> bool {
        self.0.contains("__preview_")
    }
}

impl From<u64> for TenantId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<String> for TenantId {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl FromStr for TenantId {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle identifying one isolated storage partition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StorageAlias(String);

impl StorageAlias {
    /// Name of the shared partition
    pub const DEFAULT: &'static str = "default";

    /// Shared/default partition
    #[inline]
    #[must_use]
    pub fn default_alias() -> Self {
        Self(Self::DEFAULT.to_string())
    }

    /// Partition owned by a tenant
    #[inline]
    #[must_use]
    pub fn for_tenant(tenant: &TenantId) -> Self {
        Self(format!("tenant_{tenant}"))
    }

    /// Arbitrary alias (used for configured shared aliases)
    #[inline]
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Alias as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the shared partition
    #[inline]
    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl fmt::Display for StorageAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ids_render_decimal() {
        assert_eq!(TenantId::from(7).as_str(), "7");
        assert_eq!("acme_co".parse::<TenantId>().unwrap().as_str(), "acme_co");
    }

    #[test]
    fn rejects_ids_that_break_labels() {
        assert!(TenantId::new("").is_err());
        assert!(TenantId::new("7.8").is_err());
        assert!(TenantId::new("a b").is_err());
    }

    #[test]
    fn scratch_ids_are_distinct_and_flagged() {
        let base = TenantId::from(7);
        let scratch = base.scratch("01HZX");
        assert_eq!(scratch.as_str(), "7__preview_01hzx");
        assert!(scratch.is_scratch());
        assert!(!base.is_scratch());
    }

    #[test]
    fn tenant_aliases() {
        assert_eq!(StorageAlias::for_tenant(&TenantId::from(7)).as_str(), "tenant_7");
        assert!(StorageAlias::default_alias().is_default());
    }

    #[test]
    fn serde_validates() {
        let ok: TenantId = serde_json::from_str("\"42\"").unwrap();
        assert_eq!(ok, TenantId::from(42));
        assert!(serde_json::from_str::<TenantId>("\"4.2\"").is_err());
    }
}
