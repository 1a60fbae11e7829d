//! Patch sets
//!
//! A patch set is a flat map of logical path → full new content produced by
//! an editing collaborator. Patches replace whole files. Keys are accepted
//! with or without the reserved `tenant.` prefix and stored without it.

use crate::hash::ContentHash;
use crate::ids::TenantId;
use crate::label::TENANT_ROOT;
use crate::path::{LogicalPath, PathError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Whole-file replacements keyed by logical path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct PatchSet {
    entries: IndexMap<LogicalPath, String>,
}

impl PatchSet {
    /// Empty patch set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace one file
    ///
    /// # Errors
    /// Returns error if the key is not a valid logical path
    pub fn insert(&mut self, path: &str, content: impl Into<String>) -> Result<(), PathError> {
        let parsed: LogicalPath = path.parse()?;
        let normalized = match parsed.first() {
            Some(TENANT_ROOT) => LogicalPath::new(parsed.segments()[1..].iter().cloned())?,
            _ => parsed,
        };
        if normalized.is_empty() {
            return Err(PathError::EmptySegment);
        }
        self.entries.insert(normalized, content.into());
        Ok(())
    }

    /// Builder form of [`PatchSet::insert`]
    ///
    /// # Errors
    /// Returns error if the key is not a valid logical path
    pub fn with(mut self, path: &str, content: impl Into<String>) -> Result<Self, PathError> {
        self.insert(path, content)?;
        Ok(self)
    }

    /// Number of patched files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is patched
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Patched files in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&LogicalPath, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Content for a logical path, if patched
    #[must_use]
    pub fn get(&self, path: &LogicalPath) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Identity of the patch set, independent of insertion order
    #[must_use]
    pub fn identity(&self) -> ContentHash {
        let mut sorted: Vec<(String, &str)> = self
            .entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.as_str()))
            .collect();
        sorted.sort();
        ContentHash::compute_parts(
            sorted
                .iter()
                .flat_map(|(k, v)| [k.as_bytes(), v.as_bytes()]),
        )
    }

    /// Keys that do not belong to `tenant`
    #[must_use]
    pub fn foreign_paths(&self, tenant: &TenantId) -> Vec<&LogicalPath> {
        self.entries
            .keys()
            .filter(|k| k.first() != Some(tenant.as_str()))
            .collect()
    }
}

impl TryFrom<BTreeMap<String, String>> for PatchSet {
    type Error = PathError;

    fn try_from(map: BTreeMap<String, String>) -> Result<Self, Self::Error> {
        let mut patch = Self::new();
        for (path, content) in map {
            patch.insert(&path, content)?;
        }
        Ok(patch)
    }
}

impl From<PatchSet> for BTreeMap<String, String> {
    fn from(patch: PatchSet) -> Self {
        patch
            .entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}
