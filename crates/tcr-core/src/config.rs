//! Platform configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.

use crate::error::PlatformError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tcr_record::{is_valid_segment, NamespaceKind, NamespaceLabel, StorageAlias};
use tcr_transform::EntityRef;

/// Source of the built-in identity namespace
pub const IDENTITY_SOURCE: &str = "\
class User(models.Model):
    username = models.CharField(max_length=150, unique=True)
    email = models.EmailField(null=True)
    is_active = models.BooleanField()
";

/// Entity type that unresolvable identity references are rebound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Label of the namespace declaring the identity type
    pub label: String,
    /// Entity name
    pub name: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            label: "system.auth".to_string(),
            name: "User".to_string(),
        }
    }
}

/// Platform-owned namespace registered at bootstrap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemNamespace {
    /// `system.<component>` or a shared dotted label
    pub label: String,
    /// Entity module source
    pub source: String,
}

/// Platform configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Reserved first segment of tenant module paths
    pub namespace_prefix: String,
    /// Directory receiving mirrored tenant namespaces
    pub materialize_root: PathBuf,
    /// Alias of the shared partition
    pub default_alias: String,
    /// Module names scanned for entity declarations in every component
    pub entity_modules: Vec<String>,
    /// Identity type for the rebind shim
    pub identity: IdentityConfig,
    /// Namespaces registered at bootstrap
    pub system_namespaces: Vec<SystemNamespace>,
    /// Capacity of the resolved module cache
    pub module_cache_capacity: u64,
    /// Capacity of the registry's resolved-type cache
    pub resolved_cache_capacity: u64,
    /// Age after which preview overlays are reaped
    pub overlay_ttl_secs: u64,
    /// Reaper period; no reaper when unset
    pub reaper_interval_secs: Option<u64>,
}

impl PlatformConfig {
    /// Create config with defaults
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set materialization root
    #[inline]
    #[must_use]
    pub fn with_materialize_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.materialize_root = root.into();
        self
    }

    /// Set entity module names
    #[inline]
    #[must_use]
    pub fn with_entity_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_modules = modules.into_iter().map(Into::into).collect();
        self
    }

    /// Add a bootstrap namespace
    #[inline]
    #[must_use]
    pub fn with_system_namespace(
        mut self,
        label: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        self.system_namespaces.push(SystemNamespace {
            label: label.into(),
            source: source.into(),
        });
        self
    }

    /// Set overlay time-to-live
    #[inline]
    #[must_use]
    pub fn with_overlay_ttl(mut self, ttl: Duration) -> Self {
        self.overlay_ttl_secs = ttl.as_secs();
        self
    }

    /// Enable the overlay reaper
    #[inline]
    #[must_use]
    pub fn with_reaper_interval(mut self, interval: Duration) -> Self {
        self.reaper_interval_secs = Some(interval.as_secs().max(1));
        self
    }

    /// Parse TOML
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] on syntax errors or invalid values
    pub fn from_toml_str(text: &str) -> Result<Self, PlatformError> {
        let config: Self =
            toml::from_str(text).map_err(|e| PlatformError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] if the file cannot be read or parsed
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PlatformError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PlatformError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Check identifiers and labels
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] naming the first invalid value
    pub fn validate(&self) -> Result<(), PlatformError> {
        if !is_valid_segment(&self.namespace_prefix) {
            return Err(PlatformError::Config(format!(
                "namespace_prefix {:?} is not a single segment",
                self.namespace_prefix
            )));
        }
        if self.default_alias.is_empty() {
            return Err(PlatformError::Config("default_alias is empty".into()));
        }
        if let Some(bad) = self.entity_modules.iter().find(|m| !is_valid_segment(m)) {
            return Err(PlatformError::Config(format!("entity module {bad:?} is invalid")));
        }
        self.identity_ref()?;
        self.system_labels()?;
        Ok(())
    }

    /// Identity type as an entity reference
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] if the label does not parse
    pub fn identity_ref(&self) -> Result<EntityRef, PlatformError> {
        let label: NamespaceLabel = self
            .identity
            .label
            .parse()
            .map_err(|e| PlatformError::Config(format!("identity label: {e}")))?;
        Ok(EntityRef::new(label, self.identity.name.clone()))
    }

    /// Parsed labels of the bootstrap namespaces, paired with their source
    ///
    /// # Errors
    /// Returns [`PlatformError::Config`] for unparsable or tenant labels
    pub fn system_labels(&self) -> Result<Vec<(NamespaceLabel, &str)>, PlatformError> {
        self.system_namespaces
            .iter()
            .map(|ns| {
                let label: NamespaceLabel = ns
                    .label
                    .parse()
                    .map_err(|e| PlatformError::Config(format!("{}: {e}", ns.label)))?;
                if label.kind() == NamespaceKind::Tenant {
                    return Err(PlatformError::Config(format!(
                        "{label} is a tenant label and cannot be bootstrapped"
                    )));
                }
                Ok((label, ns.source.as_str()))
            })
            .collect()
    }

    /// Alias of the shared partition
    #[inline]
    #[must_use]
    pub fn default_alias(&self) -> StorageAlias {
        StorageAlias::named(self.default_alias.clone())
    }

    /// Overlay time-to-live
    #[inline]
    #[must_use]
    pub fn overlay_ttl(&self) -> Duration {
        Duration::from_secs(self.overlay_ttl_secs)
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            namespace_prefix: tcr_record::TENANT_ROOT.to_string(),
            materialize_root: PathBuf::from(".tcr/namespaces"),
            default_alias: StorageAlias::DEFAULT.to_string(),
            entity_modules: vec!["entities".to_string(), "models".to_string()],
            identity: IdentityConfig::default(),
            system_namespaces: vec![SystemNamespace {
                label: "system.auth".to_string(),
                source: IDENTITY_SOURCE.to_string(),
            }],
            module_cache_capacity: 10_000,
            resolved_cache_capacity: tcr_registry::DEFAULT_RESOLVED_CAPACITY,
            overlay_ttl_secs: 15 * 60,
            reaper_interval_secs: None,
        }
    }
}
