//! Namespace descriptors and schema status

use chrono::{DateTime, Utc};
use serde::Serialize;
use tcr_record::{ContentHash, LogicalPath, NamespaceLabel, StorageAlias, TenantId};
use tcr_transform::EntityDecl;

/// Everything the process knows about one registered namespace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamespaceDescriptor {
    /// Unique label
    pub label: NamespaceLabel,
    /// Owning tenant, `None` for system and shared namespaces
    pub tenant: Option<TenantId>,
    /// Storage partition the namespace's entities live in
    pub alias: StorageAlias,
    /// Modules the declarations were captured from
    pub modules: Vec<LogicalPath>,
    /// Captured entity declarations
    pub entities: Vec<EntityDecl>,
    /// Hash over the transformed module sources
    pub source_hash: ContentHash,
    /// Registration time
    pub registered_at: DateTime<Utc>,
}

impl NamespaceDescriptor {
    /// Create a descriptor with no modules
    #[must_use]
    pub fn new(label: NamespaceLabel, alias: StorageAlias) -> Self {
        Self {
            tenant: label.tenant_id(),
            label,
            alias,
            modules: Vec::new(),
            entities: Vec::new(),
            source_hash: ContentHash::compute(b""),
            registered_at: Utc::now(),
        }
    }

    /// Set captured declarations
    #[must_use]
    pub fn with_entities(mut self, entities: Vec<EntityDecl>) -> Self {
        self.entities = entities;
        self
    }

    /// Set source modules and their hash
    #[must_use]
    pub fn with_modules(mut self, modules: Vec<LogicalPath>, source_hash: ContentHash) -> Self {
        self.modules = modules;
        self.source_hash = source_hash;
        self
    }

    /// Entity declaration by name
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityDecl> {
        self.entities.iter().find(|e| e.name == name)
    }
}

/// Schema state of one storage partition as seen by the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SchemaStatus {
    /// Declarations registered, synchronizer not finished
    Pending,
    /// Storage structure matches the declarations
    Verified,
    /// Synchronization failed
    Unverified {
        /// Failure reason
        reason: String,
    },
}

impl SchemaStatus {
    /// Whether entity operations may run
    #[inline]
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified)
    }
}
