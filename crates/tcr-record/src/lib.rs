//! TCR Record Model
//!
//! Identifiers and value types shared by every layer of the tenant code
//! registry.
//!
//! # Core Concepts
//!
//! - [`TenantId`] / [`StorageAlias`]: who owns code and where its data lives
//! - [`LogicalPath`]: dotted address of a loadable unit
//! - [`NamespaceLabel`]: unique label of a tenant (or system) component
//! - [`CodeRecord`]: one stored virtual file
//! - [`PatchSet`]: whole-file replacements used by preview overlays
//! - [`ContentHash`]: BLAKE3 digest for content comparison and identity
//!
//! # Example
//!
//! ```rust
//! use tcr_record::{CodeRecord, NamespaceLabel, TenantId};
//!
//! let tenant = TenantId::from(7);
//! let record = CodeRecord::new(tenant.clone(), Some("blog"), "entities.py", "");
//! assert_eq!(record.logical_path().unwrap().to_string(), "7.components.blog.entities");
//!
//! let label = NamespaceLabel::tenant(&tenant, Some("blog")).unwrap();
//! assert_eq!(label.as_str(), "tenant.7.blog");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod hash;
mod ids;
mod label;
mod patch;
mod path;
mod record;

pub use hash::{ContentHash, HashError};
pub use ids::{StorageAlias, TenantId};
pub use label::{NamespaceKind, NamespaceLabel, SYSTEM_ROOT, TENANT_ROOT};
pub use patch::PatchSet;
pub use path::{is_valid_segment, LogicalPath, PathError};
pub use record::{
    logical_path_for, CodeRecord, RecordKey, COMPONENTS_SEGMENT, PACKAGE_MARKER, SOURCE_SUFFIX,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
