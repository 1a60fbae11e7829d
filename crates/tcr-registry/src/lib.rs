//! TCR Tenant Registry
//!
//! Process-wide registry of tenant namespaces and the router that picks a
//! storage partition for every entity operation.
//!
//! # Core Concepts
//!
//! - [`TenantRegistry`]: label → [`NamespaceDescriptor`], tenant entries and
//!   per-partition [`SchemaStatus`]
//! - [`StorageRouter`]: partition choice from a label and an explicit
//!   [`TenantContext`], guarded by schema status
//! - [`TenantRegistry::lookup_by_request`]: request path or header → label

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod descriptor;
mod error;
mod lookup;
mod registry;
mod router;

pub use descriptor::{NamespaceDescriptor, SchemaStatus};
pub use error::RegistryError;
pub use lookup::TENANT_PATH_MARKERS;
pub use registry::{TenantEntry, TenantRegistry, DEFAULT_RESOLVED_CAPACITY};
pub use router::{Access, RelationVerdict, StorageRouter, TenantContext};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
