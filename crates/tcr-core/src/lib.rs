//! TCR Core - tenant code platform
//!
//! Loads tenant-authored entity modules from a code record store, keeps one
//! storage partition per tenant in line with the declared entities, and
//! runs throwaway preview copies of tenants with patches applied.
//!
//! # Core Concepts
//!
//! - [`CodeRecordStore`]: where tenant source lives
//! - [`ResolverChain`] / [`RecordResolver`]: logical path → [`LoadableUnit`]
//! - [`NamespaceMaterializer`]: mirrors a tenant to disk, guarded per tenant
//! - [`TenantLoader`]: materialize → resolve → capture → bind → register →
//!   synchronize
//! - [`PreviewOverlayManager`]: scratch tenants with a [`PatchSet`] applied
//! - [`Platform`]: facade over all of the above
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tcr_core::prelude::*;
//!
//! # async fn example() -> Result<(), PlatformError> {
//! let store = Arc::new(MemoryRecordStore::new());
//! store.insert(CodeRecord::new(TenantId::from(7), Some("blog"), "entities.py",
//!     "class Post(models.Model):\n    author = models.ForeignKey('auth.User')\n"));
//!
//! let platform = Platform::new(PlatformConfig::new(), store, Arc::new(MemoryEngine::new()))?;
//! platform.bootstrap().await?;
//! let report = platform.load_tenant(&TenantId::from(7)).await?;
//! println!("registered {} labels", report.labels.len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod loader;
pub mod materialize;
pub mod overlay;
pub mod platform;
pub mod resolve;
pub mod store;

pub use config::{IdentityConfig, PlatformConfig, SystemNamespace, IDENTITY_SOURCE};
pub use error::{ManifestError, MaterializeError, PlatformError, ResolveError, StoreError};
pub use loader::{LoadReport, TenantLoader};
pub use materialize::{
    MaterializationGuard, MaterializationTicket, MaterializeReport, NamespaceMaterializer,
};
pub use overlay::{LayeredRecordStore, OverlayHandle, PreviewOverlayManager, Reconciliation};
pub use platform::Platform;
pub use resolve::{LoadableUnit, ModuleCache, ModuleResolver, RecordResolver, ResolverChain};
pub use store::{CodeRecordStore, MemoryRecordStore, RecordManifest};

pub use tcr_record::{CodeRecord, NamespaceLabel, PatchSet, StorageAlias, TenantId};
pub use tcr_registry::{Access, RelationVerdict, SchemaStatus, TenantContext};
pub use tcr_schema::{MemoryEngine, StorageEngine};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with TCR Core
    pub use crate::{
        Access, CodeRecord, CodeRecordStore, LoadReport, MemoryEngine, MemoryRecordStore,
        NamespaceLabel, OverlayHandle, PatchSet, Platform, PlatformConfig, PlatformError,
        Reconciliation, StorageAlias, StorageEngine, TenantContext, TenantId,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
