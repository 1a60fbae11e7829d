//! TCR Source Transformer
//!
//! Structural rewriting and declaration capture for stored entity modules.
//!
//! # Core Concepts
//!
//! - [`transform`]: pure, idempotent rewrite forcing every to-one relation to
//!   carry the "no reverse link" sentinel
//! - [`capture`]: reduce a module to plain [`EntityDecl`] values
//! - [`Binder`]: resolve relation targets, with the identity-type shim
//!
//! # Example
//!
//! ```rust
//! use tcr_record::NamespaceLabel;
//! use tcr_transform::{capture, transform, ReverseLink};
//!
//! let src = "class Post(models.Model):\n    author = models.ForeignKey('auth.User', related_name='posts')\n";
//! let out = transform(src).unwrap();
//! assert_eq!(transform(&out).unwrap(), out);
//!
//! let label: NamespaceLabel = "tenant.7.blog".parse().unwrap();
//! let decls = capture(&out, &label).unwrap();
//! let (_, rel) = decls[0].relations().next().unwrap();
//! assert_eq!(rel.reverse_link, ReverseLink::None);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod bind;
mod decl;
mod error;
mod rewrite;
mod syntax;

pub use bind::{Binder, EntityLookup, IdentityRebind};
pub use decl::{
    capture, EntityDecl, EntityRef, FieldDecl, FieldKind, Relation, RelationKind, RelationTarget,
    ReverseLink, ENTITY_BASE, MANY_TO_MANY,
};
pub use error::TransformError;
pub use rewrite::{transform, NO_REVERSE_LINK, RELATION_CALLEES, REVERSE_LINK_KEYWORD};

use tcr_record::NamespaceLabel;

/// Transformed module source together with its captured declarations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformedModule {
    /// Rewritten source
    pub source: String,
    /// Declarations captured from the rewritten source
    pub entities: Vec<EntityDecl>,
}

/// Rewrite `source` and capture its declarations under `label`
///
/// # Errors
/// Returns [`TransformError::Syntax`] if the source does not parse
pub fn process(source: &str, label: &NamespaceLabel) -> Result<TransformedModule, TransformError> {
    let source = transform(source)?;
    let entities = capture(&source, label)?;
    Ok(TransformedModule { source, entities })
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
