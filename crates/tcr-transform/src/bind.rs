//! Relation binding post-pass
//!
//! After capture every relation target is still the text the author wrote.
//! Binding resolves it against, in order: `"self"`, an entity of the same
//! module, `<component>.<Name>` within the same tenant, and a full
//! `<label>.<Name>` already known to the registry. When all of that fails
//! and the last dotted segment is the shared identity type's simple name,
//! the relation is rebound to the identity type. That last step is a
//! compatibility shim and is always logged.

use crate::decl::{EntityDecl, EntityRef, FieldKind, RelationTarget};
use crate::error::TransformError;
use std::collections::HashSet;
use tcr_record::{NamespaceLabel, TenantId};

/// Read access to entities declared outside the batch being bound
pub trait EntityLookup {
    /// Whether `name` is declared under `label`
    fn contains(&self, label: &NamespaceLabel, name: &str) -> bool;
}

impl<F> EntityLookup for F
where
    F: Fn(&NamespaceLabel, &str) -> bool,
{
    fn contains(&self, label: &NamespaceLabel, name: &str) -> bool {
        self(label, name)
    }
}

/// A relation that was rebound to the identity type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRebind {
    /// Declaring entity
    pub entity: EntityRef,
    /// Relation field
    pub field: String,
    /// Target as written in source
    pub written: String,
}

/// Binds relation targets for one tenant's batch of declarations
pub struct Binder<'a> {
    tenant: Option<&'a TenantId>,
    identity: &'a EntityRef,
    lookup: &'a dyn EntityLookup,
}

impl<'a> Binder<'a> {
    /// Create a binder
    ///
    /// `tenant` enables `<component>.<Name>` resolution; system namespaces
    /// bind without one.
    #[must_use]
    pub fn new(
        tenant: Option<&'a TenantId>,
        identity: &'a EntityRef,
        lookup: &'a dyn EntityLookup,
    ) -> Self {
        Self {
            tenant,
            identity,
            lookup,
        }
    }

    /// Bind every unresolved relation in `decls`
    ///
    /// Entities of the batch are visible to each other. Returns the
    /// relations that needed the identity shim.
    ///
    /// # Errors
    /// Returns [`TransformError::UnresolvedRelation`] for the first target
    /// that cannot be bound
    pub fn bind(&self, decls: &mut [EntityDecl]) -> Result<Vec<IdentityRebind>, TransformError> {
        let batch: HashSet<(NamespaceLabel, String)> = decls
            .iter()
            .map(|d| (d.label.clone(), d.name.clone()))
            .collect();
        let mut rebinds = Vec::new();

        for decl in decls.iter_mut() {
            let owner = decl.entity_ref();
            for field in &mut decl.fields {
                let FieldKind::Relation(rel) = &mut field.kind else {
                    continue;
                };
                let RelationTarget::Unresolved(written) = &rel.target else {
                    continue;
                };
                let written = written.clone();

                if let Some(target) = self.resolve(&owner, &written, &batch) {
                    rel.target = RelationTarget::Bound(target);
                } else if last_segment(&written) == self.identity.name {
                    tracing::warn!(
                        entity = %owner,
                        field = %field.name,
                        written = %written,
                        identity = %self.identity,
                        "relation target unresolved, rebinding to identity type"
                    );
                    rel.target = RelationTarget::Bound(self.identity.clone());
                    rebinds.push(IdentityRebind {
                        entity: owner.clone(),
                        field: field.name.clone(),
                        written,
                    });
                } else {
                    return Err(TransformError::unresolved(
                        owner.name.clone(),
                        field.name.clone(),
                        written,
                    ));
                }
            }
        }
        Ok(rebinds)
    }

    fn resolve(
        &self,
        owner: &EntityRef,
        written: &str,
        batch: &HashSet<(NamespaceLabel, String)>,
    ) -> Option<EntityRef> {
        let known = |label: &NamespaceLabel, name: &str| {
            batch.contains(&(label.clone(), name.to_string())) || self.lookup.contains(label, name)
        };

        if written == "self" {
            return Some(owner.clone());
        }

        let Some((prefix, name)) = written.rsplit_once('.') else {
            return known(&owner.label, written).then(|| EntityRef::new(owner.label.clone(), written));
        };

        if let Some(tenant) = self.tenant {
            if !prefix.contains('.') {
                if let Ok(label) = NamespaceLabel::tenant(tenant, Some(prefix)) {
                    if known(&label, name) {
                        return Some(EntityRef::new(label, name));
                    }
                }
            }
        }

        prefix
            .parse::<NamespaceLabel>()
            .ok()
            .filter(|label| known(label, name))
            .map(|label| EntityRef::new(label, name))
    }
}

fn last_segment(written: &str) -> &str {
    written.rsplit('.').next().unwrap_or(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::capture;
    use pretty_assertions::assert_eq;

    fn identity() -> EntityRef {
        EntityRef::new(NamespaceLabel::system("auth").unwrap(), "User")
    }

    fn nothing(_: &NamespaceLabel, _: &str) -> bool {
        false
    }

    fn target(decl: &EntityDecl, field: &str) -> RelationTarget {
        decl.field(field).unwrap().relation().unwrap().target.clone()
    }

    #[test]
    fn binds_self_and_same_module_targets() {
        let label: NamespaceLabel = "tenant.7.blog".parse().unwrap();
        let src = "class Post(Model):\n    parent = ForeignKey('self')\n\nclass Comment(Model):\n    post = ForeignKey('Post')\n";
        let mut decls = capture(src, &label).unwrap();
        let tenant = TenantId::from(7);
        let id = identity();
        let rebinds = Binder::new(Some(&tenant), &id, &nothing).bind(&mut decls).unwrap();

        assert!(rebinds.is_empty());
        assert_eq!(target(&decls[0], "parent"), RelationTarget::Bound(EntityRef::new(label.clone(), "Post")));
        assert_eq!(target(&decls[1], "post"), RelationTarget::Bound(EntityRef::new(label, "Post")));
    }

    #[test]
    fn binds_component_qualified_targets_within_the_tenant() {
        let blog: NamespaceLabel = "tenant.7.blog".parse().unwrap();
        let shop: NamespaceLabel = "tenant.7.shop".parse().unwrap();
        let mut decls = capture("class Order(Model):\n    post = ForeignKey('blog.Post')\n", &shop).unwrap();
        let tenant = TenantId::from(7);
        let id = identity();
        let lookup = |label: &NamespaceLabel, name: &str| label.as_str() == "tenant.7.blog" && name == "Post";
        Binder::new(Some(&tenant), &id, &lookup).bind(&mut decls).unwrap();

        assert_eq!(target(&decls[0], "post"), RelationTarget::Bound(EntityRef::new(blog, "Post")));
    }

    #[test]
    fn binds_fully_labelled_targets_from_the_registry() {
        let label: NamespaceLabel = "tenant.7.blog".parse().unwrap();
        let mut decls = capture("class Post(Model):\n    org = ForeignKey('core.orgs.Org')\n", &label).unwrap();
        let id = identity();
        let lookup = |label: &NamespaceLabel, name: &str| label.as_str() == "core.orgs" && name == "Org";
        Binder::new(None, &id, &lookup).bind(&mut decls).unwrap();

        assert_eq!(
            target(&decls[0], "org"),
            RelationTarget::Bound(EntityRef::new("core.orgs".parse().unwrap(), "Org"))
        );
    }

    #[test]
    fn unresolved_user_names_fall_back_to_identity() {
        let label: NamespaceLabel = "tenant.7.blog".parse().unwrap();
        let mut decls = capture(
            "class Post(Model):\n    author = ForeignKey(User)\n    editor = ForeignKey('auth.User')\n",
            &label,
        )
        .unwrap();
        let tenant = TenantId::from(7);
        let id = identity();
        let rebinds = Binder::new(Some(&tenant), &id, &nothing).bind(&mut decls).unwrap();

        assert_eq!(rebinds.len(), 2);
        assert_eq!(target(&decls[0], "author"), RelationTarget::Bound(id.clone()));
        assert_eq!(target(&decls[0], "editor"), RelationTarget::Bound(id));
    }

    #[test]
    fn identity_shim_only_matches_the_last_segment_exactly() {
        let label: NamespaceLabel = "tenant.7.blog".parse().unwrap();
        let mut decls = capture("class Post(Model):\n    owner = ForeignKey('auth.UserProfile')\n", &label).unwrap();
        let tenant = TenantId::from(7);
        let id = identity();
        let err = Binder::new(Some(&tenant), &id, &nothing).bind(&mut decls).unwrap_err();

        assert_eq!(err, TransformError::unresolved("Post", "owner", "auth.UserProfile"));
    }

    #[test]
    fn registry_target_wins_over_identity_shim() {
        let label: NamespaceLabel = "tenant.7.blog".parse().unwrap();
        let mut decls = capture("class Post(Model):\n    author = ForeignKey('accounts.User')\n", &label).unwrap();
        let tenant = TenantId::from(7);
        let id = identity();
        let lookup = |label: &NamespaceLabel, name: &str| label.as_str() == "tenant.7.accounts" && name == "User";
        let rebinds = Binder::new(Some(&tenant), &id, &lookup).bind(&mut decls).unwrap();

        assert!(rebinds.is_empty());
        assert_eq!(
            target(&decls[0], "author"),
            RelationTarget::Bound(EntityRef::new("tenant.7.accounts".parse().unwrap(), "User"))
        );
    }
}
