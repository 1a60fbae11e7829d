//! Entity declaration capture
//!
//! Stored entity modules are read once, right after transformation, and
//! reduced to plain [`EntityDecl`] values. Nothing downstream looks at the
//! source again: the registry, the router and the schema synchronizer all
//! work on these declarations.

use crate::error::TransformError;
use crate::rewrite::{is_relation_call, NO_REVERSE_LINK, REVERSE_LINK_KEYWORD};
use crate::syntax::{self, named_children, simple_name, string_value, text};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tcr_record::NamespaceLabel;
use tree_sitter::Node;

/// Base class every entity ultimately derives from
pub const ENTITY_BASE: &str = "Model";

/// Many-to-many fields are join tables, not columns, and are not captured
pub const MANY_TO_MANY: &str = "ManyToManyField";

/// Kind of a to-one relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// `ForeignKey`
    ToOne,
    /// `OneToOneField`
    ToOneUnique,
}

/// Reference to a declared entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    /// Namespace the entity is declared under
    pub label: NamespaceLabel,
    /// Entity name
    pub name: String,
}

impl EntityRef {
    /// Create a reference
    #[inline]
    #[must_use]
    pub fn new(label: NamespaceLabel, name: impl Into<String>) -> Self {
        Self {
            label,
            name: name.into(),
        }
    }

    /// Storage object name of the referenced entity
    #[inline]
    #[must_use]
    pub fn storage_object(&self) -> String {
        self.label.storage_object(&self.name)
    }
}

impl std::fmt::Display for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.label, self.name)
    }
}

/// Target of a relation field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationTarget {
    /// As written in source, not yet bound
    Unresolved(String),
    /// Bound to a declared entity
    Bound(EntityRef),
}

/// Reverse-link setting of a relation field
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReverseLink {
    /// Sentinel: the target gets no back-reference
    None,
    /// Named back-reference
    Named(String),
}

/// Relation part of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// To-one or to-one-unique
    pub kind: RelationKind,
    /// Target entity
    pub target: RelationTarget,
    /// Reverse-link setting
    pub reverse_link: ReverseLink,
}

/// Shape of a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain column, e.g. `CharField`
    Scalar {
        /// Field class name
        type_name: String,
    },
    /// Relation to another entity
    Relation(Relation),
}

/// One declared field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    /// Attribute name
    pub name: String,
    /// Scalar or relation
    pub kind: FieldKind,
    /// `null=True`
    pub null: bool,
    /// `unique=True`
    pub unique: bool,
    /// `primary_key=True`
    pub primary_key: bool,
}

impl FieldDecl {
    /// Relation part, if this is a relation field
    #[inline]
    #[must_use]
    pub fn relation(&self) -> Option<&Relation> {
        match &self.kind {
            FieldKind::Relation(rel) => Some(rel),
            FieldKind::Scalar { .. } => None,
        }
    }
}

/// Captured entity type declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDecl {
    /// Entity name
    pub name: String,
    /// Namespace label the entity is registered under
    pub label: NamespaceLabel,
    /// Fields in declaration order, inherited fields first
    pub fields: Vec<FieldDecl>,
}

impl EntityDecl {
    /// Reference to this entity
    #[inline]
    #[must_use]
    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.label.clone(), self.name.clone())
    }

    /// Storage object name
    #[inline]
    #[must_use]
    pub fn storage_object(&self) -> String {
        self.label.storage_object(&self.name)
    }

    /// Field by name
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Relation fields
    pub fn relations(&self) -> impl Iterator<Item = (&FieldDecl, &Relation)> {
        self.fields
            .iter()
            .filter_map(|f| f.relation().map(|rel| (f, rel)))
    }
}

/// Capture entity declarations from (transformed) module source
///
/// # Errors
/// Returns [`TransformError::Syntax`] if the source does not parse
pub fn capture(source: &str, label: &NamespaceLabel) -> Result<Vec<EntityDecl>, TransformError> {
    let tree = syntax::parse(source)?;

    // Every entity-derived class of the module, abstract ones included.
    let mut known: HashMap<String, Vec<FieldDecl>> = HashMap::new();
    let mut decls = Vec::new();

    for stmt in named_children(tree.root_node()) {
        let Some(class) = class_definition(stmt) else {
            continue;
        };
        let Some(name) = class.child_by_field_name("name").map(|n| text(n, source)) else {
            continue;
        };

        let bases = base_names(class, source);
        let is_entity = bases
            .iter()
            .any(|b| *b == ENTITY_BASE || known.contains_key(*b));
        if !is_entity {
            continue;
        }

        let mut fields: Vec<FieldDecl> = Vec::new();
        for base in &bases {
            for inherited in known.get(*base).into_iter().flatten() {
                upsert(&mut fields, inherited.clone());
            }
        }

        let mut is_abstract = false;
        if let Some(body) = class.child_by_field_name("body") {
            for member in named_children(body) {
                if let Some(meta) = class_definition(member) {
                    if meta
                        .child_by_field_name("name")
                        .is_some_and(|n| text(n, source) == "Meta")
                    {
                        is_abstract |= declares_abstract(meta, source);
                    }
                    continue;
                }
                if let Some(field) = field_declaration(member, source, name) {
                    upsert(&mut fields, field);
                }
            }
        }

        known.insert(name.to_string(), fields.clone());
        if is_abstract {
            tracing::debug!(entity = name, "abstract entity base captured for inheritance only");
            continue;
        }
        decls.push(EntityDecl {
            name: name.to_string(),
            label: label.clone(),
            fields,
        });
    }

    Ok(decls)
}

fn upsert(fields: &mut Vec<FieldDecl>, field: FieldDecl) {
    match fields.iter_mut().find(|f| f.name == field.name) {
        Some(existing) => *existing = field,
        None => fields.push(field),
    }
}

fn class_definition(node: Node<'_>) -> Option<Node<'_>> {
    match node.kind() {
        "class_definition" => Some(node),
        "decorated_definition" => node
            .child_by_field_name("definition")
            .filter(|d| d.kind() == "class_definition"),
        _ => None,
    }
}

fn base_names<'s>(class: Node<'_>, source: &'s str) -> Vec<&'s str> {
    class
        .child_by_field_name("superclasses")
        .map(|list| {
            named_children(list)
                .into_iter()
                .filter_map(|b| simple_name(b, source))
                .collect()
        })
        .unwrap_or_default()
}

fn declares_abstract(meta: Node<'_>, source: &str) -> bool {
    let Some(body) = meta.child_by_field_name("body") else {
        return false;
    };
    named_children(body).into_iter().any(|stmt| {
        assignment(stmt).is_some_and(|(left, right)| {
            text(left, source) == "abstract" && right.kind() == "true"
        })
    })
}

fn assignment(stmt: Node<'_>) -> Option<(Node<'_>, Node<'_>)> {
    if stmt.kind() != "expression_statement" {
        return None;
    }
    let inner = stmt.named_child(0)?;
    if inner.kind() != "assignment" {
        return None;
    }
    Some((
        inner.child_by_field_name("left")?,
        inner.child_by_field_name("right")?,
    ))
}

fn field_declaration(stmt: Node<'_>, source: &str, entity: &str) -> Option<FieldDecl> {
    let (left, right) = assignment(stmt)?;
    if left.kind() != "identifier" || right.kind() != "call" {
        return None;
    }
    let name = text(left, source).to_string();
    let callee = simple_name(right.child_by_field_name("function")?, source)?;
    let args = right.child_by_field_name("arguments")?;

    if callee == MANY_TO_MANY {
        tracing::debug!(entity, field = %name, "many-to-many field skipped");
        return None;
    }

    let arguments = named_children(args);
    let flag = |key: &str| {
        keyword(&arguments, key, source).is_some_and(|value| value.kind() == "true")
    };

    let kind = if is_relation_call(right, source) {
        FieldKind::Relation(Relation {
            kind: if callee == "OneToOneField" {
                RelationKind::ToOneUnique
            } else {
                RelationKind::ToOne
            },
            target: RelationTarget::Unresolved(relation_target(&arguments, source)?),
            reverse_link: reverse_link(&arguments, source),
        })
    } else if callee.ends_with("Field") {
        FieldKind::Scalar {
            type_name: callee.to_string(),
        }
    } else {
        return None;
    };

    Some(FieldDecl {
        name,
        null: flag("null"),
        unique: flag("unique") || matches!(&kind, FieldKind::Relation(r) if r.kind == RelationKind::ToOneUnique),
        primary_key: flag("primary_key"),
        kind,
    })
}

fn keyword<'t>(arguments: &[Node<'t>], key: &str, source: &str) -> Option<Node<'t>> {
    arguments
        .iter()
        .filter(|a| a.kind() == "keyword_argument")
        .find(|a| {
            a.child_by_field_name("name")
                .is_some_and(|n| text(n, source) == key)
        })
        .and_then(|a| a.child_by_field_name("value"))
}

fn relation_target(arguments: &[Node<'_>], source: &str) -> Option<String> {
    let node = arguments
        .iter()
        .copied()
        .find(|a| a.kind() != "keyword_argument")
        .or_else(|| keyword(arguments, "to", source))?;
    string_value(node, source).or_else(|| match node.kind() {
        "identifier" | "attribute" => Some(text(node, source).to_string()),
        _ => None,
    })
}

fn reverse_link(arguments: &[Node<'_>], source: &str) -> ReverseLink {
    match keyword(arguments, REVERSE_LINK_KEYWORD, source).and_then(|v| string_value(v, source)) {
        Some(name) if name != NO_REVERSE_LINK => ReverseLink::Named(name),
        _ => ReverseLink::None,
    }
}
