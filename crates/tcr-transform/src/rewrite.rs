//! Relation-field rewriting
//!
//! Every `ForeignKey(...)` / `OneToOneField(...)` call (bare or qualified, e.g.
//! `models.ForeignKey`) has its argument list rebuilt: the author's
//! `related_name=` argument is dropped and `related_name="+"` is appended.
//! The remaining arguments keep their source text and are joined by `", "`,
//! so running the rewrite over its own output changes nothing.

use crate::error::TransformError;
use crate::syntax::{self, named_children, simple_name, text};
use std::ops::Range;
use tree_sitter::Node;

/// Keyword carrying the reverse-link name
pub const REVERSE_LINK_KEYWORD: &str = "related_name";

/// Reverse-link value meaning "no reverse link"
pub const NO_REVERSE_LINK: &str = "+";

/// Callee names of to-one relation fields
pub const RELATION_CALLEES: [&str; 2] = ["ForeignKey", "OneToOneField"];

/// Rewrite all relation declarations in `source`
///
/// # Errors
/// Returns [`TransformError::Syntax`] if the source does not parse
pub fn transform(source: &str) -> Result<String, TransformError> {
    let tree = syntax::parse(source)?;

    let mut edits: Vec<(Range<usize>, String)> = Vec::new();
    collect_edits(tree.root_node(), source, &mut edits);
    if edits.is_empty() {
        return Ok(source.to_string());
    }

    // Edits never overlap: relation calls are not searched inside one another.
    edits.sort_by_key(|(range, _)| range.start);
    let mut out = String::with_capacity(source.len() + edits.len() * 16);
    let mut cursor = 0;
    for (range, replacement) in &edits {
        out.push_str(&source[cursor..range.start]);
        out.push_str(replacement);
        cursor = range.end;
    }
    out.push_str(&source[cursor..]);

    tracing::trace!(rewritten = edits.len(), "relation declarations rewritten");
    Ok(out)
}

/// Whether a call node declares a to-one relation
pub(crate) fn is_relation_call(node: Node<'_>, source: &str) -> bool {
    node.kind() == "call"
        && node
            .child_by_field_name("function")
            .and_then(|f| simple_name(f, source))
            .is_some_and(|name| RELATION_CALLEES.contains(&name))
}

fn collect_edits(node: Node<'_>, source: &str, edits: &mut Vec<(Range<usize>, String)>) {
    if is_relation_call(node, source) {
        if let Some(args) = node.child_by_field_name("arguments") {
            if args.kind() == "argument_list" {
                edits.push((args.byte_range(), rebuild_arguments(args, source)));
                return;
            }
        }
    }

    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            collect_edits(child, source, edits);
        }
    }
}

fn rebuild_arguments(args: Node<'_>, source: &str) -> String {
    let mut kept: Vec<&str> = named_children(args)
        .into_iter()
        .filter(|arg| !is_reverse_link_argument(*arg, source))
        .map(|arg| text(arg, source))
        .collect();
    let sentinel = format!("{REVERSE_LINK_KEYWORD}=\"{NO_REVERSE_LINK}\"");
    kept.push(&sentinel);
    format!("({})", kept.join(", "))
}

fn is_reverse_link_argument(arg: Node<'_>, source: &str) -> bool {
    arg.kind() == "keyword_argument"
        && arg
            .child_by_field_name("name")
            .is_some_and(|name| text(name, source) == REVERSE_LINK_KEYWORD)
}
