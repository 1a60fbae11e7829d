//! Tree-sitter helpers shared by the rewriter and the declaration capture

use crate::error::TransformError;
use tree_sitter::{Node, Parser, Tree};

/// Parse Python source, rejecting trees that contain error or missing nodes
pub(crate) fn parse(source: &str) -> Result<Tree, TransformError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| TransformError::ParserInit(e.to_string()))?;

    let tree = parser
        .parse(source, None)
        .ok_or(TransformError::ParseFailed)?;

    if tree.root_node().has_error() {
        let at = first_error(tree.root_node()).unwrap_or(tree.root_node());
        let pos = at.start_position();
        return Err(TransformError::Syntax {
            line: pos.row + 1,
            column: pos.column + 1,
        });
    }
    Ok(tree)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.has_error() || child.is_missing() {
                if let Some(found) = first_error(child) {
                    return Some(found);
                }
            }
        }
    }
    None
}

/// Source text of a node
pub(crate) fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// Named, non-comment children of a node
pub(crate) fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    (0..node.named_child_count())
        .filter_map(|i| node.named_child(i))
        .filter(|n| n.kind() != "comment")
        .collect()
}

/// Last dotted segment of a callee or base class: `models.ForeignKey` → `ForeignKey`
pub(crate) fn simple_name<'s>(node: Node<'_>, source: &'s str) -> Option<&'s str> {
    match node.kind() {
        "identifier" => Some(text(node, source)),
        "attribute" => node
            .child_by_field_name("attribute")
            .map(|attr| text(attr, source)),
        _ => None,
    }
}

/// Value of a string literal without quotes or prefix
pub(crate) fn string_value(node: Node<'_>, source: &str) -> Option<String> {
    if node.kind() != "string" {
        return None;
    }
    let content: String = named_children(node)
        .into_iter()
        .filter(|n| n.kind() == "string_content")
        .map(|n| text(n, source))
        .collect();
    Some(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_first_error_position() {
        let err = parse("class A:\n    x = (\n").unwrap_err();
        assert!(matches!(err, TransformError::Syntax { line, .. } if line >= 2));
    }

    #[test]
    fn string_values_drop_quotes() {
        let src = "x = 'auth.User'\n";
        let tree = parse(src).unwrap();
        let assignment = tree.root_node().named_child(0).and_then(|s| s.named_child(0)).unwrap();
        let right = assignment.child_by_field_name("right").unwrap();
        assert_eq!(string_value(right, src).as_deref(), Some("auth.User"));
    }
}
