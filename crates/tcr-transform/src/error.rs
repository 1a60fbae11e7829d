//! Transform error types

/// Errors raised while rewriting, capturing or binding entity source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// Grammar could not be loaded into the parser
    #[error("parser initialization failed: {0}")]
    ParserInit(String),

    /// Parser gave up without producing a tree
    #[error("parse failed")]
    ParseFailed,

    /// Source contains a syntax error (1-based line and column)
    #[error("syntax error at {line}:{column}")]
    Syntax {
        /// Line of the first error node
        line: usize,
        /// Column of the first error node
        column: usize,
    },

    /// A relation target could not be bound to any known entity
    #[error("unresolved relation {entity}.{field} -> '{target}'")]
    UnresolvedRelation {
        /// Declaring entity
        entity: String,
        /// Relation field
        field: String,
        /// Target as written in source
        target: String,
    },
}

impl TransformError {
    /// Create unresolved relation error
    pub fn unresolved(
        entity: impl Into<String>,
        field: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self::UnresolvedRelation {
            entity: entity.into(),
            field: field.into(),
            target: target.into(),
        }
    }
}
