//! Expected storage structure of entity declarations

use crate::model::{ColumnRef, ColumnSpec, ColumnType, TableSpec};
use std::collections::HashMap;
use tcr_transform::{EntityDecl, FieldKind, RelationKind, RelationTarget};

/// Name of the implicit primary key
pub const IMPLICIT_PRIMARY_KEY: &str = "id";

/// Column type of a scalar field class
#[must_use]
pub fn column_type(type_name: &str) -> ColumnType {
    match type_name {
        "IntegerField" | "SmallIntegerField" | "PositiveIntegerField" => ColumnType::Integer,
        "BigIntegerField" | "AutoField" | "BigAutoField" => ColumnType::BigInteger,
        "BooleanField" => ColumnType::Boolean,
        "FloatField" => ColumnType::Double,
        "DecimalField" => ColumnType::Decimal,
        "DateTimeField" => ColumnType::Timestamp,
        "DateField" => ColumnType::Date,
        "JSONField" => ColumnType::Json,
        "UUIDField" => ColumnType::Uuid,
        _ => ColumnType::Text,
    }
}

/// Table specs for all declarations stored in one partition
///
/// Relations get a foreign key only when their target is part of the same
/// batch, i.e. lives in the same partition.
#[must_use]
pub fn plan_tables(decls: &[EntityDecl]) -> Vec<TableSpec> {
    let primary_keys: HashMap<String, String> = decls
        .iter()
        .map(|d| (d.storage_object(), primary_key_of(d)))
        .collect();

    decls
        .iter()
        .map(|decl| table_spec(decl, &primary_keys))
        .collect()
}

fn primary_key_of(decl: &EntityDecl) -> String {
    decl.fields
        .iter()
        .find(|f| f.primary_key)
        .map_or_else(|| IMPLICIT_PRIMARY_KEY.to_string(), |f| f.name.clone())
}

fn table_spec(decl: &EntityDecl, primary_keys: &HashMap<String, String>) -> TableSpec {
    let mut columns = Vec::with_capacity(decl.fields.len() + 1);
    if !decl.fields.iter().any(|f| f.primary_key) {
        columns.push(ColumnSpec::primary_key(IMPLICIT_PRIMARY_KEY));
    }

    for field in &decl.fields {
        let column = match &field.kind {
            FieldKind::Scalar { type_name } => ColumnSpec {
                name: field.name.clone(),
                column_type: column_type(type_name),
                nullable: field.null && !field.primary_key,
                unique: field.unique,
                primary_key: field.primary_key,
                references: None,
            },
            FieldKind::Relation(rel) => {
                let references = match &rel.target {
                    RelationTarget::Bound(target) => {
                        let table = target.storage_object();
                        primary_keys.get(&table).map(|column| ColumnRef {
                            column: column.clone(),
                            table,
                        })
                    }
                    RelationTarget::Unresolved(_) => None,
                };
                ColumnSpec {
                    name: format!("{}_id", field.name),
                    column_type: ColumnType::BigInteger,
                    nullable: field.null,
                    unique: field.unique || rel.kind == RelationKind::ToOneUnique,
                    primary_key: field.primary_key,
                    references,
                }
            }
        };
        columns.push(column);
    }

    TableSpec {
        name: decl.storage_object(),
        columns,
    }
}
