//! Relationship definitions between tables.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Separator between table and field in a reference string.
pub const REFERENCE_SEPARATOR: char = '.';

/// Field every row carries as its primary value.
pub const ID_FIELD: &str = "id";

/// Behavior when a referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeleteBehavior {
    /// Prevent deletion if dependent rows exist.
    #[default]
    Restrict,
    /// Delete dependent rows.
    Cascade,
    /// Set the dependent field to null.
    SetNull,
}

impl fmt::Display for DeleteBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteBehavior::Restrict => write!(f, "restrict"),
            DeleteBehavior::Cascade => write!(f, "cascade"),
            DeleteBehavior::SetNull => write!(f, "setNull"),
        }
    }
}

/// A foreign-key declaration on a source table field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationshipDef {
    /// Target in `table.field` form.
    pub references: String,
    /// Policy applied when the target row is deleted.
    #[serde(default)]
    pub on_delete: DeleteBehavior,
}

impl RelationshipDef {
    /// Reference `table.field` with the default `restrict` policy.
    pub fn new(references: impl Into<String>) -> Self {
        Self {
            references: references.into(),
            on_delete: DeleteBehavior::Restrict,
        }
    }

    /// Reference the `id` of `table`.
    pub fn to_table(table: &str) -> Self {
        Self::new(format!("{table}{REFERENCE_SEPARATOR}{ID_FIELD}"))
    }

    /// Set delete behavior.
    pub fn with_on_delete(mut self, on_delete: DeleteBehavior) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Split the reference string into target table and field.
    pub fn target(&self) -> Option<Reference<'_>> {
        let (table, field) = self.references.split_once(REFERENCE_SEPARATOR)?;
        if table.is_empty() || field.is_empty() {
            return None;
        }
        Some(Reference { table, field })
    }

    /// Like [`target`](Self::target), reporting a malformed reference against
    /// `field`.
    pub fn parse_target(&self, field: &str) -> Result<Reference<'_>> {
        self.target().ok_or_else(|| {
            ValidationError::InvalidReference {
                field: field.to_string(),
                references: self.references.clone(),
            }
            .into()
        })
    }

    /// Whether this relationship points at the `id` of `table`.
    pub fn targets_row_id_of(&self, table: &str) -> bool {
        self.target()
            .is_some_and(|t| t.table == table && t.field == ID_FIELD)
    }
}

/// Parsed `table.field` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference<'a> {
    /// Target table id.
    pub table: &'a str,
    /// Target field.
    pub field: &'a str,
}

/// A relationship seen from the referenced table's side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependentRelation {
    /// Table declaring the relationship (the child).
    pub table: String,
    /// Field on the child holding the foreign key.
    pub field: String,
    /// Policy applied when the parent row is deleted.
    pub on_delete: DeleteBehavior,
}
