//! Write-time checks: required fields and foreign keys.

use tracing::debug;

use super::index::ReferenceIndex;
use crate::catalog::TableDef;
use crate::error::{Result, ValidationError};
use crate::keyspace::KeySpace;
use crate::value::Fields;

/// Fail if a field in the table's `required` set is absent or null.
pub fn check_required(table: &TableDef, fields: &Fields) -> Result<()> {
    for field in &table.schema.required {
        if fields.get(field).map_or(true, |v| v.is_null()) {
            return Err(ValidationError::MissingRequiredField {
                table: table.id.clone(),
                field: field.clone(),
            }
            .into());
        }
    }
    Ok(())
}

/// Checks that every related field resolves to an existing target row.
pub struct ForeignKeyValidator<'a> {
    index: &'a dyn ReferenceIndex,
    keys: &'a KeySpace,
}

impl<'a> ForeignKeyValidator<'a> {
    /// Create a validator.
    pub fn new(index: &'a dyn ReferenceIndex, keys: &'a KeySpace) -> Self {
        Self { index, keys }
    }

    /// Validate `fields` against the relationships of `table`.
    ///
    /// Null and absent related fields are allowed. The first unresolved
    /// reference fails the whole document.
    pub async fn validate(&self, table: &TableDef, fields: &Fields) -> Result<()> {
        for (field, rel) in &table.relationships {
            let value = match fields.get(field) {
                Some(value) if !value.is_null() => value,
                _ => continue,
            };

            let target = rel.parse_target(field)?;
            let found = self
                .index
                .contains(self.keys, target.table, target.field, value)
                .await?;

            if !found {
                debug!(table = %table.id, field = %field, value = %value, "foreign key violation");
                return Err(ValidationError::ForeignKeyViolation {
                    table: table.id.clone(),
                    field: field.clone(),
                    references: rel.references.clone(),
                    value: value.to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
