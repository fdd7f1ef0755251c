//! Table definitions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::relation::{DeleteBehavior, DependentRelation, RelationshipDef};
use crate::error::{ConflictError, Error, Result, ValidationError};
use crate::value::Value;

/// Declared fields of a table.
///
/// Property types are descriptive only; the store does not type-check row
/// values against them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Field name to type description. Must be present in input documents,
    /// though it may be empty.
    pub properties: BTreeMap<String, Value>,
    /// Fields that must be present and non-null on every row.
    #[serde(default)]
    pub required: Vec<String>,
}

impl TableSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a property.
    pub fn with_property(mut self, name: impl Into<String>, ty: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), ty.into());
        self
    }

    /// Mark a field as required.
    pub fn with_required(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.required.contains(&field) {
            self.required.push(field);
        }
        self
    }
}

/// A stored table schema document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDef {
    /// Slug derived from the name; unique per tenant.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Folder the table is filed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Declared fields.
    #[serde(default)]
    pub schema: TableSchema,
    /// Source field name to relationship.
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDef>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl TableDef {
    /// Serialize to the stored JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the stored JSON form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Relationships of this table that target the `id` of `table`.
    pub fn relations_to(&self, table: &str) -> Vec<DependentRelation> {
        self.relationships
            .iter()
            .filter(|(_, rel)| rel.targets_row_id_of(table))
            .map(|(field, rel)| DependentRelation {
                table: self.id.clone(),
                field: field.clone(),
                on_delete: rel.on_delete,
            })
            .collect()
    }

    /// Whether any relationship of this table names `table` as its target,
    /// on any field.
    pub fn references_table(&self, table: &str) -> bool {
        self.relationships
            .values()
            .any(|rel| rel.target().is_some_and(|t| t.table == table))
    }

    /// Apply an additive extension in place.
    ///
    /// Re-declaring an identical property or relationship is a no-op;
    /// changing an existing one is a conflict.
    pub fn apply_extension(&mut self, extension: &TableExtension) -> Result<()> {
        for (field, rel) in &extension.relationships {
            rel.parse_target(field)?;
        }

        for (name, ty) in &extension.properties {
            if let Some(existing) = self.schema.properties.get(name) {
                if existing != ty {
                    return Err(self.redefinition("property", name));
                }
            }
        }
        for (field, rel) in &extension.relationships {
            if let Some(existing) = self.relationships.get(field) {
                if existing != rel {
                    return Err(self.redefinition("relationship", field));
                }
            }
        }

        for (name, ty) in &extension.properties {
            self.schema.properties.insert(name.clone(), ty.clone());
        }
        for field in &extension.required {
            if !self.schema.required.contains(field) {
                self.schema.required.push(field.clone());
            }
        }
        for (field, rel) in &extension.relationships {
            self.relationships.insert(field.clone(), rel.clone());
        }

        Ok(())
    }

    fn redefinition(&self, what: &'static str, name: &str) -> Error {
        ConflictError::Redefinition {
            table: self.id.clone(),
            what,
            name: name.to_string(),
        }
        .into()
    }
}

/// Input for creating a table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTable {
    /// Display name; the id is derived from it.
    pub name: String,
    /// Folder to file the table under.
    #[serde(default)]
    pub folder_id: Option<String>,
    /// Declared fields; `schema.properties` is mandatory.
    pub schema: TableSchema,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDef>,
}

impl NewTable {
    /// Parse a JSON table definition.
    ///
    /// A definition without `schema.properties` is an invalid document.
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ValidationError::InvalidDocument(e.to_string()).into())
    }

    /// Start a table definition named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// File the table under `folder_id`.
    pub fn in_folder(mut self, folder_id: impl Into<String>) -> Self {
        self.folder_id = Some(folder_id.into());
        self
    }

    /// Declare a property.
    pub fn with_property(mut self, name: impl Into<String>, ty: impl Into<Value>) -> Self {
        self.schema = self.schema.with_property(name, ty);
        self
    }

    /// Mark a field as required.
    pub fn with_required(mut self, field: impl Into<String>) -> Self {
        self.schema = self.schema.with_required(field);
        self
    }

    /// Declare a relationship on `field`.
    pub fn with_relationship(mut self, field: impl Into<String>, rel: RelationshipDef) -> Self {
        self.relationships.insert(field.into(), rel);
        self
    }

    /// Shorthand for a relationship to `table.id` with `on_delete`.
    pub fn with_reference(
        self,
        field: impl Into<String>,
        table: &str,
        on_delete: DeleteBehavior,
    ) -> Self {
        self.with_relationship(field, RelationshipDef::to_table(table).with_on_delete(on_delete))
    }
}

/// Additive edit of an existing table.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableExtension {
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(default)]
    pub relationships: BTreeMap<String, RelationshipDef>,
}

impl TableExtension {
    /// Create an empty extension.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a property.
    pub fn with_property(mut self, name: impl Into<String>, ty: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), ty.into());
        self
    }

    /// Add a required field.
    pub fn with_required(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Add a relationship.
    pub fn with_relationship(mut self, field: impl Into<String>, rel: RelationshipDef) -> Self {
        self.relationships.insert(field.into(), rel);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableDef {
        TableDef {
            id: "orders".into(),
            name: "Orders".into(),
            folder_id: None,
            schema: TableSchema::new().with_property("total", "number"),
            relationships: BTreeMap::from([
                (
                    "customerId".to_string(),
                    RelationshipDef::to_table("customers").with_on_delete(DeleteBehavior::Cascade),
                ),
                (
                    "customerCode".to_string(),
                    RelationshipDef::new("customers.code"),
                ),
            ]),
            created_by: "alice".into(),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_document_round_trip_is_camel_case() {
        let table = orders();
        let bytes = table.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(json.get("createdBy").is_some());
        assert!(json.get("folderId").is_none());
        assert_eq!(json["relationships"]["customerId"]["onDelete"], "cascade");

        assert_eq!(TableDef::from_bytes(&bytes).unwrap(), table);
    }

    #[test]
    fn test_relations_to_only_matches_id_targets() {
        let deps = orders().relations_to("customers");
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].field, "customerId");
        assert_eq!(deps[0].on_delete, DeleteBehavior::Cascade);
        assert!(orders().references_table("customers"));
        assert!(!orders().references_table("orders"));
    }

    #[test]
    fn test_extension_is_additive() {
        let mut table = orders();
        table
            .apply_extension(
                &TableExtension::new()
                    .with_property("status", "string")
                    .with_property("total", "number")
                    .with_required("status"),
            )
            .unwrap();
        assert!(table.schema.properties.contains_key("status"));
        assert_eq!(table.schema.required, vec!["status".to_string()]);

        let err = table
            .apply_extension(&TableExtension::new().with_property("total", "string"))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Conflict(ConflictError::Redefinition { what: "property", .. })
        ));
    }

    #[test]
    fn test_extension_rejects_malformed_reference_without_changes() {
        let mut table = orders();
        let err = table
            .apply_extension(
                &TableExtension::new()
                    .with_property("x", "string")
                    .with_relationship("siteId", RelationshipDef::new("sites")),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(!table.schema.properties.contains_key("x"));
    }

    #[test]
    fn test_new_table_from_json() {
        let input: NewTable = serde_json::from_str(
            r#"{"name":"Orders","schema":{"properties":{"customerId":"string"}},
               "relationships":{"customerId":{"references":"customers.id"}}}"#,
        )
        .unwrap();
        assert_eq!(input.name, "Orders");
        assert_eq!(
            input.relationships["customerId"].on_delete,
            DeleteBehavior::Restrict
        );
    }

    #[test]
    fn test_new_table_requires_schema_properties() {
        for json in [
            serde_json::json!({"name": "NoSchema"}),
            serde_json::json!({"name": "NoProps", "schema": {}}),
            serde_json::json!({"name": "NoProps", "schema": {"required": ["a"]}}),
        ] {
            let err = NewTable::from_json(json).unwrap_err();
            assert!(matches!(
                err,
                Error::Validation(ValidationError::InvalidDocument(_))
            ));
        }

        let empty =
            NewTable::from_json(serde_json::json!({"name": "Empty", "schema": {"properties": {}}}))
                .unwrap();
        assert!(empty.schema.properties.is_empty());
    }
}
