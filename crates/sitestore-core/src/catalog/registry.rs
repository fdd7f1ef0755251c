//! Schema registry: CRUD for table schema documents.

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, warn};

use super::table::{NewTable, TableDef, TableExtension};
use crate::blob::{get_many, BlobStore, BlobVersion};
use crate::error::{ConflictError, Error, ResourceKind, Result, ValidationError};
use crate::keyspace::{slugify, validate_segment, KeySpace};
use crate::session::Session;

/// Table schema operations scoped to one session.
pub struct SchemaRegistry<'a> {
    blobs: &'a dyn BlobStore,
    session: &'a Session,
}

impl<'a> SchemaRegistry<'a> {
    /// Create a registry over `blobs` for `session`.
    pub fn new(blobs: &'a dyn BlobStore, session: &'a Session) -> Self {
        Self { blobs, session }
    }

    /// Create a table. Its id is the slug of `new.name`.
    pub async fn create_table(&self, new: NewTable) -> Result<TableDef> {
        let name = new.name.trim().to_string();
        let id = slugify(&name);
        if id.is_empty() {
            return Err(ValidationError::InvalidName {
                name,
                reason: "table name must contain at least one letter or digit",
            }
            .into());
        }
        validate_segment(&id)?;

        for (field, rel) in &new.relationships {
            rel.parse_target(field)?;
        }
        if let Some(folder_id) = &new.folder_id {
            self.ensure_folder(folder_id).await?;
        }

        let key = self.keys().schema_key(&id)?;
        if self.blobs.exists(&key).await? {
            return Err(already_exists(&id));
        }

        let table = TableDef {
            id,
            name,
            folder_id: new.folder_id,
            schema: new.schema,
            relationships: new.relationships,
            created_by: self.session.user().to_string(),
            created_at: Utc::now(),
            updated_by: None,
            updated_at: None,
        };

        let written = self
            .blobs
            .put_if_absent(&key, Bytes::from(table.to_bytes()?))
            .await?;
        if written.is_none() {
            return Err(already_exists(&table.id));
        }

        debug!(tenant = %self.session.tenant(), table = %table.id, "created table");
        Ok(table)
    }

    /// Get a table, failing with `NotFound` if absent.
    pub async fn get_table(&self, table_id: &str) -> Result<TableDef> {
        self.find_table(table_id)
            .await?
            .ok_or_else(|| Error::not_found(ResourceKind::Table, table_id))
    }

    /// Get a table if it exists.
    pub async fn find_table(&self, table_id: &str) -> Result<Option<TableDef>> {
        let key = self.keys().schema_key(table_id)?;
        match self.blobs.get(&key).await? {
            Some(bytes) => Ok(Some(TableDef::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List tables sorted by name, optionally only those filed under
    /// `folder_id`.
    pub async fn list_tables(&self, folder_id: Option<&str>) -> Result<Vec<TableDef>> {
        let mut tables = scan_tables(self.blobs, self.keys()).await?;
        if let Some(folder_id) = folder_id {
            tables.retain(|t| t.folder_id.as_deref() == Some(folder_id));
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(tables)
    }

    /// Add properties, required fields and relationships to a table.
    pub async fn extend_table(
        &self,
        table_id: &str,
        extension: &TableExtension,
    ) -> Result<TableDef> {
        let (mut table, version) = self.load_versioned(table_id).await?;
        table.apply_extension(extension)?;
        self.stamp(&mut table);
        self.replace(table, &version).await
    }

    /// File a table under `folder_id`, or unfile it with `None`.
    pub async fn move_table(&self, table_id: &str, folder_id: Option<&str>) -> Result<TableDef> {
        if let Some(folder_id) = folder_id {
            self.ensure_folder(folder_id).await?;
        }

        let (mut table, version) = self.load_versioned(table_id).await?;
        table.folder_id = folder_id.map(str::to_string);
        self.stamp(&mut table);
        self.replace(table, &version).await
    }

    /// Delete a table with all of its rows.
    ///
    /// Refused while another table declares a relationship to it. Returns
    /// the number of rows removed.
    pub async fn delete_table(&self, table_id: &str) -> Result<usize> {
        let table = self.get_table(table_id).await?;

        let mut referencing: Vec<String> = scan_tables(self.blobs, self.keys())
            .await?
            .into_iter()
            .filter(|other| other.id != table.id && other.references_table(&table.id))
            .map(|other| other.id)
            .collect();
        if !referencing.is_empty() {
            referencing.sort();
            return Err(ConflictError::TableReferenced {
                table: table.id,
                referencing_tables: referencing,
            }
            .into());
        }

        let rows = self.blobs.list(&self.keys().rows_prefix(&table.id)?).await?;
        for row in &rows {
            self.blobs.delete(&row.key).await?;
        }
        self.blobs.delete(&self.keys().schema_key(&table.id)?).await?;

        debug!(
            tenant = %self.session.tenant(),
            table = %table.id,
            rows = rows.len(),
            "deleted table"
        );
        Ok(rows.len())
    }

    fn keys(&self) -> &KeySpace {
        self.session.keys()
    }

    fn stamp(&self, table: &mut TableDef) {
        table.updated_by = Some(self.session.user().to_string());
        table.updated_at = Some(Utc::now());
    }

    async fn ensure_folder(&self, folder_id: &str) -> Result<()> {
        if self.blobs.exists(&self.keys().folder_key(folder_id)?).await? {
            Ok(())
        } else {
            Err(Error::not_found(ResourceKind::Folder, folder_id))
        }
    }

    async fn load_versioned(&self, table_id: &str) -> Result<(TableDef, BlobVersion)> {
        let key = self.keys().schema_key(table_id)?;
        let blob = self
            .blobs
            .get_versioned(&key)
            .await?
            .ok_or_else(|| Error::not_found(ResourceKind::Table, table_id))?;
        Ok((TableDef::from_bytes(&blob.data)?, blob.version))
    }

    async fn replace(&self, table: TableDef, expected: &BlobVersion) -> Result<TableDef> {
        let key = self.keys().schema_key(&table.id)?;
        let written = self
            .blobs
            .put_if_match(&key, Bytes::from(table.to_bytes()?), expected)
            .await?;
        if written.is_none() {
            return Err(ConflictError::ConcurrentModification {
                kind: ResourceKind::Table,
                id: table.id,
            }
            .into());
        }

        debug!(tenant = %self.session.tenant(), table = %table.id, "updated table");
        Ok(table)
    }
}

fn already_exists(id: &str) -> Error {
    ConflictError::AlreadyExists {
        kind: ResourceKind::Table,
        id: id.to_string(),
    }
    .into()
}

/// Read every table schema of a tenant.
///
/// Documents that fail to parse are skipped with a warning.
pub async fn scan_tables(blobs: &dyn BlobStore, keys: &KeySpace) -> Result<Vec<TableDef>> {
    let schema_keys: Vec<String> = blobs
        .list(&keys.tables_prefix())
        .await?
        .into_iter()
        .filter(|meta| keys.table_id_of(&meta.key).is_some())
        .map(|meta| meta.key)
        .collect();

    let mut tables = Vec::with_capacity(schema_keys.len());
    for (key, data) in get_many(blobs, schema_keys).await? {
        match TableDef::from_bytes(&data) {
            Ok(table) => tables.push(table),
            Err(e) => warn!(key = %key, error = %e, "skipping unreadable table schema"),
        }
    }

    Ok(tables)
}
