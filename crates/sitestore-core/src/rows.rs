//! Row store: CRUD for row documents.
//!
//! Rows are schema-less field maps stored one per key. Every insert and
//! update runs required-field and foreign-key checks against the owning
//! table before anything is written.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blob::{get_many, BlobStore};
use crate::catalog::{SchemaRegistry, TableDef, ID_FIELD};
use crate::config::StoreConfig;
use crate::error::{ConflictError, Error, ResourceKind, Result, ValidationError};
use crate::integrity::{
    check_required, CascadeExecutor, CascadeResult, DeletePlan, ForeignKeyValidator,
    ReferenceIndex,
};
use crate::keyspace::{generate_id, validate_segment, KeySpace};
use crate::session::Session;
use crate::value::{Fields, Value};

/// Field under which provenance is stored.
pub const META_FIELD: &str = "_meta";

/// Provenance stamped on every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RowMeta {
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Why a field was nulled by a parent delete, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade_reason: Option<String>,
}

/// A stored row document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Unique within the table.
    pub id: String,
    /// User fields.
    #[serde(flatten)]
    pub fields: Fields,
    /// Provenance.
    #[serde(rename = "_meta", default)]
    pub meta: RowMeta,
}

impl Row {
    /// Value of `field`. `id` resolves to the row id.
    pub fn get(&self, field: &str) -> Option<Value> {
        if field == ID_FIELD {
            return Some(Value::String(self.id.clone()));
        }
        self.fields.get(field).cloned()
    }

    /// Whether `field` holds a value key-equal to `value`.
    pub fn matches(&self, field: &str, value: &Value) -> bool {
        if field == ID_FIELD {
            return value.as_str() == Some(self.id.as_str());
        }
        self.fields.get(field).is_some_and(|v| v.key_eq(value))
    }

    /// Serialize to the stored JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the stored JSON form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Row operations scoped to one session.
pub struct RowStore<'a> {
    blobs: &'a dyn BlobStore,
    index: &'a dyn ReferenceIndex,
    config: &'a StoreConfig,
    session: &'a Session,
}

impl<'a> RowStore<'a> {
    /// Create a row store.
    pub fn new(
        blobs: &'a dyn BlobStore,
        index: &'a dyn ReferenceIndex,
        config: &'a StoreConfig,
        session: &'a Session,
    ) -> Self {
        Self {
            blobs,
            index,
            config,
            session,
        }
    }

    /// Insert a row.
    ///
    /// A string `id` in `data` is used as the row id and must not exist yet;
    /// otherwise a random id is assigned.
    pub async fn insert_row(&self, table_id: &str, mut data: Fields) -> Result<Row> {
        let table = self.registry().get_table(table_id).await?;
        let supplied_id = take_supplied_id(&mut data)?;
        data.remove(META_FIELD);

        self.validate(&table, &data).await?;

        let id = match supplied_id {
            Some(id) => {
                validate_segment(&id)?;
                if self.blobs.exists(&self.keys().row_key(&table.id, &id)?).await? {
                    return Err(row_exists(&id));
                }
                id
            }
            None => generate_id(),
        };

        let row = Row {
            id,
            fields: data,
            meta: RowMeta {
                created_by: self.session.user().to_string(),
                created_at: Utc::now(),
                ..RowMeta::default()
            },
        };

        let key = self.keys().row_key(&table.id, &row.id)?;
        if self
            .blobs
            .put_if_absent(&key, Bytes::from(row.to_bytes()?))
            .await?
            .is_none()
        {
            return Err(row_exists(&row.id));
        }
        self.index.row_written(self.keys(), &table.id, &row).await?;

        debug!(tenant = %self.session.tenant(), table = %table.id, row = %row.id, "inserted row");
        Ok(row)
    }

    /// Merge `patch` into a row, creating it if absent.
    ///
    /// The merged document is re-validated. `id` and `_meta` in the patch
    /// are ignored. The write fails with a conflict if the row changed since
    /// it was read.
    pub async fn update_row(&self, table_id: &str, row_id: &str, mut patch: Fields) -> Result<Row> {
        let table = self.registry().get_table(table_id).await?;
        let key = self.keys().row_key(&table.id, row_id)?;
        patch.remove(ID_FIELD);
        patch.remove(META_FIELD);

        let existing = self.blobs.get_versioned(&key).await?;
        let (row, version) = match existing {
            Some(blob) => {
                let mut row = Row::from_bytes(&blob.data)?;
                row.fields.extend(patch);
                row.meta.updated_by = Some(self.session.user().to_string());
                row.meta.updated_at = Some(Utc::now());
                (row, Some(blob.version))
            }
            None => {
                let row = Row {
                    id: row_id.to_string(),
                    fields: patch,
                    meta: RowMeta {
                        created_by: self.session.user().to_string(),
                        created_at: Utc::now(),
                        ..RowMeta::default()
                    },
                };
                (row, None)
            }
        };

        self.validate(&table, &row.fields).await?;

        let data = Bytes::from(row.to_bytes()?);
        let written = match &version {
            Some(expected) => self.blobs.put_if_match(&key, data, expected).await?,
            None => self.blobs.put_if_absent(&key, data).await?,
        };
        if written.is_none() {
            return Err(ConflictError::ConcurrentModification {
                kind: ResourceKind::Row,
                id: row.id,
            }
            .into());
        }
        self.index.row_written(self.keys(), &table.id, &row).await?;

        debug!(
            tenant = %self.session.tenant(),
            table = %table.id,
            row = %row.id,
            created = version.is_none(),
            "updated row"
        );
        Ok(row)
    }

    /// Get a row, failing with `NotFound` if absent.
    pub async fn get_row(&self, table_id: &str, row_id: &str) -> Result<Row> {
        let key = self.keys().row_key(table_id, row_id)?;
        match self.blobs.get(&key).await? {
            Some(bytes) => Row::from_bytes(&bytes),
            None => Err(Error::not_found(ResourceKind::Row, row_id)),
        }
    }

    /// List every readable row of a table, ordered by id.
    pub async fn list_rows(&self, table_id: &str) -> Result<Vec<Row>> {
        let table = self.registry().get_table(table_id).await?;
        scan_rows(self.blobs, self.keys(), &table.id).await
    }

    /// Delete a row, applying the delete policies of every dependent table.
    pub async fn delete_row(&self, table_id: &str, row_id: &str) -> Result<CascadeResult> {
        self.cascade().execute(table_id, row_id).await
    }

    /// Compute what deleting a row would do, without changing anything.
    pub async fn can_delete(&self, table_id: &str, row_id: &str) -> Result<DeletePlan> {
        self.cascade().plan(table_id, row_id).await
    }

    fn keys(&self) -> &KeySpace {
        self.session.keys()
    }

    fn registry(&self) -> SchemaRegistry<'a> {
        SchemaRegistry::new(self.blobs, self.session)
    }

    fn cascade(&self) -> CascadeExecutor<'a> {
        CascadeExecutor::new(self.blobs, self.index, self.config, self.session)
    }

    async fn validate(&self, table: &TableDef, fields: &Fields) -> Result<()> {
        check_required(table, fields)?;
        ForeignKeyValidator::new(self.index, self.keys())
            .validate(table, fields)
            .await
    }
}

fn take_supplied_id(data: &mut Fields) -> Result<Option<String>> {
    match data.remove(ID_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(id)) => Ok(Some(id)),
        Some(other) => Err(ValidationError::InvalidDocument(format!(
            "row id must be a string, got {other}"
        ))
        .into()),
    }
}

fn row_exists(id: &str) -> Error {
    ConflictError::AlreadyExists {
        kind: ResourceKind::Row,
        id: id.to_string(),
    }
    .into()
}

/// Read every row of `table_id`, ordered by id.
///
/// Documents that fail to parse are skipped with a warning.
pub async fn scan_rows(blobs: &dyn BlobStore, keys: &KeySpace, table_id: &str) -> Result<Vec<Row>> {
    let row_keys: Vec<String> = blobs
        .list(&keys.rows_prefix(table_id)?)
        .await?
        .into_iter()
        .filter(|meta| keys.row_id_of(table_id, &meta.key).is_some())
        .map(|meta| meta.key)
        .collect();

    let mut rows = Vec::with_capacity(row_keys.len());
    for (key, data) in get_many(blobs, row_keys).await? {
        match Row::from_bytes(&data) {
            Ok(row) => rows.push(row),
            Err(e) => warn!(key = %key, error = %e, "skipping unreadable row"),
        }
    }

    Ok(rows)
}
