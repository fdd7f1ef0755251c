//! Reference lookup seam.
//!
//! Integrity checks ask two questions: which relationships point at a table,
//! and which rows of a table hold a given value in a field. [`ScanIndex`]
//! answers both by scanning the blob store. A maintained index can implement
//! [`ReferenceIndex`] instead and keep itself current through the write
//! hooks.

use std::sync::Arc;

use async_trait::async_trait;

use crate::blob::BlobStore;
use crate::catalog::{scan_tables, DependentRelation, TableDef};
use crate::error::Result;
use crate::keyspace::KeySpace;
use crate::rows::{scan_rows, Row};
use crate::value::Value;

/// Answers reference queries for integrity checks.
#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    /// Relationships in the tenant whose reference is `{table}.id`.
    async fn dependents(&self, keys: &KeySpace, table: &str) -> Result<Vec<DependentRelation>>;

    /// Rows of `table` whose `field` is key-equal to `value`.
    ///
    /// A table that does not exist has no rows.
    async fn find_rows(
        &self,
        keys: &KeySpace,
        table: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Row>>;

    /// Whether any row of `table` has `field` key-equal to `value`.
    async fn contains(
        &self,
        keys: &KeySpace,
        table: &str,
        field: &str,
        value: &Value,
    ) -> Result<bool> {
        Ok(!self.find_rows(keys, table, field, value).await?.is_empty())
    }

    /// Called after a row was written.
    async fn row_written(&self, _keys: &KeySpace, _table: &str, _row: &Row) -> Result<()> {
        Ok(())
    }

    /// Called after a row was deleted.
    async fn row_deleted(&self, _keys: &KeySpace, _table: &str, _row_id: &str) -> Result<()> {
        Ok(())
    }

    /// Called after a table schema was created or changed.
    async fn table_written(&self, _keys: &KeySpace, _table: &TableDef) -> Result<()> {
        Ok(())
    }

    /// Called after a table and its rows were deleted.
    async fn table_deleted(&self, _keys: &KeySpace, _table: &str) -> Result<()> {
        Ok(())
    }
}

/// Full-scan [`ReferenceIndex`]; every query reads live documents.
pub struct ScanIndex {
    blobs: Arc<dyn BlobStore>,
}

impl ScanIndex {
    /// Scan `blobs` on every query.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }
}

#[async_trait]
impl ReferenceIndex for ScanIndex {
    async fn dependents(&self, keys: &KeySpace, table: &str) -> Result<Vec<DependentRelation>> {
        let tables = scan_tables(self.blobs.as_ref(), keys).await?;
        Ok(tables.iter().flat_map(|t| t.relations_to(table)).collect())
    }

    async fn find_rows(
        &self,
        keys: &KeySpace,
        table: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Row>> {
        // An id that cannot be a key segment cannot name a table.
        let Ok(schema_key) = keys.schema_key(table) else {
            return Ok(Vec::new());
        };
        if !self.blobs.exists(&schema_key).await? {
            return Ok(Vec::new());
        }

        let rows = scan_rows(self.blobs.as_ref(), keys, table).await?;
        Ok(rows.into_iter().filter(|row| row.matches(field, value)).collect())
    }
}
