//! Database facade.
//!
//! [`Database`] owns the blob store, the reference index and the
//! configuration, and exposes every operation taking the caller's
//! [`Session`]. Components are built per call and borrow from it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::blob::{BlobStore, ObjectBlobStore, RetryingBlobStore};
use crate::catalog::{NewTable, SchemaRegistry, TableDef, TableExtension};
use crate::config::{BackendConfig, StoreConfig};
use crate::error::Result;
use crate::folders::{Folder, FolderStore, FolderTree};
use crate::integrity::{CascadeResult, DeletePlan, ReferenceIndex, ScanIndex};
use crate::rows::{Row, RowStore};
use crate::session::Session;
use crate::value::Fields;

/// Multi-tenant document store with relational integrity.
pub struct Database {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn ReferenceIndex>,
    config: StoreConfig,
}

impl Database {
    /// Create a database over `blobs`, scanning for references.
    pub fn new(blobs: Arc<dyn BlobStore>, config: StoreConfig) -> Self {
        let index = Arc::new(ScanIndex::new(blobs.clone()));
        Self {
            blobs,
            index,
            config,
        }
    }

    /// Open the configured backend with read retries.
    pub fn open(backend: &BackendConfig, config: StoreConfig) -> Result<Self> {
        let store = ObjectBlobStore::open(backend, config.request_timeout)?;
        let blobs = Arc::new(RetryingBlobStore::new(store, config.retry));
        info!(
            backend = ?backend.backend,
            namespace = ?backend.namespace,
            "opened document store"
        );
        Ok(Self::new(blobs, config))
    }

    /// In-memory database with default configuration.
    pub fn in_memory() -> Self {
        let config = StoreConfig::default();
        let store = ObjectBlobStore::in_memory(config.request_timeout);
        Self::new(Arc::new(store), config)
    }

    /// Replace the reference index.
    pub fn with_index(mut self, index: Arc<dyn ReferenceIndex>) -> Self {
        self.index = index;
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get the underlying blob store.
    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    // Folders

    pub async fn create_folder(
        &self,
        session: &Session,
        name: &str,
        description: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Folder> {
        self.folders(session)
            .create_folder(name, description, parent_id)
            .await
    }

    pub async fn rename_folder(
        &self,
        session: &Session,
        folder_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Folder> {
        self.folders(session)
            .rename_folder(folder_id, name, description)
            .await
    }

    pub async fn get_folder(&self, session: &Session, folder_id: &str) -> Result<Folder> {
        self.folders(session).get_folder(folder_id).await
    }

    pub async fn list_folders(&self, session: &Session) -> Result<Vec<Folder>> {
        self.folders(session).list_folders().await
    }

    pub async fn folder_tree(&self, session: &Session) -> Result<FolderTree> {
        self.folders(session).folder_tree().await
    }

    pub async fn delete_folder(&self, session: &Session, folder_id: &str) -> Result<()> {
        self.folders(session).delete_folder(folder_id).await
    }

    // Tables

    pub async fn create_table(&self, session: &Session, new: NewTable) -> Result<TableDef> {
        let table = self.registry(session).create_table(new).await?;
        self.index.table_written(session.keys(), &table).await?;
        Ok(table)
    }

    pub async fn get_table(&self, session: &Session, table_id: &str) -> Result<TableDef> {
        self.registry(session).get_table(table_id).await
    }

    pub async fn list_tables(
        &self,
        session: &Session,
        folder_id: Option<&str>,
    ) -> Result<Vec<TableDef>> {
        self.registry(session).list_tables(folder_id).await
    }

    pub async fn extend_table(
        &self,
        session: &Session,
        table_id: &str,
        extension: &TableExtension,
    ) -> Result<TableDef> {
        let table = self
            .registry(session)
            .extend_table(table_id, extension)
            .await?;
        self.index.table_written(session.keys(), &table).await?;
        Ok(table)
    }

    pub async fn move_table(
        &self,
        session: &Session,
        table_id: &str,
        folder_id: Option<&str>,
    ) -> Result<TableDef> {
        let table = self.registry(session).move_table(table_id, folder_id).await?;
        self.index.table_written(session.keys(), &table).await?;
        Ok(table)
    }

    /// Delete a table and its rows; returns the number of rows removed.
    pub async fn delete_table(&self, session: &Session, table_id: &str) -> Result<usize> {
        let removed = self.registry(session).delete_table(table_id).await?;
        self.index.table_deleted(session.keys(), table_id).await?;
        Ok(removed)
    }

    // Rows

    pub async fn insert_row(&self, session: &Session, table_id: &str, data: Fields) -> Result<Row> {
        self.rows(session).insert_row(table_id, data).await
    }

    pub async fn update_row(
        &self,
        session: &Session,
        table_id: &str,
        row_id: &str,
        patch: Fields,
    ) -> Result<Row> {
        self.rows(session).update_row(table_id, row_id, patch).await
    }

    pub async fn get_row(&self, session: &Session, table_id: &str, row_id: &str) -> Result<Row> {
        self.rows(session).get_row(table_id, row_id).await
    }

    pub async fn list_rows(&self, session: &Session, table_id: &str) -> Result<Vec<Row>> {
        self.rows(session).list_rows(table_id).await
    }

    pub async fn delete_row(
        &self,
        session: &Session,
        table_id: &str,
        row_id: &str,
    ) -> Result<CascadeResult> {
        debug!(tenant = %session.tenant(), table = table_id, row = row_id, "delete requested");
        self.rows(session).delete_row(table_id, row_id).await
    }

    /// Dry run of [`delete_row`](Self::delete_row).
    pub async fn can_delete(
        &self,
        session: &Session,
        table_id: &str,
        row_id: &str,
    ) -> Result<DeletePlan> {
        self.rows(session).can_delete(table_id, row_id).await
    }

    fn folders<'a>(&'a self, session: &'a Session) -> FolderStore<'a> {
        FolderStore::new(self.blobs.as_ref(), session)
    }

    fn registry<'a>(&'a self, session: &'a Session) -> SchemaRegistry<'a> {
        SchemaRegistry::new(self.blobs.as_ref(), session)
    }

    fn rows<'a>(&'a self, session: &'a Session) -> RowStore<'a> {
        RowStore::new(
            self.blobs.as_ref(),
            self.index.as_ref(),
            &self.config,
            session,
        )
    }
}
