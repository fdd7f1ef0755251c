//! Sitestore Core - tenant-scoped document store with relational integrity.
//!
//! Tables, rows and folders are JSON documents on a flat blob store. Foreign
//! keys and restrict / cascade / set-null delete policies are enforced by
//! scanning the store, since the store itself offers no indexes, joins or
//! transactions.

pub mod blob;
pub mod catalog;
pub mod config;
pub mod database;
pub mod error;
pub mod folders;
pub mod integrity;
pub mod keyspace;
pub mod rows;
pub mod session;
pub mod value;

pub use blob::{BlobMeta, BlobStore, BlobVersion, ObjectBlobStore, RetryingBlobStore};
pub use catalog::{
    DeleteBehavior, NewTable, RelationshipDef, SchemaRegistry, TableDef, TableExtension,
    TableSchema,
};
pub use config::{Backend, BackendConfig, CascadeMode, RetryPolicy, StoreConfig};
pub use database::Database;
pub use error::{ConflictError, Error, ResourceKind, Result, ValidationError};
pub use folders::{Folder, FolderNode, FolderStore, FolderTree};
pub use integrity::{CascadeResult, DeletePlan, ReferenceIndex, RowRef, ScanIndex};
pub use keyspace::{slugify, KeySpace, TenantId};
pub use rows::{Row, RowMeta, RowStore};
pub use session::Session;
pub use value::{parse_fields, Fields, Value};
