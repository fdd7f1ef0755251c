//! Core error types.

use std::fmt;

use thiserror::Error;

/// Kind of resource addressed by an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// A folder grouping tables.
    Folder,
    /// A table schema document.
    Table,
    /// A row document.
    Row,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Folder => write!(f, "folder"),
            ResourceKind::Table => write!(f, "table"),
            ResourceKind::Row => write!(f, "row"),
        }
    }
}

/// Core store errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Folder, table or row does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What was looked up.
        kind: ResourceKind,
        /// Identifier that was looked up.
        id: String,
    },

    /// Input rejected before anything was written.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Operation collided with existing state.
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Recursive cascade went deeper than the configured limit.
    #[error("cascade exceeded maximum depth of {depth}")]
    CascadeDepthExceeded {
        /// Depth reached.
        depth: usize,
    },

    /// Blob store call failed in a way that may succeed on retry.
    #[error("transient store error during {operation} on '{key}': {message}")]
    TransientStore {
        /// Blob operation (`get`, `list`, `put`, ...).
        operation: &'static str,
        /// Key or prefix involved.
        key: String,
        /// Underlying failure.
        message: String,
    },

    /// Blob store call failed permanently (permissions, configuration).
    #[error("store error: {0}")]
    Store(String),

    /// Document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Reasons a write was rejected before touching storage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A related field holds a value no target row has.
    #[error(
        "field '{field}' of table '{table}' references {references}, but no row matches {value}"
    )]
    ForeignKeyViolation {
        /// Table being written.
        table: String,
        /// Offending field.
        field: String,
        /// Reference string (`table.field`).
        references: String,
        /// The unresolved value, rendered as JSON.
        value: String,
    },

    /// A field listed in the schema's `required` set is absent or null.
    #[error("required field '{field}' is missing for table '{table}'")]
    MissingRequiredField {
        /// Table being written.
        table: String,
        /// Missing field.
        field: String,
    },

    /// Relationship reference is not of the form `table.field`.
    #[error("invalid reference '{references}' on field '{field}': expected 'table.field'")]
    InvalidReference {
        /// Field carrying the relationship.
        field: String,
        /// The malformed reference string.
        references: String,
    },

    /// Human-supplied name cannot be used.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Identifier cannot be used as a storage key segment.
    #[error("invalid key segment '{segment}': {reason}")]
    InvalidKeySegment {
        /// Rejected segment.
        segment: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Input document is not a JSON object of fields.
    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// Reasons a write collided with existing state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConflictError {
    /// A `restrict` relationship still has dependent rows.
    #[error(
        "cannot delete {table}/{row_id}: {count} row(s) in {referencing_table}.{field} still reference it"
    )]
    RestrictViolation {
        /// Table of the row being deleted.
        table: String,
        /// Row being deleted.
        row_id: String,
        /// Table holding the blocking rows.
        referencing_table: String,
        /// Field on the blocking rows.
        field: String,
        /// Number of blocking rows.
        count: usize,
    },

    /// Create collided with an existing id.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// What was being created.
        kind: ResourceKind,
        /// Colliding id.
        id: String,
    },

    /// Document changed between read and conditional write.
    #[error("{kind} '{id}' was modified concurrently")]
    ConcurrentModification {
        /// What was being written.
        kind: ResourceKind,
        /// Document id.
        id: String,
    },

    /// Folder still contains tables or sub-folders.
    #[error("folder '{folder_id}' is not empty: {tables} table(s), {folders} sub-folder(s)")]
    FolderNotEmpty {
        /// Folder being deleted.
        folder_id: String,
        /// Tables filed under it.
        tables: usize,
        /// Direct sub-folders.
        folders: usize,
    },

    /// Other tables still declare relationships to this table.
    #[error("table '{table}' is referenced by {referencing_tables:?}")]
    TableReferenced {
        /// Table being deleted.
        table: String,
        /// Tables whose relationships target it.
        referencing_tables: Vec<String>,
    },

    /// Additive schema edit tried to change an existing definition.
    #[error("table '{table}' already defines {what} '{name}'")]
    Redefinition {
        /// Table being extended.
        table: String,
        /// `property` or `relationship`.
        what: &'static str,
        /// Name already defined.
        name: String,
    },
}

impl Error {
    pub(crate) fn not_found(kind: ResourceKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub(crate) fn transient(
        operation: &'static str,
        key: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        Error::TransientStore {
            operation,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether this is a [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Only idempotent reads should be retried blindly; writes must be
    /// re-validated first because the integrity snapshot may be stale.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientStore { .. })
    }

    /// HTTP-style status code for callers that build audit records.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) | Error::CascadeDepthExceeded { .. } => 409,
            Error::TransientStore { .. } => 503,
            Error::Store(_) | Error::Serialization(_) => 500,
        }
    }
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
