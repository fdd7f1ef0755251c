//! Tenant-scoped key namespace.
//!
//! Every document lives under exactly one tenant:
//!
//! ```text
//! tenant/{hubId}/folders/{folderId}/meta
//! tenant/{hubId}/tables/{tableId}/schema
//! tenant/{hubId}/tables/{tableId}/rows/{rowId}
//! ```
//!
//! Prefixes end with `/` so a plain string prefix match never crosses into a
//! sibling whose id merely starts with the same characters.

use std::fmt;

use rand::RngCore;

use crate::error::{Result, ValidationError};

const ROOT: &str = "tenant";
const FOLDERS: &str = "folders";
const TABLES: &str = "tables";
const ROWS: &str = "rows";
const FOLDER_DOC: &str = "meta";
const SCHEMA_DOC: &str = "schema";

const MAX_SEGMENT_LEN: usize = 255;

/// Validate a single key segment (tenant, folder, table or row id).
pub fn validate_segment(segment: &str) -> Result<()> {
    let reject = |reason: &'static str| -> Result<()> {
        Err(ValidationError::InvalidKeySegment {
            segment: segment.to_string(),
            reason,
        }
        .into())
    };

    if segment.is_empty() {
        return reject("segment cannot be empty");
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return reject("segment cannot exceed 255 bytes");
    }
    if segment == "." || segment == ".." {
        return reject("segment cannot be a relative path component");
    }
    if !segment
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return reject("segment may only contain ASCII letters, digits, '-', '_' and '.'");
    }

    Ok(())
}

/// Derive a table id from a display name.
///
/// Lower-cases, collapses every run of non-alphanumeric characters into a
/// single `-` and trims leading and trailing dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// Generate a random document id (128 bits, hex encoded).
pub fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Validated tenant identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantId(String);

impl TenantId {
    /// Validate and wrap a tenant id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_segment(&id)?;
        Ok(Self(id))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key builder for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    root: String,
}

impl KeySpace {
    /// Key space rooted at `tenant/{hubId}/`.
    pub fn new(tenant: &TenantId) -> Self {
        Self {
            root: format!("{ROOT}/{}/", tenant.as_str()),
        }
    }

    /// Prefix of every key owned by the tenant.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Prefix under which all folder documents live.
    pub fn folders_prefix(&self) -> String {
        format!("{}{FOLDERS}/", self.root)
    }

    /// Key of a folder document.
    pub fn folder_key(&self, folder_id: &str) -> Result<String> {
        validate_segment(folder_id)?;
        Ok(format!("{}{folder_id}/{FOLDER_DOC}", self.folders_prefix()))
    }

    /// Prefix under which every table (schemas and rows) lives.
    pub fn tables_prefix(&self) -> String {
        format!("{}{TABLES}/", self.root)
    }

    /// Key of a table schema document.
    pub fn schema_key(&self, table_id: &str) -> Result<String> {
        validate_segment(table_id)?;
        Ok(format!("{}{table_id}/{SCHEMA_DOC}", self.tables_prefix()))
    }

    /// Prefix under which a table's rows live.
    pub fn rows_prefix(&self, table_id: &str) -> Result<String> {
        validate_segment(table_id)?;
        Ok(format!("{}{table_id}/{ROWS}/", self.tables_prefix()))
    }

    /// Key of a row document.
    pub fn row_key(&self, table_id: &str, row_id: &str) -> Result<String> {
        validate_segment(row_id)?;
        Ok(format!("{}{row_id}", self.rows_prefix(table_id)?))
    }

    /// Extract the folder id from a folder document key.
    pub fn folder_id_of<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(self.folders_prefix().as_str())?;
        let id = rest.strip_suffix(&format!("/{FOLDER_DOC}"))?;
        (!id.contains('/')).then_some(id)
    }

    /// Extract the table id from a schema document key.
    ///
    /// Row keys under the same prefix yield `None`.
    pub fn table_id_of<'k>(&self, key: &'k str) -> Option<&'k str> {
        let rest = key.strip_prefix(self.tables_prefix().as_str())?;
        let id = rest.strip_suffix(&format!("/{SCHEMA_DOC}"))?;
        (!id.contains('/')).then_some(id)
    }

    /// Extract the row id from a row key of `table_id`.
    pub fn row_id_of<'k>(&self, table_id: &str, key: &'k str) -> Option<&'k str> {
        let prefix = self.rows_prefix(table_id).ok()?;
        let id = key.strip_prefix(prefix.as_str())?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }
}
