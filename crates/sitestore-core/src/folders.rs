//! Folder hierarchy for grouping tables.
//!
//! Folders form a shallow tree through `parentId`. A folder whose parent is
//! missing is treated as a root. Deleting a folder never deletes tables, so a
//! folder can only be deleted once it is empty.

use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::blob::{get_many, BlobStore};
use crate::catalog::{scan_tables, TableDef};
use crate::error::{ConflictError, Error, ResourceKind, Result, ValidationError};
use crate::keyspace::{generate_id, KeySpace};
use crate::session::Session;

/// A stored folder document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

impl Folder {
    /// Serialize to the stored JSON form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize from the stored JSON form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// A folder with its tables and sub-folders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderNode {
    pub folder: Folder,
    /// Tables filed directly under this folder, sorted by name.
    pub tables: Vec<TableDef>,
    pub children: Vec<FolderNode>,
}

/// The whole hierarchy of a tenant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FolderTree {
    pub roots: Vec<FolderNode>,
    /// Tables without a folder, or filed under a folder that no longer
    /// exists.
    pub unfiled: Vec<TableDef>,
}

/// Folder operations scoped to one session.
pub struct FolderStore<'a> {
    blobs: &'a dyn BlobStore,
    session: &'a Session,
}

impl<'a> FolderStore<'a> {
    /// Create a folder store over `blobs` for `session`.
    pub fn new(blobs: &'a dyn BlobStore, session: &'a Session) -> Self {
        Self { blobs, session }
    }

    /// Create a folder, optionally under `parent_id`.
    pub async fn create_folder(
        &self,
        name: &str,
        description: Option<&str>,
        parent_id: Option<&str>,
    ) -> Result<Folder> {
        let name = folder_name(name)?;
        if let Some(parent_id) = parent_id {
            if !self.blobs.exists(&self.keys().folder_key(parent_id)?).await? {
                return Err(Error::not_found(ResourceKind::Folder, parent_id));
            }
        }

        let now = Utc::now();
        let user = self.session.user().to_string();
        let folder = Folder {
            id: generate_id(),
            name,
            description: description.unwrap_or_default().to_string(),
            parent_id: parent_id.map(str::to_string),
            created_by: user.clone(),
            created_at: now,
            updated_at: now,
            updated_by: user,
        };

        let key = self.keys().folder_key(&folder.id)?;
        if self
            .blobs
            .put_if_absent(&key, Bytes::from(folder.to_bytes()?))
            .await?
            .is_none()
        {
            return Err(ConflictError::AlreadyExists {
                kind: ResourceKind::Folder,
                id: folder.id,
            }
            .into());
        }

        debug!(tenant = %self.session.tenant(), folder = %folder.id, "created folder");
        Ok(folder)
    }

    /// Rename a folder. The description is replaced only when given.
    pub async fn rename_folder(
        &self,
        folder_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Folder> {
        let name = folder_name(name)?;
        let key = self.keys().folder_key(folder_id)?;
        let blob = self
            .blobs
            .get_versioned(&key)
            .await?
            .ok_or_else(|| Error::not_found(ResourceKind::Folder, folder_id))?;

        let mut folder = Folder::from_bytes(&blob.data)?;
        folder.name = name;
        if let Some(description) = description {
            folder.description = description.to_string();
        }
        folder.updated_by = self.session.user().to_string();
        folder.updated_at = Utc::now();

        if self
            .blobs
            .put_if_match(&key, Bytes::from(folder.to_bytes()?), &blob.version)
            .await?
            .is_none()
        {
            return Err(ConflictError::ConcurrentModification {
                kind: ResourceKind::Folder,
                id: folder.id,
            }
            .into());
        }

        debug!(tenant = %self.session.tenant(), folder = %folder.id, "renamed folder");
        Ok(folder)
    }

    /// Get a folder, failing with `NotFound` if absent.
    pub async fn get_folder(&self, folder_id: &str) -> Result<Folder> {
        let key = self.keys().folder_key(folder_id)?;
        match self.blobs.get(&key).await? {
            Some(bytes) => Folder::from_bytes(&bytes),
            None => Err(Error::not_found(ResourceKind::Folder, folder_id)),
        }
    }

    /// List folders depth-first: each root (sorted by name) followed by its
    /// descendants, siblings sorted by name.
    pub async fn list_folders(&self) -> Result<Vec<Folder>> {
        let folders = scan_folders(self.blobs, self.keys()).await?;
        let hierarchy = Hierarchy::new(&folders);

        let mut ordered = Vec::with_capacity(folders.len());
        let mut visited = HashSet::new();
        for root in hierarchy.roots() {
            hierarchy.walk(root, &mut visited, &mut ordered);
        }
        Ok(ordered.into_iter().cloned().collect())
    }

    /// The folder hierarchy with every table placed in its folder.
    pub async fn folder_tree(&self) -> Result<FolderTree> {
        let folders = scan_folders(self.blobs, self.keys()).await?;
        let mut tables = scan_tables(self.blobs, self.keys()).await?;
        tables.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let known: HashSet<&str> = folders.iter().map(|f| f.id.as_str()).collect();
        let mut filed: HashMap<String, Vec<TableDef>> = HashMap::new();
        let mut unfiled = Vec::new();
        for table in tables {
            match table.folder_id.clone() {
                Some(folder_id) if known.contains(folder_id.as_str()) => {
                    filed.entry(folder_id).or_default().push(table)
                }
                _ => unfiled.push(table),
            }
        }

        let hierarchy = Hierarchy::new(&folders);
        let mut visited = HashSet::new();
        let roots = hierarchy
            .roots()
            .into_iter()
            .filter_map(|root| hierarchy.node(root, &mut visited, &mut filed))
            .collect();

        Ok(FolderTree { roots, unfiled })
    }

    /// Delete an empty folder.
    pub async fn delete_folder(&self, folder_id: &str) -> Result<()> {
        let folder = self.get_folder(folder_id).await?;

        let tables = scan_tables(self.blobs, self.keys())
            .await?
            .into_iter()
            .filter(|t| t.folder_id.as_deref() == Some(folder.id.as_str()))
            .count();
        let folders = scan_folders(self.blobs, self.keys())
            .await?
            .into_iter()
            .filter(|f| f.parent_id.as_deref() == Some(folder.id.as_str()))
            .count();
        if tables > 0 || folders > 0 {
            return Err(ConflictError::FolderNotEmpty {
                folder_id: folder.id,
                tables,
                folders,
            }
            .into());
        }

        self.blobs.delete(&self.keys().folder_key(&folder.id)?).await?;
        debug!(tenant = %self.session.tenant(), folder = %folder.id, "deleted folder");
        Ok(())
    }

    fn keys(&self) -> &KeySpace {
        self.session.keys()
    }
}

fn folder_name(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidName {
            name: name.to_string(),
            reason: "folder name cannot be empty",
        }
        .into());
    }
    Ok(trimmed.to_string())
}

/// Parent/child view over a flat folder list.
struct Hierarchy<'f> {
    by_id: BTreeMap<&'f str, &'f Folder>,
    children: HashMap<&'f str, Vec<&'f Folder>>,
    sorted: Vec<&'f Folder>,
}

impl<'f> Hierarchy<'f> {
    fn new(folders: &'f [Folder]) -> Self {
        let mut sorted: Vec<&Folder> = folders.iter().collect();
        sorted.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let by_id: BTreeMap<&str, &Folder> = sorted.iter().map(|&f| (f.id.as_str(), f)).collect();
        let mut children: HashMap<&str, Vec<&Folder>> = HashMap::new();
        for &folder in &sorted {
            if let Some(parent) = folder.parent_id.as_deref() {
                if by_id.contains_key(parent) {
                    children.entry(parent).or_default().push(folder);
                }
            }
        }

        Self {
            by_id,
            children,
            sorted,
        }
    }

    /// Folders without an existing parent, then any folder only reachable
    /// through a parent cycle.
    fn roots(&self) -> Vec<&'f Folder> {
        let mut roots: Vec<&Folder> = self
            .sorted
            .iter()
            .copied()
            .filter(|f| {
                f.parent_id
                    .as_deref()
                    .map_or(true, |parent| !self.by_id.contains_key(parent))
            })
            .collect();

        let mut reachable = HashSet::new();
        let mut scratch = Vec::new();
        for &root in &roots {
            self.walk(root, &mut reachable, &mut scratch);
        }
        for &folder in &self.sorted {
            if !reachable.contains(folder.id.as_str()) {
                warn!(folder = %folder.id, "folder parent chain forms a cycle, listing as root");
                self.walk(folder, &mut reachable, &mut scratch);
                roots.push(folder);
            }
        }

        roots
    }

    fn walk(
        &self,
        folder: &'f Folder,
        visited: &mut HashSet<&'f str>,
        out: &mut Vec<&'f Folder>,
    ) {
        if !visited.insert(folder.id.as_str()) {
            return;
        }
        out.push(folder);
        for child in self.children.get(folder.id.as_str()).into_iter().flatten().copied() {
            self.walk(child, visited, out);
        }
    }

    fn node(
        &self,
        folder: &'f Folder,
        visited: &mut HashSet<&'f str>,
        filed: &mut HashMap<String, Vec<TableDef>>,
    ) -> Option<FolderNode> {
        if !visited.insert(folder.id.as_str()) {
            return None;
        }
        let children = self
            .children
            .get(folder.id.as_str())
            .into_iter()
            .flatten()
            .copied()
            .filter_map(|child| self.node(child, visited, filed))
            .collect();

        Some(FolderNode {
            folder: folder.clone(),
            tables: filed.remove(&folder.id).unwrap_or_default(),
            children,
        })
    }
}

/// Read every folder of a tenant, skipping unreadable documents.
async fn scan_folders(blobs: &dyn BlobStore, keys: &KeySpace) -> Result<Vec<Folder>> {
    let folder_keys: Vec<String> = blobs
        .list(&keys.folders_prefix())
        .await?
        .into_iter()
        .filter(|meta| keys.folder_id_of(&meta.key).is_some())
        .map(|meta| meta.key)
        .collect();

    let mut folders = Vec::with_capacity(folder_keys.len());
    for (key, data) in get_many(blobs, folder_keys).await? {
        match Folder::from_bytes(&data) {
            Ok(folder) => folders.push(folder),
            Err(e) => warn!(key = %key, error = %e, "skipping unreadable folder"),
        }
    }
    Ok(folders)
}
