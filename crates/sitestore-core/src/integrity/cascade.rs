//! Cascade executor for handling referential integrity on deletes.
//!
//! A delete is planned completely before anything changes:
//! - RESTRICT: any remaining dependent row blocks the whole delete
//! - CASCADE: dependent rows are deleted
//! - SET NULL: the dependent field is nulled and the row annotated
//!
//! Only once every restrict check has passed are the side effects applied,
//! followed by the delete of the row itself.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use super::index::ReferenceIndex;
use crate::blob::BlobStore;
use crate::catalog::{DeleteBehavior, DependentRelation, SchemaRegistry};
use crate::config::{CascadeMode, StoreConfig};
use crate::error::{ConflictError, Error, ResourceKind, Result};
use crate::rows::Row;
use crate::session::Session;
use crate::value::Value;

/// Read-modify-write attempts when nulling a field that keeps changing.
const MAX_NULLIFY_ATTEMPTS: usize = 3;

/// A row addressed by table and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowRef {
    pub table: String,
    pub row_id: String,
}

impl RowRef {
    pub fn new(table: impl Into<String>, row_id: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            row_id: row_id.into(),
        }
    }
}

impl fmt::Display for RowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.row_id)
    }
}

/// Dependent rows of a `restrict` relationship that prevent a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Blocker {
    /// Row whose deletion is blocked.
    pub parent: RowRef,
    /// Table holding the blocking rows.
    pub table: String,
    /// Field on the blocking rows.
    pub field: String,
    /// Blocking row ids.
    pub row_ids: Vec<String>,
}

/// Fields of one dependent row to be nulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Nullification {
    pub row: RowRef,
    pub fields: Vec<String>,
    /// Deleted row that caused it.
    pub parent: RowRef,
}

/// Everything a delete would do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePlan {
    /// Row being deleted.
    pub target: RowRef,
    /// Restrict relationships with remaining dependents.
    pub blockers: Vec<Blocker>,
    /// Dependent rows to delete, in discovery order.
    pub deletions: Vec<RowRef>,
    /// Dependent rows to null fields on.
    pub nullifications: Vec<Nullification>,
}

impl DeletePlan {
    /// Whether no restrict relationship blocks the delete.
    pub fn is_allowed(&self) -> bool {
        self.blockers.is_empty()
    }

    fn violation(&self) -> Option<Error> {
        self.blockers.first().map(|b| {
            ConflictError::RestrictViolation {
                table: b.parent.table.clone(),
                row_id: b.parent.row_id.clone(),
                referencing_table: b.table.clone(),
                field: b.field.clone(),
                count: b.row_ids.len(),
            }
            .into()
        })
    }
}

/// Result of a cascade operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeResult {
    /// Row that was deleted.
    pub target: RowRef,
    /// Dependent rows that were deleted.
    pub deleted_rows: Vec<RowRef>,
    /// Fields that were set to null.
    pub nullified_fields: Vec<(RowRef, String)>,
}

impl CascadeResult {
    /// Whether any dependent row was touched.
    pub fn cascaded(&self) -> bool {
        self.affected_count() > 0
    }

    /// Get the total number of affected dependents.
    pub fn affected_count(&self) -> usize {
        self.deleted_rows.len() + self.nullified_fields.len()
    }
}

/// Executes cascade operations for delete.
pub struct CascadeExecutor<'a> {
    blobs: &'a dyn BlobStore,
    index: &'a dyn ReferenceIndex,
    config: &'a StoreConfig,
    session: &'a Session,
}

impl<'a> CascadeExecutor<'a> {
    /// Create a new cascade executor.
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

    /// Plan the delete of `row_id` without changing anything.
    pub async fn plan(&self, table_id: &str, row_id: &str) -> Result<DeletePlan> {
        let table = SchemaRegistry::new(self.blobs, self.session)
            .get_table(table_id)
            .await?;
        let key = self.session.keys().row_key(&table.id, row_id)?;
        if !self.blobs.exists(&key).await? {
            return Err(Error::not_found(ResourceKind::Row, row_id));
        }

        let target = RowRef::new(table.id, row_id);
        let mut visited: HashSet<RowRef> = HashSet::from([target.clone()]);
        let mut dependents_by_table: HashMap<String, Vec<DependentRelation>> = HashMap::new();
        let mut blockers = Vec::new();
        let mut deletions = Vec::new();
        let mut nullified: BTreeMap<RowRef, Nullification> = BTreeMap::new();

        let mut queue = VecDeque::from([(target.clone(), 0usize)]);
        while let Some((parent, depth)) = queue.pop_front() {
            if !dependents_by_table.contains_key(&parent.table) {
                let deps = self
                    .index
                    .dependents(self.session.keys(), &parent.table)
                    .await?;
                dependents_by_table.insert(parent.table.clone(), deps);
            }
            let dependents = dependents_by_table
                .get(&parent.table)
                .cloned()
                .unwrap_or_default();

            let parent_id = Value::String(parent.row_id.clone());
            for dep in dependents {
                let rows = self
                    .index
                    .find_rows(self.session.keys(), &dep.table, &dep.field, &parent_id)
                    .await?;
                if rows.is_empty() {
                    continue;
                }

                match dep.on_delete {
                    DeleteBehavior::Restrict => blockers.push(Blocker {
                        parent: parent.clone(),
                        table: dep.table.clone(),
                        field: dep.field.clone(),
                        row_ids: rows.into_iter().map(|r| r.id).collect(),
                    }),
                    DeleteBehavior::SetNull => {
                        for row in rows {
                            let row_ref = RowRef::new(dep.table.clone(), row.id);
                            nullified
                                .entry(row_ref.clone())
                                .or_insert_with(|| Nullification {
                                    row: row_ref,
                                    fields: Vec::new(),
                                    parent: parent.clone(),
                                })
                                .fields
                                .push(dep.field.clone());
                        }
                    }
                    DeleteBehavior::Cascade => {
                        for row in rows {
                            let row_ref = RowRef::new(dep.table.clone(), row.id);
                            if !visited.insert(row_ref.clone()) {
                                continue;
                            }
                            deletions.push(row_ref.clone());

                            if let CascadeMode::Recursive { max_depth } = self.config.cascade_mode {
                                let next = depth + 1;
                                if next > max_depth {
                                    return Err(Error::CascadeDepthExceeded { depth: next });
                                }
                                queue.push_back((row_ref, next));
                            }
                        }
                    }
                }
            }
        }

        // Rows that are going away anyway neither block nor need nulling.
        for blocker in &mut blockers {
            let table = blocker.table.clone();
            blocker
                .row_ids
                .retain(|id| !visited.contains(&RowRef::new(table.clone(), id.clone())));
        }
        blockers.retain(|b| !b.row_ids.is_empty());
        nullified.retain(|row, _| !visited.contains(row));

        Ok(DeletePlan {
            target,
            blockers,
            deletions,
            nullifications: nullified.into_values().collect(),
        })
    }

    /// Delete `row_id` and apply every dependent delete policy.
    ///
    /// Fails with a restrict violation, changing nothing, if any restrict
    /// relationship still has dependents.
    pub async fn execute(&self, table_id: &str, row_id: &str) -> Result<CascadeResult> {
        let plan = self.plan(table_id, row_id).await?;
        if let Some(err) = plan.violation() {
            debug!(target_row = %plan.target, "delete blocked by restrict");
            return Err(err);
        }

        let concurrency = self.config.fanout_concurrency.max(1);

        let nullified: Vec<Vec<(RowRef, String)>> = stream::iter(&plan.nullifications)
            .map(|n| self.nullify(n))
            .buffer_unordered(concurrency)
            .try_collect()
            .await?;

        stream::iter(&plan.deletions)
            .map(|row| self.remove(row))
            .buffer_unordered(concurrency)
            .try_collect::<Vec<()>>()
            .await?;

        self.remove(&plan.target).await?;

        let mut nullified_fields: Vec<(RowRef, String)> = nullified.into_iter().flatten().collect();
        nullified_fields.sort();
        let result = CascadeResult {
            target: plan.target,
            deleted_rows: plan.deletions,
            nullified_fields,
        };

        if result.cascaded() {
            info!(
                tenant = %self.session.tenant(),
                target_row = %result.target,
                deleted = result.deleted_rows.len(),
                nullified = result.nullified_fields.len(),
                "cascaded delete"
            );
        } else {
            debug!(tenant = %self.session.tenant(), target_row = %result.target, "deleted row");
        }
        Ok(result)
    }

    /// Null the planned fields of one row. A row deleted in the meantime is
    /// skipped.
    async fn nullify(&self, n: &Nullification) -> Result<Vec<(RowRef, String)>> {
        let key = self.session.keys().row_key(&n.row.table, &n.row.row_id)?;
        let reason = format!(
            "{} set to null because {} was deleted",
            n.fields.join(", "),
            n.parent
        );

        for _ in 0..MAX_NULLIFY_ATTEMPTS {
            let Some(blob) = self.blobs.get_versioned(&key).await? else {
                return Ok(Vec::new());
            };
            let mut row = Row::from_bytes(&blob.data)?;
            for field in &n.fields {
                row.fields.insert(field.clone(), Value::Null);
            }
            row.meta.updated_by = Some(self.session.user().to_string());
            row.meta.updated_at = Some(Utc::now());
            row.meta.cascade_reason = Some(reason.clone());

            let written = self
                .blobs
                .put_if_match(&key, Bytes::from(row.to_bytes()?), &blob.version)
                .await?;
            if written.is_some() {
                self.index
                    .row_written(self.session.keys(), &n.row.table, &row)
                    .await?;
                return Ok(n
                    .fields
                    .iter()
                    .map(|field| (n.row.clone(), field.clone()))
                    .collect());
            }
            debug!(row = %n.row, "row changed while nulling, retrying");
        }

        Err(ConflictError::ConcurrentModification {
            kind: ResourceKind::Row,
            id: n.row.row_id.clone(),
        }
        .into())
    }

    async fn remove(&self, row: &RowRef) -> Result<()> {
        let key = self.session.keys().row_key(&row.table, &row.row_id)?;
        self.blobs.delete(&key).await?;
        self.index
            .row_deleted(self.session.keys(), &row.table, &row.row_id)
            .await
    }
}
