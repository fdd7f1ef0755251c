//! Referential integrity engine.
//!
//! Forward checks run before a row is written; backward discovery and delete
//! policies run when a row is deleted. Both go through [`ReferenceIndex`].

mod cascade;
mod index;
mod validator;

pub use cascade::{Blocker, CascadeExecutor, CascadeResult, DeletePlan, Nullification, RowRef};
pub use index::{ReferenceIndex, ScanIndex};
pub use validator::{check_required, ForeignKeyValidator};
