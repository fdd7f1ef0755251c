//! Table catalog.
//!
//! Tables are schema documents stored one per key. Relationships are declared
//! on the child table only; the parent side is discovered by scanning.

mod registry;
mod relation;
mod table;

pub use registry::{scan_tables, SchemaRegistry};
pub use relation::{DeleteBehavior, DependentRelation, Reference, RelationshipDef, ID_FIELD};
pub use table::{NewTable, TableDef, TableExtension, TableSchema};
