//! In-memory schema catalog built from the Postgres system catalogs.
//!
//! The decoder resolves relation OIDs and filters generated columns through
//! this catalog. It is built once at session start and replaced wholesale on
//! explicit refresh.

mod catalog;
pub mod queries;

pub use catalog::{ColumnInfo, ReplicaIdentity, SchemaCatalog, TableInfo, TypeInfo};
pub use queries::{ColumnRow, KeyRow, TableRow};
