pub mod changeset;
pub mod error;
pub mod lsn;
pub mod types;

pub use changeset::{from_pg_micros, to_pg_micros, Changeset, ChangesetData, Operation, Watermark};
pub use error::{Error, Result};
pub use lsn::Lsn;
pub use types::{RowMap, TableRef, Value};
