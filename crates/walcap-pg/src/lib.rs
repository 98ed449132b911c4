mod connect;
mod consts;
mod error;
pub mod query;
pub mod replication;
pub mod schema;
pub mod watermark;

pub use connect::{connect_postgres, ConnectionParams};
pub use consts::{PUBLICATION_NAME, SLOT_NAME};
pub use error::{standardize, CatalogError, DecodeError, PgError, PgResult, ServerError};
pub use query::QueryConn;
pub use replication::{
    PgReplicator, PostgresOpts, PostgresReplicator, ReplicationSlotState, ReplicatorHandle,
};
pub use watermark::{BoxError, BoxFuture, WatermarkLoader, WatermarkSaver};
