//! Logical replication over the Postgres streaming protocol.
//!
//! A session holds two connections: a replication-mode connection that streams
//! pgoutput frames, and an ordinary query connection for catalog and slot
//! lookups.

pub mod connection;
pub mod decoder;
pub mod frames;
pub mod pgoutput;
pub mod publication;
pub mod relation_cache;
pub mod session;
pub mod slot;
pub mod unwrapper;
pub mod wire;

pub use crate::error::DecodeError;
pub use connection::{
    BackendFrame, ReplicationConnection, ReplicationConnector, StreamConnector, SystemIdentity,
    WalStream,
};
pub use decoder::{Decoder, V1LogicalDecoder};
pub use frames::{PrimaryKeepalive, ReplicationMessage, StandbyStatusUpdate, XLogData};
pub use pgoutput::PgOutputMessage;
pub use publication::{ensure_publication, parse_table, quote_ident};
pub use relation_cache::{RelationCache, RelationLayout};
pub use session::{
    PgReplicator, PostgresOpts, PostgresReplicator, ReplicatorHandle, DEFAULT_COMMIT_INTERVAL,
    DEFAULT_READ_TIMEOUT,
};
pub use slot::{ensure_slot, ReplicationSlotState, SlotSetup};
pub use unwrapper::Unwrapper;
