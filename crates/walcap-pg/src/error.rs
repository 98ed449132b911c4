use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PgError {
    #[error("ERR_PG_001: Your database does not have logical replication configured.  You must set the WAL level to 'logical' to stream events.")]
    LogicalReplicationNotSetUp,

    #[error("ERR_PG_002: The replication slot '{0}' doesn't exist in your database.  Please create the logical replication slot to stream events.")]
    ReplicationSlotNotFound(String),

    #[error("ERR_PG_901: Replication is already streaming events")]
    ReplicationAlreadyRunning,

    #[error("postgres error: {0}")]
    Postgres(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection is closed")]
    Closed,

    #[error("received pg wal error: {0}")]
    Server(ServerError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("error decoding xlog data: {0}")]
    Decode(#[from] DecodeError),

    #[error("schema catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("error loading watermark: {0}")]
    WatermarkLoad(String),

    #[error("error saving watermark: {0}")]
    WatermarkSave(String),

    #[error("failed to create replication slot: {0}")]
    SlotCreationFailed(String),

    #[error("publication '{0}' does not exist")]
    PublicationNotFound(String),

    #[error("invalid LSN format: {0}")]
    InvalidLsn(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl PgError {
    /// Whether this is one of the configuration errors callers are expected to branch on.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            PgError::LogicalReplicationNotSetUp
                | PgError::ReplicationSlotNotFound(_)
                | PgError::ReplicationAlreadyRunning
        )
    }
}

impl From<tokio_postgres::Error> for PgError {
    fn from(e: tokio_postgres::Error) -> Self {
        // Extract database error details if available
        if let Some(db_err) = e.as_db_error() {
            let msg = format!(
                "{}: {} (code: {})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            );
            PgError::Postgres(msg)
        } else {
            PgError::Postgres(e.to_string())
        }
    }
}

impl From<walcap_core::Error> for PgError {
    fn from(e: walcap_core::Error) -> Self {
        match e {
            walcap_core::Error::InvalidLsn(s) => PgError::InvalidLsn(s),
            other => PgError::Protocol(other.to_string()),
        }
    }
}

pub type PgResult<T> = Result<T, PgError>;

/// Fields of a server `ErrorResponse` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} (code: {})", self.severity, self.message, self.code)?;
        if let Some(detail) = &self.detail {
            write!(f, " detail: {}", detail)?;
        }
        Ok(())
    }
}

/// Failures looking something up in the schema catalog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("namespace '{0}' not found in schema catalog")]
    NamespaceMissing(String),

    #[error("table '{schema}.{table}' not found in schema catalog")]
    TableMissing { schema: String, table: String },

    #[error("identity information for '{schema}.{table}' not found in schema catalog")]
    IdentityMissing { schema: String, table: String },

    #[error("column '{column}' not found on '{schema}.{table}'")]
    ColumnMissing {
        schema: String,
        table: String,
        column: String,
    },
}

/// Unrecoverable failures decoding a logical replication payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,

    #[error("unknown message type: 0x{0:02X}")]
    UnknownMessage(u8),

    #[error("short read: {0}")]
    ShortRead(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("relation {0} not found; no RELATION message received for it")]
    UnknownRelation(u32),

    #[error("relation {relation_id} does not match the schema catalog: {reason}")]
    CatalogMismatch { relation_id: u32, reason: String },
}

/// Map driver error text onto the stable configuration errors.
///
/// The server reports these conditions only as message text, so this is the
/// single place that knows the wording.
pub fn standardize(err: PgError, slot: &str) -> PgError {
    if err.is_configuration() {
        return err;
    }

    let msg = err.to_string();
    if msg.contains("logical decoding requires wal_level") {
        return PgError::LogicalReplicationNotSetUp;
    }
    if msg.contains(&format!("replication slot \"{}\" does not exist", slot)) {
        return PgError::ReplicationSlotNotFound(slot.to_string());
    }
    if msg.contains(&format!("replication slot \"{}\" is active", slot)) {
        return PgError::ReplicationAlreadyRunning;
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(message: &str) -> PgError {
        PgError::Server(ServerError {
            severity: "ERROR".into(),
            code: "55000".into(),
            message: message.into(),
            detail: None,
        })
    }

    #[test]
    fn test_standardize_wal_level() {
        let err = server("logical decoding requires wal_level >= logical");
        assert!(matches!(
            standardize(err, "walcap_cdc"),
            PgError::LogicalReplicationNotSetUp
        ));
    }

    #[test]
    fn test_standardize_missing_slot() {
        let err = PgError::Postgres(
            "ERROR: replication slot \"walcap_cdc\" does not exist (code: 42704)".into(),
        );
        match standardize(err, "walcap_cdc") {
            PgError::ReplicationSlotNotFound(slot) => assert_eq!(slot, "walcap_cdc"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_standardize_active_slot() {
        let err = server("replication slot \"walcap_cdc\" is active for PID 4242");
        assert!(matches!(
            standardize(err, "walcap_cdc"),
            PgError::ReplicationAlreadyRunning
        ));
    }

    #[test]
    fn test_standardize_other_slot_is_verbatim() {
        let err = server("replication slot \"other\" does not exist");
        match standardize(err, "walcap_cdc") {
            PgError::Server(e) => assert_eq!(e.message, "replication slot \"other\" does not exist"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_standardize_keeps_unrelated_errors() {
        let err = PgError::Connection("connection refused".into());
        assert!(matches!(standardize(err, "walcap_cdc"), PgError::Connection(_)));
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError {
            severity: "ERROR".into(),
            code: "42704".into(),
            message: "boom".into(),
            detail: Some("more".into()),
        };
        assert_eq!(err.to_string(), "ERROR: boom (code: 42704) detail: more");
    }

    #[test]
    fn test_decode_error_display() {
        assert_eq!(
            DecodeError::UnknownMessage(b'Z').to_string(),
            "unknown message type: 0x5A"
        );
    }
}
