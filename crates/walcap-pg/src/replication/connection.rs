//! The streaming (replication-mode) side of a session.

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info};
use walcap_core::Lsn;

use super::frames::StandbyStatusUpdate;
use super::wire::{BackendMessage, WireConnection};
use crate::connect::ConnectionParams;
use crate::error::{PgError, PgResult, ServerError};

/// Result of `IDENTIFY_SYSTEM`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemIdentity {
    pub system_id: String,
    pub timeline: u32,
    /// Current end of WAL.
    pub xlogpos: Lsn,
    pub dbname: Option<String>,
}

/// A message received while streaming.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendFrame {
    CopyData(Bytes),
    CommandComplete,
    Error(ServerError),
    /// Anything else; carries a description for the error message.
    Other(String),
}

/// A connection able to run replication commands and stream WAL.
#[allow(async_fn_in_trait)]
pub trait WalStream {
    async fn identify_system(&mut self) -> PgResult<SystemIdentity>;

    /// Enter CopyBoth mode streaming `slot` from `lsn`.
    async fn start_replication(&mut self, slot: &str, lsn: Lsn, plugin_args: &[String]) -> PgResult<()>;

    /// Wait for the next frame until `deadline`; `Ok(None)` when it passes
    /// first. Must leave the stream intact when it times out.
    async fn receive(&mut self, deadline: Instant) -> PgResult<Option<BackendFrame>>;

    async fn send_standby_status(&mut self, update: StandbyStatusUpdate) -> PgResult<()>;

    async fn close(&mut self) -> PgResult<()>;
}

/// Opens streaming connections for a session.
#[allow(async_fn_in_trait)]
pub trait StreamConnector {
    type Stream: WalStream;

    async fn open(&self) -> PgResult<Self::Stream>;
}

/// Opens [`ReplicationConnection`]s to a server.
#[derive(Debug, Clone)]
pub struct ReplicationConnector {
    params: ConnectionParams,
}

impl ReplicationConnector {
    pub fn new(connection_string: &str) -> PgResult<Self> {
        Ok(Self {
            params: ConnectionParams::parse(connection_string)?,
        })
    }
}

impl StreamConnector for ReplicationConnector {
    type Stream = ReplicationConnection;

    async fn open(&self) -> PgResult<ReplicationConnection> {
        let wire = WireConnection::connect(&self.params).await?;
        Ok(ReplicationConnection { wire })
    }
}

/// A live replication-mode connection.
#[derive(Debug)]
pub struct ReplicationConnection {
    wire: WireConnection,
}

impl WalStream for ReplicationConnection {
    async fn identify_system(&mut self) -> PgResult<SystemIdentity> {
        let rows = self.wire.simple_query("IDENTIFY_SYSTEM").await?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PgError::Protocol("IDENTIFY_SYSTEM returned no rows".to_string()))?;
        parse_identify_system(row)
    }

    async fn start_replication(&mut self, slot: &str, lsn: Lsn, plugin_args: &[String]) -> PgResult<()> {
        let sql = start_replication_sql(slot, lsn, plugin_args);
        debug!(sql = %sql, "Starting replication");
        self.wire.start_copy_both(&sql).await?;
        info!(slot, lsn = %lsn, "Logical replication started");
        Ok(())
    }

    async fn receive(&mut self, deadline: Instant) -> PgResult<Option<BackendFrame>> {
        let msg = match tokio::time::timeout_at(deadline, self.wire.read_message()).await {
            Ok(msg) => msg?,
            Err(_) => return Ok(None),
        };
        let frame = match msg {
            BackendMessage::CopyData(data) => BackendFrame::CopyData(data),
            BackendMessage::CommandComplete(_) => BackendFrame::CommandComplete,
            BackendMessage::Error(e) => BackendFrame::Error(e),
            other => BackendFrame::Other(format!("{:?}", other)),
        };
        Ok(Some(frame))
    }

    async fn send_standby_status(&mut self, update: StandbyStatusUpdate) -> PgResult<()> {
        self.wire.write_copy_data(&update.encode()).await
    }

    async fn close(&mut self) -> PgResult<()> {
        self.wire.terminate().await
    }
}

fn start_replication_sql(slot: &str, lsn: Lsn, plugin_args: &[String]) -> String {
    let mut sql = format!("START_REPLICATION SLOT {} LOGICAL {}", slot, lsn);
    if !plugin_args.is_empty() {
        sql.push_str(&format!(" ({})", plugin_args.join(", ")));
    }
    sql
}

fn parse_identify_system(row: Vec<Option<String>>) -> PgResult<SystemIdentity> {
    let mut cols = row.into_iter();
    let mut next = |name: &str| {
        cols.next()
            .flatten()
            .ok_or_else(|| PgError::Protocol(format!("IDENTIFY_SYSTEM missing {}", name)))
    };

    let system_id = next("systemid")?;
    let timeline = next("timeline")?;
    let xlogpos = next("xlogpos")?;
    let dbname = next("dbname").ok();

    Ok(SystemIdentity {
        system_id,
        timeline: timeline
            .parse()
            .map_err(|_| PgError::Protocol(format!("bad timeline: {}", timeline)))?,
        xlogpos: Lsn::parse(&xlogpos)?,
        dbname,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_replication_sql() {
        let args = vec![
            "proto_version '1'".to_string(),
            "publication_names 'walcap_cdc'".to_string(),
        ];
        assert_eq!(
            start_replication_sql("walcap_cdc", Lsn(0x16B3748), &args),
            "START_REPLICATION SLOT walcap_cdc LOGICAL 0/16B3748 (proto_version '1', publication_names 'walcap_cdc')"
        );
        assert_eq!(
            start_replication_sql("walcap_cdc", Lsn::ZERO, &[]),
            "START_REPLICATION SLOT walcap_cdc LOGICAL 0/0"
        );
    }

    #[test]
    fn test_parse_identify_system() {
        let identity = parse_identify_system(vec![
            Some("7321".into()),
            Some("1".into()),
            Some("1/A0".into()),
            Some("app".into()),
        ])
        .unwrap();
        assert_eq!(identity.xlogpos, Lsn(0x1_0000_00A0));
        assert_eq!(identity.timeline, 1);
        assert_eq!(identity.dbname.as_deref(), Some("app"));

        assert!(parse_identify_system(vec![Some("7321".into()), Some("1".into())]).is_err());
    }
}
