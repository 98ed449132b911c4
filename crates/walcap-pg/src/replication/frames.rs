//! Streaming replication sub-protocol carried inside CopyData messages.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use walcap_core::{from_pg_micros, to_pg_micros, Lsn};

use crate::error::{PgError, PgResult};

const XLOG_DATA: u8 = b'w';
const PRIMARY_KEEPALIVE: u8 = b'k';
const STANDBY_STATUS_UPDATE: u8 = b'r';

/// A WAL record chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct XLogData {
    pub wal_start: Lsn,
    pub wal_end: Lsn,
    pub server_time: DateTime<Utc>,
    pub data: Bytes,
}

/// Heartbeat from the primary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrimaryKeepalive {
    pub wal_end: Lsn,
    pub server_time: DateTime<Utc>,
    /// The server wants a status update right away.
    pub reply_requested: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationMessage {
    XLogData(XLogData),
    PrimaryKeepalive(PrimaryKeepalive),
}

impl ReplicationMessage {
    /// Parse the payload of a CopyData message.
    ///
    /// Unknown message kinds yield `Ok(None)`.
    pub fn parse(mut data: Bytes) -> PgResult<Option<Self>> {
        if data.is_empty() {
            return Err(PgError::Protocol("empty replication message".to_string()));
        }
        match data.get_u8() {
            XLOG_DATA => {
                if data.remaining() < 24 {
                    return Err(PgError::Protocol(
                        "error parsing replication txn data: message too short".to_string(),
                    ));
                }
                let wal_start = Lsn(data.get_u64());
                let wal_end = Lsn(data.get_u64());
                let server_time = server_time(data.get_i64())?;
                Ok(Some(ReplicationMessage::XLogData(XLogData {
                    wal_start,
                    wal_end,
                    server_time,
                    data,
                })))
            }
            PRIMARY_KEEPALIVE => {
                if data.remaining() < 17 {
                    return Err(PgError::Protocol(
                        "error parsing replication keepalive: message too short".to_string(),
                    ));
                }
                Ok(Some(ReplicationMessage::PrimaryKeepalive(PrimaryKeepalive {
                    wal_end: Lsn(data.get_u64()),
                    server_time: server_time(data.get_i64())?,
                    reply_requested: data.get_u8() != 0,
                })))
            }
            _ => Ok(None),
        }
    }
}

fn server_time(micros: i64) -> PgResult<DateTime<Utc>> {
    from_pg_micros(micros).map_err(|e| PgError::Protocol(e.to_string()))
}

/// Progress report sent to the primary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandbyStatusUpdate {
    pub write_lsn: Lsn,
    pub flush_lsn: Lsn,
    pub apply_lsn: Lsn,
    pub client_time: DateTime<Utc>,
    pub reply_requested: bool,
}

impl StandbyStatusUpdate {
    /// Report `lsn` as written, flushed and applied.
    pub fn at(lsn: Lsn, reply_requested: bool) -> Self {
        Self {
            write_lsn: lsn,
            flush_lsn: lsn,
            apply_lsn: lsn,
            client_time: Utc::now(),
            reply_requested,
        }
    }

    /// Encode as a CopyData payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(34);
        buf.put_u8(STANDBY_STATUS_UPDATE);
        buf.put_u64(self.write_lsn.as_u64());
        buf.put_u64(self.flush_lsn.as_u64());
        buf.put_u64(self.apply_lsn.as_u64());
        buf.put_i64(to_pg_micros(self.client_time));
        buf.put_u8(u8::from(self.reply_requested));
        buf.freeze()
    }
}
