//! The canonical change event emitted by the replicator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::lsn::Lsn;
use crate::types::{RowMap, TableRef};

/// Seconds between the Unix epoch and the PostgreSQL epoch (2000-01-01 UTC).
const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Convert PostgreSQL wire time (microseconds since 2000-01-01) to UTC.
pub fn from_pg_micros(micros: i64) -> Result<DateTime<Utc>> {
    let unix_micros = micros
        .checked_add(PG_EPOCH_OFFSET_SECS * 1_000_000)
        .ok_or(Error::TimestampOutOfRange(micros))?;
    DateTime::from_timestamp_micros(unix_micros).ok_or(Error::TimestampOutOfRange(micros))
}

/// Convert a UTC time to PostgreSQL wire time (microseconds since 2000-01-01).
pub fn to_pg_micros(time: DateTime<Utc>) -> i64 {
    time.timestamp_micros() - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// The kind of replication event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Begin,
    Commit,
    Insert,
    Update,
    Delete,
    Truncate,
}

impl Operation {
    /// Whether this operation changes table data (as opposed to framing a transaction).
    pub fn is_dml(self) -> bool {
        matches!(
            self,
            Operation::Insert | Operation::Update | Operation::Delete | Operation::Truncate
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Begin => "BEGIN",
            Operation::Commit => "COMMIT",
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
            Operation::Truncate => "TRUNCATE",
        }
    }
}

/// How far a consumer has durably processed the stream.
///
/// Only `lsn` is used for acknowledgement; `server_time` is informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    pub lsn: Lsn,
    pub server_time: DateTime<Utc>,
}

impl Watermark {
    pub fn new(lsn: Lsn, server_time: DateTime<Utc>) -> Self {
        Self { lsn, server_time }
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self {
            lsn: Lsn::ZERO,
            server_time: DateTime::UNIX_EPOCH,
        }
    }
}

/// Operation-dependent payload of a [`Changeset`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangesetData {
    /// LSN of the enclosing transaction (the BEGIN frame's final LSN).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_lsn: Option<Lsn>,
    /// Commit time of the enclosing transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_commit_time: Option<DateTime<Utc>>,
    /// Transaction ID of the enclosing transaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txn_xid: Option<u32>,
    /// The table a DML event applies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableRef>,
    /// The new row image (insert/update).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<RowMap>,
    /// The old row image (update/delete, when the replica identity exposes it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<RowMap>,
    /// Tables emptied by a TRUNCATE.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub truncated: Vec<TableRef>,
    /// Commit record LSN (COMMIT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_lsn: Option<Lsn>,
    /// End of the commit record (COMMIT only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_lsn: Option<Lsn>,
}

impl ChangesetData {
    /// Copy transaction metadata from `txn` into any field that is still unset.
    pub fn inherit_txn(&mut self, txn: &ChangesetData) {
        if self.txn_lsn.is_none() {
            self.txn_lsn = txn.txn_lsn;
        }
        if self.txn_commit_time.is_none() {
            self.txn_commit_time = txn.txn_commit_time;
        }
        if self.txn_xid.is_none() {
            self.txn_xid = txn.txn_xid;
        }
    }
}

/// A change event derived from the Postgres WAL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub operation: Operation,
    pub watermark: Watermark,
    pub data: ChangesetData,
}

impl Changeset {
    /// An empty changeset positioned at `watermark`, to be filled by a decoder.
    pub fn at(watermark: Watermark) -> Self {
        Self {
            operation: Operation::Begin,
            watermark,
            data: ChangesetData::default(),
        }
    }

    pub fn is_dml(&self) -> bool {
        self.operation.is_dml()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pg_epoch_conversion() {
        let t = from_pg_micros(0).unwrap();
        assert_eq!(t.to_rfc3339(), "2000-01-01T00:00:00+00:00");
        assert_eq!(to_pg_micros(t), 0);

        let t = from_pg_micros(1_500_000).unwrap();
        assert_eq!(t.timestamp_subsec_micros(), 500_000);
        assert_eq!(to_pg_micros(t), 1_500_000);
    }

    #[test]
    fn test_pg_epoch_overflow() {
        assert!(from_pg_micros(i64::MAX).is_err());
    }

    #[test]
    fn test_operation_is_dml() {
        assert!(!Operation::Begin.is_dml());
        assert!(!Operation::Commit.is_dml());
        assert!(Operation::Insert.is_dml());
        assert!(Operation::Update.is_dml());
        assert!(Operation::Delete.is_dml());
        assert!(Operation::Truncate.is_dml());
    }

    #[test]
    fn test_operation_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Operation::Insert).unwrap(), "\"INSERT\"");
        assert_eq!(Operation::Truncate.as_str(), "TRUNCATE");
    }

    #[test]
    fn test_inherit_txn_keeps_existing_fields() {
        let begin = ChangesetData {
            txn_lsn: Some(Lsn(0x100)),
            txn_commit_time: Some(from_pg_micros(10).unwrap()),
            txn_xid: Some(7),
            ..Default::default()
        };

        let mut dml = ChangesetData {
            txn_lsn: Some(Lsn(0x50)),
            ..Default::default()
        };
        dml.inherit_txn(&begin);

        assert_eq!(dml.txn_lsn, Some(Lsn(0x50)));
        assert_eq!(dml.txn_commit_time, begin.txn_commit_time);
        assert_eq!(dml.txn_xid, Some(7));
    }

    #[test]
    fn test_changeset_json_shape() {
        let mut cs = Changeset::at(Watermark::new(Lsn(0x100), from_pg_micros(0).unwrap()));
        cs.operation = Operation::Insert;
        cs.data.table = Some(TableRef::new("public", "users"));

        let json: serde_json::Value = serde_json::to_value(&cs).unwrap();
        assert_eq!(json["operation"], "INSERT");
        assert_eq!(json["watermark"]["lsn"], "0/100");
        assert_eq!(json["data"]["table"]["name"], "users");
        assert!(json["data"].get("old").is_none());
    }
}
