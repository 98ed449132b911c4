//! Turns pgoutput payloads into [`Changeset`]s.

use std::collections::HashMap;

use tracing::{debug, trace};
use walcap_core::{from_pg_micros, Changeset, ChangesetData, Lsn, Operation, RowMap, TableRef, Value};

use super::pgoutput::{ColumnValue, PgOutputMessage, TupleData, TypeMessage};
use super::relation_cache::{LayoutColumn, RelationCache, RelationLayout};
use crate::error::DecodeError;
use crate::schema::{ReplicaIdentity, SchemaCatalog};

/// A logical decoding output format.
pub trait Decoder {
    /// Options passed to the output plugin in `START_REPLICATION`.
    fn plugin_args(&self) -> Vec<String>;

    /// Decode one XLogData payload into `out`.
    ///
    /// Returns `Ok(false)` for protocol metadata that carries no event for the
    /// consumer. `out.watermark` is left untouched.
    fn decode(&mut self, payload: &[u8], out: &mut Changeset) -> Result<bool, DecodeError>;
}

/// Decoder for pgoutput protocol version 1.
#[derive(Debug)]
pub struct V1LogicalDecoder {
    catalog: SchemaCatalog,
    publication: String,
    relations: RelationCache,
    types: HashMap<u32, TypeMessage>,
}

impl V1LogicalDecoder {
    pub fn new(catalog: SchemaCatalog, publication: impl Into<String>) -> Self {
        Self {
            catalog,
            publication: publication.into(),
            relations: RelationCache::new(),
            types: HashMap::new(),
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut SchemaCatalog {
        &mut self.catalog
    }

    /// A custom type announced by a TYPE message in this session.
    pub fn announced_type(&self, type_id: u32) -> Option<&TypeMessage> {
        self.types.get(&type_id)
    }

    /// Drop per-connection state. The server resends RELATION messages on a
    /// new connection.
    pub fn reset(&mut self) {
        self.relations.clear();
        self.types.clear();
    }

    fn relation(&self, relation_id: u32) -> Result<&RelationLayout, DecodeError> {
        self.relations
            .get(relation_id)
            .ok_or(DecodeError::UnknownRelation(relation_id))
    }

    /// TRUNCATE may name relations this session has no layout for yet.
    fn truncated_table(&self, relation_id: u32) -> Result<TableRef, DecodeError> {
        if let Some(layout) = self.relations.get(relation_id) {
            return Ok(layout.table.clone());
        }
        self.catalog
            .table_by_oid(relation_id)
            .map(|info| info.table.clone())
            .ok_or(DecodeError::UnknownRelation(relation_id))
    }
}

impl Decoder for V1LogicalDecoder {
    fn plugin_args(&self) -> Vec<String> {
        vec![
            "proto_version '1'".to_string(),
            format!("publication_names '{}'", self.publication.replace('\'', "''")),
        ]
    }

    fn decode(&mut self, payload: &[u8], out: &mut Changeset) -> Result<bool, DecodeError> {
        let msg = PgOutputMessage::parse(payload)?;
        out.data = ChangesetData::default();

        match msg {
            PgOutputMessage::Relation(rel) => {
                let layout = RelationLayout::build(&rel, &self.catalog)?;
                debug!(
                    relation_id = rel.relation_id,
                    table = %layout.table,
                    columns = layout.columns.len(),
                    "Received relation"
                );
                self.relations.insert(layout);
                Ok(false)
            }
            PgOutputMessage::Type(t) => {
                trace!(type_id = t.type_id, name = %t.name, "Received type");
                self.types.insert(t.type_id, t);
                Ok(false)
            }
            PgOutputMessage::Origin(o) => {
                trace!(origin = %o.origin_name, "Received origin");
                Ok(false)
            }
            PgOutputMessage::Message(m) => {
                trace!(prefix = %m.prefix, len = m.content.len(), "Received logical message");
                Ok(false)
            }
            PgOutputMessage::Begin(begin) => {
                out.operation = Operation::Begin;
                out.data.txn_lsn = Some(Lsn(begin.final_lsn));
                out.data.txn_commit_time = Some(pg_time(begin.timestamp)?);
                out.data.txn_xid = Some(begin.xid);
                Ok(true)
            }
            PgOutputMessage::Commit(commit) => {
                out.operation = Operation::Commit;
                out.data.commit_lsn = Some(Lsn(commit.commit_lsn));
                out.data.end_lsn = Some(Lsn(commit.end_lsn));
                out.data.txn_commit_time = Some(pg_time(commit.timestamp)?);
                Ok(true)
            }
            PgOutputMessage::Insert(insert) => {
                let layout = self.relation(insert.relation_id)?;
                out.operation = Operation::Insert;
                out.data.table = Some(layout.table.clone());
                out.data.new = Some(row_map(&insert.tuple, layout, false)?);
                Ok(true)
            }
            PgOutputMessage::Update(update) => {
                let layout = self.relation(update.relation_id)?;
                out.operation = Operation::Update;
                out.data.table = Some(layout.table.clone());
                out.data.new = Some(row_map(&update.new_tuple, layout, false)?);
                out.data.old = match &update.old_tuple {
                    Some((_, tuple)) => old_row(tuple, layout)?,
                    None => None,
                };
                Ok(true)
            }
            PgOutputMessage::Delete(delete) => {
                let layout = self.relation(delete.relation_id)?;
                out.operation = Operation::Delete;
                out.data.table = Some(layout.table.clone());
                out.data.old = old_row(&delete.old_tuple, layout)?;
                Ok(true)
            }
            PgOutputMessage::Truncate(truncate) => {
                out.operation = Operation::Truncate;
                out.data.truncated = truncate
                    .relation_ids
                    .iter()
                    .map(|id| self.truncated_table(*id))
                    .collect::<Result<_, _>>()?;
                Ok(true)
            }
        }
    }
}

fn pg_time(micros: i64) -> Result<chrono::DateTime<chrono::Utc>, DecodeError> {
    from_pg_micros(micros).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// The old row image the table's replica identity allows.
fn old_row(tuple: &TupleData, layout: &RelationLayout) -> Result<Option<RowMap>, DecodeError> {
    match layout.replica_identity {
        ReplicaIdentity::Nothing => Ok(None),
        ReplicaIdentity::Full => row_map(tuple, layout, false).map(Some),
        ReplicaIdentity::Default | ReplicaIdentity::Index => row_map(tuple, layout, true).map(Some),
    }
}

fn row_map(
    tuple: &TupleData,
    layout: &RelationLayout,
    keys_only: bool,
) -> Result<RowMap, DecodeError> {
    if tuple.columns.len() != layout.columns.len() {
        return Err(DecodeError::Malformed(format!(
            "tuple for {} has {} columns, relation has {}",
            layout.table,
            tuple.columns.len(),
            layout.columns.len()
        )));
    }

    let mut row = RowMap::new();
    for (value, column) in tuple.columns.iter().zip(&layout.columns) {
        if column.excluded || (keys_only && !column.key) {
            continue;
        }
        let value = match value {
            ColumnValue::Null => Value::Null,
            ColumnValue::Unchanged => continue,
            ColumnValue::Text(raw) => text_value(raw, column),
            ColumnValue::Binary(raw) => Value::Bytes(raw.clone()),
        };
        row.insert(column.name.clone(), value);
    }
    Ok(row)
}

mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const CHAR: u32 = 18;
    pub const NAME: u32 = 19;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const OID: u32 = 26;
    pub const JSON: u32 = 114;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIME: u32 = 1083;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const INTERVAL: u32 = 1186;
    pub const TIMETZ: u32 = 1266;
    pub const NUMERIC: u32 = 1700;
    pub const UUID: u32 = 2950;
    pub const JSONB: u32 = 3802;
}

/// Convert a text-format column by type OID.
///
/// Anything without a native mapping, or text that does not parse as its
/// declared type, is passed through as raw bytes.
fn text_value(raw: &[u8], column: &LayoutColumn) -> Value {
    let Ok(s) = std::str::from_utf8(raw) else {
        return Value::Bytes(raw.to_vec());
    };

    let parsed = match column.type_oid {
        oid::BOOL => match s {
            "t" | "true" => Some(Value::Bool(true)),
            "f" | "false" => Some(Value::Bool(false)),
            _ => None,
        },
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => s.parse().ok().map(Value::Int),
        oid::FLOAT4 | oid::FLOAT8 => s.parse().ok().map(Value::Float),
        oid::NUMERIC
        | oid::TEXT
        | oid::VARCHAR
        | oid::BPCHAR
        | oid::NAME
        | oid::CHAR
        | oid::UUID
        | oid::DATE
        | oid::TIME
        | oid::TIMETZ
        | oid::TIMESTAMP
        | oid::TIMESTAMPTZ
        | oid::INTERVAL => Some(Value::String(s.to_string())),
        oid::JSON | oid::JSONB => serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .map(Value::from),
        oid::BYTEA => s
            .strip_prefix("\\x")
            .and_then(|h| hex::decode(h).ok())
            .map(Value::Bytes),
        _ => None,
    };

    parsed.unwrap_or_else(|| Value::Bytes(raw.to_vec()))
}
