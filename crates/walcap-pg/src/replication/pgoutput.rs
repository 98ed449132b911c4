//! Parser for the PostgreSQL pgoutput logical replication protocol, version 1.
//!
//! Reference: https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html

use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt};

use crate::error::DecodeError;
use crate::schema::ReplicaIdentity;

type DecodeResult<T> = Result<T, DecodeError>;

/// A parsed pgoutput message.
#[derive(Debug, Clone, PartialEq)]
pub enum PgOutputMessage {
    Begin(BeginMessage),
    Commit(CommitMessage),
    Origin(OriginMessage),
    Relation(RelationMessage),
    Type(TypeMessage),
    Insert(InsertMessage),
    Update(UpdateMessage),
    Delete(DeleteMessage),
    Truncate(TruncateMessage),
    Message(LogicalMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    pub final_lsn: u64,
    pub timestamp: i64, // microseconds since 2000-01-01
    pub xid: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitMessage {
    pub flags: u8,
    pub commit_lsn: u64,
    pub end_lsn: u64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OriginMessage {
    pub origin_lsn: u64,
    pub origin_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationMessage {
    pub relation_id: u32,
    pub namespace: String,
    pub name: String,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<RelationColumn>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationColumn {
    pub flags: u8, // 1 = part of key
    pub name: String,
    pub type_oid: u32,
    pub type_modifier: i32,
}

impl RelationColumn {
    pub fn is_key(&self) -> bool {
        self.flags & 1 == 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMessage {
    pub type_id: u32,
    pub namespace: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertMessage {
    pub relation_id: u32,
    pub tuple: TupleData,
}

/// Which image of the old row an UPDATE or DELETE carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OldTupleKind {
    /// 'K' - replica identity key columns only
    Key,
    /// 'O' - the full old row
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    pub relation_id: u32,
    pub old_tuple: Option<(OldTupleKind, TupleData)>,
    pub new_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteMessage {
    pub relation_id: u32,
    pub old_kind: OldTupleKind,
    pub old_tuple: TupleData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TruncateMessage {
    pub options: u8,
    pub relation_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogicalMessage {
    pub flags: u8,
    pub lsn: u64,
    pub prefix: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TupleData {
    pub columns: Vec<ColumnValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Unchanged, // TOASTed value unchanged
    Text(Vec<u8>),
    Binary(Vec<u8>),
}

impl PgOutputMessage {
    /// Parse a pgoutput message from raw bytes.
    pub fn parse(data: &[u8]) -> DecodeResult<Self> {
        let (&msg_type, payload) = data.split_first().ok_or(DecodeError::Empty)?;
        let mut cursor = Cursor::new(payload);

        match msg_type {
            b'B' => parse_begin(&mut cursor),
            b'C' => parse_commit(&mut cursor),
            b'O' => parse_origin(&mut cursor),
            b'R' => parse_relation(&mut cursor),
            b'Y' => parse_type(&mut cursor),
            b'I' => parse_insert(&mut cursor),
            b'U' => parse_update(&mut cursor),
            b'D' => parse_delete(&mut cursor),
            b'T' => parse_truncate(&mut cursor),
            b'M' => parse_message(&mut cursor),
            other => Err(DecodeError::UnknownMessage(other)),
        }
    }
}

fn parse_begin(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    Ok(PgOutputMessage::Begin(BeginMessage {
        final_lsn: cursor.read_u64::<BigEndian>()?,
        timestamp: cursor.read_i64::<BigEndian>()?,
        xid: cursor.read_u32::<BigEndian>()?,
    }))
}

fn parse_commit(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    Ok(PgOutputMessage::Commit(CommitMessage {
        flags: cursor.read_u8()?,
        commit_lsn: cursor.read_u64::<BigEndian>()?,
        end_lsn: cursor.read_u64::<BigEndian>()?,
        timestamp: cursor.read_i64::<BigEndian>()?,
    }))
}

fn parse_origin(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    Ok(PgOutputMessage::Origin(OriginMessage {
        origin_lsn: cursor.read_u64::<BigEndian>()?,
        origin_name: read_string(cursor)?,
    }))
}

fn parse_relation(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    let relation_id = cursor.read_u32::<BigEndian>()?;
    let namespace = read_string(cursor)?;
    let name = read_string(cursor)?;
    let replica_identity = cursor.read_u8()?.into();
    let num_columns = read_count(cursor)?;

    let mut columns = Vec::with_capacity(num_columns);
    for _ in 0..num_columns {
        columns.push(RelationColumn {
            flags: cursor.read_u8()?,
            name: read_string(cursor)?,
            type_oid: cursor.read_u32::<BigEndian>()?,
            type_modifier: cursor.read_i32::<BigEndian>()?,
        });
    }

    Ok(PgOutputMessage::Relation(RelationMessage {
        relation_id,
        namespace,
        name,
        replica_identity,
        columns,
    }))
}

fn parse_type(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    Ok(PgOutputMessage::Type(TypeMessage {
        type_id: cursor.read_u32::<BigEndian>()?,
        namespace: read_string(cursor)?,
        name: read_string(cursor)?,
    }))
}

fn parse_insert(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    let relation_id = cursor.read_u32::<BigEndian>()?;
    expect_new_tuple(cursor.read_u8()?)?;
    let tuple = parse_tuple(cursor)?;

    Ok(PgOutputMessage::Insert(InsertMessage { relation_id, tuple }))
}

fn parse_update(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    let relation_id = cursor.read_u32::<BigEndian>()?;

    let (old_tuple, new_tuple) = match cursor.read_u8()? {
        marker @ (b'K' | b'O') => {
            let old = parse_tuple(cursor)?;
            expect_new_tuple(cursor.read_u8()?)?;
            let new = parse_tuple(cursor)?;
            (Some((old_kind(marker), old)), new)
        }
        b'N' => (None, parse_tuple(cursor)?),
        other => {
            return Err(DecodeError::Malformed(format!(
                "unexpected tuple type in update: '{}'",
                other as char
            )));
        }
    };

    Ok(PgOutputMessage::Update(UpdateMessage {
        relation_id,
        old_tuple,
        new_tuple,
    }))
}

fn parse_delete(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    let relation_id = cursor.read_u32::<BigEndian>()?;
    let marker = cursor.read_u8()?;

    if marker != b'K' && marker != b'O' {
        return Err(DecodeError::Malformed(format!(
            "expected 'K' or 'O' for delete tuple, got '{}'",
            marker as char
        )));
    }

    Ok(PgOutputMessage::Delete(DeleteMessage {
        relation_id,
        old_kind: old_kind(marker),
        old_tuple: parse_tuple(cursor)?,
    }))
}

fn parse_truncate(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    let num_relations = cursor.read_u32::<BigEndian>()? as usize;
    let options = cursor.read_u8()?;

    let mut relation_ids = Vec::with_capacity(num_relations.min(1024));
    for _ in 0..num_relations {
        relation_ids.push(cursor.read_u32::<BigEndian>()?);
    }

    Ok(PgOutputMessage::Truncate(TruncateMessage {
        options,
        relation_ids,
    }))
}

fn parse_message(cursor: &mut Cursor<&[u8]>) -> DecodeResult<PgOutputMessage> {
    let flags = cursor.read_u8()?;
    let lsn = cursor.read_u64::<BigEndian>()?;
    let prefix = read_string(cursor)?;
    let content_len = cursor.read_u32::<BigEndian>()? as usize;
    let content = read_bytes(cursor, content_len)?;

    Ok(PgOutputMessage::Message(LogicalMessage {
        flags,
        lsn,
        prefix,
        content,
    }))
}

fn parse_tuple(cursor: &mut Cursor<&[u8]>) -> DecodeResult<TupleData> {
    let num_columns = read_count(cursor)?;
    let mut columns = Vec::with_capacity(num_columns);

    for _ in 0..num_columns {
        let value = match cursor.read_u8()? {
            b'n' => ColumnValue::Null,
            b'u' => ColumnValue::Unchanged,
            b't' => {
                let len = read_len(cursor)?;
                ColumnValue::Text(read_bytes(cursor, len)?)
            }
            b'b' => {
                let len = read_len(cursor)?;
                ColumnValue::Binary(read_bytes(cursor, len)?)
            }
            other => {
                return Err(DecodeError::Malformed(format!(
                    "unknown column value type: '{}' (0x{:02X})",
                    other as char, other
                )));
            }
        };
        columns.push(value);
    }

    Ok(TupleData { columns })
}

fn expect_new_tuple(marker: u8) -> DecodeResult<()> {
    if marker != b'N' {
        return Err(DecodeError::Malformed(format!(
            "expected 'N' for new tuple, got '{}'",
            marker as char
        )));
    }
    Ok(())
}

fn old_kind(marker: u8) -> OldTupleKind {
    if marker == b'O' {
        OldTupleKind::Full
    } else {
        OldTupleKind::Key
    }
}

fn read_count(cursor: &mut Cursor<&[u8]>) -> DecodeResult<usize> {
    let n = cursor.read_i16::<BigEndian>()?;
    usize::try_from(n).map_err(|_| DecodeError::Malformed(format!("negative column count {}", n)))
}

fn read_len(cursor: &mut Cursor<&[u8]>) -> DecodeResult<usize> {
    let n = cursor.read_i32::<BigEndian>()?;
    usize::try_from(n).map_err(|_| DecodeError::Malformed(format!("negative value length {}", n)))
}

/// Read exactly `len` bytes, refusing lengths beyond the remaining input.
fn read_bytes(cursor: &mut Cursor<&[u8]>, len: usize) -> DecodeResult<Vec<u8>> {
    let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
    if len > remaining {
        return Err(DecodeError::ShortRead(std::io::ErrorKind::UnexpectedEof.into()));
    }
    let mut buf = vec![0u8; len];
    cursor.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a null-terminated string.
fn read_string(cursor: &mut Cursor<&[u8]>) -> DecodeResult<String> {
    let mut bytes = Vec::new();
    loop {
        let b = cursor.read_u8()?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
