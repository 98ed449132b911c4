//! System catalog queries backing the schema catalog.

use tokio_postgres::Row;

use super::catalog::ReplicaIdentity;

/// User tables with their OID and planner row estimate.
pub const TABLES_QUERY: &str = r#"
    SELECT c.oid, n.nspname::text, c.relname::text, c.reltuples::bigint
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg_toast%'
"#;

/// Every live column with its type OID and the owning table's replica identity.
pub const COLUMNS_QUERY: &str = r#"
    SELECT n.nspname::text, c.relname::text, a.attname::text, a.atttypid, c.relreplident::text
    FROM pg_catalog.pg_attribute a
    JOIN pg_catalog.pg_class c ON c.oid = a.attrelid
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE a.attnum > 0
      AND NOT a.attisdropped
      AND c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg_toast%'
    ORDER BY n.nspname, c.relname, a.attnum
"#;

/// Per table: identity key columns (primary key or replica identity index),
/// generated columns and identity (`GENERATED ... AS IDENTITY`) columns.
pub const KEYS_QUERY: &str = r#"
    SELECT
        n.nspname::text,
        c.relname::text,
        COALESCE((
            SELECT array_agg(a.attname::text ORDER BY a.attnum)
            FROM pg_catalog.pg_index i
            JOIN pg_catalog.pg_attribute a
              ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
            WHERE i.indrelid = c.oid
              AND ((c.relreplident = 'i' AND i.indisreplident)
                OR (c.relreplident <> 'i' AND i.indisprimary))
        ), '{}'::text[]),
        COALESCE((
            SELECT array_agg(a.attname::text ORDER BY a.attnum)
            FROM pg_catalog.pg_attribute a
            WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
              AND a.attgenerated <> ''
        ), '{}'::text[]),
        COALESCE((
            SELECT array_agg(a.attname::text ORDER BY a.attnum)
            FROM pg_catalog.pg_attribute a
            WHERE a.attrelid = c.oid AND a.attnum > 0 AND NOT a.attisdropped
              AND a.attidentity <> ''
        ), '{}'::text[])
    FROM pg_catalog.pg_class c
    JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
    WHERE c.relkind IN ('r', 'p')
      AND n.nspname NOT IN ('pg_catalog', 'information_schema')
      AND n.nspname NOT LIKE 'pg_toast%'
"#;

pub const SERVER_VERSION_QUERY: &str = "SHOW server_version_num";

#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub oid: u32,
    pub schema: String,
    pub name: String,
    pub approximate_rows: i64,
}

impl From<&Row> for TableRow {
    fn from(row: &Row) -> Self {
        Self {
            oid: row.get(0),
            schema: row.get(1),
            name: row.get(2),
            approximate_rows: row.get(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRow {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub type_oid: u32,
    pub replica_identity: ReplicaIdentity,
}

impl From<&Row> for ColumnRow {
    fn from(row: &Row) -> Self {
        let replident: String = row.get(4);
        Self {
            schema: row.get(0),
            table: row.get(1),
            column: row.get(2),
            type_oid: row.get(3),
            replica_identity: replident
                .bytes()
                .next()
                .map(ReplicaIdentity::from)
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyRow {
    pub schema: String,
    pub table: String,
    pub identity_keys: Vec<String>,
    pub generated_columns: Vec<String>,
    pub identity_generation_columns: Vec<String>,
}

impl From<&Row> for KeyRow {
    fn from(row: &Row) -> Self {
        Self {
            schema: row.get(0),
            table: row.get(1),
            identity_keys: row.get(2),
            generated_columns: row.get(3),
            identity_generation_columns: row.get(4),
        }
    }
}
