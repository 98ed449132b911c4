use std::collections::HashMap;

use tracing::{debug, info};
use walcap_core::TableRef;

use super::queries::{ColumnRow, KeyRow, TableRow};
use crate::error::{CatalogError, PgResult};
use crate::query::QueryConn;

/// Which columns a table exposes in the old tuple of UPDATE/DELETE events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReplicaIdentity {
    /// 'd' - primary key columns
    #[default]
    Default,
    /// 'n' - nothing
    Nothing,
    /// 'f' - all columns
    Full,
    /// 'i' - columns of a chosen unique index
    Index,
}

impl From<u8> for ReplicaIdentity {
    fn from(b: u8) -> Self {
        match b {
            b'd' => ReplicaIdentity::Default,
            b'n' => ReplicaIdentity::Nothing,
            b'f' => ReplicaIdentity::Full,
            b'i' => ReplicaIdentity::Index,
            _ => ReplicaIdentity::Default,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub oid: u32,
    pub table: TableRef,
    pub approximate_rows: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnInfo {
    pub identity_keys: Vec<String>,
    pub generated_columns: Vec<String>,
    pub identity_generation_columns: Vec<String>,
}

impl ColumnInfo {
    /// Generated and identity-generation columns never appear in emitted tuples.
    pub fn is_excluded(&self, column: &str) -> bool {
        self.generated_columns.iter().any(|c| c == column)
            || self.identity_generation_columns.iter().any(|c| c == column)
    }

    pub fn is_identity_key(&self, column: &str) -> bool {
        self.identity_keys.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeInfo {
    pub oid: u32,
    pub replica_identity: ReplicaIdentity,
}

type ByTable<T> = HashMap<String, HashMap<String, T>>;

#[derive(Debug, Default)]
struct CatalogSnapshot {
    tables: HashMap<u32, TableInfo>,
    columns: ByTable<ColumnInfo>,
    types: ByTable<HashMap<String, TypeInfo>>,
    server_version: u32,
}

/// OID and column metadata for every user table, as of the last refresh.
#[derive(Debug, Default)]
pub struct SchemaCatalog {
    snapshot: CatalogSnapshot,
}

impl SchemaCatalog {
    /// An empty catalog; every lookup misses until it is refreshed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog by querying the database.
    pub async fn load<Q: QueryConn>(conn: &Q) -> PgResult<Self> {
        let mut catalog = Self::new();
        catalog.refresh(conn).await?;
        Ok(catalog)
    }

    /// Build a catalog directly from catalog rows.
    pub fn from_rows(
        tables: Vec<TableRow>,
        columns: Vec<ColumnRow>,
        keys: Vec<KeyRow>,
        server_version: u32,
    ) -> Self {
        let mut snapshot = CatalogSnapshot {
            server_version,
            ..Default::default()
        };

        for row in tables {
            snapshot
                .types
                .entry(row.schema.clone())
                .or_default()
                .entry(row.name.clone())
                .or_default();
            snapshot.tables.insert(
                row.oid,
                TableInfo {
                    oid: row.oid,
                    table: TableRef::new(row.schema, row.name),
                    approximate_rows: row.approximate_rows,
                },
            );
        }

        for row in columns {
            snapshot
                .types
                .entry(row.schema)
                .or_default()
                .entry(row.table)
                .or_default()
                .insert(
                    row.column,
                    TypeInfo {
                        oid: row.type_oid,
                        replica_identity: row.replica_identity,
                    },
                );
        }

        for row in keys {
            snapshot.columns.entry(row.schema).or_default().insert(
                row.table,
                ColumnInfo {
                    identity_keys: row.identity_keys,
                    generated_columns: row.generated_columns,
                    identity_generation_columns: row.identity_generation_columns,
                },
            );
        }

        Self { snapshot }
    }

    /// Re-run the catalog queries and atomically replace the in-memory maps.
    ///
    /// On failure the previous catalog stays in place untouched.
    pub async fn refresh<Q: QueryConn>(&mut self, conn: &Q) -> PgResult<()> {
        debug!("Refreshing schema catalog");

        let tables = conn.catalog_tables().await?;
        let columns = conn.catalog_columns().await?;
        let keys = conn.catalog_keys().await?;
        let server_version = conn.server_version().await?;

        *self = Self::from_rows(tables, columns, keys, server_version);

        info!(
            tables = self.snapshot.tables.len(),
            server_version, "Schema catalog loaded"
        );
        Ok(())
    }

    pub fn table_by_oid(&self, oid: u32) -> Option<&TableInfo> {
        self.snapshot.tables.get(&oid)
    }

    pub fn column_info(&self, schema: &str, table: &str) -> Result<&ColumnInfo, CatalogError> {
        self.table_types(schema, table)?;
        self.snapshot
            .columns
            .get(schema)
            .and_then(|tables| tables.get(table))
            .ok_or_else(|| CatalogError::IdentityMissing {
                schema: schema.to_string(),
                table: table.to_string(),
            })
    }

    pub fn type_info(
        &self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Result<&TypeInfo, CatalogError> {
        self.table_types(schema, table)?
            .get(column)
            .ok_or_else(|| CatalogError::ColumnMissing {
                schema: schema.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    /// Identity key columns in attribute order; empty when the table is unknown.
    pub fn key_columns(&self, schema: &str, table: &str) -> Vec<String> {
        self.column_info(schema, table)
            .map(|info| info.identity_keys.clone())
            .unwrap_or_default()
    }

    /// Numeric server version (`server_version_num`, e.g. 160002).
    pub fn server_version(&self) -> u32 {
        self.snapshot.server_version
    }

    pub fn len(&self) -> usize {
        self.snapshot.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.tables.is_empty()
    }

    fn table_types(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<&HashMap<String, TypeInfo>, CatalogError> {
        let tables = self
            .snapshot
            .types
            .get(schema)
            .ok_or_else(|| CatalogError::NamespaceMissing(schema.to_string()))?;
        tables.get(table).ok_or_else(|| CatalogError::TableMissing {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_catalog() -> SchemaCatalog {
        SchemaCatalog::from_rows(
            vec![TableRow {
                oid: 16384,
                schema: "public".into(),
                name: "users".into(),
                approximate_rows: 12,
            }],
            vec![
                ColumnRow {
                    schema: "public".into(),
                    table: "users".into(),
                    column: "id".into(),
                    type_oid: 23,
                    replica_identity: ReplicaIdentity::Default,
                },
                ColumnRow {
                    schema: "public".into(),
                    table: "users".into(),
                    column: "name".into(),
                    type_oid: 25,
                    replica_identity: ReplicaIdentity::Default,
                },
            ],
            vec![KeyRow {
                schema: "public".into(),
                table: "users".into(),
                identity_keys: vec!["id".into()],
                generated_columns: vec!["name_upper".into()],
                identity_generation_columns: vec![],
            }],
            160002,
        )
    }

    #[test]
    fn test_table_by_oid() {
        let catalog = users_catalog();
        let info = catalog.table_by_oid(16384).unwrap();
        assert_eq!(info.table, TableRef::new("public", "users"));
        assert_eq!(info.approximate_rows, 12);
        assert!(catalog.table_by_oid(1).is_none());
    }

    #[test]
    fn test_type_info() {
        let catalog = users_catalog();
        let info = catalog.type_info("public", "users", "id").unwrap();
        assert_eq!(info.oid, 23);
        assert_eq!(info.replica_identity, ReplicaIdentity::Default);
    }

    #[test]
    fn test_lookup_errors_are_distinguished() {
        let catalog = users_catalog();
        assert_eq!(
            catalog.type_info("audit", "users", "id"),
            Err(CatalogError::NamespaceMissing("audit".into()))
        );
        assert!(matches!(
            catalog.type_info("public", "orders", "id"),
            Err(CatalogError::TableMissing { .. })
        ));
        assert!(matches!(
            catalog.type_info("public", "users", "email"),
            Err(CatalogError::ColumnMissing { .. })
        ));
    }

    #[test]
    fn test_identity_missing() {
        let catalog = SchemaCatalog::from_rows(
            vec![TableRow {
                oid: 1,
                schema: "public".into(),
                name: "events".into(),
                approximate_rows: 0,
            }],
            vec![],
            vec![],
            150000,
        );
        assert!(matches!(
            catalog.column_info("public", "events"),
            Err(CatalogError::IdentityMissing { .. })
        ));
        assert!(catalog.key_columns("public", "events").is_empty());
    }

    #[test]
    fn test_column_info() {
        let catalog = users_catalog();
        let info = catalog.column_info("public", "users").unwrap();
        assert!(info.is_identity_key("id"));
        assert!(info.is_excluded("name_upper"));
        assert!(!info.is_excluded("name"));
        assert_eq!(catalog.key_columns("public", "users"), vec!["id".to_string()]);
        assert_eq!(catalog.server_version(), 160002);
    }

    #[test]
    fn test_replica_identity_from_byte() {
        assert_eq!(ReplicaIdentity::from(b'f'), ReplicaIdentity::Full);
        assert_eq!(ReplicaIdentity::from(b'n'), ReplicaIdentity::Nothing);
        assert_eq!(ReplicaIdentity::from(b'i'), ReplicaIdentity::Index);
        assert_eq!(ReplicaIdentity::from(b'?'), ReplicaIdentity::Default);
    }
}
