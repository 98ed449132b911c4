//! Column layouts announced by RELATION messages.
//!
//! The server sends a RELATION message before the first change on each table
//! in a session (and again after its definition changes). Tuples in later
//! INSERT/UPDATE/DELETE messages are positional, so the layout is kept here
//! keyed by relation OID.

use std::collections::HashMap;

use walcap_core::TableRef;

use super::pgoutput::RelationMessage;
use crate::error::{CatalogError, DecodeError};
use crate::schema::{ReplicaIdentity, SchemaCatalog};

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutColumn {
    pub name: String,
    pub type_oid: u32,
    /// Part of the replica identity.
    pub key: bool,
    /// Generated or identity-generated; never emitted.
    pub excluded: bool,
}

/// A relation's columns in wire order, cross-checked against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationLayout {
    pub relation_id: u32,
    pub table: TableRef,
    pub replica_identity: ReplicaIdentity,
    pub columns: Vec<LayoutColumn>,
}

impl RelationLayout {
    /// Validate a RELATION message against the catalog and build its layout.
    ///
    /// Fails with `CatalogMismatch` when the catalog does not know the table or
    /// one of its columns, or records a different type for a column.
    pub fn build(msg: &RelationMessage, catalog: &SchemaCatalog) -> Result<Self, DecodeError> {
        let mismatch = |reason: String| DecodeError::CatalogMismatch {
            relation_id: msg.relation_id,
            reason,
        };

        let column_info = match catalog.column_info(&msg.namespace, &msg.name) {
            Ok(info) => Some(info),
            Err(CatalogError::IdentityMissing { .. }) => None,
            Err(e) => return Err(mismatch(e.to_string())),
        };

        let mut columns = Vec::with_capacity(msg.columns.len());
        for col in &msg.columns {
            let known = catalog
                .type_info(&msg.namespace, &msg.name, &col.name)
                .map_err(|e| mismatch(e.to_string()))?;
            if known.oid != col.type_oid {
                return Err(mismatch(format!(
                    "column '{}' has type {} but the catalog records {}",
                    col.name, col.type_oid, known.oid
                )));
            }

            let (key, excluded) = match column_info {
                Some(info) if !info.identity_keys.is_empty() => {
                    (info.is_identity_key(&col.name), info.is_excluded(&col.name))
                }
                Some(info) => (col.is_key(), info.is_excluded(&col.name)),
                None => (col.is_key(), false),
            };

            columns.push(LayoutColumn {
                name: col.name.clone(),
                type_oid: col.type_oid,
                key,
                excluded,
            });
        }

        Ok(Self {
            relation_id: msg.relation_id,
            table: TableRef::new(msg.namespace.clone(), msg.name.clone()),
            replica_identity: msg.replica_identity,
            columns,
        })
    }
}

/// Relation OID to layout.
#[derive(Debug, Default)]
pub struct RelationCache {
    relations: HashMap<u32, RelationLayout>,
}

impl RelationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, layout: RelationLayout) {
        self.relations.insert(layout.relation_id, layout);
    }

    pub fn get(&self, relation_id: u32) -> Option<&RelationLayout> {
        self.relations.get(&relation_id)
    }

    /// Forget every layout; the server resends them after a reconnect.
    pub fn clear(&mut self) {
        self.relations.clear();
    }

    pub fn len(&self) -> usize {
        self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::pgoutput::RelationColumn;
    use crate::schema::{ColumnRow, KeyRow, TableRow};

    fn catalog(identity_keys: Vec<String>) -> SchemaCatalog {
        let column = |name: &str, type_oid| ColumnRow {
            schema: "public".into(),
            table: "users".into(),
            column: name.into(),
            type_oid,
            replica_identity: ReplicaIdentity::Default,
        };
        SchemaCatalog::from_rows(
            vec![TableRow {
                oid: 16384,
                schema: "public".into(),
                name: "users".into(),
                approximate_rows: 0,
            }],
            vec![column("id", 23), column("name", 25), column("slug", 25)],
            vec![KeyRow {
                schema: "public".into(),
                table: "users".into(),
                identity_keys,
                generated_columns: vec!["slug".into()],
                identity_generation_columns: vec![],
            }],
            160000,
        )
    }

    fn relation(columns: &[(&str, u32, u8)]) -> RelationMessage {
        RelationMessage {
            relation_id: 16384,
            namespace: "public".into(),
            name: "users".into(),
            replica_identity: ReplicaIdentity::Default,
            columns: columns
                .iter()
                .map(|(name, type_oid, flags)| RelationColumn {
                    flags: *flags,
                    name: name.to_string(),
                    type_oid: *type_oid,
                    type_modifier: -1,
                })
                .collect(),
        }
    }

    #[test]
    fn test_build_layout() {
        let layout = RelationLayout::build(
            &relation(&[("id", 23, 1), ("name", 25, 0), ("slug", 25, 0)]),
            &catalog(vec!["id".into()]),
        )
        .unwrap();

        assert_eq!(layout.table, TableRef::new("public", "users"));
        assert!(layout.columns[0].key);
        assert!(!layout.columns[1].key);
        assert!(layout.columns[2].excluded);
    }

    #[test]
    fn test_key_falls_back_to_relation_flags() {
        let layout = RelationLayout::build(
            &relation(&[("id", 23, 0), ("name", 25, 1)]),
            &catalog(vec![]),
        )
        .unwrap();
        assert!(!layout.columns[0].key);
        assert!(layout.columns[1].key);
    }

    #[test]
    fn test_type_mismatch() {
        let err = RelationLayout::build(&relation(&[("id", 20, 1)]), &catalog(vec![])).unwrap_err();
        match err {
            DecodeError::CatalogMismatch { relation_id, reason } => {
                assert_eq!(relation_id, 16384);
                assert!(reason.contains("'id'"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_table_and_column() {
        let mut msg = relation(&[("id", 23, 1), ("email", 25, 0)]);
        assert!(matches!(
            RelationLayout::build(&msg, &catalog(vec![])),
            Err(DecodeError::CatalogMismatch { .. })
        ));

        msg.name = "orders".into();
        assert!(matches!(
            RelationLayout::build(&msg, &catalog(vec![])),
            Err(DecodeError::CatalogMismatch { .. })
        ));
    }

    #[test]
    fn test_cache_replaces_layout() {
        let catalog = catalog(vec![]);
        let mut cache = RelationCache::new();
        assert!(cache.is_empty());

        cache.insert(RelationLayout::build(&relation(&[("id", 23, 1)]), &catalog).unwrap());
        cache.insert(
            RelationLayout::build(&relation(&[("id", 23, 1), ("name", 25, 0)]), &catalog).unwrap(),
        );
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(16384).unwrap().columns.len(), 2);

        cache.clear();
        assert!(cache.get(16384).is_none());
    }
}
