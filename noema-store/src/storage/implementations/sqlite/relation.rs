//! SQLite implementation of RelationStore

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, Row};

use super::SqliteStore;
use crate::storage::error::StorageResult;
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::EntityId;
use crate::storage::traits::{check_relation, RelationStore};
use crate::storage::types::{EntityRelation, RelationType};

/// Initialize relation schema
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Entity relations: typed edges between any two ids
        CREATE TABLE IF NOT EXISTS entity_relations (
            from_id TEXT NOT NULL,
            to_id TEXT NOT NULL,
            relation TEXT NOT NULL,
            metadata TEXT,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (from_id, to_id, relation)
        );

        CREATE INDEX IF NOT EXISTS idx_entity_relations_to ON entity_relations(to_id, relation);
        "#,
    )?;
    Ok(())
}

type RelationRow = (EntityId, EntityId, String, Option<String>, i64);

fn relation_from_row(row: &Row<'_>) -> rusqlite::Result<RelationRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn into_relation((from_id, to_id, relation, metadata, created_at): RelationRow) -> StorageResult<EntityRelation> {
    Ok(EntityRelation {
        from_id,
        to_id,
        relation: RelationType::new(relation),
        metadata: metadata.as_deref().map(serde_json::from_str).transpose()?,
        created_at,
    })
}

/// Check the relation's rules, then insert or replace it
pub(super) fn put_relation(conn: &Connection, mut relation: EntityRelation) -> StorageResult<EntityRelation> {
    let existing = {
        let mut stmt =
            conn.prepare("SELECT to_id FROM entity_relations WHERE from_id = ?1 AND relation = ?2")?;
        stmt.query_map(
            params![relation.from_id.as_str(), relation.relation.as_str()],
            |row| row.get::<_, EntityId>(0),
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?
    };
    check_relation(&relation.from_id, &relation.to_id, &relation.relation, existing.iter())?;

    relation.created_at = unix_timestamp();
    let metadata = relation
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        "INSERT OR REPLACE INTO entity_relations (from_id, to_id, relation, metadata, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            relation.from_id.as_str(),
            relation.to_id.as_str(),
            relation.relation.as_str(),
            metadata,
            relation.created_at,
        ],
    )?;
    Ok(relation)
}

/// Edges where `column` equals `id`, newest first
pub(super) fn query_edges(
    conn: &Connection,
    column: &str,
    id: &EntityId,
    relation: Option<&RelationType>,
) -> StorageResult<Vec<EntityRelation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT from_id, to_id, relation, metadata, created_at
         FROM entity_relations
         WHERE {} = ?1 AND (?2 IS NULL OR relation = ?2)
         ORDER BY created_at DESC, rowid DESC",
        column
    ))?;
    let rows = stmt
        .query_map(
            params![id.as_str(), relation.map(|r| r.as_str())],
            relation_from_row,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(into_relation).collect()
}

#[async_trait]
impl RelationStore for SqliteStore {
    async fn link(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: RelationType,
        metadata: Option<serde_json::Value>,
    ) -> StorageResult<EntityRelation> {
        let mut relation = EntityRelation::new(from_id.clone(), to_id.clone(), relation);
        relation.metadata = metadata;

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let relation = put_relation(&tx, relation)?;
        tx.commit()?;
        Ok(relation)
    }

    async fn unlink(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: &RelationType,
    ) -> StorageResult<bool> {
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM entity_relations WHERE from_id = ?1 AND to_id = ?2 AND relation = ?3",
            params![from_id.as_str(), to_id.as_str(), relation.as_str()],
        )?;
        Ok(removed > 0)
    }

    async fn backlinks(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>> {
        query_edges(&self.conn(), "to_id", id, relation)
    }

    async fn relations_from(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>> {
        query_edges(&self.conn(), "from_id", id, relation)
    }
}
