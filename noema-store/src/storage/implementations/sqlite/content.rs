//! SQLite implementation of ContentStore

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{parse_column, SqliteStore};
use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::helper::{content_address, unix_timestamp};
use crate::storage::ids::ContentId;
use crate::storage::traits::ContentStore;
use crate::storage::types::{
    stored, ContentBlock, ContentOrigin, ContentType, PutResult, StoredContentBlock,
};

/// Initialize content schema
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Content blocks: immutable, keyed by content address
        CREATE TABLE IF NOT EXISTS content_blocks (
            id TEXT PRIMARY KEY,
            content_type TEXT NOT NULL,
            body BLOB NOT NULL,
            origin_kind TEXT NOT NULL,
            origin_user_id TEXT,
            origin_model_id TEXT,
            origin_source_id TEXT,
            origin_parent_id TEXT,
            created_at INTEGER NOT NULL,
            -- Refreshed by every put, deduplicated ones included
            last_put_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_content_blocks_last_put ON content_blocks(last_put_at);
        "#,
    )?;
    Ok(())
}

fn block_from_row(row: &Row<'_>) -> rusqlite::Result<StoredContentBlock> {
    let content_type: String = row.get(1)?;
    let block = ContentBlock {
        content_type: ContentType::new(content_type),
        body: row.get(2)?,
        origin: ContentOrigin {
            kind: parse_column(row, 3)?,
            user_id: row.get(4)?,
            model_id: row.get(5)?,
            source_id: row.get(6)?,
            parent_id: row.get(7)?,
        },
    };
    Ok(stored(row.get(0)?, block, row.get(8)?))
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn put(&self, content: ContentBlock) -> StorageResult<PutResult> {
        let id = content_address(content.content_type.as_str(), &content.body);
        let now = unix_timestamp();
        let conn = self.conn();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO content_blocks
                (id, content_type, body, origin_kind, origin_user_id, origin_model_id,
                 origin_source_id, origin_parent_id, created_at, last_put_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            params![
                id.as_str(),
                content.content_type.as_str(),
                content.body,
                content.origin.kind.as_str(),
                content.origin.user_id.as_ref().map(|u| u.as_str()),
                content.origin.model_id,
                content.origin.source_id,
                content.origin.parent_id.as_ref().map(|p| p.as_str()),
                now,
            ],
        )?;
        if inserted == 0 {
            conn.execute(
                "UPDATE content_blocks SET last_put_at = MAX(last_put_at, ?1) WHERE id = ?2",
                params![now, id.as_str()],
            )?;
        }

        Ok(PutResult {
            id,
            is_new: inserted > 0,
        })
    }

    async fn get(&self, id: &ContentId) -> StorageResult<StoredContentBlock> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, content_type, body, origin_kind, origin_user_id, origin_model_id,
                    origin_source_id, origin_parent_id, created_at
             FROM content_blocks WHERE id = ?1",
            params![id.as_str()],
            block_from_row,
        )
        .optional()?
        .ok_or_else(|| StorageError::not_found(RecordKind::Content, id))
    }

    async fn exists(&self, id: &ContentId) -> StorageResult<bool> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT 1 FROM content_blocks WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn count(&self) -> StorageResult<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM content_blocks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    async fn reference_count(&self, id: &ContentId) -> StorageResult<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM usages WHERE content_id = ?1",
            params![id.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn sweep_unreferenced(&self, put_before: i64) -> StorageResult<Vec<ContentId>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let doomed = {
            let mut stmt = tx.prepare(
                "SELECT id FROM content_blocks b
                 WHERE b.last_put_at < ?1
                   AND NOT EXISTS (SELECT 1 FROM usages u WHERE u.content_id = b.id)",
            )?;
            let rows = stmt.query_map(params![put_before], |row| row.get::<_, ContentId>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for id in &doomed {
            tx.execute("DELETE FROM content_blocks WHERE id = ?1", params![id.as_str()])?;
        }

        tx.commit()?;
        Ok(doomed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::UserId;
    use crate::storage::types::OriginKind;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let origin = ContentOrigin::user().with_user(UserId::from_string("u1"));
        let put = store
            .put(ContentBlock::markdown("**bold**").with_origin(origin))
            .await
            .unwrap();
        assert!(put.is_new);

        let block = store.get(&put.id).await.unwrap();
        assert_eq!(block.id, put.id);
        assert_eq!(block.content_type, ContentType::markdown());
        assert_eq!(block.text(), "**bold**");
        assert_eq!(block.origin.kind, OriginKind::User);
        assert_eq!(block.origin.user_id.as_ref().map(|u| u.as_str()), Some("u1"));
    }

    #[tokio::test]
    async fn test_put_dedupes() {
        let store = SqliteStore::in_memory().unwrap();
        let a = store.put(ContentBlock::plain("same")).await.unwrap();
        let b = store
            .put(ContentBlock::plain("same").with_origin(ContentOrigin::system()))
            .await
            .unwrap();
        assert!(!b.is_new);
        assert_eq!(a.id, b.id);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.get(&a.id).await.unwrap().origin.kind, OriginKind::User);
    }

    #[tokio::test]
    async fn test_missing_block() {
        let store = SqliteStore::in_memory().unwrap();
        let id = ContentId::from_string("missing");
        assert!(!store.exists(&id).await.unwrap());
        assert!(matches!(store.get(&id).await, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_sweep_unreferenced() {
        let store = SqliteStore::in_memory().unwrap();
        let orphan = store.put(ContentBlock::plain("orphan")).await.unwrap().id;

        assert!(store.sweep_unreferenced(0).await.unwrap().is_empty());
        assert_eq!(store.sweep_unreferenced(i64::MAX).await.unwrap(), vec![orphan.clone()]);
        assert!(!store.exists(&orphan).await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_put_defers_sweep() {
        let store = SqliteStore::in_memory().unwrap();
        let draft = store.put(ContentBlock::plain("draft")).await.unwrap().id;
        let created = store.get(&draft).await.unwrap().created_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(!store.put(ContentBlock::plain("draft")).await.unwrap().is_new);

        assert!(store.sweep_unreferenced(created + 1).await.unwrap().is_empty());
        assert!(store.exists(&draft).await.unwrap());
        // Creation time is kept
        assert_eq!(store.get(&draft).await.unwrap().created_at, created);
    }
}
