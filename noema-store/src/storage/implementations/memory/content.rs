//! In-memory ContentStore implementation

use async_trait::async_trait;

use super::MemoryStore;
use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::helper::{content_address, unix_timestamp};
use crate::storage::ids::ContentId;
use crate::storage::traits::ContentStore;
use crate::storage::types::{stored, ContentBlock, PutResult, StoredContentBlock};

#[async_trait]
impl ContentStore for MemoryStore {
    async fn put(&self, content: ContentBlock) -> StorageResult<PutResult> {
        let id = content_address(content.content_type.as_str(), &content.body);
        let now = unix_timestamp();
        let mut state = self.lock();
        state.last_put.insert(id.clone(), now);

        if state.blocks.contains_key(&id) {
            return Ok(PutResult { id, is_new: false });
        }

        state.blocks.insert(id.clone(), stored(id.clone(), content, now));
        Ok(PutResult { id, is_new: true })
    }

    async fn get(&self, id: &ContentId) -> StorageResult<StoredContentBlock> {
        self.lock()
            .blocks
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(RecordKind::Content, id))
    }

    async fn exists(&self, id: &ContentId) -> StorageResult<bool> {
        Ok(self.lock().blocks.contains_key(id))
    }

    async fn count(&self) -> StorageResult<usize> {
        Ok(self.lock().blocks.len())
    }

    async fn reference_count(&self, id: &ContentId) -> StorageResult<usize> {
        Ok(self.lock().content_refs.get(id).copied().unwrap_or(0))
    }

    async fn sweep_unreferenced(&self, put_before: i64) -> StorageResult<Vec<ContentId>> {
        let mut guard = self.lock();
        let state = &mut *guard;

        let doomed: Vec<ContentId> = state
            .blocks
            .values()
            .filter(|b| state.last_put.get(&b.id).copied().unwrap_or(b.created_at) < put_before)
            .filter(|b| state.content_refs.get(&b.id).copied().unwrap_or(0) == 0)
            .map(|b| b.id.clone())
            .collect();
        for id in &doomed {
            state.blocks.remove(id);
            state.last_put.remove(id);
        }
        Ok(doomed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::ClientToken;
    use crate::storage::traits::StructureStore;
    use crate::storage::types::{ContentOrigin, ContentType, NewUsage, OriginKind, Role};

    #[tokio::test]
    async fn test_put_dedupes() {
        let store = MemoryStore::new();

        let first = store
            .put(ContentBlock::plain("Hello").with_origin(ContentOrigin::user()))
            .await
            .unwrap();
        let second = store
            .put(ContentBlock::plain("Hello").with_origin(ContentOrigin::assistant("claude")))
            .await
            .unwrap();

        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.id, second.id);
        assert_eq!(store.count().await.unwrap(), 1);

        // First writer's origin is kept
        let block = store.get(&first.id).await.unwrap();
        assert_eq!(block.origin.kind, OriginKind::User);
    }

    #[tokio::test]
    async fn test_content_type_is_part_of_address() {
        let store = MemoryStore::new();
        let plain = store.put(ContentBlock::plain("# Title")).await.unwrap();
        let md = store.put(ContentBlock::markdown("# Title")).await.unwrap();
        assert_ne!(plain.id, md.id);
        assert_eq!(store.get(&md.id).await.unwrap().content_type, ContentType::markdown());
    }

    #[tokio::test]
    async fn test_nul_in_type_does_not_collide() {
        let store = MemoryStore::new();
        let a = store
            .put(ContentBlock::bytes(b"\0bX".to_vec(), ContentType::new("a")))
            .await
            .unwrap();
        let b = store
            .put(ContentBlock::bytes(b"bX".to_vec(), ContentType::new("a\0")))
            .await
            .unwrap();

        assert!(b.is_new);
        assert_ne!(a.id, b.id);
        assert_eq!(store.get(&b.id).await.unwrap().content_type, ContentType::new("a\0"));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let err = store.get(&ContentId::from_string("nope")).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: RecordKind::Content, .. }));
        assert!(!store.exists(&ContentId::from_string("nope")).await.unwrap());
    }

    #[tokio::test]
    async fn test_get_text() {
        let store = MemoryStore::new();
        let put = store.put(ContentBlock::plain("héllo")).await.unwrap();
        assert_eq!(store.get_text(&put.id).await.unwrap(), "héllo");
    }

    #[tokio::test]
    async fn test_sweep_keeps_referenced_and_recent() {
        let store = MemoryStore::new();
        let used = store.put(ContentBlock::plain("used")).await.unwrap().id;
        let orphan = store.put(ContentBlock::plain("orphan")).await.unwrap().id;

        let (thread, _) = store.create_thread(None).await.unwrap();
        let turn = store
            .append_turn(&thread.id, Role::User, &ClientToken::new())
            .await
            .unwrap()
            .record;
        store
            .add_span(&turn.id, &[NewUsage::message(used.clone())], None, &ClientToken::new())
            .await
            .unwrap();
        assert_eq!(store.reference_count(&used).await.unwrap(), 1);
        assert_eq!(store.reference_count(&orphan).await.unwrap(), 0);

        // Cutoff in the past protects everything
        assert!(store.sweep_unreferenced(0).await.unwrap().is_empty());

        let swept = store.sweep_unreferenced(i64::MAX).await.unwrap();
        assert_eq!(swept, vec![orphan.clone()]);
        assert!(store.exists(&used).await.unwrap());
        assert!(!store.exists(&orphan).await.unwrap());
    }

    #[tokio::test]
    async fn test_repeated_put_defers_sweep() {
        let store = MemoryStore::new();
        let draft = store.put(ContentBlock::plain("draft")).await.unwrap().id;
        let first_put = store.get(&draft).await.unwrap().created_at;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let again = store.put(ContentBlock::plain("draft")).await.unwrap();
        assert!(!again.is_new);

        // Old enough by creation time, but put again since
        assert!(store.sweep_unreferenced(first_put + 1).await.unwrap().is_empty());

        let (thread, _) = store.create_thread(None).await.unwrap();
        let turn = store
            .append_turn(&thread.id, Role::User, &ClientToken::new())
            .await
            .unwrap()
            .record;
        store
            .add_span(&turn.id, &[NewUsage::message(draft.clone())], None, &ClientToken::new())
            .await
            .unwrap();
        assert!(store.exists(&draft).await.unwrap());
    }
}
