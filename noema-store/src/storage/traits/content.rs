//! ContentStore trait for immutable, content-addressed blocks

use async_trait::async_trait;

use crate::storage::error::StorageResult;
use crate::storage::ids::ContentId;
use crate::storage::types::{ContentBlock, PutResult, StoredContentBlock};

/// Trait for content-addressed storage
///
/// Blocks are immutable and deduplicated: the id is the SHA-256 of the
/// content type and body, so putting the same bytes twice returns the same id
/// and leaves the first entry (including its origin) untouched. Every put,
/// deduplicated or not, refreshes the block's last-put time, which is what
/// garbage collection measures against.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a block, or return the existing entry with the same address
    async fn put(&self, content: ContentBlock) -> StorageResult<PutResult>;

    /// Get a block by id; `NotFound` when absent
    async fn get(&self, id: &ContentId) -> StorageResult<StoredContentBlock>;

    /// Get a block's body as text (lossy UTF-8)
    async fn get_text(&self, id: &ContentId) -> StorageResult<String> {
        Ok(self.get(id).await?.text().into_owned())
    }

    async fn exists(&self, id: &ContentId) -> StorageResult<bool>;

    /// Number of stored blocks
    async fn count(&self) -> StorageResult<usize>;

    /// Number of usages pointing at a block
    async fn reference_count(&self, id: &ContentId) -> StorageResult<usize>;

    /// Delete blocks no usage references whose last put was before `put_before`
    ///
    /// The reference check and the deletion happen in one atomic unit, so a
    /// usage added concurrently either sees the block or prevents its removal.
    async fn sweep_unreferenced(&self, put_before: i64) -> StorageResult<Vec<ContentId>>;
}
