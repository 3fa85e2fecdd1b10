//! StructureStore trait for threads, turns, spans and usages

use async_trait::async_trait;

use crate::storage::error::StorageResult;
use crate::storage::ids::{ClientToken, SpanId, ThreadId, TurnId};
use crate::storage::types::{
    NewUsage, Role, SpanWithUsages, StoredSpan, StoredThread, StoredTurn, StoredUsage,
    StoredView, TurnWithSpans, Written,
};

/// Trait for the structural graph
///
/// Turns form a tree inside their thread through `parent_turn_id`. Spans are
/// append-only alternatives at a turn and are never removed; turns and spans
/// can only be flagged (soft delete, withdraw).
///
/// Structural writes take a `ClientToken`. Replaying a token returns the
/// record the first call created, flagged `is_new == false`.
#[async_trait]
pub trait StructureStore: Send + Sync {
    // ========================================================================
    // Threads
    // ========================================================================

    /// Create a thread together with its main view
    async fn create_thread(&self, name: Option<&str>)
    -> StorageResult<(StoredThread, StoredView)>;

    async fn get_thread(&self, id: &ThreadId) -> StorageResult<StoredThread>;

    // ========================================================================
    // Turns
    // ========================================================================

    /// Append a turn after the tip of the thread's default path
    ///
    /// The default path follows the most recently created child at every
    /// position, skipping nothing.
    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>>;

    /// Append a turn after an explicit parent (None creates a root turn)
    async fn append_turn_after(
        &self,
        thread_id: &ThreadId,
        parent_turn_id: Option<&TurnId>,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>>;

    /// Create a sibling of `at_turn_id` holding one span with `content`
    ///
    /// The sibling shares the original's parent, role and sequence. Turns
    /// after the original stay on the old branch.
    async fn splice(
        &self,
        thread_id: &ThreadId,
        at_turn_id: &TurnId,
        content: &[NewUsage],
        token: &ClientToken,
    ) -> StorageResult<Written<TurnWithSpans>>;

    async fn get_turn(&self, id: &TurnId) -> StorageResult<StoredTurn>;

    /// All turns of a thread in creation order, soft-deleted ones included
    async fn list_turns(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredTurn>>;

    /// Flag a turn as deleted; returns false if it already was
    async fn soft_delete_turn(&self, id: &TurnId) -> StorageResult<bool>;

    // ========================================================================
    // Spans and usages
    // ========================================================================

    /// Add a span to a turn
    ///
    /// Fails with `NotFound` for an unknown turn and `IntegrityViolation`
    /// when a usage names content that is not stored; nothing is written in
    /// either case.
    async fn add_span(
        &self,
        turn_id: &TurnId,
        usages: &[NewUsage],
        model_id: Option<&str>,
        token: &ClientToken,
    ) -> StorageResult<Written<SpanWithUsages>>;

    async fn get_span(&self, id: &SpanId) -> StorageResult<StoredSpan>;

    /// Spans of a turn in creation order
    async fn get_spans(&self, turn_id: &TurnId) -> StorageResult<Vec<StoredSpan>>;

    /// Usages of a span in sequence order
    async fn get_usages(&self, span_id: &SpanId) -> StorageResult<Vec<StoredUsage>>;

    /// Hide a span from fallback resolution; returns false if already withdrawn
    async fn withdraw_span(&self, id: &SpanId) -> StorageResult<bool>;

    /// Total number of usages across all spans
    async fn usage_count(&self) -> StorageResult<usize>;
}
