//! ViewStore trait for views, selections and their history

use async_trait::async_trait;

use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::ids::{SpanId, ThreadId, TurnId, ViewId};
use crate::storage::types::{
    EditPlan, EditedTurn, EntityRelation, SelectionRecord, SpawnPlan, SpawnedThread, StoredSpan,
    StoredTurn, StoredView, ThreadSnapshot, View, ViewUpdate, Written,
};

/// Trait for view storage
///
/// Mutations accept an optional expected revision. When given and it differs
/// from the stored revision the call fails with `ConcurrentModification` and
/// writes nothing.
///
/// `fork_view` and `create_subconversation` also write lineage relations, so a
/// `ViewStore` must share its backing store with the `RelationStore` of the
/// same storage configuration.
#[async_trait]
pub trait ViewStore: Send + Sync {
    /// Create an additional view on a thread with an empty selection
    async fn create_view(&self, thread_id: &ThreadId, name: Option<&str>)
    -> StorageResult<StoredView>;

    /// Get a view, including soft-deleted ones
    async fn get_view(&self, id: &ViewId) -> StorageResult<StoredView>;

    /// Live views of a thread in creation order
    async fn list_views(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredView>>;

    /// Read the view with its thread's turns, spans and usages at one point
    async fn snapshot(&self, view_id: &ViewId) -> StorageResult<ThreadSnapshot>;

    /// Select `span_id` at `turn_id` and append a history record
    async fn select_span(
        &self,
        view_id: &ViewId,
        turn_id: &TurnId,
        span_id: &SpanId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView>;

    /// Fork a view and record `forked_from` (child -> parent) atomically
    ///
    /// The parent is not modified.
    async fn fork_view(
        &self,
        view_id: &ViewId,
        name: Option<&str>,
        expected_revision: Option<u64>,
    ) -> StorageResult<(StoredView, EntityRelation)>;

    async fn update_view(
        &self,
        view_id: &ViewId,
        update: &ViewUpdate,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView>;

    /// Soft delete a view
    async fn delete_view(
        &self,
        view_id: &ViewId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView>;

    /// Every selection ever committed on the view, oldest first
    async fn selection_history(&self, view_id: &ViewId) -> StorageResult<Vec<SelectionRecord>>;

    /// Write a spawned child thread in one unit: thread, main view, turns,
    /// spans, usages, selections and the `spawned_from` relation
    async fn create_subconversation(&self, plan: &SpawnPlan) -> StorageResult<SpawnedThread>;

    /// Splice a sibling of `plan.turn_id` and select it, in one unit
    ///
    /// Without `plan.fork` the source view selects the new span. With it, the
    /// source view first pins the span it currently shows at that position
    /// (only when it shows it through fallback), then a fork of the source
    /// selects the new span. The pin is a committed selection on the source:
    /// it bumps the revision and is returned as `EditedTurn::source`.
    ///
    /// Replaying `plan.token` returns the earlier edit without writing.
    async fn edit_turn(&self, plan: &EditPlan) -> StorageResult<Written<EditedTurn>>;
}

/// Reject writes to a soft-deleted view
pub(crate) fn check_live(view: &StoredView) -> StorageResult<()> {
    if view.is_deleted {
        return Err(StorageError::not_found(RecordKind::View, &view.id));
    }
    Ok(())
}

pub(crate) fn check_revision(
    view_id: &ViewId,
    view: &View,
    expected: Option<u64>,
) -> StorageResult<()> {
    match expected {
        Some(expected) if expected != view.revision => {
            tracing::warn!(
                view_id = %view_id,
                expected,
                actual = view.revision,
                "Rejected stale view write"
            );
            Err(StorageError::ConcurrentModification {
                view_id: view_id.clone(),
                expected,
                actual: view.revision,
            })
        }
        _ => Ok(()),
    }
}

/// The span must sit at the turn, and the turn in the view's thread
pub(crate) fn check_selection(
    view: &View,
    turn: &StoredTurn,
    span: &StoredSpan,
) -> StorageResult<()> {
    if turn.thread_id != view.thread_id {
        return Err(StorageError::InvalidSelection(format!(
            "turn {} belongs to thread {}, not {}",
            turn.id, turn.thread_id, view.thread_id
        )));
    }
    if span.turn_id != turn.id {
        return Err(StorageError::InvalidSelection(format!(
            "span {} is at turn {}, not {}",
            span.id, span.turn_id, turn.id
        )));
    }
    Ok(())
}
