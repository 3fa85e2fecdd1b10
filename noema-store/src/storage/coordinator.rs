//! Storage coordinator - orchestrates multi-store operations
//!
//! The coordinator is the entry point callers use for anything that spans
//! more than one store or needs a notification:
//! - view resolution (view store snapshot + content store)
//! - edits, extensions and subconversations (structure + view + relation)
//! - garbage collection with the configured grace period
//!
//! Every committed store call publishes exactly one `MutationEvent` after it
//! returns. Deduplicated puts and replayed client tokens publish nothing.

use std::marker::PhantomData;
use std::sync::Arc;

use config::StoreSettings;
use tokio::sync::broadcast;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::events::EventBus;
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::{ClientToken, ContentId, EntityId, SpanId, ThreadId, TurnId, ViewId};
use crate::storage::resolve::{materialize, view_tip};
use crate::storage::subconversation::{plan_spawn, ScopeFilter};
use crate::storage::traits::{
    check_live, check_selection, ContentStore, RelationStore, StorageTypes, Stores,
    StructureStore, ViewStore,
};
use crate::storage::types::{
    ContentBlock, EditPlan, EditedTurn, EntityKind, EntityRelation, MutationEvent, MutationOp,
    NewUsage, PutResult, RelationType, ResolvedTurn, Role, SelectionRecord, SpanWithUsages,
    SpawnedThread, StoredThread, StoredTurn, StoredView, Transcript, TurnWithSpans, ViewUpdate,
    Written,
};

/// Coordinates storage across all store types.
///
/// Generic over `S: StorageTypes` which bundles all storage type associations.
/// Takes a `Stores<S>` implementation to access individual stores.
pub struct StorageCoordinator<S: StorageTypes> {
    content_store: Arc<S::Content>,
    structure_store: Arc<S::Structure>,
    view_store: Arc<S::View>,
    relation_store: Arc<S::Relation>,
    settings: StoreSettings,
    events: EventBus,
    _marker: PhantomData<S>,
}

impl<S: StorageTypes> StorageCoordinator<S> {
    /// Create a new storage coordinator from a Stores implementation
    pub fn from_stores(stores: &impl Stores<S>, settings: StoreSettings) -> Self {
        Self::new(
            stores.content(),
            stores.structure(),
            stores.view(),
            stores.relation(),
            settings,
        )
    }

    /// Create a new storage coordinator from individual store instances
    pub fn new(
        content_store: Arc<S::Content>,
        structure_store: Arc<S::Structure>,
        view_store: Arc<S::View>,
        relation_store: Arc<S::Relation>,
        settings: StoreSettings,
    ) -> Self {
        let events = EventBus::new(settings.event_capacity);
        Self {
            content_store,
            structure_store,
            view_store,
            relation_store,
            settings,
            events,
            _marker: PhantomData,
        }
    }

    pub fn content(&self) -> &Arc<S::Content> {
        &self.content_store
    }

    pub fn structure(&self) -> &Arc<S::Structure> {
        &self.structure_store
    }

    pub fn views(&self) -> &Arc<S::View> {
        &self.view_store
    }

    pub fn relations(&self) -> &Arc<S::Relation> {
        &self.relation_store
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Receive every mutation committed through this coordinator from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MutationEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Content
    // ========================================================================

    /// Store a content block; publishes only when the address was new
    pub async fn put(&self, block: ContentBlock) -> StorageResult<PutResult> {
        let result = self.content_store.put(block).await?;
        if result.is_new {
            tracing::debug!(content_id = %result.id, "Stored content block");
            self.events
                .emit(EntityKind::Content, &result.id, MutationOp::Created);
        }
        Ok(result)
    }

    /// Reclaim unreferenced content older than the grace period
    pub async fn collect_garbage(&self) -> StorageResult<Vec<ContentId>> {
        let cutoff = unix_timestamp() - self.settings.gc_grace_period_ms;
        let swept = self.content_store.sweep_unreferenced(cutoff).await?;
        if !swept.is_empty() {
            tracing::info!(count = swept.len(), cutoff, "Swept unreferenced content");
        }
        for id in &swept {
            self.events.emit(EntityKind::Content, id, MutationOp::Swept);
        }
        Ok(swept)
    }

    // ========================================================================
    // Structure
    // ========================================================================

    /// Create a thread and its main view
    pub async fn create_conversation(
        &self,
        name: Option<&str>,
    ) -> StorageResult<(StoredThread, StoredView)> {
        let (thread, view) = self.structure_store.create_thread(name).await?;
        self.events
            .emit(EntityKind::Thread, &thread.id, MutationOp::Created);
        Ok((thread, view))
    }

    pub async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>> {
        let written = self.structure_store.append_turn(thread_id, role, token).await?;
        self.turn_written(&written.record, written.is_new);
        Ok(written)
    }

    /// Append a turn after the last turn on the view's path
    ///
    /// The tip counts turns that have no span yet or were soft-deleted, so
    /// a second `extend` issued before the first turn's span arrives still
    /// chains below it. An empty path appends a root turn.
    pub async fn extend(
        &self,
        view_id: &ViewId,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>> {
        let snapshot = self.view_store.snapshot(view_id).await?;
        let parent = view_tip(&snapshot.turns, &snapshot.view.selection).map(|t| &t.turn.id);
        let written = self
            .structure_store
            .append_turn_after(&snapshot.thread.id, parent, role, token)
            .await?;
        self.turn_written(&written.record, written.is_new);
        Ok(written)
    }

    pub async fn add_span(
        &self,
        turn_id: &TurnId,
        usages: &[NewUsage],
        model_id: Option<&str>,
        token: &ClientToken,
    ) -> StorageResult<Written<SpanWithUsages>> {
        let written = self
            .structure_store
            .add_span(turn_id, usages, model_id, token)
            .await?;
        if written.is_new {
            self.events
                .emit(EntityKind::Span, &written.record.span.id, MutationOp::Created);
        }
        Ok(written)
    }

    pub async fn splice(
        &self,
        thread_id: &ThreadId,
        at_turn_id: &TurnId,
        content: &[NewUsage],
        token: &ClientToken,
    ) -> StorageResult<Written<TurnWithSpans>> {
        let written = self
            .structure_store
            .splice(thread_id, at_turn_id, content, token)
            .await?;
        self.turn_written(&written.record.turn, written.is_new);
        Ok(written)
    }

    /// Replace a turn's content as seen by a view
    ///
    /// Splices a sibling carrying `content` and selects it either in the view
    /// itself or, when `fork` is set, only in a new fork of the view. The
    /// store applies all of it in one unit and it publishes one Turn Created
    /// event for the sibling.
    ///
    /// The sibling becomes the latest child at its position, so a forking
    /// edit pins the span the view showed there when it showed it through
    /// fallback. That pin is a selection on the view and bumps its revision;
    /// `EditedTurn::source` carries the view as it is afterwards.
    pub async fn edit_turn(
        &self,
        view_id: &ViewId,
        turn_id: &TurnId,
        content: &[NewUsage],
        fork: bool,
        token: &ClientToken,
    ) -> StorageResult<EditedTurn> {
        let plan = EditPlan {
            view_id: view_id.clone(),
            turn_id: turn_id.clone(),
            usages: content.to_vec(),
            fork,
            policy: self.settings.fallback,
            token: token.clone(),
            expected_revision: None,
        };
        let written = self.view_store.edit_turn(&plan).await?;
        let edited = &written.record;
        self.turn_written(&edited.turn.turn, written.is_new);
        if written.is_new && edited.fork.is_some() {
            tracing::info!(
                parent_view_id = %view_id,
                view_id = %edited.view.id,
                turn_id = %edited.turn.turn.id,
                "Forked view for edit"
            );
        }
        Ok(written.into_record())
    }

    pub async fn soft_delete_turn(&self, turn_id: &TurnId) -> StorageResult<bool> {
        let changed = self.structure_store.soft_delete_turn(turn_id).await?;
        if changed {
            self.events.emit(EntityKind::Turn, turn_id, MutationOp::Deleted);
        }
        Ok(changed)
    }

    pub async fn withdraw_span(&self, span_id: &SpanId) -> StorageResult<bool> {
        let changed = self.structure_store.withdraw_span(span_id).await?;
        if changed {
            self.events
                .emit(EntityKind::Span, span_id, MutationOp::Withdrawn);
        }
        Ok(changed)
    }

    fn turn_written(&self, turn: &StoredTurn, is_new: bool) {
        if !is_new {
            tracing::debug!(turn_id = %turn.id, "Replayed turn write");
            return;
        }
        tracing::debug!(
            thread_id = %turn.thread_id,
            turn_id = %turn.id,
            sequence = turn.sequence,
            "Appended turn"
        );
        self.events.emit(EntityKind::Turn, &turn.id, MutationOp::Created);
    }

    // ========================================================================
    // Views
    // ========================================================================

    /// Materialize a view into its transcript
    pub async fn resolve(&self, view_id: &ViewId) -> StorageResult<Transcript> {
        let snapshot = self.view_store.snapshot(view_id).await?;
        materialize(
            self.content_store.as_ref(),
            &snapshot,
            &snapshot.view.selection,
            self.settings.fallback,
        )
        .await
    }

    /// Resolve the view as if `span_id` were selected at `turn_id`
    ///
    /// Validates like `select`; nothing is written.
    pub async fn preview(
        &self,
        view_id: &ViewId,
        turn_id: &TurnId,
        span_id: &SpanId,
    ) -> StorageResult<Transcript> {
        let snapshot = self.view_store.snapshot(view_id).await?;
        check_live(&snapshot.view)?;
        let turn = self.structure_store.get_turn(turn_id).await?;
        let span = self.structure_store.get_span(span_id).await?;
        check_selection(&snapshot.view, &turn, &span)?;

        let mut selection = snapshot.view.selection.clone();
        selection.insert(turn.id, span.id, snapshot.view.revision + 1);
        materialize(
            self.content_store.as_ref(),
            &snapshot,
            &selection,
            self.settings.fallback,
        )
        .await
    }

    pub async fn select(
        &self,
        view_id: &ViewId,
        turn_id: &TurnId,
        span_id: &SpanId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let view = self
            .view_store
            .select_span(view_id, turn_id, span_id, expected_revision)
            .await?;
        self.events.emit(EntityKind::View, view_id, MutationOp::Selected);
        Ok(view)
    }

    /// Fork a view; the parent is untouched
    pub async fn fork(
        &self,
        view_id: &ViewId,
        name: Option<&str>,
        expected_revision: Option<u64>,
    ) -> StorageResult<(StoredView, EntityRelation)> {
        let (forked, relation) = self
            .view_store
            .fork_view(view_id, name, expected_revision)
            .await?;
        tracing::info!(
            parent_view_id = %view_id,
            view_id = %forked.id,
            revision = forked.revision,
            "Forked view"
        );
        self.events
            .emit(EntityKind::View, &forked.id, MutationOp::Forked);
        Ok((forked, relation))
    }

    pub async fn create_view(
        &self,
        thread_id: &ThreadId,
        name: Option<&str>,
    ) -> StorageResult<StoredView> {
        let view = self.view_store.create_view(thread_id, name).await?;
        self.events.emit(EntityKind::View, &view.id, MutationOp::Created);
        Ok(view)
    }

    pub async fn get_view(&self, view_id: &ViewId) -> StorageResult<StoredView> {
        self.view_store.get_view(view_id).await
    }

    pub async fn list_views(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredView>> {
        self.view_store.list_views(thread_id).await
    }

    pub async fn update_view(
        &self,
        view_id: &ViewId,
        update: &ViewUpdate,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let view = self
            .view_store
            .update_view(view_id, update, expected_revision)
            .await?;
        if !update.is_empty() {
            self.events.emit(EntityKind::View, view_id, MutationOp::Updated);
        }
        Ok(view)
    }

    pub async fn delete_view(
        &self,
        view_id: &ViewId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let view = self.view_store.delete_view(view_id, expected_revision).await?;
        self.events.emit(EntityKind::View, view_id, MutationOp::Deleted);
        Ok(view)
    }

    pub async fn selection_history(&self, view_id: &ViewId) -> StorageResult<Vec<SelectionRecord>> {
        self.view_store.selection_history(view_id).await
    }

    // ========================================================================
    // Relations
    // ========================================================================

    pub async fn link(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: RelationType,
        metadata: Option<serde_json::Value>,
    ) -> StorageResult<EntityRelation> {
        let relation = self
            .relation_store
            .link(from_id, to_id, relation, metadata)
            .await?;
        tracing::debug!(from = %from_id, to = %to_id, relation = %relation.relation, "Linked");
        self.events
            .emit(EntityKind::Relation, from_id, MutationOp::Linked);
        Ok(relation)
    }

    pub async fn unlink(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: &RelationType,
    ) -> StorageResult<bool> {
        let removed = self.relation_store.unlink(from_id, to_id, relation).await?;
        if removed {
            self.events
                .emit(EntityKind::Relation, from_id, MutationOp::Unlinked);
        }
        Ok(removed)
    }

    pub async fn backlinks(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>> {
        self.relation_store.backlinks(id, relation).await
    }

    pub async fn relations_from(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>> {
        self.relation_store.relations_from(id, relation).await
    }

    // ========================================================================
    // Subconversations
    // ========================================================================

    /// Start a child thread from part of a view's transcript
    ///
    /// The child's usages point at the parent's content ids, so no content
    /// is copied.
    pub async fn spawn(
        &self,
        parent_view_id: &ViewId,
        scope: &ScopeFilter,
        name: Option<String>,
    ) -> StorageResult<SpawnedThread> {
        let parent = self.resolve(parent_view_id).await?;
        let plan = plan_spawn(parent_view_id, &parent, scope, name)?;
        let spawned = self.view_store.create_subconversation(&plan).await?;
        tracing::info!(
            parent_view_id = %parent_view_id,
            thread_id = %spawned.thread.id,
            view_id = %spawned.view.id,
            turns = spawned.turns.len(),
            "Spawned subconversation"
        );
        self.events
            .emit(EntityKind::Thread, &spawned.thread.id, MutationOp::Spawned);
        Ok(spawned)
    }

    /// Record the child view's current tip as the result for a parent turn
    pub async fn link_result(
        &self,
        child_view_id: &ViewId,
        parent_turn_id: &TurnId,
    ) -> StorageResult<EntityRelation> {
        self.structure_store.get_turn(parent_turn_id).await?;
        let child = self.resolve(child_view_id).await?;
        let tip = child.tip().ok_or_else(|| {
            StorageError::InvalidSelection(format!("view {} has no resolved turns", child_view_id))
        })?;
        let metadata = serde_json::json!({
            "result_turn_id": tip.turn.id.as_str(),
            "result_span_id": tip.span.id.as_str(),
        });
        self.link(
            &EntityId::from(child_view_id),
            &EntityId::from(parent_turn_id),
            RelationType::result_for(),
            Some(metadata),
        )
        .await
    }

    /// Final resolved turn of the newest child linked to `parent_turn_id`
    pub async fn subconversation_result(
        &self,
        parent_turn_id: &TurnId,
    ) -> StorageResult<Option<ResolvedTurn>> {
        let links = self
            .relation_store
            .backlinks(&EntityId::from(parent_turn_id), Some(&RelationType::result_for()))
            .await?;
        let Some(newest) = links.first() else {
            return Ok(None);
        };
        let child_view_id = ViewId::from_string(newest.from_id.as_str());
        let mut child = self.resolve(&child_view_id).await?;
        Ok(child.turns.pop())
    }
}
