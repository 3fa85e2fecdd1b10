//! In-memory ViewStore implementation

use async_trait::async_trait;

use super::MemoryStore;
use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::{EntityId, SpanId, ThreadId, TurnId, ViewId};
use crate::storage::resolve::pin_for_splice;
use crate::storage::traits::{check_live, check_revision, check_selection, ViewStore};
use crate::storage::types::{
    is_edit_fork, stored_editable, EditPlan, EditedTurn, EntityRelation, RelationType,
    SelectionRecord, SpawnPlan, SpawnedThread, StoredView, ThreadSnapshot, TurnWithSpans, View,
    ViewUpdate, Written,
};

#[async_trait]
impl ViewStore for MemoryStore {
    async fn create_view(&self, thread_id: &ThreadId, name: Option<&str>) -> StorageResult<StoredView> {
        let mut state = self.lock();
        state.thread(thread_id)?;

        let now = unix_timestamp();
        let view = stored_editable(
            ViewId::new(),
            View::new(thread_id.clone(), name.map(str::to_string)),
            now,
            now,
        );
        state.insert_view(view.clone());
        Ok(view)
    }

    async fn get_view(&self, id: &ViewId) -> StorageResult<StoredView> {
        self.lock().view(id).cloned()
    }

    async fn list_views(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredView>> {
        let state = self.lock();
        state.thread(thread_id)?;
        Ok(state
            .thread_views
            .get(thread_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.views.get(id))
            .filter(|v| !v.is_deleted)
            .cloned()
            .collect())
    }

    async fn snapshot(&self, view_id: &ViewId) -> StorageResult<ThreadSnapshot> {
        let state = self.lock();
        let view = state.view(view_id)?.clone();
        check_live(&view)?;
        let thread = state.thread(&view.thread_id)?.clone();
        let turns = state
            .thread_turns(&view.thread_id)
            .iter()
            .map(|t| state.turn_with_spans(t))
            .collect();
        Ok(ThreadSnapshot { thread, view, turns })
    }

    async fn select_span(
        &self,
        view_id: &ViewId,
        turn_id: &TurnId,
        span_id: &SpanId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let mut state = self.lock();
        let view = state.view(view_id)?;
        check_live(view)?;
        check_selection(view, state.turn(turn_id)?, state.span(span_id)?)?;
        check_revision(view_id, view, expected_revision)?;

        let view = state.record_selection(view_id, turn_id, span_id)?;
        tracing::debug!(view_id = %view_id, turn_id = %turn_id, span_id = %span_id, revision = view.revision, "Selected span");
        Ok(view)
    }

    async fn fork_view(
        &self,
        view_id: &ViewId,
        name: Option<&str>,
        expected_revision: Option<u64>,
    ) -> StorageResult<(StoredView, EntityRelation)> {
        let mut state = self.lock();
        let parent = state.view(view_id)?.clone();
        check_live(&parent)?;
        check_revision(view_id, &parent, expected_revision)?;

        let now = unix_timestamp();
        let child = stored_editable(
            ViewId::new(),
            View::forked_from(view_id.clone(), &parent, name.map(str::to_string)),
            now,
            now,
        );
        let relation = state.put_relation(
            EntityRelation::new((&child.id).into(), view_id.into(), RelationType::forked_from())
                .with_metadata(serde_json::json!({ "revision": parent.revision })),
        )?;
        state.insert_view(child.clone());
        Ok((child, relation))
    }

    async fn update_view(
        &self,
        view_id: &ViewId,
        update: &ViewUpdate,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let mut state = self.lock();
        let current = state.view(view_id)?;
        check_live(current)?;
        check_revision(view_id, current, expected_revision)?;
        if update.is_empty() {
            return Ok(current.clone());
        }

        let view = state
            .views
            .get_mut(view_id)
            .ok_or_else(|| StorageError::not_found(RecordKind::View, view_id))?;
        let inner = &mut view.content.content;
        if let Some(name) = &update.name {
            inner.name = Some(name.clone());
        }
        if let Some(summary) = &update.summary {
            inner.summary = Some(summary.clone());
        }
        if let Some(overrides) = &update.overrides {
            inner.overrides = Some(overrides.clone());
        }
        inner.revision += 1;
        view.content.updated_at = unix_timestamp();
        Ok(view.clone())
    }

    async fn delete_view(
        &self,
        view_id: &ViewId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let mut state = self.lock();
        let current = state.view(view_id)?;
        check_live(current)?;
        check_revision(view_id, current, expected_revision)?;

        let view = state
            .views
            .get_mut(view_id)
            .ok_or_else(|| StorageError::not_found(RecordKind::View, view_id))?;
        view.content.content.is_deleted = true;
        view.content.content.revision += 1;
        view.content.updated_at = unix_timestamp();
        Ok(view.clone())
    }

    async fn selection_history(&self, view_id: &ViewId) -> StorageResult<Vec<SelectionRecord>> {
        let state = self.lock();
        state.view(view_id)?;
        Ok(state.history.get(view_id).cloned().unwrap_or_default())
    }

    async fn create_subconversation(&self, plan: &SpawnPlan) -> StorageResult<SpawnedThread> {
        let mut state = self.lock();
        let parent = state.view(&plan.parent_view_id)?;
        check_live(parent)?;
        for turn in &plan.turns {
            state.check_usages(&turn.usages)?;
        }

        let (thread, view) = state.insert_thread(plan.name.as_deref());
        let relation = state.put_relation(
            EntityRelation::new(
                (&thread.id).into(),
                (&plan.parent_view_id).into(),
                RelationType::spawned_from(),
            )
            .with_metadata(plan.relation_metadata()),
        )?;

        let mut parent_turn = None;
        let mut turn_ids = Vec::with_capacity(plan.turns.len());
        for planned in &plan.turns {
            let turn = state.insert_turn(&thread.id, parent_turn.as_ref(), planned.role, None);
            let span = state.insert_span(&turn.id, &planned.usages, planned.model_id.as_deref(), None);
            state.record_selection(&view.id, &turn.id, &span.span.id)?;
            turn_ids.push(turn.id.clone());
            parent_turn = Some(turn);
        }

        let turns = turn_ids
            .iter()
            .filter_map(|id| state.turns.get(id))
            .map(|t| state.turn_with_spans(t))
            .collect();
        let view = state.view(&view.id)?.clone();
        Ok(SpawnedThread {
            thread,
            view,
            turns,
            relation,
        })
    }

    async fn edit_turn(&self, plan: &EditPlan) -> StorageResult<Written<EditedTurn>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let source = state.view(&plan.view_id)?.clone();
        check_live(&source)?;
        let thread_id = source.thread_id.clone();

        if let Some(turn) = state.replayed_turn(&thread_id, &plan.token) {
            let turn = state.turn_with_spans(turn);
            let target = EntityId::from(&plan.view_id);
            let fork = if plan.fork {
                state
                    .matching(Some(&RelationType::forked_from()), |r| r.to_id == target)
                    .into_iter()
                    .find(|r| is_edit_fork(r, &turn.turn.id))
            } else {
                None
            };
            let view = match &fork {
                Some(r) => state.view(&ViewId::from_string(r.from_id.as_str()))?.clone(),
                None => source.clone(),
            };
            return Ok(Written::replayed(EditedTurn {
                turn,
                view,
                source,
                pinned: None,
                fork,
            }));
        }

        check_revision(&plan.view_id, &source, plan.expected_revision)?;
        let at = state.turn(&plan.turn_id)?.clone();
        if at.thread_id != thread_id {
            return Err(StorageError::InvalidSelection(format!(
                "turn {} is not in thread {}",
                at.id, thread_id
            )));
        }
        state.check_usages(&plan.usages)?;
        let parent = match &at.parent_turn_id {
            Some(id) => Some(state.turn(id)?.clone()),
            None => None,
        };

        let pinned = if plan.fork {
            let turns: Vec<TurnWithSpans> = state
                .thread_turns(&thread_id)
                .iter()
                .map(|t| state.turn_with_spans(t))
                .collect();
            pin_for_splice(&turns, &source.selection, &at, plan.policy)
                .map(|(turn, span)| (turn.turn.id.clone(), span.span.id.clone()))
        } else {
            None
        };
        if let Some((turn_id, span_id)) = &pinned {
            state.record_selection(&plan.view_id, turn_id, span_id)?;
            tracing::debug!(view_id = %plan.view_id, turn_id = %turn_id, span_id = %span_id, "Pinned span before edit");
        }

        let turn = state.insert_turn(&thread_id, parent.as_ref(), at.role, Some(&plan.token));
        let span = state.insert_span(&turn.id, &plan.usages, None, None);
        let source = state.view(&plan.view_id)?.clone();

        let (target, fork) = if plan.fork {
            let now = unix_timestamp();
            let child = stored_editable(
                ViewId::new(),
                View::forked_from(plan.view_id.clone(), &source, None),
                now,
                now,
            );
            let relation = state.put_relation(
                EntityRelation::new(
                    (&child.id).into(),
                    (&plan.view_id).into(),
                    RelationType::forked_from(),
                )
                .with_metadata(plan.fork_metadata(source.revision, &turn.id)),
            )?;
            state.insert_view(child.clone());
            (child.id, Some(relation))
        } else {
            (plan.view_id.clone(), None)
        };
        let view = state.record_selection(&target, &turn.id, &span.span.id)?;
        let source = if plan.fork { source } else { view.clone() };

        tracing::debug!(turn_id = %turn.id, sibling_of = %at.id, view_id = %view.id, "Edited turn");
        Ok(Written::new(EditedTurn {
            turn: TurnWithSpans {
                turn,
                spans: vec![span],
            },
            view,
            source,
            pinned: pinned.map(|(_, span_id)| span_id),
            fork,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::ClientToken;
    use crate::storage::traits::{ContentStore, RelationStore, StructureStore};
    use crate::storage::types::{ContentBlock, NewUsage, Role, SpawnTurn};

    struct Fixture {
        store: MemoryStore,
        thread: ThreadId,
        view: ViewId,
        turn: TurnId,
        spans: Vec<SpanId>,
    }

    /// One user turn with two spans
    async fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let (thread, view) = store.create_thread(None).await.unwrap();
        let turn = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap().record;
        let mut spans = Vec::new();
        for text in ["first", "second"] {
            let id = store.put(ContentBlock::plain(text)).await.unwrap().id;
            let span = store
                .add_span(&turn.id, &[NewUsage::message(id)], None, &ClientToken::new())
                .await
                .unwrap();
            spans.push(span.record.span.id);
        }
        Fixture {
            store,
            thread: thread.id,
            view: view.id,
            turn: turn.id,
            spans,
        }
    }

    #[tokio::test]
    async fn test_select_bumps_revision_and_history() {
        let f = fixture().await;

        let v1 = f.store.select_span(&f.view, &f.turn, &f.spans[0], Some(0)).await.unwrap();
        let v2 = f.store.select_span(&f.view, &f.turn, &f.spans[1], Some(1)).await.unwrap();
        assert_eq!(v1.revision, 1);
        assert_eq!(v2.revision, 2);
        assert_eq!(v2.selection.span_for(&f.turn), Some(&f.spans[1]));

        let history = f.store.selection_history(&f.view).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].span_id, f.spans[0]);
        assert_eq!(history[1].revision, 2);
    }

    #[tokio::test]
    async fn test_select_stale_revision() {
        let f = fixture().await;
        f.store.select_span(&f.view, &f.turn, &f.spans[0], None).await.unwrap();

        let err = f
            .store
            .select_span(&f.view, &f.turn, &f.spans[1], Some(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::ConcurrentModification { expected: 0, actual: 1, .. }
        ));
        let view = f.store.get_view(&f.view).await.unwrap();
        assert_eq!(view.selection.span_for(&f.turn), Some(&f.spans[0]));
        assert_eq!(f.store.selection_history(&f.view).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_select_rejects_other_thread() {
        let f = fixture().await;
        let (other, _) = f.store.create_thread(None).await.unwrap();
        let other_turn = f
            .store
            .append_turn(&other.id, Role::User, &ClientToken::new())
            .await
            .unwrap()
            .record;
        let other_span = f
            .store
            .add_span(&other_turn.id, &[], None, &ClientToken::new())
            .await
            .unwrap()
            .record;

        let err = f
            .store
            .select_span(&f.view, &other_turn.id, &other_span.span.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidSelection(_)));

        // Span from a different turn than the one named
        let err = f
            .store
            .select_span(&f.view, &f.turn, &other_span.span.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidSelection(_)));

        let err = f
            .store
            .select_span(&f.view, &f.turn, &SpanId::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: RecordKind::Span, .. }));
    }

    #[tokio::test]
    async fn test_fork_is_isolated_and_linked() {
        let f = fixture().await;
        f.store.select_span(&f.view, &f.turn, &f.spans[0], None).await.unwrap();

        let (child, relation) = f.store.fork_view(&f.view, Some("alt"), Some(1)).await.unwrap();
        assert_eq!(child.parent_view_id.as_ref(), Some(&f.view));
        assert_eq!(child.thread_id, f.thread);
        assert_eq!(child.selection.span_for(&f.turn), Some(&f.spans[0]));
        assert_eq!(relation.relation, RelationType::forked_from());
        assert_eq!(relation.metadata.as_ref().unwrap()["revision"], 1);

        f.store.select_span(&child.id, &f.turn, &f.spans[1], None).await.unwrap();
        let parent = f.store.get_view(&f.view).await.unwrap();
        assert_eq!(parent.selection.span_for(&f.turn), Some(&f.spans[0]));
        assert_eq!(parent.revision, 1);

        let backlinks = f
            .store
            .backlinks(&(&f.view).into(), Some(&RelationType::forked_from()))
            .await
            .unwrap();
        assert_eq!(backlinks.len(), 1);
        assert_eq!(backlinks[0].from_id.as_str(), child.id.as_str());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let f = fixture().await;
        let update = ViewUpdate {
            name: Some("renamed".into()),
            summary: Some("short".into()),
            overrides: Some(serde_json::json!({ "model": "m" })),
        };
        let view = f.store.update_view(&f.view, &update, Some(0)).await.unwrap();
        assert_eq!(view.name.as_deref(), Some("renamed"));
        assert_eq!(view.revision, 1);

        let unchanged = f.store.update_view(&f.view, &ViewUpdate::default(), None).await.unwrap();
        assert_eq!(unchanged.revision, 1);

        let deleted = f.store.delete_view(&f.view, Some(1)).await.unwrap();
        assert!(deleted.is_deleted);
        assert!(f.store.list_views(&f.thread).await.unwrap().is_empty());
        assert!(f.store.snapshot(&f.view).await.is_err());
        assert!(f.store.get_view(&f.view).await.unwrap().is_deleted);
    }

    #[tokio::test]
    async fn test_snapshot_lists_turns() {
        let f = fixture().await;
        let snapshot = f.store.snapshot(&f.view).await.unwrap();
        assert_eq!(snapshot.thread.id, f.thread);
        assert_eq!(snapshot.turns.len(), 1);
        assert_eq!(snapshot.turns[0].spans.len(), 2);
        assert_eq!(snapshot.turns[0].spans[0].usages.len(), 1);
    }

    #[tokio::test]
    async fn test_create_subconversation() {
        let f = fixture().await;
        let content = f.store.put(ContentBlock::plain("first")).await.unwrap().id;
        let plan = SpawnPlan {
            parent_view_id: f.view.clone(),
            name: Some("sub".into()),
            turns: vec![
                SpawnTurn { role: Role::User, model_id: None, usages: vec![NewUsage::message(content.clone())] },
                SpawnTurn { role: Role::Assistant, model_id: Some("m".into()), usages: vec![NewUsage::message(content.clone())] },
            ],
            at_turn_id: Some(f.turn.clone()),
            at_span_id: Some(f.spans[0].clone()),
        };

        let spawned = f.store.create_subconversation(&plan).await.unwrap();
        assert_eq!(spawned.turns.len(), 2);
        assert_eq!(spawned.turns[1].turn.parent_turn_id.as_ref(), Some(&spawned.turns[0].turn.id));
        assert_eq!(spawned.view.selection.len(), 2);
        assert_eq!(spawned.view.revision, 2);
        assert_eq!(spawned.relation.from_id.as_str(), spawned.thread.id.as_str());
        assert_eq!(spawned.relation.metadata_str("at_turn_id"), Some(f.turn.as_str()));
        // Three usages now point at the shared block, no new content
        assert_eq!(f.store.reference_count(&content).await.unwrap(), 3);
        assert_eq!(f.store.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_subconversation_is_atomic() {
        let f = fixture().await;
        let plan = SpawnPlan {
            parent_view_id: f.view.clone(),
            name: None,
            turns: vec![SpawnTurn {
                role: Role::User,
                model_id: None,
                usages: vec![NewUsage::message(crate::storage::ids::ContentId::from_string("gone"))],
            }],
            at_turn_id: None,
            at_span_id: None,
        };
        let usages_before = f.store.usage_count().await.unwrap();

        let err = f.store.create_subconversation(&plan).await.unwrap_err();
        assert!(matches!(err, StorageError::IntegrityViolation(_)));
        assert_eq!(f.store.usage_count().await.unwrap(), usages_before);
        assert!(f
            .store
            .backlinks(&(&f.view).into(), Some(&RelationType::spawned_from()))
            .await
            .unwrap()
            .is_empty());
    }
}
