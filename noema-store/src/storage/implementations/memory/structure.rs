//! In-memory StructureStore implementation

use async_trait::async_trait;

use super::MemoryStore;
use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::ids::{ClientToken, SpanId, ThreadId, TurnId};
use crate::storage::resolve::default_tip;
use crate::storage::traits::StructureStore;
use crate::storage::types::{
    NewUsage, Role, SpanStatus, SpanWithUsages, StoredSpan, StoredThread, StoredTurn,
    StoredUsage, StoredView, TurnWithSpans, Written,
};

#[async_trait]
impl StructureStore for MemoryStore {
    async fn create_thread(&self, name: Option<&str>) -> StorageResult<(StoredThread, StoredView)> {
        let (thread, view) = self.lock().insert_thread(name);
        tracing::debug!(thread_id = %thread.id, view_id = %view.id, "Created thread");
        Ok((thread, view))
    }

    async fn get_thread(&self, id: &ThreadId) -> StorageResult<StoredThread> {
        self.lock().thread(id).cloned()
    }

    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>> {
        let mut state = self.lock();
        state.thread(thread_id)?;
        if let Some(turn) = state.replayed_turn(thread_id, token) {
            return Ok(Written::replayed(turn.clone()));
        }

        let turns = state.thread_turns(thread_id);
        let tip = default_tip(&turns);
        let turn = state.insert_turn(thread_id, tip, role, Some(token));
        Ok(Written::new(turn))
    }

    async fn append_turn_after(
        &self,
        thread_id: &ThreadId,
        parent_turn_id: Option<&TurnId>,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>> {
        let mut state = self.lock();
        state.thread(thread_id)?;
        if let Some(turn) = state.replayed_turn(thread_id, token) {
            return Ok(Written::replayed(turn.clone()));
        }

        let parent = match parent_turn_id {
            Some(id) => {
                let parent = state.turn(id)?.clone();
                if &parent.thread_id != thread_id {
                    tracing::error!(turn_id = %id, thread_id = %thread_id, "Parent turn in another thread");
                    return Err(StorageError::IntegrityViolation(format!(
                        "parent turn {} is not in thread {}",
                        id, thread_id
                    )));
                }
                Some(parent)
            }
            None => None,
        };
        let turn = state.insert_turn(thread_id, parent.as_ref(), role, Some(token));
        Ok(Written::new(turn))
    }

    async fn splice(
        &self,
        thread_id: &ThreadId,
        at_turn_id: &TurnId,
        content: &[NewUsage],
        token: &ClientToken,
    ) -> StorageResult<Written<TurnWithSpans>> {
        let mut state = self.lock();
        state.thread(thread_id)?;
        if let Some(turn) = state.replayed_turn(thread_id, token) {
            let turn = turn.clone();
            return Ok(state.written_turn(&turn, false));
        }

        let at = state.turn(at_turn_id)?.clone();
        if &at.thread_id != thread_id {
            return Err(StorageError::InvalidSelection(format!(
                "turn {} is not in thread {}",
                at_turn_id, thread_id
            )));
        }
        state.check_usages(content)?;

        let parent = match &at.parent_turn_id {
            Some(id) => Some(state.turn(id)?.clone()),
            None => None,
        };
        let turn = state.insert_turn(thread_id, parent.as_ref(), at.role, Some(token));
        state.insert_span(&turn.id, content, None, None);
        tracing::debug!(turn_id = %turn.id, sibling_of = %at_turn_id, "Spliced turn");
        Ok(state.written_turn(&turn, true))
    }

    async fn get_turn(&self, id: &TurnId) -> StorageResult<StoredTurn> {
        self.lock().turn(id).cloned()
    }

    async fn list_turns(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredTurn>> {
        let state = self.lock();
        state.thread(thread_id)?;
        Ok(state.thread_turns(thread_id))
    }

    async fn soft_delete_turn(&self, id: &TurnId) -> StorageResult<bool> {
        let mut state = self.lock();
        let turn = state
            .turns
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found(RecordKind::Turn, id))?;
        if turn.is_deleted {
            return Ok(false);
        }
        turn.content.is_deleted = true;
        Ok(true)
    }

    async fn add_span(
        &self,
        turn_id: &TurnId,
        usages: &[NewUsage],
        model_id: Option<&str>,
        token: &ClientToken,
    ) -> StorageResult<Written<SpanWithUsages>> {
        let mut state = self.lock();
        state.turn(turn_id)?;
        if let Some(span) = state
            .span_tokens
            .get(&(turn_id.clone(), token.clone()))
            .and_then(|id| state.spans.get(id))
        {
            return Ok(Written::replayed(state.span_with_usages(span)));
        }

        state.check_usages(usages)?;
        let span = state.insert_span(turn_id, usages, model_id, Some(token));
        tracing::debug!(turn_id = %turn_id, span_id = %span.span.id, usages = usages.len(), "Added span");
        Ok(Written::new(span))
    }

    async fn get_span(&self, id: &SpanId) -> StorageResult<StoredSpan> {
        self.lock().span(id).cloned()
    }

    async fn get_spans(&self, turn_id: &TurnId) -> StorageResult<Vec<StoredSpan>> {
        let state = self.lock();
        let turn = state.turn(turn_id)?;
        Ok(state
            .turn_with_spans(turn)
            .spans
            .into_iter()
            .map(|s| s.span)
            .collect())
    }

    async fn get_usages(&self, span_id: &SpanId) -> StorageResult<Vec<StoredUsage>> {
        let state = self.lock();
        state.span(span_id)?;
        Ok(state.usages.get(span_id).cloned().unwrap_or_default())
    }

    async fn withdraw_span(&self, id: &SpanId) -> StorageResult<bool> {
        let mut state = self.lock();
        let span = state
            .spans
            .get_mut(id)
            .ok_or_else(|| StorageError::not_found(RecordKind::Span, id))?;
        if span.status == SpanStatus::Withdrawn {
            return Ok(false);
        }
        span.content.status = SpanStatus::Withdrawn;
        Ok(true)
    }

    async fn usage_count(&self) -> StorageResult<usize> {
        Ok(self.lock().usages.values().map(Vec::len).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::ContentId;
    use crate::storage::traits::ContentStore;
    use crate::storage::types::ContentBlock;

    async fn message(store: &MemoryStore, text: &str) -> Vec<NewUsage> {
        let id = store.put(ContentBlock::plain(text)).await.unwrap().id;
        vec![NewUsage::message(id)]
    }

    #[tokio::test]
    async fn test_create_thread_with_main_view() {
        let store = MemoryStore::new();
        let (thread, view) = store.create_thread(Some("chat")).await.unwrap();

        assert_eq!(thread.name.as_deref(), Some("chat"));
        assert_eq!(thread.main_view_id, view.id);
        assert_eq!(view.thread_id, thread.id);
        assert_eq!(view.revision, 0);
        assert_eq!(store.get_thread(&thread.id).await.unwrap(), thread);
    }

    #[tokio::test]
    async fn test_append_chains_turns() {
        let store = MemoryStore::new();
        let (thread, _) = store.create_thread(None).await.unwrap();

        let t1 = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap();
        let t2 = store.append_turn(&thread.id, Role::Assistant, &ClientToken::new()).await.unwrap();

        assert!(t1.is_new && t2.is_new);
        assert_eq!(t1.record.sequence, 0);
        assert_eq!(t1.record.parent_turn_id, None);
        assert_eq!(t2.record.sequence, 1);
        assert_eq!(t2.record.parent_turn_id.as_ref(), Some(&t1.record.id));

        let turns = store.list_turns(&thread.id).await.unwrap();
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test]
    async fn test_append_replays_token() {
        let store = MemoryStore::new();
        let (thread, _) = store.create_thread(None).await.unwrap();
        let token = ClientToken::new();

        let first = store.append_turn(&thread.id, Role::User, &token).await.unwrap();
        let again = store.append_turn(&thread.id, Role::User, &token).await.unwrap();

        assert!(!again.is_new);
        assert_eq!(first.record.id, again.record.id);
        assert_eq!(store.list_turns(&thread.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_append_after_rejects_foreign_parent() {
        let store = MemoryStore::new();
        let (a, _) = store.create_thread(None).await.unwrap();
        let (b, _) = store.create_thread(None).await.unwrap();
        let turn = store.append_turn(&a.id, Role::User, &ClientToken::new()).await.unwrap().record;

        let err = store
            .append_turn_after(&b.id, Some(&turn.id), Role::Assistant, &ClientToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::IntegrityViolation(_)));
    }

    #[tokio::test]
    async fn test_add_span_and_replay() {
        let store = MemoryStore::new();
        let (thread, _) = store.create_thread(None).await.unwrap();
        let turn = store.append_turn(&thread.id, Role::Assistant, &ClientToken::new()).await.unwrap().record;
        let usages = message(&store, "answer").await;
        let token = ClientToken::new();

        let span = store.add_span(&turn.id, &usages, Some("claude"), &token).await.unwrap();
        let replay = store.add_span(&turn.id, &usages, Some("claude"), &token).await.unwrap();

        assert!(span.is_new);
        assert!(!replay.is_new);
        assert_eq!(span.record.span.id, replay.record.span.id);
        assert_eq!(span.record.span.model_id.as_deref(), Some("claude"));
        assert_eq!(span.record.usages[0].owner_id, span.record.span.id.to_string());
        assert_eq!(store.get_spans(&turn.id).await.unwrap().len(), 1);
        assert_eq!(store.usage_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_add_span_rejects_unknown_content() {
        let store = MemoryStore::new();
        let (thread, _) = store.create_thread(None).await.unwrap();
        let turn = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap().record;

        let mut usages = message(&store, "ok").await;
        usages.push(NewUsage::message(ContentId::from_string("missing")));

        let err = store.add_span(&turn.id, &usages, None, &ClientToken::new()).await.unwrap_err();
        assert!(matches!(err, StorageError::IntegrityViolation(_)));
        assert!(store.get_spans(&turn.id).await.unwrap().is_empty());
        assert_eq!(store.usage_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_add_span_unknown_turn() {
        let store = MemoryStore::new();
        let err = store
            .add_span(&TurnId::new(), &[], None, &ClientToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { kind: RecordKind::Turn, .. }));
    }

    #[tokio::test]
    async fn test_splice_creates_sibling() {
        let store = MemoryStore::new();
        let (thread, _) = store.create_thread(None).await.unwrap();
        let t1 = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap().record;
        let t2 = store.append_turn(&thread.id, Role::Assistant, &ClientToken::new()).await.unwrap().record;
        store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap();

        let content = message(&store, "edited").await;
        let spliced = store
            .splice(&thread.id, &t2.id, &content, &ClientToken::new())
            .await
            .unwrap()
            .record;

        assert_ne!(spliced.turn.id, t2.id);
        assert_eq!(spliced.turn.parent_turn_id.as_ref(), Some(&t1.id));
        assert_eq!(spliced.turn.sequence, t2.sequence);
        assert_eq!(spliced.turn.role, Role::Assistant);
        assert_eq!(spliced.spans.len(), 1);
        assert_eq!(store.list_turns(&thread.id).await.unwrap().len(), 4);

        // New appends follow the spliced branch
        let next = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap().record;
        assert_eq!(next.parent_turn_id.as_ref(), Some(&spliced.turn.id));
    }

    #[tokio::test]
    async fn test_flags() {
        let store = MemoryStore::new();
        let (thread, _) = store.create_thread(None).await.unwrap();
        let turn = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await.unwrap().record;
        let span = store.add_span(&turn.id, &[], None, &ClientToken::new()).await.unwrap().record;

        assert!(store.soft_delete_turn(&turn.id).await.unwrap());
        assert!(!store.soft_delete_turn(&turn.id).await.unwrap());
        assert!(store.get_turn(&turn.id).await.unwrap().is_deleted);

        assert!(store.withdraw_span(&span.span.id).await.unwrap());
        assert!(!store.withdraw_span(&span.span.id).await.unwrap());
        assert!(!store.get_span(&span.span.id).await.unwrap().is_active());
        // Still listed
        assert_eq!(store.get_spans(&turn.id).await.unwrap().len(), 1);
    }
}
