//! In-memory storage implementation
//!
//! One `MemoryStore` implements every store trait over a single state guarded
//! by one mutex. Each call takes the lock once, does all of its checks and
//! writes without awaiting, and releases it, so calls are atomic and a
//! dropped future can never leave a partial write behind.

mod content;
mod relation;
mod structure;
mod view;

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::Arc;

use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::{ClientToken, ContentId, SpanId, ThreadId, TurnId, UsageId, ViewId};
use crate::storage::traits::{StorageTypes, Stores};
use crate::storage::types::{
    stored, stored_editable, EntityRelation, NewUsage, OwnerKind, Role, SelectionRecord, Span,
    SpanWithUsages, StoredContentBlock, StoredSpan, StoredThread, StoredTurn, StoredUsage,
    StoredView, Thread, Turn, TurnWithSpans, Usage, View, Written,
};

#[derive(Debug, Default)]
struct MemoryState {
    blocks: HashMap<ContentId, StoredContentBlock>,
    /// Time of the latest put per block, deduplicated puts included
    last_put: HashMap<ContentId, i64>,
    /// Usage count per content block
    content_refs: HashMap<ContentId, usize>,

    threads: HashMap<ThreadId, StoredThread>,
    turns: HashMap<TurnId, StoredTurn>,
    /// Turn ids per thread in creation order
    thread_turns: HashMap<ThreadId, Vec<TurnId>>,
    spans: HashMap<SpanId, StoredSpan>,
    /// Span ids per turn in creation order
    turn_spans: HashMap<TurnId, Vec<SpanId>>,
    usages: HashMap<SpanId, Vec<StoredUsage>>,
    turn_tokens: HashMap<(ThreadId, ClientToken), TurnId>,
    span_tokens: HashMap<(TurnId, ClientToken), SpanId>,

    views: HashMap<ViewId, StoredView>,
    /// View ids per thread in creation order
    thread_views: HashMap<ThreadId, Vec<ViewId>>,
    history: HashMap<ViewId, Vec<SelectionRecord>>,

    /// Relations in insertion order (newest last)
    relations: Vec<EntityRelation>,
}

/// In-memory store for tests and ephemeral sessions
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock()
    }
}

impl MemoryState {
    // ========================================================================
    // Lookups
    // ========================================================================

    fn thread(&self, id: &ThreadId) -> StorageResult<&StoredThread> {
        self.threads
            .get(id)
            .ok_or_else(|| StorageError::not_found(RecordKind::Thread, id))
    }

    fn turn(&self, id: &TurnId) -> StorageResult<&StoredTurn> {
        self.turns
            .get(id)
            .ok_or_else(|| StorageError::not_found(RecordKind::Turn, id))
    }

    fn span(&self, id: &SpanId) -> StorageResult<&StoredSpan> {
        self.spans
            .get(id)
            .ok_or_else(|| StorageError::not_found(RecordKind::Span, id))
    }

    fn view(&self, id: &ViewId) -> StorageResult<&StoredView> {
        self.views
            .get(id)
            .ok_or_else(|| StorageError::not_found(RecordKind::View, id))
    }

    fn span_with_usages(&self, span: &StoredSpan) -> SpanWithUsages {
        SpanWithUsages {
            span: span.clone(),
            usages: self.usages.get(&span.id).cloned().unwrap_or_default(),
        }
    }

    fn turn_with_spans(&self, turn: &StoredTurn) -> TurnWithSpans {
        let spans = self
            .turn_spans
            .get(&turn.id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.spans.get(id))
            .map(|span| self.span_with_usages(span))
            .collect();
        TurnWithSpans {
            turn: turn.clone(),
            spans,
        }
    }

    fn thread_turns(&self, thread_id: &ThreadId) -> Vec<StoredTurn> {
        self.thread_turns
            .get(thread_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.turns.get(id).cloned())
            .collect()
    }

    // ========================================================================
    // Writes shared by several traits
    // ========================================================================

    fn insert_thread(&mut self, name: Option<&str>) -> (StoredThread, StoredView) {
        let now = unix_timestamp();
        let thread_id = ThreadId::new();
        let view_id = ViewId::new();

        let thread = stored(
            thread_id.clone(),
            Thread {
                name: name.map(str::to_string),
                main_view_id: view_id.clone(),
            },
            now,
        );
        let view = stored_editable(
            view_id.clone(),
            View::new(thread_id.clone(), Some("main".to_string())),
            now,
            now,
        );

        self.threads.insert(thread_id.clone(), thread.clone());
        self.thread_turns.insert(thread_id.clone(), Vec::new());
        self.insert_view(view.clone());
        (thread, view)
    }

    fn insert_view(&mut self, view: StoredView) {
        self.thread_views
            .entry(view.thread_id.clone())
            .or_default()
            .push(view.id.clone());
        self.views.insert(view.id.clone(), view);
    }

    /// Insert a turn below `parent` (checked by the caller)
    fn insert_turn(
        &mut self,
        thread_id: &ThreadId,
        parent: Option<&StoredTurn>,
        role: Role,
        token: Option<&ClientToken>,
    ) -> StoredTurn {
        let sequence = parent.map(|p| p.sequence + 1).unwrap_or(0);
        let mut turn = Turn::new(
            thread_id.clone(),
            role,
            sequence,
            parent.map(|p| p.id.clone()),
        );
        if let Some(token) = token {
            turn = turn.with_token(token.clone());
        }
        let turn = stored(TurnId::new(), turn, unix_timestamp());
        if let Some(token) = token {
            self.turn_tokens
                .insert((thread_id.clone(), token.clone()), turn.id.clone());
        }

        self.thread_turns
            .entry(thread_id.clone())
            .or_default()
            .push(turn.id.clone());
        self.turns.insert(turn.id.clone(), turn.clone());
        turn
    }

    fn replayed_turn(&self, thread_id: &ThreadId, token: &ClientToken) -> Option<&StoredTurn> {
        self.turn_tokens
            .get(&(thread_id.clone(), token.clone()))
            .and_then(|id| self.turns.get(id))
    }

    /// Every usage must point at stored content
    fn check_usages(&self, usages: &[NewUsage]) -> StorageResult<()> {
        if let Some(missing) = usages
            .iter()
            .find(|u| !self.blocks.contains_key(&u.content_id))
        {
            tracing::error!(content_id = %missing.content_id, "Usage names unknown content");
            return Err(StorageError::IntegrityViolation(format!(
                "usage references unknown content {}",
                missing.content_id
            )));
        }
        Ok(())
    }

    /// Insert a span with its usages; usages must already be checked
    fn insert_span(
        &mut self,
        turn_id: &TurnId,
        usages: &[NewUsage],
        model_id: Option<&str>,
        token: Option<&ClientToken>,
    ) -> SpanWithUsages {
        let now = unix_timestamp();
        let mut span = Span::new(turn_id.clone(), model_id.map(str::to_string));
        span.client_token = token.cloned();
        let span = stored(SpanId::new(), span, now);

        let usages: Vec<StoredUsage> = usages
            .iter()
            .enumerate()
            .map(|(idx, u)| {
                stored(
                    UsageId::new(),
                    Usage {
                        content_id: u.content_id.clone(),
                        role: u.role.clone(),
                        owner_kind: OwnerKind::Span,
                        owner_id: span.id.to_string(),
                        sequence: idx as u32,
                    },
                    now,
                )
            })
            .collect();
        for usage in &usages {
            *self
                .content_refs
                .entry(usage.content_id.clone())
                .or_default() += 1;
        }

        if let Some(token) = token {
            self.span_tokens
                .insert((turn_id.clone(), token.clone()), span.id.clone());
        }
        self.turn_spans
            .entry(turn_id.clone())
            .or_default()
            .push(span.id.clone());
        self.usages.insert(span.id.clone(), usages.clone());
        self.spans.insert(span.id.clone(), span.clone());

        SpanWithUsages { span, usages }
    }

    /// Write a selection entry and its history record, bumping the revision
    fn record_selection(
        &mut self,
        view_id: &ViewId,
        turn_id: &TurnId,
        span_id: &SpanId,
    ) -> StorageResult<StoredView> {
        let now = unix_timestamp();
        let view = self
            .views
            .get_mut(view_id)
            .ok_or_else(|| StorageError::not_found(RecordKind::View, view_id))?;

        let revision = view.revision + 1;
        let inner = &mut view.content.content;
        inner.revision = revision;
        inner.selection.insert(turn_id.clone(), span_id.clone(), revision);
        view.content.updated_at = now;
        let view = view.clone();

        self.history
            .entry(view_id.clone())
            .or_default()
            .push(SelectionRecord {
                view_id: view_id.clone(),
                turn_id: turn_id.clone(),
                span_id: span_id.clone(),
                revision,
                selected_at: now,
            });
        Ok(view)
    }

    fn written_turn(&self, turn: &StoredTurn, is_new: bool) -> Written<TurnWithSpans> {
        let record = self.turn_with_spans(turn);
        Written { record, is_new }
    }
}

/// Storage configuration backed entirely by `MemoryStore`
pub struct MemoryStorage;

impl StorageTypes for MemoryStorage {
    type Content = MemoryStore;
    type Structure = MemoryStore;
    type View = MemoryStore;
    type Relation = MemoryStore;
}

/// Hands out one shared `MemoryStore` for every accessor
#[derive(Clone, Default)]
pub struct MemoryStores {
    store: Arc<MemoryStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stores<MemoryStorage> for MemoryStores {
    fn content(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }
    fn structure(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }
    fn view(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }
    fn relation(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }
}
