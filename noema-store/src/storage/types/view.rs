//! View types
//!
//! A view selects one span per turn of its thread and so produces one
//! concrete transcript. The selection map sits behind an `Arc`: a fork clones
//! the pointer, and the first write on either side copies the map
//! (`Arc::make_mut`), so forking is O(1) no matter how long the thread is.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::storage::ids::{SpanId, ThreadId, TurnId, ViewId};
use crate::storage::types::StoredEditable;

/// A span chosen at a turn, with the view revision that chose it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedSpan {
    pub span_id: SpanId,
    pub revision: u64,
}

/// Copy-on-write map from turn to selected span
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selection(Arc<BTreeMap<TurnId, SelectedSpan>>);

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: BTreeMap<TurnId, SelectedSpan>) -> Self {
        Self(Arc::new(map))
    }

    pub fn get(&self, turn_id: &TurnId) -> Option<&SelectedSpan> {
        self.0.get(turn_id)
    }

    /// Span selected at a turn, if any
    pub fn span_for(&self, turn_id: &TurnId) -> Option<&SpanId> {
        self.0.get(turn_id).map(|s| &s.span_id)
    }

    pub fn contains(&self, turn_id: &TurnId) -> bool {
        self.0.contains_key(turn_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TurnId, &SelectedSpan)> {
        self.0.iter()
    }

    /// Record a selection, copying the map first if it is shared
    pub fn insert(&mut self, turn_id: TurnId, span_id: SpanId, revision: u64) {
        Arc::make_mut(&mut self.0).insert(turn_id, SelectedSpan { span_id, revision });
    }

    /// Whether two selections still share storage (no write since fork)
    pub fn shares_storage_with(&self, other: &Selection) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Core view data
///
/// Use with `StoredEditable<ViewId, View>` for the full stored representation.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    pub thread_id: ThreadId,
    /// View this one was forked from (None for main views)
    pub parent_view_id: Option<ViewId>,
    pub name: Option<String>,
    pub selection: Selection,
    pub summary: Option<String>,
    /// Free-form per-view settings (system prompt, model choice, ...)
    pub overrides: Option<serde_json::Value>,
    /// Bumped by every committed mutation of this view
    pub revision: u64,
    pub is_deleted: bool,
}

impl View {
    pub fn new(thread_id: ThreadId, name: Option<String>) -> Self {
        Self {
            thread_id,
            parent_view_id: None,
            name,
            selection: Selection::new(),
            summary: None,
            overrides: None,
            revision: 0,
            is_deleted: false,
        }
    }

    /// A fork of `parent`: same thread, shared selection
    ///
    /// The fork continues from the parent's revision so that its own later
    /// selections always rank above the inherited ones.
    pub fn forked_from(parent_id: ViewId, parent: &View, name: Option<String>) -> Self {
        Self {
            thread_id: parent.thread_id.clone(),
            parent_view_id: Some(parent_id),
            name,
            selection: parent.selection.clone(),
            summary: parent.summary.clone(),
            overrides: parent.overrides.clone(),
            revision: parent.revision,
            is_deleted: false,
        }
    }

    pub fn is_fork(&self) -> bool {
        self.parent_view_id.is_some()
    }
}

pub type StoredView = StoredEditable<ViewId, View>;

/// Mutable view fields; `None` leaves a field unchanged
#[derive(Clone, Debug, Default)]
pub struct ViewUpdate {
    pub name: Option<String>,
    pub summary: Option<String>,
    pub overrides: Option<serde_json::Value>,
}

impl ViewUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.summary.is_none() && self.overrides.is_none()
    }
}

/// One committed selection, kept forever
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    pub view_id: ViewId,
    pub turn_id: TurnId,
    pub span_id: SpanId,
    /// View revision this selection produced
    pub revision: u64,
    pub selected_at: i64,
}
