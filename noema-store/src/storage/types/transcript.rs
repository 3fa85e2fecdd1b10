//! Read-side types: consistent snapshots and resolved transcripts

use crate::storage::ids::{SpanId, ThreadId, TurnId, ViewId};
use crate::storage::types::{
    StoredContentBlock, StoredSpan, StoredThread, StoredTurn, StoredUsage, StoredView,
    TurnWithSpans,
};

/// Everything needed to resolve a view, read at one consistent point
#[derive(Clone, Debug)]
pub struct ThreadSnapshot {
    pub thread: StoredThread,
    pub view: StoredView,
    /// All turns of the thread in creation order, with their spans
    pub turns: Vec<TurnWithSpans>,
}

/// A usage with its content block loaded
#[derive(Clone, Debug)]
pub struct ResolvedUsage {
    pub usage: StoredUsage,
    pub content: StoredContentBlock,
}

/// One turn of a resolved transcript
#[derive(Clone, Debug)]
pub struct ResolvedTurn {
    pub turn: StoredTurn,
    /// The span this view shows at the turn
    pub span: StoredSpan,
    /// true when chosen by the view's selection, false when by fallback
    pub explicitly_selected: bool,
    /// Span usages in order, dereferenced into the content store
    pub content: Vec<ResolvedUsage>,
    /// Every span at the turn in creation order, for "pick an alternative"
    pub alternatives: Vec<StoredSpan>,
}

impl ResolvedTurn {
    /// Concatenated text of all usages
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|u| u.content.text().into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A view materialized into one concrete sequence of turns
#[derive(Clone, Debug)]
pub struct Transcript {
    pub view_id: ViewId,
    pub thread_id: ThreadId,
    /// View revision the transcript was resolved at
    pub revision: u64,
    pub turns: Vec<ResolvedTurn>,
}

impl Transcript {
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// (turn, span) pairs in order
    pub fn path(&self) -> Vec<(TurnId, SpanId)> {
        self.turns
            .iter()
            .map(|t| (t.turn.id.clone(), t.span.id.clone()))
            .collect()
    }

    /// Text of each turn in order
    pub fn texts(&self) -> Vec<String> {
        self.turns.iter().map(|t| t.text()).collect()
    }

    /// Last resolved turn
    pub fn tip(&self) -> Option<&ResolvedTurn> {
        self.turns.last()
    }

    pub fn turn(&self, turn_id: &TurnId) -> Option<&ResolvedTurn> {
        self.turns.iter().find(|t| &t.turn.id == turn_id)
    }
}
