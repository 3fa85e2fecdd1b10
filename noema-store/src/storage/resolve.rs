//! View resolution
//!
//! Turns a `ThreadSnapshot` into one concrete transcript. The walk starts at
//! the root turns and descends one position at a time:
//!
//! - among the children of the current position, follow the one the view
//!   selected most recently, otherwise the most recently created one;
//! - at each turn, show the selected span, otherwise the span the fallback
//!   policy picks among active spans;
//! - soft-deleted turns and turns without an eligible span are left out of
//!   the transcript, but the walk continues below them.

use std::collections::HashMap;

use config::FallbackPolicy;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ids::{ContentId, TurnId};
use crate::storage::traits::ContentStore;
use crate::storage::types::{
    ResolvedTurn, ResolvedUsage, Selection, SpanWithUsages, StoredContentBlock, StoredTurn,
    ThreadSnapshot, Transcript, TurnWithSpans,
};

/// One position on the resolved path
#[derive(Debug, Clone, Copy)]
pub struct PathStep<'a> {
    pub turn: &'a TurnWithSpans,
    pub span: &'a SpanWithUsages,
    pub explicitly_selected: bool,
}

/// Walk a turn tree from its roots, letting `pick` choose among siblings
///
/// `items` must be in creation order; a parent is always created before its
/// children, so the walk terminates after at most `items.len()` steps.
fn walk<'a, T>(
    items: &'a [T],
    id_of: impl Fn(&T) -> &TurnId,
    parent_of: impl Fn(&T) -> Option<&TurnId>,
    pick: impl Fn(&[&'a T]) -> Option<&'a T>,
) -> Vec<&'a T> {
    let mut children: HashMap<Option<&TurnId>, Vec<&'a T>> = HashMap::new();
    for item in items {
        children.entry(parent_of(item)).or_default().push(item);
    }

    let mut path = Vec::new();
    let mut position: Option<&TurnId> = None;
    while path.len() < items.len() {
        let Some(next) = children.get(&position).and_then(|c| pick(c)) else {
            break;
        };
        position = Some(id_of(next));
        path.push(next);
    }
    path
}

/// Tip of the thread's default path (latest child at every position)
pub fn default_tip(turns: &[StoredTurn]) -> Option<&StoredTurn> {
    walk(
        turns,
        |t| &t.id,
        |t| t.parent_turn_id.as_ref(),
        |c| c.last().copied(),
    )
    .last()
    .copied()
}

/// Choose the span shown at a turn
///
/// Returns the span and whether it came from the selection.
pub fn choose_span<'a>(
    turn: &'a TurnWithSpans,
    selection: &Selection,
    policy: FallbackPolicy,
) -> Option<(&'a SpanWithUsages, bool)> {
    if let Some(selected) = selection.span_for(&turn.turn.id) {
        if let Some(span) = turn.spans.iter().find(|s| &s.span.id == selected) {
            return Some((span, true));
        }
    }
    let mut active = turn.spans.iter().filter(|s| s.span.is_active());
    let fallback = match policy {
        FallbackPolicy::Latest => active.next_back(),
        FallbackPolicy::First => active.next(),
    };
    fallback.map(|s| (s, false))
}

/// Turns on the view's path, deleted and spanless ones included
pub fn view_walk<'a>(turns: &'a [TurnWithSpans], selection: &Selection) -> Vec<&'a TurnWithSpans> {
    let pick = |candidates: &[&'a TurnWithSpans]| {
        candidates
            .iter()
            .enumerate()
            .filter_map(|(idx, t)| selection.get(&t.turn.id).map(|s| (s.revision, idx, *t)))
            .max_by_key(|(revision, idx, _)| (*revision, *idx))
            .map(|(_, _, t)| t)
            .or_else(|| candidates.last().copied())
    };

    walk(
        turns,
        |t| &t.turn.id,
        |t| t.turn.parent_turn_id.as_ref(),
        pick,
    )
}

/// Last turn on the view's path
///
/// Unlike the transcript tip this counts turns that are deleted or still
/// waiting for their first span, so appends made in a row chain correctly.
pub fn view_tip<'a>(turns: &'a [TurnWithSpans], selection: &Selection) -> Option<&'a TurnWithSpans> {
    view_walk(turns, selection).last().copied()
}

/// Span a view has to select to keep showing its turn at the position of
/// `at` once a newer sibling of `at` exists
///
/// `None` when the view does not reach that position, already selects the
/// turn it shows there, or shows no span at it.
pub fn pin_for_splice<'a>(
    turns: &'a [TurnWithSpans],
    selection: &Selection,
    at: &StoredTurn,
    policy: FallbackPolicy,
) -> Option<(&'a TurnWithSpans, &'a SpanWithUsages)> {
    let shown = view_walk(turns, selection)
        .into_iter()
        .find(|t| t.turn.parent_turn_id == at.parent_turn_id)?;
    if selection.contains(&shown.turn.id) {
        return None;
    }
    choose_span(shown, selection, policy).map(|(span, _)| (shown, span))
}

/// Resolve the path through a thread under a selection
pub fn resolve_path<'a>(
    turns: &'a [TurnWithSpans],
    selection: &Selection,
    policy: FallbackPolicy,
) -> Vec<PathStep<'a>> {
    view_walk(turns, selection)
        .into_iter()
        .filter(|t| !t.turn.is_deleted)
        .filter_map(|turn| {
            choose_span(turn, selection, policy).map(|(span, explicitly_selected)| PathStep {
                turn,
                span,
                explicitly_selected,
            })
        })
        .collect()
}

/// Resolve a snapshot and load every usage's content
///
/// `selection` is usually the snapshot view's own selection; previews pass a
/// modified copy.
pub async fn materialize<C: ContentStore + ?Sized>(
    content: &C,
    snapshot: &ThreadSnapshot,
    selection: &Selection,
    policy: FallbackPolicy,
) -> StorageResult<Transcript> {
    let steps = resolve_path(&snapshot.turns, selection, policy);

    let mut blocks: HashMap<&ContentId, StoredContentBlock> = HashMap::new();
    let mut turns = Vec::with_capacity(steps.len());
    for step in steps {
        let mut resolved = Vec::with_capacity(step.span.usages.len());
        for usage in &step.span.usages {
            let block = match blocks.get(&usage.content_id) {
                Some(block) => block.clone(),
                None => {
                    let block = content.get(&usage.content_id).await.map_err(|e| match e {
                        StorageError::NotFound { id, .. } => {
                            tracing::error!(
                                span_id = %step.span.span.id,
                                content_id = %id,
                                "Usage points at missing content"
                            );
                            StorageError::IntegrityViolation(format!(
                                "span {} references missing content {}",
                                step.span.span.id, id
                            ))
                        }
                        other => other,
                    })?;
                    blocks.insert(&usage.content_id, block.clone());
                    block
                }
            };
            resolved.push(ResolvedUsage {
                usage: usage.clone(),
                content: block,
            });
        }

        turns.push(ResolvedTurn {
            turn: step.turn.turn.clone(),
            span: step.span.span.clone(),
            explicitly_selected: step.explicitly_selected,
            content: resolved,
            alternatives: step.turn.spans.iter().map(|s| s.span.clone()).collect(),
        });
    }

    Ok(Transcript {
        view_id: snapshot.view.id.clone(),
        thread_id: snapshot.thread.id.clone(),
        revision: snapshot.view.revision,
        turns,
    })
}
