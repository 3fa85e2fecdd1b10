//! Turn edit plans
//!
//! An edit splices a sibling of an existing turn and selects it. The store
//! applies the whole plan in one unit, so a failed or dropped edit never
//! leaves an unselected sibling on the default path.

use config::FallbackPolicy;

use crate::storage::ids::{ClientToken, SpanId, TurnId, ViewId};
use crate::storage::types::{EntityRelation, NewUsage, StoredView, TurnWithSpans};

#[derive(Clone, Debug)]
pub struct EditPlan {
    /// View the edit is made through
    pub view_id: ViewId,
    /// Turn whose content is replaced
    pub turn_id: TurnId,
    pub usages: Vec<NewUsage>,
    /// Select the edit only in a new fork of the view
    pub fork: bool,
    /// Fallback used to find the span the view shows before the edit
    pub policy: FallbackPolicy,
    pub token: ClientToken,
    /// Checked against the view before anything is written
    pub expected_revision: Option<u64>,
}

impl EditPlan {
    /// Metadata of the `forked_from` edge written by a forking edit
    pub fn fork_metadata(&self, revision: u64, edited: &TurnId) -> serde_json::Value {
        serde_json::json!({
            "revision": revision,
            "edit_turn_id": edited.as_str(),
        })
    }
}

/// Records written by an edit
#[derive(Clone, Debug)]
pub struct EditedTurn {
    /// The spliced sibling with its single span
    pub turn: TurnWithSpans,
    /// View that now shows the edit (the fork when one was requested)
    pub view: StoredView,
    /// The view named in the plan, after the edit
    pub source: StoredView,
    /// Span pinned in the source view so a forking edit leaves its
    /// transcript unchanged
    pub pinned: Option<SpanId>,
    /// `forked_from` edge when the edit went into a new fork
    pub fork: Option<EntityRelation>,
}

/// True when a `forked_from` edge was written by the edit that spliced `turn`
pub fn is_edit_fork(relation: &EntityRelation, turn: &TurnId) -> bool {
    relation
        .metadata
        .as_ref()
        .and_then(|m| m.get("edit_turn_id"))
        .and_then(|v| v.as_str())
        == Some(turn.as_str())
}
