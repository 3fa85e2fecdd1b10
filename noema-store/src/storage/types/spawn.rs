//! Subconversation spawn plans
//!
//! A plan is computed from the parent's resolved transcript and handed to the
//! store, which writes the whole child thread in one unit.

use crate::storage::ids::{SpanId, TurnId, ViewId};
use crate::storage::types::{
    EntityRelation, NewUsage, Role, StoredThread, StoredView, TurnWithSpans,
};

/// One turn to recreate in the child thread
#[derive(Clone, Debug)]
pub struct SpawnTurn {
    pub role: Role,
    pub model_id: Option<String>,
    /// Usages pointing at the parent's content ids
    pub usages: Vec<NewUsage>,
}

#[derive(Clone, Debug)]
pub struct SpawnPlan {
    pub parent_view_id: ViewId,
    pub name: Option<String>,
    /// Turns in path order; each becomes the child of the previous one
    pub turns: Vec<SpawnTurn>,
    /// Last parent turn/span inside the scope, recorded on the relation
    pub at_turn_id: Option<TurnId>,
    pub at_span_id: Option<SpanId>,
}

impl SpawnPlan {
    pub fn relation_metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "at_turn_id": self.at_turn_id.as_ref().map(|t| t.as_str()),
            "at_span_id": self.at_span_id.as_ref().map(|s| s.as_str()),
        })
    }
}

/// Records written by a spawn
#[derive(Clone, Debug)]
pub struct SpawnedThread {
    pub thread: StoredThread,
    /// Child main view, with every copied span selected
    pub view: StoredView,
    pub turns: Vec<TurnWithSpans>,
    /// `spawned_from`: child thread -> parent view
    pub relation: EntityRelation,
}
