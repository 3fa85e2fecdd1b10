//! Mutation notifications
//!
//! One `MutationEvent` is published per committed mutation, after the store
//! call returned. Consumers (hooks, automation, UI refresh) interpret them;
//! the store attaches no meaning beyond the four fields.

use serde::{Deserialize, Serialize};

use crate::storage::helper::unix_timestamp;

/// Kind of entity a mutation touched
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Content,
    Thread,
    Turn,
    Span,
    View,
    Relation,
}

/// What happened to the entity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationOp {
    Created,
    Updated,
    Selected,
    Forked,
    Spawned,
    Deleted,
    Withdrawn,
    Linked,
    Unlinked,
    Swept,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub entity_type: EntityKind,
    pub entity_id: String,
    pub operation: MutationOp,
    /// Unix timestamp (milliseconds) after the commit
    pub timestamp: i64,
}

impl MutationEvent {
    pub fn new(entity_type: EntityKind, entity_id: impl ToString, operation: MutationOp) -> Self {
        Self {
            entity_type,
            entity_id: entity_id.to_string(),
            operation,
            timestamp: unix_timestamp(),
        }
    }
}
