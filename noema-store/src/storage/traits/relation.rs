//! RelationStore trait for the entity relation index

use async_trait::async_trait;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ids::EntityId;
use crate::storage::types::{EntityRelation, RelationType};

/// Trait for directed, typed edges between any two entities
///
/// Edges are keyed by `(from, to, relation)`; linking an existing key
/// replaces its metadata. Cycles are allowed.
#[async_trait]
pub trait RelationStore: Send + Sync {
    /// Add or replace a relation
    ///
    /// Lineage relations (`forked_from`, `spawned_from`) reject self loops and
    /// a second outgoing edge from the same source.
    async fn link(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: RelationType,
        metadata: Option<serde_json::Value>,
    ) -> StorageResult<EntityRelation>;

    /// Remove a relation; returns whether it existed
    async fn unlink(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: &RelationType,
    ) -> StorageResult<bool>;

    /// Edges pointing at `id`, newest first
    async fn backlinks(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>>;

    /// Edges leaving `id`, newest first
    async fn relations_from(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>>;
}

/// Check the local rules of a relation type before writing it
///
/// `existing_targets` are the current `to_id`s of edges with the same source
/// and type.
pub(crate) fn check_relation<'a>(
    from_id: &EntityId,
    to_id: &EntityId,
    relation: &RelationType,
    mut existing_targets: impl Iterator<Item = &'a EntityId>,
) -> StorageResult<()> {
    if !relation.is_lineage() {
        return Ok(());
    }
    if from_id == to_id {
        return Err(StorageError::RelationConstraint(format!(
            "{} cannot point at itself ({})",
            relation, from_id
        )));
    }
    if let Some(other) = existing_targets.find(|t| *t != to_id) {
        return Err(StorageError::RelationConstraint(format!(
            "{} already has a {} edge (to {})",
            from_id, relation, other
        )));
    }
    Ok(())
}
