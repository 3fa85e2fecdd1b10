//! In-memory RelationStore implementation

use async_trait::async_trait;

use super::{MemoryState, MemoryStore};
use crate::storage::error::StorageResult;
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::EntityId;
use crate::storage::traits::{check_relation, RelationStore};
use crate::storage::types::{EntityRelation, RelationType};

impl MemoryState {
    /// Check the relation's rules, then insert or replace it
    pub(super) fn put_relation(&mut self, mut relation: EntityRelation) -> StorageResult<EntityRelation> {
        check_relation(
            &relation.from_id,
            &relation.to_id,
            &relation.relation,
            self.relations
                .iter()
                .filter(|r| r.from_id == relation.from_id && r.relation == relation.relation)
                .map(|r| &r.to_id),
        )?;

        relation.created_at = unix_timestamp();
        self.relations.retain(|r| {
            !(r.from_id == relation.from_id
                && r.to_id == relation.to_id
                && r.relation == relation.relation)
        });
        self.relations.push(relation.clone());
        Ok(relation)
    }

    pub(super) fn matching<'a>(
        &'a self,
        relation: Option<&'a RelationType>,
        endpoint: impl Fn(&EntityRelation) -> bool + 'a,
    ) -> Vec<EntityRelation> {
        self.relations
            .iter()
            .rev()
            .filter(|r| endpoint(r))
            .filter(|r| relation.is_none_or(|t| &r.relation == t))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RelationStore for MemoryStore {
    async fn link(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: RelationType,
        metadata: Option<serde_json::Value>,
    ) -> StorageResult<EntityRelation> {
        let mut relation = EntityRelation::new(from_id.clone(), to_id.clone(), relation);
        relation.metadata = metadata;
        self.lock().put_relation(relation)
    }

    async fn unlink(
        &self,
        from_id: &EntityId,
        to_id: &EntityId,
        relation: &RelationType,
    ) -> StorageResult<bool> {
        let mut state = self.lock();
        let before = state.relations.len();
        state
            .relations
            .retain(|r| !(&r.from_id == from_id && &r.to_id == to_id && &r.relation == relation));
        Ok(state.relations.len() != before)
    }

    async fn backlinks(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>> {
        Ok(self.lock().matching(relation, |r| &r.to_id == id))
    }

    async fn relations_from(
        &self,
        id: &EntityId,
        relation: Option<&RelationType>,
    ) -> StorageResult<Vec<EntityRelation>> {
        Ok(self.lock().matching(relation, |r| &r.from_id == id))
    }
}
