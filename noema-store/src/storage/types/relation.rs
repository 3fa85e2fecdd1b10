//! Entity relation types
//!
//! Relations are directed edges between any two entity ids. Nothing assumes
//! the graph is acyclic; a few relation types carry local rules (see
//! `RelationType::is_lineage`).

use serde::{Deserialize, Serialize};

use crate::storage::ids::EntityId;

// ============================================================================
// RelationType
// ============================================================================

/// Type of relationship between entities
///
/// Stored as a string for extensibility - new relation types can be added
/// without code changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelationType(String);

impl RelationType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// View forked from another view
    /// Metadata: {"revision": <parent revision at fork time>}
    pub fn forked_from() -> Self {
        Self::new("forked_from")
    }

    /// Subconversation thread spawned from a parent view
    /// Metadata: {"at_turn_id": "...", "at_span_id": "..."}
    pub fn spawned_from() -> Self {
        Self::new("spawned_from")
    }

    /// Child view carrying the outcome for a parent turn
    /// Metadata: {"result_turn_id": "...", "result_span_id": "..."}
    pub fn result_for() -> Self {
        Self::new("result_for")
    }

    /// Entity cites another entity
    pub fn cites() -> Self {
        Self::new("cites")
    }

    /// Entity references another entity
    pub fn references() -> Self {
        Self::new("references")
    }

    /// Content derived from other content
    pub fn derived_from() -> Self {
        Self::new("derived_from")
    }

    /// Entities manually grouped together (store both directions)
    pub fn grouped_with() -> Self {
        Self::new("grouped_with")
    }

    /// Lineage relations: no self loops, at most one outgoing edge per source
    pub fn is_lineage(&self) -> bool {
        self.0 == "forked_from" || self.0 == "spawned_from"
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RelationType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for RelationType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// EntityRelation
// ============================================================================

/// A directed edge `from_id --relation--> to_id`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityRelation {
    pub from_id: EntityId,
    pub to_id: EntityId,
    pub relation: RelationType,
    /// Optional JSON metadata (e.g., {at_turn_id: "..."} for spawns)
    pub metadata: Option<serde_json::Value>,
    /// When the relation was created (unix timestamp ms)
    pub created_at: i64,
}

impl EntityRelation {
    pub fn new(from_id: EntityId, to_id: EntityId, relation: RelationType) -> Self {
        Self {
            from_id,
            to_id,
            relation,
            metadata: None,
            created_at: 0, // Set by store
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Read a string field from the metadata object
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_type_wellknown() {
        assert_eq!(RelationType::forked_from().as_str(), "forked_from");
        assert_eq!(RelationType::spawned_from().as_str(), "spawned_from");
        assert_eq!(RelationType::result_for().as_str(), "result_for");
        assert_eq!(RelationType::cites().as_str(), "cites");
        assert_eq!(RelationType::derived_from().as_str(), "derived_from");
    }

    #[test]
    fn test_lineage_types() {
        assert!(RelationType::forked_from().is_lineage());
        assert!(RelationType::spawned_from().is_lineage());
        assert!(!RelationType::cites().is_lineage());
        assert!(!RelationType::new("my_plugin_relation").is_lineage());
    }

    #[test]
    fn test_relation_with_metadata() {
        let relation = EntityRelation::new(
            EntityId::from_string("child"),
            EntityId::from_string("parent"),
            RelationType::spawned_from(),
        )
        .with_metadata(serde_json::json!({ "at_turn_id": "turn-123" }));

        assert_eq!(relation.metadata_str("at_turn_id"), Some("turn-123"));
        assert_eq!(relation.metadata_str("missing"), None);
    }
}
