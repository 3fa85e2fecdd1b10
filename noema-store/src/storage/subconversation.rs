//! Subconversation planning
//!
//! A spawn copies part of a parent view's resolved transcript into a new
//! thread. Nothing is duplicated in the content store: the child's usages
//! point at the parent's content ids.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::ids::{TurnId, ViewId};
use crate::storage::types::{NewUsage, ResolvedTurn, SpawnPlan, SpawnTurn, Transcript};

/// Which part of the parent transcript a spawned thread starts with
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ScopeFilter {
    /// The whole resolved transcript
    #[default]
    All,
    /// The last `n` resolved turns
    LastTurns(usize),
    /// Everything up to and including the given turn
    UpTo(TurnId),
}

impl ScopeFilter {
    /// Narrow resolved turns to this scope
    pub fn apply<'a>(&self, turns: &'a [ResolvedTurn]) -> StorageResult<&'a [ResolvedTurn]> {
        match self {
            ScopeFilter::All => Ok(turns),
            ScopeFilter::LastTurns(n) => Ok(&turns[turns.len().saturating_sub(*n)..]),
            ScopeFilter::UpTo(turn_id) => turns
                .iter()
                .position(|t| &t.turn.id == turn_id)
                .map(|idx| &turns[..=idx])
                .ok_or_else(|| {
                    StorageError::InvalidSelection(format!(
                        "turn {} is not on the resolved path",
                        turn_id
                    ))
                }),
        }
    }
}

/// Build the plan for spawning from `parent`
pub fn plan_spawn(
    parent_view_id: &ViewId,
    parent: &Transcript,
    scope: &ScopeFilter,
    name: Option<String>,
) -> StorageResult<SpawnPlan> {
    let scoped = scope.apply(&parent.turns)?;

    let turns = scoped
        .iter()
        .map(|t| SpawnTurn {
            role: t.turn.role,
            model_id: t.span.model_id.clone(),
            usages: t
                .content
                .iter()
                .map(|u| NewUsage::new(u.usage.content_id.clone(), u.usage.role.clone()))
                .collect(),
        })
        .collect();

    let last = scoped.last();
    Ok(SpawnPlan {
        parent_view_id: parent_view_id.clone(),
        name,
        turns,
        at_turn_id: last.map(|t| t.turn.id.clone()),
        at_span_id: last.map(|t| t.span.id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::{ContentId, SpanId, ThreadId, UsageId};
    use crate::storage::types::{
        stored, ContentBlock, OwnerKind, ResolvedUsage, Role, Span, Turn, Usage, UsageRole,
    };

    fn transcript(n: usize) -> Transcript {
        let thread = ThreadId::new();
        let turns = (0..n)
            .map(|i| {
                let turn_id = TurnId::from_string(format!("t{}", i));
                let span_id = SpanId::from_string(format!("s{}", i));
                let content = ContentId::from_string(format!("c{}", i));
                let usage = stored(
                    UsageId::new(),
                    Usage {
                        content_id: content.clone(),
                        role: UsageRole::message(),
                        owner_kind: OwnerKind::Span,
                        owner_id: span_id.to_string(),
                        sequence: 0,
                    },
                    0,
                );
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                ResolvedTurn {
                    turn: stored(turn_id.clone(), Turn::new(thread.clone(), role, i as u32, None), 0),
                    span: stored(span_id, Span::new(turn_id, Some("model-x".into())), 0),
                    explicitly_selected: false,
                    content: vec![ResolvedUsage {
                        usage,
                        content: stored(content, ContentBlock::plain(format!("msg {}", i)), 0),
                    }],
                    alternatives: Vec::new(),
                }
            })
            .collect();
        Transcript {
            view_id: ViewId::new(),
            thread_id: thread,
            revision: 0,
            turns,
        }
    }

    #[test]
    fn test_scope_all() {
        let t = transcript(4);
        assert_eq!(ScopeFilter::All.apply(&t.turns).unwrap().len(), 4);
    }

    #[test]
    fn test_scope_last_turns() {
        let t = transcript(4);
        let scoped = ScopeFilter::LastTurns(2).apply(&t.turns).unwrap();
        assert_eq!(scoped.len(), 2);
        assert_eq!(scoped[0].turn.id.as_str(), "t2");
        assert_eq!(ScopeFilter::LastTurns(10).apply(&t.turns).unwrap().len(), 4);
        assert!(ScopeFilter::LastTurns(0).apply(&t.turns).unwrap().is_empty());
    }

    #[test]
    fn test_scope_up_to() {
        let t = transcript(4);
        let scoped = ScopeFilter::UpTo(TurnId::from_string("t1")).apply(&t.turns).unwrap();
        assert_eq!(scoped.len(), 2);

        let err = ScopeFilter::UpTo(TurnId::from_string("nope")).apply(&t.turns).unwrap_err();
        assert!(matches!(err, StorageError::InvalidSelection(_)));
    }

    #[test]
    fn test_plan_reuses_content_ids() {
        let t = transcript(3);
        let plan = plan_spawn(&t.view_id, &t, &ScopeFilter::LastTurns(2), Some("sub".into())).unwrap();

        assert_eq!(plan.turns.len(), 2);
        assert_eq!(plan.turns[0].role, Role::Assistant);
        assert_eq!(plan.turns[0].usages[0].content_id.as_str(), "c1");
        assert_eq!(plan.turns[0].model_id.as_deref(), Some("model-x"));
        assert_eq!(plan.at_turn_id.as_ref().map(|t| t.as_str()), Some("t2"));
        assert_eq!(plan.at_span_id.as_ref().map(|s| s.as_str()), Some("s2"));
        assert_eq!(plan.relation_metadata()["at_turn_id"], "t2");
    }

    #[test]
    fn test_plan_from_empty_transcript() {
        let t = transcript(0);
        let plan = plan_spawn(&t.view_id, &t, &ScopeFilter::All, None).unwrap();
        assert!(plan.turns.is_empty());
        assert!(plan.at_turn_id.is_none());
        assert!(plan.relation_metadata()["at_turn_id"].is_null());
    }
}
