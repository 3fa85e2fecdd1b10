//! SQLite implementation of ViewStore

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use super::relation::{put_relation, query_edges};
use super::structure::{
    check_usages, insert_span, insert_thread, insert_turn, load_span, load_thread, load_turn,
    replayed_turn, thread_turns, turn_with_spans,
};
use super::SqliteStore;
use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::{EntityId, SpanId, ThreadId, TurnId, ViewId};
use crate::storage::resolve::pin_for_splice;
use crate::storage::traits::{check_live, check_revision, check_selection, ViewStore};
use crate::storage::types::{
    is_edit_fork, stored_editable, EditPlan, EditedTurn, EntityRelation, RelationType,
    SelectedSpan, Selection, SelectionRecord, SpawnPlan, SpawnedThread, StoredView,
    ThreadSnapshot, TurnWithSpans, View, ViewUpdate, Written,
};

/// Initialize view schema (views, selections, selection history)
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS views (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL REFERENCES threads(id),
            parent_view_id TEXT REFERENCES views(id),
            name TEXT,
            summary TEXT,
            overrides TEXT,
            revision INTEGER NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_views_thread ON views(thread_id);

        -- Current selection: one span per turn per view
        CREATE TABLE IF NOT EXISTS view_selections (
            view_id TEXT NOT NULL REFERENCES views(id),
            turn_id TEXT NOT NULL REFERENCES turns(id),
            span_id TEXT NOT NULL REFERENCES spans(id),
            revision INTEGER NOT NULL,
            PRIMARY KEY (view_id, turn_id)
        );

        -- Append-only record of every selection
        CREATE TABLE IF NOT EXISTS selection_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            view_id TEXT NOT NULL REFERENCES views(id),
            turn_id TEXT NOT NULL,
            span_id TEXT NOT NULL,
            revision INTEGER NOT NULL,
            selected_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_selection_history_view ON selection_history(view_id, id);
        "#,
    )?;
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_selection(conn: &Connection, view_id: &ViewId) -> StorageResult<Selection> {
    let mut stmt =
        conn.prepare("SELECT turn_id, span_id, revision FROM view_selections WHERE view_id = ?1")?;
    let entries = stmt
        .query_map(params![view_id.as_str()], |row| {
            let revision: i64 = row.get(2)?;
            Ok((
                row.get::<_, TurnId>(0)?,
                SelectedSpan {
                    span_id: row.get(1)?,
                    revision: revision as u64,
                },
            ))
        })?
        .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;
    Ok(Selection::from_map(entries))
}

pub(super) fn load_view(conn: &Connection, id: &ViewId) -> StorageResult<StoredView> {
    let row = conn
        .query_row(
            "SELECT thread_id, parent_view_id, name, summary, overrides, revision, is_deleted,
                    created_at, updated_at
             FROM views WHERE id = ?1",
            params![id.as_str()],
            |row| {
                let revision: i64 = row.get(5)?;
                let view = View {
                    thread_id: row.get(0)?,
                    parent_view_id: row.get(1)?,
                    name: row.get(2)?,
                    selection: Selection::new(),
                    summary: row.get(3)?,
                    overrides: None,
                    revision: revision as u64,
                    is_deleted: row.get(6)?,
                };
                let overrides: Option<String> = row.get(4)?;
                Ok((view, overrides, row.get::<_, i64>(7)?, row.get::<_, i64>(8)?))
            },
        )
        .optional()?;
    let Some((mut view, overrides, created_at, updated_at)) = row else {
        return Err(StorageError::not_found(RecordKind::View, id));
    };

    view.overrides = overrides.as_deref().map(serde_json::from_str).transpose()?;
    view.selection = load_selection(conn, id)?;
    Ok(stored_editable(id.clone(), view, created_at, updated_at))
}

pub(super) fn insert_view(conn: &Connection, view: &StoredView) -> StorageResult<()> {
    let overrides = view.overrides.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "INSERT INTO views (id, thread_id, parent_view_id, name, summary, overrides, revision,
                            is_deleted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            view.id.as_str(),
            view.thread_id.as_str(),
            view.parent_view_id.as_ref().map(|p| p.as_str()),
            view.name,
            view.summary,
            overrides,
            view.revision as i64,
            view.is_deleted,
            view.created_at,
            view.updated_at(),
        ],
    )?;
    Ok(())
}

/// Write the mutable fields of a view back
fn write_view(conn: &Connection, id: &ViewId, view: &View, updated_at: i64) -> StorageResult<()> {
    let overrides = view.overrides.as_ref().map(serde_json::to_string).transpose()?;
    conn.execute(
        "UPDATE views SET name = ?1, summary = ?2, overrides = ?3, revision = ?4,
                          is_deleted = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            view.name,
            view.summary,
            overrides,
            view.revision as i64,
            view.is_deleted,
            updated_at,
            id.as_str(),
        ],
    )?;
    Ok(())
}

/// Write a selection entry and its history record, bumping the revision
pub(super) fn record_selection(
    conn: &Connection,
    view_id: &ViewId,
    turn_id: &TurnId,
    span_id: &SpanId,
) -> StorageResult<()> {
    let now = unix_timestamp();
    let revision: i64 = conn
        .query_row(
            "SELECT revision FROM views WHERE id = ?1",
            params![view_id.as_str()],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| StorageError::not_found(RecordKind::View, view_id))?;
    let revision = revision + 1;

    conn.execute(
        "INSERT OR REPLACE INTO view_selections (view_id, turn_id, span_id, revision)
         VALUES (?1, ?2, ?3, ?4)",
        params![view_id.as_str(), turn_id.as_str(), span_id.as_str(), revision],
    )?;
    conn.execute(
        "INSERT INTO selection_history (view_id, turn_id, span_id, revision, selected_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![view_id.as_str(), turn_id.as_str(), span_id.as_str(), revision, now],
    )?;
    conn.execute(
        "UPDATE views SET revision = ?1, updated_at = ?2 WHERE id = ?3",
        params![revision, now, view_id.as_str()],
    )?;
    Ok(())
}

// ============================================================================
// ViewStore Implementation
// ============================================================================

#[async_trait]
impl ViewStore for SqliteStore {
    async fn create_view(&self, thread_id: &ThreadId, name: Option<&str>) -> StorageResult<StoredView> {
        let conn = self.conn();
        load_thread(&conn, thread_id)?;

        let now = unix_timestamp();
        let view = stored_editable(
            ViewId::new(),
            View::new(thread_id.clone(), name.map(str::to_string)),
            now,
            now,
        );
        insert_view(&conn, &view)?;
        Ok(view)
    }

    async fn get_view(&self, id: &ViewId) -> StorageResult<StoredView> {
        load_view(&self.conn(), id)
    }

    async fn list_views(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredView>> {
        let conn = self.conn();
        load_thread(&conn, thread_id)?;

        let ids = {
            let mut stmt = conn.prepare(
                "SELECT id FROM views WHERE thread_id = ?1 AND is_deleted = 0 ORDER BY rowid",
            )?;
            stmt.query_map(params![thread_id.as_str()], |row| row.get::<_, ViewId>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        ids.iter().map(|id| load_view(&conn, id)).collect()
    }

    async fn snapshot(&self, view_id: &ViewId) -> StorageResult<ThreadSnapshot> {
        let mut conn = self.conn();
        // Read transaction for a consistent point
        let tx = conn.transaction()?;
        let view = load_view(&tx, view_id)?;
        check_live(&view)?;
        let thread = load_thread(&tx, &view.thread_id)?;
        let turns = thread_turns(&tx, &view.thread_id)?
            .into_iter()
            .map(|turn| turn_with_spans(&tx, turn))
            .collect::<StorageResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(ThreadSnapshot { thread, view, turns })
    }

    async fn select_span(
        &self,
        view_id: &ViewId,
        turn_id: &TurnId,
        span_id: &SpanId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let view = load_view(&tx, view_id)?;
        check_live(&view)?;
        check_selection(&view, &load_turn(&tx, turn_id)?, &load_span(&tx, span_id)?)?;
        check_revision(view_id, &view, expected_revision)?;

        record_selection(&tx, view_id, turn_id, span_id)?;
        let view = load_view(&tx, view_id)?;
        tx.commit()?;

        tracing::debug!(view_id = %view_id, turn_id = %turn_id, span_id = %span_id, revision = view.revision, "Selected span");
        Ok(view)
    }

    async fn fork_view(
        &self,
        view_id: &ViewId,
        name: Option<&str>,
        expected_revision: Option<u64>,
    ) -> StorageResult<(StoredView, EntityRelation)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let parent = load_view(&tx, view_id)?;
        check_live(&parent)?;
        check_revision(view_id, &parent, expected_revision)?;

        let now = unix_timestamp();
        let child = stored_editable(
            ViewId::new(),
            View::forked_from(view_id.clone(), &parent, name.map(str::to_string)),
            now,
            now,
        );
        insert_view(&tx, &child)?;
        tx.execute(
            "INSERT INTO view_selections (view_id, turn_id, span_id, revision)
             SELECT ?1, turn_id, span_id, revision FROM view_selections WHERE view_id = ?2",
            params![child.id.as_str(), view_id.as_str()],
        )?;
        let relation = put_relation(
            &tx,
            EntityRelation::new((&child.id).into(), view_id.into(), RelationType::forked_from())
                .with_metadata(serde_json::json!({ "revision": parent.revision })),
        )?;
        tx.commit()?;
        Ok((child, relation))
    }

    async fn update_view(
        &self,
        view_id: &ViewId,
        update: &ViewUpdate,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = load_view(&tx, view_id)?;
        check_live(&current)?;
        check_revision(view_id, &current, expected_revision)?;
        if update.is_empty() {
            return Ok(current);
        }

        let now = unix_timestamp();
        let mut view = current.into_content().into_content();
        if let Some(name) = &update.name {
            view.name = Some(name.clone());
        }
        if let Some(summary) = &update.summary {
            view.summary = Some(summary.clone());
        }
        if let Some(overrides) = &update.overrides {
            view.overrides = Some(overrides.clone());
        }
        view.revision += 1;
        write_view(&tx, view_id, &view, now)?;
        let view = load_view(&tx, view_id)?;
        tx.commit()?;
        Ok(view)
    }

    async fn delete_view(
        &self,
        view_id: &ViewId,
        expected_revision: Option<u64>,
    ) -> StorageResult<StoredView> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let current = load_view(&tx, view_id)?;
        check_live(&current)?;
        check_revision(view_id, &current, expected_revision)?;

        let mut view = current.into_content().into_content();
        view.is_deleted = true;
        view.revision += 1;
        write_view(&tx, view_id, &view, unix_timestamp())?;
        let view = load_view(&tx, view_id)?;
        tx.commit()?;
        Ok(view)
    }

    async fn selection_history(&self, view_id: &ViewId) -> StorageResult<Vec<SelectionRecord>> {
        let conn = self.conn();
        load_view(&conn, view_id)?;

        let mut stmt = conn.prepare(
            "SELECT turn_id, span_id, revision, selected_at
             FROM selection_history WHERE view_id = ?1 ORDER BY id",
        )?;
        let records = stmt
            .query_map(params![view_id.as_str()], |row| {
                let revision: i64 = row.get(2)?;
                Ok(SelectionRecord {
                    view_id: view_id.clone(),
                    turn_id: row.get(0)?,
                    span_id: row.get(1)?,
                    revision: revision as u64,
                    selected_at: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    async fn create_subconversation(&self, plan: &SpawnPlan) -> StorageResult<SpawnedThread> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let parent = load_view(&tx, &plan.parent_view_id)?;
        check_live(&parent)?;
        for turn in &plan.turns {
            check_usages(&tx, &turn.usages)?;
        }

        let (thread, view) = insert_thread(&tx, plan.name.as_deref())?;
        let relation = put_relation(
            &tx,
            EntityRelation::new(
                (&thread.id).into(),
                (&plan.parent_view_id).into(),
                RelationType::spawned_from(),
            )
            .with_metadata(plan.relation_metadata()),
        )?;

        let mut parent_turn = None;
        let mut turns = Vec::with_capacity(plan.turns.len());
        for planned in &plan.turns {
            let turn = insert_turn(&tx, &thread.id, parent_turn.as_ref(), planned.role, None)?;
            let span = insert_span(&tx, &turn.id, &planned.usages, planned.model_id.as_deref(), None)?;
            record_selection(&tx, &view.id, &turn.id, &span.span.id)?;
            turns.push(TurnWithSpans {
                turn: turn.clone(),
                spans: vec![span],
            });
            parent_turn = Some(turn);
        }

        let view = load_view(&tx, &view.id)?;
        tx.commit()?;
        Ok(SpawnedThread {
            thread,
            view,
            turns,
            relation,
        })
    }

    async fn edit_turn(&self, plan: &EditPlan) -> StorageResult<Written<EditedTurn>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let source = load_view(&tx, &plan.view_id)?;
        check_live(&source)?;
        let thread_id = source.thread_id.clone();

        if let Some(turn) = replayed_turn(&tx, &thread_id, &plan.token)? {
            let turn = turn_with_spans(&tx, turn)?;
            let fork = if plan.fork {
                query_edges(
                    &tx,
                    "to_id",
                    &EntityId::from(&plan.view_id),
                    Some(&RelationType::forked_from()),
                )?
                .into_iter()
                .find(|r| is_edit_fork(r, &turn.turn.id))
            } else {
                None
            };
            let view = match &fork {
                Some(r) => load_view(&tx, &ViewId::from_string(r.from_id.as_str()))?,
                None => source.clone(),
            };
            return Ok(Written::replayed(EditedTurn {
                turn,
                view,
                source,
                pinned: None,
                fork,
            }));
        }

        check_revision(&plan.view_id, &source, plan.expected_revision)?;
        let at = load_turn(&tx, &plan.turn_id)?;
        if at.thread_id != thread_id {
            return Err(StorageError::InvalidSelection(format!(
                "turn {} is not in thread {}",
                at.id, thread_id
            )));
        }
        check_usages(&tx, &plan.usages)?;
        let parent = match &at.parent_turn_id {
            Some(id) => Some(load_turn(&tx, id)?),
            None => None,
        };

        let pinned = if plan.fork {
            let turns = thread_turns(&tx, &thread_id)?
                .into_iter()
                .map(|turn| turn_with_spans(&tx, turn))
                .collect::<StorageResult<Vec<_>>>()?;
            pin_for_splice(&turns, &source.selection, &at, plan.policy)
                .map(|(turn, span)| (turn.turn.id.clone(), span.span.id.clone()))
        } else {
            None
        };
        if let Some((turn_id, span_id)) = &pinned {
            record_selection(&tx, &plan.view_id, turn_id, span_id)?;
        }

        let turn = insert_turn(&tx, &thread_id, parent.as_ref(), at.role, Some(&plan.token))?;
        let span = insert_span(&tx, &turn.id, &plan.usages, None, None)?;
        let source = load_view(&tx, &plan.view_id)?;

        let (target, fork) = if plan.fork {
            let now = unix_timestamp();
            let child = stored_editable(
                ViewId::new(),
                View::forked_from(plan.view_id.clone(), &source, None),
                now,
                now,
            );
            insert_view(&tx, &child)?;
            tx.execute(
                "INSERT INTO view_selections (view_id, turn_id, span_id, revision)
                 SELECT ?1, turn_id, span_id, revision FROM view_selections WHERE view_id = ?2",
                params![child.id.as_str(), plan.view_id.as_str()],
            )?;
            let relation = put_relation(
                &tx,
                EntityRelation::new(
                    (&child.id).into(),
                    (&plan.view_id).into(),
                    RelationType::forked_from(),
                )
                .with_metadata(plan.fork_metadata(source.revision, &turn.id)),
            )?;
            (child.id, Some(relation))
        } else {
            (plan.view_id.clone(), None)
        };
        record_selection(&tx, &target, &turn.id, &span.span.id)?;
        let view = load_view(&tx, &target)?;
        let source = if plan.fork { source } else { view.clone() };
        tx.commit()?;

        tracing::debug!(turn_id = %turn.id, sibling_of = %at.id, view_id = %view.id, "Edited turn");
        Ok(Written::new(EditedTurn {
            turn: TurnWithSpans {
                turn,
                spans: vec![span],
            },
            view,
            source,
            pinned: pinned.map(|(_, span_id)| span_id),
            fork,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::ClientToken;
    use crate::storage::traits::{ContentStore, RelationStore, StructureStore};
    use crate::storage::types::{ContentBlock, NewUsage, Role};

    async fn two_spans(store: &SqliteStore) -> (ViewId, TurnId, Vec<SpanId>) {
        let (thread, view) = store.create_thread(None).await.unwrap();
        let turn = store.append_turn(&thread.id, Role::Assistant, &ClientToken::new()).await.unwrap().record;
        let mut spans = Vec::new();
        for text in ["one", "two"] {
            let id = store.put(ContentBlock::plain(text)).await.unwrap().id;
            let span = store
                .add_span(&turn.id, &[NewUsage::message(id)], None, &ClientToken::new())
                .await
                .unwrap();
            spans.push(span.record.span.id);
        }
        (view.id, turn.id, spans)
    }

    #[tokio::test]
    async fn test_select_and_history() {
        let store = SqliteStore::in_memory().unwrap();
        let (view, turn, spans) = two_spans(&store).await;

        store.select_span(&view, &turn, &spans[0], Some(0)).await.unwrap();
        let updated = store.select_span(&view, &turn, &spans[1], Some(1)).await.unwrap();
        assert_eq!(updated.revision, 2);
        assert_eq!(updated.selection.span_for(&turn), Some(&spans[1]));

        let history = store.selection_history(&view).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].span_id, spans[0]);

        let err = store.select_span(&view, &turn, &spans[0], Some(1)).await.unwrap_err();
        assert!(matches!(err, StorageError::ConcurrentModification { .. }));
    }

    #[tokio::test]
    async fn test_fork_copies_selection() {
        let store = SqliteStore::in_memory().unwrap();
        let (view, turn, spans) = two_spans(&store).await;
        store.select_span(&view, &turn, &spans[0], None).await.unwrap();

        let (child, relation) = store.fork_view(&view, Some("alt"), None).await.unwrap();
        let loaded = store.get_view(&child.id).await.unwrap();
        assert_eq!(loaded.selection.span_for(&turn), Some(&spans[0]));
        assert_eq!(loaded.revision, 1);
        assert_eq!(relation.metadata.as_ref().unwrap()["revision"], 1);

        store.select_span(&child.id, &turn, &spans[1], Some(1)).await.unwrap();
        let parent = store.get_view(&view).await.unwrap();
        assert_eq!(parent.selection.span_for(&turn), Some(&spans[0]));

        let links = store.relations_from(&(&child.id).into(), None).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].relation, RelationType::forked_from());
    }

    #[tokio::test]
    async fn test_forking_edit_in_one_transaction() {
        let store = SqliteStore::in_memory().unwrap();
        let (view, turn, spans) = two_spans(&store).await;
        let edited = store.put(ContentBlock::plain("three")).await.unwrap().id;
        let plan = EditPlan {
            view_id: view.clone(),
            turn_id: turn.clone(),
            usages: vec![NewUsage::message(edited)],
            fork: true,
            policy: config::FallbackPolicy::Latest,
            token: ClientToken::new(),
            expected_revision: Some(0),
        };

        let written = store.edit_turn(&plan).await.unwrap();
        assert!(written.is_new);
        let result = written.record;
        assert_eq!(result.pinned.as_ref(), Some(&spans[1]));
        assert_eq!(result.source.revision, 1);
        assert_eq!(result.source.selection.span_for(&turn), Some(&spans[1]));
        assert_eq!(result.view.revision, 2);
        assert_eq!(
            result.view.selection.span_for(&result.turn.turn.id),
            Some(&result.turn.spans[0].span.id)
        );

        let replay = store.edit_turn(&plan).await.unwrap();
        assert!(!replay.is_new);
        assert_eq!(replay.record.view.id, result.view.id);
        assert_eq!(replay.record.turn.turn.id, result.turn.turn.id);

        // A stale revision writes nothing
        let stale = EditPlan {
            token: ClientToken::new(),
            ..plan.clone()
        };
        assert!(matches!(
            store.edit_turn(&stale).await,
            Err(StorageError::ConcurrentModification { .. })
        ));
        let thread = store.get_view(&view).await.unwrap().thread_id.clone();
        assert_eq!(store.list_turns(&thread).await.unwrap().len(), 2);
        assert_eq!(store.list_views(&thread).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_overrides_round_trip() {
        let store = SqliteStore::in_memory().unwrap();
        let (view, _, _) = two_spans(&store).await;
        let update = ViewUpdate {
            overrides: Some(serde_json::json!({ "system_prompt": "be brief" })),
            ..Default::default()
        };
        store.update_view(&view, &update, Some(0)).await.unwrap();

        let loaded = store.get_view(&view).await.unwrap();
        assert_eq!(loaded.overrides.as_ref().unwrap()["system_prompt"], "be brief");
        assert_eq!(loaded.revision, 1);

        let deleted = store.delete_view(&view, None).await.unwrap();
        assert!(deleted.is_deleted);
        assert_eq!(deleted.revision, 2);
        assert!(matches!(
            store.select_span(&view, &TurnId::new(), &SpanId::new(), None).await,
            Err(StorageError::NotFound { kind: RecordKind::View, .. })
        ));
    }
}
