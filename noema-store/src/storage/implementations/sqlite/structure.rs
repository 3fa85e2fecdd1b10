//! SQLite implementation of StructureStore

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::view::insert_view;
use super::{parse_column, SqliteStore};
use crate::storage::error::{RecordKind, StorageError, StorageResult};
use crate::storage::helper::unix_timestamp;
use crate::storage::ids::{ClientToken, SpanId, ThreadId, TurnId, UsageId, ViewId};
use crate::storage::resolve::default_tip;
use crate::storage::traits::StructureStore;
use crate::storage::types::{
    stored, stored_editable, NewUsage, OwnerKind, Role, Span, SpanStatus, SpanWithUsages,
    StoredSpan, StoredThread, StoredTurn, StoredUsage, StoredView, Thread, Turn, TurnWithSpans,
    Usage, View, Written,
};

/// Initialize structure schema (threads, turns, spans, usages)
pub(crate) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            id TEXT PRIMARY KEY,
            name TEXT,
            main_view_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Turns: positions in a thread, forming a tree through parent_turn_id
        CREATE TABLE IF NOT EXISTS turns (
            id TEXT PRIMARY KEY,
            thread_id TEXT NOT NULL REFERENCES threads(id),
            role TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            parent_turn_id TEXT REFERENCES turns(id),
            client_token TEXT,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_turns_thread ON turns(thread_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_turns_token
            ON turns(thread_id, client_token) WHERE client_token IS NOT NULL;

        -- Spans: alternative outcomes at a turn, never deleted
        CREATE TABLE IF NOT EXISTS spans (
            id TEXT PRIMARY KEY,
            turn_id TEXT NOT NULL REFERENCES turns(id),
            model_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            client_token TEXT,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_spans_turn ON spans(turn_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_spans_token
            ON spans(turn_id, client_token) WHERE client_token IS NOT NULL;

        -- Usages: typed pointers from spans into content_blocks
        CREATE TABLE IF NOT EXISTS usages (
            id TEXT PRIMARY KEY,
            content_id TEXT NOT NULL,
            role TEXT NOT NULL,
            owner_kind TEXT NOT NULL,
            owner_id TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_usages_owner ON usages(owner_id, sequence);
        CREATE INDEX IF NOT EXISTS idx_usages_content ON usages(content_id);
        "#,
    )?;
    Ok(())
}

// ============================================================================
// Row mapping
// ============================================================================

const TURN_COLUMNS: &str =
    "id, thread_id, role, sequence, parent_turn_id, client_token, is_deleted, created_at";
const SPAN_COLUMNS: &str = "id, turn_id, model_id, status, client_token, created_at";

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<StoredTurn> {
    let turn = Turn {
        thread_id: row.get(1)?,
        role: parse_column(row, 2)?,
        sequence: row.get(3)?,
        parent_turn_id: row.get(4)?,
        client_token: row.get(5)?,
        is_deleted: row.get(6)?,
    };
    Ok(stored(row.get(0)?, turn, row.get(7)?))
}

fn span_from_row(row: &Row<'_>) -> rusqlite::Result<StoredSpan> {
    let span = Span {
        turn_id: row.get(1)?,
        model_id: row.get(2)?,
        status: parse_column(row, 3)?,
        client_token: row.get(4)?,
    };
    Ok(stored(row.get(0)?, span, row.get(5)?))
}

fn usage_from_row(row: &Row<'_>) -> rusqlite::Result<StoredUsage> {
    let role: String = row.get(2)?;
    let usage = Usage {
        content_id: row.get(1)?,
        role: role.as_str().into(),
        owner_kind: parse_column(row, 3)?,
        owner_id: row.get(4)?,
        sequence: row.get(5)?,
    };
    Ok(stored(row.get(0)?, usage, row.get(6)?))
}

// ============================================================================
// Helpers shared with the view implementation
// ============================================================================

pub(super) fn load_thread(conn: &Connection, id: &ThreadId) -> StorageResult<StoredThread> {
    conn.query_row(
        "SELECT id, name, main_view_id, created_at FROM threads WHERE id = ?1",
        params![id.as_str()],
        |row| {
            let thread = Thread {
                name: row.get(1)?,
                main_view_id: row.get(2)?,
            };
            Ok(stored(row.get(0)?, thread, row.get(3)?))
        },
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found(RecordKind::Thread, id))
}

pub(super) fn load_turn(conn: &Connection, id: &TurnId) -> StorageResult<StoredTurn> {
    conn.query_row(
        &format!("SELECT {} FROM turns WHERE id = ?1", TURN_COLUMNS),
        params![id.as_str()],
        turn_from_row,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found(RecordKind::Turn, id))
}

pub(super) fn load_span(conn: &Connection, id: &SpanId) -> StorageResult<StoredSpan> {
    conn.query_row(
        &format!("SELECT {} FROM spans WHERE id = ?1", SPAN_COLUMNS),
        params![id.as_str()],
        span_from_row,
    )
    .optional()?
    .ok_or_else(|| StorageError::not_found(RecordKind::Span, id))
}

/// Turns of a thread in creation order
pub(super) fn thread_turns(conn: &Connection, thread_id: &ThreadId) -> StorageResult<Vec<StoredTurn>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM turns WHERE thread_id = ?1 ORDER BY rowid",
        TURN_COLUMNS
    ))?;
    let turns = stmt
        .query_map(params![thread_id.as_str()], turn_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(turns)
}

fn span_usages(conn: &Connection, span_id: &SpanId) -> StorageResult<Vec<StoredUsage>> {
    let mut stmt = conn.prepare(
        "SELECT id, content_id, role, owner_kind, owner_id, sequence, created_at
         FROM usages WHERE owner_kind = 'span' AND owner_id = ?1 ORDER BY sequence",
    )?;
    let usages = stmt
        .query_map(params![span_id.as_str()], usage_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(usages)
}

fn turn_spans(conn: &Connection, turn_id: &TurnId) -> StorageResult<Vec<StoredSpan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM spans WHERE turn_id = ?1 ORDER BY rowid",
        SPAN_COLUMNS
    ))?;
    let spans = stmt
        .query_map(params![turn_id.as_str()], span_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(spans)
}

pub(super) fn turn_with_spans(conn: &Connection, turn: StoredTurn) -> StorageResult<TurnWithSpans> {
    let spans = turn_spans(conn, &turn.id)?
        .into_iter()
        .map(|span| {
            let usages = span_usages(conn, &span.id)?;
            Ok(SpanWithUsages { span, usages })
        })
        .collect::<StorageResult<Vec<_>>>()?;
    Ok(TurnWithSpans { turn, spans })
}

/// Create a thread and its main view
pub(super) fn insert_thread(
    conn: &Connection,
    name: Option<&str>,
) -> StorageResult<(StoredThread, StoredView)> {
    let now = unix_timestamp();
    let thread_id = ThreadId::new();
    let view_id = ViewId::new();

    conn.execute(
        "INSERT INTO threads (id, name, main_view_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![thread_id.as_str(), name, view_id.as_str(), now],
    )?;
    let view = stored_editable(
        view_id.clone(),
        View::new(thread_id.clone(), Some("main".to_string())),
        now,
        now,
    );
    insert_view(conn, &view)?;

    let thread = stored(
        thread_id,
        Thread {
            name: name.map(str::to_string),
            main_view_id: view_id,
        },
        now,
    );
    Ok((thread, view))
}

pub(super) fn insert_turn(
    conn: &Connection,
    thread_id: &ThreadId,
    parent: Option<&StoredTurn>,
    role: Role,
    token: Option<&ClientToken>,
) -> StorageResult<StoredTurn> {
    let mut turn = Turn::new(
        thread_id.clone(),
        role,
        parent.map(|p| p.sequence + 1).unwrap_or(0),
        parent.map(|p| p.id.clone()),
    );
    if let Some(token) = token {
        turn = turn.with_token(token.clone());
    }
    let turn = stored(TurnId::new(), turn, unix_timestamp());

    conn.execute(
        "INSERT INTO turns (id, thread_id, role, sequence, parent_turn_id, client_token, is_deleted, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            turn.id.as_str(),
            thread_id.as_str(),
            turn.role.as_str(),
            turn.sequence,
            turn.parent_turn_id.as_ref().map(|p| p.as_str()),
            turn.client_token.as_ref().map(|t| t.as_str()),
            turn.created_at,
        ],
    )?;
    Ok(turn)
}

pub(super) fn replayed_turn(
    conn: &Connection,
    thread_id: &ThreadId,
    token: &ClientToken,
) -> StorageResult<Option<StoredTurn>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM turns WHERE thread_id = ?1 AND client_token = ?2",
                TURN_COLUMNS
            ),
            params![thread_id.as_str(), token.as_str()],
            turn_from_row,
        )
        .optional()?)
}

/// Every usage must point at stored content
pub(super) fn check_usages(conn: &Connection, usages: &[NewUsage]) -> StorageResult<()> {
    let mut stmt = conn.prepare("SELECT 1 FROM content_blocks WHERE id = ?1")?;
    for usage in usages {
        if !stmt.exists(params![usage.content_id.as_str()])? {
            tracing::error!(content_id = %usage.content_id, "Usage names unknown content");
            return Err(StorageError::IntegrityViolation(format!(
                "usage references unknown content {}",
                usage.content_id
            )));
        }
    }
    Ok(())
}

/// Insert a span with its usages; usages must already be checked
pub(super) fn insert_span(
    conn: &Connection,
    turn_id: &TurnId,
    usages: &[NewUsage],
    model_id: Option<&str>,
    token: Option<&ClientToken>,
) -> StorageResult<SpanWithUsages> {
    let now = unix_timestamp();
    let mut span = Span::new(turn_id.clone(), model_id.map(str::to_string));
    span.client_token = token.cloned();
    let span = stored(SpanId::new(), span, now);

    conn.execute(
        "INSERT INTO spans (id, turn_id, model_id, status, client_token, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            span.id.as_str(),
            turn_id.as_str(),
            span.model_id,
            span.status.as_str(),
            span.client_token.as_ref().map(|t| t.as_str()),
            now,
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO usages (id, content_id, role, owner_kind, owner_id, sequence, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    let mut stored_usages = Vec::with_capacity(usages.len());
    for (idx, usage) in usages.iter().enumerate() {
        let usage = stored(
            UsageId::new(),
            Usage {
                content_id: usage.content_id.clone(),
                role: usage.role.clone(),
                owner_kind: OwnerKind::Span,
                owner_id: span.id.to_string(),
                sequence: idx as u32,
            },
            now,
        );
        stmt.execute(params![
            usage.id.as_str(),
            usage.content_id.as_str(),
            usage.role.as_str(),
            usage.owner_kind.as_str(),
            usage.owner_id,
            usage.sequence,
            now,
        ])?;
        stored_usages.push(usage);
    }

    Ok(SpanWithUsages {
        span,
        usages: stored_usages,
    })
}

// ============================================================================
// StructureStore Implementation
// ============================================================================

#[async_trait]
impl StructureStore for SqliteStore {
    async fn create_thread(&self, name: Option<&str>) -> StorageResult<(StoredThread, StoredView)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let created = insert_thread(&tx, name)?;
        tx.commit()?;
        tracing::debug!(thread_id = %created.0.id, "Created thread");
        Ok(created)
    }

    async fn get_thread(&self, id: &ThreadId) -> StorageResult<StoredThread> {
        load_thread(&self.conn(), id)
    }

    async fn append_turn(
        &self,
        thread_id: &ThreadId,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        load_thread(&tx, thread_id)?;
        if let Some(turn) = replayed_turn(&tx, thread_id, token)? {
            return Ok(Written::replayed(turn));
        }

        let turns = thread_turns(&tx, thread_id)?;
        let turn = insert_turn(&tx, thread_id, default_tip(&turns), role, Some(token))?;
        tx.commit()?;
        Ok(Written::new(turn))
    }

    async fn append_turn_after(
        &self,
        thread_id: &ThreadId,
        parent_turn_id: Option<&TurnId>,
        role: Role,
        token: &ClientToken,
    ) -> StorageResult<Written<StoredTurn>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        load_thread(&tx, thread_id)?;
        if let Some(turn) = replayed_turn(&tx, thread_id, token)? {
            return Ok(Written::replayed(turn));
        }

        let parent = match parent_turn_id {
            Some(id) => {
                let parent = load_turn(&tx, id)?;
                if &parent.thread_id != thread_id {
                    tracing::error!(turn_id = %id, thread_id = %thread_id, "Parent turn in another thread");
                    return Err(StorageError::IntegrityViolation(format!(
                        "parent turn {} is not in thread {}",
                        id, thread_id
                    )));
                }
                Some(parent)
            }
            None => None,
        };
        let turn = insert_turn(&tx, thread_id, parent.as_ref(), role, Some(token))?;
        tx.commit()?;
        Ok(Written::new(turn))
    }

    async fn splice(
        &self,
        thread_id: &ThreadId,
        at_turn_id: &TurnId,
        content: &[NewUsage],
        token: &ClientToken,
    ) -> StorageResult<Written<TurnWithSpans>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        load_thread(&tx, thread_id)?;
        if let Some(turn) = replayed_turn(&tx, thread_id, token)? {
            return Ok(Written::replayed(turn_with_spans(&tx, turn)?));
        }

        let at = load_turn(&tx, at_turn_id)?;
        if &at.thread_id != thread_id {
            return Err(StorageError::InvalidSelection(format!(
                "turn {} is not in thread {}",
                at_turn_id, thread_id
            )));
        }
        check_usages(&tx, content)?;

        let parent = match &at.parent_turn_id {
            Some(id) => Some(load_turn(&tx, id)?),
            None => None,
        };
        let turn = insert_turn(&tx, thread_id, parent.as_ref(), at.role, Some(token))?;
        let span = insert_span(&tx, &turn.id, content, None, None)?;
        tx.commit()?;

        tracing::debug!(turn_id = %turn.id, sibling_of = %at_turn_id, "Spliced turn");
        Ok(Written::new(TurnWithSpans {
            turn,
            spans: vec![span],
        }))
    }

    async fn get_turn(&self, id: &TurnId) -> StorageResult<StoredTurn> {
        load_turn(&self.conn(), id)
    }

    async fn list_turns(&self, thread_id: &ThreadId) -> StorageResult<Vec<StoredTurn>> {
        let conn = self.conn();
        load_thread(&conn, thread_id)?;
        thread_turns(&conn, thread_id)
    }

    async fn soft_delete_turn(&self, id: &TurnId) -> StorageResult<bool> {
        let conn = self.conn();
        load_turn(&conn, id)?;
        let changed = conn.execute(
            "UPDATE turns SET is_deleted = 1 WHERE id = ?1 AND is_deleted = 0",
            params![id.as_str()],
        )?;
        Ok(changed > 0)
    }

    async fn add_span(
        &self,
        turn_id: &TurnId,
        usages: &[NewUsage],
        model_id: Option<&str>,
        token: &ClientToken,
    ) -> StorageResult<Written<SpanWithUsages>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        load_turn(&tx, turn_id)?;

        let replayed = tx
            .query_row(
                &format!(
                    "SELECT {} FROM spans WHERE turn_id = ?1 AND client_token = ?2",
                    SPAN_COLUMNS
                ),
                params![turn_id.as_str(), token.as_str()],
                span_from_row,
            )
            .optional()?;
        if let Some(span) = replayed {
            let usages = span_usages(&tx, &span.id)?;
            return Ok(Written::replayed(SpanWithUsages { span, usages }));
        }

        check_usages(&tx, usages)?;
        let span = insert_span(&tx, turn_id, usages, model_id, Some(token))?;
        tx.commit()?;

        tracing::debug!(turn_id = %turn_id, span_id = %span.span.id, usages = usages.len(), "Added span");
        Ok(Written::new(span))
    }

    async fn get_span(&self, id: &SpanId) -> StorageResult<StoredSpan> {
        load_span(&self.conn(), id)
    }

    async fn get_spans(&self, turn_id: &TurnId) -> StorageResult<Vec<StoredSpan>> {
        let conn = self.conn();
        load_turn(&conn, turn_id)?;
        turn_spans(&conn, turn_id)
    }

    async fn get_usages(&self, span_id: &SpanId) -> StorageResult<Vec<StoredUsage>> {
        let conn = self.conn();
        load_span(&conn, span_id)?;
        span_usages(&conn, span_id)
    }

    async fn withdraw_span(&self, id: &SpanId) -> StorageResult<bool> {
        let conn = self.conn();
        load_span(&conn, id)?;
        let changed = conn.execute(
            "UPDATE spans SET status = ?1 WHERE id = ?2 AND status != ?1",
            params![SpanStatus::Withdrawn.as_str(), id.as_str()],
        )?;
        Ok(changed > 0)
    }

    async fn usage_count(&self) -> StorageResult<usize> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM usages", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
