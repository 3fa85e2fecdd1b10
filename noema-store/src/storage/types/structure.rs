//! Conversation structure types
//!
//! - `Thread` - the backbone of one conversation lineage, stored as `Stored<ThreadId, Thread>`
//! - `Turn` - an ordered position in a thread, stored as `Stored<TurnId, Turn>`
//! - `Span` - one alternative outcome at a turn, stored as `Stored<SpanId, Span>`
//! - `Usage` - a typed pointer from a span into the content store
//!
//! Turns form a tree inside their thread: `parent_turn_id` names the turn a
//! position follows. Appending extends a path; splicing adds a sibling, which
//! leaves the old continuation intact for any view still selecting it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::storage::ids::{ClientToken, ContentId, SpanId, ThreadId, TurnId, UsageId, ViewId};
use crate::storage::types::Stored;

// ============================================================================
// Role
// ============================================================================

/// Who speaks at a turn
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

// ============================================================================
// Thread
// ============================================================================

/// Core thread data
///
/// Every thread is created together with its main view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub name: Option<String>,
    /// View created alongside the thread
    pub main_view_id: ViewId,
}

// ============================================================================
// Turn
// ============================================================================

/// Core turn data - a position that can hold multiple spans
///
/// Immutable once created except for `is_deleted`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub thread_id: ThreadId,
    /// Role for all spans at this turn
    pub role: Role,
    /// Depth on its path; root turns are 0
    pub sequence: u32,
    /// Turn this position follows (None for roots)
    pub parent_turn_id: Option<TurnId>,
    /// Idempotency key the turn was created with
    pub client_token: Option<ClientToken>,
    /// Soft-delete flag; the turn stays in the graph
    pub is_deleted: bool,
}

impl Turn {
    pub fn new(thread_id: ThreadId, role: Role, sequence: u32, parent_turn_id: Option<TurnId>) -> Self {
        Self {
            thread_id,
            role,
            sequence,
            parent_turn_id,
            client_token: None,
            is_deleted: false,
        }
    }

    pub fn with_token(mut self, token: ClientToken) -> Self {
        self.client_token = Some(token);
        self
    }
}

// ============================================================================
// Span
// ============================================================================

/// Lifecycle flag of a span; spans themselves are never removed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Active,
    /// Hidden from fallback resolution, still selectable explicitly
    Withdrawn,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Active => "active",
            SpanStatus::Withdrawn => "withdrawn",
        }
    }
}

impl FromStr for SpanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SpanStatus::Active),
            "withdrawn" => Ok(SpanStatus::Withdrawn),
            other => Err(format!("Unknown span status: {}", other)),
        }
    }
}

/// Core span data - one alternative outcome at a turn
///
/// Different spans at the same turn are regenerations, parallel model
/// responses, or edits:
/// - Span A (claude): [thinking] → [response]
/// - Span B (gpt-4):  [response]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub turn_id: TurnId,
    /// Model that generated this span (assistant spans)
    pub model_id: Option<String>,
    pub status: SpanStatus,
    pub client_token: Option<ClientToken>,
}

impl Span {
    pub fn new(turn_id: TurnId, model_id: Option<String>) -> Self {
        Self {
            turn_id,
            model_id,
            status: SpanStatus::Active,
            client_token: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SpanStatus::Active
    }
}

// ============================================================================
// Usage
// ============================================================================

/// Structural role a content block plays where it is used
///
/// Stored as a string for extensibility.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsageRole(String);

impl UsageRole {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Message body
    pub fn message() -> Self {
        Self::new("message")
    }

    /// Revised body replacing earlier content
    pub fn revision() -> Self {
        Self::new("revision")
    }

    /// Binary asset (image, audio)
    pub fn asset() -> Self {
        Self::new("asset")
    }

    /// Attached document or file
    pub fn attachment() -> Self {
        Self::new("attachment")
    }
}

impl fmt::Display for UsageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UsageRole {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Kind of record owning a usage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Span,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OwnerKind::Span => "span",
        }
    }
}

impl FromStr for OwnerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "span" => Ok(OwnerKind::Span),
            other => Err(format!("Unknown owner kind: {}", other)),
        }
    }
}

/// Typed pointer mapping a content block into a structural role
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub content_id: ContentId,
    pub role: UsageRole,
    pub owner_kind: OwnerKind,
    pub owner_id: String,
    /// Order within the owner (0-indexed)
    pub sequence: u32,
}

/// Caller-side description of a usage; the store fills in the owner
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUsage {
    pub content_id: ContentId,
    pub role: UsageRole,
}

impl NewUsage {
    pub fn new(content_id: ContentId, role: UsageRole) -> Self {
        Self { content_id, role }
    }

    /// Usage as a message body
    pub fn message(content_id: ContentId) -> Self {
        Self::new(content_id, UsageRole::message())
    }
}

// ============================================================================
// Stored aliases and composites
// ============================================================================

pub type StoredThread = Stored<ThreadId, Thread>;
pub type StoredTurn = Stored<TurnId, Turn>;
pub type StoredSpan = Stored<SpanId, Span>;
pub type StoredUsage = Stored<UsageId, Usage>;

/// A span with its usages in order
#[derive(Clone, Debug, PartialEq)]
pub struct SpanWithUsages {
    pub span: StoredSpan,
    pub usages: Vec<StoredUsage>,
}

/// A turn with all of its spans in creation order
#[derive(Clone, Debug, PartialEq)]
pub struct TurnWithSpans {
    pub turn: StoredTurn,
    pub spans: Vec<SpanWithUsages>,
}
