//! Content block types - immutable, content-addressed data with provenance
//!
//! Content blocks are the foundation of the store. Every message, revision
//! or attachment body lives here exactly once, keyed by its content address;
//! structure only ever points at blocks through usages.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::storage::ids::{ContentId, UserId};
use crate::storage::types::Stored;

// ============================================================================
// ContentType
// ============================================================================

/// MIME-like type of a content block
///
/// Stored as a string for extensibility; the type is part of the content
/// address, so the same bytes under two types are two blocks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentType(String);

impl ContentType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn plain() -> Self {
        Self::new("text/plain")
    }

    pub fn markdown() -> Self {
        Self::new("text/markdown")
    }

    pub fn json() -> Self {
        Self::new("application/json")
    }

    /// Whether the body is expected to be UTF-8 text
    pub fn is_text(&self) -> bool {
        self.0.starts_with("text/") || self.0 == "application/json"
    }
}

impl Default for ContentType {
    fn default() -> Self {
        Self::plain()
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContentType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// Origin
// ============================================================================

/// Who or what produced a content block
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OriginKind {
    User,
    Assistant,
    System,
    Import,
    Tool,
}

impl OriginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginKind::User => "user",
            OriginKind::Assistant => "assistant",
            OriginKind::System => "system",
            OriginKind::Import => "import",
            OriginKind::Tool => "tool",
        }
    }
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OriginKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(OriginKind::User),
            "assistant" => Ok(OriginKind::Assistant),
            "system" => Ok(OriginKind::System),
            "import" => Ok(OriginKind::Import),
            "tool" => Ok(OriginKind::Tool),
            other => Err(format!("Unknown origin kind: {}", other)),
        }
    }
}

/// Provenance of a content block
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentOrigin {
    pub kind: OriginKind,
    /// User who wrote it (user origin)
    pub user_id: Option<UserId>,
    /// Model that generated it (assistant origin)
    pub model_id: Option<String>,
    /// External source (import origin: file path, URL, document id)
    pub source_id: Option<String>,
    /// Block this one was derived from (edits, revisions)
    pub parent_id: Option<ContentId>,
}

impl ContentOrigin {
    pub fn new(kind: OriginKind) -> Self {
        Self {
            kind,
            user_id: None,
            model_id: None,
            source_id: None,
            parent_id: None,
        }
    }

    pub fn user() -> Self {
        Self::new(OriginKind::User)
    }

    pub fn assistant(model_id: impl Into<String>) -> Self {
        Self::new(OriginKind::Assistant).with_model(model_id)
    }

    pub fn system() -> Self {
        Self::new(OriginKind::System)
    }

    pub fn import(source_id: impl Into<String>) -> Self {
        Self {
            source_id: Some(source_id.into()),
            ..Self::new(OriginKind::Import)
        }
    }

    pub fn tool() -> Self {
        Self::new(OriginKind::Tool)
    }

    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: ContentId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

impl Default for ContentOrigin {
    fn default() -> Self {
        Self::user()
    }
}

// ============================================================================
// ContentBlock
// ============================================================================

/// Core content block data (shared between input and stored forms)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentBlock {
    pub content_type: ContentType,
    pub body: Vec<u8>,
    pub origin: ContentOrigin,
}

impl ContentBlock {
    /// Plain text block
    pub fn plain(text: impl Into<String>) -> Self {
        Self::bytes(text.into().into_bytes(), ContentType::plain())
    }

    /// Markdown block
    pub fn markdown(text: impl Into<String>) -> Self {
        Self::bytes(text.into().into_bytes(), ContentType::markdown())
    }

    /// Arbitrary bytes under the given type
    pub fn bytes(body: impl Into<Vec<u8>>, content_type: impl Into<ContentType>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
            origin: ContentOrigin::default(),
        }
    }

    /// Set the origin information
    pub fn with_origin(mut self, origin: ContentOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Stored representation of a content block (immutable)
pub type StoredContentBlock = Stored<ContentId, ContentBlock>;

/// Result of a put (may be existing or new)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutResult {
    pub id: ContentId,
    /// false when the content was already present (deduplicated)
    pub is_new: bool,
}
