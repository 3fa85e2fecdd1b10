//! Type-safe ID newtypes for storage entities
//!
//! Structural IDs are random UUIDs wrapped in newtypes for compile-time
//! safety. `ContentId` is the exception: it is a content address derived
//! from the block's type and bytes (see `helper::content_address`).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Implements the string plumbing shared by every ID newtype
macro_rules! impl_id_common {
    ($name:ident) => {
        impl $name {
            /// Create from an existing string (for loading from DB)
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the inner string value
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string
            pub fn into_string(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        #[cfg(feature = "rusqlite")]
        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                value.as_str().map(|s| Self(s.to_string()))
            }
        }

        #[cfg(feature = "rusqlite")]
        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::Borrowed(
                    rusqlite::types::ValueRef::Text(self.0.as_bytes()),
                ))
            }
        }
    };
}

/// Macro to define a type-safe random ID newtype
macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl_id_common!($name);

        impl From<&$name> for EntityId {
            fn from(id: &$name) -> Self {
                EntityId(id.0.clone())
            }
        }

        impl From<$name> for EntityId {
            fn from(id: $name) -> Self {
                EntityId(id.0)
            }
        }
    };
}

/// Opaque identifier of anything the relation index can point at
///
/// Any other ID converts into an `EntityId` with `From`, so relations can
/// connect views, threads, turns and content blocks alike.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl_id_common!(EntityId);

/// Content address of a content block (hex SHA-256)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentId(String);

impl_id_common!(ContentId);

impl From<&ContentId> for EntityId {
    fn from(id: &ContentId) -> Self {
        EntityId(id.0.clone())
    }
}

impl From<ContentId> for EntityId {
    fn from(id: ContentId) -> Self {
        EntityId(id.0)
    }
}

// Structure
define_id!(ThreadId, "Unique identifier for a thread (ordered backbone of turns)");
define_id!(TurnId, "Unique identifier for a turn in a thread");
define_id!(SpanId, "Unique identifier for a span (alternative outcome at a turn)");
define_id!(UsageId, "Unique identifier for a usage (typed pointer into content)");

// Views
define_id!(ViewId, "Unique identifier for a view (one selected span per turn)");

// Users
define_id!(UserId, "Unique identifier for a user");

// Idempotency
define_id!(ClientToken, "Caller-supplied idempotency key for structural writes");
