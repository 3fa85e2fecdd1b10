//! Generic stored wrapper types
//!
//! - `Stored<Id, T>` - records with an ID, the data, and created_at
//! - `Editable<T>` - adds updated_at to records that change after creation
//!
//! Turns, spans and content blocks are `Stored`; views are
//! `Stored<ViewId, Editable<View>>`.

use std::ops::Deref;

/// A stored record: ID, content and creation timestamp.
///
/// Implements `Deref` to allow transparent access to the inner content.
#[derive(Clone, Debug, PartialEq)]
pub struct Stored<Id, T> {
    /// Unique identifier
    pub id: Id,
    /// The stored content
    pub content: T,
    /// Unix timestamp (milliseconds) when created
    pub created_at: i64,
}

impl<Id, T> Stored<Id, T> {
    pub fn new(id: Id, content: T, created_at: i64) -> Self {
        Self {
            id,
            content,
            created_at,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn into_content(self) -> T {
        self.content
    }

    /// Map the content to a new type
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Stored<Id, U> {
        Stored {
            id: self.id,
            content: f(self.content),
            created_at: self.created_at,
        }
    }
}

impl<Id, T> Deref for Stored<Id, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.content
    }
}

/// Wrapper for records that can be modified after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct Editable<T> {
    pub content: T,
    /// Unix timestamp (milliseconds) when last updated
    pub updated_at: i64,
}

impl<T> Editable<T> {
    pub fn new(content: T, updated_at: i64) -> Self {
        Self { content, updated_at }
    }

    pub fn updated_at(&self) -> i64 {
        self.updated_at
    }

    pub fn into_content(self) -> T {
        self.content
    }
}

impl<T> Deref for Editable<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.content
    }
}

/// Stored record that can be modified after creation
pub type StoredEditable<Id, T> = Stored<Id, Editable<T>>;

/// Shorthand for `Stored::new`
pub fn stored<Id, T>(id: Id, content: T, created_at: i64) -> Stored<Id, T> {
    Stored::new(id, content, created_at)
}

/// Shorthand for a `Stored<Id, Editable<T>>`
pub fn stored_editable<Id, T>(
    id: Id,
    content: T,
    created_at: i64,
    updated_at: i64,
) -> StoredEditable<Id, T> {
    Stored::new(id, Editable::new(content, updated_at), created_at)
}

/// Outcome of an idempotent write
///
/// `is_new` is false when the call replayed an earlier write (same content
/// address or same client token) and returned the existing record.
#[derive(Clone, Debug, PartialEq)]
pub struct Written<T> {
    pub record: T,
    pub is_new: bool,
}

impl<T> Written<T> {
    pub fn new(record: T) -> Self {
        Self { record, is_new: true }
    }

    pub fn replayed(record: T) -> Self {
        Self { record, is_new: false }
    }

    pub fn into_record(self) -> T {
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ids::TurnId;
    use crate::storage::types::{Role, Turn};

    fn turn() -> Stored<TurnId, Turn> {
        stored(
            TurnId::from_string("turn-1"),
            Turn::new(crate::storage::ids::ThreadId::from_string("t"), Role::User, 0, None),
            1000,
        )
    }

    #[test]
    fn test_stored_deref() {
        let t = turn();
        assert_eq!(t.role, Role::User);
        assert_eq!(t.sequence, 0);
        assert_eq!(t.id().as_str(), "turn-1");
        assert_eq!(t.created_at(), 1000);
    }

    #[test]
    fn test_map() {
        let mapped = turn().map(|t| t.sequence + 10);
        assert_eq!(*mapped, 10);
        assert_eq!(mapped.id.as_str(), "turn-1");
    }

    #[test]
    fn test_editable_deref_through_stored() {
        let record = stored_editable(TurnId::from_string("x"), 5u32, 1, 2);
        assert_eq!(**record, 5);
        assert_eq!(record.updated_at(), 2);
        assert_eq!(record.created_at(), 1);
    }
}
