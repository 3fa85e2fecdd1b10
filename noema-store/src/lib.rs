//! Versioned conversation store
//!
//! This crate provides:
//! - **Content**: immutable, deduplicated blocks addressed by SHA-256
//! - **Structure**: threads of turns, each turn holding alternative spans
//! - **Views**: per-view span selection with O(1) forks and selection history
//! - **Relations**: typed edges between any two entities, with backlinks
//! - **Subconversations**: child threads spawned from part of a view
//! - **Events**: one `MutationEvent` per committed mutation
//!
//! # Example
//!
//! ```ignore
//! use noema_store::{MemoryStores, StorageCoordinator};
//! use noema_store::storage::ids::ClientToken;
//! use noema_store::storage::types::{ContentBlock, NewUsage, Role};
//!
//! let store = StorageCoordinator::from_stores(&MemoryStores::new(), Default::default());
//! let (thread, main) = store.create_conversation(Some("chat")).await?;
//! let hello = store.put(ContentBlock::plain("Hello")).await?.id;
//! let turn = store.append_turn(&thread.id, Role::User, &ClientToken::new()).await?.record;
//! store.add_span(&turn.id, &[NewUsage::message(hello)], None, &ClientToken::new()).await?;
//! let transcript = store.resolve(&main.id).await?;
//! ```
pub mod storage;

pub use storage::{
    ContentStore, EditedTurn, MemoryStorage, MemoryStore, MemoryStores, RelationStore,
    ScopeFilter, StorageCoordinator, StorageError, StorageResult, StorageTypes, Stores,
    StructureStore, ViewStore,
};
#[cfg(feature = "sqlite")]
pub use storage::{SqliteStorage, SqliteStore, SqliteStores};
