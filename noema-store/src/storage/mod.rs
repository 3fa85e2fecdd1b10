//! Storage for versioned conversations
//!
//! Content lives once in a content-addressed store. Threads hold a tree of
//! turns, each turn an append-only set of alternative spans. Views pick one
//! span per turn and can be forked cheaply. Two backends implement every
//! store trait:
//!
//! - `MemoryStore` - in-memory storage (tests, ephemeral sessions)
//! - `SqliteStore` - SQLite-backed storage (requires `sqlite` feature)
//!
//! `StorageCoordinator` drives operations that span several stores and
//! publishes mutation events.

pub mod coordinator;
pub mod error;
pub mod events;
pub mod helper;
pub mod ids;
pub mod implementations;
pub mod resolve;
pub mod subconversation;
pub mod traits;
pub mod types;

pub use coordinator::StorageCoordinator;
pub use error::{RecordKind, StorageError, StorageResult};
pub use events::EventBus;
pub use implementations::memory::{MemoryStorage, MemoryStore, MemoryStores};
#[cfg(feature = "sqlite")]
pub use implementations::sqlite::{SqliteStorage, SqliteStore, SqliteStores};
pub use subconversation::ScopeFilter;
pub use traits::{ContentStore, RelationStore, StorageTypes, Stores, StructureStore, ViewStore};
pub use types::EditedTurn;
