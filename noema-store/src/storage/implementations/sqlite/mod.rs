//! SQLite storage backend
//!
//! Provides `SqliteStore` - a shared SQLite connection wrapper that
//! implements all storage traits.
//!
//! Trait implementations are in submodules, each with its own schema:
//! - `content` - ContentStore impl (`content_blocks`)
//! - `structure` - StructureStore impl (`threads`, `turns`, `spans`, `usages`)
//! - `view` - ViewStore impl (`views`, `view_selections`, `selection_history`)
//! - `relation` - RelationStore impl (`entity_relations`)
//!
//! Every trait method holds the connection lock for its whole duration and
//! writes inside a single transaction.

use anyhow::{Context, Result};
use config::StoreSettings;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, Row};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use crate::storage::traits::{StorageTypes, Stores};

mod content;
mod relation;
mod structure;
mod view;

pub(crate) use content::init_schema as init_content_schema;
pub(crate) use relation::init_schema as init_relation_schema;
pub(crate) use structure::init_schema as init_structure_schema;
pub(crate) use view::init_schema as init_view_schema;

/// Shared SQLite connection
///
/// Create one store and share it via `Arc` across all components that need
/// database access.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        tracing::debug!(path = %path.display(), "Opened SQLite store");
        Self::with_connection(conn)
    }

    /// Open the database named by the store settings
    ///
    /// Uses `db_path` when set, otherwise the platform data directory, and
    /// creates the parent directory when missing.
    pub fn open_configured(settings: &StoreSettings) -> Result<Self> {
        let path = settings
            .resolved_db_path()
            .context("Could not determine database path")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Self::open(path)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Lock the connection (for trait implementations)
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn();
        init_content_schema(&conn).context("content schema")?;
        init_structure_schema(&conn).context("structure schema")?;
        init_view_schema(&conn).context("view schema")?;
        init_relation_schema(&conn).context("relation schema")?;
        Ok(())
    }
}

/// Parse a text column through `FromStr`
fn parse_column<T: FromStr<Err = String>>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

/// Storage configuration backed entirely by `SqliteStore`
pub struct SqliteStorage;

impl StorageTypes for SqliteStorage {
    type Content = SqliteStore;
    type Structure = SqliteStore;
    type View = SqliteStore;
    type Relation = SqliteStore;
}

/// Hands out one shared `SqliteStore` for every accessor
#[derive(Clone)]
pub struct SqliteStores {
    store: Arc<SqliteStore>,
}

impl SqliteStores {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

impl Stores<SqliteStorage> for SqliteStores {
    fn content(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }
    fn structure(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }
    fn view(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }
    fn relation(&self) -> Arc<SqliteStore> {
        self.store.clone()
    }
}
