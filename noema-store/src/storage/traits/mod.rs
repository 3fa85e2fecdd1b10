//! Storage trait definitions
//!
//! All storage traits are defined here, with implementations in `implementations/`.

mod content;
mod relation;
mod structure;
mod view;

pub use content::ContentStore;
pub(crate) use relation::check_relation;
pub use relation::RelationStore;
pub use structure::StructureStore;
pub use view::ViewStore;
pub(crate) use view::{check_live, check_revision, check_selection};

use std::sync::Arc;

/// Bundles all storage type associations into a single trait.
///
/// ```ignore
/// pub struct AppStorage;
///
/// impl StorageTypes for AppStorage {
///     type Content = SqliteStore;
///     type Structure = SqliteStore;
///     type View = SqliteStore;
///     type Relation = SqliteStore;
/// }
///
/// type AppCoordinator = StorageCoordinator<AppStorage>;
/// ```
///
/// Views write lineage relations in the same unit as the view itself, so
/// `View` and `Relation` must name the same backing store.
pub trait StorageTypes: Send + Sync + 'static {
    /// Content-addressed blocks
    type Content: ContentStore + Send + Sync;
    /// Threads, turns, spans and usages
    type Structure: StructureStore + Send + Sync;
    /// Views, selections and selection history
    type View: ViewStore + Send + Sync;
    /// Entity relation index
    type Relation: RelationStore + Send + Sync;
}

/// Provides access to store instances.
///
/// The implementation can share one underlying store across all accessors.
///
/// ```ignore
/// pub struct AppStores {
///     sqlite: Arc<SqliteStore>,
/// }
///
/// impl Stores<AppStorage> for AppStores {
///     fn content(&self) -> Arc<SqliteStore> { self.sqlite.clone() }
///     fn structure(&self) -> Arc<SqliteStore> { self.sqlite.clone() }
///     fn view(&self) -> Arc<SqliteStore> { self.sqlite.clone() }
///     fn relation(&self) -> Arc<SqliteStore> { self.sqlite.clone() }
/// }
/// ```
pub trait Stores<S: StorageTypes>: Send + Sync {
    fn content(&self) -> Arc<S::Content>;
    fn structure(&self) -> Arc<S::Structure>;
    fn view(&self) -> Arc<S::View>;
    fn relation(&self) -> Arc<S::Relation>;
}
