pub mod logging;
pub mod paths;
pub mod settings;

pub use paths::PathManager;
pub use settings::{FallbackPolicy, Settings, StoreSettings};

/// Load environment variables from .env files.
///
/// `./.env` is read before `~/.env`. Variables that are already set are never
/// overwritten, so the process environment wins over the project file, which
/// wins over the home file. Call this before reading settings so
/// `NOEMA_DATA_DIR` and `RUST_LOG` are visible.
pub fn load_env_file() {
    dotenv::dotenv().ok();

    if let Some(dirs) = directories::UserDirs::new() {
        dotenv::from_path(dirs.home_dir().join(".env")).ok();
    }
}
