use std::path::PathBuf;
use std::sync::OnceLock;
use directories::BaseDirs;

static DATA_DIR_OVERRIDE: OnceLock<PathBuf> = OnceLock::new();

/// Environment variable that relocates the data directory (store database,
/// logs). Checked after `set_data_dir` and before platform detection.
pub const DATA_DIR_ENV: &str = "NOEMA_DATA_DIR";

pub struct PathManager;

impl PathManager {
    /// Set a custom data directory (tests, embedded hosts, mobile)
    pub fn set_data_dir(path: PathBuf) {
        let _ = DATA_DIR_OVERRIDE.set(path);
    }

    // Helper to get the base data directory
    fn base_data_dir() -> Option<PathBuf> {
        if let Some(d) = DATA_DIR_OVERRIDE.get() {
            return Some(d.clone());
        }
        if let Some(d) = std::env::var_os(DATA_DIR_ENV) {
            return Some(PathBuf::from(d));
        }
        BaseDirs::new().map(|d| d.data_dir().join("noema"))
    }

    pub fn data_dir() -> Option<PathBuf> {
        Self::base_data_dir()
    }

    pub fn config_dir() -> Option<PathBuf> {
        if DATA_DIR_OVERRIDE.get().is_some() || std::env::var_os(DATA_DIR_ENV).is_some() {
            return Self::data_dir();
        }
        BaseDirs::new().map(|d| d.config_dir().join("noema"))
    }

    /// SQLite database holding content blocks, turns, views and relations
    pub fn db_path() -> Option<PathBuf> {
        Self::data_dir().map(|d| d.join("noema-store.db"))
    }

    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|d| d.join("settings.toml"))
    }

    pub fn logs_dir() -> Option<PathBuf> {
        Self::data_dir().map(|d| d.join("logs"))
    }

    pub fn log_file_path() -> Option<PathBuf> {
        Self::logs_dir().map(|d| d.join("noema-store.log"))
    }

    pub fn ensure_dirs_exist() -> std::io::Result<()> {
        if let Some(d) = Self::data_dir() {
            std::fs::create_dir_all(&d)?;
        }
        if let Some(d) = Self::config_dir() {
            std::fs::create_dir_all(&d)?;
        }
        if let Some(d) = Self::logs_dir() {
            std::fs::create_dir_all(&d)?;
        }
        Ok(())
    }
}
