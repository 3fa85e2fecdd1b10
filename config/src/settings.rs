//! Application settings management

use crate::PathManager;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Which span an unselected turn resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackPolicy {
    /// Most recently created active span (a regeneration wins)
    #[default]
    Latest,
    /// First span ever added to the turn (sticky)
    First,
}

/// Settings for the conversation store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Database location; `PathManager::db_path()` when unset
    pub db_path: Option<PathBuf>,
    /// Span chosen for turns a view has no selection for
    pub fallback: FallbackPolicy,
    /// Unreferenced content younger than this is never swept
    pub gc_grace_period_ms: i64,
    /// Buffered mutation events per subscriber before lagging
    pub event_capacity: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: None,
            fallback: FallbackPolicy::Latest,
            gc_grace_period_ms: 10 * 60 * 1000,
            event_capacity: 1024,
        }
    }
}

impl StoreSettings {
    /// Configured database path, falling back to the platform data dir
    pub fn resolved_db_path(&self) -> Option<PathBuf> {
        self.db_path.clone().or_else(PathManager::db_path)
    }
}

/// Application settings stored in settings.toml
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// User email for database user identification
    pub user_email: Option<String>,
    /// Conversation store configuration
    #[serde(default)]
    pub store: StoreSettings,
}

impl Settings {
    /// Load settings from the settings file, or return defaults if not found
    pub fn load() -> Self {
        let Some(path) = PathManager::settings_path() else {
            return Self::default();
        };

        Self::load_from(&path).unwrap_or_default()
    }

    /// Load settings from a specific file
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read settings {}: {}", path.display(), e))?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse settings: {}", e))
    }

    /// Save settings to the settings file
    pub fn save(&self) -> Result<(), String> {
        let path = PathManager::settings_path().ok_or("Could not determine settings path")?;
        self.save_to(&path)
    }

    /// Save settings to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config dir: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {}", e))?;
        fs::write(path, content).map_err(|e| format!("Failed to write settings: {}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_store_section_missing() {
        let settings = Settings::from_toml_str("user_email = \"a@b.c\"\n").unwrap();
        assert_eq!(settings.user_email.as_deref(), Some("a@b.c"));
        assert_eq!(settings.store.fallback, FallbackPolicy::Latest);
        assert_eq!(settings.store.event_capacity, 1024);
    }

    #[test]
    fn test_store_section_overrides() {
        let settings = Settings::from_toml_str(
            r#"
            [store]
            fallback = "first"
            gc_grace_period_ms = 5000
            db_path = "/tmp/x.db"
            "#,
        )
        .unwrap();
        assert_eq!(settings.store.fallback, FallbackPolicy::First);
        assert_eq!(settings.store.gc_grace_period_ms, 5000);
        assert_eq!(settings.store.event_capacity, 1024);
        assert_eq!(settings.store.resolved_db_path(), Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut settings = Settings::default();
        settings.store.fallback = FallbackPolicy::First;
        settings.save_to(&path).unwrap();

        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.store.fallback, FallbackPolicy::First);
    }

    #[test]
    fn test_rejects_unknown_fallback() {
        let err = Settings::from_toml_str("[store]\nfallback = \"random\"\n").unwrap_err();
        assert!(err.contains("Failed to parse settings"));
    }
}
