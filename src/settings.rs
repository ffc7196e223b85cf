//! Application settings storage
//!
//! Stores configuration like API keys, refresh windows and worker widths in a
//! JSON file in the app data directory. Missing fields fall back to defaults.

use crate::error::SettingsError;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// LLM backend: "openai" or "anthropic" (default: "openai")
    #[serde(default = "default_llm_backend")]
    pub llm_backend: String,
    /// Model identifier sent with every completion
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub anthropic_api_key: Option<String>,
    /// Max age of a cached tree before it is rebuilt (default: 24h)
    #[serde(default = "default_freshness_window")]
    pub freshness_window_secs: u64,
    /// Max age of a "still loading" placeholder before it counts as abandoned (default: 3min)
    #[serde(default = "default_placeholder_window")]
    pub placeholder_window_secs: u64,
    #[serde(default = "default_keyword_workers")]
    pub keyword_workers: usize,
    #[serde(default = "default_leaf_workers")]
    pub leaf_workers: usize,
    #[serde(default = "default_meta_workers")]
    pub meta_workers: usize,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,
    /// Byte cap on concatenated item text in one prompt
    #[serde(default = "default_prompt_char_limit")]
    pub prompt_char_limit: usize,
    #[serde(default)]
    pub cache_db_path: Option<String>,
}

fn default_llm_backend() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4".to_string()
}

fn default_freshness_window() -> u64 {
    86_400 // 24 hours
}

fn default_placeholder_window() -> u64 {
    180 // 3 minutes
}

fn default_keyword_workers() -> usize {
    10
}

fn default_leaf_workers() -> usize {
    10
}

fn default_meta_workers() -> usize {
    7
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    2
}

fn default_prompt_char_limit() -> usize {
    10_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_backend: default_llm_backend(),
            model: default_model(),
            openai_api_key: None,
            anthropic_api_key: None,
            freshness_window_secs: default_freshness_window(),
            placeholder_window_secs: default_placeholder_window(),
            keyword_workers: default_keyword_workers(),
            leaf_workers: default_leaf_workers(),
            meta_workers: default_meta_workers(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_secs: default_retry_base_delay(),
            prompt_char_limit: default_prompt_char_limit(),
            cache_db_path: None,
        }
    }
}

impl Settings {
    /// Load settings from disk or create default
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(settings) => settings,
                    Err(e) => {
                        tracing::warn!("[Settings] Ignoring unreadable {}: {}", path.display(), e);
                        Settings::default()
                    }
                },
                Err(_) => Settings::default(),
            }
        } else {
            Settings::default()
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(self)?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// OpenAI key: environment variable takes precedence over the stored setting
    pub fn openai_api_key(&self) -> Option<String> {
        env_or_stored("OPENAI_API_KEY", &self.openai_api_key)
    }

    /// Anthropic key: environment variable takes precedence over the stored setting
    pub fn anthropic_api_key(&self) -> Option<String> {
        env_or_stored("ANTHROPIC_API_KEY", &self.anthropic_api_key)
    }

    pub fn freshness_window(&self) -> Duration {
        window(self.freshness_window_secs, default_freshness_window())
    }

    pub fn placeholder_window(&self) -> Duration {
        window(self.placeholder_window_secs, default_placeholder_window())
    }

    pub fn retry_base_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.retry_base_delay_secs)
    }

    /// Cache database path: explicit setting, else `<data dir>/cache.db`
    pub fn cache_db_path(&self) -> PathBuf {
        match &self.cache_db_path {
            Some(p) => PathBuf::from(p),
            None => app_data_dir().join("cache.db"),
        }
    }
}

/// `secs` as a duration, or `default_secs` when it is out of range
fn window(secs: u64, default_secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or_else(|| Duration::seconds(default_secs as i64))
}

fn env_or_stored(var: &str, stored: &Option<String>) -> Option<String> {
    if let Ok(key) = std::env::var(var) {
        if !key.is_empty() {
            return Some(key);
        }
    }
    stored.clone().filter(|k| !k.is_empty())
}

/// Application data directory (`<platform data dir>/threadscope`)
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("threadscope"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default settings file location
pub fn default_settings_path() -> PathBuf {
    app_data_dir().join("settings.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.freshness_window(), Duration::hours(24));
        assert_eq!(s.placeholder_window(), Duration::minutes(3));
        assert_eq!(s.retry_attempts, 3);
        assert_eq!(s.retry_base_delay(), std::time::Duration::from_secs(2));
        assert_eq!(s.meta_workers, 7);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"model": "gpt-4o", "leaf_workers": 4}"#).unwrap();

        let s = Settings::load(&path);
        assert_eq!(s.model, "gpt-4o");
        assert_eq!(s.leaf_workers, 4);
        assert_eq!(s.keyword_workers, 10);
        assert_eq!(s.llm_backend, "openai");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let mut s = Settings::default();
        s.freshness_window_secs = 60;
        s.cache_db_path = Some("/tmp/x.db".to_string());
        s.save(&path).unwrap();

        let back = Settings::load(&path);
        assert_eq!(back.freshness_window_secs, 60);
        assert_eq!(back.cache_db_path(), PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_out_of_range_windows_fall_back() {
        let mut s = Settings::default();
        s.freshness_window_secs = u64::MAX;
        s.placeholder_window_secs = i64::MAX as u64;
        assert_eq!(s.freshness_window(), Duration::hours(24));
        assert_eq!(s.placeholder_window(), Duration::minutes(3));

        s.freshness_window_secs = 3_600;
        assert_eq!(s.freshness_window(), Duration::hours(1));
    }

    #[test]
    fn test_corrupt_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        let s = Settings::load(&path);
        assert_eq!(s.freshness_window_secs, 86_400);
    }
}
