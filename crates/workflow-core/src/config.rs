//! Editor configuration storage
//!
//! Holds undo, debounce and endpoint settings for one editing session.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::constants::defaults;

/// Configuration for a workflow editing session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Maximum number of commands kept in the undo history
    #[serde(default = "default_undo_history_limit")]
    pub undo_history_limit: usize,
    /// Successive moves of one operator within this window become one undo step
    #[serde(default = "default_drag_coalesce_ms")]
    pub drag_coalesce_ms: u64,
    /// Quiet period before a schema propagation request is sent
    #[serde(default = "default_propagation_debounce_ms")]
    pub propagation_debounce_ms: u64,
    /// URL of the type-inference endpoint
    #[serde(default)]
    pub propagation_endpoint: Option<String>,
    /// URL of the operator metadata endpoint
    #[serde(default)]
    pub metadata_endpoint: Option<String>,
    /// Timeout for outbound requests in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_undo_history_limit() -> usize {
    defaults::UNDO_HISTORY_LIMIT
}

fn default_drag_coalesce_ms() -> u64 {
    defaults::DRAG_COALESCE_MS
}

fn default_propagation_debounce_ms() -> u64 {
    defaults::PROPAGATION_DEBOUNCE_MS
}

fn default_request_timeout_ms() -> u64 {
    defaults::REQUEST_TIMEOUT_MS
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            undo_history_limit: default_undo_history_limit(),
            drag_coalesce_ms: default_drag_coalesce_ms(),
            propagation_debounce_ms: default_propagation_debounce_ms(),
            propagation_endpoint: None,
            metadata_endpoint: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl EditorConfig {
    /// Load configuration from a JSON file, falling back to defaults if absent
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).await.map_err(ConfigError::Io)?;

        serde_json::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save configuration to a JSON file
    pub async fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(ConfigError::Io)?;
        }

        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        fs::write(path, contents).await.map_err(ConfigError::Io)?;

        log::info!("Editor configuration saved to {:?}", path);
        Ok(())
    }

    pub fn drag_coalesce_window(&self) -> Duration {
        Duration::from_millis(self.drag_coalesce_ms)
    }

    pub fn propagation_debounce(&self) -> Duration {
        Duration::from_millis(self.propagation_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(serde_json::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EditorConfig =
            serde_json::from_str(r#"{"propagationDebounceMs": 250}"#).unwrap();
        assert_eq!(config.propagation_debounce_ms, 250);
        assert_eq!(config.undo_history_limit, defaults::UNDO_HISTORY_LIMIT);
        assert_eq!(config.drag_coalesce_ms, defaults::DRAG_COALESCE_MS);
        assert!(config.propagation_endpoint.is_none());
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = EditorConfig::load(&dir.path().join("editor.json"))
            .await
            .unwrap();
        assert_eq!(config, EditorConfig::default());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("editor.json");

        let config = EditorConfig {
            propagation_endpoint: Some("http://localhost:8080/api/queryplan/autocomplete".into()),
            undo_history_limit: 20,
            ..EditorConfig::default()
        };
        config.save(&path).await.unwrap();

        let loaded = EditorConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_load_invalid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let err = EditorConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
