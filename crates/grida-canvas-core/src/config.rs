//! Editor configuration.

use std::path::Path;
use std::time::Duration;

use kurbo::{Size, Vec2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Tunables for an [`Editor`](crate::editor::Editor) instance.
///
/// Every field has a default, so a partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Maximum number of undo units kept.
    pub max_undo_history: usize,
    /// Multiplicative factor for zoom in / zoom out.
    pub zoom_step: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Screen-space margin kept around the target of `fit`.
    pub fit_margin: f64,
    /// Initial viewport size in screen pixels.
    pub viewport: Size,
    /// Offset applied to duplicated nodes.
    pub duplicate_offset: Vec2,
    /// Minimum interval between two presence broadcasts.
    pub presence_throttle_ms: u64,
    /// Remote peers silent for longer than this are dropped.
    pub presence_timeout_ms: u64,
    /// Cursor chat messages expire after this long.
    pub cursor_chat_ttl_ms: u64,
    /// Maximum number of patch messages held while disconnected.
    pub outgoing_queue_limit: usize,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            max_undo_history: 100,
            zoom_step: 2.0,
            min_zoom: 0.02,
            max_zoom: 256.0,
            fit_margin: 64.0,
            viewport: Size::new(800.0, 600.0),
            duplicate_offset: Vec2::ZERO,
            presence_throttle_ms: 50,
            presence_timeout_ms: 30_000,
            cursor_chat_ttl_ms: 5_000,
            outgoing_queue_limit: 1024,
        }
    }
}

impl EditorConfig {
    /// Parse a config from JSON and validate it.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zoom_step <= 1.0 {
            return Err(ConfigError::Invalid("zoom_step must be greater than 1".into()));
        }
        if self.min_zoom <= 0.0 || self.min_zoom > self.max_zoom {
            return Err(ConfigError::Invalid(format!(
                "zoom range {}..{} is empty",
                self.min_zoom, self.max_zoom
            )));
        }
        if self.fit_margin < 0.0 {
            return Err(ConfigError::Invalid("fit_margin must not be negative".into()));
        }
        Ok(())
    }

    pub fn presence_throttle(&self) -> Duration {
        Duration::from_millis(self.presence_throttle_ms)
    }

    pub fn presence_timeout(&self) -> Duration {
        Duration::from_millis(self.presence_timeout_ms)
    }

    pub fn cursor_chat_ttl(&self) -> Duration {
        Duration::from_millis(self.cursor_chat_ttl_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = EditorConfig::from_json(r#"{"zoom_step": 1.5}"#).unwrap();
        assert!((config.zoom_step - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.max_undo_history, 100);
    }

    #[test]
    fn test_invalid_zoom_step() {
        let result = EditorConfig::from_json(r#"{"zoom_step": 0.5}"#);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("editor.json");
        std::fs::write(&path, r#"{"fit_margin": 10}"#).unwrap();
        let config = EditorConfig::from_file(&path).unwrap();
        assert!((config.fit_margin - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_file() {
        let result = EditorConfig::from_file("/nonexistent/editor.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }
}
