//! Persisted overlay configuration.
//!
//! The record is small and mutable at runtime. It lives in memory behind a
//! [`SharedConfig`] and is written to disk on shutdown or explicit flush.

use crate::error::{OverlayError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use validator::Validate;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u64 = 60;
pub const DEFAULT_GREETING: &str = "Ness overlay online";

/// In-memory configuration shared by the lifecycle, handlers and limiter.
pub type SharedConfig = Arc<RwLock<OverlayConfig>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct OverlayConfig {
    #[validate(range(min = 1))]
    pub port: u16,
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: u64,
    pub greeting: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            rate_limit_per_minute: DEFAULT_RATE_LIMIT_PER_MINUTE,
            greeting: DEFAULT_GREETING.to_string(),
        }
    }
}

impl OverlayConfig {
    pub fn into_shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }

    /// Apply the fields present in `update`, leaving the rest untouched.
    ///
    /// The update is validated first; on error nothing is changed.
    pub fn apply(&mut self, update: &ConfigUpdate) -> Result<()> {
        update.validate()?;

        if let Some(limit) = update.rate_limit_per_minute {
            self.rate_limit_per_minute = u64::try_from(limit).map_err(|_| {
                OverlayError::ValidationError(format!("rate_limit_per_minute out of range: {limit}"))
            })?;
        }
        if let Some(greeting) = &update.greeting {
            self.greeting = greeting.clone();
        }
        Ok(())
    }
}

/// Body of `POST /config`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ConfigUpdate {
    #[validate(range(min = 1))]
    pub rate_limit_per_minute: Option<i64>,
    pub greeting: Option<String>,
}

/// Reads and writes the overlay configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: Arc<PathBuf>,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, creating the file with defaults when it is missing.
    pub fn load(&self) -> Result<OverlayConfig> {
        let path = self.path();

        if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| OverlayError::ConfigIo {
                path: path.to_path_buf(),
                source,
            })?;
            let config: OverlayConfig =
                serde_json::from_str(&raw).map_err(|e| OverlayError::ConfigCorrupt {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            config.validate().map_err(|e| OverlayError::ConfigCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

            tracing::info!(
                path = %path.display(),
                rate_limit_per_minute = config.rate_limit_per_minute,
                "Loaded overlay configuration"
            );
            return Ok(config);
        }

        let config = OverlayConfig::default();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| OverlayError::ConfigIo {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        self.save(&config)?;

        tracing::info!(path = %path.display(), "Created default overlay configuration");
        Ok(config)
    }

    /// Overwrite the file with `config`.
    ///
    /// The JSON goes to a sibling temp file which is then renamed over the target,
    /// so readers never observe a partial write.
    pub fn save(&self, config: &OverlayConfig) -> Result<()> {
        let path = self.path();
        let mut json = serde_json::to_string_pretty(config).map_err(|e| {
            OverlayError::ConfigCorrupt {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        json.push('\n');

        let tmp = temp_path(path);
        let io_err = |source: std::io::Error| OverlayError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;

        tracing::debug!(path = %path.display(), "Persisted overlay configuration");
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "overlay.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("overlay-config-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_load_creates_default_file() {
        let path = scratch_path("nested/overlay.json");
        let store = ConfigStore::new(&path);

        let config = store.load().unwrap();
        assert_eq!(config, OverlayConfig::default());
        assert!(path.exists());
    }

    #[test]
    fn test_save_then_load_reproduces_file() {
        let path = scratch_path("overlay.json");
        let store = ConfigStore::new(&path);

        let first = store.load().unwrap();
        let before = fs::read_to_string(&path).unwrap();
        store.save(&first).unwrap();
        let after = fs::read_to_string(&path).unwrap();

        assert_eq!(before, after);
        assert_eq!(store.load().unwrap(), first);
    }

    #[test]
    fn test_file_has_exactly_three_fields() {
        let path = scratch_path("overlay.json");
        ConfigStore::new(&path).load().unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 3);
        assert_eq!(object["port"], 8000);
        assert_eq!(object["rate_limit_per_minute"], 60);
        assert_eq!(object["greeting"], DEFAULT_GREETING);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let path = scratch_path("overlay.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"greeting": "hi"}"#).unwrap();

        let config = ConfigStore::new(&path).load().unwrap();
        assert_eq!(config.greeting, "hi");
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.rate_limit_per_minute, DEFAULT_RATE_LIMIT_PER_MINUTE);
    }

    #[test]
    fn test_malformed_file_is_corrupt() {
        let path = scratch_path("overlay.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let err = ConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, OverlayError::ConfigCorrupt { .. }));
    }

    #[test]
    fn test_zero_quota_in_file_is_corrupt() {
        let path = scratch_path("overlay.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"port": 8000, "rate_limit_per_minute": 0, "greeting": "x"}"#).unwrap();

        let err = ConfigStore::new(&path).load().unwrap_err();
        assert!(matches!(err, OverlayError::ConfigCorrupt { .. }));
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let mut config = OverlayConfig::default();
        let update = ConfigUpdate {
            greeting: Some("Blessed".into()),
            ..Default::default()
        };

        config.apply(&update).unwrap();
        assert_eq!(config.greeting, "Blessed");
        assert_eq!(config.rate_limit_per_minute, DEFAULT_RATE_LIMIT_PER_MINUTE);
    }

    #[test]
    fn test_apply_rejects_negative_quota_without_changes() {
        let mut config = OverlayConfig::default();
        let update = ConfigUpdate {
            rate_limit_per_minute: Some(-5),
            greeting: Some("ignored".into()),
        };

        assert!(matches!(
            config.apply(&update),
            Err(OverlayError::ValidationError(_))
        ));
        assert_eq!(config, OverlayConfig::default());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let update = ConfigUpdate {
            rate_limit_per_minute: Some(5),
            greeting: Some("again".into()),
        };
        let mut once = OverlayConfig::default();
        once.apply(&update).unwrap();
        let mut twice = once.clone();
        twice.apply(&update).unwrap();

        assert_eq!(once, twice);
    }
}
