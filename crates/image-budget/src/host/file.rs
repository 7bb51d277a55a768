//! Settings persisted to a JSON file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{Metadata, SettingsStore};
use crate::error::HostError;

#[derive(Debug, Clone)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
}

impl JsonFileSettingsStore {
    /// The default filename for budget settings
    pub const DEFAULT_FILENAME: &'static str = "image_tool_budget.json";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(config_dir: impl AsRef<Path>) -> Self {
        Self::new(config_dir.as_ref().join(Self::DEFAULT_FILENAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl SettingsStore for JsonFileSettingsStore {
    /// A missing or empty file reads as empty settings.
    ///
    /// Reads with blocking `std::fs` because `SettingsStore::get` is
    /// synchronous; the file is a few hundred bytes. Saves go through
    /// `tokio::fs`.
    fn get(&self) -> Result<Metadata, HostError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Metadata::new())
            }
            Err(error) => {
                return Err(HostError::Io {
                    path: self.path.clone(),
                    source: error,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(Metadata::new());
        }

        serde_json::from_str(&content).map_err(|e| HostError::Parse {
            path: self.path.clone(),
            source: e,
        })
    }

    async fn save(&self, settings: Metadata) -> Result<(), HostError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| HostError::Io {
                        path: self.path.clone(),
                        source: e,
                    })?;
            }
        }

        let content = serde_json::to_string_pretty(&settings).map_err(|e| HostError::Parse {
            path: self.path.clone(),
            source: e,
        })?;

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| HostError::Io {
                path: self.path.clone(),
                source: e,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSettingsStore::in_dir(dir.path());
        assert!(store.get().unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_then_get_returns_settings() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileSettingsStore::new(dir.path().join("nested").join("settings.json"));

        let mut settings = Metadata::new();
        settings.insert("image_tool_budget".to_string(), json!({ "limit_per_turn": 0 }));
        store.save(settings.clone()).await.unwrap();

        assert_eq!(store.get().unwrap(), settings);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = JsonFileSettingsStore::new(&path);
        assert!(matches!(store.get(), Err(HostError::Parse { .. })));
    }
}
