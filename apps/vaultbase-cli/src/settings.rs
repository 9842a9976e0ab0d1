use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PASSWORD: &str = "Admin";

/// User-editable settings persisted as `config.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Mutations between automatic syncs of the encrypted container.
    pub sync_interval: u32,
    /// Entries kept on each of the undo and redo stacks.
    pub journal_capacity: usize,
    /// Password written to a fresh credential file.
    pub default_password: String,
    /// PBKDF2 rounds for newly written credentials.
    pub auth_iterations: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sync_interval: vaultbase_storage::DEFAULT_SYNC_INTERVAL,
            journal_capacity: vaultbase_storage::journal::DEFAULT_CAPACITY,
            default_password: DEFAULT_PASSWORD.to_string(),
            auth_iterations: vaultbase_auth::DEFAULT_ITERATIONS,
        }
    }
}

impl Settings {
    /// Missing or unreadable settings fall back to defaults.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(err) => {
                log::warn!("could not read {}: {err}; using defaults", path.display());
                return Self::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(settings) => settings,
            Err(err) => {
                log::warn!("ignoring malformed {}: {err}", path.display());
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(self).context("serialize settings")?;
        json.push(b'\n');
        vaultbase_fs::atomic_write_bytes(path, &json)
            .with_context(|| format!("write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert_eq!(Settings::load(&dir.path().join("config.json")), Settings::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "syncInterval": 5 }"#).expect("write");

        let settings = Settings::load(&path);
        assert_eq!(settings.sync_interval, 5);
        assert_eq!(settings.default_password, DEFAULT_PASSWORD);
    }

    #[test]
    fn malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").expect("write");
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        let settings = Settings {
            journal_capacity: 10,
            ..Settings::default()
        };
        settings.save(&path).expect("save");
        assert_eq!(Settings::load(&path), settings);
    }
}
