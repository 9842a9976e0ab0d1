use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Where everything lives on disk.
///
/// With an explicit data directory the cache (decrypted attachment views) is
/// kept inside it, so a whole installation can be pointed at one folder.
#[derive(Debug, Clone)]
pub struct DataLayout {
    data_dir: PathBuf,
    cache_dir: PathBuf,
}

impl DataLayout {
    pub fn resolve(data_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(data_dir) = data_dir {
            return Ok(Self::rooted(data_dir));
        }
        let proj = ProjectDirs::from("org", "vaultbase", "vaultbase")
            .context("could not determine a data directory; pass --data-dir")?;
        Ok(Self {
            data_dir: proj.data_local_dir().to_path_buf(),
            cache_dir: proj.cache_dir().to_path_buf(),
        })
    }

    pub fn rooted(data_dir: PathBuf) -> Self {
        let cache_dir = data_dir.join("cache");
        Self {
            data_dir,
            cache_dir,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn create_dirs(&self) -> Result<()> {
        for dir in [&self.data_dir, &self.files_dir(), &self.views_dir()] {
            std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        Ok(())
    }

    /// Legacy plaintext location; the encrypted container sits next to it.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("database.db")
    }

    pub fn db_key(&self) -> PathBuf {
        self.data_dir.join("db_key.key")
    }

    pub fn files_key(&self) -> PathBuf {
        self.data_dir.join("files_key.key")
    }

    pub fn legacy_key(&self) -> PathBuf {
        self.data_dir.join("legacy_key.key")
    }

    pub fn auth_file(&self) -> PathBuf {
        self.data_dir.join("auth.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn views_dir(&self) -> PathBuf {
        self.cache_dir.join("views")
    }
}
