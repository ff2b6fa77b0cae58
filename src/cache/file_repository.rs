//! One bincode snapshot file per cached series.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};

use super::{CacheRepository, CachedTable};
use crate::utils::warn_once;

const SNAPSHOT_EXTENSION: &str = "bin";

#[derive(Debug, Clone)]
pub struct FileCacheRepository {
    dir: PathBuf,
}

impl FileCacheRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the snapshot file for a series name.
    pub fn snapshot_path(&self, name: &str) -> PathBuf {
        let safe_name = name.replace(['/', '\\', ' '], "_");
        self.dir.join(format!("{safe_name}.{SNAPSHOT_EXTENSION}"))
    }
}

impl CacheRepository for FileCacheRepository {
    fn get(&self, name: &str) -> Result<Option<CachedTable>> {
        let path = self.snapshot_path(name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };

        match bincode::serde::decode_from_slice(&data, bincode::config::standard()) {
            Ok((table, _)) => Ok(Some(table)),
            Err(e) => {
                warn_once(format!(
                    "⚠️  Ignoring unreadable cache file {}: {e}",
                    path.display()
                ));
                Ok(None)
            }
        }
    }

    fn put(&self, name: &str, table: &CachedTable) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.snapshot_path(name);
        let data = bincode::serde::encode_to_vec(table, bincode::config::standard())
            .context("Failed to serialize cached table")?;
        fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.dir.display()));
            }
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(SNAPSHOT_EXTENSION)
            {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}
