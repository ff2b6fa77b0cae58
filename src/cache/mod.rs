//! Persistent cache of materialized series.
//!
//! Each logical series is stored whole under its own name. An artifact is
//! either present (and trusted) or missing; nothing is partially invalidated.
//! Artifacts are stored before truncation and truncated to the reporting
//! window on every read.
//!
//! ## Architecture
//!
//! - [`CacheRepository`]: `get`/`put` by series name
//! - [`FileCacheRepository`]: one bincode file per series in a data directory
//! - [`MemoryCacheRepository`]: in-process map, used when persistence is off
//! - [`fetch_or_compute`] / [`load_or_compute`]: the gate deciding whether a
//!   scan runs at all

mod file_repository;

use std::collections::HashMap;

use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::debug_log;
use crate::types::{MaterializedSeries, ReportingWindow, TrendSeries};
use crate::utils::warn_once;

pub use file_repository::FileCacheRepository;

/// Everything that can be persisted under a series name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CachedTable {
    Series(MaterializedSeries),
    Trend(TrendSeries),
}

/// Named storage for cached tables.
pub trait CacheRepository {
    /// `Ok(None)` is a cache miss.
    fn get(&self, name: &str) -> Result<Option<CachedTable>>;

    fn put(&self, name: &str, table: &CachedTable) -> Result<()>;

    /// Remove every artifact, returning how many were removed.
    fn clear(&self) -> Result<usize>;
}

/// Tables that can pass through the cache gate.
pub trait Cacheable: Sized {
    fn into_table(self) -> CachedTable;
    fn from_table(table: CachedTable) -> Option<Self>;
    fn truncate_to(&self, window: &ReportingWindow) -> Self;
}

impl Cacheable for MaterializedSeries {
    fn into_table(self) -> CachedTable {
        CachedTable::Series(self)
    }

    fn from_table(table: CachedTable) -> Option<Self> {
        match table {
            CachedTable::Series(series) => Some(series),
            CachedTable::Trend(_) => None,
        }
    }

    fn truncate_to(&self, window: &ReportingWindow) -> Self {
        self.truncate(window)
    }
}

impl Cacheable for TrendSeries {
    fn into_table(self) -> CachedTable {
        CachedTable::Trend(self)
    }

    fn from_table(table: CachedTable) -> Option<Self> {
        match table {
            CachedTable::Trend(trend) => Some(trend),
            CachedTable::Series(_) => None,
        }
    }

    fn truncate_to(&self, window: &ReportingWindow) -> Self {
        self.truncate(window)
    }
}

/// Return the cached table `name` as stored, or run `compute` and persist
/// its result.
pub fn fetch_or_compute<T, R, F>(repo: &R, name: &str, compute: F) -> Result<T>
where
    T: Cacheable + Clone,
    R: CacheRepository + ?Sized,
    F: FnOnce() -> Result<T>,
{
    if let Some(table) = repo.get(name)? {
        match T::from_table(table) {
            Some(cached) => {
                debug_log::log("CACHE", "HIT", name);
                return Ok(cached);
            }
            None => warn_once(format!(
                "⚠️  Cached artifact '{name}' has an unexpected shape, recomputing"
            )),
        }
    }

    debug_log::log("CACHE", "MISS", name);
    let computed = compute()?;
    repo.put(name, &computed.clone().into_table())?;
    debug_log::log("CACHE", "WRITE", name);
    Ok(computed)
}

/// [`fetch_or_compute`] followed by truncation to `window`. What is
/// persisted is never truncated.
pub fn load_or_compute<T, R, F>(
    repo: &R,
    name: &str,
    window: &ReportingWindow,
    compute: F,
) -> Result<T>
where
    T: Cacheable + Clone,
    R: CacheRepository + ?Sized,
    F: FnOnce() -> Result<T>,
{
    fetch_or_compute(repo, name, compute).map(|table| table.truncate_to(window))
}

/// Cache without persistence.
#[derive(Debug, Default)]
pub struct MemoryCacheRepository {
    tables: RwLock<HashMap<String, CachedTable>>,
}

impl MemoryCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheRepository for MemoryCacheRepository {
    fn get(&self, name: &str) -> Result<Option<CachedTable>> {
        Ok(self.tables.read().get(name).cloned())
    }

    fn put(&self, name: &str, table: &CachedTable) -> Result<()> {
        self.tables.write().insert(name.to_string(), table.clone());
        Ok(())
    }

    fn clear(&self) -> Result<usize> {
        let mut tables = self.tables.write();
        let removed = tables.len();
        tables.clear();
        Ok(removed)
    }
}
