//! Indicator result cache.
//!
//! One JSON store per indicator id, named `indicator_<id>.json` under the
//! cache directory. Each store maps canonical call signatures to the year
//! series computed for them. Stores come into existence on first write;
//! reading from a store that was never written is an ordinary miss.
//!
//! The cache holds derived state only. A store that fails to parse is
//! treated as empty and rewritten on the next upsert rather than failing
//! the query path.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use registry_model::{IndicatorSeries, RegistryError, Result};

/// File-system backed cache of indicator series keyed by call signature.
#[derive(Debug, Clone)]
pub struct IndicatorCache {
    base_dir: PathBuf,
}

impl IndicatorCache {
    /// Creates a handle on the cache directory. Nothing is touched on disk
    /// until the first upsert.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Looks up the cached series for one indicator and signature.
    pub fn get(&self, indicator: &str, signature: &str) -> Result<Option<IndicatorSeries>> {
        let store = self.read_store(&self.store_path(indicator))?;
        Ok(store.get(signature).cloned())
    }

    /// Whether a series is cached for the indicator and signature.
    pub fn contains(&self, indicator: &str, signature: &str) -> Result<bool> {
        Ok(self.get(indicator, signature)?.is_some())
    }

    /// Indicator ids with a store on disk, each with its signature count.
    pub fn entries(&self) -> Result<BTreeMap<String, usize>> {
        let dir = match fs::read_dir(&self.base_dir) {
            Ok(dir) => dir,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        let mut entries = BTreeMap::new();
        for entry in dir {
            let path = entry?.path();
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            let Some(indicator) = name
                .strip_prefix("indicator_")
                .and_then(|rest| rest.strip_suffix(".json"))
            else {
                continue;
            };
            if path.is_file() {
                entries.insert(indicator.to_string(), self.read_store(&path)?.len());
            }
        }
        Ok(entries)
    }

    /// Upserts the series for one indicator and signature.
    ///
    /// The store file is created on first write; an existing entry under the
    /// same signature is replaced wholesale.
    pub fn put(
        &self,
        indicator: &str,
        signature: &str,
        series: &IndicatorSeries,
    ) -> Result<PathBuf> {
        let path = self.store_path(indicator);
        let mut store = self.read_store(&path)?;
        store.insert(signature.to_string(), series.clone());

        fs::create_dir_all(&self.base_dir)?;
        let json = serde_json::to_string_pretty(&store).map_err(|err| {
            RegistryError::Store(format!("failed to serialize {}: {err}", path.display()))
        })?;
        fs::write(&path, json)?;
        debug!(indicator, signature, path = %path.display(), "cached indicator series");
        Ok(path)
    }

    /// Drops every indicator store. Returns the number of stores removed.
    ///
    /// Rebuilding batch outputs calls this: any change upstream of the
    /// indicators invalidates every cached series at once.
    pub fn invalidate_all(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or_default();
            if path.is_file() && name.starts_with("indicator_") && name.ends_with(".json") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        debug!(removed, "indicator cache invalidated");
        Ok(removed)
    }

    fn store_path(&self, indicator: &str) -> PathBuf {
        self.base_dir
            .join(format!("indicator_{}.json", indicator.trim().to_ascii_lowercase()))
    }

    fn read_store(&self, path: &Path) -> Result<BTreeMap<String, IndicatorSeries>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&contents) {
            Ok(store) => Ok(store),
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable indicator store, treating as empty");
                Ok(BTreeMap::new())
            }
        }
    }
}
