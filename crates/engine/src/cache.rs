//! Filesystem cache for expensive intermediate results
//!
//! The cache lives in a `.cache` folder next to the experiment archives, so
//! repeated runs of the same experiment share it. Entries are addressed by a
//! scope (folder segments) and a key; the key is hashed into the file name,
//! so keys can be arbitrary strings. Values are stored either as readable
//! JSON or as compact bincode.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::Result;

/// Serialization format of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    /// Human readable, diff friendly.
    Json,
    /// Compact binary, for large numeric payloads.
    Bincode,
}

impl CacheBackend {
    #[must_use]
    fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Bincode => "bin",
        }
    }
}

/// Cache rooted at one folder, usually `<base_path>/.cache`.
#[derive(Debug, Clone)]
pub struct Cache {
    root: PathBuf,
    enabled: bool,
}

impl Cache {
    /// Create a cache handle. The folder appears lazily on the first store.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            enabled: true,
        }
    }

    /// The cache folder.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether cached values are loaded.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Toggle cache reads. Disabling forces recomputation in [`Self::cached`]
    /// while results continue to be stored, so the cache warms up either way.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn entry_path(&self, scope: &[&str], key: &str, backend: CacheBackend) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let name: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();

        let mut path = self.root.clone();
        for segment in scope {
            path.push(segment);
        }
        path.join(format!("{name}.{}", backend.extension()))
    }

    /// Store a value, overwriting an existing entry for the same key.
    pub fn store<T: Serialize>(
        &self,
        scope: &[&str],
        key: &str,
        value: &T,
        backend: CacheBackend,
    ) -> Result<PathBuf> {
        let path = self.entry_path(scope, key, backend);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let bytes = match backend {
            CacheBackend::Json => serde_json::to_vec_pretty(value)?,
            CacheBackend::Bincode => {
                bincode::serde::encode_to_vec(value, bincode::config::standard())?
            }
        };
        fs::write(&path, bytes)?;
        tracing::debug!(key, path = %path.display(), "stored cache entry");
        Ok(path)
    }

    /// Load a value, `None` when no entry exists for the key.
    pub fn load<T: DeserializeOwned>(
        &self,
        scope: &[&str],
        key: &str,
        backend: CacheBackend,
    ) -> Result<Option<T>> {
        let path = self.entry_path(scope, key, backend);
        if !path.is_file() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let value = match backend {
            CacheBackend::Json => serde_json::from_slice(&bytes)?,
            CacheBackend::Bincode => {
                bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?.0
            }
        };
        Ok(Some(value))
    }

    /// Whether an entry exists for the key.
    #[must_use]
    pub fn contains(&self, scope: &[&str], key: &str, backend: CacheBackend) -> bool {
        self.entry_path(scope, key, backend).is_file()
    }

    /// Remove the entry for the key, returning whether one existed.
    pub fn remove(&self, scope: &[&str], key: &str, backend: CacheBackend) -> Result<bool> {
        let path = self.entry_path(scope, key, backend);
        if path.is_file() {
            fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Load the cached value or compute, store and return it.
    ///
    /// With reads disabled the computation always runs, but the fresh result
    /// is still stored for later runs with reads enabled.
    pub fn cached<T, F>(
        &self,
        scope: &[&str],
        key: &str,
        backend: CacheBackend,
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        if self.enabled {
            if let Some(value) = self.load(scope, key, backend)? {
                tracing::debug!(key, "cache hit");
                return Ok(value);
            }
        }
        let value = compute()?;
        self.store(scope, key, &value, backend)?;
        Ok(value)
    }

    /// All entry files currently in the cache.
    #[must_use]
    pub fn entries(&self) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            return Vec::new();
        }
        WalkDir::new(&self.root)
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .map(walkdir::DirEntry::into_path)
            .collect()
    }

    /// Delete the whole cache folder.
    pub fn clear(&self) -> Result<()> {
        if self.root.is_dir() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::cell::Cell;

    fn cache_in(dir: &tempfile::TempDir) -> Cache {
        Cache::new(dir.path().join(".cache"))
    }

    #[test]
    fn test_store_load_round_trip_both_backends() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let samples = vec![0.5_f64, 1.5, 2.5];

        for backend in [CacheBackend::Json, CacheBackend::Bincode] {
            cache.store(&["model"], "samples", &samples, backend).unwrap();
            let loaded: Vec<f64> = cache.load(&["model"], "samples", backend).unwrap().unwrap();
            assert_eq!(loaded, samples);
        }
    }

    #[test]
    fn test_missing_entry_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let loaded: Option<Vec<f64>> = cache.load(&[], "absent", CacheBackend::Json).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_same_key_reuses_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.store(&[], "key with spaces/and/slashes", &1, CacheBackend::Json).unwrap();
        cache.store(&[], "key with spaces/and/slashes", &2, CacheBackend::Json).unwrap();
        assert_eq!(cache.entries().len(), 1);
    }

    #[test]
    fn test_cached_computes_once_then_hits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        let computations = Cell::new(0usize);

        for _ in 0..2 {
            let value = cache
                .cached(&["fold"], "mse", CacheBackend::Json, || {
                    computations.set(computations.get() + 1);
                    Ok(42.0_f64)
                })
                .unwrap();
            assert!((value - 42.0).abs() < f64::EPSILON);
        }
        assert_eq!(computations.get(), 1);
    }

    #[test]
    fn test_disabled_cache_recomputes_but_stores() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = cache_in(&dir);
        cache.set_enabled(false);
        let computations = Cell::new(0usize);

        for _ in 0..2 {
            cache
                .cached(&[], "value", CacheBackend::Json, || {
                    computations.set(computations.get() + 1);
                    Ok(7_i64)
                })
                .unwrap();
        }
        assert_eq!(computations.get(), 2);
        assert!(cache.contains(&[], "value", CacheBackend::Json));

        cache.set_enabled(true);
        let value = cache
            .cached(&[], "value", CacheBackend::Json, || {
                computations.set(computations.get() + 1);
                Ok(7_i64)
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(computations.get(), 2);
    }

    #[test]
    fn test_remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache_in(&dir);
        cache.store(&["a"], "x", &1, CacheBackend::Json).unwrap();
        cache.store(&["b"], "y", &2, CacheBackend::Bincode).unwrap();

        assert!(cache.remove(&["a"], "x", CacheBackend::Json).unwrap());
        assert!(!cache.remove(&["a"], "x", CacheBackend::Json).unwrap());
        assert_eq!(cache.entries().len(), 1);

        cache.clear().unwrap();
        assert!(cache.entries().is_empty());
    }
}
