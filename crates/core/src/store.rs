//! Nested key-value store for experiment data
//!
//! Values are addressed with slash-separated paths, the way one would lay
//! out nested folders: `"metrics/mse/10"` resolves through the objects
//! `metrics` and `mse` to the entry `10`. Writing auto-creates missing
//! intermediate objects. Top-level keys starting with an underscore are
//! scratch space for hooks within one run and are excluded from the
//! persistable view.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Slash-path addressable store backing one experiment run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataStore {
    root: Map<String, Value>,
}

impl DataStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a value at a slash path, creating intermediate objects.
    ///
    /// Fails when the path is empty or when an intermediate segment already
    /// holds a non-object value that cannot be descended into.
    pub fn insert(&mut self, key: &str, value: impl Serialize) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidKey(key.to_string()));
        }
        let value = serde_json::to_value(value)?;
        let segments: Vec<&str> = key.split('/').collect();
        let mut current = &mut self.root;
        for segment in &segments[..segments.len() - 1] {
            let entry = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(map) => current = map,
                _ => {
                    return Err(Error::KeyNotTraversable {
                        key: key.to_string(),
                        segment: (*segment).to_string(),
                    });
                }
            }
        }
        current.insert(segments[segments.len() - 1].to_string(), value);
        Ok(())
    }

    /// Read the value at a slash path.
    pub fn get(&self, key: &str) -> Result<&Value> {
        self.get_opt(key).ok_or_else(|| Error::KeyNotFound {
            key: key.to_string(),
        })
    }

    /// Read the value at a slash path, `None` when absent.
    #[must_use]
    pub fn get_opt(&self, key: &str) -> Option<&Value> {
        let mut current: &Value = &Value::Null;
        for (index, segment) in key.split('/').enumerate() {
            current = if index == 0 {
                self.root.get(segment)?
            } else {
                current.as_object()?.get(segment)?
            };
        }
        Some(current)
    }

    /// Mutable access to the value at a slash path.
    pub fn get_mut(&mut self, key: &str) -> Result<&mut Value> {
        let segments: Vec<&str> = key.split('/').collect();
        let mut current = self
            .root
            .get_mut(segments[0])
            .ok_or_else(|| Error::KeyNotFound {
                key: key.to_string(),
            })?;
        for segment in &segments[1..] {
            current = match current {
                Value::Object(map) => map.get_mut(*segment).ok_or_else(|| Error::KeyNotFound {
                    key: key.to_string(),
                })?,
                _ => {
                    return Err(Error::KeyNotTraversable {
                        key: key.to_string(),
                        segment: (*segment).to_string(),
                    });
                }
            };
        }
        Ok(current)
    }

    /// Whether a slash path resolves to a value.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get_opt(key).is_some()
    }

    /// Read and deserialize the value at a slash path.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<T> {
        Ok(serde_json::from_value(self.get(key)?.clone())?)
    }

    /// Remove the top-level entry with the given name.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.root.remove(key)
    }

    /// Number of top-level entries, scratch keys included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.root.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Borrow the full backing object, scratch keys included.
    #[must_use]
    pub fn as_object(&self) -> &Map<String, Value> {
        &self.root
    }

    /// The persistable view of the store.
    ///
    /// Top-level keys starting with `_` are exchange space between hooks of
    /// one run and are dropped here; everything else is cloned verbatim.
    #[must_use]
    pub fn persistable(&self) -> Map<String, Value> {
        self.root
            .iter()
            .filter(|(key, _)| !key.starts_with('_'))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl From<Map<String, Value>> for DataStore {
    fn from(root: Map<String, Value>) -> Self {
        Self { root }
    }
}
