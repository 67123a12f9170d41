//! Actionable parameter types
//!
//! An actionable type attaches behavior to parameters of a matching type
//! tag: reads and writes dispatch through it, and the reproducibility
//! capture gives it a chance to place files into the archive. The built-in
//! [`CopiedPath`] makes path parameters survive the deletion of their
//! original file.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde_json::Value;

use labbook_core::TypeTag;

use crate::error::Result;
use crate::experiment::Run;

/// Behavior bound to a parameter type tag.
pub trait ActionableType {
    /// The tag this type claims. Parameters carrying it are marked
    /// actionable at discovery.
    fn tag(&self) -> TypeTag;

    /// Resolve the effective value for a parameter read.
    fn get(&self, run: &Run, raw: &Value) -> Result<Value>;

    /// Transform an incoming value before it is stored on a write.
    fn set(&self, _run: &Run, value: Value) -> Result<Value> {
        Ok(value)
    }

    /// Place supporting files into the archive during the reproducibility
    /// capture.
    fn on_capture(&self, _run: &Run, _raw: &Value) -> Result<()> {
        Ok(())
    }
}

/// Actionable types known to an experiment, keyed by tag.
pub struct ActionableRegistry {
    types: IndexMap<TypeTag, Box<dyn ActionableType>>,
}

impl ActionableRegistry {
    /// An empty registry. Parameters then behave as plain values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            types: IndexMap::new(),
        }
    }

    /// A registry with the built-in types registered.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(CopiedPath));
        registry
    }

    /// Register an actionable type. A later registration for the same tag
    /// replaces the earlier one.
    pub fn register(&mut self, actionable: Box<dyn ActionableType>) {
        self.types.insert(actionable.tag(), actionable);
    }

    /// Look up the type claiming a tag.
    #[must_use]
    pub fn get(&self, tag: &TypeTag) -> Option<&dyn ActionableType> {
        self.types.get(tag).map(Box::as_ref)
    }

    /// The set of claimed tags, as consumed by parameter discovery.
    #[must_use]
    pub fn tags(&self) -> BTreeSet<TypeTag> {
        self.types.keys().cloned().collect()
    }

    /// Whether any type is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for ActionableRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Path parameter whose file or folder is copied into the archive.
///
/// On capture the referenced path lands in the archive root as
/// `<file_name>.copy`. Reads return the original path while it exists and
/// fall back to the archived copy afterwards, so loaded runs keep working
/// when the original file is gone.
pub struct CopiedPath;

impl ActionableType for CopiedPath {
    fn tag(&self) -> TypeTag {
        TypeTag::Path
    }

    fn get(&self, run: &Run, raw: &Value) -> Result<Value> {
        let Some(raw_path) = raw.as_str() else {
            return Ok(raw.clone());
        };
        if Path::new(raw_path).exists() {
            return Ok(raw.clone());
        }
        if let (Some(archive), Some(file_name)) = (run.archive(), file_name_of(raw_path)) {
            let copy = archive.file_path(&copy_name(file_name));
            if copy.exists() {
                return Ok(Value::String(copy.display().to_string()));
            }
        }
        Ok(raw.clone())
    }

    fn on_capture(&self, run: &Run, raw: &Value) -> Result<()> {
        let Some(raw_path) = raw.as_str() else {
            return Ok(());
        };
        let source = Path::new(raw_path);
        if !source.exists() {
            tracing::debug!(path = raw_path, "path parameter points nowhere, nothing to copy");
            return Ok(());
        }
        let (Some(archive), Some(file_name)) = (run.archive(), file_name_of(raw_path)) else {
            return Ok(());
        };
        let destination = archive.file_path(&copy_name(file_name));
        if source.is_dir() {
            copy_tree(source, &destination)?;
        } else {
            fs::copy(source, &destination)?;
        }
        tracing::debug!(path = raw_path, "copied path parameter into archive");
        Ok(())
    }
}

fn copy_name(file_name: &str) -> String {
    format!("{file_name}.copy")
}

fn file_name_of(path: &str) -> Option<&str> {
    Path::new(path).file_name().and_then(|name| name.to_str())
}

fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
