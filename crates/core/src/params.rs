//! Parameter model and discovery
//!
//! Experiments declare their configuration as named bindings in a [`Scope`].
//! Discovery selects the bindings whose names follow the upper-case parameter
//! convention and turns them into [`Parameter`] records carrying a type tag,
//! an optional description and the JSON value.

use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Type tag attached to every parameter.
///
/// Known tags cover the JSON value kinds plus `path`; anything else is kept
/// as a named custom tag so that actionable parameter types can be matched
/// by tag without this crate knowing about them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TypeTag {
    /// Boolean value
    Bool,
    /// Integer number
    Int,
    /// Floating point number
    Float,
    /// String value
    String,
    /// Ordered list of values
    List,
    /// String-keyed mapping
    Map,
    /// Filesystem path stored as a string
    Path,
    /// Absent value
    Null,
    /// Any other named tag
    Custom(String),
}

impl TypeTag {
    /// Stable name used in metadata files.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "str",
            Self::List => "list",
            Self::Map => "map",
            Self::Path => "path",
            Self::Null => "null",
            Self::Custom(name) => name,
        }
    }

    /// Parse a tag from its stable name, falling back to a custom tag.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "bool" => Self::Bool,
            "int" => Self::Int,
            "float" => Self::Float,
            "str" => Self::String,
            "list" => Self::List,
            "map" => Self::Map,
            "path" => Self::Path,
            "null" => Self::Null,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Infer the tag from a JSON value.
    #[must_use]
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(n) if n.is_i64() || n.is_u64() => Self::Int,
            Value::Number(_) => Self::Float,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::List,
            Value::Object(_) => Self::Map,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::from_name(&name))
    }
}

/// A single discovered parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    /// Upper-case parameter name, unique within its scope
    pub name: String,
    /// Declared or inferred type tag
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    /// Descriptive text attached at the declaration site
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current JSON value
    pub value: Value,
    /// Whether the value is a faithful serialization that can be restored
    /// later, as opposed to an opaque display stand-in
    #[serde(default = "default_usable")]
    pub usable: bool,
    /// Whether reads and writes must dispatch through an actionable type
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub actionable: bool,
}

fn default_usable() -> bool {
    true
}

/// Returns whether a binding name marks a parameter.
///
/// Mirrors the upper-case convention: at least one upper-case letter and no
/// lower-case letters anywhere. Underscores and digits are allowed, so
/// `__DEBUG__` and `SEED_2` both qualify while `count` and `Count` do not.
#[must_use]
pub fn is_parameter_name(name: &str) -> bool {
    let mut has_upper = false;
    for c in name.chars() {
        if c.is_lowercase() {
            return false;
        }
        if c.is_uppercase() {
            has_upper = true;
        }
    }
    has_upper
}

#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    type_tag: Option<TypeTag>,
    description: Option<String>,
    usable: bool,
}

/// An ordered set of named bindings from which parameters are discovered.
///
/// A scope is an explicit stand-in for the module globals of the declaring
/// site: every binding is registered by name, in declaration order, together
/// with an optional explicit type tag and description. Discovery is a pure
/// function of the snapshot, so running it twice yields identical tables.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    bindings: IndexMap<String, Binding>,
}

impl Scope {
    /// Create an empty scope.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a binding, inferring its type tag from the value.
    ///
    /// Re-binding an existing name overwrites the value but keeps the
    /// original declaration position.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.insert(name.into(), serde_json::to_value(value)?, None, None, true);
        Ok(())
    }

    /// Register a binding with a descriptive comment.
    pub fn bind_described(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
        description: impl Into<String>,
    ) -> Result<()> {
        self.insert(
            name.into(),
            serde_json::to_value(value)?,
            None,
            Some(description.into()),
            true,
        );
        Ok(())
    }

    /// Register a binding with an explicit type tag and optional description.
    pub fn bind_typed(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
        type_tag: TypeTag,
        description: Option<&str>,
    ) -> Result<()> {
        self.insert(
            name.into(),
            serde_json::to_value(value)?,
            Some(type_tag),
            description.map(str::to_string),
            true,
        );
        Ok(())
    }

    /// Register a stand-in for a value that cannot be serialized.
    ///
    /// The display string is stored in place of the value and the resulting
    /// parameter is marked not `usable`, so loaders skip it when restoring.
    pub fn bind_opaque(
        &mut self,
        name: impl Into<String>,
        type_tag: TypeTag,
        display: impl Into<String>,
    ) {
        self.insert(
            name.into(),
            Value::String(display.into()),
            Some(type_tag),
            None,
            false,
        );
    }

    fn insert(
        &mut self,
        name: String,
        value: Value,
        type_tag: Option<TypeTag>,
        description: Option<String>,
        usable: bool,
    ) {
        let binding = Binding {
            value,
            type_tag,
            description,
            usable,
        };
        self.bindings.insert(name, binding);
    }

    /// Look up a bound value by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name).map(|b| &b.value)
    }

    /// Number of bindings, parameters or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether the scope holds no bindings.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Iterate all binding names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// Layer fallback defaults under this scope.
    ///
    /// Copies every binding of `other` whose name this scope does not bind
    /// yet, declaration metadata included. Names bound here keep their value,
    /// so the receiving scope always wins.
    pub fn merge_defaults(&mut self, other: &Scope) {
        for (name, binding) in &other.bindings {
            if !self.bindings.contains_key(name) {
                self.bindings.insert(name.clone(), binding.clone());
            }
        }
    }

    /// Discover the parameter table of this scope.
    ///
    /// Returns only the bindings whose name satisfies
    /// [`is_parameter_name`], in declaration order. Bindings whose tag is in
    /// `actionable_tags` are flagged so that call sites route reads and
    /// writes through the matching actionable type.
    #[must_use]
    pub fn discover(&self, actionable_tags: &BTreeSet<TypeTag>) -> IndexMap<String, Parameter> {
        let mut parameters = IndexMap::new();
        for (name, binding) in &self.bindings {
            if !is_parameter_name(name) {
                continue;
            }
            let type_tag = binding
                .type_tag
                .clone()
                .unwrap_or_else(|| TypeTag::infer(&binding.value));
            let actionable = actionable_tags.contains(&type_tag);
            parameters.insert(
                name.clone(),
                Parameter {
                    name: name.clone(),
                    type_tag,
                    description: binding.description.clone(),
                    value: binding.value.clone(),
                    usable: binding.usable,
                    actionable,
                },
            );
        }
        parameters
    }

    /// Fetch a bound value, deserialized into a concrete type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T> {
        let value = self.get(name).ok_or_else(|| Error::ParameterUnknown {
            name: name.to_string(),
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}
