//! Ordered hook callback registry
//!
//! One registry instance backs the plugin session and another backs every
//! experiment definition. Registration happens while the program sets itself
//! up; invocation happens from the lifecycle firing sites. Entries for a name
//! fire in descending priority order, ties fire in registration order.

use std::cell::RefCell;
use std::cmp::Reverse;

use indexmap::IndexMap;
use serde_json::Value;

use crate::error::Result;
use crate::hooks::event::{Flow, HookEvent, HookName};

/// Callback type stored in the registry.
///
/// Callbacks are `FnMut` so subscribers can carry state (counters, buffers)
/// without interior mutability of their own. Each entry wraps its callback in
/// a `RefCell`, which keeps invocation possible through a shared registry
/// reference. The engine is single threaded, so this never contends.
pub type HookCallback = Box<dyn FnMut(&mut HookEvent<'_>) -> Result<Flow>>;

/// How a registration interacts with existing entries for the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterMode {
    /// Discard all existing entries for the name, then insert.
    Replace,
    /// Add after the existing entries for the name.
    Append,
}

struct HookEntry {
    callback: RefCell<HookCallback>,
    priority: i32,
    default: bool,
}

/// Maps hook names to ordered callback lists.
#[derive(Default)]
pub struct HookRegistry {
    entries: IndexMap<HookName, Vec<HookEntry>>,
}

impl HookRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for `name`.
    ///
    /// `Replace` discards everything previously registered for the name, so
    /// the last replacing registration wins. `Append` keeps existing entries
    /// and adds after them.
    pub fn register(
        &mut self,
        name: impl Into<HookName>,
        priority: i32,
        mode: RegisterMode,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        let entries = self.entries.entry(name.into()).or_default();
        if mode == RegisterMode::Replace {
            entries.clear();
        }
        entries.push(HookEntry {
            callback: RefCell::new(Box::new(callback)),
            priority,
            default: false,
        });
    }

    /// Register a fallback callback for `name`.
    ///
    /// The registration only takes effect when no entries exist for the name
    /// yet. Used by experiment modules that provide overridable behavior.
    pub fn register_default(
        &mut self,
        name: impl Into<HookName>,
        priority: i32,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) -> bool {
        let entries = self.entries.entry(name.into()).or_default();
        if !entries.is_empty() {
            return false;
        }
        entries.push(HookEntry {
            callback: RefCell::new(Box::new(callback)),
            priority,
            default: true,
        });
        true
    }

    /// Whether any callback is registered for `name`.
    #[must_use]
    pub fn has(&self, name: &HookName) -> bool {
        self.entries.get(name).is_some_and(|entries| !entries.is_empty())
    }

    /// Number of callbacks registered for `name`.
    #[must_use]
    pub fn entry_count(&self, name: &HookName) -> usize {
        self.entries.get(name).map_or(0, Vec::len)
    }

    /// Names with at least one registered callback, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &HookName> {
        self.entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name)
    }

    /// Move all entries of `other` into this registry, appending after the
    /// entries already present for each name. Relative order within `other`
    /// is preserved. Default entries of `other` are dropped for names this
    /// registry already populates.
    pub fn absorb(&mut self, other: HookRegistry) {
        for (name, entries) in other.entries {
            let target = self.entries.entry(name).or_default();
            for entry in entries {
                if entry.default && !target.is_empty() {
                    continue;
                }
                target.push(entry);
            }
        }
    }

    /// Fire all callbacks registered for the event's name.
    ///
    /// Unknown names are a no-op returning `None`. Otherwise callbacks run in
    /// descending priority order (ties in registration order) until the chain
    /// ends or a callback returns [`Flow::Stop`]. The value of the last
    /// executed callback is returned; callback errors propagate immediately.
    pub fn invoke(&self, event: &mut HookEvent<'_>) -> Result<Option<Value>> {
        let name = event.name();
        let Some(entries) = self.entries.get(&name) else {
            return Ok(None);
        };
        if entries.is_empty() {
            return Ok(None);
        }

        let mut order: Vec<usize> = (0..entries.len()).collect();
        order.sort_by_key(|&index| Reverse(entries[index].priority));

        tracing::trace!(hook = %name, callbacks = entries.len(), "invoking hook");

        let mut last = None;
        for index in order {
            let mut callback = entries[index].callback.borrow_mut();
            match (*callback)(event)? {
                Flow::Continue(value) => last = value,
                Flow::Stop(value) => {
                    last = value;
                    break;
                }
            }
        }
        Ok(last)
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, entries) in &self.entries {
            map.entry(&name.to_string(), &entries.len());
        }
        map.finish()
    }
}
