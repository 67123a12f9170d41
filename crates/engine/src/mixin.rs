//! Reusable parameter and hook bundles
//!
//! A mixin packages parameter defaults and hook subscriptions so that a
//! family of experiments can share behavior without sharing a base file.
//! Including a mixin merges its hooks in append mode and its parameters as
//! fallback defaults: a name the experiment already declares keeps the
//! experiment's value.

use serde::Serialize;

use labbook_core::{Result as CoreResult, Scope};

use crate::error::Result;
use crate::hooks::{Flow, HookEvent, HookName, HookRegistry, RegisterMode};

/// A bundle of parameter defaults and hook subscriptions.
#[derive(Default)]
pub struct Mixin {
    scope: Scope,
    hooks: HookRegistry,
}

impl Mixin {
    /// An empty mixin.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a fallback parameter default.
    pub fn bind(&mut self, name: impl Into<String>, value: impl Serialize) -> CoreResult<()> {
        self.scope.bind(name, value)
    }

    /// Declare a fallback parameter default with a description.
    pub fn bind_described(
        &mut self,
        name: impl Into<String>,
        value: impl Serialize,
        description: impl Into<String>,
    ) -> CoreResult<()> {
        self.scope.bind_described(name, value, description)
    }

    /// Full access to the mixin scope for typed or opaque declarations.
    pub fn scope_mut(&mut self) -> &mut Scope {
        &mut self.scope
    }

    /// Subscribe to a hook. Mixin subscriptions always append, so including
    /// several mixins layers their callbacks in inclusion order.
    pub fn on(
        &mut self,
        name: impl Into<HookName>,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks.register(name, 0, RegisterMode::Append, callback);
    }

    /// Subscribe with an explicit priority.
    pub fn on_with_priority(
        &mut self,
        name: impl Into<HookName>,
        priority: i32,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks
            .register(name, priority, RegisterMode::Append, callback);
    }

    /// Subscribe as an overridable fallback, kept only when the target has
    /// no other entries for the name at inclusion time.
    pub fn on_default(
        &mut self,
        name: impl Into<HookName>,
        callback: impl FnMut(&mut HookEvent<'_>) -> Result<Flow> + 'static,
    ) {
        self.hooks.register_default(name, 0, callback);
    }

    pub(crate) fn into_parts(self) -> (Scope, HookRegistry) {
        (self.scope, self.hooks)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_mixin_collects_bindings_and_hooks() {
        let mut mixin = Mixin::new();
        mixin.bind("REPETITIONS", 5).unwrap();
        mixin
            .bind_described("SEED", 13, "base seed for all repetitions")
            .unwrap();
        mixin.on("before_run", |_event| Ok(Flow::Continue(None)));
        mixin.on("before_run", |_event| Ok(Flow::Continue(None)));

        let (scope, hooks) = mixin.into_parts();
        assert_eq!(scope.len(), 2);
        assert_eq!(hooks.entry_count(&HookName::BeforeRun), 2);
    }
}
