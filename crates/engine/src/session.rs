//! Plugin session
//!
//! The session is the shared context holding all plugin hook subscriptions.
//! It is built once at process start and passed by handle into every run.
//! There is no global state: two sessions in one process are independent.

use std::rc::Rc;

use serde_json::Value;

use crate::error::Result;
use crate::hooks::{HookEvent, HookRegistry};
use crate::plugin::{Plugin, PluginFactory};
use crate::plugins::bundled_plugins;

/// Shared plugin context for experiment runs.
pub struct Session {
    hooks: HookRegistry,
    plugins: Vec<Box<dyn Plugin>>,
}

impl Session {
    /// Start building a session. Bundled plugins are included by default.
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder {
            factories: Vec::new(),
            bundled: true,
        }
    }

    /// A session with the bundled plugins only, ready to share.
    #[must_use]
    pub fn bundled() -> Rc<Self> {
        Rc::new(Self::builder().build())
    }

    /// A session without any plugins. Useful in tests that must not see
    /// plugin side effects.
    #[must_use]
    pub fn empty() -> Rc<Self> {
        Rc::new(Self::builder().bundled(false).build())
    }

    /// The session hook registry.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Fire the session callbacks for an event.
    pub fn invoke(&self, event: &mut HookEvent<'_>) -> Result<Option<Value>> {
        self.hooks.invoke(event)
    }

    /// Names of the plugins that registered successfully, in load order.
    pub fn plugin_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|plugin| plugin.name())
    }

    /// How many plugins registered successfully.
    #[must_use]
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }
}

/// Builds a [`Session`] from plugin factories.
///
/// Bundled factories load first, then explicitly added ones, so later
/// registrations can layer over the bundled behavior.
pub struct SessionBuilder {
    factories: Vec<PluginFactory>,
    bundled: bool,
}

impl SessionBuilder {
    /// Whether the bundled plugins are loaded. Defaults to `true`.
    #[must_use]
    pub fn bundled(mut self, bundled: bool) -> Self {
        self.bundled = bundled;
        self
    }

    /// Add a plugin factory.
    #[must_use]
    pub fn plugin(mut self, factory: impl Fn() -> Result<Box<dyn Plugin>> + 'static) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Construct every plugin and collect its hook subscriptions.
    ///
    /// A factory or registration failure is logged as a warning and the
    /// plugin is skipped; the session stays usable. After each successful
    /// registration the `plugin_registered` hook fires, followed by the
    /// plugin specific `plugin_registered__<name>` channel.
    #[must_use]
    pub fn build(self) -> Session {
        let mut factories: Vec<PluginFactory> = Vec::new();
        if self.bundled {
            factories.extend(bundled_plugins());
        }
        factories.extend(self.factories);

        let mut hooks = HookRegistry::new();
        let mut plugins: Vec<Box<dyn Plugin>> = Vec::new();
        for factory in factories {
            let plugin = match factory() {
                Ok(plugin) => plugin,
                Err(error) => {
                    tracing::warn!(%error, "plugin failed to load, skipping");
                    continue;
                }
            };
            let name = plugin.name();

            let mut staged = HookRegistry::new();
            if let Err(error) = plugin.register(&mut staged) {
                tracing::warn!(plugin = name, %error, "plugin failed to register, skipping");
                continue;
            }
            hooks.absorb(staged);
            plugins.push(plugin);
            tracing::debug!(plugin = name, "plugin registered");

            for specific in [false, true] {
                let mut event = HookEvent::PluginRegistered {
                    plugin_name: name,
                    specific,
                };
                if let Err(error) = hooks.invoke(&mut event) {
                    tracing::warn!(plugin = name, %error, "plugin_registered hook failed");
                }
            }
        }

        tracing::debug!(plugins = plugins.len(), "session ready");
        Session { hooks, plugins }
    }
}
