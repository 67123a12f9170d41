//! Plugin trait and factory type
//!
//! A plugin is a named bundle of hook subscriptions. Plugins are constructed
//! by factories when the session is built; construction and registration
//! failures are logged and skipped so a broken plugin never takes the whole
//! session down.

use crate::error::Result;
use crate::hooks::HookRegistry;

/// A named extension registering callbacks on the session registry.
pub trait Plugin {
    /// Stable name, used for logging and the `plugin_registered__<name>`
    /// hook channel.
    fn name(&self) -> &'static str;

    /// Register this plugin's callbacks.
    ///
    /// Registration happens against a staging registry. When it fails, none
    /// of the plugin's callbacks become visible to the session.
    fn register(&self, hooks: &mut HookRegistry) -> Result<()>;
}

/// Constructs a plugin instance when the session is built.
pub type PluginFactory = Box<dyn Fn() -> Result<Box<dyn Plugin>>>;
