//! Plugins bundled with the engine
//!
//! These load into every session built with bundled plugins enabled. They
//! only use the public hook surface, so removing one never breaks a run.

pub mod track_plot;

pub use track_plot::TrackPlotPlugin;

use crate::plugin::{Plugin, PluginFactory};

/// Factories for the plugins a bundled session loads, in load order.
#[must_use]
pub fn bundled_plugins() -> Vec<PluginFactory> {
    vec![Box::new(|| Ok(Box::new(TrackPlotPlugin) as Box<dyn Plugin>))]
}
