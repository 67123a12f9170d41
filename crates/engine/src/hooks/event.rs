//! Hook names, event payloads and the callback flow result

use std::fmt;
use std::path::Path;

use serde_json::Value;

use crate::artifact::TrackValue;
use crate::error::Error;
use crate::experiment::Run;

/// Name of the testing overlay hook. Kept in the dunder style of the special
/// parameters because it shares their reserved namespace.
pub const TESTING_HOOK: &str = "__TESTING__";

/// Identifies a hook channel.
///
/// The well-known lifecycle hooks have dedicated variants so that firing
/// sites and subscribers cannot drift apart on spelling. Everything else is
/// `Custom` and compared by its string name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HookName {
    /// Before parameter discovery merges declared values over the defaults.
    BeforeExperimentParameters,
    /// After the run record exists and all parameters are merged.
    ExperimentConstructed,
    /// After the archive folder, initial metadata and log exist.
    AfterExperimentInitialize,
    /// Right before the experiment body executes.
    BeforeRun,
    /// Right after the experiment body returned without error.
    AfterRun,
    /// Replaces heavy parameter values when testing mode is active.
    Testing,
    /// After a figure was committed to the archive.
    CommitFig,
    /// After a JSON document was committed to the archive.
    CommitJson,
    /// After a raw text file was committed to the archive.
    CommitRaw,
    /// After a value was appended to a tracked series.
    Track,
    /// After final metadata and data were persisted.
    AfterExperimentFinalize,
    /// After finalization of a failed run, before the error is re-raised.
    BeforeExperimentError,
    /// After any plugin registered with the session.
    PluginRegistered,
    /// After the named plugin registered with the session.
    PluginRegisteredFor(String),
    /// A hook defined by user code, compared by name.
    Custom(String),
}

impl HookName {
    /// Create a custom hook name.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

impl fmt::Display for HookName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BeforeExperimentParameters => write!(f, "before_experiment_parameters"),
            Self::ExperimentConstructed => write!(f, "experiment_constructed"),
            Self::AfterExperimentInitialize => write!(f, "after_experiment_initialize"),
            Self::BeforeRun => write!(f, "before_run"),
            Self::AfterRun => write!(f, "after_run"),
            Self::Testing => write!(f, "{TESTING_HOOK}"),
            Self::CommitFig => write!(f, "experiment_commit_fig"),
            Self::CommitJson => write!(f, "experiment_commit_json"),
            Self::CommitRaw => write!(f, "experiment_commit_raw"),
            Self::Track => write!(f, "experiment_track"),
            Self::AfterExperimentFinalize => write!(f, "after_experiment_finalize"),
            Self::BeforeExperimentError => write!(f, "before_experiment_error"),
            Self::PluginRegistered => write!(f, "plugin_registered"),
            Self::PluginRegisteredFor(name) => write!(f, "plugin_registered__{name}"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for HookName {
    fn from(name: &str) -> Self {
        match name {
            "before_experiment_parameters" => Self::BeforeExperimentParameters,
            "experiment_constructed" => Self::ExperimentConstructed,
            "after_experiment_initialize" => Self::AfterExperimentInitialize,
            "before_run" => Self::BeforeRun,
            "after_run" => Self::AfterRun,
            TESTING_HOOK => Self::Testing,
            "experiment_commit_fig" => Self::CommitFig,
            "experiment_commit_json" => Self::CommitJson,
            "experiment_commit_raw" => Self::CommitRaw,
            "experiment_track" => Self::Track,
            "after_experiment_finalize" => Self::AfterExperimentFinalize,
            "before_experiment_error" => Self::BeforeExperimentError,
            "plugin_registered" => Self::PluginRegistered,
            _ => match name.strip_prefix("plugin_registered__") {
                Some(plugin) => Self::PluginRegisteredFor(plugin.to_string()),
                None => Self::Custom(name.to_string()),
            },
        }
    }
}

impl From<String> for HookName {
    fn from(name: String) -> Self {
        Self::from(name.as_str())
    }
}

/// Which commit operation produced a [`HookEvent::Commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    /// A rendered figure.
    Fig,
    /// A JSON document.
    Json,
    /// Raw text content.
    Raw,
}

impl CommitKind {
    /// The hook channel this commit kind fires on.
    #[must_use]
    pub fn hook_name(self) -> HookName {
        match self {
            Self::Fig => HookName::CommitFig,
            Self::Json => HookName::CommitJson,
            Self::Raw => HookName::CommitRaw,
        }
    }
}

/// Result returned by every hook callback.
///
/// `Continue` hands control to the next callback in the chain, `Stop` ends
/// the chain early. Both may carry a value; the invocation as a whole yields
/// the value of the last callback that executed.
#[derive(Debug)]
pub enum Flow {
    /// Proceed to the next callback, optionally carrying a value.
    Continue(Option<Value>),
    /// End the chain here, optionally carrying the final value.
    Stop(Option<Value>),
}

/// Typed payload handed to hook callbacks.
///
/// Every variant that fires during a run carries a mutable borrow of the
/// [`Run`] so callbacks can log, store data or adjust parameters. The
/// remaining fields describe what just happened at the firing site.
pub enum HookEvent<'a> {
    /// A plain lifecycle point, identified by `name`.
    Lifecycle { name: HookName, run: &'a mut Run },
    /// An artifact was committed to the archive.
    Commit {
        kind: CommitKind,
        run: &'a mut Run,
        file_name: &'a str,
        path: &'a Path,
    },
    /// A value was appended to the tracked series `key`.
    Track {
        run: &'a mut Run,
        key: &'a str,
        value: &'a TrackValue,
    },
    /// The run failed and is about to re-raise `error`.
    Failure { run: &'a mut Run, error: &'a Error },
    /// A plugin registered with the session. Fired without a run.
    PluginRegistered { plugin_name: &'a str, specific: bool },
    /// A hook fired explicitly by user code, with an optional value.
    Custom {
        name: HookName,
        run: &'a mut Run,
        value: Option<&'a Value>,
    },
}

impl HookEvent<'_> {
    /// The hook channel this event fires on.
    #[must_use]
    pub fn name(&self) -> HookName {
        match self {
            Self::Lifecycle { name, .. } | Self::Custom { name, .. } => name.clone(),
            Self::Commit { kind, .. } => kind.hook_name(),
            Self::Track { .. } => HookName::Track,
            Self::Failure { .. } => HookName::BeforeExperimentError,
            Self::PluginRegistered {
                plugin_name,
                specific,
            } => {
                if *specific {
                    HookName::PluginRegisteredFor((*plugin_name).to_string())
                } else {
                    HookName::PluginRegistered
                }
            }
        }
    }

    /// Mutable access to the run, for every variant that carries one.
    pub fn run_mut(&mut self) -> Option<&mut Run> {
        match self {
            Self::Lifecycle { run, .. }
            | Self::Commit { run, .. }
            | Self::Track { run, .. }
            | Self::Failure { run, .. }
            | Self::Custom { run, .. } => Some(run),
            Self::PluginRegistered { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_display_round_trips_through_from_str() {
        let names = [
            HookName::BeforeExperimentParameters,
            HookName::ExperimentConstructed,
            HookName::AfterExperimentInitialize,
            HookName::BeforeRun,
            HookName::AfterRun,
            HookName::Testing,
            HookName::CommitFig,
            HookName::CommitJson,
            HookName::CommitRaw,
            HookName::Track,
            HookName::AfterExperimentFinalize,
            HookName::BeforeExperimentError,
            HookName::PluginRegistered,
            HookName::PluginRegisteredFor("track_plot".to_string()),
            HookName::Custom("optimize_step".to_string()),
        ];
        for name in names {
            let text = name.to_string();
            assert_eq!(HookName::from(text.as_str()), name);
        }
    }

    #[test]
    fn test_known_names_parse_to_variants() {
        assert_eq!(HookName::from("before_run"), HookName::BeforeRun);
        assert_eq!(HookName::from("__TESTING__"), HookName::Testing);
        assert_eq!(
            HookName::from("anything_else"),
            HookName::Custom("anything_else".to_string())
        );
    }

    #[test]
    fn test_commit_kind_maps_to_hook_name() {
        assert_eq!(CommitKind::Fig.hook_name(), HookName::CommitFig);
        assert_eq!(CommitKind::Raw.hook_name().to_string(), "experiment_commit_raw");
    }
}
