//! # Labbook Engine
//!
//! Runtime for archived computational experiments.
//!
//! This crate drives the experiment lifecycle on top of the primitives from
//! `labbook-core`:
//!
//! - **Experiment and Run**: Declared experiment shape and the mutable
//!   per-run state, from construction through finalization
//! - **Archive**: One folder per run holding metadata, data, the log, the
//!   code snapshot and tracked figures
//! - **Hooks**: Priority-ordered callback registries on the session and on
//!   each experiment, with typed event payloads
//! - **Plugins and Session**: Pluggable behavior registered into a shared
//!   session, loaded once per process
//! - **Mixins**: Reusable parameter and hook bundles included into
//!   experiments
//! - **Caching and Reproducibility**: Keyed result cache plus lockfile and
//!   environment snapshots of finished runs

pub mod actionable;
pub mod archive;
pub mod artifact;
pub mod cache;
pub mod error;
pub mod experiment;
pub mod hooks;
pub mod logging;
pub mod mixin;
pub mod plugin;
pub mod plugins;
pub mod repro;
pub mod session;

// Re-export parameter and data primitives from core
pub use labbook_core::{DataStore, Parameter, Scope, TypeTag};

// Re-export error types
pub use error::{Error, Result};

// Re-export commonly used types
pub use archive::{Archive, RunMetadata, RunStatus};
pub use artifact::{Figure, TrackValue};
pub use cache::{Cache, CacheBackend};
pub use experiment::{Experiment, Run};
pub use hooks::{Flow, HookEvent, HookName, HookRegistry, RegisterMode};
pub use mixin::Mixin;
pub use plugin::{Plugin, PluginFactory};
pub use session::{Session, SessionBuilder};
