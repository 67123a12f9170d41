//! Hook system for experiment extension points
//!
//! Hooks are the extension mechanism of the engine. Both the plugin session
//! and each individual experiment carry a [`HookRegistry`] mapping hook names
//! to ordered callback lists. The lifecycle fires well-known hooks at fixed
//! points; user code and plugins can subscribe to them or define custom ones.
//!
//! ## Invocation Model
//!
//! - Callbacks for a name run in descending priority order; ties run in
//!   registration order.
//! - Each callback receives the typed [`HookEvent`] for the firing site and
//!   returns a [`Flow`]: `Continue` lets the chain proceed, `Stop` ends it.
//! - The invocation returns the value carried by the last executed callback.
//!
//! ## Module Organization
//!
//! - `event`: Hook names, typed event payloads and the `Flow` result
//! - `registry`: The ordered callback registry shared by session and
//!   experiment

pub mod event;
pub mod registry;

// Re-export main types for convenience
pub use event::{CommitKind, Flow, HookEvent, HookName};
pub use registry::{HookCallback, HookRegistry, RegisterMode};
