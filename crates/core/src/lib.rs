//! Core types and utilities for labbook
//!
//! This is the foundation crate (Layer 0) that all other labbook crates
//! depend on. It provides:
//! - Base error types
//! - The parameter model (type tags, declaration scopes, discovery)
//! - The nested slash-path data store
//!
//! This crate has no dependencies on other labbook crates.

pub mod error;
pub mod params;
pub mod store;

pub use error::{Error, Result};
pub use params::{Parameter, Scope, TypeTag, is_parameter_name};
pub use store::DataStore;
