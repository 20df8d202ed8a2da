//! Core domain types for sourcebridge.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Workspace identity, language classification, and launch context validation
//! live here so the session core and its callers agree on them.

mod language;
mod launch;
mod workspace;

pub use language::{Language, classify_language};
pub use launch::{LaunchContext, LaunchSpec, MissingContextKey, TOOLCHAIN_ENV};
pub use workspace::{WorkspaceIdentity, WorkspaceKey};
