//! Per-workspace sourcekit-lsp sessions.
//!
//! A [`Registry`] maps each workspace to one [`Session`]; a session owns one
//! language server process and the JSON-RPC transport over its stdio.

pub mod codec;

mod error;
mod protocol;
mod registry;
mod session;
mod transport;
mod workspace;

pub use error::{ResponseError, SessionError};
pub use lsp_types::{DocumentSymbolResponse, Hover, InitializeResult, Location};
pub use protocol::PathToUriError;
pub use registry::Registry;
pub use session::{Session, SessionOptions, SessionState};
pub use workspace::{
    DEFAULT_APP_GROUP, STORAGE_ROOT_ENV, SharedStorage, StorageError, resolve_document,
};
