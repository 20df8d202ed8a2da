//! Session: one analysis-server process per workspace.
//!
//! A session starts `Uninitialized`. The first `initialize` launches the
//! server and moves it to `Initialized`; later calls are answered locally.
//! `shutdown` moves it to `ShuttingDown`, and the process watcher moves it
//! to `Exited` once the server is gone, however it went. The process and its
//! transport are created at most once per session.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use lsp_types::{DocumentSymbolResponse, Hover, InitializeResult, Location};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sourcebridge_types::{
    LaunchContext, LaunchSpec, TOOLCHAIN_ENV, WorkspaceIdentity, WorkspaceKey, classify_language,
};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::error::SessionError;
use crate::protocol;
use crate::transport::{CloseHandle, Transport};
use crate::workspace::resolve_document;

/// How long an exiting server gets to stop on its own before it is killed.
const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Observable lifecycle state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Initialized,
    ShuttingDown,
    Exited,
}

impl SessionState {
    /// Whether a server process may still be running: launched and not yet
    /// observed to exit.
    #[must_use]
    pub fn has_live_server(self) -> bool {
        matches!(self, Self::Initialized | Self::ShuttingDown)
    }
}

/// Per-session tuning shared by every session a registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bound on every request's wait for a response. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Grace period between `exit` and killing the process.
    pub exit_grace: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            request_timeout: None,
            exit_grace: DEFAULT_EXIT_GRACE,
        }
    }
}

/// A launched server: its transport plus the signal that stops the process.
struct Running {
    transport: Transport,
    terminate_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl Running {
    /// Ask the process watcher to stop the server. Idempotent.
    fn terminate(&self) {
        if let Some(tx) = lock(&self.terminate_tx).take() {
            let _ = tx.send(());
        }
    }
}

enum Lifecycle {
    Uninitialized,
    Initialized(Arc<Running>),
    ShuttingDown(Arc<Running>),
    Exited,
}

impl Lifecycle {
    fn state(&self) -> SessionState {
        match self {
            Self::Uninitialized => SessionState::Uninitialized,
            Self::Initialized(_) => SessionState::Initialized,
            Self::ShuttingDown(_) => SessionState::ShuttingDown,
            Self::Exited => SessionState::Exited,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of one workspace's analysis-server process and transport.
///
/// Operations may be called concurrently through a shared handle. Outbound
/// frames are serialized by the transport's writer task; responses are
/// matched to callers by request id.
pub struct Session {
    identity: WorkspaceIdentity,
    key: WorkspaceKey,
    document_root: PathBuf,
    options: SessionOptions,
    lifecycle: Arc<Mutex<Lifecycle>>,
}

impl Session {
    /// Create an uninitialized session. No process is started.
    #[must_use]
    pub fn new(
        identity: WorkspaceIdentity,
        document_root: PathBuf,
        options: SessionOptions,
    ) -> Self {
        let key = identity.key();
        Self {
            identity,
            key,
            document_root,
            options,
            lifecycle: Arc::new(Mutex::new(Lifecycle::Uninitialized)),
        }
    }

    #[must_use]
    pub fn identity(&self) -> &WorkspaceIdentity {
        &self.identity
    }

    #[must_use]
    pub fn key(&self) -> &WorkspaceKey {
        &self.key
    }

    #[must_use]
    pub fn document_root(&self) -> &Path {
        &self.document_root
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        lock(&self.lifecycle).state()
    }

    /// Launch the server and perform the `initialize` handshake.
    ///
    /// On an already-initialized session this returns empty capabilities
    /// immediately without touching the server. The state moves to
    /// `Initialized` under the same lock that checks it, so concurrent first
    /// calls launch exactly one process.
    pub async fn initialize(&self, context: &LaunchContext) -> Result<InitializeResult, SessionError> {
        let (running, root_uri) = {
            let mut lifecycle = lock(&self.lifecycle);
            match &*lifecycle {
                Lifecycle::Uninitialized => {}
                Lifecycle::Initialized(_) => {
                    tracing::debug!(session = %self.key, "already initialized");
                    return Ok(InitializeResult::default());
                }
                Lifecycle::ShuttingDown(_) => return Err(SessionError::ShuttingDown),
                Lifecycle::Exited => return Err(SessionError::Terminated),
            }

            let spec = LaunchSpec::from_context(context)?;
            let root_uri = protocol::path_to_file_uri(&self.document_root)?;
            tracing::debug!(
                session = %self.key,
                server = %spec.server_path().display(),
                sdk = spec.sdk_path(),
                target = spec.target(),
                "initialize"
            );
            // Resolving and spawning the server block this worker while the
            // lock is held. Both are bounded (a PATH lookup and a fork/exec),
            // and holding the lock is what keeps concurrent first calls from
            // launching a second process.
            let running = self.launch(&spec)?;
            *lifecycle = Lifecycle::Initialized(running.clone());
            (running, root_uri)
        };

        let params = protocol::initialize_params(root_uri.as_str(), self.identity.slug());
        let result = running.transport.request("initialize", Some(params)).await?;
        decode("initialize", result)
    }

    /// Spawn the server process, its transport, and the process watcher.
    fn launch(&self, spec: &LaunchSpec) -> Result<Arc<Running>, SessionError> {
        let program =
            which::which(spec.server_path()).map_err(|source| SessionError::ServerNotFound {
                path: spec.server_path().to_path_buf(),
                source,
            })?;

        let args = spec.arguments();
        let mut command = Command::new(&program);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(toolchain) = spec.toolchain() {
            command.env(TOOLCHAIN_ENV, toolchain);
        }

        tracing::info!(
            session = %self.key,
            server = %program.display(),
            ?args,
            "launching language server"
        );
        let spawn_error = |source| SessionError::Spawn {
            path: program.clone(),
            source,
        };
        let mut child = command.spawn().map_err(spawn_error)?;
        let (Some(stdout), Some(stdin)) = (child.stdout.take(), child.stdin.take()) else {
            return Err(spawn_error(std::io::Error::other("server stdio was not captured")));
        };

        let transport = Transport::start(
            stdout,
            stdin,
            self.key.to_string(),
            self.options.request_timeout,
        );
        let (terminate_tx, terminate_rx) = oneshot::channel();
        tokio::spawn(watch_process(
            child,
            terminate_rx,
            transport.close_handle(),
            Arc::downgrade(&self.lifecycle),
            self.key.to_string(),
            self.options.exit_grace,
        ));

        Ok(Arc::new(Running {
            transport,
            terminate_tx: Mutex::new(Some(terminate_tx)),
        }))
    }

    /// The live server, or why there is none.
    fn running(&self) -> Result<Arc<Running>, SessionError> {
        match &*lock(&self.lifecycle) {
            Lifecycle::Uninitialized => Err(SessionError::NotInitialized),
            Lifecycle::Initialized(running) | Lifecycle::ShuttingDown(running) => {
                Ok(running.clone())
            }
            Lifecycle::Exited => Err(SessionError::Terminated),
        }
    }

    fn document_uri(&self, document: &str) -> Result<String, SessionError> {
        let path = resolve_document(&self.document_root, document);
        Ok(protocol::path_to_file_uri(&path)?.to_string())
    }

    /// Send `initialized`. Fire-and-forget: nothing is awaited from the server.
    pub async fn send_initialized_notification(&self) -> Result<(), SessionError> {
        self.running()?
            .transport
            .notify("initialized", Some(serde_json::json!({})))
            .await
    }

    /// Send `textDocument/didOpen` with the full text at version 1.
    ///
    /// The language is classified from the document's extension.
    pub async fn open_document(&self, document: &str, text: &str) -> Result<(), SessionError> {
        let running = self.running()?;
        let path = resolve_document(&self.document_root, document);
        let language = classify_language(&path);
        let uri = protocol::path_to_file_uri(&path)?;
        tracing::debug!(session = %self.key, document, %language, "didOpen");

        let params = protocol::did_open_params(uri.as_str(), language.language_id(), text);
        running
            .transport
            .notify("textDocument/didOpen", Some(params))
            .await
    }

    /// `textDocument/documentSymbol`. A `null` result is an empty list.
    pub async fn document_symbols(
        &self,
        document: &str,
    ) -> Result<DocumentSymbolResponse, SessionError> {
        let running = self.running()?;
        let params = protocol::text_document_params(&self.document_uri(document)?);
        let result = running
            .transport
            .request("textDocument/documentSymbol", Some(params))
            .await?;
        decode("textDocument/documentSymbol", result).map(protocol::symbols_or_empty)
    }

    /// `textDocument/hover` at a zero-based line and UTF-16 character offset.
    pub async fn hover(
        &self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Option<Hover>, SessionError> {
        let running = self.running()?;
        let uri = self.document_uri(document)?;
        let params = protocol::text_document_position_params(&uri, line, character);
        let result = running
            .transport
            .request("textDocument/hover", Some(params))
            .await?;
        decode("textDocument/hover", result)
    }

    /// `textDocument/definition`, flattened to plain locations.
    pub async fn definition(
        &self,
        document: &str,
        line: u32,
        character: u32,
    ) -> Result<Vec<Location>, SessionError> {
        let running = self.running()?;
        let uri = self.document_uri(document)?;
        let params = protocol::text_document_position_params(&uri, line, character);
        let result = running
            .transport
            .request("textDocument/definition", Some(params))
            .await?;
        decode("textDocument/definition", result).map(protocol::into_locations)
    }

    /// Send `shutdown`. Succeeds without doing anything if the session was
    /// never initialized.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let running = {
            let mut lifecycle = lock(&self.lifecycle);
            let running = match &*lifecycle {
                Lifecycle::Uninitialized => return Ok(()),
                Lifecycle::Exited => return Err(SessionError::Terminated),
                Lifecycle::Initialized(running) | Lifecycle::ShuttingDown(running) => {
                    running.clone()
                }
            };
            *lifecycle = Lifecycle::ShuttingDown(running.clone());
            running
        };

        running.transport.request("shutdown", None).await?;
        tracing::debug!(session = %self.key, "shutdown acknowledged");
        Ok(())
    }

    /// Send `exit`, then ask for the process to be terminated.
    ///
    /// Returns without waiting for the process to stop; the watcher moves the
    /// session to `Exited` when it does. A no-op before `initialize` and
    /// after the process is gone.
    pub async fn exit(&self) {
        let running = match self.running() {
            Ok(running) => running,
            Err(SessionError::NotInitialized) => {
                tracing::debug!(session = %self.key, "exit before initialize ignored");
                return;
            }
            Err(_) => return,
        };

        if let Err(e) = running.transport.notify("exit", None).await {
            tracing::debug!(session = %self.key, "exit notification not sent: {e}");
        }
        running.terminate();
    }

    /// Install a running transport without spawning a process.
    #[cfg(test)]
    pub(crate) fn attach(&self, transport: Transport) -> oneshot::Receiver<()> {
        let (terminate_tx, terminate_rx) = oneshot::channel();
        *lock(&self.lifecycle) = Lifecycle::Initialized(Arc::new(Running {
            transport,
            terminate_tx: Mutex::new(Some(terminate_tx)),
        }));
        terminate_rx
    }
}

fn decode<T: DeserializeOwned>(method: &'static str, value: Value) -> Result<T, SessionError> {
    serde_json::from_value(value).map_err(|source| SessionError::Decode { method, source })
}

/// Wait for the server process to end, then close its transport and mark
/// the session `Exited`.
///
/// A terminate request (or the session being dropped) gives the process
/// `grace` to exit on its own before it is killed.
async fn watch_process(
    mut child: Child,
    mut terminate_rx: oneshot::Receiver<()>,
    close: CloseHandle,
    lifecycle: Weak<Mutex<Lifecycle>>,
    label: String,
    grace: Duration,
) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = &mut terminate_rx => None,
    };
    let status = match exited {
        Some(status) => status,
        None => match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                tracing::debug!(session = %label, "language server still running after exit, killing");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(session = %label, "failed to kill language server: {e}");
                }
                child.wait().await
            }
        },
    };

    match status {
        Ok(status) => tracing::info!(session = %label, %status, "language server exited"),
        Err(e) => tracing::warn!(session = %label, "waiting on language server failed: {e}"),
    }

    let failed = close.close().await;
    if failed > 0 {
        tracing::debug!(session = %label, failed, "failed pending requests after exit");
    }
    if let Some(lifecycle) = lifecycle.upgrade() {
        *lock(&lifecycle) = Lifecycle::Exited;
    }
}
