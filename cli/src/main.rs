//! sourcebridge - one-shot sourcekit-lsp queries against a hosted workspace.
//!
//! ```text
//! main() -> Registry::get_or_create -> initialize -> initialized -> didOpen
//!                                                                   |
//!                                                                   v
//!                        remove <- exit <- shutdown <- print JSON <- query
//! ```
//!
//! Results go to stdout as JSON; logs go to `~/.sourcebridge/logs`.

mod args;

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use sourcebridge_config::{BridgeConfig, config_path};
use sourcebridge_lsp::{Registry, Session, SessionState, resolve_document};

use crate::args::{Cli, Command};

const LOG_FILE_NAME: &str = "sourcebridge.log";

/// Install the subscriber. Logs go to `~/.sourcebridge/logs/sourcebridge.log`;
/// if that cannot be opened they go to stderr, since stdout carries results.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    let log_dir = config_path()
        .as_deref()
        .and_then(Path::parent)
        .map(|dir| dir.join("logs"));
    let Some(log_dir) = log_dir else {
        registry.with(fmt::layer().with_writer(io::stderr)).init();
        tracing::warn!("no home directory; logging to stderr");
        return;
    };

    match open_log_file(&log_dir) {
        Ok((path, file)) => {
            registry
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
            tracing::debug!(path = %path.display(), "logging to file");
        }
        Err(e) => {
            registry.with(fmt::layer().with_writer(io::stderr)).init();
            tracing::warn!("{e:#}; logging to stderr");
        }
    }
}

/// Open (creating if needed) the append-only log file under `dir`.
fn open_log_file(dir: &Path) -> Result<(PathBuf, fs::File)> {
    fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    let path = dir.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    Ok((path, file))
}

fn load_config(cli: &Cli) -> Result<BridgeConfig> {
    let loaded = match &cli.config {
        // An explicit config file must be readable.
        Some(path) => BridgeConfig::load_from(path)?
            .with_context(|| format!("config file {} does not exist", path.display()))?,
        None => BridgeConfig::load().ok().flatten().unwrap_or_default(),
    };
    Ok(loaded)
}

/// Read a document from the workspace and send `didOpen`.
async fn open(session: &Session, document: &str) -> Result<()> {
    let path = resolve_document(session.document_root(), document);
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    session.open_document(document, &text).await?;
    Ok(())
}

async fn query(session: &Session, command: &Command) -> Result<Value> {
    open(session, command.document()).await?;

    let value = match command {
        Command::Open { document } => serde_json::json!({
            "opened": resolve_document(session.document_root(), document),
        }),
        Command::Symbols { document } => {
            serde_json::to_value(session.document_symbols(document).await?)?
        }
        Command::Hover {
            document,
            line,
            character,
        } => serde_json::to_value(session.hover(document, *line, *character).await?)?,
        Command::Definition {
            document,
            line,
            character,
        } => serde_json::to_value(session.definition(document, *line, *character).await?)?,
    };
    Ok(value)
}

/// Send `shutdown` and `exit`, then give the server time to stop.
async fn close(session: &Session, grace: Duration) {
    if let Err(e) = session.shutdown().await {
        tracing::warn!(session = %session.key(), "shutdown failed: {e}");
    }
    session.exit().await;

    let deadline = tokio::time::Instant::now() + grace + Duration::from_secs(1);
    while !matches!(
        session.state(),
        SessionState::Exited | SessionState::Uninitialized
    ) {
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(session = %session.key(), "language server did not exit in time");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let storage = config
        .storage()
        .context("cannot resolve shared storage for workspaces")?;
    let options = config.session_options();
    let registry = Registry::new(storage, options);

    let context = cli.launch.into_context().merged_over(&config.launch_defaults());
    let session = registry.get_or_create(&cli.install_group, &cli.resource, &cli.slug);

    let outcome: Result<Value> = async {
        let capabilities = session.initialize(&context).await?;
        tracing::debug!(server = ?capabilities.server_info, "initialized");
        session.send_initialized_notification().await?;
        query(&session, &cli.command).await
    }
    .await;

    close(&session, options.exit_grace).await;
    registry.remove(&cli.resource, &cli.slug);

    let value = outcome?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    run(Cli::parse()).await
}
