//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sourcebridge_types::LaunchContext;

#[derive(Parser, Debug)]
#[command(name = "sourcebridge", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Install group that owns the workspace's storage container.
    #[arg(long, default_value = "default")]
    pub(crate) install_group: String,
    /// Hosting resource, for example `https://github.com`.
    #[arg(long)]
    pub(crate) resource: String,
    /// Project slug within the hosting resource.
    #[arg(long)]
    pub(crate) slug: String,
    /// Config file to read instead of `~/.sourcebridge/config.toml`.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    #[command(flatten)]
    pub(crate) launch: LaunchArgs,
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Launch settings that take precedence over the config file.
#[derive(Args, Debug, Default)]
pub(crate) struct LaunchArgs {
    #[arg(long, value_name = "PATH")]
    pub(crate) server_path: Option<String>,
    #[arg(long, value_name = "PATH")]
    pub(crate) sdk_path: Option<String>,
    /// Target triple passed to the compiler.
    #[arg(long)]
    pub(crate) target: Option<String>,
    /// Toolchain directory exported as `SOURCEKIT_TOOLCHAIN_PATH`.
    #[arg(long, value_name = "PATH")]
    pub(crate) toolchain: Option<String>,
}

impl LaunchArgs {
    pub(crate) fn into_context(self) -> LaunchContext {
        [
            (LaunchContext::SERVER_PATH, self.server_path),
            (LaunchContext::SDK_PATH, self.sdk_path),
            (LaunchContext::TARGET, self.target),
            (LaunchContext::TOOLCHAIN, self.toolchain),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect()
    }
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Command {
    /// Open a document without querying it.
    Open { document: String },
    /// List the symbols in a document.
    Symbols { document: String },
    /// Hover information at a zero-based position.
    Hover {
        document: String,
        line: u32,
        character: u32,
    },
    /// Definition locations for the symbol at a zero-based position.
    Definition {
        document: String,
        line: u32,
        character: u32,
    },
}

impl Command {
    pub(crate) fn document(&self) -> &str {
        match self {
            Command::Open { document }
            | Command::Symbols { document }
            | Command::Hover { document, .. }
            | Command::Definition { document, .. } => document,
        }
    }
}
