//! Configuration for sourcebridge, read from `~/.sourcebridge/config.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sourcebridge_lsp::{DEFAULT_APP_GROUP, SessionOptions, SharedStorage, StorageError};
use sourcebridge_types::LaunchContext;

#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    pub storage: Option<StorageConfig>,
    pub server: Option<ServerConfig>,
}

/// `[storage]`: where per-install-group containers live.
#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Shared-storage base. `SOURCEBRIDGE_STORAGE_ROOT` takes precedence.
    pub root: Option<String>,
    pub app_group: Option<String>,
}

/// `[server]`: launch defaults for every session.
///
/// Values fill in launch-context keys the caller leaves unset.
#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    pub path: Option<String>,
    pub sdk_path: Option<String>,
    pub target: Option<String>,
    pub toolchain: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub exit_grace_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Replace `${VAR}` with the variable's value. Unset variables expand to
/// nothing; an unclosed `${` is kept literally.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    expand_with(value, |name| std::env::var(name).ok())
}

fn expand_with(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        let name_start = start + 2;
        let Some(len) = rest[name_start..].find('}') else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = &rest[name_start..name_start + len];
        if !name.is_empty() {
            out.push_str(&lookup(name).unwrap_or_default());
        }
        rest = &rest[name_start + len + 1..];
    }

    out.push_str(rest);
    out
}

impl BridgeConfig {
    /// Load the user config. A missing file is `Ok(None)`.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(None),
        }
    }

    /// Load from an explicit path. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }

    /// Launch-context defaults from `[server]`, with `${VAR}` expanded.
    #[must_use]
    pub fn launch_defaults(&self) -> LaunchContext {
        let mut context = LaunchContext::new();
        let Some(server) = &self.server else {
            return context;
        };

        let entries = [
            (LaunchContext::SERVER_PATH, &server.path),
            (LaunchContext::SDK_PATH, &server.sdk_path),
            (LaunchContext::TARGET, &server.target),
            (LaunchContext::TOOLCHAIN, &server.toolchain),
        ];
        for (key, value) in entries {
            if let Some(value) = value {
                context.insert(key, expand_env_vars(value));
            }
        }
        context
    }

    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        let defaults = SessionOptions::default();
        let Some(server) = &self.server else {
            return defaults;
        };
        SessionOptions {
            request_timeout: server.request_timeout_secs.map(Duration::from_secs),
            exit_grace: server
                .exit_grace_ms
                .map_or(defaults.exit_grace, Duration::from_millis),
        }
    }

    /// Resolve shared storage from `[storage]`, the environment override and
    /// the platform data directory.
    pub fn storage(&self) -> Result<SharedStorage, StorageError> {
        let storage = self.storage.as_ref();
        let root = storage
            .and_then(|s| s.root.as_deref())
            .map(|root| PathBuf::from(expand_env_vars(root)));
        let app_group = storage
            .and_then(|s| s.app_group.as_deref())
            .unwrap_or(DEFAULT_APP_GROUP);
        SharedStorage::resolve(root.as_deref(), app_group)
    }
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".sourcebridge").join("config.toml"))
}
