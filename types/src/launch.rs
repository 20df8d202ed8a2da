//! Launch context handed to `initialize`, and its validated form.
//!
//! Callers pass a loose string map (it usually arrives from an HTTP body or
//! a config file). [`LaunchSpec::from_context`] is the parse boundary: a
//! `LaunchSpec` exists only if every required key is present.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Environment variable that points the analysis server at a toolchain.
pub const TOOLCHAIN_ENV: &str = "SOURCEKIT_TOOLCHAIN_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("missing required launch context key '{key}'")]
pub struct MissingContextKey {
    pub key: &'static str,
}

/// Launch/request context: a string map with the keys
/// [`SERVER_PATH`](Self::SERVER_PATH), [`SDK_PATH`](Self::SDK_PATH),
/// [`TARGET`](Self::TARGET) and optionally [`TOOLCHAIN`](Self::TOOLCHAIN).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchContext(BTreeMap<String, String>);

impl LaunchContext {
    pub const SERVER_PATH: &'static str = "serverPath";
    pub const SDK_PATH: &'static str = "SDKPath";
    pub const TARGET: &'static str = "target";
    pub const TOOLCHAIN: &'static str = "toolchain";

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Value for `key`, treating blank strings as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Fill in keys from `defaults` that this context does not set.
    #[must_use]
    pub fn merged_over(mut self, defaults: &LaunchContext) -> Self {
        for (key, value) in &defaults.0 {
            self.0.entry(key.clone()).or_insert_with(|| value.clone());
        }
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LaunchContext {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Validated launch parameters for one analysis-server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    server_path: PathBuf,
    sdk_path: String,
    target: String,
    toolchain: Option<PathBuf>,
}

impl LaunchSpec {
    /// Required keys are checked in order: server path, SDK path, target.
    pub fn from_context(context: &LaunchContext) -> Result<Self, MissingContextKey> {
        let require = |key: &'static str| context.get(key).ok_or(MissingContextKey { key });

        let server_path = PathBuf::from(require(LaunchContext::SERVER_PATH)?);
        let sdk_path = require(LaunchContext::SDK_PATH)?.to_string();
        let target = require(LaunchContext::TARGET)?.to_string();
        let toolchain = context.get(LaunchContext::TOOLCHAIN).map(PathBuf::from);

        Ok(Self {
            server_path,
            sdk_path,
            target,
            toolchain,
        })
    }

    #[must_use]
    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    #[must_use]
    pub fn sdk_path(&self) -> &str {
        &self.sdk_path
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn toolchain(&self) -> Option<&Path> {
        self.toolchain.as_deref()
    }

    /// Command-line arguments for the server.
    ///
    /// SDK and target reach the compiler through `-Xswiftc` passthrough.
    #[must_use]
    pub fn arguments(&self) -> Vec<String> {
        let mut args = vec!["--log-level".to_string(), "info".to_string()];
        for flag in ["-sdk", self.sdk_path.as_str(), "-target", self.target.as_str()] {
            args.push("-Xswiftc".to_string());
            args.push(flag.to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_context() -> LaunchContext {
        LaunchContext::new()
            .with(LaunchContext::SERVER_PATH, "/usr/bin/sourcekit-lsp")
            .with(LaunchContext::SDK_PATH, "/opt/sdk")
            .with(LaunchContext::TARGET, "x86_64-unknown-linux-gnu")
    }

    #[test]
    fn spec_from_full_context() {
        let spec = LaunchSpec::from_context(&full_context()).unwrap();
        assert_eq!(spec.server_path(), Path::new("/usr/bin/sourcekit-lsp"));
        assert_eq!(spec.sdk_path(), "/opt/sdk");
        assert_eq!(spec.target(), "x86_64-unknown-linux-gnu");
        assert!(spec.toolchain().is_none());
    }

    #[test]
    fn missing_target_is_reported() {
        let mut context = full_context();
        context.0.remove(LaunchContext::TARGET);
        let err = LaunchSpec::from_context(&context).unwrap_err();
        assert_eq!(err.key, "target");
        assert_eq!(
            err.to_string(),
            "missing required launch context key 'target'"
        );
    }

    #[test]
    fn first_missing_key_wins() {
        let err = LaunchSpec::from_context(&LaunchContext::new()).unwrap_err();
        assert_eq!(err.key, LaunchContext::SERVER_PATH);
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let context = full_context().with(LaunchContext::SDK_PATH, "   ");
        let err = LaunchSpec::from_context(&context).unwrap_err();
        assert_eq!(err.key, LaunchContext::SDK_PATH);
    }

    #[test]
    fn toolchain_is_optional() {
        let context = full_context().with(LaunchContext::TOOLCHAIN, "/opt/toolchain");
        let spec = LaunchSpec::from_context(&context).unwrap();
        assert_eq!(spec.toolchain(), Some(Path::new("/opt/toolchain")));
    }

    #[test]
    fn arguments_use_passthrough_flags() {
        let spec = LaunchSpec::from_context(&full_context()).unwrap();
        assert_eq!(
            spec.arguments(),
            [
                "--log-level",
                "info",
                "-Xswiftc",
                "-sdk",
                "-Xswiftc",
                "/opt/sdk",
                "-Xswiftc",
                "-target",
                "-Xswiftc",
                "x86_64-unknown-linux-gnu",
            ]
        );
    }

    #[test]
    fn merged_over_keeps_explicit_values() {
        let defaults = full_context();
        let context = LaunchContext::new()
            .with(LaunchContext::TARGET, "arm64-apple-macosx")
            .merged_over(&defaults);
        let spec = LaunchSpec::from_context(&context).unwrap();
        assert_eq!(spec.target(), "arm64-apple-macosx");
        assert_eq!(spec.sdk_path(), "/opt/sdk");
    }

    #[test]
    fn context_deserializes_from_json_map() {
        let context: LaunchContext = serde_json::from_value(serde_json::json!({
            "serverPath": "/bin/sk",
            "SDKPath": "/sdk",
            "target": "t"
        }))
        .unwrap();
        assert_eq!(context.get(LaunchContext::SERVER_PATH), Some("/bin/sk"));
        assert!(LaunchSpec::from_context(&context).is_ok());
    }

    #[test]
    fn context_collects_from_pairs() {
        let context: LaunchContext = [("serverPath", "/bin/sk")].into_iter().collect();
        assert_eq!(context.get("serverPath"), Some("/bin/sk"));
        assert_eq!(context.get("target"), None);
    }
}
