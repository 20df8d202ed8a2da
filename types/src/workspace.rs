//! Workspace identity and registry keys.

use std::fmt;

/// Normalized identity of a workspace: `<host>/<slug>`.
///
/// The scheme prefix and every path separator are stripped from the hosting
/// resource, so `https://example.com` and `example.com/` produce the same key.
/// Keys are recomputed from their inputs, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceKey(String);

impl WorkspaceKey {
    #[must_use]
    pub fn new(resource: &str, slug: &str) -> Self {
        let host: String = strip_scheme(resource)
            .chars()
            .filter(|c| !matches!(c, '/' | '\\'))
            .collect();
        Self(format!("{host}/{slug}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn strip_scheme(resource: &str) -> &str {
    match resource.find("://") {
        Some(pos) => &resource[pos + 3..],
        None => resource,
    }
}

/// The triple a session is created for.
///
/// `install_group` selects the shared-storage container; `resource` and
/// `slug` select the workspace inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceIdentity {
    install_group: String,
    resource: String,
    slug: String,
}

impl WorkspaceIdentity {
    #[must_use]
    pub fn new(
        install_group: impl Into<String>,
        resource: impl Into<String>,
        slug: impl Into<String>,
    ) -> Self {
        Self {
            install_group: install_group.into(),
            resource: resource.into(),
            slug: slug.into(),
        }
    }

    #[must_use]
    pub fn install_group(&self) -> &str {
        &self.install_group
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn slug(&self) -> &str {
        &self.slug
    }

    #[must_use]
    pub fn key(&self) -> WorkspaceKey {
        WorkspaceKey::new(&self.resource, &self.slug)
    }
}
