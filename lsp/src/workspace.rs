//! Workspace path resolution.
//!
//! Files for every workspace live in a shared-storage container per install
//! group: `<base>/<installGroup>.<appGroup>/<resource>/<slug>/...`.
//! Resource, slug and document names are composed segment by segment;
//! empty, `.` and `..` segments are dropped, so nothing resolves outside the
//! container.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use sourcebridge_types::WorkspaceIdentity;

/// Environment variable that overrides the shared-storage base directory.
pub const STORAGE_ROOT_ENV: &str = "SOURCEBRIDGE_STORAGE_ROOT";

/// App-group suffix used for container names when none is configured.
pub const DEFAULT_APP_GROUP: &str = "com.sourcebridge.workspaces";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("shared storage location could not be resolved; set {STORAGE_ROOT_ENV} or [storage].root")]
    Unresolved,
    #[error("shared storage root {} must be an absolute path", path.display())]
    NotAbsolute { path: PathBuf },
}

/// Resolved shared-storage location.
///
/// Constructing one is the only fallible step; an application that cannot
/// build it has no place to put workspace files and should not start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedStorage {
    base: PathBuf,
    app_group: String,
}

impl SharedStorage {
    pub fn new(base: impl Into<PathBuf>, app_group: impl Into<String>) -> Result<Self, StorageError> {
        let base = base.into();
        if !base.is_absolute() {
            return Err(StorageError::NotAbsolute { path: base });
        }
        Ok(Self {
            base,
            app_group: app_group.into(),
        })
    }

    /// Resolve the base from, in order: [`STORAGE_ROOT_ENV`], `configured`,
    /// then the platform data directory.
    pub fn resolve(configured: Option<&Path>, app_group: &str) -> Result<Self, StorageError> {
        let fallback = dirs::data_dir().map(|dir| dir.join("sourcebridge"));
        Self::resolve_from(
            std::env::var_os(STORAGE_ROOT_ENV),
            configured,
            fallback,
            app_group,
        )
    }

    fn resolve_from(
        env: Option<OsString>,
        configured: Option<&Path>,
        fallback: Option<PathBuf>,
        app_group: &str,
    ) -> Result<Self, StorageError> {
        let base = env
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| configured.map(Path::to_path_buf))
            .or(fallback)
            .ok_or(StorageError::Unresolved)?;
        Self::new(base, app_group)
    }

    /// Container directory for one install group.
    #[must_use]
    pub fn root(&self, install_group: &str) -> PathBuf {
        let mut root = self.base.clone();
        push_segments(&mut root, &format!("{install_group}.{}", self.app_group));
        root
    }

    /// `root(install_group) / resource / slug`.
    #[must_use]
    pub fn document_root(&self, identity: &WorkspaceIdentity) -> PathBuf {
        let mut root = self.root(identity.install_group());
        push_segments(&mut root, identity.resource());
        push_segments(&mut root, identity.slug());
        root
    }
}

/// Join a workspace-relative document name onto its workspace root.
#[must_use]
pub fn resolve_document(document_root: &Path, relative: &str) -> PathBuf {
    let mut path = document_root.to_path_buf();
    push_segments(&mut path, relative);
    path
}

fn push_segments(path: &mut PathBuf, raw: &str) {
    raw.split(['/', '\\'])
        .filter(|segment| !matches!(*segment, "" | "." | ".."))
        .for_each(|segment| path.push(segment));
}
