//! Registry: the host-owned map from workspace key to session.
//!
//! Sessions are created lazily on first lookup and leave the map only
//! through [`Registry::remove`] or [`Registry::shutdown_all`]. The registry
//! never stops a server on its own; callers sequence `shutdown` and `exit`
//! before removing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sourcebridge_types::{WorkspaceIdentity, WorkspaceKey};

use crate::session::{Session, SessionOptions, SessionState};
use crate::workspace::SharedStorage;

pub struct Registry {
    storage: SharedStorage,
    options: SessionOptions,
    sessions: Mutex<HashMap<WorkspaceKey, Arc<Session>>>,
}

impl Registry {
    #[must_use]
    pub fn new(storage: SharedStorage, options: SessionOptions) -> Self {
        Self {
            storage,
            options,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<WorkspaceKey, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the session for `(resource, slug)`, creating an uninitialized
    /// one if none exists.
    ///
    /// Lookup and insertion happen under one lock, so concurrent callers
    /// racing on the same key all receive the same session. Construction
    /// only computes paths; no process is started here. The install group
    /// of the first caller decides the session's document root.
    pub fn get_or_create(&self, install_group: &str, resource: &str, slug: &str) -> Arc<Session> {
        let identity = WorkspaceIdentity::new(install_group, resource, slug);
        let key = identity.key();

        let mut sessions = self.sessions();
        if let Some(existing) = sessions.get(&key) {
            if existing.identity().install_group() != install_group {
                tracing::debug!(
                    session = %key,
                    existing = existing.identity().install_group(),
                    requested = install_group,
                    "reusing session created for another install group"
                );
            }
            return existing.clone();
        }

        let document_root = self.storage.document_root(&identity);
        tracing::info!(session = %key, root = %document_root.display(), "creating session");
        let session = Arc::new(Session::new(identity, document_root, self.options));
        sessions.insert(key, session.clone());
        session
    }

    /// The session for `(resource, slug)`, if one exists.
    #[must_use]
    pub fn get(&self, resource: &str, slug: &str) -> Option<Arc<Session>> {
        self.sessions().get(&WorkspaceKey::new(resource, slug)).cloned()
    }

    /// Drop the mapping for `(resource, slug)` and hand back the session.
    ///
    /// The session's process is not stopped. Removing a session whose
    /// server is still running means the caller skipped `shutdown` or
    /// `exit`; the process is killed once the last handle to the session is
    /// dropped.
    pub fn remove(&self, resource: &str, slug: &str) -> Option<Arc<Session>> {
        let key = WorkspaceKey::new(resource, slug);
        let removed = self.sessions().remove(&key)?;
        let state = removed.state();
        if state.has_live_server() {
            tracing::warn!(
                session = %key,
                ?state,
                "removed session before exit; its server is orphaned until the last handle drops"
            );
        } else {
            tracing::debug!(session = %key, ?state, "removed session");
        }
        Some(removed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Shut down, exit and remove every session.
    ///
    /// Shutdown failures are logged; `exit` is sent regardless.
    pub async fn shutdown_all(&self) {
        let drained: Vec<(WorkspaceKey, Arc<Session>)> = self.sessions().drain().collect();
        for (key, session) in drained {
            if let Err(e) = session.shutdown().await {
                tracing::debug!(session = %key, "shutdown failed: {e}");
            }
            session.exit().await;
        }
    }
}
