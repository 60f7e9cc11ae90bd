//! Session dispatch onto runtime backends.
//!
//! Every call resolves a backend through the [`BackendRegistry`], asks the
//! runtime for the session's ids and folds them into the stored identity.
//! The session file is only written when something actually changed.

use std::sync::Arc;

use chrono::Utc;

use tether_domain::error::{Error, Result};
use tether_sessions::{agent_id_from_session_key, IdentitySource, SessionEntry, SessionStore};
use tether_threads::manager::DEFAULT_AGENT_ID;

use crate::backends::{BackendRegistry, RuntimeSessionIds};

pub struct SessionDispatcher {
    backends: Arc<BackendRegistry>,
    sessions: Arc<SessionStore>,
    default_backend: Option<String>,
}

impl SessionDispatcher {
    pub fn new(
        backends: Arc<BackendRegistry>,
        sessions: Arc<SessionStore>,
        default_backend: Option<String>,
    ) -> Self {
        Self {
            backends,
            sessions,
            default_backend,
        }
    }

    /// Spawn (or attach to) the session on a backend and record the
    /// identity it reports.
    pub async fn ensure_session(
        &self,
        session_key: &str,
        agent_id: Option<&str>,
        backend: Option<&str>,
    ) -> Result<SessionEntry> {
        let session_key = session_key.trim();
        if session_key.is_empty() {
            return Err(Error::Other("session key must not be empty".into()));
        }
        let requested = backend.or(self.default_backend.as_deref());
        let entry = self.backends.require(requested)?;

        let agent_id = agent_id
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_owned)
            .or_else(|| agent_id_from_session_key(session_key))
            .unwrap_or_else(|| DEFAULT_AGENT_ID.to_owned());

        let (existing, created) = self.sessions.resolve_or_create(session_key, Some(&agent_id));
        let backend_changed = existing.backend.as_deref() != Some(entry.id.as_str());
        if backend_changed {
            self.sessions.set_backend(session_key, &entry.id);
        }

        let ids = entry.runtime.ensure_session(session_key, &agent_id).await?;
        let identity_changed = self.merge(session_key, ids, IdentitySource::Ensure);

        tracing::debug!(
            session_key,
            backend_id = %entry.id,
            created,
            identity_changed,
            "session ensured"
        );

        if created || backend_changed || identity_changed {
            self.persist().await?;
        }
        self.sessions
            .get(session_key)
            .ok_or_else(|| Error::Other(format!("session {session_key} vanished during dispatch")))
    }

    /// Poll the serving backend for the session's current ids.
    ///
    /// Returns `false` when the session is unknown to the store or to the
    /// runtime, or when nothing changed.
    pub async fn refresh_status(&self, session_key: &str) -> Result<bool> {
        let Some(session) = self.sessions.get(session_key) else {
            return Ok(false);
        };
        let requested = session.backend.as_deref().or(self.default_backend.as_deref());
        let entry = self.backends.require(requested)?;
        let Some(ids) = entry.runtime.session_status(session_key).await? else {
            return Ok(false);
        };
        let changed = self.merge(session_key, ids, IdentitySource::Status);
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    /// Fold ids a runtime pushed on its own into the stored identity.
    pub async fn apply_event(&self, session_key: &str, ids: RuntimeSessionIds) -> Result<bool> {
        let changed = self.merge(session_key, ids, IdentitySource::Event);
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    fn merge(&self, session_key: &str, ids: RuntimeSessionIds, source: IdentitySource) -> bool {
        let now = Utc::now();
        let fragment = ids.into_fragment(source, now);
        self.sessions
            .apply_identity(session_key, &fragment, now)
            .is_some()
    }

    async fn persist(&self) -> Result<()> {
        let sessions = self.sessions.clone();
        tokio::task::spawn_blocking(move || sessions.flush())
            .await
            .map_err(|e| Error::Other(format!("session flush task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{AgentRuntime, RuntimeBackend};
    use parking_lot::Mutex;
    use tether_domain::error::BackendError;

    /// Runtime that hands out scripted ids and records calls.
    #[derive(Default)]
    struct Scripted {
        ensure: Mutex<RuntimeSessionIds>,
        status: Mutex<Option<RuntimeSessionIds>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait::async_trait]
    impl AgentRuntime for Scripted {
        async fn ensure_session(&self, key: &str, agent: &str) -> Result<RuntimeSessionIds> {
            self.calls.lock().push((key.to_owned(), agent.to_owned()));
            Ok(self.ensure.lock().clone())
        }
        async fn session_status(&self, _key: &str) -> Result<Option<RuntimeSessionIds>> {
            Ok(self.status.lock().clone())
        }
    }

    fn setup(dir: &std::path::Path) -> (SessionDispatcher, Arc<Scripted>, Arc<SessionStore>) {
        let runtime = Arc::new(Scripted::default());
        let backends = Arc::new(BackendRegistry::new());
        backends
            .register(RuntimeBackend::new("acpx", runtime.clone()))
            .unwrap();
        let sessions = Arc::new(SessionStore::new(dir).unwrap());
        let dispatcher = SessionDispatcher::new(backends, sessions.clone(), None);
        (dispatcher, runtime, sessions)
    }

    fn ids(backend: Option<&str>, agent: Option<&str>) -> RuntimeSessionIds {
        RuntimeSessionIds {
            record_id: None,
            backend_session_id: backend.map(str::to_owned),
            agent_session_id: agent.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn ensure_records_backend_and_pending_identity() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, runtime, sessions) = setup(dir.path());

        let entry = dispatcher
            .ensure_session("agent:Codex:acp:1", None, None)
            .await
            .unwrap();
        assert_eq!(entry.backend.as_deref(), Some("acpx"));
        assert_eq!(entry.agent_id.as_deref(), Some("codex"));
        assert!(!entry.identity.unwrap().is_resolved());
        assert_eq!(
            runtime.calls.lock()[0],
            ("agent:Codex:acp:1".to_string(), "codex".to_string())
        );
        assert!(sessions.get("agent:Codex:acp:1").is_some());
        assert!(dir.path().join("sessions/sessions.json").exists());
    }

    #[tokio::test]
    async fn late_status_resolves_and_unresolved_event_cannot_regress() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, runtime, sessions) = setup(dir.path());
        dispatcher.ensure_session("agent:main:acp:1", None, None).await.unwrap();

        *runtime.status.lock() = Some(ids(Some("b-1"), None));
        assert!(dispatcher.refresh_status("agent:main:acp:1").await.unwrap());
        let identity = sessions.get("agent:main:acp:1").unwrap().identity.unwrap();
        assert_eq!(identity.backend_session_id.as_deref(), Some("b-1"));
        assert_eq!(identity.source, IdentitySource::Status);

        let changed = dispatcher
            .apply_event("agent:main:acp:1", ids(None, None))
            .await
            .unwrap();
        assert!(!changed);
        let identity = sessions.get("agent:main:acp:1").unwrap().identity.unwrap();
        assert_eq!(identity.backend_session_id.as_deref(), Some("b-1"));
    }

    #[tokio::test]
    async fn refresh_of_unknown_session_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatcher, _runtime, _sessions) = setup(dir.path());
        assert!(!dispatcher.refresh_status("agent:main:acp:404").await.unwrap());
    }

    #[tokio::test]
    async fn missing_backend_surfaces_structured_error() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path()).unwrap());
        let dispatcher = SessionDispatcher::new(Arc::new(BackendRegistry::new()), sessions.clone(), None);

        let err = dispatcher
            .ensure_session("agent:main:acp:1", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::Missing { requested: None })));
        assert!(sessions.get("agent:main:acp:1").is_none());
    }
}
