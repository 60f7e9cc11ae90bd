//! Gateway-owned session store.
//!
//! Persists session metadata in `sessions.json` under the configured state
//! path.  Each session key maps to a [`SessionEntry`] tracking the session
//! id, the owning agent and backend, and the reconciled runtime identity.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tether_domain::error::{Error, Result};
use tether_domain::trace::TraceEvent;

use crate::identity::{identity_equals, merge_session_identity, SessionIdentity};
use crate::metadata::{SessionLookup, SessionMetadataStore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session entry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single session tracked by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_key: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Runtime backend serving this session.
    #[serde(default)]
    pub backend: Option<String>,
    /// Runtime identity, present once the session was spawned on a backend.
    #[serde(default)]
    pub identity: Option<SessionIdentity>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session store backed by a JSON file.
///
/// If the file exists but cannot be read or parsed, the store opens empty in
/// a degraded mode: lookups report [`SessionLookup::ReadFailed`] and
/// [`SessionStore::flush`] refuses to overwrite the unreadable file.
pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    load_error: Option<String>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions/sessions.json`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let dir = state_path.join("sessions");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        Ok(Self::open(dir.join("sessions.json")))
    }

    /// Open the store at an explicit file path.
    pub fn open(sessions_path: PathBuf) -> Self {
        let (sessions, load_error) = match read_sessions(&sessions_path) {
            Ok(sessions) => (sessions, None),
            Err(e) => {
                tracing::warn!(
                    path = %sessions_path.display(),
                    error = %e,
                    "session store unreadable; lookups will report read failures"
                );
                (HashMap::new(), Some(e.to_string()))
            }
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Self {
            sessions_path,
            sessions: RwLock::new(sessions),
            load_error,
        }
    }

    /// Whether the backing file failed to load.
    pub fn is_degraded(&self) -> bool {
        self.load_error.is_some()
    }

    /// Look up a session by its key.
    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Resolve or create a session for the given key.  Returns `(entry, is_new)`.
    pub fn resolve_or_create(
        &self,
        session_key: &str,
        agent_id: Option<&str>,
    ) -> (SessionEntry, bool) {
        {
            let sessions = self.sessions.read();
            if let Some(entry) = sessions.get(session_key) {
                return (entry.clone(), false);
            }
        }

        let mut sessions = self.sessions.write();
        // Another caller may have created it between the two locks.
        if let Some(entry) = sessions.get(session_key) {
            return (entry.clone(), false);
        }

        let now = Utc::now();
        let entry = SessionEntry {
            session_key: session_key.to_owned(),
            session_id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            agent_id: agent_id.map(str::to_owned),
            backend: None,
            identity: None,
        };
        sessions.insert(session_key.to_owned(), entry.clone());
        tracing::debug!(session_key, session_id = %entry.session_id, "session created");
        (entry, true)
    }

    /// Merge an identity fragment into the session's identity.
    ///
    /// Returns `Some(merged)` when the stored identity changed, `None` when
    /// the merge was a no-op or the session does not exist.  Callers only
    /// need to flush on `Some`.
    pub fn apply_identity(
        &self,
        session_key: &str,
        fragment: &SessionIdentity,
        now: DateTime<Utc>,
    ) -> Option<SessionIdentity> {
        let mut sessions = self.sessions.write();
        let entry = sessions.get_mut(session_key)?;

        let merged = merge_session_identity(entry.identity.as_ref(), Some(fragment), now)?;
        let changed = !identity_equals(entry.identity.as_ref(), Some(&merged));

        TraceEvent::IdentityMerged {
            session_key: session_key.to_owned(),
            source: fragment.source.as_str().to_owned(),
            resolved: merged.is_resolved(),
            changed,
        }
        .emit();

        if !changed {
            return None;
        }
        entry.identity = Some(merged.clone());
        entry.updated_at = now;
        Some(merged)
    }

    /// Record which backend serves the session.
    pub fn set_backend(&self, session_key: &str, backend: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.backend = Some(backend.to_owned());
            entry.updated_at = Utc::now();
        }
    }

    pub fn remove(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.write().remove(session_key)
    }

    /// List all session entries.
    pub fn list(&self) -> Vec<SessionEntry> {
        self.sessions.read().values().cloned().collect()
    }

    /// Persist the current session state to disk (write-then-rename).
    pub fn flush(&self) -> Result<()> {
        if let Some(e) = &self.load_error {
            return Err(Error::Other(format!(
                "refusing to overwrite unreadable session store {}: {e}",
                self.sessions_path.display()
            )));
        }
        let json = {
            let sessions = self.sessions.read();
            serde_json::to_string_pretty(&*sessions)?
        };
        if let Some(parent) = self.sessions_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.sessions_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.sessions_path)?;
        Ok(())
    }
}

fn read_sessions(path: &Path) -> Result<HashMap<String, SessionEntry>> {
    match std::fs::read_to_string(path) {
        Ok(raw) if raw.trim().is_empty() => Ok(HashMap::new()),
        Ok(raw) => Ok(serde_json::from_str(&raw)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(Error::Io(e)),
    }
}

#[async_trait::async_trait]
impl SessionMetadataStore for SessionStore {
    async fn lookup(&self, session_key: &str) -> SessionLookup {
        if let Some(error) = &self.load_error {
            return SessionLookup::ReadFailed {
                error: error.clone(),
            };
        }
        match self.get(session_key) {
            Some(entry) => SessionLookup::Found {
                identity: entry.identity,
            },
            None => SessionLookup::Missing,
        }
    }
}
