//! Agent-execution runtime backends.
//!
//! A backend is a named [`AgentRuntime`] plus an optional health probe.
//! Plugins register backends at start and remove them at stop; the session
//! dispatcher asks the [`BackendRegistry`] for one on every dispatch.

pub mod registry;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use tether_domain::error::Result;
use tether_sessions::{IdentitySource, SessionIdentity};

pub use registry::{BackendEntry, BackendRegistry};

/// Synchronous health check.  A panicking probe counts as unhealthy.
pub type HealthProbe = Arc<dyn Fn() -> bool + Send + Sync>;

/// Session ids a runtime reports.  Any of them may be absent while the
/// runtime is still spinning the session up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSessionIds {
    pub record_id: Option<String>,
    pub backend_session_id: Option<String>,
    pub agent_session_id: Option<String>,
}

impl RuntimeSessionIds {
    /// An identity fragment attributed to `source`.
    pub fn into_fragment(self, source: IdentitySource, now: DateTime<Utc>) -> SessionIdentity {
        SessionIdentity {
            record_id: self.record_id,
            backend_session_id: self.backend_session_id,
            agent_session_id: self.agent_session_id,
            ..SessionIdentity::pending(source, now)
        }
        .normalized()
    }
}

/// An execution runtime able to host agent sessions.
#[async_trait::async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Spawn the session, or attach to it if it already exists.
    async fn ensure_session(&self, session_key: &str, agent_id: &str) -> Result<RuntimeSessionIds>;

    /// Current ids for the session; `None` when the runtime does not know it.
    async fn session_status(&self, session_key: &str) -> Result<Option<RuntimeSessionIds>>;
}

/// Registration request.  The registry rejects entries without an id or a
/// runtime.
#[derive(Clone)]
pub struct RuntimeBackend {
    pub id: String,
    pub runtime: Option<Arc<dyn AgentRuntime>>,
    pub healthy: Option<HealthProbe>,
}

impl RuntimeBackend {
    pub fn new(id: impl Into<String>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            id: id.into(),
            runtime: Some(runtime),
            healthy: None,
        }
    }

    pub fn with_health_probe(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.healthy = Some(Arc::new(probe));
        self
    }
}

impl fmt::Debug for RuntimeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBackend")
            .field("id", &self.id)
            .field("runtime", &self.runtime.is_some())
            .field("healthy", &self.healthy.is_some())
            .finish()
    }
}
