//! In-memory registry of runtime backends.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use tether_domain::error::{BackendError, Error, Result};
use tether_domain::trace::TraceEvent;

use super::{AgentRuntime, HealthProbe, RuntimeBackend};

/// A registered backend.
#[derive(Clone)]
pub struct BackendEntry {
    /// Normalized (trimmed, lower-case).
    pub id: String,
    pub runtime: Arc<dyn AgentRuntime>,
    healthy: Option<HealthProbe>,
}

impl BackendEntry {
    /// Run the health probe.  No probe means healthy; a panicking probe
    /// means unhealthy.
    pub fn is_healthy(&self) -> bool {
        let Some(probe) = &self.healthy else {
            return true;
        };
        match catch_unwind(AssertUnwindSafe(|| probe())) {
            Ok(healthy) => healthy,
            Err(_) => {
                tracing::warn!(backend_id = %self.id, "backend health probe panicked; treating as unhealthy");
                false
            }
        }
    }
}

impl fmt::Debug for BackendEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendEntry")
            .field("id", &self.id)
            .field("has_probe", &self.healthy.is_some())
            .finish()
    }
}

pub fn normalize_backend_id(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Thread-safe registry of runtime backends, in registration order.
pub struct BackendRegistry {
    backends: RwLock<Vec<BackendEntry>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            backends: RwLock::new(Vec::new()),
        }
    }

    /// Register a backend.  Re-registering an id replaces the entry in
    /// place.  Returns `true` when an entry was replaced.
    pub fn register(&self, backend: RuntimeBackend) -> Result<bool> {
        let id = normalize_backend_id(&backend.id);
        if id.is_empty() {
            return Err(Error::Config("runtime backend id must not be empty".into()));
        }
        let Some(runtime) = backend.runtime else {
            return Err(Error::Config(format!(
                "runtime backend \"{id}\" has no runtime handle"
            )));
        };
        let entry = BackendEntry {
            id: id.clone(),
            runtime,
            healthy: backend.healthy,
        };

        let replaced = {
            let mut backends = self.backends.write();
            match backends.iter_mut().find(|b| b.id == id) {
                Some(slot) => {
                    *slot = entry;
                    true
                }
                None => {
                    backends.push(entry);
                    false
                }
            }
        };
        TraceEvent::BackendRegistered {
            backend_id: id,
            replaced,
        }
        .emit();
        Ok(replaced)
    }

    /// Remove a backend.  Unknown ids are ignored.
    pub fn unregister(&self, id: &str) -> bool {
        let id = normalize_backend_id(id);
        let removed = {
            let mut backends = self.backends.write();
            let before = backends.len();
            backends.retain(|b| b.id != id);
            backends.len() != before
        };
        if removed {
            TraceEvent::BackendUnregistered { backend_id: id }.emit();
        }
        removed
    }

    /// With an id, that backend or `None`.  Without one, the first healthy
    /// backend, falling back to the first registered one so callers can
    /// tell "unhealthy" from "nothing configured".
    pub fn get(&self, id: Option<&str>) -> Option<BackendEntry> {
        let backends = self.backends.read().clone();
        match id.map(normalize_backend_id).filter(|id| !id.is_empty()) {
            Some(id) => backends.into_iter().find(|b| b.id == id),
            None => backends
                .iter()
                .find(|b| b.is_healthy())
                .or_else(|| backends.first())
                .cloned(),
        }
    }

    /// Like [`get`](Self::get), but the backend must exist and be healthy.
    pub fn require(&self, id: Option<&str>) -> std::result::Result<BackendEntry, BackendError> {
        let requested = id.map(normalize_backend_id).filter(|id| !id.is_empty());
        let Some(entry) = self.get(requested.as_deref()) else {
            return Err(match (requested, self.get(None)) {
                (Some(requested), Some(other)) => BackendError::NotRegistered {
                    requested,
                    resolved: other.id,
                },
                (requested, _) => BackendError::Missing { requested },
            });
        };
        if !entry.is_healthy() {
            return Err(BackendError::Unavailable { id: entry.id });
        }
        Ok(entry)
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.backends.read().iter().map(|b| b.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.backends.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.read().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.backends.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::RuntimeSessionIds;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Idle;

    #[async_trait::async_trait]
    impl AgentRuntime for Idle {
        async fn ensure_session(&self, _key: &str, _agent: &str) -> Result<RuntimeSessionIds> {
            Ok(RuntimeSessionIds::default())
        }
        async fn session_status(&self, _key: &str) -> Result<Option<RuntimeSessionIds>> {
            Ok(None)
        }
    }

    fn backend(id: &str) -> RuntimeBackend {
        RuntimeBackend::new(id, Arc::new(Idle))
    }

    #[test]
    fn register_normalizes_and_replaces() {
        let reg = BackendRegistry::new();
        assert!(!reg.register(backend(" ACPX ")).unwrap());
        assert!(reg.register(backend("acpx")).unwrap());
        assert_eq!(reg.ids(), vec!["acpx".to_string()]);
        assert!(reg.get(Some("AcpX")).is_some());
    }

    #[test]
    fn register_rejects_blank_id_and_missing_runtime() {
        let reg = BackendRegistry::new();
        assert!(matches!(reg.register(backend("  ")), Err(Error::Config(_))));
        let no_runtime = RuntimeBackend {
            id: "acpx".into(),
            runtime: None,
            healthy: None,
        };
        assert!(matches!(reg.register(no_runtime), Err(Error::Config(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn get_prefers_healthy_then_first_registered() {
        let reg = BackendRegistry::new();
        let second_up = Arc::new(AtomicBool::new(true));
        let flag = second_up.clone();
        reg.register(backend("first").with_health_probe(|| false)).unwrap();
        reg.register(backend("second").with_health_probe(move || flag.load(Ordering::SeqCst)))
            .unwrap();

        assert_eq!(reg.get(None).unwrap().id, "second");
        second_up.store(false, Ordering::SeqCst);
        assert_eq!(reg.get(None).unwrap().id, "first");

        reg.reset();
        assert!(reg.get(None).is_none());
    }

    #[test]
    fn panicking_probe_is_unhealthy() {
        let reg = BackendRegistry::new();
        reg.register(backend("boom").with_health_probe(|| panic!("probe exploded")))
            .unwrap();
        reg.register(backend("steady")).unwrap();
        assert_eq!(reg.get(None).unwrap().id, "steady");
        assert_eq!(
            reg.require(Some("boom")).unwrap_err(),
            BackendError::Unavailable { id: "boom".into() }
        );
    }

    #[test]
    fn require_distinguishes_failures() {
        let reg = BackendRegistry::new();
        let err = reg.require(None).unwrap_err();
        assert_eq!(err, BackendError::Missing { requested: None });
        assert_eq!(err.code(), "ACP_BACKEND_MISSING");

        reg.register(backend("down").with_health_probe(|| false)).unwrap();
        let err = reg.require(None).unwrap_err();
        assert_eq!(err.code(), "ACP_BACKEND_UNAVAILABLE");

        let err = reg.require(Some("elsewhere")).unwrap_err();
        assert_eq!(
            err,
            BackendError::NotRegistered {
                requested: "elsewhere".into(),
                resolved: "down".into(),
            }
        );
        assert_eq!(err.code(), "ACP_BACKEND_MISSING");
    }

    #[test]
    fn unregister_is_idempotent() {
        let reg = BackendRegistry::new();
        reg.register(backend("acpx")).unwrap();
        assert!(reg.unregister("ACPX"));
        assert!(!reg.unregister("acpx"));
        assert!(reg.is_empty());
    }
}
