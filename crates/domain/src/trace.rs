use serde::Serialize;

/// Structured trace events emitted across all Tether crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    AdapterRegistered {
        channel: String,
        account_id: String,
        replaced: bool,
    },
    AdapterUnregistered {
        channel: String,
        account_id: String,
    },
    BindingCreated {
        binding_id: String,
        target_session_key: String,
        target_kind: String,
        placement: String,
    },
    BindingRemoved {
        binding_id: String,
        target_session_key: String,
        reason: String,
    },
    BindingsSwept {
        account_id: String,
        idle_expired: usize,
        max_age_expired: usize,
    },
    BindingsReconciled {
        account_id: String,
        checked: usize,
        removed: usize,
    },
    IdentityMerged {
        session_key: String,
        source: String,
        resolved: bool,
        changed: bool,
    },
    BackendRegistered {
        backend_id: String,
        replaced: bool,
    },
    BackendUnregistered {
        backend_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tether_event");
    }
}
