//! Session identity reconciliation.
//!
//! A runtime session is identified by up to three opaque ids that trickle in
//! from independent sources: the spawn-time `ensure` call, later `status`
//! polls and runtime-pushed `event`s.  They can arrive in any order and some
//! of them carry nothing useful.  [`merge_session_identity`] folds a new
//! fragment into the current identity so that resolution is monotonic: once
//! an identity is resolved, an unresolved fragment can never blank it out.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Pending,
    Resolved,
}

/// Provenance of the last accepted identity value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    Ensure,
    Status,
    Event,
}

impl IdentitySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ensure => "ensure",
            Self::Status => "status",
            Self::Event => "event",
        }
    }
}

/// Identity of one runtime session.
///
/// `state` is `Resolved` iff `backend_session_id` or `agent_session_id` is
/// present (after [`SessionIdentity::normalized`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdentity {
    pub state: IdentityState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    pub source: IdentitySource,
    pub last_updated_at: DateTime<Utc>,
}

impl SessionIdentity {
    /// A fragment with no ids yet.
    pub fn pending(source: IdentitySource, now: DateTime<Utc>) -> Self {
        Self {
            state: IdentityState::Pending,
            record_id: None,
            backend_session_id: None,
            agent_session_id: None,
            source,
            last_updated_at: now,
        }
    }

    pub fn with_record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self.normalized()
    }

    pub fn with_backend_session_id(mut self, id: impl Into<String>) -> Self {
        self.backend_session_id = Some(id.into());
        self.normalized()
    }

    pub fn with_agent_session_id(mut self, id: impl Into<String>) -> Self {
        self.agent_session_id = Some(id.into());
        self.normalized()
    }

    pub fn is_resolved(&self) -> bool {
        self.state == IdentityState::Resolved
    }

    /// Trim ids, drop blank ones and re-derive `state` from what is left.
    pub fn normalized(&self) -> Self {
        let backend_session_id = clean(self.backend_session_id.as_deref());
        let agent_session_id = clean(self.agent_session_id.as_deref());
        let state = derive_state(backend_session_id.as_deref(), agent_session_id.as_deref());
        Self {
            state,
            record_id: clean(self.record_id.as_deref()),
            backend_session_id,
            agent_session_id,
            source: self.source,
            last_updated_at: self.last_updated_at,
        }
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

fn derive_state(backend_session_id: Option<&str>, agent_session_id: Option<&str>) -> IdentityState {
    if backend_session_id.is_some() || agent_session_id.is_some() {
        IdentityState::Resolved
    } else {
        IdentityState::Pending
    }
}

/// Merge `incoming` into `current`, stamping the result with `now`.
///
/// Each id field takes the incoming value only when the incoming fragment is
/// allowed to write (`current` unresolved, or `incoming` itself resolved) and
/// actually carries a value; otherwise the current value is kept.  The
/// source follows the same rule.
pub fn merge_session_identity(
    current: Option<&SessionIdentity>,
    incoming: Option<&SessionIdentity>,
    now: DateTime<Utc>,
) -> Option<SessionIdentity> {
    let current = current.map(SessionIdentity::normalized);
    let incoming = incoming.map(SessionIdentity::normalized);

    let (current, incoming) = match (current, incoming) {
        (None, None) => return None,
        (None, Some(only)) | (Some(only), None) => {
            return Some(SessionIdentity {
                last_updated_at: now,
                ..only
            })
        }
        (Some(c), Some(i)) => (c, i),
    };

    let current_resolved = current.is_resolved();
    let allow_incoming = !current_resolved || incoming.is_resolved();
    let pick = |incoming: Option<String>, current: Option<String>| {
        if allow_incoming && incoming.is_some() {
            incoming
        } else {
            current
        }
    };

    let record_id = pick(incoming.record_id, current.record_id);
    let backend_session_id = pick(incoming.backend_session_id, current.backend_session_id);
    let agent_session_id = pick(incoming.agent_session_id, current.agent_session_id);

    let state = if backend_session_id.is_some() || agent_session_id.is_some() || current_resolved {
        IdentityState::Resolved
    } else {
        incoming.state
    };

    Some(SessionIdentity {
        state,
        record_id,
        backend_session_id,
        agent_session_id,
        source: if allow_incoming {
            incoming.source
        } else {
            current.source
        },
        last_updated_at: now,
    })
}

/// Compare state, ids and source; timestamps are ignored.  Callers use this
/// to skip persisting a merge that changed nothing.
pub fn identity_equals(a: Option<&SessionIdentity>, b: Option<&SessionIdentity>) -> bool {
    match (a.map(SessionIdentity::normalized), b.map(SessionIdentity::normalized)) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.state == b.state
                && a.record_id == b.record_id
                && a.backend_session_id == b.backend_session_id
                && a.agent_session_id == b.agent_session_id
                && a.source == b.source
        }
        _ => false,
    }
}
