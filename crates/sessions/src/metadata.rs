//! Read-only view of session metadata used by binding reconciliation.

use crate::identity::SessionIdentity;

/// Outcome of looking a session key up.
///
/// `ReadFailed` is deliberately distinct from `Missing`: a store that could
/// not be read says nothing about whether the session exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionLookup {
    Found { identity: Option<SessionIdentity> },
    Missing,
    ReadFailed { error: String },
}

impl SessionLookup {
    pub fn is_read_failure(&self) -> bool {
        matches!(self, Self::ReadFailed { .. })
    }

    /// The identity metadata, when the read succeeded and carried one.
    pub fn identity(&self) -> Option<&SessionIdentity> {
        match self {
            Self::Found { identity } => identity.as_ref(),
            _ => None,
        }
    }
}

/// Source of truth for which runtime sessions still exist.
#[async_trait::async_trait]
pub trait SessionMetadataStore: Send + Sync {
    async fn lookup(&self, session_key: &str) -> SessionLookup;
}
