//! Session identity for the Tether binding core.
//!
//! Reconciles runtime session identities that arrive out of order from
//! independent sources, parses agent-scoped session keys, and keeps the
//! gateway-owned session metadata that binding reconciliation reads.

pub mod identity;
pub mod metadata;
pub mod session_key;
pub mod store;

pub use identity::{
    identity_equals, merge_session_identity, IdentitySource, IdentityState, SessionIdentity,
};
pub use metadata::{SessionLookup, SessionMetadataStore};
pub use session_key::{agent_id_from_session_key, parse_agent_session_key, SessionKeyKind};
pub use store::{SessionEntry, SessionStore};
