use chrono::{DateTime, Utc};

use tether_domain::binding::{
    AdapterCapabilities, BindingMetadata, BindingPlacement, BindingTargetKind, ConversationRef,
    SessionBinding,
};
use tether_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A caller's request to bind a conversation to a session.
#[derive(Debug, Clone)]
pub struct BindInput {
    pub target_session_key: String,
    pub target_kind: BindingTargetKind,
    pub conversation: ConversationRef,
    /// `None` lets the service infer it from the conversation id.
    pub placement: Option<BindingPlacement>,
    /// Adapter-specific hints (label, agent id, intro text, TTL overrides…).
    pub metadata: BindingMetadata,
}

/// What an adapter receives once the service validated a [`BindInput`].
#[derive(Debug, Clone)]
pub struct BindRequest {
    pub target_session_key: String,
    pub target_kind: BindingTargetKind,
    /// Normalized.
    pub conversation: ConversationRef,
    /// Resolved and supported by the adapter.
    pub placement: BindingPlacement,
    pub metadata: BindingMetadata,
}

/// Remove bindings either by id or by target session.
#[derive(Debug, Clone, Default)]
pub struct UnbindInput {
    pub binding_id: Option<String>,
    pub target_session_key: Option<String>,
    pub reason: Option<String>,
}

impl UnbindInput {
    pub fn by_binding_id(binding_id: impl Into<String>) -> Self {
        Self {
            binding_id: Some(binding_id.into()),
            ..Default::default()
        }
    }

    pub fn by_session_key(session_key: impl Into<String>) -> Self {
        Self {
            target_session_key: Some(session_key.into()),
            ..Default::default()
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Binding contract implemented once per `(channel, account)` by a channel
/// integration.
///
/// Optional operations are gated by [`SessionBindingAdapter::capabilities`]:
/// the service never calls `bind` unless `bind_supported` is set, nor
/// `unbind` unless `unbind_supported` is set.  Lookups are required.
#[async_trait::async_trait]
pub trait SessionBindingAdapter: Send + Sync {
    fn channel(&self) -> &str;

    fn account_id(&self) -> &str;

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities::default()
    }

    /// Create a binding.  `Ok(None)` means the adapter tried and produced
    /// nothing.
    async fn bind(&self, _request: BindRequest) -> Result<Option<SessionBinding>> {
        Ok(None)
    }

    fn list_by_session(&self, target_session_key: &str) -> Result<Vec<SessionBinding>>;

    fn resolve_by_conversation(&self, conversation: &ConversationRef) -> Option<SessionBinding>;

    /// Record activity.  Must be a no-op for ids the adapter does not own.
    fn touch(&self, _binding_id: &str, _at: DateTime<Utc>) {}

    /// Remove matching bindings owned by this adapter and return them.
    async fn unbind(&self, _input: &UnbindInput) -> Result<Vec<SessionBinding>> {
        Ok(Vec::new())
    }
}
