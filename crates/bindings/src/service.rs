//! Channel-agnostic session binding service.
//!
//! Channel integrations register one [`SessionBindingAdapter`] per
//! `(channel, account)`.  Targeted operations (`bind`, `resolve`) route to
//! the owning adapter; session-wide operations (`list_by_session`, `touch`,
//! `unbind`) fan out across every adapter because a session may be bound
//! from several channels at once.  Fan-out is best effort: one failing
//! adapter is logged and skipped, never propagated.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use tether_domain::binding::{
    adapter_key, BindingCapabilities, BindingPlacement, ConversationRef, SessionBinding,
};
use tether_domain::error::BindingError;
use tether_domain::trace::TraceEvent;

use crate::adapter::{BindInput, BindRequest, SessionBindingAdapter, UnbindInput};

type AdapterEntry = (String, Arc<dyn SessionBindingAdapter>);

/// Registry of binding adapters plus the operations routed through them.
pub struct SessionBindingService {
    /// Registration order is the fan-out order.
    adapters: RwLock<Vec<AdapterEntry>>,
}

impl Default for SessionBindingService {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBindingService {
    pub fn new() -> Self {
        Self {
            adapters: RwLock::new(Vec::new()),
        }
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register an adapter under its normalized `channel:account` key,
    /// replacing any previous one.  Returns `true` when it replaced one.
    pub fn register_adapter(&self, adapter: Arc<dyn SessionBindingAdapter>) -> bool {
        let key = adapter_key(adapter.channel(), adapter.account_id());
        let mut adapters = self.adapters.write();
        let replaced = match adapters.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => {
                slot.1 = adapter.clone();
                true
            }
            None => {
                adapters.push((key, adapter.clone()));
                false
            }
        };
        drop(adapters);

        TraceEvent::AdapterRegistered {
            channel: adapter.channel().to_owned(),
            account_id: adapter.account_id().to_owned(),
            replaced,
        }
        .emit();
        replaced
    }

    pub fn unregister_adapter(
        &self,
        channel: &str,
        account_id: &str,
    ) -> Option<Arc<dyn SessionBindingAdapter>> {
        let key = adapter_key(channel, account_id);
        let mut adapters = self.adapters.write();
        let idx = adapters.iter().position(|(k, _)| *k == key)?;
        let (_, removed) = adapters.remove(idx);
        drop(adapters);

        TraceEvent::AdapterUnregistered {
            channel: channel.to_owned(),
            account_id: account_id.to_owned(),
        }
        .emit();
        Some(removed)
    }

    /// Registered `channel:account` keys in fan-out order.
    pub fn adapter_keys(&self) -> Vec<String> {
        self.adapters.read().iter().map(|(k, _)| k.clone()).collect()
    }

    fn adapter_for(&self, channel: &str, account_id: &str) -> Option<Arc<dyn SessionBindingAdapter>> {
        let key = adapter_key(channel, account_id);
        self.adapters
            .read()
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, a)| a.clone())
    }

    fn snapshot(&self) -> Vec<AdapterEntry> {
        self.adapters.read().clone()
    }

    // ── Targeted operations ─────────────────────────────────────────

    /// Bind a conversation to a session.
    ///
    /// Fails with a structured [`BindingError`]; nothing is changed on any
    /// failure path.
    pub async fn bind(&self, input: BindInput) -> Result<SessionBinding, BindingError> {
        let conversation = input.conversation.normalized();
        let channel = conversation.channel.clone();
        let account_id = conversation.account_id.clone();

        let adapter = self.adapter_for(&channel, &account_id).ok_or_else(|| {
            BindingError::AdapterUnavailable {
                channel: channel.clone(),
                account_id: account_id.clone(),
            }
        })?;

        let caps = adapter.capabilities();
        if !caps.bind_supported {
            return Err(BindingError::CapabilityUnsupported {
                channel,
                account_id,
                placement: None,
            });
        }

        let placement = BindingPlacement::resolve(input.placement, &conversation.conversation_id);
        if !caps.supports_placement(placement) {
            return Err(BindingError::CapabilityUnsupported {
                channel,
                account_id,
                placement: Some(placement),
            });
        }

        let request = BindRequest {
            target_session_key: input.target_session_key,
            target_kind: input.target_kind,
            conversation,
            placement,
            metadata: input.metadata,
        };

        match adapter.bind(request).await {
            Ok(Some(binding)) => {
                tracing::debug!(
                    binding_id = %binding.binding_id,
                    %channel,
                    %account_id,
                    %placement,
                    "conversation bound"
                );
                Ok(binding)
            }
            Ok(None) => Err(BindingError::CreateFailed {
                channel,
                account_id,
                reason: None,
            }),
            Err(e) => Err(BindingError::CreateFailed {
                channel,
                account_id,
                reason: Some(e.to_string()),
            }),
        }
    }

    pub fn get_capabilities(&self, channel: &str, account_id: &str) -> BindingCapabilities {
        match self.adapter_for(channel, account_id) {
            Some(adapter) => {
                let caps = adapter.capabilities();
                BindingCapabilities {
                    adapter_available: true,
                    bind_supported: caps.bind_supported,
                    unbind_supported: caps.unbind_supported,
                    placements: if caps.placements.is_empty() {
                        BindingPlacement::ALL.to_vec()
                    } else {
                        caps.placements
                    },
                }
            }
            None => BindingCapabilities::default(),
        }
    }

    /// The single binding for a conversation, if any.
    pub fn resolve_by_conversation(&self, conversation: &ConversationRef) -> Option<SessionBinding> {
        let conversation = conversation.normalized();
        if conversation.channel.is_empty() || conversation.conversation_id.is_empty() {
            return None;
        }
        self.adapter_for(&conversation.channel, &conversation.account_id)?
            .resolve_by_conversation(&conversation)
    }

    // ── Fan-out operations ──────────────────────────────────────────

    /// Every binding targeting `target_session_key`, across all adapters.
    pub fn list_by_session(&self, target_session_key: &str) -> Vec<SessionBinding> {
        let key = target_session_key.trim();
        if key.is_empty() {
            return Vec::new();
        }
        let mut out = DedupBindings::default();
        for (adapter_key, adapter) in self.snapshot() {
            match adapter.list_by_session(key) {
                Ok(bindings) => out.extend(bindings),
                Err(e) => tracing::warn!(
                    adapter = %adapter_key,
                    session_key = %key,
                    error = %e,
                    "listing bindings failed; skipping adapter"
                ),
            }
        }
        out.into_vec()
    }

    /// Record activity on a binding.  Every adapter sees the call and
    /// ignores ids it does not own.
    pub fn touch(&self, binding_id: &str, at: Option<DateTime<Utc>>) {
        let at = at.unwrap_or_else(Utc::now);
        for (_, adapter) in self.snapshot() {
            adapter.touch(binding_id, at);
        }
    }

    /// Remove bindings across every adapter that supports unbinding.
    /// Adapters run concurrently; failures are logged and skipped.
    pub async fn unbind(&self, input: UnbindInput) -> Vec<SessionBinding> {
        let targets: Vec<AdapterEntry> = self
            .snapshot()
            .into_iter()
            .filter(|(_, a)| a.capabilities().unbind_supported)
            .collect();

        let input = &input;
        let results = futures_util::future::join_all(targets.iter().map(|(key, adapter)| async move {
            (key, adapter.unbind(input).await)
        }))
        .await;

        let mut out = DedupBindings::default();
        for (adapter_key, result) in results {
            match result {
                Ok(removed) => out.extend(removed),
                Err(e) => tracing::warn!(
                    adapter = %adapter_key,
                    binding_id = ?input.binding_id,
                    session_key = ?input.target_session_key,
                    error = %e,
                    "unbind failed; skipping adapter"
                ),
            }
        }
        out.into_vec()
    }

    /// Drop every adapter.
    #[cfg(test)]
    pub(crate) fn reset(&self) {
        self.adapters.write().clear();
    }
}

/// Ordered collection keyed by `binding_id`; a later binding with the same
/// id replaces the earlier one in place.
#[derive(Default)]
struct DedupBindings {
    items: Vec<SessionBinding>,
    index: HashMap<String, usize>,
}

impl DedupBindings {
    fn extend(&mut self, bindings: Vec<SessionBinding>) {
        for binding in bindings {
            match self.index.get(&binding.binding_id) {
                Some(&i) => self.items[i] = binding,
                None => {
                    self.index.insert(binding.binding_id.clone(), self.items.len());
                    self.items.push(binding);
                }
            }
        }
    }

    fn into_vec(self) -> Vec<SessionBinding> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_domain::binding::{AdapterCapabilities, BindingStatus, BindingTargetKind};
    use tether_domain::error::Result;

    struct Lookup {
        account: &'static str,
    }

    #[async_trait::async_trait]
    impl SessionBindingAdapter for Lookup {
        fn channel(&self) -> &str {
            "Discord"
        }
        fn account_id(&self) -> &str {
            self.account
        }
        fn list_by_session(&self, _key: &str) -> Result<Vec<SessionBinding>> {
            Ok(Vec::new())
        }
        fn resolve_by_conversation(&self, conversation: &ConversationRef) -> Option<SessionBinding> {
            Some(SessionBinding {
                binding_id: format!("{}:{}", self.account, conversation.conversation_id),
                target_session_key: "agent:main:main".into(),
                target_kind: BindingTargetKind::Session,
                conversation: conversation.clone(),
                status: BindingStatus::Active,
                bound_at: Utc::now(),
                expires_at: None,
                metadata: Default::default(),
            })
        }
    }

    #[test]
    fn register_replaces_by_normalized_key() {
        let svc = SessionBindingService::new();
        assert!(!svc.register_adapter(Arc::new(Lookup { account: "Main" })));
        assert!(svc.register_adapter(Arc::new(Lookup { account: "main " })));
        assert_eq!(svc.adapter_keys(), vec!["discord:main".to_string()]);

        svc.reset();
        assert!(svc.adapter_keys().is_empty());
    }

    #[test]
    fn capabilities_without_adapter_are_empty() {
        let svc = SessionBindingService::new();
        assert_eq!(svc.get_capabilities("discord", "main"), BindingCapabilities::default());

        svc.register_adapter(Arc::new(Lookup { account: "main" }));
        let caps = svc.get_capabilities("DISCORD", "Main");
        assert!(caps.adapter_available);
        assert!(!caps.bind_supported);
        assert_eq!(caps.placements, AdapterCapabilities::default().placements);
    }

    #[test]
    fn resolve_requires_channel_and_conversation() {
        let svc = SessionBindingService::new();
        svc.register_adapter(Arc::new(Lookup { account: "main" }));
        assert!(svc
            .resolve_by_conversation(&ConversationRef::new("discord", "main", "  "))
            .is_none());
        assert!(svc
            .resolve_by_conversation(&ConversationRef::new("", "main", "t1"))
            .is_none());
        assert!(svc
            .resolve_by_conversation(&ConversationRef::new("discord", "other", "t1"))
            .is_none());
        let binding = svc
            .resolve_by_conversation(&ConversationRef::new(" Discord", "MAIN", "t1"))
            .unwrap();
        assert_eq!(binding.binding_id, "main:t1");
        assert_eq!(binding.conversation.channel, "discord");
    }

    #[tokio::test]
    async fn bind_on_lookup_only_adapter_is_unsupported() {
        let svc = SessionBindingService::new();
        svc.register_adapter(Arc::new(Lookup { account: "main" }));
        let err = svc
            .bind(BindInput {
                target_session_key: "agent:main:main".into(),
                target_kind: BindingTargetKind::Session,
                conversation: ConversationRef::new("discord", "main", "t1"),
                placement: None,
                metadata: Default::default(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BINDING_CAPABILITY_UNSUPPORTED");
    }
}
