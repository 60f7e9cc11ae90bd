//! Bridges a [`ThreadBindingManager`] into the generic binding service.

use chrono::{DateTime, Utc};

use tether_bindings::{BindRequest, SessionBindingAdapter, UnbindInput};
use tether_domain::binding::{
    AdapterCapabilities, BindingMetadata, BindingPlacement, BindingStatus, ConversationRef,
    SessionBinding,
};
use tether_domain::error::Result;

use crate::manager::{BindTargetRequest, ThreadBindingManager, UnbindOptions};
use crate::messages::UnbindReason;
use crate::record::ThreadBindingRecord;

pub struct ThreadBindingAdapter {
    manager: ThreadBindingManager,
}

impl ThreadBindingAdapter {
    pub fn new(manager: ThreadBindingManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &ThreadBindingManager {
        &self.manager
    }

    fn view(&self, record: &ThreadBindingRecord, status: BindingStatus) -> SessionBinding {
        record.to_session_binding(self.manager.channel(), status)
    }
}

fn meta_str(metadata: &BindingMetadata, key: &str) -> Option<String> {
    metadata
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn meta_u64(metadata: &BindingMetadata, key: &str) -> Option<u64> {
    metadata.get(key).and_then(|v| v.as_u64())
}

#[async_trait::async_trait]
impl SessionBindingAdapter for ThreadBindingAdapter {
    fn channel(&self) -> &str {
        self.manager.channel()
    }

    fn account_id(&self) -> &str {
        self.manager.account_id()
    }

    fn capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            bind_supported: true,
            unbind_supported: true,
            placements: BindingPlacement::ALL.to_vec(),
        }
    }

    async fn bind(&self, request: BindRequest) -> Result<Option<SessionBinding>> {
        let conversation = &request.conversation;
        let parent = conversation.parent_conversation_id.clone();

        let mut target = BindTargetRequest::new(
            request.placement,
            request.target_kind.into(),
            request.target_session_key.clone(),
        );
        match request.placement {
            BindingPlacement::Current => {
                target.thread_id = Some(conversation.conversation_id.clone());
                target.container_id = parent;
            }
            BindingPlacement::Child => {
                target.container_id = match parent {
                    Some(parent) => Some(parent),
                    None if conversation.conversation_id.is_empty() => None,
                    None => Some(
                        self.manager
                            .resolve_container(&conversation.conversation_id)
                            .await?
                            .unwrap_or_else(|| conversation.conversation_id.clone()),
                    ),
                };
            }
        }

        let metadata = &request.metadata;
        target.label = meta_str(metadata, "label");
        target.agent_id = meta_str(metadata, "agentId");
        target.bound_by = meta_str(metadata, "boundBy");
        target.intro_text = meta_str(metadata, "introText");
        target.thread_name = meta_str(metadata, "threadName");
        target.idle_timeout_ms = meta_u64(metadata, "idleTimeoutMs");
        target.max_age_ms = meta_u64(metadata, "maxAgeMs");

        Ok(self
            .manager
            .bind_target(target)
            .await?
            .map(|record| self.view(&record, BindingStatus::Active)))
    }

    fn list_by_session(&self, target_session_key: &str) -> Result<Vec<SessionBinding>> {
        Ok(self
            .manager
            .list_by_session_key(target_session_key)
            .iter()
            .map(|r| self.view(r, BindingStatus::Active))
            .collect())
    }

    fn resolve_by_conversation(&self, conversation: &ConversationRef) -> Option<SessionBinding> {
        self.manager
            .get_by_thread(&conversation.conversation_id)
            .map(|r| self.view(&r, BindingStatus::Active))
    }

    fn touch(&self, binding_id: &str, at: DateTime<Utc>) {
        if let Some(thread) = self.manager.thread_for_binding_id(binding_id) {
            self.manager.touch(thread, at);
        }
    }

    async fn unbind(&self, input: &UnbindInput) -> Result<Vec<SessionBinding>> {
        let reason = input
            .reason
            .as_deref()
            .map(UnbindReason::parse)
            .unwrap_or(UnbindReason::Manual);
        let options = UnbindOptions::new(reason).with_farewell(None);

        let mut removed = Vec::new();
        if let Some(thread) = input
            .binding_id
            .as_deref()
            .and_then(|id| self.manager.thread_for_binding_id(id))
        {
            removed.extend(self.manager.unbind_thread(thread, options.clone()).await);
        }
        if let Some(key) = input.target_session_key.as_deref() {
            removed.extend(self.manager.unbind_by_session_key(key, options).await);
        }
        Ok(removed
            .iter()
            .map(|r| self.view(r, BindingStatus::Ended))
            .collect())
    }
}
