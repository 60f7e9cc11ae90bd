//! Thread binding records — the per-account, durable form of a binding.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use tether_domain::binding::{
    normalize_key, BindingMetadata, BindingStatus, BindingTargetKind, ConversationRef,
    SessionBinding,
};

use crate::messages::UnbindReason;

/// What a thread is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadBindingTargetKind {
    /// A subagent spawned and owned by the gateway.
    Subagent,
    /// An externally managed ACP runtime session.
    Acp,
}

impl ThreadBindingTargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subagent => "subagent",
            Self::Acp => "acp",
        }
    }
}

impl From<BindingTargetKind> for ThreadBindingTargetKind {
    fn from(kind: BindingTargetKind) -> Self {
        match kind {
            BindingTargetKind::Subagent => Self::Subagent,
            BindingTargetKind::Session => Self::Acp,
        }
    }
}

impl From<ThreadBindingTargetKind> for BindingTargetKind {
    fn from(kind: ThreadBindingTargetKind) -> Self {
        match kind {
            ThreadBindingTargetKind::Subagent => Self::Subagent,
            ThreadBindingTargetKind::Acp => Self::Session,
        }
    }
}

/// One bound thread.  `idle_timeout_ms`/`max_age_ms` of `0` disable that
/// expiry axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadBindingRecord {
    pub account_id: String,
    /// Parent conversation (e.g. the channel the thread lives in).
    pub container_id: String,
    pub thread_id: String,
    pub target_kind: ThreadBindingTargetKind,
    pub target_session_key: String,
    pub agent_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_by: Option<String>,
    pub bound_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub idle_timeout_ms: u64,
    #[serde(default)]
    pub max_age_ms: u64,
}

/// `<channel>:<account>:<thread>`, stable for a given conversation.
pub fn binding_id_for(channel: &str, account_id: &str, thread_id: &str) -> String {
    format!("{}:{}:{thread_id}", normalize_key(channel), normalize_key(account_id))
}

fn ms(value: u64) -> Duration {
    Duration::milliseconds(i64::try_from(value).unwrap_or(i64::MAX))
}

impl ThreadBindingRecord {
    /// Records do not carry their channel; the owning manager supplies it.
    pub fn binding_id(&self, channel: &str) -> String {
        binding_id_for(channel, &self.account_id, &self.thread_id)
    }

    pub fn idle_deadline(&self) -> Option<DateTime<Utc>> {
        (self.idle_timeout_ms > 0)
            .then(|| self.last_activity_at.checked_add_signed(ms(self.idle_timeout_ms)))
            .flatten()
    }

    pub fn max_age_deadline(&self) -> Option<DateTime<Utc>> {
        (self.max_age_ms > 0)
            .then(|| self.bound_at.checked_add_signed(ms(self.max_age_ms)))
            .flatten()
    }

    /// Earliest enabled deadline.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match (self.idle_deadline(), self.max_age_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Why the record should be dropped at `now`, idle expiry first.
    pub fn expiry_reason(&self, now: DateTime<Utc>) -> Option<UnbindReason> {
        if self.idle_timeout_ms > 0 && now - self.last_activity_at > ms(self.idle_timeout_ms) {
            return Some(UnbindReason::IdleExpired);
        }
        if self.max_age_ms > 0 && now - self.bound_at > ms(self.max_age_ms) {
            return Some(UnbindReason::MaxAgeExpired);
        }
        None
    }

    /// Project into the channel-agnostic view.
    pub fn to_session_binding(&self, channel: &str, status: BindingStatus) -> SessionBinding {
        let mut metadata = BindingMetadata::new();
        metadata.insert("agentId".into(), self.agent_id.clone().into());
        if let Some(label) = &self.label {
            metadata.insert("label".into(), label.clone().into());
        }
        if let Some(bound_by) = &self.bound_by {
            metadata.insert("boundBy".into(), bound_by.clone().into());
        }
        metadata.insert("idleTimeoutMs".into(), self.idle_timeout_ms.into());
        metadata.insert("maxAgeMs".into(), self.max_age_ms.into());
        metadata.insert(
            "lastActivityAt".into(),
            self.last_activity_at.to_rfc3339().into(),
        );

        SessionBinding {
            binding_id: self.binding_id(channel),
            target_session_key: self.target_session_key.clone(),
            target_kind: self.target_kind.into(),
            conversation: ConversationRef::new(channel, &self.account_id, &self.thread_id)
                .with_parent(&self.container_id)
                .normalized(),
            status,
            bound_at: self.bound_at,
            expires_at: self.expires_at(),
            metadata,
        }
    }
}

#[cfg(test)]
pub(crate) fn sample_record(thread_id: &str, session_key: &str) -> ThreadBindingRecord {
    let now = Utc::now();
    ThreadBindingRecord {
        account_id: "default".into(),
        container_id: "chan-1".into(),
        thread_id: thread_id.into(),
        target_kind: ThreadBindingTargetKind::Acp,
        target_session_key: session_key.into(),
        agent_id: "codex".into(),
        label: None,
        bound_by: None,
        bound_at: now,
        last_activity_at: now,
        idle_timeout_ms: 0,
        max_age_ms: 0,
    }
}
