//! Channel-agnostic binding model.
//!
//! A *binding* links one external conversation (a thread, a DM, a channel)
//! on some messaging platform to one internal agent session.  These types are
//! what the binding service exchanges with adapters; each channel integration
//! keeps its own richer record and projects it into a [`SessionBinding`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversation reference
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identifies a conversation on a channel account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRef {
    pub channel: String,
    pub account_id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_conversation_id: Option<String>,
}

impl ConversationRef {
    pub fn new(
        channel: impl Into<String>,
        account_id: impl Into<String>,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            account_id: account_id.into(),
            conversation_id: conversation_id.into(),
            parent_conversation_id: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_conversation_id = Some(parent.into());
        self
    }

    /// Trim every field and lower-case channel/account.  A blank parent id is
    /// dropped.
    pub fn normalized(&self) -> Self {
        Self {
            channel: normalize_key(&self.channel),
            account_id: normalize_key(&self.account_id),
            conversation_id: self.conversation_id.trim().to_owned(),
            parent_conversation_id: self
                .parent_conversation_id
                .as_deref()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_owned),
        }
    }

    /// `channel:account` key used to route to the owning adapter.
    pub fn adapter_key(&self) -> String {
        adapter_key(&self.channel, &self.account_id)
    }
}

/// Trim and lower-case a channel or account identifier.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Normalized `channel:account` adapter key.
pub fn adapter_key(channel: &str, account_id: &str) -> String {
    format!("{}:{}", normalize_key(channel), normalize_key(account_id))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a bind lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingPlacement {
    /// Bind the conversation the request already came from.
    Current,
    /// Create a fresh conversation (e.g. a new thread) and bind that.
    Child,
}

impl BindingPlacement {
    pub const ALL: [BindingPlacement; 2] = [BindingPlacement::Current, BindingPlacement::Child];

    /// Explicit placement wins; otherwise a non-empty conversation id means
    /// `current` and an empty one means a new conversation must be created.
    pub fn resolve(requested: Option<BindingPlacement>, conversation_id: &str) -> Self {
        match requested {
            Some(p) => p,
            None if conversation_id.trim().is_empty() => Self::Child,
            None => Self::Current,
        }
    }
}

impl fmt::Display for BindingPlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => write!(f, "current"),
            Self::Child => write!(f, "child"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingTargetKind {
    Subagent,
    Session,
}

/// Binding lifecycle: `active → ending → ended`.  `ending` is transient
/// (farewell in flight); `ended` bindings are no longer in any table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    Active,
    Ending,
    Ended,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session binding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub type BindingMetadata = serde_json::Map<String, serde_json::Value>;

/// The channel-agnostic view of one conversation ↔ session link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBinding {
    /// Adapter-defined, derived deterministically from the conversation.
    pub binding_id: String,
    pub target_session_key: String,
    pub target_kind: BindingTargetKind,
    pub conversation: ConversationRef,
    pub status: BindingStatus,
    pub bound_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: BindingMetadata,
}

/// What an adapter declares it can do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterCapabilities {
    pub bind_supported: bool,
    pub unbind_supported: bool,
    pub placements: Vec<BindingPlacement>,
}

impl Default for AdapterCapabilities {
    /// Lookup-only adapter: no bind/unbind, both placements if it ever gains
    /// bind support.
    fn default() -> Self {
        Self {
            bind_supported: false,
            unbind_supported: false,
            placements: BindingPlacement::ALL.to_vec(),
        }
    }
}

impl AdapterCapabilities {
    pub fn supports_placement(&self, placement: BindingPlacement) -> bool {
        let placements: &[BindingPlacement] = if self.placements.is_empty() {
            &BindingPlacement::ALL
        } else {
            &self.placements
        };
        placements.contains(&placement)
    }
}

/// Capabilities as reported to callers, including whether any adapter is
/// registered at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingCapabilities {
    pub adapter_available: bool,
    pub bind_supported: bool,
    pub unbind_supported: bool,
    pub placements: Vec<BindingPlacement>,
}
