//! Session key parsing.
//!
//! Agent-scoped keys look like:
//! - `agent:<agentId>:main`
//! - `agent:<agentId>:subagent:<uuid>`         (spawned subagent)
//! - `agent:<agentId>:acp:<uuid>`              (externally managed ACP session)
//! - `agent:<agentId>:<channel>:dm:<peerId>` … (channel-routed sessions)
//!
//! Keys that don't start with `agent:` are treated as opaque.

/// What kind of session a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKeyKind {
    Subagent,
    Acp,
    Other,
}

/// A parsed `agent:<agentId>:<rest>` key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSessionKey<'a> {
    pub agent_id: &'a str,
    pub rest: &'a str,
}

impl AgentSessionKey<'_> {
    pub fn kind(&self) -> SessionKeyKind {
        let first = self.rest.split(':').next().unwrap_or_default();
        match first.to_ascii_lowercase().as_str() {
            "subagent" => SessionKeyKind::Subagent,
            "acp" => SessionKeyKind::Acp,
            _ => SessionKeyKind::Other,
        }
    }
}

/// Parse an agent-scoped key.  Returns `None` for opaque keys or keys with
/// an empty agent id or remainder.
pub fn parse_agent_session_key(key: &str) -> Option<AgentSessionKey<'_>> {
    let key = key.trim();
    let mut parts = key.splitn(3, ':');
    if !parts.next()?.eq_ignore_ascii_case("agent") {
        return None;
    }
    let agent_id = parts.next()?.trim();
    let rest = parts.next()?.trim();
    if agent_id.is_empty() || rest.is_empty() {
        return None;
    }
    Some(AgentSessionKey { agent_id, rest })
}

/// Agent id encoded in the key, lower-cased; `None` for opaque keys.
pub fn agent_id_from_session_key(key: &str) -> Option<String> {
    parse_agent_session_key(key).map(|k| k.agent_id.to_lowercase())
}

pub fn session_key_kind(key: &str) -> SessionKeyKind {
    parse_agent_session_key(key)
        .map(|k| k.kind())
        .unwrap_or(SessionKeyKind::Other)
}
