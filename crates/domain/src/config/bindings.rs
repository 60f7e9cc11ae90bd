use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Thread binding lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle rules for conversation bindings.  TTLs of `0` disable that
/// expiry axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingsConfig {
    /// Unbind after this long without activity.  Default 24h.
    #[serde(default = "d_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Unbind this long after binding regardless of activity.  Default off.
    #[serde(default)]
    pub max_age_ms: u64,

    /// Period of the batched idle/max-age sweep.
    #[serde(default = "d_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Coalescing window for binding-file writes.
    #[serde(default = "d_persist_debounce_ms")]
    pub persist_debounce_ms: u64,

    /// Auto-bind a new thread when a subagent is spawned from a thread.
    #[serde(default = "d_true")]
    pub spawn_subagent_sessions: bool,

    /// Auto-bind a new thread when an ACP session is spawned from a thread.
    #[serde(default = "d_true")]
    pub spawn_acp_sessions: bool,

    /// Post a farewell when a binding expires.
    #[serde(default = "d_true")]
    pub farewell_on_expiry: bool,

    /// Post a farewell when startup reconciliation drops a stale binding.
    #[serde(default)]
    pub reconcile_farewell: bool,

    /// One lifecycle manager per entry.
    #[serde(default)]
    pub accounts: Vec<BindingAccountConfig>,
}

impl Default for BindingsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: d_idle_timeout_ms(),
            max_age_ms: 0,
            sweep_interval_ms: d_sweep_interval_ms(),
            persist_debounce_ms: d_persist_debounce_ms(),
            spawn_subagent_sessions: true,
            spawn_acp_sessions: true,
            farewell_on_expiry: true,
            reconcile_farewell: false,
            accounts: Vec::new(),
        }
    }
}

/// A channel account that gets its own binding table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindingAccountConfig {
    pub channel: String,
    #[serde(default = "d_account_id")]
    pub account_id: String,
    #[serde(default)]
    pub idle_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_age_ms: Option<u64>,
}

/// Effective settings for one account after applying overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountBindingPolicy {
    pub idle_timeout_ms: u64,
    pub max_age_ms: u64,
    pub sweep_interval_ms: u64,
    pub persist_debounce_ms: u64,
    pub spawn_subagent_sessions: bool,
    pub spawn_acp_sessions: bool,
    pub farewell_on_expiry: bool,
}

impl Default for AccountBindingPolicy {
    fn default() -> Self {
        BindingsConfig::default().policy_for(None)
    }
}

impl BindingsConfig {
    /// Per-account overrides take precedence over the global TTLs.
    pub fn policy_for(&self, account: Option<&BindingAccountConfig>) -> AccountBindingPolicy {
        AccountBindingPolicy {
            idle_timeout_ms: account
                .and_then(|a| a.idle_timeout_ms)
                .unwrap_or(self.idle_timeout_ms),
            max_age_ms: account.and_then(|a| a.max_age_ms).unwrap_or(self.max_age_ms),
            sweep_interval_ms: self.sweep_interval_ms,
            persist_debounce_ms: self.persist_debounce_ms,
            spawn_subagent_sessions: self.spawn_subagent_sessions,
            spawn_acp_sessions: self.spawn_acp_sessions,
            farewell_on_expiry: self.farewell_on_expiry,
        }
    }
}

fn d_idle_timeout_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn d_sweep_interval_ms() -> u64 {
    120_000
}

fn d_persist_debounce_ms() -> u64 {
    250
}

fn d_account_id() -> String {
    "default".into()
}

fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_override_wins() {
        let cfg: BindingsConfig = toml::from_str(
            r#"
            idle_timeout_ms = 60000
            [[accounts]]
            channel = "discord"
            max_age_ms = 3600000
            "#,
        )
        .unwrap();
        let policy = cfg.policy_for(cfg.accounts.first());
        assert_eq!(policy.idle_timeout_ms, 60_000);
        assert_eq!(policy.max_age_ms, 3_600_000);
        assert_eq!(cfg.accounts[0].account_id, "default");
    }
}
