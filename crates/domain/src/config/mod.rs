mod bindings;
mod observability;

pub use bindings::*;
pub use observability::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub bindings: BindingsConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State directory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "d_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { path: d_state_path() }
    }
}

impl StateConfig {
    /// `<state>/bindings/<channel>/<account>.json`
    pub fn binding_file(&self, channel: &str, account_id: &str) -> PathBuf {
        binding_file_path(&self.path, channel, account_id)
    }
}

/// Location of the persisted binding table for one channel account.
pub fn binding_file_path(state_path: &Path, channel: &str, account_id: &str) -> PathBuf {
    state_path
        .join("bindings")
        .join(sanitize_segment(channel))
        .join(format!("{}.json", sanitize_segment(account_id)))
}

fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "default".into()
    } else {
        cleaned
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime backends
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendsConfig {
    /// Backend used when a dispatch does not name one.  `None` picks the
    /// first healthy registered backend.
    #[serde(default)]
    pub default: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.  Empty when
    /// everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let b = &self.bindings;

        if b.sweep_interval_ms == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "bindings.sweep_interval_ms".into(),
                message: "sweep interval must be greater than 0".into(),
            });
        } else if b.persist_debounce_ms > b.sweep_interval_ms {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "bindings.persist_debounce_ms".into(),
                message: "debounce window exceeds the sweep interval; expiries may reach disk late"
                    .into(),
            });
        }

        let mut seen = HashSet::new();
        for (i, account) in b.accounts.iter().enumerate() {
            if account.channel.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bindings.accounts[{i}].channel"),
                    message: "channel must not be empty".into(),
                });
            }
            if account.account_id.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bindings.accounts[{i}].account_id"),
                    message: "account_id must not be empty".into(),
                });
            }
            let key = crate::binding::adapter_key(&account.channel, &account.account_id);
            if !seen.insert(key.clone()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("bindings.accounts[{i}]"),
                    message: format!("duplicate account {key}"),
                });
            }
        }

        if b.accounts.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "bindings.accounts".into(),
                message: "no channel accounts configured; binds will report adapter unavailable"
                    .into(),
            });
        }

        if let Some(id) = &self.backends.default {
            if id.trim().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "backends.default".into(),
                    message: "default backend id must not be blank".into(),
                });
            }
        }

        errors
    }
}
