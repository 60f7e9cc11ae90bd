//! Intro/farewell text and thread naming.  Pure formatting, no I/O.

use std::fmt;

use crate::record::ThreadBindingTargetKind;

/// Platform limit on thread names.
pub const MAX_THREAD_NAME_CHARS: usize = 100;

/// Why a binding was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnbindReason {
    IdleExpired,
    MaxAgeExpired,
    StaleSession,
    Manual,
    Other(String),
}

impl UnbindReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::IdleExpired => "idle-expired",
            Self::MaxAgeExpired => "max-age-expired",
            Self::StaleSession => "stale-session",
            Self::Manual => "manual",
            Self::Other(reason) => reason,
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "idle-expired" => Self::IdleExpired,
            "max-age-expired" => Self::MaxAgeExpired,
            "stale-session" => Self::StaleSession,
            "" | "manual" => Self::Manual,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for UnbindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `24h`, `45m`, `1h30m`, `30s`.
pub fn format_duration_label(ms: u64) -> String {
    let total_secs = ms / 1_000;
    if total_secs < 60 {
        return format!("{total_secs}s");
    }
    let total_mins = total_secs / 60;
    let (hours, mins) = (total_mins / 60, total_mins % 60);
    match (hours, mins) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h{m}m"),
    }
}

fn display_name<'a>(agent_id: &'a str, label: Option<&'a str>) -> &'a str {
    label
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| {
            let agent = agent_id.trim();
            if agent.is_empty() {
                "agent"
            } else {
                agent
            }
        })
}

pub fn format_thread_name(agent_id: &str, label: Option<&str>) -> String {
    let name = format!("🤖 {}", display_name(agent_id, label));
    name.chars().take(MAX_THREAD_NAME_CHARS).collect()
}

pub fn format_intro_text(
    kind: ThreadBindingTargetKind,
    agent_id: &str,
    label: Option<&str>,
    idle_timeout_ms: u64,
    max_age_ms: u64,
) -> String {
    let what = match kind {
        ThreadBindingTargetKind::Subagent => "subagent session",
        ThreadBindingTargetKind::Acp => "ACP session",
    };
    let policy = match (idle_timeout_ms > 0, max_age_ms > 0) {
        (true, true) => format!(
            " (auto-unfocus after {} idle, {} max)",
            format_duration_label(idle_timeout_ms),
            format_duration_label(max_age_ms)
        ),
        (true, false) => format!(
            " (auto-unfocus after {} idle)",
            format_duration_label(idle_timeout_ms)
        ),
        (false, true) => format!(
            " (auto-unfocus after {})",
            format_duration_label(max_age_ms)
        ),
        (false, false) => String::new(),
    };
    format!(
        "🤖 {} {what} active{policy}. Messages here go directly to this session.",
        display_name(agent_id, label)
    )
}

pub fn format_farewell_text(reason: &UnbindReason, idle_timeout_ms: u64, max_age_ms: u64) -> String {
    const TAIL: &str = "Messages here will no longer be routed to it.";
    match reason {
        UnbindReason::IdleExpired if idle_timeout_ms > 0 => format!(
            "Session ended automatically after {} of inactivity. {TAIL}",
            format_duration_label(idle_timeout_ms)
        ),
        UnbindReason::MaxAgeExpired if max_age_ms > 0 => format!(
            "Session ended automatically after {}. {TAIL}",
            format_duration_label(max_age_ms)
        ),
        UnbindReason::StaleSession => {
            format!("Session ended because it no longer exists. {TAIL}")
        }
        _ => format!("Session ended. {TAIL}"),
    }
}

/// Caller-supplied text wins when non-blank.
pub fn resolve_farewell_text(
    custom: Option<&str>,
    reason: &UnbindReason,
    idle_timeout_ms: u64,
    max_age_ms: u64,
) -> String {
    custom
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| format_farewell_text(reason, idle_timeout_ms, max_age_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_labels() {
        assert_eq!(format_duration_label(86_400_000), "24h");
        assert_eq!(format_duration_label(45 * 60_000), "45m");
        assert_eq!(format_duration_label(90 * 60_000), "1h30m");
        assert_eq!(format_duration_label(1_500), "1s");
    }

    #[test]
    fn reasons_round_trip_through_text() {
        for reason in [
            UnbindReason::IdleExpired,
            UnbindReason::MaxAgeExpired,
            UnbindReason::StaleSession,
            UnbindReason::Manual,
        ] {
            assert_eq!(UnbindReason::parse(reason.as_str()), reason);
        }
        assert_eq!(
            UnbindReason::parse("operator-request"),
            UnbindReason::Other("operator-request".into())
        );
    }

    #[test]
    fn thread_name_is_capped() {
        let long = "x".repeat(300);
        let name = format_thread_name("main", Some(&long));
        assert_eq!(name.chars().count(), MAX_THREAD_NAME_CHARS);
        assert_eq!(format_thread_name("codex", Some("  ")), "🤖 codex");
    }

    #[test]
    fn intro_mentions_policy() {
        let text = format_intro_text(ThreadBindingTargetKind::Acp, "codex", None, 86_400_000, 0);
        assert!(text.contains("ACP session"));
        assert!(text.contains("24h idle"));
        let none = format_intro_text(ThreadBindingTargetKind::Subagent, "main", Some("Researcher"), 0, 0);
        assert!(none.starts_with("🤖 Researcher subagent session active."));
    }

    #[test]
    fn farewell_defaults_by_reason() {
        assert!(format_farewell_text(&UnbindReason::IdleExpired, 3_600_000, 0).contains("1h of inactivity"));
        assert!(format_farewell_text(&UnbindReason::MaxAgeExpired, 0, 7_200_000).contains("after 2h."));
        assert!(format_farewell_text(&UnbindReason::StaleSession, 0, 0).contains("no longer exists"));
        assert_eq!(
            format_farewell_text(&UnbindReason::Manual, 0, 0),
            "Session ended. Messages here will no longer be routed to it."
        );
        assert_eq!(
            resolve_farewell_text(Some(" bye "), &UnbindReason::Manual, 0, 0),
            "bye"
        );
        // Same inputs, same text.
        assert_eq!(
            format_farewell_text(&UnbindReason::IdleExpired, 60_000, 0),
            format_farewell_text(&UnbindReason::IdleExpired, 60_000, 0)
        );
    }
}
