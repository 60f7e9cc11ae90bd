use tether_domain::binding::normalize_key;
use tether_domain::config::Config;
use tether_threads::{BindingFile, ThreadBindingRecord};

/// Persisted bindings of one channel account.
#[derive(Debug, Clone)]
pub struct AccountBindings {
    pub channel: String,
    pub account_id: String,
    pub records: Vec<ThreadBindingRecord>,
}

/// Read the binding files of every configured account matching the
/// filters.  Unreadable files are reported and skipped.
pub fn collect(
    config: &Config,
    channel: Option<&str>,
    account: Option<&str>,
) -> Vec<AccountBindings> {
    let channel = channel.map(normalize_key);
    let account = account.map(normalize_key);

    let mut out = Vec::new();
    for acct in &config.bindings.accounts {
        let acct_channel = normalize_key(&acct.channel);
        let acct_id = normalize_key(&acct.account_id);
        if channel.as_ref().is_some_and(|c| *c != acct_channel)
            || account.as_ref().is_some_and(|a| *a != acct_id)
        {
            continue;
        }

        let file = BindingFile::new(config.state.binding_file(&acct.channel, &acct.account_id));
        let mut records = match file.load() {
            Ok(records) => records,
            Err(e) => {
                eprintln!("{acct_channel}:{acct_id}: {}: {e}", file.path().display());
                continue;
            }
        };
        records.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        out.push(AccountBindings {
            channel: acct_channel,
            account_id: acct_id,
            records,
        });
    }
    out
}

pub fn list(config: &Config, channel: Option<&str>, account: Option<&str>, json: bool) -> anyhow::Result<()> {
    let accounts = collect(config, channel, account);

    if json {
        let rows: Vec<serde_json::Value> = accounts
            .iter()
            .flat_map(|a| {
                a.records.iter().map(move |r| {
                    serde_json::json!({
                        "channel": a.channel,
                        "binding": r,
                        "expiresAt": r.expires_at(),
                    })
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if accounts.iter().all(|a| a.records.is_empty()) {
        println!("No bindings.");
        return Ok(());
    }

    for acct in &accounts {
        if acct.records.is_empty() {
            continue;
        }
        println!("{}:{} ({} binding(s))", acct.channel, acct.account_id, acct.records.len());
        for r in &acct.records {
            let expires = r
                .expires_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".into());
            println!(
                "  {:<24} {:<8} {:<40} expires {}",
                r.thread_id,
                r.target_kind.as_str(),
                r.target_session_key,
                expires
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tether_domain::config::BindingAccountConfig;
    use tether_threads::ThreadBindingTargetKind;

    fn record(thread: &str) -> ThreadBindingRecord {
        let now = Utc::now();
        ThreadBindingRecord {
            account_id: "default".into(),
            container_id: "general".into(),
            thread_id: thread.into(),
            target_kind: ThreadBindingTargetKind::Acp,
            target_session_key: format!("agent:main:acp:{thread}"),
            agent_id: "main".into(),
            label: None,
            bound_by: None,
            bound_at: now,
            last_activity_at: now,
            idle_timeout_ms: 0,
            max_age_ms: 0,
        }
    }

    fn account(channel: &str) -> BindingAccountConfig {
        BindingAccountConfig {
            channel: channel.into(),
            account_id: "default".into(),
            idle_timeout_ms: None,
            max_age_ms: None,
        }
    }

    #[test]
    fn collect_filters_by_channel_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.state.path = dir.path().to_path_buf();
        config.bindings.accounts = vec![account("discord"), account("slack")];

        BindingFile::new(config.state.binding_file("discord", "default"))
            .save(&[record("t-2"), record("t-1")])
            .unwrap();
        BindingFile::new(config.state.binding_file("slack", "default"))
            .save(&[record("s-1")])
            .unwrap();

        let all = collect(&config, None, None);
        assert_eq!(all.len(), 2);

        let discord = collect(&config, Some("Discord"), None);
        assert_eq!(discord.len(), 1);
        let threads: Vec<&str> = discord[0].records.iter().map(|r| r.thread_id.as_str()).collect();
        assert_eq!(threads, vec!["t-1", "t-2"]);

        assert!(collect(&config, None, Some("other")).is_empty());
    }
}
