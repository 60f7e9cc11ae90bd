use std::path::Path;
use std::sync::Arc;

use chrono::Utc;

use tether_bindings::{BindInput, UnbindInput};
use tether_domain::binding::{
    BindingMetadata, BindingPlacement, BindingStatus, BindingTargetKind, ConversationRef,
};
use tether_domain::config::{BindingAccountConfig, Config};
use tether_gateway::backends::{AgentRuntime, RuntimeBackend, RuntimeSessionIds};
use tether_gateway::bootstrap::{self, null_platforms};
use tether_sessions::{IdentitySource, SessionIdentity, SessionStore};
use tether_threads::{BindingFile, ThreadBindingRecord, ThreadBindingTargetKind};

fn config_in(dir: &Path) -> Arc<Config> {
    let mut config = Config::default();
    config.state.path = dir.to_path_buf();
    config.bindings.persist_debounce_ms = 10;
    config.bindings.accounts = vec![BindingAccountConfig {
        channel: "discord".into(),
        account_id: "default".into(),
        idle_timeout_ms: None,
        max_age_ms: None,
    }];
    Arc::new(config)
}

fn acp_record(thread: &str, session_key: &str) -> ThreadBindingRecord {
    let now = Utc::now();
    ThreadBindingRecord {
        account_id: "default".into(),
        container_id: "general".into(),
        thread_id: thread.into(),
        target_kind: ThreadBindingTargetKind::Acp,
        target_session_key: session_key.into(),
        agent_id: "main".into(),
        label: None,
        bound_by: None,
        bound_at: now,
        last_activity_at: now,
        idle_timeout_ms: 0,
        max_age_ms: 0,
    }
}

#[tokio::test]
async fn bind_through_service_is_flushed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let state = bootstrap::build_app_state(config.clone(), &null_platforms)
        .await
        .unwrap();

    let binding = state
        .bindings
        .bind(BindInput {
            target_session_key: "agent:main:acp:1".into(),
            target_kind: BindingTargetKind::Session,
            conversation: ConversationRef::new("Discord", "default", "thread-1")
                .with_parent("general"),
            placement: Some(BindingPlacement::Current),
            metadata: BindingMetadata::new(),
        })
        .await
        .unwrap();
    assert_eq!(binding.status, BindingStatus::Active);
    assert_eq!(binding.binding_id, "discord:default:thread-1");

    bootstrap::shutdown(&state).await;

    let saved = BindingFile::new(config.state.binding_file("discord", "default"))
        .load()
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].thread_id, "thread-1");
    assert_eq!(saved[0].target_kind, ThreadBindingTargetKind::Acp);

    let manager = state.thread_bindings.get("discord", "default").unwrap();
    assert!(manager.is_disposed());
}

#[tokio::test]
async fn restart_drops_acp_bindings_without_session_identity() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    {
        let sessions = SessionStore::new(dir.path()).unwrap();
        sessions.resolve_or_create("agent:main:acp:live", Some("main"));
        let now = Utc::now();
        let fragment =
            SessionIdentity::pending(IdentitySource::Ensure, now).with_backend_session_id("b-1");
        sessions.apply_identity("agent:main:acp:live", &fragment, now);
        sessions.flush().unwrap();
    }
    BindingFile::new(config.state.binding_file("discord", "default"))
        .save(&[
            acp_record("t-live", "agent:main:acp:live"),
            acp_record("t-gone", "agent:main:acp:gone"),
        ])
        .unwrap();

    let state = bootstrap::build_app_state(config.clone(), &null_platforms)
        .await
        .unwrap();

    let manager = state.thread_bindings.get("discord", "default").unwrap();
    let threads: Vec<String> = manager.list().into_iter().map(|r| r.thread_id).collect();
    assert_eq!(threads, vec!["t-live".to_string()]);

    let resolved = state
        .bindings
        .resolve_by_conversation(&ConversationRef::new("discord", "default", "t-live"));
    assert_eq!(
        resolved.map(|b| b.target_session_key).as_deref(),
        Some("agent:main:acp:live")
    );

    let ended = state
        .bindings
        .unbind(UnbindInput::by_session_key("agent:main:acp:live"))
        .await;
    assert_eq!(ended.len(), 1);

    bootstrap::shutdown(&state).await;
    let saved = BindingFile::new(config.state.binding_file("discord", "default"))
        .load()
        .unwrap();
    assert!(saved.is_empty());
}

#[tokio::test]
async fn invalid_config_refuses_to_boot() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = (*config_in(dir.path())).clone();
    config.bindings.sweep_interval_ms = 0;

    let err = bootstrap::build_app_state(Arc::new(config), &null_platforms)
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("config validation failed"));
}

struct Echo;

#[async_trait::async_trait]
impl AgentRuntime for Echo {
    async fn ensure_session(
        &self,
        session_key: &str,
        _agent_id: &str,
    ) -> tether_domain::error::Result<RuntimeSessionIds> {
        Ok(RuntimeSessionIds {
            record_id: Some(format!("rec-{session_key}")),
            backend_session_id: Some("b-7".into()),
            agent_session_id: None,
        })
    }

    async fn session_status(
        &self,
        _session_key: &str,
    ) -> tether_domain::error::Result<Option<RuntimeSessionIds>> {
        Ok(None)
    }
}

#[tokio::test]
async fn dispatched_session_survives_restart_reconciliation() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());

    {
        let state = bootstrap::build_app_state(config.clone(), &null_platforms)
            .await
            .unwrap();
        state
            .backends
            .register(RuntimeBackend::new("acpx", Arc::new(Echo)))
            .unwrap();
        let entry = state
            .dispatcher
            .ensure_session("agent:main:acp:7", None, None)
            .await
            .unwrap();
        assert!(entry.identity.unwrap().is_resolved());

        state
            .bindings
            .bind(BindInput {
                target_session_key: "agent:main:acp:7".into(),
                target_kind: BindingTargetKind::Session,
                conversation: ConversationRef::new("discord", "default", "t-7"),
                placement: Some(BindingPlacement::Current),
                metadata: BindingMetadata::new(),
            })
            .await
            .unwrap();
        bootstrap::shutdown(&state).await;
    }

    let state = bootstrap::build_app_state(config, &null_platforms)
        .await
        .unwrap();
    let manager = state.thread_bindings.get("discord", "default").unwrap();
    assert_eq!(manager.list().len(), 1);
    assert_eq!(
        state.sessions.get("agent:main:acp:7").unwrap().backend.as_deref(),
        Some("acpx")
    );
}

#[tokio::test]
async fn same_thread_id_on_two_channels_stays_independent() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = (*config_in(dir.path())).clone();
    config.bindings.accounts.push(BindingAccountConfig {
        channel: "slack".into(),
        account_id: "default".into(),
        idle_timeout_ms: None,
        max_age_ms: None,
    });
    let state = bootstrap::build_app_state(Arc::new(config), &null_platforms)
        .await
        .unwrap();

    let mut ids = Vec::new();
    for channel in ["discord", "slack"] {
        let binding = state
            .bindings
            .bind(BindInput {
                target_session_key: "agent:main:acp:shared".into(),
                target_kind: BindingTargetKind::Session,
                conversation: ConversationRef::new(channel, "default", "100"),
                placement: Some(BindingPlacement::Current),
                metadata: BindingMetadata::new(),
            })
            .await
            .unwrap();
        ids.push(binding.binding_id);
    }
    assert_eq!(ids, vec!["discord:default:100", "slack:default:100"]);
    assert_eq!(state.bindings.list_by_session("agent:main:acp:shared").len(), 2);

    let ended = state
        .bindings
        .unbind(UnbindInput::by_binding_id("discord:default:100"))
        .await;
    assert_eq!(ended.len(), 1);
    assert_eq!(ended[0].conversation.channel, "discord");

    let slack = state.thread_bindings.get("slack", "default").unwrap();
    assert!(slack.get_by_thread("100").is_some());
    let discord = state.thread_bindings.get("discord", "default").unwrap();
    assert!(discord.get_by_thread("100").is_none());

    bootstrap::shutdown(&state).await;
}
