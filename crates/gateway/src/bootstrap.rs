//! AppState construction, background tasks and shutdown.
//!
//! `serve` and the `bindings` CLI share [`build_app_state`] so they see the
//! same reconciled binding tables.

use std::sync::Arc;

use anyhow::Context;

use tether_bindings::{SessionBindingAdapter, SessionBindingService};
use tether_domain::config::{BindingAccountConfig, Config, ConfigSeverity};
use tether_sessions::SessionStore;
use tether_threads::{BindingFile, NullPlatform, ThreadBindingAdapter, ThreadBindingManager, ThreadPlatform};

use crate::backends::BackendRegistry;
use crate::dispatch::SessionDispatcher;
use crate::state::AppState;
use crate::thread_bindings::ThreadBindingRegistry;

/// Builds the platform handle for one channel account.
pub type PlatformFactory = dyn Fn(&BindingAccountConfig) -> Arc<dyn ThreadPlatform> + Send + Sync;

/// Factory used when no channel integration is linked in: bindings are
/// tracked but nothing is posted.
pub fn null_platforms(_: &BindingAccountConfig) -> Arc<dyn ThreadPlatform> {
    Arc::new(NullPlatform)
}

/// Validate config, open the stores, register one thread binding adapter
/// per configured account and reconcile persisted ACP bindings against the
/// session store.
pub async fn build_app_state(
    config: Arc<Config>,
    platforms: &PlatformFactory,
) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Session store ────────────────────────────────────────────────
    let sessions = Arc::new(
        SessionStore::new(&config.state.path).context("initializing session store")?,
    );
    if sessions.is_degraded() {
        tracing::warn!("session store degraded; stale-binding reconciliation will keep everything");
    }

    // ── Runtime backends ─────────────────────────────────────────────
    let backends = Arc::new(BackendRegistry::new());
    let dispatcher = Arc::new(SessionDispatcher::new(
        backends.clone(),
        sessions.clone(),
        config.backends.default.clone(),
    ));
    tracing::info!(
        default = config.backends.default.as_deref().unwrap_or("<first healthy>"),
        "backend registry ready"
    );

    // ── Binding service + thread managers ────────────────────────────
    let bindings = Arc::new(SessionBindingService::new());
    let thread_bindings = Arc::new(ThreadBindingRegistry::new());
    for account in &config.bindings.accounts {
        let policy = config.bindings.policy_for(Some(account));
        let file = BindingFile::new(
            config
                .state
                .binding_file(&account.channel, &account.account_id),
        );
        let manager = ThreadBindingManager::new(
            &account.channel,
            &account.account_id,
            policy,
            file,
            platforms(account),
        );
        let adapter: Arc<dyn SessionBindingAdapter> =
            Arc::new(ThreadBindingAdapter::new(manager.clone()));
        bindings.register_adapter(adapter);
        thread_bindings.insert(manager);
    }
    tracing::info!(accounts = thread_bindings.len(), "thread binding managers ready");

    // ── Startup reconciliation ───────────────────────────────────────
    for manager in thread_bindings.list() {
        let report = manager
            .reconcile_on_startup(sessions.as_ref(), config.bindings.reconcile_farewell)
            .await;
        if report.removed > 0 {
            tracing::info!(
                channel = %manager.channel(),
                account_id = %manager.account_id(),
                removed = report.removed,
                stale = ?report.stale_session_keys,
                "removed stale ACP bindings"
            );
        }
    }

    Ok(AppState {
        config,
        sessions,
        backends,
        dispatcher,
        bindings,
        thread_bindings,
    })
}

/// Start the per-account expiry sweepers.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Binding expiry sweeps ────────────────────────────────────────
    let started = state.thread_bindings.start_sweepers();
    tracing::info!(
        sweepers = started,
        interval_ms = state.config.bindings.sweep_interval_ms,
        "binding sweepers started"
    );
}

/// Stop the sweepers and write every binding table and the session store.
pub async fn shutdown(state: &AppState) {
    state.thread_bindings.dispose_all().await;

    let sessions = state.sessions.clone();
    match tokio::task::spawn_blocking(move || sessions.flush()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "session store flush failed on shutdown"),
        Err(e) => tracing::warn!(error = %e, "session store flush task failed"),
    }
}
