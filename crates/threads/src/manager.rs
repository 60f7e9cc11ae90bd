//! Per-account thread binding lifecycle manager.
//!
//! Owns the in-memory binding table for one `(channel, account)`, loaded
//! lazily from the account's binding file.  Async entry points load it on
//! the blocking pool; the sync accessors read it inline under the table
//! lock when they are the first to touch it.  A file that fails to parse is
//! moved aside, while an unreadable one is retried on the next access and
//! never overwritten before it loads.  Every table mutation is a
//! synchronous critical section; anything that suspends (platform calls,
//! disk writes) happens before the mutation, guarded by the manager token,
//! or after it.
//!
//! Persistence is debounced: mutations mark the table dirty and at most one
//! delayed write task is outstanding.  [`ThreadBindingManager::flush`]
//! writes immediately.  A failed write leaves the table dirty so the next
//! mutation retries; the in-memory table stays authoritative.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use tether_domain::binding::{normalize_key, BindingPlacement};
use tether_domain::config::AccountBindingPolicy;
use tether_domain::error::{Error, Result};
use tether_domain::trace::TraceEvent;
use tether_sessions::agent_id_from_session_key;

use crate::messages::{format_intro_text, format_thread_name, resolve_farewell_text, UnbindReason};
use crate::persist::BindingFile;
use crate::platform::ThreadPlatform;
use crate::record::{ThreadBindingRecord, ThreadBindingTargetKind};

/// Agent id used when neither the caller nor the session key names one.
pub const DEFAULT_AGENT_ID: &str = "main";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to [`ThreadBindingManager::bind_target`].
#[derive(Debug, Clone)]
pub struct BindTargetRequest {
    pub placement: BindingPlacement,
    /// Thread to bind for `current` placement.
    pub thread_id: Option<String>,
    /// Where a `child` thread is created.  For `current` placement this is
    /// resolved through the platform when absent.
    pub container_id: Option<String>,
    pub thread_name: Option<String>,
    pub target_kind: ThreadBindingTargetKind,
    pub target_session_key: String,
    pub agent_id: Option<String>,
    pub label: Option<String>,
    pub bound_by: Option<String>,
    /// Posted into the thread once bound.
    pub intro_text: Option<String>,
    /// Overrides of the account policy.
    pub idle_timeout_ms: Option<u64>,
    pub max_age_ms: Option<u64>,
}

impl BindTargetRequest {
    pub fn new(
        placement: BindingPlacement,
        target_kind: ThreadBindingTargetKind,
        target_session_key: impl Into<String>,
    ) -> Self {
        Self {
            placement,
            thread_id: None,
            container_id: None,
            thread_name: None,
            target_kind,
            target_session_key: target_session_key.into(),
            agent_id: None,
            label: None,
            bound_by: None,
            intro_text: None,
            idle_timeout_ms: None,
            max_age_ms: None,
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn in_container(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }
}

/// A session spawned from a conversation that should get its own thread.
#[derive(Debug, Clone, Default)]
pub struct SpawnBindRequest {
    /// Conversation the spawn was requested from.
    pub requester_conversation_id: Option<String>,
    /// Explicit destination, preferred over the requester's conversation.
    pub destination_id: Option<String>,
    pub child_session_key: String,
    pub agent_id: Option<String>,
    pub label: Option<String>,
    pub bound_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UnbindOptions {
    pub reason: UnbindReason,
    pub send_farewell: bool,
    /// Replaces the reason-specific farewell when non-blank.
    pub farewell_text: Option<String>,
    /// Only remove bindings of this kind.
    pub target_kind: Option<ThreadBindingTargetKind>,
}

impl UnbindOptions {
    pub fn new(reason: UnbindReason) -> Self {
        Self {
            reason,
            send_farewell: false,
            farewell_text: None,
            target_kind: None,
        }
    }

    pub fn with_farewell(mut self, text: Option<String>) -> Self {
        self.send_farewell = true;
        self.farewell_text = text;
        self
    }

    pub fn only_kind(mut self, kind: ThreadBindingTargetKind) -> Self {
        self.target_kind = Some(kind);
        self
    }
}

impl Default for UnbindOptions {
    fn default() -> Self {
        Self::new(UnbindReason::Manual)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub(crate) struct BindingTable {
    loaded: bool,
    by_thread: HashMap<String, ThreadBindingRecord>,
    /// session key → thread ids
    by_session: HashMap<String, BTreeSet<String>>,
}

impl BindingTable {
    /// At most one record per thread; returns the record it displaced.
    pub(crate) fn insert(&mut self, record: ThreadBindingRecord) -> Option<ThreadBindingRecord> {
        let previous = self.remove(&record.thread_id);
        self.by_session
            .entry(record.target_session_key.clone())
            .or_default()
            .insert(record.thread_id.clone());
        self.by_thread.insert(record.thread_id.clone(), record);
        previous
    }

    pub(crate) fn remove(&mut self, thread_id: &str) -> Option<ThreadBindingRecord> {
        let record = self.by_thread.remove(thread_id)?;
        if let Some(threads) = self.by_session.get_mut(&record.target_session_key) {
            threads.remove(thread_id);
            if threads.is_empty() {
                self.by_session.remove(&record.target_session_key);
            }
        }
        Some(record)
    }

    pub(crate) fn get(&self, thread_id: &str) -> Option<&ThreadBindingRecord> {
        self.by_thread.get(thread_id)
    }

    pub(crate) fn get_mut(&mut self, thread_id: &str) -> Option<&mut ThreadBindingRecord> {
        self.by_thread.get_mut(thread_id)
    }

    pub(crate) fn threads_for(&self, session_key: &str) -> Vec<String> {
        self.by_session
            .get(session_key)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &ThreadBindingRecord> {
        self.by_thread.values()
    }

    fn clear(&mut self) {
        self.by_thread.clear();
        self.by_session.clear();
        self.loaded = false;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct PersistState {
    dirty: bool,
    pending: Option<JoinHandle<()>>,
}

pub(crate) struct ManagerInner {
    pub(crate) channel: String,
    pub(crate) account_id: String,
    pub(crate) policy: AccountBindingPolicy,
    file: BindingFile,
    pub(crate) platform: Arc<dyn ThreadPlatform>,
    table: Mutex<BindingTable>,
    /// Bumped on reset and dispose; async results captured under an older
    /// value are discarded.
    token: AtomicU64,
    pub(crate) disposed: AtomicBool,
    persist: Mutex<PersistState>,
    /// Serializes file writes.
    write_lock: tokio::sync::Mutex<()>,
    pub(crate) sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap to clone; clones share one table.
#[derive(Clone)]
pub struct ThreadBindingManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl ThreadBindingManager {
    pub fn new(
        channel: &str,
        account_id: &str,
        policy: AccountBindingPolicy,
        file: BindingFile,
        platform: Arc<dyn ThreadPlatform>,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                channel: normalize_key(channel),
                account_id: normalize_key(account_id),
                policy,
                file,
                platform,
                table: Mutex::new(BindingTable::default()),
                token: AtomicU64::new(0),
                disposed: AtomicBool::new(false),
                persist: Mutex::new(PersistState::default()),
                write_lock: tokio::sync::Mutex::new(()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn channel(&self) -> &str {
        &self.inner.channel
    }

    pub fn account_id(&self) -> &str {
        &self.inner.account_id
    }

    pub fn policy(&self) -> &AccountBindingPolicy {
        &self.inner.policy
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Current manager token.
    pub fn token(&self) -> u64 {
        self.inner.token.load(Ordering::SeqCst)
    }

    /// Whether a result obtained under `token` may still be applied.
    pub fn is_current(&self, token: u64) -> bool {
        !self.is_disposed() && self.token() == token
    }

    pub(crate) fn with_table<R>(&self, f: impl FnOnce(&mut BindingTable) -> R) -> R {
        let mut table = self.inner.table.lock();
        if !table.loaded {
            let loaded = self.inner.file.load();
            self.inner.apply_load(&mut table, loaded);
        }
        f(&mut table)
    }

    /// Load the table on the blocking pool.  Async entry points call this
    /// first so the file read never runs on a runtime worker.
    pub(crate) async fn ensure_loaded(&self) {
        if self.inner.table.lock().loaded {
            return;
        }
        let file = self.inner.file.clone();
        let loaded = tokio::task::spawn_blocking(move || file.load())
            .await
            .unwrap_or_else(|e| Err(Error::Other(format!("binding load task failed: {e}"))));
        let mut table = self.inner.table.lock();
        if !table.loaded {
            self.inner.apply_load(&mut table, loaded);
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get_by_thread(&self, thread_id: &str) -> Option<ThreadBindingRecord> {
        let thread_id = thread_id.trim();
        self.with_table(|t| t.get(thread_id).cloned())
    }

    /// Look a record up by its `<channel>:<account>:<thread>` binding id.
    pub fn get_by_binding_id(&self, binding_id: &str) -> Option<ThreadBindingRecord> {
        self.thread_for_binding_id(binding_id)
            .and_then(|thread| self.get_by_thread(thread))
    }

    /// The thread of a binding id owned by this manager.  Ids of other
    /// channels or accounts yield `None`.
    pub(crate) fn thread_for_binding_id<'a>(&self, binding_id: &'a str) -> Option<&'a str> {
        let (channel, rest) = binding_id.trim().split_once(':')?;
        let (account, thread) = rest.split_once(':')?;
        let owned = normalize_key(channel) == self.inner.channel
            && normalize_key(account) == self.inner.account_id;
        (owned && !thread.is_empty()).then_some(thread)
    }

    /// Every record, ordered by thread id.
    pub fn list(&self) -> Vec<ThreadBindingRecord> {
        let mut records: Vec<_> = self.with_table(|t| t.records().cloned().collect());
        records.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        records
    }

    pub fn list_by_session_key(&self, session_key: &str) -> Vec<ThreadBindingRecord> {
        let key = session_key.trim();
        self.with_table(|t| {
            t.threads_for(key)
                .iter()
                .filter_map(|thread| t.get(thread).cloned())
                .collect()
        })
    }

    // ── Binding ──────────────────────────────────────────────────────

    /// Bind a thread to a session.
    ///
    /// `Ok(None)` means nothing was bound: the request lacked a thread or
    /// container, the platform produced no thread, or the manager was reset
    /// while a platform call was in flight.
    pub async fn bind_target(&self, request: BindTargetRequest) -> Result<Option<ThreadBindingRecord>> {
        let token = self.token();
        self.bind_target_under(request, token).await
    }

    async fn bind_target_under(
        &self,
        request: BindTargetRequest,
        token: u64,
    ) -> Result<Option<ThreadBindingRecord>> {
        if !self.is_current(token) {
            return Ok(None);
        }
        self.ensure_loaded().await;
        let session_key = request.target_session_key.trim().to_owned();
        if session_key.is_empty() {
            return Err(Error::Other("bind requires a target session key".into()));
        }

        let agent_id = non_blank(request.agent_id.as_deref())
            .map(str::to_lowercase)
            .or_else(|| agent_id_from_session_key(&session_key))
            .unwrap_or_else(|| DEFAULT_AGENT_ID.to_owned());
        let label = non_blank(request.label.as_deref()).map(str::to_owned);

        let (thread_id, container_id) = match request.placement {
            BindingPlacement::Current => {
                let Some(thread_id) = non_blank(request.thread_id.as_deref()) else {
                    tracing::debug!(account_id = %self.inner.account_id, "current-placement bind without a thread id");
                    return Ok(None);
                };
                let container_id = match non_blank(request.container_id.as_deref()) {
                    Some(container) => container.to_owned(),
                    None => self.resolve_container(thread_id).await?.unwrap_or_else(|| thread_id.to_owned()),
                };
                (thread_id.to_owned(), container_id)
            }
            BindingPlacement::Child => {
                let Some(container_id) = non_blank(request.container_id.as_deref()) else {
                    tracing::debug!(account_id = %self.inner.account_id, "child-placement bind without a container");
                    return Ok(None);
                };
                let name = non_blank(request.thread_name.as_deref())
                    .map(|n| n.chars().take(crate::messages::MAX_THREAD_NAME_CHARS).collect())
                    .unwrap_or_else(|| format_thread_name(&agent_id, label.as_deref()));
                let created = self.inner.platform.create_thread(container_id, &name).await?;
                let Some(thread_id) = created.map(|t| t.trim().to_owned()).filter(|t| !t.is_empty()) else {
                    tracing::warn!(
                        account_id = %self.inner.account_id,
                        container_id,
                        "platform did not create a thread"
                    );
                    return Ok(None);
                };
                (thread_id, container_id.to_owned())
            }
        };

        if !self.is_current(token) {
            tracing::debug!(
                account_id = %self.inner.account_id,
                thread_id = %thread_id,
                "manager reset during bind; discarding result"
            );
            return Ok(None);
        }

        let now = Utc::now();
        let record = ThreadBindingRecord {
            account_id: self.inner.account_id.clone(),
            container_id,
            thread_id,
            target_kind: request.target_kind,
            target_session_key: session_key,
            agent_id,
            label,
            bound_by: non_blank(request.bound_by.as_deref()).map(str::to_owned),
            bound_at: now,
            last_activity_at: now,
            idle_timeout_ms: request.idle_timeout_ms.unwrap_or(self.inner.policy.idle_timeout_ms),
            max_age_ms: request.max_age_ms.unwrap_or(self.inner.policy.max_age_ms),
        };

        let displaced = self.with_table(|t| t.insert(record.clone()));
        self.schedule_persist();

        if let Some(old) = displaced.filter(|old| old.target_session_key != record.target_session_key) {
            TraceEvent::BindingRemoved {
                binding_id: old.binding_id(&self.inner.channel),
                target_session_key: old.target_session_key,
                reason: "rebound".into(),
            }
            .emit();
        }
        TraceEvent::BindingCreated {
            binding_id: record.binding_id(&self.inner.channel),
            target_session_key: record.target_session_key.clone(),
            target_kind: record.target_kind.as_str().into(),
            placement: request.placement.to_string(),
        }
        .emit();

        if let Some(intro) = non_blank(request.intro_text.as_deref()) {
            if let Err(e) = self.inner.platform.send_message(&record.thread_id, intro).await {
                tracing::warn!(thread_id = %record.thread_id, error = %e, "failed to post intro");
            }
        }
        Ok(Some(record))
    }

    pub(crate) async fn resolve_container(&self, conversation_id: &str) -> Result<Option<String>> {
        if let Some(known) = self.get_by_thread(conversation_id) {
            return Ok(Some(known.container_id));
        }
        let resolved = self.inner.platform.resolve_container(conversation_id).await?;
        Ok(resolved.map(|c| c.trim().to_owned()).filter(|c| !c.is_empty()))
    }

    pub async fn auto_bind_spawned_subagent(
        &self,
        request: SpawnBindRequest,
    ) -> Result<Option<ThreadBindingRecord>> {
        self.auto_bind_spawned(ThreadBindingTargetKind::Subagent, request).await
    }

    pub async fn auto_bind_spawned_acp_session(
        &self,
        request: SpawnBindRequest,
    ) -> Result<Option<ThreadBindingRecord>> {
        self.auto_bind_spawned(ThreadBindingTargetKind::Acp, request).await
    }

    /// Open a thread for a freshly spawned session next to the conversation
    /// that requested it.
    async fn auto_bind_spawned(
        &self,
        kind: ThreadBindingTargetKind,
        request: SpawnBindRequest,
    ) -> Result<Option<ThreadBindingRecord>> {
        let enabled = match kind {
            ThreadBindingTargetKind::Subagent => self.inner.policy.spawn_subagent_sessions,
            ThreadBindingTargetKind::Acp => self.inner.policy.spawn_acp_sessions,
        };
        if !enabled || self.is_disposed() {
            return Ok(None);
        }
        let Some(origin) = non_blank(request.destination_id.as_deref())
            .or_else(|| non_blank(request.requester_conversation_id.as_deref()))
        else {
            return Ok(None);
        };

        let token = self.token();
        self.ensure_loaded().await;
        let container_id = match self.resolve_container(origin).await? {
            Some(container) => container,
            None => {
                tracing::debug!(
                    account_id = %self.inner.account_id,
                    conversation_id = origin,
                    "no container resolved; opening the thread under the origin conversation"
                );
                origin.to_owned()
            }
        };
        if !self.is_current(token) {
            tracing::debug!(account_id = %self.inner.account_id, "manager reset during container lookup; discarding");
            return Ok(None);
        }

        let agent_id = non_blank(request.agent_id.as_deref())
            .map(str::to_lowercase)
            .or_else(|| agent_id_from_session_key(&request.child_session_key))
            .unwrap_or_else(|| DEFAULT_AGENT_ID.to_owned());
        let label = non_blank(request.label.as_deref()).map(str::to_owned);
        let policy = &self.inner.policy;

        let bind = BindTargetRequest {
            thread_name: Some(format_thread_name(&agent_id, label.as_deref())),
            intro_text: Some(format_intro_text(
                kind,
                &agent_id,
                label.as_deref(),
                policy.idle_timeout_ms,
                policy.max_age_ms,
            )),
            agent_id: Some(agent_id),
            label,
            bound_by: request.bound_by,
            ..BindTargetRequest::new(BindingPlacement::Child, kind, request.child_session_key)
                .in_container(container_id)
        };
        self.bind_target_under(bind, token).await
    }

    // ── Unbinding ────────────────────────────────────────────────────

    /// Remove the binding for one thread.  `None` when there was none.
    pub async fn unbind_thread(
        &self,
        thread_id: &str,
        options: UnbindOptions,
    ) -> Option<ThreadBindingRecord> {
        self.ensure_loaded().await;
        let thread_id = thread_id.trim();
        let removed = self.with_table(|t| {
            let kind_matches = t
                .get(thread_id)
                .is_some_and(|r| options.target_kind.map_or(true, |k| r.target_kind == k));
            if kind_matches {
                t.remove(thread_id)
            } else {
                None
            }
        })?;
        self.after_removal(std::slice::from_ref(&removed), &options).await;
        Some(removed)
    }

    /// Remove every binding targeting `session_key`.
    pub async fn unbind_by_session_key(
        &self,
        session_key: &str,
        options: UnbindOptions,
    ) -> Vec<ThreadBindingRecord> {
        self.ensure_loaded().await;
        let key = session_key.trim();
        let removed: Vec<ThreadBindingRecord> = self.with_table(|t| {
            let matching: Vec<String> = t
                .threads_for(key)
                .into_iter()
                .filter(|thread| {
                    t.get(thread)
                        .is_some_and(|r| options.target_kind.map_or(true, |k| r.target_kind == k))
                })
                .collect();
            matching.iter().filter_map(|thread| t.remove(thread)).collect()
        });
        self.after_removal(&removed, &options).await;
        removed
    }

    pub(crate) async fn after_removal(&self, removed: &[ThreadBindingRecord], options: &UnbindOptions) {
        if removed.is_empty() {
            return;
        }
        self.schedule_persist();
        for record in removed {
            TraceEvent::BindingRemoved {
                binding_id: record.binding_id(&self.inner.channel),
                target_session_key: record.target_session_key.clone(),
                reason: options.reason.to_string(),
            }
            .emit();
        }
        if options.send_farewell {
            for record in removed {
                self.send_farewell(record, &options.reason, options.farewell_text.as_deref())
                    .await;
            }
        }
    }

    pub(crate) async fn send_farewell(
        &self,
        record: &ThreadBindingRecord,
        reason: &UnbindReason,
        custom: Option<&str>,
    ) {
        let text = resolve_farewell_text(custom, reason, record.idle_timeout_ms, record.max_age_ms);
        if let Err(e) = self.inner.platform.send_message(&record.thread_id, &text).await {
            tracing::warn!(
                thread_id = %record.thread_id,
                reason = %reason,
                error = %e,
                "failed to post farewell"
            );
        }
    }

    // ── Activity and TTLs ────────────────────────────────────────────

    /// Record activity in a thread.  Returns `false` for unknown threads.
    pub fn touch(&self, thread_id: &str, at: DateTime<Utc>) -> bool {
        let thread_id = thread_id.trim();
        let touched = self.with_table(|t| match t.get_mut(thread_id) {
            Some(record) => {
                record.last_activity_at = record.last_activity_at.max(at);
                true
            }
            None => false,
        });
        if touched {
            self.schedule_persist();
        }
        touched
    }

    /// Set the idle timeout of every binding for a session and restart its
    /// idle clock.
    pub fn set_idle_timeout_by_session_key(
        &self,
        session_key: &str,
        idle_timeout_ms: u64,
    ) -> Vec<ThreadBindingRecord> {
        let now = Utc::now();
        self.update_by_session_key(session_key, |r| {
            r.idle_timeout_ms = idle_timeout_ms;
            r.last_activity_at = now;
        })
    }

    /// Set the max age of every binding for a session, counted from now.
    pub fn set_max_age_by_session_key(
        &self,
        session_key: &str,
        max_age_ms: u64,
    ) -> Vec<ThreadBindingRecord> {
        let now = Utc::now();
        self.update_by_session_key(session_key, |r| {
            r.max_age_ms = max_age_ms;
            r.bound_at = now;
        })
    }

    fn update_by_session_key(
        &self,
        session_key: &str,
        mut update: impl FnMut(&mut ThreadBindingRecord),
    ) -> Vec<ThreadBindingRecord> {
        let key = session_key.trim();
        let updated: Vec<ThreadBindingRecord> = self.with_table(|t| {
            t.threads_for(key)
                .iter()
                .filter_map(|thread| {
                    let record = t.get_mut(thread)?;
                    update(record);
                    Some(record.clone())
                })
                .collect()
        });
        if !updated.is_empty() {
            self.schedule_persist();
        }
        updated
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Drop the cached table so the next access reloads it from disk.
    /// Unsaved changes are discarded, as are in-flight binds started before
    /// the reset.
    pub fn reset(&self) {
        self.inner.token.fetch_add(1, Ordering::SeqCst);
        self.inner.table.lock().clear();
        self.inner.persist.lock().dirty = false;
        tracing::debug!(account_id = %self.inner.account_id, "binding table reset");
    }

    /// Stop the sweeper and write the table out.  Later sweeps and binds
    /// are no-ops.
    pub async fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.token.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.inner.sweeper.lock().take() {
            handle.abort();
        }
        self.flush().await
    }

    // ── Persistence ──────────────────────────────────────────────────

    /// Mark the table dirty and make sure a delayed write is scheduled.
    pub(crate) fn schedule_persist(&self) {
        let mut state = self.inner.persist.lock();
        state.dirty = true;
        if state.pending.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let delay = Duration::from_millis(self.inner.policy.persist_debounce_ms);
                state.pending = Some(handle.spawn(persist_after(Arc::downgrade(&self.inner), delay)));
            }
            Err(_) => {
                state.dirty = false;
                drop(state);
                if let Some(records) = self.inner.snapshot() {
                    if let Err(e) = self.inner.file.save(&records) {
                        tracing::warn!(error = %e, "failed to persist thread bindings");
                        self.inner.persist.lock().dirty = true;
                    }
                }
            }
        }
    }

    /// Write the table now, bypassing the debounce.
    pub async fn flush(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        self.inner.persist.lock().dirty = false;
        if let Err(e) = self.inner.write_snapshot().await {
            self.inner.persist.lock().dirty = true;
            return Err(e);
        }
        Ok(())
    }
}

impl ManagerInner {
    /// Fold a load result into the table.  Records already in memory win
    /// over the file.  A file that does not parse is moved aside; any other
    /// failure leaves the table unloaded so the next access retries.
    fn apply_load(&self, table: &mut BindingTable, loaded: Result<Vec<ThreadBindingRecord>>) {
        match loaded {
            Ok(records) => {
                for mut record in records {
                    record.account_id = self.account_id.clone();
                    record.thread_id = record.thread_id.trim().to_owned();
                    record.target_session_key = record.target_session_key.trim().to_owned();
                    if table.get(&record.thread_id).is_none() {
                        table.insert(record);
                    }
                }
                tracing::info!(
                    channel = %self.channel,
                    account_id = %self.account_id,
                    count = table.by_thread.len(),
                    "loaded thread bindings"
                );
                table.loaded = true;
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    path = %self.file.path().display(),
                    error = %e,
                    "malformed binding file; moving it aside and starting empty"
                );
                self.file.quarantine();
                table.loaded = true;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.file.path().display(),
                    error = %e,
                    "binding file unreadable; will retry on next access"
                );
            }
        }
    }

    /// `None` until the table has been loaded, so an untouched manager
    /// never overwrites its file with an empty table.
    fn snapshot(&self) -> Option<Vec<ThreadBindingRecord>> {
        let table = self.table.lock();
        if !table.loaded {
            return None;
        }
        let mut records: Vec<_> = table.records().cloned().collect();
        records.sort_by(|a, b| a.thread_id.cmp(&b.thread_id));
        Some(records)
    }

    async fn write_snapshot(&self) -> Result<()> {
        let Some(records) = self.snapshot() else {
            if self.table.lock().by_thread.is_empty() {
                return Ok(());
            }
            return Err(Error::Other(format!(
                "binding file {} not loaded yet; refusing to overwrite it",
                self.file.path().display()
            )));
        };
        let file = self.file.clone();
        let count = records.len();
        tokio::task::spawn_blocking(move || file.save(&records))
            .await
            .map_err(|e| Error::Other(format!("binding write task failed: {e}")))??;
        tracing::debug!(account_id = %self.account_id, count, "thread bindings persisted");
        Ok(())
    }
}

/// Debounced write.  Keeps writing while mutations land during a write so
/// no change is left behind.
async fn persist_after(inner: Weak<ManagerInner>, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    loop {
        let _guard = inner.write_lock.lock().await;
        {
            let mut state = inner.persist.lock();
            if !state.dirty {
                state.pending = None;
                return;
            }
            state.dirty = false;
        }
        if let Err(e) = inner.write_snapshot().await {
            tracing::warn!(
                account_id = %inner.account_id,
                error = %e,
                "failed to persist thread bindings; will retry on next change"
            );
            let mut state = inner.persist.lock();
            state.dirty = true;
            state.pending = None;
            return;
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NullPlatform;
    use crate::record::sample_record;

    fn manager(dir: &std::path::Path) -> ThreadBindingManager {
        ThreadBindingManager::new(
            "Discord",
            "Default",
            AccountBindingPolicy::default(),
            BindingFile::new(dir.join("default.json")),
            Arc::new(NullPlatform),
        )
    }

    #[test]
    fn table_keeps_session_index_in_sync() {
        let mut table = BindingTable::default();
        table.insert(sample_record("t1", "k"));
        table.insert(sample_record("t2", "k"));
        assert_eq!(table.threads_for("k"), vec!["t1".to_string(), "t2".to_string()]);

        // Rebinding a thread moves it to the new session.
        let displaced = table.insert(sample_record("t1", "other")).unwrap();
        assert_eq!(displaced.target_session_key, "k");
        assert_eq!(table.threads_for("k"), vec!["t2".to_string()]);
        assert_eq!(table.threads_for("other"), vec!["t1".to_string()]);

        table.remove("t2");
        assert!(table.threads_for("k").is_empty());
        assert!(!table.by_session.contains_key("k"));
    }

    #[test]
    fn binding_ids_are_scoped_to_channel_and_account() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert_eq!(mgr.account_id(), "default");
        assert_eq!(mgr.thread_for_binding_id("discord:default:t1"), Some("t1"));
        assert_eq!(mgr.thread_for_binding_id("Discord:Default:t1"), Some("t1"));
        assert_eq!(mgr.thread_for_binding_id("discord:default:a:b"), Some("a:b"));
        assert_eq!(mgr.thread_for_binding_id("slack:default:t1"), None);
        assert_eq!(mgr.thread_for_binding_id("discord:other:t1"), None);
        assert_eq!(mgr.thread_for_binding_id("default:t1"), None);
        assert_eq!(mgr.thread_for_binding_id("discord:default:"), None);
    }

    #[tokio::test]
    async fn null_platform_cannot_create_child_threads() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let request = BindTargetRequest::new(
            BindingPlacement::Child,
            ThreadBindingTargetKind::Subagent,
            "agent:main:subagent:1",
        )
        .in_container("chan-1");
        assert!(mgr.bind_target(request).await.unwrap().is_none());
        assert!(mgr.list().is_empty());
    }

    #[tokio::test]
    async fn current_bind_without_resolver_uses_thread_as_container() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let record = mgr
            .bind_target(
                BindTargetRequest::new(
                    BindingPlacement::Current,
                    ThreadBindingTargetKind::Acp,
                    " agent:Codex:acp:42 ",
                )
                .in_thread("t-1"),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.container_id, "t-1");
        assert_eq!(record.agent_id, "codex");
        assert_eq!(record.target_session_key, "agent:Codex:acp:42");
        assert_eq!(record.idle_timeout_ms, AccountBindingPolicy::default().idle_timeout_ms);
        assert_eq!(mgr.get_by_binding_id("discord:default:t-1"), Some(record));
    }

    #[tokio::test]
    async fn blank_session_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let request = BindTargetRequest::new(BindingPlacement::Current, ThreadBindingTargetKind::Acp, "  ")
            .in_thread("t-1");
        assert!(mgr.bind_target(request).await.is_err());
    }
}
