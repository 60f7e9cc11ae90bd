//! Startup reconciliation against the session metadata store.

use std::collections::BTreeSet;

use tether_domain::trace::TraceEvent;
use tether_sessions::{SessionLookup, SessionMetadataStore};

use crate::manager::{ThreadBindingManager, UnbindOptions};
use crate::messages::UnbindReason;
use crate::record::ThreadBindingTargetKind;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// ACP bindings examined.
    pub checked: usize,
    pub removed: usize,
    pub stale_session_keys: Vec<String>,
}

impl ThreadBindingManager {
    /// Drop ACP bindings whose session no longer exists.
    ///
    /// A lookup that fails to read keeps the binding: only a successful read
    /// without identity metadata marks a session stale.
    pub async fn reconcile_on_startup(
        &self,
        store: &dyn SessionMetadataStore,
        send_farewell: bool,
    ) -> ReconcileReport {
        let token = self.token();
        self.ensure_loaded().await;
        let candidates: Vec<String> = self
            .list()
            .into_iter()
            .filter(|r| r.target_kind == ThreadBindingTargetKind::Acp)
            .map(|r| r.target_session_key)
            .collect();
        let mut report = ReconcileReport {
            checked: candidates.len(),
            ..Default::default()
        };

        let keys: BTreeSet<String> = candidates.into_iter().collect();
        let mut stale = Vec::new();
        for key in keys {
            match store.lookup(&key).await {
                SessionLookup::ReadFailed { error } => {
                    tracing::warn!(
                        account_id = %self.account_id(),
                        session_key = %key,
                        error = %error,
                        "session store read failed; keeping binding"
                    );
                }
                SessionLookup::Found { identity: Some(_) } => {}
                SessionLookup::Found { identity: None } | SessionLookup::Missing => stale.push(key),
            }
        }

        if !self.is_current(token) {
            tracing::debug!(account_id = %self.account_id(), "manager reset during reconciliation; discarding");
            return report;
        }

        for key in stale {
            let mut options =
                UnbindOptions::new(UnbindReason::StaleSession).only_kind(ThreadBindingTargetKind::Acp);
            options.send_farewell = send_farewell;
            let removed = self.unbind_by_session_key(&key, options).await;
            if !removed.is_empty() {
                report.removed += removed.len();
                report.stale_session_keys.push(key);
            }
        }

        TraceEvent::BindingsReconciled {
            account_id: self.account_id().to_owned(),
            checked: report.checked,
            removed: report.removed,
        }
        .emit();
        report
    }
}
