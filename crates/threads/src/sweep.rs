//! Batched idle / max-age expiry.
//!
//! One timer per manager walks the whole table; bindings never get their
//! own timers.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use tether_domain::trace::TraceEvent;

use crate::manager::{ThreadBindingManager, UnbindOptions};
use crate::messages::UnbindReason;
use crate::record::ThreadBindingRecord;

/// A binding removed by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredBinding {
    pub record: ThreadBindingRecord,
    pub reason: UnbindReason,
}

impl ThreadBindingManager {
    /// Remove every binding that is past its idle or max-age deadline at
    /// `now`.  A no-op once the manager is disposed.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Vec<ExpiredBinding> {
        if self.is_disposed() {
            return Vec::new();
        }
        self.ensure_loaded().await;

        let expired: Vec<ExpiredBinding> = self.with_table(|t| {
            let due: Vec<(String, UnbindReason)> = t
                .records()
                .filter_map(|r| r.expiry_reason(now).map(|why| (r.thread_id.clone(), why)))
                .collect();
            due.into_iter()
                .filter_map(|(thread, reason)| {
                    t.remove(&thread).map(|record| ExpiredBinding { record, reason })
                })
                .collect()
        });
        if expired.is_empty() {
            return expired;
        }

        let idle_expired = expired
            .iter()
            .filter(|e| e.reason == UnbindReason::IdleExpired)
            .count();
        TraceEvent::BindingsSwept {
            account_id: self.account_id().to_owned(),
            idle_expired,
            max_age_expired: expired.len() - idle_expired,
        }
        .emit();

        let send_farewell = self.policy().farewell_on_expiry;
        for reason in [UnbindReason::IdleExpired, UnbindReason::MaxAgeExpired] {
            let batch: Vec<ThreadBindingRecord> = expired
                .iter()
                .filter(|e| e.reason == reason)
                .map(|e| e.record.clone())
                .collect();
            let mut options = UnbindOptions::new(reason);
            options.send_farewell = send_farewell;
            self.after_removal(&batch, &options).await;
        }
        expired
    }

    /// Start the periodic sweep on the current runtime.  Returns `false`
    /// when already running, disposed, or the interval is zero.
    pub fn start_sweeper(&self) -> bool {
        let period_ms = self.policy().sweep_interval_ms;
        if self.is_disposed() || period_ms == 0 {
            return false;
        }
        let mut slot = self.inner.sweeper.lock();
        if slot.is_some() {
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let period = Duration::from_millis(period_ms);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                // The abort in dispose can lose the race with a tick that
                // is already running.
                if inner.disposed.load(Ordering::SeqCst) {
                    break;
                }
                let manager = ThreadBindingManager { inner };
                let expired = manager.sweep(Utc::now()).await;
                if !expired.is_empty() {
                    tracing::debug!(
                        account_id = %manager.account_id(),
                        count = expired.len(),
                        "sweep removed bindings"
                    );
                }
            }
        }));
        tracing::debug!(
            channel = %self.channel(),
            account_id = %self.account_id(),
            period_ms,
            "binding sweeper started"
        );
        true
    }
}
