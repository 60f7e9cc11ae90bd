//! Per-account thread binding managers owned by the gateway.

use std::collections::HashMap;

use parking_lot::RwLock;

use tether_domain::binding::adapter_key;
use tether_threads::ThreadBindingManager;

/// Managers keyed by `channel:account`.
#[derive(Default)]
pub struct ThreadBindingRegistry {
    managers: RwLock<HashMap<String, ThreadBindingManager>>,
}

impl ThreadBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a manager, returning the one it displaced.
    pub fn insert(&self, manager: ThreadBindingManager) -> Option<ThreadBindingManager> {
        let key = adapter_key(manager.channel(), manager.account_id());
        self.managers.write().insert(key, manager)
    }

    pub fn get(&self, channel: &str, account_id: &str) -> Option<ThreadBindingManager> {
        self.managers
            .read()
            .get(&adapter_key(channel, account_id))
            .cloned()
    }

    /// All managers, sorted by `channel:account`.
    pub fn list(&self) -> Vec<ThreadBindingManager> {
        let managers = self.managers.read();
        let mut keys: Vec<&String> = managers.keys().collect();
        keys.sort();
        keys.into_iter().map(|k| managers[k].clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.managers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.read().is_empty()
    }

    /// Start every manager's sweeper.  Returns how many started.
    pub fn start_sweepers(&self) -> usize {
        self.list().iter().filter(|m| m.start_sweeper()).count()
    }

    /// Dispose every manager, flushing its table.  Failures are logged and
    /// the remaining managers are still disposed.
    pub async fn dispose_all(&self) {
        for manager in self.list() {
            if let Err(e) = manager.dispose().await {
                tracing::warn!(
                    channel = %manager.channel(),
                    account_id = %manager.account_id(),
                    error = %e,
                    "failed to flush thread bindings on shutdown"
                );
            }
        }
    }
}
