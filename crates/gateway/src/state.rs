use std::sync::Arc;

use tether_bindings::SessionBindingService;
use tether_domain::config::Config;
use tether_sessions::SessionStore;

use crate::backends::BackendRegistry;
use crate::dispatch::SessionDispatcher;
use crate::thread_bindings::ThreadBindingRegistry;

/// Shared gateway state.
///
/// Fields are grouped by concern:
/// - **Core** — config
/// - **Sessions** — session store, backends, dispatcher
/// - **Bindings** — generic binding service and the thread managers behind it
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,

    // ── Sessions ──────────────────────────────────────────────────────
    pub sessions: Arc<SessionStore>,
    /// Runtime backends registered by plugins.
    pub backends: Arc<BackendRegistry>,
    pub dispatcher: Arc<SessionDispatcher>,

    // ── Bindings ──────────────────────────────────────────────────────
    pub bindings: Arc<SessionBindingService>,
    /// One lifecycle manager per configured channel account.
    pub thread_bindings: Arc<ThreadBindingRegistry>,
}
