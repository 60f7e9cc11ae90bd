use crate::binding::BindingPlacement;

/// Shared error type used across all Tether crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Binding service errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Structured failures raised by `bind`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// No adapter is registered for the channel/account pair.
    #[error("session binding adapter unavailable for {channel}:{account_id}")]
    AdapterUnavailable { channel: String, account_id: String },

    /// The adapter exists but refuses this operation or placement.
    #[error("session binding unsupported for {channel}:{account_id}{}", placement_suffix(.placement))]
    CapabilityUnsupported {
        channel: String,
        account_id: String,
        placement: Option<BindingPlacement>,
    },

    /// The adapter attempted the bind and produced nothing.
    #[error("session binding creation failed for {channel}:{account_id}{}", reason_suffix(.reason))]
    CreateFailed {
        channel: String,
        account_id: String,
        reason: Option<String>,
    },
}

impl BindingError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AdapterUnavailable { .. } => "BINDING_ADAPTER_UNAVAILABLE",
            Self::CapabilityUnsupported { .. } => "BINDING_CAPABILITY_UNSUPPORTED",
            Self::CreateFailed { .. } => "BINDING_CREATE_FAILED",
        }
    }
}

fn placement_suffix(placement: &Option<BindingPlacement>) -> String {
    match placement {
        Some(p) => format!(" (placement: {p})"),
        None => String::new(),
    }
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(": {r}"),
        None => String::new(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime backend errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failures raised when a caller requires a runtime backend.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Nothing registered (or nothing under the requested id).
    #[error("runtime backend is not configured{}", requested_suffix(.requested))]
    Missing { requested: Option<String> },

    /// A backend is registered but its health probe fails.
    #[error("runtime backend \"{id}\" is currently unavailable; try again in a moment")]
    Unavailable { id: String },

    /// An explicit id was requested but a different backend was resolved.
    #[error("runtime backend \"{requested}\" is not registered (resolved \"{resolved}\")")]
    NotRegistered { requested: String, resolved: String },
}

impl BackendError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Missing { .. } | Self::NotRegistered { .. } => "ACP_BACKEND_MISSING",
            Self::Unavailable { .. } => "ACP_BACKEND_UNAVAILABLE",
        }
    }
}

fn requested_suffix(requested: &Option<String>) -> String {
    match requested {
        Some(id) => format!(" (requested \"{id}\")"),
        None => String::new(),
    }
}
