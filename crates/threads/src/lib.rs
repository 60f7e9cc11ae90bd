//! Thread binding lifecycle for thread-based channels.
//!
//! One [`ThreadBindingManager`] per channel account owns the durable table
//! of bound threads: spawn-time auto-binding, idle and max-age expiry,
//! startup reconciliation against the session store, and intro/farewell
//! messages.  [`ThreadBindingAdapter`] exposes a manager to the generic
//! binding service.

pub mod adapter;
pub mod manager;
pub mod messages;
pub mod persist;
pub mod platform;
pub mod reconcile;
pub mod record;
pub mod sweep;

pub use adapter::ThreadBindingAdapter;
pub use manager::{BindTargetRequest, SpawnBindRequest, ThreadBindingManager, UnbindOptions};
pub use messages::UnbindReason;
pub use persist::BindingFile;
pub use platform::{NullPlatform, ThreadPlatform};
pub use reconcile::ReconcileReport;
pub use record::{ThreadBindingRecord, ThreadBindingTargetKind};
pub use sweep::ExpiredBinding;
