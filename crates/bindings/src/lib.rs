//! Generic conversation ↔ session binding service.
//!
//! Defines the [`SessionBindingAdapter`] contract channel integrations
//! implement and the [`SessionBindingService`] that routes and fans out
//! binding operations across them.

pub mod adapter;
pub mod service;

pub use adapter::{BindInput, BindRequest, SessionBindingAdapter, UnbindInput};
pub use service::SessionBindingService;
