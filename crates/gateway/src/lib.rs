//! Tether gateway wiring.
//!
//! Hosts the runtime backend registry and session dispatcher, builds one
//! thread binding manager per configured channel account, and exposes the
//! `tether` CLI.

pub mod backends;
pub mod bootstrap;
pub mod cli;
pub mod dispatch;
pub mod state;
pub mod thread_bindings;
