//! Shared types for the Tether binding core.
//!
//! Everything that more than one crate needs to agree on lives here: the
//! channel-agnostic binding model, the error taxonomy, structured trace
//! events and the TOML configuration.

pub mod binding;
pub mod config;
pub mod error;
pub mod trace;
