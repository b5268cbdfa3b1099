//! # Busline Infrastructure
//!
//! Process-level setup for applications embedding the busline client.
//!
//! This crate contains:
//! - Configuration loading from `BUSLINE_*` variables or TOML/JSON files
//! - Installation of the `tracing` subscriber
//!
//! ## Architecture
//! - Depends on `busline-domain` for configuration types and errors
//! - Contains the "impure" code (environment, filesystem, global logger)

pub mod config;
pub mod observability;

// Re-export commonly used items
pub use config::{load, load_from_env, load_from_file, probe_config_paths};
pub use observability::init_tracing;
