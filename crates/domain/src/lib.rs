//! # Busline Domain
//!
//! Pure data shared by every busline crate.
//!
//! This crate contains:
//! - [`BusError`], the single error type flowing through links, RPC,
//!   settlement and receive
//! - Recovery vocabulary ([`RecoveryKind`], [`LinkId`])
//! - The AMQP message model ([`Value`], [`Message`], [`ReceivedMessage`])
//! - Settlement values ([`Disposition`], [`DispositionStatus`])
//! - Entity addressing ([`Entity`], [`SubQueue`])
//! - Configuration structures and wire constants
//!
//! ## Architecture
//! - Depends only on `busline-common` for the cancellation error type
//! - No I/O, no tasks, no locks

pub mod config;
pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
