//! Core types for the procflow kernel.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (ProcessId, ListenerId)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for the scheduler and observability

mod config;
mod errors;
mod ids;

pub use config::{Config, ObservabilityConfig, SchedulerConfig};
pub use errors::{Error, Result};
pub use ids::{ListenerId, ProcessId};
