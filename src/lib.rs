//! # Procflow Core - Resumable Process Lifecycle Kernel
//!
//! Rust implementation of a process lifecycle core providing:
//! - A formal process state machine (CREATED/RUNNING/WAITING/STOPPED/FAILED)
//! - Suspension on externally-resolved conditions with named continuations
//! - Typed, versioned checkpointing and restore of in-flight processes
//! - A pause/play/abort control surface, including cross-thread abort
//! - Lifecycle event broadcasting to listeners and topic subscribers
//!
//! ## Architecture
//!
//! Execution follows a single-actor model where the `EventLoop` owns all
//! mutable process state:
//! ```text
//!                    ┌─────────────────────────────────┐
//!   LoopRemote    →  │        EventLoop (actor)        │
//!   (other threads)  │  ┌─────────┐ ┌─────────┐        │
//!                    │  │ Process │ │ Process │  ...   │
//!                    │  │  state  │ │  state  │        │
//!                    │  │ machine │ │ machine │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    │  ┌─────────┐ ┌─────────┐        │
//!                    │  │ Monitor │ │ Factory │        │
//!                    │  └─────────┘ └─────────┘        │
//!                    └─────────────────────────────────┘
//! ```
//!
//! Processes run cooperatively as queued tasks; readiness callbacks and
//! listener notifications only ever enqueue further tasks.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod bundle;
pub mod factory;
pub mod listener;
pub mod monitor;
pub mod process;
pub mod sched;
pub mod spec;
pub mod state;
pub mod types;
pub mod wait;

// Internal utilities
pub mod observability;

pub use bundle::{ProcessRecord, StateRecord, WaitOnRecord, BUNDLE_VERSION};
pub use factory::ProcessFactory;
pub use listener::{ListenScope, ProcessListener};
pub use monitor::ProcessMonitor;
pub use process::{
    HookContext, Outcome, Process, ProcessContext, ProcessLogic, ProcessRef, WaitDescriptor,
};
pub use sched::{Completion, EventLoop, LoopRemote, Message};
pub use spec::{PortMap, PortSpec, ProcessSpec, ValueType};
pub use state::{RunEntry, StateLabel};
pub use types::{Config, Error, ListenerId, ProcessId, Result};
pub use wait::{SignalWaitOn, WaitOn};
