//! # Dragonflow Core - Minimal Workflow Engine Kernel
//!
//! Rust implementation of the dragonflow workflow kernel providing:
//! - Process instance lifecycle management (RUNNING → COMPLETED | TERMINATED)
//! - Pluggable lifecycle event listeners with ordered, synchronous dispatch
//! - An async job executor (timers, continuations) with bounded concurrency
//!   and retry-with-backoff
//! - Historic process instance queries with stable, owner-scoped paging
//! - A small storage seam for instance and history persistence
//!
//! ## Architecture
//!
//! ```text
//!   start/query →  ┌─────────────────────────────────┐
//!                  │         ProcessEngine           │
//!                  │  ┌──────────┐ ┌─────────────┐   │
//!                  │  │ Instance │ │  Async Job  │   │
//!                  │  │ Manager  │ │  Executor   │   │
//!                  │  └────┬─────┘ └──────┬──────┘   │
//!                  │       │   events     │          │
//!                  │       └──► EventBus ◄┘          │
//!                  └─────────────────────────────────┘
//!                              │
//!                        InstanceStore
//! ```
//!
//! The instance manager serializes writes per instance; the executor owns
//! the job table; the bus runs listeners synchronously on the publishing
//! execution context.

// Enforce strict safety at compile time
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(rust_2018_idioms)]

// Re-export public API
pub mod bus;
pub mod engine;
pub mod events;
pub mod store;
pub mod types;

// Internal utilities
pub mod observability;
mod validation;

pub use engine::{ProcessEngine, ProcessEngineBuilder};
pub use types::{Config, Error, Result};
