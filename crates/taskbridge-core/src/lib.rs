//! taskbridge-core
//!
//! Task-execution adapter between a task queue and an external engine
//! delivered as an opaque executable.
//!
//! # Modules
//! - **domain**: ids, requests, lifecycle states, status events, artifacts, invocations
//! - **error**: the five-kind error taxonomy and collaborator errors
//! - **ports**: seams to storage, the event channel, time and ids
//! - **impls**: local storage and event sinks (CLI and tests)
//! - **config**: TOML configuration with environment overrides
//! - **retry**: per-operation backoff for storage and terminal events
//! - **pipeline**: validator, stager, runner, collector, reporter and the adapter state machine
//! - **queue**: consumer-side queue port and an in-memory implementation
//! - **worker**: concurrent execution slots with cancellation by task id

pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod pipeline;
pub mod ports;
pub mod queue;
pub mod retry;
pub mod worker;

pub use config::AdapterConfig;
pub use error::{AdapterError, ErrorKind, TaskError};
pub use pipeline::{TaskAdapter, TaskOutcome};
