//! The task pipeline.
//!
//! validator -> stager -> runner -> collector, driven by the adapter, with
//! the reporter publishing every state change.

pub mod adapter;
pub mod collector;
pub mod reporter;
pub mod runner;
pub mod stager;
pub mod validator;
pub mod workspace;

pub use adapter::{TaskAdapter, TaskContext, TaskOutcome};
pub use collector::OutputCollector;
pub use reporter::{StatusReporter, TerminalReport, TransitionError};
pub use runner::{ProcessRunner, run_bounded};
pub use stager::InputStager;
pub use validator::{parse_message, validate};
pub use workspace::Workspace;
