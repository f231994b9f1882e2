//! Impls - port implementations for local runs and tests.
//!
//! - **LocalArtifactStore**: storage rooted at a directory
//! - **InMemoryEventSink**: collects events in memory
//! - **JsonLinesEventSink**: appends events to a file
//!
//! Network-backed storage and broker channels implement the same ports
//! outside this crate.

pub mod jsonl_sink;
pub mod local_store;
pub mod memory_sink;

pub use self::jsonl_sink::JsonLinesEventSink;
pub use self::local_store::LocalArtifactStore;
pub use self::memory_sink::InMemoryEventSink;
