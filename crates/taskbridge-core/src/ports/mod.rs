//! Ports - seams to the collaborators this adapter does not own.
//!
//! - `ArtifactStore`: object storage (download inputs, upload outputs)
//! - `EventSink`: the caller's status channel
//! - `Clock`, `IdGenerator`: time and ids, swappable in tests

pub mod artifact_store;
pub mod clock;
pub mod event_sink;
pub mod id_generator;

pub use self::artifact_store::ArtifactStore;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
