//! Domain model (IDs, requests, states, events, artifacts, invocations).

pub mod artifact;
pub mod events;
pub mod ids;
pub mod invocation;
pub mod request;
pub mod state;

pub use artifact::{ArtifactRole, DiagnosticFile, OutputArtifact, StagedInput};
pub use events::StatusEvent;
pub use ids::{RunId, TaskId, UserId};
pub use invocation::{CapturedOutput, EngineLauncher, InvocationSpec, ProcessResult};
pub use request::{InputRef, TaskMessage, TaskRequest};
pub use state::TaskState;
