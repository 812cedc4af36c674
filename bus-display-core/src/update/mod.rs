//! Over-the-air firmware updates: manifest check, download, flash, restart.

pub mod error;
mod manifest;
mod orchestrator;
mod scheduler;

pub use error::{FlashError, NetworkError, StateError, TransportError, UpdateError};
pub use manifest::{is_newer, ManifestRequest, VersionDescriptor};
pub use orchestrator::{UpdateOrchestrator, UpdateOutcome, UpdatePlatform, UpdateState, UpdateStatus};
pub use scheduler::UpdateScheduler;

/// Stack for the periodic and on-demand check threads. TLS and JSON
/// parsing need more than the default task stack.
pub const TASK_STACK_SIZE: usize = 8192;
