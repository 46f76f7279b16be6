//! Topic consumers of the job pipeline.
//!
//! - `JobProcessor` handles *job-created*: model call, then publishes the
//!   finished job on *job-status-updated*
//! - `UpdateApplier` handles *job-status-updated*: writes the terminal state to
//!   the primary store and the search index

pub mod applier;
pub mod processor;

pub use applier::{ApplyError, ApplyOutcome, UpdateApplier};
pub use processor::{DEFAULT_MODEL_TIMEOUT, JobProcessor, ProcessorError};
