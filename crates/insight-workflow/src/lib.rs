//! Deep-interpretation generation workflow.
//!
//! Runs inside a worker slot once its task is `running` and produces one
//! committed artifact on success:
//!
//! 1. prepare the source content
//! 2. generate the outline (structured output, fatal on failure)
//! 3. generate chapters in parallel under bounded sub-concurrency, with
//!    transient-error retry
//! 4. generate the conclusion
//! 5. assemble deterministically by chapter id and commit
//!
//! Cancellation is observed at every phase boundary and inside every LM
//! call; a cancelled run commits nothing.

mod prompts;
mod retry;
mod workflow;

pub use retry::{RetryError, RetryPolicy};
pub use workflow::{GenerationWorkflow, WorkflowConfig};
