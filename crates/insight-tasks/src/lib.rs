//! Task state, event fan-out, and the bounded-concurrency worker pool.
//!
//! Three pieces compose here:
//!
//! - [`TaskRegistry`] - per-task status, progress, bounded log ring, and a
//!   multi-subscriber event channel with bounded replay
//! - [`TaskQueue`] / [`WorkerPool`] - a priority-ordered bounded queue
//!   drained by W worker loops under per-task deadlines
//! - [`TaskDispatcher`] - the glue: a submission creates a registry entry,
//!   enqueues a pool job, and wires handler outcomes back into the registry

mod dispatch;
mod pool;
mod queue;
mod registry;

pub use dispatch::{CancelOutcome, QueueInfo, SubmitError, SubmitOutcome, TaskDispatcher};
pub use pool::{JobFn, JobFuture, JobOutcome, PoolError, PoolStats, WorkerPool, WorkerTask};
pub use queue::{QueueFullError, QueuedTaskInfo, TaskQueue};
pub use registry::{SubscribeError, Subscription, TaskRegistry};
