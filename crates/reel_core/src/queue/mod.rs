//! In-process job queues and their completion events.
//!
//! This module provides:
//! - `JobQueue`: ordered jobs with bounded concurrency, exponential-backoff
//!   retry, retention and an optional admission rate limiter
//! - `EventBus`: per-job completion waiters plus a broadcast of every
//!   terminal event
//! - `QueueSet`: the intake queue and one queue per stage
//! - Statistics snapshots for operational tooling

mod errors;
mod events;
mod job;
mod options;
#[allow(clippy::module_inception)]
mod queue;
mod set;
mod stats;

pub use errors::{QueueError, QueueResult};
pub use events::{CompletionWaiter, EventBus, JobOutcome, StageEvent, WaitError};
pub use job::{Job, JobHandle, JobId, JobState};
pub use options::{Backoff, QueueOptions, RateLimit};
pub use queue::{Claim, FailDisposition, JobQueue, Obliterated};
pub use set::QueueSet;
pub use stats::{JobCounts, PipelineStats, QueueStats};
