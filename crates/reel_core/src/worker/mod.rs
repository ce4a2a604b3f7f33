//! Workers consuming the job queues.
//!
//! - `StageWorker`: one per stage; calls the generation API and records the
//!   attempt's outcome on the task
//! - `IntakeWorker`: runs the coordinator for each admitted task
//! - `run_worker` / `spawn_worker`: the claim, process and report loop

mod errors;
mod intake;
mod runner;
mod stage;

pub use errors::WorkerError;
pub use intake::IntakeWorker;
pub use runner::{run_worker, spawn_worker, JobProcessor};
pub use stage::StageWorker;
