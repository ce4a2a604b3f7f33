//! Pipeline coordination.
//!
//! This module provides:
//! - `PipelineContext`: the store, queues and settings shared by every part
//! - `Coordinator`: runs one task's stages in order
//! - `PipelineRuntime`: starts the intake and stage workers
//! - `PipelineError`: why a task run stopped

mod context;
mod coordinator;
mod errors;
mod runtime;

pub use context::PipelineContext;
pub use coordinator::Coordinator;
pub use errors::{PipelineError, PipelineResult};
pub use runtime::PipelineRuntime;
