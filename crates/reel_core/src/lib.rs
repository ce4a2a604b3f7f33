//! reel core - task pipeline for story, image and video generation
//!
//! This crate contains the queues, stage workers, coordinator and task
//! store with no transport dependencies. It can be embedded in a service or
//! driven from the command line.

pub mod config;
pub mod logging;
pub mod models;
pub mod orchestrator;
pub mod queue;
pub mod service;
pub mod stages;
pub mod store;
pub mod worker;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_returns_value() {
        assert!(!version().is_empty());
    }
}
