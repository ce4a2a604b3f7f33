//! Process-wide tracing setup and per-task logs.
//!
//! ```no_run
//! use reel_core::config::LoggingSettings;
//! use reel_core::logging::{init_tracing, TaskLogger};
//! use reel_core::models::{Stage, TaskId};
//!
//! let _guard = init_tracing(&LoggingSettings::default());
//!
//! let logger = TaskLogger::to_file(&TaskId::new(), ".logs/tasks", 20).unwrap();
//! logger.stage_started(Stage::Story);
//! logger.done("story stage completed");
//! ```

mod task_logger;
mod types;

pub use task_logger::TaskLogger;
pub use types::{LogLevel, Marker, UnknownLevel};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Prefix of the daily rolling application log under `log_dir`.
const APP_LOG: &str = "reel.log";

/// Install the global subscriber: stderr always, plus a daily rolling file
/// when `file_logging` is on. `RUST_LOG` overrides the configured level.
///
/// Returns the file writer's guard, which must outlive the last log line.
/// `None` when there is no file or a subscriber was already installed.
pub fn init_tracing(settings: &LoggingSettings) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.directive()));

    let (file_layer, guard) = if settings.file_logging {
        let appender = tracing_appender::rolling::daily(&settings.log_dir, APP_LOG);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .ok()?;
    guard
}

/// Test subscriber: warnings and above, captured per test.
#[cfg(test)]
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_refused_quietly() {
        init_test_tracing();
        assert!(init_tracing(&LoggingSettings::default()).is_none());
    }
}
