//! Levels and line markers shared by the process log and task logs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default verbosity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    /// Directive understood by `EnvFilter`.
    pub fn directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown log level '{0}' (expected trace, debug, info, warn or error)")]
pub struct UnknownLevel(pub String);

impl FromStr for LogLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|level| level.directive() == wanted)
            .ok_or_else(|| UnknownLevel(s.to_string()))
    }
}

/// Leading tag of a task log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// A stage begins: `>> story`
    Stage,
    /// `[done]`
    Done,
    /// `[warn]`
    Warn,
    /// `[fail]`
    Fail,
    /// Untagged
    Plain,
}

impl Marker {
    pub fn apply(self, text: &str) -> String {
        match self {
            Marker::Stage => format!(">> {text}"),
            Marker::Done => format!("[done] {text}"),
            Marker::Warn => format!("[warn] {text}"),
            Marker::Fail => format!("[fail] {text}"),
            Marker::Plain => text.to_string(),
        }
    }

    /// Level the line is mirrored to `tracing` at.
    pub fn level(self) -> LogLevel {
        match self {
            Marker::Warn => LogLevel::Warn,
            Marker::Fail => LogLevel::Error,
            Marker::Stage | Marker::Done | Marker::Plain => LogLevel::Info,
        }
    }
}
