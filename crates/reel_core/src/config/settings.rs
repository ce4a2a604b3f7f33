//! Everything reel reads from `reel.toml`.
//!
//! One struct per TOML table; every field has a serde default so a partial
//! file still loads. `ConfigSection` names the tables for targeted rewrites.

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;

/// The whole file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Queue policies and admission control.
    #[serde(default)]
    pub queues: QueuesSettings,

    /// External generation endpoints.
    #[serde(default)]
    pub stages: StageSettings,

    /// Coordinator behaviour.
    #[serde(default)]
    pub pipeline: PipelineSettings,

    /// Task record persistence.
    #[serde(default)]
    pub store: StoreSettings,

    /// Process log and per-task logs.
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Policies of a single queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Total tries per job, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Base delay of the exponential backoff between attempts.
    #[serde(default = "default_backoff_delay_ms")]
    pub backoff_delay_ms: u64,

    /// Jobs processed at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_true")]
    pub remove_on_complete: bool,

    #[serde(default)]
    pub remove_on_fail: bool,
}

fn default_attempts() -> u32 {
    3
}

fn default_backoff_delay_ms() -> u64 {
    1000
}

fn default_concurrency() -> usize {
    1
}

fn default_true() -> bool {
    true
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            backoff_delay_ms: default_backoff_delay_ms(),
            concurrency: default_concurrency(),
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

/// All queues plus intake admission control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuesSettings {
    /// Tasks allowed to start per limiter window.
    #[serde(default = "default_max_tasks_per_window")]
    pub max_tasks_per_window: u32,

    #[serde(default = "default_limiter_window_ms")]
    pub limiter_window_ms: u64,

    /// Task intake. A retried intake job would run the coordinator again
    /// from the first stage, so it defaults to a single attempt.
    #[serde(default = "default_intake_queue")]
    pub intake: QueueSettings,

    #[serde(default)]
    pub story: QueueSettings,

    #[serde(default)]
    pub images: QueueSettings,

    #[serde(default)]
    pub video: QueueSettings,
}

fn default_max_tasks_per_window() -> u32 {
    5
}

fn default_limiter_window_ms() -> u64 {
    1000
}

fn default_intake_queue() -> QueueSettings {
    QueueSettings {
        attempts: 1,
        ..QueueSettings::default()
    }
}

impl Default for QueuesSettings {
    fn default() -> Self {
        Self {
            max_tasks_per_window: default_max_tasks_per_window(),
            limiter_window_ms: default_limiter_window_ms(),
            intake: default_intake_queue(),
            story: QueueSettings::default(),
            images: QueueSettings::default(),
            video: QueueSettings::default(),
        }
    }
}

/// External generation APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    /// Use in-process mock generators instead of HTTP.
    #[serde(default = "default_true")]
    pub mock: bool,

    /// Simulated latency of each mock call.
    #[serde(default)]
    pub mock_delay_ms: u64,

    #[serde(default = "default_story_url")]
    pub story_url: String,

    #[serde(default = "default_image_url")]
    pub image_url: String,

    /// Base URL; the task id is appended as a path segment.
    #[serde(default = "default_video_url")]
    pub video_url: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_story_url() -> String {
    "http://localhost:8001/generate-story".to_string()
}

fn default_image_url() -> String {
    "http://localhost:8002/generate-images".to_string()
}

fn default_video_url() -> String {
    "http://localhost:8003/generate-video".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            mock: true,
            mock_delay_ms: 0,
            story_url: default_story_url(),
            image_url: default_image_url(),
            video_url: default_video_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Coordinator settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Fail a stage that has not terminated after this long.
    /// Absent means wait indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,
}

/// Task record persistence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// JSON file holding every task record. Absent keeps records in memory only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is not set.
    #[serde(default)]
    pub level: LogLevel,

    /// Root for the rolling log and the `tasks/` subfolder.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Also write a daily rolling log file into `log_dir`.
    #[serde(default)]
    pub file_logging: bool,

    /// Write one log file per task under `log_dir/tasks`.
    #[serde(default)]
    pub task_logs: bool,

    /// Number of lines replayed when a task fails.
    #[serde(default = "default_error_tail")]
    pub error_tail: u32,
}

fn default_log_dir() -> String {
    ".logs".to_string()
}

fn default_error_tail() -> u32 {
    20
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            log_dir: default_log_dir(),
            file_logging: false,
            task_logs: false,
            error_tail: default_error_tail(),
        }
    }
}

/// Problems found by [`Settings::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidSetting {
    pub key: &'static str,
    pub message: String,
}

impl std::fmt::Display for InvalidSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

impl Settings {
    /// Apply the deployment environment variables on top of file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("STORY_GENERATION_API_URL") {
            self.stages.story_url = url;
        }
        if let Some(url) = lookup("IMAGE_GENERATION_API_URL") {
            self.stages.image_url = url;
        }
        if let Some(url) = lookup("VIDEO_GENERATION_API_URL") {
            self.stages.video_url = url;
        }
        if let Some(raw) = lookup("MAX_CONCURRENT_TASKS") {
            match raw.trim().parse::<u32>() {
                Ok(max) => self.queues.max_tasks_per_window = max,
                Err(_) => {
                    tracing::warn!(value = %raw, "Ignoring non-numeric MAX_CONCURRENT_TASKS")
                }
            }
        }
        if let Some(raw) = lookup("REEL_LOG_LEVEL") {
            match raw.parse::<LogLevel>() {
                Ok(level) => self.logging.level = level,
                Err(e) => tracing::warn!("Ignoring REEL_LOG_LEVEL: {}", e),
            }
        }
    }

    /// Check values that deserialize fine but cannot be run.
    pub fn validate(&self) -> Result<(), Vec<InvalidSetting>> {
        let mut problems = Vec::new();

        let queues = [
            ("queues.intake", &self.queues.intake),
            ("queues.story", &self.queues.story),
            ("queues.images", &self.queues.images),
            ("queues.video", &self.queues.video),
        ];
        for (key, queue) in queues {
            if queue.attempts == 0 {
                problems.push(InvalidSetting {
                    key,
                    message: "attempts must be at least 1".to_string(),
                });
            }
            if queue.concurrency == 0 {
                problems.push(InvalidSetting {
                    key,
                    message: "concurrency must be at least 1".to_string(),
                });
            }
        }
        if self.queues.max_tasks_per_window == 0 {
            problems.push(InvalidSetting {
                key: "queues.max_tasks_per_window",
                message: "must be at least 1".to_string(),
            });
        }
        if self.queues.limiter_window_ms == 0 {
            problems.push(InvalidSetting {
                key: "queues.limiter_window_ms",
                message: "must be at least 1".to_string(),
            });
        }

        if !self.stages.mock {
            let urls = [
                ("stages.story_url", &self.stages.story_url),
                ("stages.image_url", &self.stages.image_url),
                ("stages.video_url", &self.stages.video_url),
            ];
            for (key, url) in urls {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    problems.push(InvalidSetting {
                        key,
                        message: format!("'{url}' is not an http(s) URL"),
                    });
                }
            }
        }

        if self.pipeline.stage_timeout_secs == Some(0) {
            problems.push(InvalidSetting {
                key: "pipeline.stage_timeout_secs",
                message: "must be positive when set".to_string(),
            });
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// The top-level tables, in file order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigSection {
    Queues,
    Stages,
    Pipeline,
    Store,
    Logging,
}

impl ConfigSection {
    pub const ALL: [ConfigSection; 5] = [
        ConfigSection::Queues,
        ConfigSection::Stages,
        ConfigSection::Pipeline,
        ConfigSection::Store,
        ConfigSection::Logging,
    ];

    /// Key of the table in the file.
    pub fn table_name(&self) -> &'static str {
        match self {
            ConfigSection::Queues => "queues",
            ConfigSection::Stages => "stages",
            ConfigSection::Pipeline => "pipeline",
            ConfigSection::Store => "store",
            ConfigSection::Logging => "logging",
        }
    }

    /// Comment written above the section in generated files.
    pub fn description(&self) -> &'static str {
        match self {
            ConfigSection::Queues => "Queue retry policy, concurrency and task admission control",
            ConfigSection::Stages => "External generation APIs (mock = true uses in-process stubs)",
            ConfigSection::Pipeline => "Coordinator behaviour",
            ConfigSection::Store => "Task record persistence",
            ConfigSection::Logging => "Process log level and log files",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_render_every_table() {
        let settings = Settings::default();
        let toml = toml::to_string_pretty(&settings).unwrap();
        assert!(toml.contains("[queues.intake]"));
        assert!(toml.contains("[stages]"));
        assert!(toml.contains("story_url"));
        // Unset optional values are omitted.
        assert!(!toml.contains("stage_timeout_secs"));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let minimal = "[queues.story]\nattempts = 5\n\n[pipeline]\nstage_timeout_secs = 30\n";
        let parsed: Settings = toml::from_str(minimal).unwrap();
        assert_eq!(parsed.queues.story.attempts, 5);
        assert_eq!(parsed.queues.story.backoff_delay_ms, 1000);
        assert_eq!(parsed.queues.intake.attempts, 1);
        assert_eq!(parsed.queues.max_tasks_per_window, 5);
        assert_eq!(parsed.pipeline.stage_timeout_secs, Some(30));
        assert!(parsed.stages.mock);
    }

    #[test]
    fn env_overrides_replace_urls_and_admission_limit() {
        let mut settings = Settings::default();
        settings.apply_overrides(|key| match key {
            "STORY_GENERATION_API_URL" => Some("http://story:9000/run".to_string()),
            "MAX_CONCURRENT_TASKS" => Some("12".to_string()),
            _ => None,
        });
        assert_eq!(settings.stages.story_url, "http://story:9000/run");
        assert_eq!(settings.stages.image_url, default_image_url());
        assert_eq!(settings.queues.max_tasks_per_window, 12);

        settings.apply_overrides(|key| (key == "MAX_CONCURRENT_TASKS").then(|| "lots".to_string()));
        assert_eq!(settings.queues.max_tasks_per_window, 12);

        settings.apply_overrides(|key| (key == "REEL_LOG_LEVEL").then(|| "Debug".to_string()));
        assert_eq!(settings.logging.level, LogLevel::Debug);
    }

    #[test]
    fn validate_reports_every_problem() {
        assert!(Settings::default().validate().is_ok());

        let mut settings = Settings::default();
        settings.queues.video.attempts = 0;
        settings.stages.mock = false;
        settings.stages.image_url = "ftp://images".to_string();
        settings.pipeline.stage_timeout_secs = Some(0);

        let problems = settings.validate().unwrap_err();
        let keys: Vec<_> = problems.iter().map(|p| p.key).collect();
        assert_eq!(
            keys,
            vec!["queues.video", "stages.image_url", "pipeline.stage_timeout_secs"]
        );
    }
}
