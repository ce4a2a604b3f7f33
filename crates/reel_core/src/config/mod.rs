//! `reel.toml`: typed settings, the file manager that keeps it complete, and
//! the deployment environment overrides applied on top.
//!
//! # Example
//!
//! ```no_run
//! use reel_core::config::{ConfigManager, ConfigSection};
//!
//! let mut config = ConfigManager::new(".config/reel.toml");
//! let outcome = config.load_or_create().unwrap();
//! println!("{outcome:?}, story API at {}", config.settings().stages.story_url);
//!
//! config.settings_mut().queues.max_tasks_per_window = 10;
//! config.update_section(ConfigSection::Queues).unwrap();
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult, LoadOutcome};
pub use settings::{
    ConfigSection, InvalidSetting, LoggingSettings, PipelineSettings, QueueSettings,
    QueuesSettings, Settings, StageSettings, StoreSettings,
};
