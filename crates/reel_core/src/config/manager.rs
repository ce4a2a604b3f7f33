//! Reading and writing the settings file.
//!
//! The file is always replaced atomically (temp file in the same directory,
//! then rename). `update_section` edits one table through `toml_edit` and
//! keeps the rest of the file exactly as it is on disk.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item};

use super::settings::{ConfigSection, InvalidSetting, Settings};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot access config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid TOML in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Cannot edit {}: {source}", .path.display())]
    Edit {
        path: PathBuf,
        #[source]
        source: toml_edit::TomlError,
    },

    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid settings: {}", join_problems(.0))]
    Invalid(Vec<InvalidSetting>),
}

fn join_problems(problems: &[InvalidSetting]) -> String {
    problems
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// What `load_or_create` found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No file existed; defaults were written.
    Created,
    /// The file was complete and was left untouched.
    Loaded,
    /// Missing keys were filled in or unknown sections dropped, and the
    /// file was rewritten.
    Normalized,
}

/// Owns the settings file and the settings read from it.
pub struct ConfigManager {
    path: PathBuf,
    settings: Settings,
}

impl ConfigManager {
    /// Manager for `path`, holding defaults until something is loaded.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            settings: Settings::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// In-memory only until `save` or `update_section`.
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// Read and validate an existing file.
    pub fn load(&mut self) -> ConfigResult<()> {
        let text = self
            .read()?
            .ok_or_else(|| ConfigError::NotFound(self.path.clone()))?;
        let settings: Settings = self.parse(&text)?;
        settings.validate().map_err(ConfigError::Invalid)?;
        self.settings = settings;
        Ok(())
    }

    /// Read the file, writing defaults if it is absent and rewriting it when
    /// it differs from the complete form of its own values.
    pub fn load_or_create(&mut self) -> ConfigResult<LoadOutcome> {
        let Some(text) = self.read()? else {
            self.settings = Settings::default();
            self.save()?;
            tracing::info!(path = %self.path.display(), "Created default config");
            return Ok(LoadOutcome::Created);
        };

        let settings: Settings = self.parse(&text)?;
        settings.validate().map_err(ConfigError::Invalid)?;
        let stale = self.is_incomplete(&text, &settings)?;
        self.settings = settings;

        if !stale {
            return Ok(LoadOutcome::Loaded);
        }
        self.save()?;
        tracing::info!(path = %self.path.display(), "Rewrote config with defaults filled in");
        Ok(LoadOutcome::Normalized)
    }

    /// Write every section, each under its description comment.
    pub fn save(&self) -> ConfigResult<()> {
        let mut output = String::from(
            "# reel configuration\n# Generated file; section updates keep your comments elsewhere.\n\n",
        );
        for section in ConfigSection::ALL {
            let _ = writeln!(output, "# {}", section.description());
            output.push_str(&section_toml(&self.settings, section)?);
            output.push('\n');
        }
        self.write_atomically(&output)
    }

    /// Replace one table in the file on disk with the in-memory values.
    pub fn update_section(&mut self, section: ConfigSection) -> ConfigResult<()> {
        let mut doc = match self.read()? {
            Some(text) => self.edit_document(&text)?,
            None => DocumentMut::new(),
        };

        let name = section.table_name();
        let fresh = self.edit_document(&section_toml(&self.settings, section)?)?;
        doc[name] = fresh
            .get(name)
            .cloned()
            .unwrap_or_else(|| Item::Table(toml_edit::Table::new()));

        self.write_atomically(&doc.to_string())?;
        tracing::debug!(section = name, "Config section updated");
        Ok(())
    }

    /// File contents, or `None` if there is no file.
    fn read(&self) -> ConfigResult<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(self.io_error(source)),
        }
    }

    fn parse<T: serde::de::DeserializeOwned>(&self, text: &str) -> ConfigResult<T> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn edit_document(&self, text: &str) -> ConfigResult<DocumentMut> {
        text.parse().map_err(|source| ConfigError::Edit {
            path: self.path.clone(),
            source,
        })
    }

    /// Whether `text` lacks keys, or has sections, compared with `settings`.
    ///
    /// Compares parsed values, so comments and key order never count.
    fn is_incomplete(&self, text: &str, settings: &Settings) -> ConfigResult<bool> {
        let on_disk: toml::Table = self.parse(text)?;
        let unknown = on_disk
            .keys()
            .any(|key| !ConfigSection::ALL.iter().any(|s| s.table_name() == key));
        let complete = prune_empty(toml::Value::try_from(settings)?);
        Ok(unknown || complete != prune_empty(toml::Value::Table(on_disk)))
    }

    fn write_atomically(&self, content: &str) -> ConfigResult<()> {
        let temp = self.path.with_extension("toml.tmp");
        let write = || -> io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&temp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp, &self.path)
        };
        write().map_err(|source| self.io_error(source))
    }

    fn io_error(&self, source: io::Error) -> ConfigError {
        ConfigError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

/// Drop empty tables, which the writer may or may not emit.
fn prune_empty(value: toml::Value) -> toml::Value {
    match value {
        toml::Value::Table(table) => toml::Value::Table(
            table
                .into_iter()
                .map(|(key, value)| (key, prune_empty(value)))
                .filter(|(_, value)| !matches!(value, toml::Value::Table(t) if t.is_empty()))
                .collect(),
        ),
        other => other,
    }
}

/// One section serialized under its table name, subtables included.
fn section_toml(settings: &Settings, section: ConfigSection) -> ConfigResult<String> {
    let value = match section {
        ConfigSection::Queues => toml::Value::try_from(&settings.queues)?,
        ConfigSection::Stages => toml::Value::try_from(&settings.stages)?,
        ConfigSection::Pipeline => toml::Value::try_from(&settings.pipeline)?,
        ConfigSection::Store => toml::Value::try_from(&settings.store)?,
        ConfigSection::Logging => toml::Value::try_from(&settings.logging)?,
    };
    let mut table = toml::Table::new();
    table.insert(section.table_name().to_string(), value);
    Ok(toml::to_string_pretty(&table)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_then_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".config").join("reel.toml");

        let mut manager = ConfigManager::new(&path);
        assert_eq!(manager.load_or_create().unwrap(), LoadOutcome::Created);

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[queues.intake]"));
        assert!(content.contains("[logging]"));
        assert!(content.contains("# Task record persistence"));

        let mut again = ConfigManager::new(&path);
        assert_eq!(again.load_or_create().unwrap(), LoadOutcome::Loaded);
        assert_eq!(again.settings(), manager.settings());
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn partial_file_is_completed_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reel.toml");
        fs::write(&path, "[stages]\nmock = false\nstory_url = \"http://story:1/run\"\n").unwrap();

        let mut manager = ConfigManager::new(&path);
        assert_eq!(manager.load_or_create().unwrap(), LoadOutcome::Normalized);
        assert!(!manager.settings().stages.mock);
        assert_eq!(manager.settings().stages.story_url, "http://story:1/run");

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[queues.video]"));
        assert!(content.contains("story_url = \"http://story:1/run\""));
    }

    #[test]
    fn unknown_sections_are_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reel.toml");
        ConfigManager::new(&path).load_or_create().unwrap();
        let mut content = fs::read_to_string(&path).unwrap();
        content.push_str("\n[legacy]\nenabled = true\n");
        fs::write(&path, content).unwrap();

        let mut manager = ConfigManager::new(&path);
        assert_eq!(manager.load_or_create().unwrap(), LoadOutcome::Normalized);
        assert!(!fs::read_to_string(&path).unwrap().contains("[legacy]"));
    }

    #[test]
    fn load_reports_problems() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reel.toml");

        let mut manager = ConfigManager::new(&path);
        assert!(matches!(manager.load(), Err(ConfigError::NotFound(_))));

        fs::write(&path, "[queues.story]\nconcurrency = 0\n").unwrap();
        let err = manager.load().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("queues.story"));

        fs::write(&path, "[queues\n").unwrap();
        assert!(matches!(manager.load(), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn update_section_only_changes_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reel.toml");

        let mut manager = ConfigManager::new(&path);
        manager.load_or_create().unwrap();

        // Edit another section on disk behind the manager's back.
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("mock = true", "mock = false")).unwrap();

        manager.settings_mut().queues.max_tasks_per_window = 9;
        manager.update_section(ConfigSection::Queues).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("max_tasks_per_window = 9"));
        assert!(content.contains("mock = false"));
        assert!(content.contains("[queues.story]"));
        assert!(content.contains("# External generation APIs"));
    }
}
