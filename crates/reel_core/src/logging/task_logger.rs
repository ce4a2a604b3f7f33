//! One log per coordinator run.
//!
//! Every line goes to `tracing` with the task id as a field. When task logs
//! are on it is also appended, timestamped, to `<dir>/<task id>.log`. The
//! last few lines are kept in memory and dumped again after a failure so the
//! end of the file explains what went wrong.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::types::{LogLevel, Marker};
use crate::models::{Stage, TaskId};

/// Bounded window over the most recent lines.
struct Tail {
    lines: VecDeque<String>,
    cap: usize,
}

impl Tail {
    fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap),
            cap,
        }
    }

    fn push(&mut self, line: &str) {
        if self.cap == 0 {
            return;
        }
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_owned());
    }
}

pub struct TaskLogger {
    task_id: TaskId,
    path: Option<PathBuf>,
    file: Mutex<Option<LineWriter<File>>>,
    tail: Mutex<Tail>,
}

impl TaskLogger {
    /// Logger that also writes `<dir>/<task id>.log`, truncating any old one.
    pub fn to_file(task_id: &TaskId, dir: impl AsRef<Path>, tail: usize) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.log", file_stem(task_id.as_str())));
        let file = File::create(&path)?;

        let mut logger = Self::detached(task_id, tail);
        logger.path = Some(path);
        logger.file = Mutex::new(Some(LineWriter::new(file)));
        Ok(logger)
    }

    /// Logger that only mirrors to `tracing`.
    pub fn detached(task_id: &TaskId, tail: usize) -> Self {
        Self {
            task_id: task_id.clone(),
            path: None,
            file: Mutex::new(None),
            tail: Mutex::new(Tail::new(tail)),
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn note(&self, text: &str) {
        self.line(Marker::Plain, text);
    }

    pub fn warn(&self, text: &str) {
        self.line(Marker::Warn, text);
    }

    pub fn fail(&self, text: &str) {
        self.line(Marker::Fail, text);
    }

    pub fn stage_started(&self, stage: Stage) {
        self.line(Marker::Stage, stage.as_str());
    }

    pub fn done(&self, text: &str) {
        self.line(Marker::Done, text);
    }

    pub fn line(&self, marker: Marker, text: &str) {
        let line = marker.apply(text);
        let id = &self.task_id;
        match marker.level() {
            LogLevel::Trace => tracing::trace!(task_id = %id, "{line}"),
            LogLevel::Debug => tracing::debug!(task_id = %id, "{line}"),
            LogLevel::Info => tracing::info!(task_id = %id, "{line}"),
            LogLevel::Warn => tracing::warn!(task_id = %id, "{line}"),
            LogLevel::Error => tracing::error!(task_id = %id, "{line}"),
        }
        self.tail.lock().push(&line);
        self.append(&line);
    }

    /// Recent lines, oldest first.
    pub fn tail(&self) -> Vec<String> {
        self.tail.lock().lines.iter().cloned().collect()
    }

    /// Copy the recent lines to the end of the file under a header.
    pub fn dump_tail(&self) {
        let lines = self.tail();
        if lines.is_empty() {
            return;
        }
        self.append(&format!("--- last {} line(s) of {} ---", lines.len(), self.task_id));
        for line in &lines {
            self.append(line);
        }
    }

    /// Release the file. Later lines still reach `tracing`.
    pub fn close(&self) {
        if let Some(mut file) = self.file.lock().take() {
            let _ = file.flush();
        }
    }

    fn append(&self, line: &str) {
        if let Some(file) = self.file.lock().as_mut() {
            let _ = writeln!(file, "{} {}", Local::now().format("%H:%M:%S%.3f"), line);
        }
    }
}

impl Drop for TaskLogger {
    fn drop(&mut self) {
        self.close();
    }
}

/// Task ids are user-visible strings; keep only what is safe in a file name.
fn file_stem(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_gets_marked_lines() {
        let dir = tempdir().unwrap();
        let id = TaskId::from("task-1");
        let logger = TaskLogger::to_file(&id, dir.path(), 20).unwrap();

        logger.stage_started(Stage::Story);
        logger.done("story stage completed");
        logger.close();

        let path = logger.path().unwrap();
        assert!(path.ends_with("task-1.log"));
        let content = fs::read_to_string(path).unwrap();
        assert!(content.contains(">> story"));
        assert!(content.contains("[done] story stage completed"));
    }

    #[test]
    fn tail_keeps_only_recent_lines() {
        let logger = TaskLogger::detached(&TaskId::from("task-2"), 3);
        for i in 0..5 {
            logger.note(&format!("line {i}"));
        }
        assert_eq!(logger.tail(), vec!["line 2", "line 3", "line 4"]);
        assert!(logger.path().is_none());

        let silent = TaskLogger::detached(&TaskId::from("task-2b"), 0);
        silent.note("dropped");
        assert!(silent.tail().is_empty());
    }

    #[test]
    fn dump_tail_repeats_failure_at_end() {
        let dir = tempdir().unwrap();
        let logger = TaskLogger::to_file(&TaskId::from("task-3"), dir.path(), 5).unwrap();
        logger.fail("video stage failed");
        logger.dump_tail();
        logger.close();

        let content = fs::read_to_string(dir.path().join("task-3.log")).unwrap();
        assert_eq!(content.matches("[fail] video stage failed").count(), 2);
        assert!(content.contains("--- last 1 line(s) of task-3 ---"));
    }

    #[test]
    fn file_stem_replaces_unsafe_characters() {
        assert_eq!(file_stem("3f2a-b_c.1"), "3f2a-b_c.1");
        assert_eq!(file_stem("../etc/passwd"), ".._etc_passwd");
        assert_eq!(file_stem("a b:c"), "a_b_c");
    }
}
