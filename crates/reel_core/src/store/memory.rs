//! In-memory task store with optional JSON file persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::errors::{StoreError, StoreResult};
use super::TaskStore;
use crate::models::{TaskId, TaskRecord, TaskStatus, TaskUpdate};

/// On-disk layout of the records file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreState {
    version: u32,
    tasks: Vec<TaskRecord>,
}

/// Task records held in a map, optionally mirrored to a JSON file after
/// every mutation.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
    path: Option<PathBuf>,
}

impl MemoryTaskStore {
    /// Store without persistence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store mirrored to `path`, loading any records already there.
    pub fn with_persistence(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let records = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::io(format!("reading {}", path.display()), e))?;
            let state: StoreState = serde_json::from_str(&content)?;
            tracing::info!(path = %path.display(), count = state.tasks.len(), "Loaded task records");
            state
                .tasks
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Write every record atomically (temp file, then rename).
    ///
    /// Called with the write lock held so file order matches mutation order.
    /// Callers roll the map back when this fails, so memory never holds a
    /// change the file does not.
    async fn persist(&self, records: &HashMap<TaskId, TaskRecord>) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut tasks: Vec<TaskRecord> = records.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let json = serde_json::to_string_pretty(&StoreState { version: 1, tasks })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::io("creating store directory", e))?;
            }
        }
        let temp = path.with_extension("json.tmp");
        tokio::fs::write(&temp, json)
            .await
            .map_err(|e| StoreError::io(format!("writing {}", temp.display()), e))?;
        tokio::fs::rename(&temp, path)
            .await
            .map_err(|e| StoreError::io(format!("replacing {}", path.display()), e))?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn create(&self, mut record: TaskRecord) -> StoreResult<TaskRecord> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        let now = Utc::now();
        record.created_at = now;
        record.updated_at = now;
        records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.persist(&records).await {
            records.remove(&record.id);
            return Err(e);
        }
        Ok(record)
    }

    async fn update(&self, id: &TaskId, update: TaskUpdate) -> StoreResult<TaskRecord> {
        let mut records = self.records.write().await;
        let current = records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut updated = current.clone();
        if !updated.apply(update, Utc::now()) {
            return Ok(updated);
        }
        let previous = records.insert(id.clone(), updated.clone());
        if let Err(e) = self.persist(&records).await {
            if let Some(previous) = previous {
                records.insert(id.clone(), previous);
            }
            return Err(e);
        }
        Ok(updated)
    }

    async fn get(&self, id: &TaskId) -> StoreResult<Option<TaskRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn query_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>> {
        let mut matching: Vec<TaskRecord> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn clear(&self) -> StoreResult<usize> {
        let mut records = self.records.write().await;
        let previous = std::mem::take(&mut *records);
        if let Err(e) = self.persist(&records).await {
            *records = previous;
            return Err(e);
        }
        Ok(previous.len())
    }
}
