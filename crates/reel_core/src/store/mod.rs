//! Task record persistence.
//!
//! `TaskStore` is the seam between the pipeline and whatever holds task
//! records. Writes are last-write-wins merges of partial fields; the store
//! assigns `created_at` and `updated_at`.

mod errors;
mod memory;

pub use errors::{StoreError, StoreResult};
pub use memory::MemoryTaskStore;

use async_trait::async_trait;

use crate::models::{TaskId, TaskRecord, TaskStatus, TaskUpdate};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new record. Fails if the id is taken.
    async fn create(&self, record: TaskRecord) -> StoreResult<TaskRecord>;

    /// Merge `update` into an existing record and return the result.
    ///
    /// The guard is checked under the same lock as the write: an update whose
    /// `unless_status` list holds the current status is skipped and the
    /// unchanged record is returned.
    async fn update(&self, id: &TaskId, update: TaskUpdate) -> StoreResult<TaskRecord>;

    async fn get(&self, id: &TaskId) -> StoreResult<Option<TaskRecord>>;

    /// Records with the given status, oldest first.
    async fn query_by_status(&self, status: TaskStatus) -> StoreResult<Vec<TaskRecord>>;

    /// Delete every record; returns how many were removed.
    async fn clear(&self) -> StoreResult<usize>;
}
