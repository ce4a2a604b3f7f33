//! Completion events and the per-job correlation table.
//!
//! Every job termination raises exactly one [`StageEvent`]. Two kinds of
//! consumers see it:
//! - a [`CompletionWaiter`] registered for that job id (at most one), which
//!   resolves once and is removed from the table in the same step;
//! - any number of broadcast subscribers (statistics, tests, tooling).
//!
//! Waiters are keyed by job id, so events for unrelated jobs on the same
//! queue can never resolve them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

use super::job::JobId;
use crate::models::QueueKind;

const BROADCAST_CAPACITY: usize = 256;

/// Terminal outcome of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(Value),
    /// Attempts exhausted; carries the last error message.
    Failed(String),
}

/// Notification of one job's termination.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub queue: QueueKind,
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

/// Why a waiter did not produce a value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("job {job_id} failed: {message}")]
    Failed { job_id: JobId, message: String },

    /// The job left the queue without terminating (removed or obliterated).
    #[error("job {job_id} was removed before it finished")]
    Lost { job_id: JobId },
}

/// Completion fan-out for one queue.
pub struct EventBus {
    queue: QueueKind,
    waiters: Mutex<HashMap<JobId, oneshot::Sender<JobOutcome>>>,
    sender: broadcast::Sender<StageEvent>,
}

impl EventBus {
    pub fn new(queue: QueueKind) -> Arc<Self> {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Arc::new(Self {
            queue,
            waiters: Mutex::new(HashMap::new()),
            sender,
        })
    }

    /// Receive every event raised on this queue from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.sender.subscribe()
    }

    /// Number of registered, unresolved waiters.
    pub fn pending_waiters(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Register interest in one job's outcome.
    ///
    /// Must happen before the job can be claimed, so the event cannot be
    /// raised ahead of the registration.
    pub(crate) fn register(self: &Arc<Self>, job_id: JobId) -> CompletionWaiter {
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(job_id, tx);
        CompletionWaiter {
            job_id,
            queue: self.queue,
            rx,
            bus: Arc::downgrade(self),
        }
    }

    /// Deliver an event to its waiter (removing it) and to subscribers.
    pub(crate) fn dispatch(&self, event: StageEvent) {
        let waiter = self.waiters.lock().remove(&event.job_id);
        if let Some(tx) = waiter {
            // Receiver gone means the waiter was dropped mid-flight; nothing to do.
            let _ = tx.send(event.outcome.clone());
        }
        let _ = self.sender.send(event);
    }

    /// Drop a job's waiter without resolving it; the waiter sees `Lost`.
    pub(crate) fn discard(&self, job_id: JobId) -> bool {
        self.waiters.lock().remove(&job_id).is_some()
    }

    /// Drop every waiter; returns how many were pending.
    pub(crate) fn discard_all(&self) -> usize {
        let mut waiters = self.waiters.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }
}

/// One-shot handle resolving with a single job's outcome.
///
/// Dropping the handle removes its table entry, so abandoned waits (for
/// example after a timeout) leave nothing behind.
pub struct CompletionWaiter {
    job_id: JobId,
    queue: QueueKind,
    rx: oneshot::Receiver<JobOutcome>,
    bus: Weak<EventBus>,
}

impl CompletionWaiter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn queue(&self) -> QueueKind {
        self.queue
    }

    /// Suspend until the job terminates.
    pub async fn wait(mut self) -> Result<Value, WaitError> {
        match (&mut self.rx).await {
            Ok(JobOutcome::Completed(value)) => Ok(value),
            Ok(JobOutcome::Failed(message)) => Err(WaitError::Failed {
                job_id: self.job_id,
                message,
            }),
            Err(_) => Err(WaitError::Lost {
                job_id: self.job_id,
            }),
        }
    }
}

impl Drop for CompletionWaiter {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.discard(self.job_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(id: u64, outcome: JobOutcome) -> StageEvent {
        StageEvent {
            queue: QueueKind::Story,
            job_id: JobId(id),
            outcome,
        }
    }

    #[tokio::test]
    async fn waiter_ignores_other_jobs_events() {
        let bus = EventBus::new(QueueKind::Story);
        let waiter = bus.register(JobId(2));

        bus.dispatch(event(1, JobOutcome::Completed(json!("other"))));
        bus.dispatch(event(3, JobOutcome::Failed("other".into())));
        assert_eq!(bus.pending_waiters(), 1);

        bus.dispatch(event(2, JobOutcome::Completed(json!({"ok": true}))));
        assert_eq!(bus.pending_waiters(), 0);
        assert_eq!(waiter.wait().await.unwrap(), json!({"ok": true}));
    }

    #[tokio::test]
    async fn failed_outcome_rejects() {
        let bus = EventBus::new(QueueKind::Video);
        let waiter = bus.register(JobId(7));
        bus.dispatch(event(7, JobOutcome::Failed("render crashed".into())));

        let err = waiter.wait().await.unwrap_err();
        assert_eq!(
            err,
            WaitError::Failed {
                job_id: JobId(7),
                message: "render crashed".into()
            }
        );
    }

    #[tokio::test]
    async fn dropped_waiter_deregisters() {
        let bus = EventBus::new(QueueKind::Images);
        let waiter = bus.register(JobId(1));
        assert_eq!(bus.pending_waiters(), 1);
        drop(waiter);
        assert_eq!(bus.pending_waiters(), 0);
    }

    #[tokio::test]
    async fn discarded_waiter_reports_lost() {
        let bus = EventBus::new(QueueKind::Images);
        let waiter = bus.register(JobId(9));
        assert_eq!(bus.discard_all(), 1);
        assert_eq!(
            waiter.wait().await.unwrap_err(),
            WaitError::Lost { job_id: JobId(9) }
        );
    }

    #[tokio::test]
    async fn subscribers_see_every_event() {
        let bus = EventBus::new(QueueKind::Story);
        let mut rx = bus.subscribe();
        bus.dispatch(event(1, JobOutcome::Completed(json!(1))));
        bus.dispatch(event(2, JobOutcome::Failed("x".into())));

        assert_eq!(rx.recv().await.unwrap().job_id, JobId(1));
        assert_eq!(rx.recv().await.unwrap().job_id, JobId(2));
    }
}
