//! In-process job queue with bounded concurrency, retry and admission control.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::errors::{QueueError, QueueResult};
use super::events::{CompletionWaiter, EventBus, JobOutcome, StageEvent};
use super::job::{Job, JobHandle, JobId, JobState};
use super::options::{QueueOptions, RateLimiter};
use super::stats::{JobCounts, QueueStats};
use crate::models::QueueKind;

/// Result of a non-blocking claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// A job moved to `active`; the caller owns it until it reports an outcome.
    Job(Job),
    /// Nothing is waiting.
    Empty,
    /// Jobs are waiting but the admission window is full for this long.
    Throttled(Duration),
    /// The concurrency limit is reached.
    Saturated,
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailDisposition {
    /// Re-enqueued after `delay`; `attempt` attempts have failed so far.
    Retrying { attempt: u32, delay: Duration },
    /// Attempts exhausted; the failed event was raised.
    Failed,
}

/// Summary of an obliterate call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct Obliterated {
    pub jobs: usize,
    pub waiters: usize,
}

#[derive(Debug)]
struct QueueInner {
    next_id: u64,
    jobs: HashMap<JobId, Job>,
    /// Claim order of waiting jobs.
    waiting: VecDeque<JobId>,
    active: usize,
    delayed: usize,
    completed_total: u64,
    failed_total: u64,
    processing_ms_total: u64,
    processed_count: u64,
    limiter: Option<RateLimiter>,
    /// Bumped by obliterate; pending retry timers from older generations are ignored.
    generation: u64,
    /// Jobs that were active when the queue was obliterated. They still hold
    /// a concurrency slot until their worker reports.
    orphaned: HashSet<JobId>,
}

impl QueueInner {
    fn new(options: &QueueOptions) -> Self {
        Self {
            next_id: 1,
            jobs: HashMap::new(),
            waiting: VecDeque::new(),
            active: 0,
            delayed: 0,
            completed_total: 0,
            failed_total: 0,
            processing_ms_total: 0,
            processed_count: 0,
            limiter: options.limiter.map(RateLimiter::new),
            generation: 0,
            orphaned: HashSet::new(),
        }
    }

    /// Release the slot of an obliterated job; its outcome goes nowhere.
    fn release_orphan(&mut self, queue: QueueKind, id: JobId) -> QueueResult<()> {
        if self.orphaned.remove(&id) {
            self.active -= 1;
            return Err(QueueError::not_found(queue, id));
        }
        Ok(())
    }

    fn enqueue(&mut self, queue: QueueKind, payload: Value, max_attempts: u32) -> JobId {
        let id = JobId(self.next_id);
        self.next_id += 1;
        self.jobs.insert(id, Job::new(id, queue, payload, max_attempts));
        self.waiting.push_back(id);
        id
    }

    fn active_job(&mut self, queue: QueueKind, id: JobId) -> QueueResult<&mut Job> {
        let job = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::not_found(queue, id))?;
        if job.state != JobState::Active {
            return Err(QueueError::not_active(queue, id, job.state));
        }
        Ok(job)
    }
}

/// One named queue of jobs plus its completion event bus.
///
/// All state sits behind a single short-lived lock; nothing awaits while
/// holding it.
pub struct JobQueue {
    kind: QueueKind,
    options: QueueOptions,
    inner: Mutex<QueueInner>,
    notify: Notify,
    events: Arc<EventBus>,
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl JobQueue {
    pub fn new(kind: QueueKind, options: QueueOptions) -> Arc<Self> {
        Arc::new(Self {
            kind,
            inner: Mutex::new(QueueInner::new(&options)),
            options,
            notify: Notify::new(),
            events: EventBus::new(kind),
        })
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    pub fn options(&self) -> &QueueOptions {
        &self.options
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Receive every terminal event of this queue from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    /// Unresolved completion waiters on this queue.
    pub fn pending_waiters(&self) -> usize {
        self.events.pending_waiters()
    }

    /// Add a job at the back of the queue.
    ///
    /// No deduplication: identical payloads become independent jobs.
    pub fn submit(&self, payload: Value) -> JobHandle {
        let id = self
            .inner
            .lock()
            .enqueue(self.kind, payload, self.options.attempts);
        tracing::debug!(queue = %self.kind, job_id = %id, "Job submitted");
        self.notify.notify_waiters();
        JobHandle {
            id,
            queue: self.kind,
        }
    }

    /// Add a job and register a waiter for its outcome.
    ///
    /// The waiter exists before the job becomes claimable, so its terminal
    /// event cannot be missed.
    pub fn submit_watched(&self, payload: Value) -> (JobHandle, CompletionWaiter) {
        let (id, waiter) = {
            let mut inner = self.inner.lock();
            let id = JobId(inner.next_id);
            let waiter = self.events.register(id);
            let assigned = inner.enqueue(self.kind, payload, self.options.attempts);
            debug_assert_eq!(assigned, id);
            (id, waiter)
        };
        tracing::debug!(queue = %self.kind, job_id = %id, "Job submitted with completion waiter");
        self.notify.notify_waiters();
        (
            JobHandle {
                id,
                queue: self.kind,
            },
            waiter,
        )
    }

    /// Claim the oldest waiting job if concurrency and the rate limiter allow.
    pub fn claim_next(&self) -> Claim {
        let mut inner = self.inner.lock();
        if inner.active >= self.options.concurrency {
            return Claim::Saturated;
        }
        if inner.waiting.is_empty() {
            return Claim::Empty;
        }
        if let Some(limiter) = inner.limiter.as_mut() {
            if let Err(wait) = limiter.try_acquire(Instant::now()) {
                return Claim::Throttled(wait);
            }
        }

        while let Some(id) = inner.waiting.pop_front() {
            let Some(job) = inner.jobs.get_mut(&id) else {
                continue;
            };
            job.state = JobState::Active;
            job.processed_on = Some(Utc::now());
            let job = job.clone();
            inner.active += 1;
            tracing::debug!(queue = %self.kind, job_id = %id, attempt = job.attempt(), "Job claimed");
            return Claim::Job(job);
        }
        Claim::Empty
    }

    /// Wait until a job can be claimed, or return `None` once `cancel` fires.
    pub async fn next_job(&self, cancel: &CancellationToken) -> Option<Job> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Registered before the claim check so a concurrent submit is not missed.
            notified.as_mut().enable();

            match self.claim_next() {
                Claim::Job(job) => return Some(job),
                Claim::Throttled(wait) => {
                    tracing::trace!(queue = %self.kind, ?wait, "Admission window full");
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                Claim::Empty | Claim::Saturated => {
                    tokio::select! {
                        _ = cancel.cancelled() => return None,
                        _ = &mut notified => {}
                    }
                }
            }
        }
    }

    /// Record a successful attempt and raise the completed event.
    pub fn complete(&self, id: JobId, value: Value) -> QueueResult<()> {
        {
            let mut inner = self.inner.lock();
            inner.release_orphan(self.kind, id)?;
            let job = inner.active_job(self.kind, id)?;
            let now = Utc::now();
            job.state = JobState::Completed;
            job.return_value = Some(value.clone());
            job.finished_on = Some(now);
            let elapsed_ms = job
                .processing_time()
                .map(|d| d.num_milliseconds().max(0) as u64)
                .unwrap_or(0);

            inner.active -= 1;
            inner.completed_total += 1;
            inner.processing_ms_total += elapsed_ms;
            inner.processed_count += 1;
            if self.options.remove_on_complete {
                inner.jobs.remove(&id);
            }
        }

        tracing::debug!(queue = %self.kind, job_id = %id, "Job completed");
        self.events.dispatch(StageEvent {
            queue: self.kind,
            job_id: id,
            outcome: JobOutcome::Completed(value),
        });
        self.notify.notify_waiters();
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// With attempts left the job is delayed by the backoff and then returns
    /// to the back of the queue; otherwise it fails terminally and the failed
    /// event is raised.
    pub fn fail(self: &Arc<Self>, id: JobId, message: impl Into<String>) -> QueueResult<FailDisposition> {
        let message = message.into();
        let disposition = {
            let mut inner = self.inner.lock();
            inner.release_orphan(self.kind, id)?;
            let generation = inner.generation;
            let job = inner.active_job(self.kind, id)?;
            job.attempts_made += 1;
            job.failed_reason = Some(message.clone());
            let attempts_made = job.attempts_made;

            if attempts_made < job.max_attempts {
                job.state = JobState::Delayed;
                inner.active -= 1;
                inner.delayed += 1;
                let delay = self.options.backoff.delay_for(attempts_made);
                self.schedule_retry(id, delay, generation);
                FailDisposition::Retrying {
                    attempt: attempts_made,
                    delay,
                }
            } else {
                job.state = JobState::Failed;
                job.finished_on = Some(Utc::now());
                inner.active -= 1;
                inner.failed_total += 1;
                if self.options.remove_on_fail {
                    inner.jobs.remove(&id);
                }
                FailDisposition::Failed
            }
        };

        match disposition {
            FailDisposition::Retrying { attempt, delay } => {
                tracing::warn!(
                    queue = %self.kind,
                    job_id = %id,
                    attempt,
                    max_attempts = self.options.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Job attempt failed, retrying: {}",
                    message
                );
            }
            FailDisposition::Failed => {
                tracing::error!(queue = %self.kind, job_id = %id, "Job failed: {}", message);
                self.events.dispatch(StageEvent {
                    queue: self.kind,
                    job_id: id,
                    outcome: JobOutcome::Failed(message),
                });
            }
        }
        self.notify.notify_waiters();
        Ok(disposition)
    }

    fn schedule_retry(self: &Arc<Self>, id: JobId, delay: Duration, generation: u64) {
        let queue: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(queue) = queue.upgrade() {
                queue.promote(id, generation);
            }
        });
    }

    /// Move a delayed job back to waiting.
    fn promote(&self, id: JobId, generation: u64) {
        {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return;
            }
            match inner.jobs.get_mut(&id) {
                Some(job) if job.state == JobState::Delayed => {
                    job.state = JobState::Waiting;
                }
                _ => return,
            }
            inner.delayed -= 1;
            inner.waiting.push_back(id);
        }
        tracing::debug!(queue = %self.kind, job_id = %id, "Delayed job re-queued");
        self.notify.notify_waiters();
    }

    /// Remove a job that is not active. Any completion waiter sees it as lost.
    pub fn remove(&self, id: JobId) -> QueueResult<Job> {
        let job = {
            let mut inner = self.inner.lock();
            let state = inner
                .jobs
                .get(&id)
                .map(|j| j.state)
                .ok_or_else(|| QueueError::not_found(self.kind, id))?;
            match state {
                JobState::Active => return Err(QueueError::locked(self.kind, id)),
                JobState::Waiting => inner.waiting.retain(|w| *w != id),
                JobState::Delayed => inner.delayed -= 1,
                JobState::Completed | JobState::Failed => {}
            }
            inner
                .jobs
                .remove(&id)
                .ok_or_else(|| QueueError::not_found(self.kind, id))?
        };
        self.events.discard(id);
        tracing::info!(queue = %self.kind, job_id = %id, state = %job.state, "Job removed");
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    /// Waiting jobs in claim order.
    pub fn waiting_jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock();
        inner
            .waiting
            .iter()
            .filter_map(|id| inner.jobs.get(id).cloned())
            .collect()
    }

    /// First waiting job (in claim order) matching `pred`.
    pub fn find_waiting(&self, pred: impl Fn(&Job) -> bool) -> Option<Job> {
        let inner = self.inner.lock();
        inner
            .waiting
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .find(|job| pred(job))
            .cloned()
    }

    /// 1-based position of a waiting job in claim order.
    pub fn position(&self, id: JobId) -> Option<usize> {
        self.inner
            .lock()
            .waiting
            .iter()
            .position(|w| *w == id)
            .map(|p| p + 1)
    }

    pub fn counts(&self) -> JobCounts {
        let inner = self.inner.lock();
        JobCounts {
            waiting: inner.waiting.len(),
            active: inner.active,
            completed: inner.completed_total,
            failed: inner.failed_total,
            delayed: inner.delayed,
        }
    }

    pub fn stats(&self) -> QueueStats {
        let (counts, avg_ms) = {
            let inner = self.inner.lock();
            let avg_ms = if inner.processed_count == 0 {
                0
            } else {
                inner.processing_ms_total / inner.processed_count
            };
            (
                JobCounts {
                    waiting: inner.waiting.len(),
                    active: inner.active,
                    completed: inner.completed_total,
                    failed: inner.failed_total,
                    delayed: inner.delayed,
                },
                avg_ms,
            )
        };
        QueueStats {
            queue: self.kind,
            name: self.kind.name(),
            counts,
            avg_processing_secs: (avg_ms + 500) / 1000,
            avg_processing_ms: avg_ms,
        }
    }

    /// Drop every job, counter and pending retry; every waiter sees its job as lost.
    ///
    /// Workers still running a job keep running it and keep its concurrency
    /// slot, but its outcome is rejected with `JobNotFound`. Job ids are
    /// never reused.
    pub fn obliterate(&self) -> Obliterated {
        let jobs = {
            let mut inner = self.inner.lock();
            let jobs = inner.jobs.len();
            let next_id = inner.next_id;
            let generation = inner.generation + 1;
            let mut orphaned = std::mem::take(&mut inner.orphaned);
            orphaned.extend(
                inner
                    .jobs
                    .values()
                    .filter(|job| job.state == JobState::Active)
                    .map(|job| job.id),
            );
            *inner = QueueInner {
                next_id,
                generation,
                active: orphaned.len(),
                orphaned,
                ..QueueInner::new(&self.options)
            };
            jobs
        };
        let waiters = self.events.discard_all();
        tracing::warn!(queue = %self.kind, jobs, waiters, "Queue obliterated");
        self.notify.notify_waiters();
        Obliterated { jobs, waiters }
    }
}
