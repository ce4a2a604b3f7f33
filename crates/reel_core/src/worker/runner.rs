//! The claim/process/report loop shared by every worker.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use serde_json::Value;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::queue::{FailDisposition, Job, JobQueue};

/// Processes the jobs of one queue.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    type Error: std::fmt::Display + Send;

    /// Queue this processor consumes.
    fn queue(&self) -> &Arc<JobQueue>;

    /// Run one attempt of `job`. An error fails the attempt and leaves
    /// retrying to the queue.
    async fn process(&self, job: &Job) -> Result<Value, Self::Error>;
}

/// Spawn the worker loop for `processor` onto the runtime.
pub fn spawn_worker<P: JobProcessor>(processor: Arc<P>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run_worker(processor, cancel))
}

/// Claim jobs until `cancel` fires, processing up to the queue's
/// concurrency at once.
///
/// On cancellation the loop stops claiming and aborts jobs still in flight;
/// they stay active in the queue.
pub async fn run_worker<P: JobProcessor>(processor: Arc<P>, cancel: CancellationToken) {
    let queue = Arc::clone(processor.queue());
    let mut in_flight = JoinSet::new();
    tracing::info!(
        queue = %queue.kind(),
        concurrency = queue.options().concurrency,
        "Worker started"
    );

    loop {
        tokio::select! {
            job = queue.next_job(&cancel) => {
                let Some(job) = job else { break };
                let processor = Arc::clone(&processor);
                let queue = Arc::clone(&queue);
                in_flight.spawn(async move { execute(processor.as_ref(), &queue, job).await });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    if !e.is_cancelled() {
                        tracing::error!(queue = %queue.kind(), "Job task ended abnormally: {}", e);
                    }
                }
            }
        }
    }

    let aborted = in_flight.len();
    in_flight.shutdown().await;
    tracing::info!(queue = %queue.kind(), aborted, "Worker stopped");
}

/// Process one claimed job and report its outcome to the queue.
async fn execute<P: JobProcessor>(processor: &P, queue: &Arc<JobQueue>, job: Job) {
    let id = job.id;
    let attempt = job.attempt();
    let outcome = AssertUnwindSafe(processor.process(&job)).catch_unwind().await;

    let reported = match outcome {
        Ok(Ok(value)) => queue.complete(id, value),
        Ok(Err(e)) => queue.fail(id, e.to_string()).map(|disposition| {
            if disposition == FailDisposition::Failed {
                tracing::debug!(queue = %queue.kind(), job_id = %id, attempt, "Attempts exhausted");
            }
        }),
        Err(_) => queue
            .fail(id, format!("{} worker panicked", queue.kind()))
            .map(|_| ()),
    };

    // Rejected when the queue was obliterated while the job ran.
    if let Err(e) = reported {
        tracing::warn!(queue = %queue.kind(), job_id = %id, "Could not report job outcome: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QueueKind;
    use crate::queue::{JobState, QueueOptions, WaitError};
    use serde_json::json;
    use std::time::Duration;

    struct Echo {
        queue: Arc<JobQueue>,
    }

    #[async_trait]
    impl JobProcessor for Echo {
        type Error = String;

        fn queue(&self) -> &Arc<JobQueue> {
            &self.queue
        }

        async fn process(&self, job: &Job) -> Result<Value, String> {
            match job.payload["mode"].as_str() {
                Some("fail") => Err("asked to fail".to_string()),
                Some("panic") => panic!("asked to panic"),
                _ => Ok(json!({"echo": job.payload.clone()})),
            }
        }
    }

    fn echo_worker(options: QueueOptions) -> (Arc<JobQueue>, CancellationToken, JoinHandle<()>) {
        let queue = JobQueue::new(QueueKind::Story, options);
        let cancel = CancellationToken::new();
        let handle = spawn_worker(
            Arc::new(Echo {
                queue: Arc::clone(&queue),
            }),
            cancel.clone(),
        );
        (queue, cancel, handle)
    }

    #[tokio::test]
    async fn completes_claimed_jobs() {
        let (queue, cancel, handle) = echo_worker(QueueOptions::default());
        let (_, waiter) = queue.submit_watched(json!({"n": 1}));

        let value = waiter.wait().await.unwrap();
        assert_eq!(value["echo"]["n"], 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_retried_by_the_queue() {
        let (queue, cancel, handle) =
            echo_worker(QueueOptions::default().with_backoff(Duration::from_millis(10)));
        let (job, waiter) = queue.submit_watched(json!({"mode": "fail"}));

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(err, WaitError::Failed { ref message, .. } if message == "asked to fail"));
        let job = queue.get(job.id).unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts_made, 3);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn panicking_job_fails_instead_of_hanging() {
        let (queue, cancel, handle) = echo_worker(QueueOptions::default().with_attempts(1));
        let (_, waiter) = queue.submit_watched(json!({"mode": "panic"}));

        let err = waiter.wait().await.unwrap_err();
        assert!(matches!(err, WaitError::Failed { ref message, .. } if message.contains("panicked")));
        assert_eq!(queue.counts().active, 0);

        cancel.cancel();
        handle.await.unwrap();
    }
}
