//! Scripted stage client for pipeline tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::{MockStageClient, StageClient, StageError, StageResult};
use crate::models::{Stage, StageRequest};

/// One recorded `generate` call.
#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub stage: Stage,
    pub request: StageRequest,
    pub at: Instant,
}

/// Delegates to [`MockStageClient`] but can fail or hold specific stages,
/// and records every call.
#[derive(Default)]
pub(crate) struct ScriptedStageClient {
    inner: MockStageClient,
    failures: Mutex<HashMap<Stage, u32>>,
    gates: Mutex<HashMap<Stage, Arc<Semaphore>>>,
    calls: Mutex<Vec<Call>>,
    delay: Duration,
}

impl ScriptedStageClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Fail the next `times` calls for `stage`.
    pub fn fail(&self, stage: Stage, times: u32) {
        self.failures.lock().insert(stage, times);
    }

    /// Block calls for `stage` until [`release`](Self::release) is called.
    pub fn hold(&self, stage: Stage) {
        self.gates.lock().insert(stage, Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self, stage: Stage) {
        if let Some(gate) = self.gates.lock().get(&stage) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, stage: Stage) -> Vec<Call> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.stage == stage)
            .cloned()
            .collect()
    }

    /// Poll until `stage` has been called at least `n` times.
    pub async fn wait_for_calls(&self, stage: Stage, n: usize) {
        while self.calls_for(stage).len() < n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl StageClient for ScriptedStageClient {
    async fn generate(&self, stage: Stage, request: &StageRequest) -> StageResult<Value> {
        self.calls.lock().push(Call {
            stage,
            request: request.clone(),
            at: Instant::now(),
        });

        let gate = self.gates.lock().get(&stage).cloned();
        if let Some(gate) = gate {
            let _ = gate.acquire().await.map(|permit| permit.forget());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let fail = {
            let mut failures = self.failures.lock();
            match failures.get_mut(&stage) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(StageError::failed(format!("{stage} generator unavailable")));
        }
        self.inner.generate(stage, request).await
    }
}
