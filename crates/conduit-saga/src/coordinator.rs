//! `SagaCoordinator`: ordered forward execution with reverse compensation
//! on failure, per §4.M.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, warn};

use conduit_common::{ConduitError, Result};

use crate::data::{SagaData, SagaState};
use crate::sink::{NoopSagaEventSink, SagaEventSink, SagaPersistence};
use crate::step::{SagaContext, SagaStep};

#[derive(Debug, Clone)]
pub struct SagaRunOptions {
    pub auto_retry_failed_steps: bool,
    pub max_retry_attempts: u32,
    pub retry_delay: Duration,
    pub use_exponential_backoff: bool,
    pub continue_compensation_on_error: bool,
    pub step_timeout: Option<Duration>,
    pub compensation_timeout: Option<Duration>,
    pub overall_timeout: Option<Duration>,
    pub auto_persist: bool,
    /// When `true`, `run()` refuses to resume a saga already in a terminal
    /// state instead of honoring `current_step` unconditionally. Default
    /// `false` preserves the literal specified behavior (resume regardless
    /// of state) for callers relying on it; see DESIGN.md open question.
    pub require_idempotent_resume: bool,
}

impl Default for SagaRunOptions {
    fn default() -> Self {
        Self {
            auto_retry_failed_steps: false,
            max_retry_attempts: 3,
            retry_delay: Duration::from_millis(200),
            use_exponential_backoff: true,
            continue_compensation_on_error: true,
            step_timeout: None,
            compensation_timeout: None,
            overall_timeout: None,
            auto_persist: false,
            require_idempotent_resume: false,
        }
    }
}

fn backoff_for(options: &SagaRunOptions, attempt: u32) -> Duration {
    if options.use_exponential_backoff {
        options.retry_delay.saturating_mul(2u32.saturating_pow(attempt.min(16)))
    } else {
        options.retry_delay.saturating_mul(attempt.max(1))
    }
}

pub struct SagaCoordinator {
    steps: Vec<SagaStep>,
    options: SagaRunOptions,
    sink: Arc<dyn SagaEventSink>,
    persistence: Option<Arc<dyn SagaPersistence>>,
}

impl SagaCoordinator {
    pub fn new(steps: Vec<SagaStep>, options: SagaRunOptions) -> Self {
        Self {
            steps,
            options,
            sink: Arc::new(NoopSagaEventSink),
            persistence: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn SagaEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn SagaPersistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    fn find_step(&self, name: &str) -> Option<&SagaStep> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Runs (or resumes) a saga from `saga.current_step`. Per §4.M, state
    /// does not gate execution unless `require_idempotent_resume` is set.
    pub async fn run(&self, mut saga: SagaData, context: SagaContext, skip: &HashSet<String>) -> Result<SagaData> {
        if self.options.require_idempotent_resume && saga.is_terminal() {
            return Err(ConduitError::SagaStepFailed {
                step: saga.failed_step.clone().unwrap_or_default(),
                reason: "saga already in a terminal state; require_idempotent_resume is enabled".to_string(),
            });
        }

        if saga.state == SagaState::NotStarted {
            saga.state = SagaState::Running;
        }

        let run_future = self.run_forward(&mut saga, context.clone(), skip);
        let forward_result = match self.options.overall_timeout {
            Some(d) => timeout(d, run_future)
                .await
                .unwrap_or_else(|_| Err("saga exceeded overall timeout".to_string())),
            None => run_future.await,
        };

        match forward_result {
            Ok(()) => {
                saga.state = SagaState::Completed;
                saga.updated_at = Utc::now();
                saga.version += 1;
                self.sink.on_completed(&saga);
                self.persist_if_enabled(&saga).await;
            }
            Err(reason) => {
                saga.state = SagaState::Compensating;
                self.sink.on_failed(&saga, saga.failed_step.as_deref().unwrap_or(""), &reason);
                self.persist_if_enabled(&saga).await;
                self.compensate(&mut saga, context).await;
            }
        }

        Ok(saga)
    }

    async fn run_forward(
        &self,
        saga: &mut SagaData,
        context: SagaContext,
        skip: &HashSet<String>,
    ) -> std::result::Result<(), String> {
        let total = self.steps.len();
        while saga.current_step < total {
            let idx = saga.current_step;
            let step = &self.steps[idx];
            let should_skip = skip.contains(&step.name) || step.skip_if.as_ref().map(|p| p(saga)).unwrap_or(false);
            if should_skip {
                saga.current_step += 1;
                continue;
            }

            match self.run_step_with_retry(step, context.clone()).await {
                Ok(()) => {
                    saga.execution_order.push(step.name.clone());
                    saga.current_step += 1;
                    saga.updated_at = Utc::now();
                    saga.version += 1;
                    self.persist_if_enabled(saga).await;
                }
                Err(reason) => {
                    saga.failed_step = Some(step.name.clone());
                    return Err(reason);
                }
            }
        }
        Ok(())
    }

    async fn run_step_with_retry(&self, step: &SagaStep, context: SagaContext) -> std::result::Result<(), String> {
        let max_attempts = if self.options.auto_retry_failed_steps {
            self.options.max_retry_attempts
        } else {
            0
        };

        let mut last_error = String::new();
        for attempt in 0..=max_attempts {
            let step_timeout = step.timeout.or(self.options.step_timeout);
            let result = match step_timeout {
                Some(d) => match timeout(d, (step.execute)(context.clone())).await {
                    Ok(r) => r,
                    Err(_) => Err(ConduitError::SagaStepFailed {
                        step: step.name.clone(),
                        reason: "step execution timed out".to_string(),
                    }),
                },
                None => (step.execute)(context.clone()).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(err) => {
                    last_error = err.to_string();
                    if attempt < max_attempts {
                        warn!(step = %step.name, attempt, error = %last_error, "saga step failed, retrying");
                        tokio::time::sleep(backoff_for(&self.options, attempt)).await;
                    }
                }
            }
        }
        Err(last_error)
    }

    async fn compensate(&self, saga: &mut SagaData, context: SagaContext) {
        let mut all_succeeded = true;
        for name in saga.execution_order.clone().into_iter().rev() {
            let Some(step) = self.find_step(&name) else {
                warn!(step = %name, "no matching step definition found during compensation");
                all_succeeded = false;
                continue;
            };

            let compensation_timeout = self.options.compensation_timeout;
            let result = match compensation_timeout {
                Some(d) => match timeout(d, (step.compensate)(context.clone())).await {
                    Ok(r) => r,
                    Err(_) => Err(ConduitError::SagaCompensationFailed {
                        step: name.clone(),
                        reason: "compensation timed out".to_string(),
                    }),
                },
                None => (step.compensate)(context.clone()).await,
            };

            saga.compensation_order.push(name.clone());
            if let Err(err) = result {
                all_succeeded = false;
                warn!(step = %name, error = %err, "compensation step failed");
                if !self.options.continue_compensation_on_error {
                    break;
                }
            } else {
                info!(step = %name, "compensated step");
            }
        }

        saga.compensation_succeeded = Some(all_succeeded);
        saga.state = SagaState::Compensated;
        saga.updated_at = Utc::now();
        saga.version += 1;
        self.sink.on_compensated(saga, all_succeeded);
        self.persist_if_enabled(saga).await;
    }

    async fn persist_if_enabled(&self, saga: &SagaData) {
        if !self.options.auto_persist {
            return;
        }
        if let Some(persistence) = &self.persistence {
            if let Err(err) = persistence.save(saga).await {
                warn!(saga_id = %saga.saga_id, error = %err, "saga persistence failed");
            }
        }
    }
}
