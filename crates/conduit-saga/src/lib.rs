//! Saga coordinator: ordered step execution with reverse compensation on
//! failure, per §4.M.

pub mod coordinator;
pub mod data;
pub mod sink;
pub mod step;

pub use coordinator::{SagaCoordinator, SagaRunOptions};
pub use data::{SagaData, SagaState};
pub use sink::{NoopSagaEventSink, SagaEventSink, SagaPersistence};
pub use step::{SagaContext, SagaStep, SkipPredicate, StepOperation};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::RwLock;

    fn ok_step(name: &str, calls: Arc<AtomicUsize>) -> SagaStep {
        let calls_exec = calls.clone();
        let execute: StepOperation = Arc::new(move |_ctx| {
            let calls = calls_exec.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let compensate: StepOperation = Arc::new(|_ctx| Box::pin(async move { Ok(()) }));
        SagaStep::new(name, execute, compensate)
    }

    fn failing_step(name: &str) -> SagaStep {
        let execute: StepOperation = Arc::new(move |_ctx| {
            Box::pin(async move {
                Err(conduit_common::ConduitError::SagaStepFailed {
                    step: "x".into(),
                    reason: "boom".into(),
                })
            })
        });
        let compensate: StepOperation = Arc::new(|_ctx| Box::pin(async move { Ok(()) }));
        SagaStep::new(name, execute, compensate)
    }

    #[tokio::test]
    async fn all_steps_succeed_ends_completed_in_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let steps = vec![ok_step("reserve", calls.clone()), ok_step("charge", calls.clone()), ok_step("ship", calls.clone())];
        let coordinator = SagaCoordinator::new(steps, SagaRunOptions::default());
        let saga = SagaData::new("saga-1", None, json!({}));
        let context: SagaContext = Arc::new(RwLock::new(json!({})));

        let result = coordinator.run(saga, context, &HashSet::new()).await.unwrap();
        assert_eq!(result.state, SagaState::Completed);
        assert_eq!(result.current_step, 3);
        assert_eq!(result.execution_order, vec!["reserve", "charge", "ship"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn second_step_failure_compensates_first_only() {
        let calls = Arc::new(AtomicUsize::new(0));
        let compensated = Arc::new(AtomicUsize::new(0));
        let compensated_clone = compensated.clone();

        let mut first = ok_step("reserve", calls.clone());
        first.compensate = Arc::new(move |_ctx| {
            let compensated = compensated_clone.clone();
            Box::pin(async move {
                compensated.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let second = failing_step("charge");
        let third = ok_step("ship", calls.clone());

        let coordinator = SagaCoordinator::new(vec![first, second, third], SagaRunOptions::default());
        let saga = SagaData::new("saga-2", None, json!({}));
        let context: SagaContext = Arc::new(RwLock::new(json!({})));

        let result = coordinator.run(saga, context, &HashSet::new()).await.unwrap();
        assert_eq!(result.state, SagaState::Compensated);
        assert_eq!(result.execution_order, vec!["reserve"]);
        assert_eq!(result.compensation_order, vec!["reserve"]);
        assert_eq!(result.failed_step.as_deref(), Some("charge"));
        assert_eq!(compensated.load(Ordering::SeqCst), 1);
        // "ship" never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skip_list_bypasses_a_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let steps = vec![ok_step("reserve", calls.clone()), ok_step("charge", calls.clone())];
        let coordinator = SagaCoordinator::new(steps, SagaRunOptions::default());
        let saga = SagaData::new("saga-3", None, json!({}));
        let context: SagaContext = Arc::new(RwLock::new(json!({})));

        let mut skip = HashSet::new();
        skip.insert("reserve".to_string());

        let result = coordinator.run(saga, context, &skip).await.unwrap();
        assert_eq!(result.execution_order, vec!["charge"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_recovers_a_transiently_failing_step() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_clone = attempts.clone();
        let execute: StepOperation = Arc::new(move |_ctx| {
            let attempts = attempts_clone.clone();
            Box::pin(async move {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(conduit_common::ConduitError::SagaStepFailed {
                        step: "flaky".into(),
                        reason: "not yet".into(),
                    })
                } else {
                    Ok(())
                }
            })
        });
        let compensate: StepOperation = Arc::new(|_ctx| Box::pin(async move { Ok(()) }));
        let step = SagaStep::new("flaky", execute, compensate);

        let options = SagaRunOptions {
            auto_retry_failed_steps: true,
            max_retry_attempts: 3,
            retry_delay: std::time::Duration::from_millis(1),
            use_exponential_backoff: false,
            ..SagaRunOptions::default()
        };
        let coordinator = SagaCoordinator::new(vec![step], options);
        let saga = SagaData::new("saga-4", None, json!({}));
        let context: SagaContext = Arc::new(RwLock::new(json!({})));

        let result = coordinator.run(saga, context, &HashSet::new()).await.unwrap();
        assert_eq!(result.state, SagaState::Completed);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn require_idempotent_resume_rejects_terminal_saga() {
        let steps = vec![ok_step("reserve", Arc::new(AtomicUsize::new(0)))];
        let options = SagaRunOptions {
            require_idempotent_resume: true,
            ..SagaRunOptions::default()
        };
        let coordinator = SagaCoordinator::new(steps, options);
        let mut saga = SagaData::new("saga-5", None, json!({}));
        saga.state = SagaState::Completed;
        let context: SagaContext = Arc::new(RwLock::new(json!({})));

        let result = coordinator.run(saga, context, &HashSet::new()).await;
        assert!(result.is_err());
    }
}
