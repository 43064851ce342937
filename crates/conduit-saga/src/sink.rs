//! Saga lifecycle event sink and persistence hook.
//!
//! Grounded on the callback-graph redesign note: model lifecycle callbacks
//! as an explicit sink interface the coordinator invokes synchronously,
//! rather than a chain of user closures threaded through the run loop.

use async_trait::async_trait;

use conduit_common::Result;

use crate::data::SagaData;

pub trait SagaEventSink: Send + Sync {
    fn on_completed(&self, saga: &SagaData);
    fn on_failed(&self, saga: &SagaData, failed_step: &str, reason: &str);
    fn on_compensated(&self, saga: &SagaData, compensation_succeeded: bool);
}

pub struct NoopSagaEventSink;

impl SagaEventSink for NoopSagaEventSink {
    fn on_completed(&self, _saga: &SagaData) {}
    fn on_failed(&self, _saga: &SagaData, _failed_step: &str, _reason: &str) {}
    fn on_compensated(&self, _saga: &SagaData, _compensation_succeeded: bool) {}
}

/// Persistence hook invoked after each state-changing transition when
/// `auto_persist` is enabled. Implementations are expected to upsert by
/// `saga_id`, using `version` for optimistic concurrency as the outbox and
/// inbox stores do.
#[async_trait]
pub trait SagaPersistence: Send + Sync {
    async fn save(&self, saga: &SagaData) -> Result<()>;
    async fn load(&self, saga_id: &str) -> Result<Option<SagaData>>;
}
