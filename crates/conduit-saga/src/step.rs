//! Step definitions: a named pair of forward/compensating operations
//! closing over a shared context handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::RwLock;

use conduit_common::Result;

use crate::data::SagaData;

/// The mutable context every step in a saga shares, guarded so steps never
/// race each other (steps run strictly sequentially, but the lock keeps the
/// type honest about shared ownership rather than relying on that).
pub type SagaContext = Arc<RwLock<Value>>;

pub type StepOperation =
    Arc<dyn Fn(SagaContext) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

pub type SkipPredicate = Arc<dyn Fn(&SagaData) -> bool + Send + Sync>;

pub struct SagaStep {
    pub name: String,
    pub execute: StepOperation,
    pub compensate: StepOperation,
    pub timeout: Option<Duration>,
    pub skip_if: Option<SkipPredicate>,
}

impl SagaStep {
    pub fn new(
        name: impl Into<String>,
        execute: StepOperation,
        compensate: StepOperation,
    ) -> Self {
        Self {
            name: name.into(),
            execute,
            compensate,
            timeout: None,
            skip_if: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_skip_predicate(mut self, predicate: SkipPredicate) -> Self {
        self.skip_if = Some(predicate);
        self
    }
}

impl std::fmt::Debug for SagaStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaStep")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("has_skip_predicate", &self.skip_if.is_some())
            .finish()
    }
}
