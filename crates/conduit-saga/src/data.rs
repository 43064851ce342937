//! Saga run state, per §4.M's Saga Data shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaState {
    NotStarted,
    Running,
    Compensating,
    Completed,
    Compensated,
    Failed,
    Aborted,
}

/// The persisted/resumable state of one saga run. `context` carries
/// user-defined fields as JSON so the coordinator stays generic over the
/// caller's domain type while remaining trivially serializable for the
/// persistence hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaData {
    pub saga_id: String,
    pub correlation_id: Option<String>,
    pub state: SagaState,
    pub current_step: usize,
    pub execution_order: Vec<String>,
    pub failed_step: Option<String>,
    pub compensation_order: Vec<String>,
    pub compensation_succeeded: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u64,
    pub context: Value,
}

impl SagaData {
    pub fn new(saga_id: impl Into<String>, correlation_id: Option<String>, context: Value) -> Self {
        let now = Utc::now();
        Self {
            saga_id: saga_id.into(),
            correlation_id,
            state: SagaState::NotStarted,
            current_step: 0,
            execution_order: Vec::new(),
            failed_step: None,
            compensation_order: Vec::new(),
            compensation_succeeded: None,
            created_at: now,
            updated_at: now,
            version: 0,
            context,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            SagaState::Completed | SagaState::Compensated | SagaState::Failed | SagaState::Aborted
        )
    }
}
