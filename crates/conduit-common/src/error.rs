//! Machine-readable error kinds observable at the edge of the broker.
//!
//! Every error carries a `kind` plus a human-readable message. Validation
//! errors additionally carry a list of per-field reasons; resilience errors
//! carry enough state for callers to back off intelligently.

use thiserror::Error;

/// Errors surfaced by the broker core and the resilience mesh.
#[derive(Debug, Error, Clone)]
pub enum ConduitError {
    #[error("message must not be null")]
    ArgumentNull,

    #[error("broker has been disposed")]
    ObjectDisposed,

    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<String>),

    #[error("schema validation failed: {0:?}")]
    SchemaValidationFailed(Vec<String>),

    #[error("circuit open for '{endpoint}' (opened at {opened_at_secs}s ago, retry after {retry_after_secs}s)")]
    CircuitOpen {
        endpoint: String,
        opened_at_secs: u64,
        retry_after_secs: u64,
    },

    #[error("bulkhead rejected (active={active}, queued={queued})")]
    BulkheadRejected { active: u32, queued: u32 },

    #[error("rate limit exceeded, next token available in {retry_after_ms}ms")]
    RateLimitExceeded { retry_after_ms: u64 },

    #[error("operation cancelled")]
    OperationCancelled,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("invalid compressed data")]
    InvalidCompressedData,

    #[error("saga step failed: {step}: {reason}")]
    SagaStepFailed { step: String, reason: String },

    #[error("saga compensation failed: {step}: {reason}")]
    SagaCompensationFailed { step: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ConduitError>;
