//! Shared data model, error taxonomy, and type registry used by every crate
//! in the workspace. Nothing in here talks to a transport or a database.

pub mod envelope;
pub mod error;
pub mod logging;
pub mod registry;

pub use envelope::{
    validate_user_headers, CompressionAlgorithm, Envelope, HeaderValue, PublishOptions,
    SubscriptionOptions, HEADER_ATTEMPTS, HEADER_COMPRESSION, HEADER_CORRELATION_ID,
    HEADER_EXCEPTION, HEADER_MESSAGE_ID, HEADER_MESSAGE_TYPE, HEADER_ORIGINAL_TYPE,
    HEADER_POISON_REASON, HEADER_SAGA_ID, HEADER_SCHEMA_ID, HEADER_TIMESTAMP,
    RESERVED_HEADER_PREFIX,
};
pub use error::{ConduitError, Result};
pub use registry::{DeserializeFn, SerializeFn, TypeDescriptor, TypeRegistry};
