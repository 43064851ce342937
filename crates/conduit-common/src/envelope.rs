//! The message envelope — the transport-agnostic unit that flows through
//! the broker. Compatible field naming with the wire schema in the spec's
//! external interfaces section (`x-message-type`, `x-message-id`, ...).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved header prefix. User headers must not start with this.
pub const RESERVED_HEADER_PREFIX: &str = "x-conduit-";

pub const HEADER_MESSAGE_TYPE: &str = "x-message-type";
pub const HEADER_MESSAGE_ID: &str = "x-message-id";
pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_CORRELATION_ID: &str = "x-correlation-id";
pub const HEADER_COMPRESSION: &str = "x-compression";
pub const HEADER_ATTEMPTS: &str = "x-attempts";
pub const HEADER_SCHEMA_ID: &str = "x-schema-id";
pub const HEADER_SAGA_ID: &str = "x-saga-id";
pub const HEADER_POISON_REASON: &str = "x-poison-reason";
pub const HEADER_EXCEPTION: &str = "x-exception";
pub const HEADER_ORIGINAL_TYPE: &str = "x-original-type";

/// A header value — strings or primitives, per the data model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Str(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for HeaderValue {
    fn from(s: &str) -> Self {
        HeaderValue::Str(s.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(s: String) -> Self {
        HeaderValue::Str(s)
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        HeaderValue::Int(v)
    }
}

impl From<bool> for HeaderValue {
    fn from(v: bool) -> Self {
        HeaderValue::Bool(v)
    }
}

impl std::fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderValue::Str(s) => write!(f, "{s}"),
            HeaderValue::Int(v) => write!(f, "{v}"),
            HeaderValue::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Compression algorithm tag, carried via the `x-compression` header rather
/// than inferred from magic bytes alone — Brotli has no reliable magic
/// prefix, so the header is the source of truth (see DESIGN.md open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    GZip,
    Deflate,
    Brotli,
}

impl std::fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::GZip => "gzip",
            CompressionAlgorithm::Deflate => "deflate",
            CompressionAlgorithm::Brotli => "brotli",
        };
        write!(f, "{s}")
    }
}

/// The message envelope. Immutable once it leaves the publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub payload: Vec<u8>,
    pub message_type: String,
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub routing_key: Option<String>,
    pub exchange: Option<String>,
    pub headers: HashMap<String, HeaderValue>,
    pub priority: Option<u8>,
    pub expiration: Option<Duration>,
}

impl Envelope {
    /// Construct a new envelope for first publish — generates a stable
    /// message id and stamps the publish timestamp.
    pub fn new(message_type: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            payload,
            message_type: message_type.into(),
            message_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            timestamp: Utc::now(),
            routing_key: None,
            exchange: None,
            headers: HashMap::new(),
            priority: None,
            expiration: None,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn header(&self, key: &str) -> Option<&HeaderValue> {
        self.headers.get(key)
    }

    pub fn compression(&self) -> CompressionAlgorithm {
        match self.header(HEADER_COMPRESSION) {
            Some(HeaderValue::Str(s)) => match s.as_str() {
                "gzip" => CompressionAlgorithm::GZip,
                "deflate" => CompressionAlgorithm::Deflate,
                "brotli" => CompressionAlgorithm::Brotli,
                _ => CompressionAlgorithm::None,
            },
            _ => CompressionAlgorithm::None,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self.header(HEADER_ATTEMPTS) {
            Some(HeaderValue::Int(v)) => (*v).max(0) as u32,
            _ => 0,
        }
    }
}

/// Per-publish configuration. Lifetime is the duration of one publish call.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub routing_key: Option<String>,
    pub exchange: Option<String>,
    pub headers: HashMap<String, HeaderValue>,
    pub priority: Option<u8>,
    pub expiration: Option<Duration>,
    pub persistent: bool,
    pub validator_ref: Option<String>,
    pub schema_ref: Option<String>,
}

/// Per-subscription configuration.
#[derive(Debug, Clone)]
pub struct SubscriptionOptions {
    pub queue_name: Option<String>,
    pub routing_filter: Option<String>,
    pub consumer_group: Option<String>,
    pub prefetch_count: u32,
    pub auto_ack: bool,
    pub durable: bool,
    /// Validate payloads after decompression on the consume path. Optional,
    /// per §4.B: consume-side validation is an opt-in.
    pub validate_on_consume: bool,
    pub validator_ref: Option<String>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            queue_name: None,
            routing_filter: None,
            consumer_group: None,
            prefetch_count: 10,
            auto_ack: true,
            durable: true,
            validate_on_consume: false,
            validator_ref: None,
        }
    }
}

/// Validates that user-supplied headers do not collide with runtime-owned ones.
pub fn validate_user_headers(headers: &HashMap<String, HeaderValue>) -> Result<(), Vec<String>> {
    let offenders: Vec<String> = headers
        .keys()
        .filter(|k| k.starts_with(RESERVED_HEADER_PREFIX))
        .cloned()
        .collect();
    if offenders.is_empty() {
        Ok(())
    } else {
        Err(offenders
            .into_iter()
            .map(|k| format!("header '{k}' uses the reserved '{RESERVED_HEADER_PREFIX}' prefix"))
            .collect())
    }
}
