//! The broker-facing contract a concrete transport must satisfy, plus an
//! in-process reference adapter.
//!
//! Grounded on `fc-queue/src/lib.rs`'s `QueueConsumer`/`QueuePublisher`/
//! `EmbeddedQueue` async-trait shape and `QueueMetrics` struct — generalized
//! here into a single bidirectional adapter trait since the abstract core
//! does not distinguish consumer-only and publisher-only transports.

pub mod memory;

pub use memory::InMemoryTransport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conduit_common::{ConduitError, Envelope, PublishOptions, Result, SubscriptionOptions};

/// A delivered-message callback the transport invokes for each inbound
/// envelope. The broker core supplies this; it folds in decompression,
/// deduplication, inbox bookkeeping, and the user handler. The transport
/// itself only needs to know "call this with what arrived."
pub type DeliveryHandler =
    Arc<dyn Fn(Envelope) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Opaque handle a transport returns from `subscribe`, later passed back to
/// `unsubscribe`. Transports are free to use it as an internal lookup key;
/// the core never inspects its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub String);

impl SubscriptionHandle {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SubscriptionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport-specific features the broker probes for at composition time
/// rather than assuming. A transport that cannot offer a capability simply
/// leaves the corresponding flag `false`; the broker core degrades
/// gracefully (e.g. falls back to polling instead of scheduled delivery).
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportCapabilities {
    pub scheduled_delivery: bool,
    pub fifo_group_ids: bool,
    pub priority: bool,
    pub session_partition_key: bool,
    pub dead_letter_move: bool,
    pub transactions: bool,
}

/// The contract a transport must satisfy to plug into the broker core.
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    async fn send_one(
        &self,
        envelope: Envelope,
        options: PublishOptions,
        cancel: CancellationToken,
    ) -> Result<()>;

    async fn send_many(
        &self,
        envelopes: Vec<Envelope>,
        options: PublishOptions,
        cancel: CancellationToken,
    ) -> Result<()>;

    /// Registers a handler to receive envelopes matching `type_id` under
    /// the given subscription options. Returns a handle for `unsubscribe`.
    async fn subscribe(
        &self,
        type_id: &str,
        options: SubscriptionOptions,
        handler: DeliveryHandler,
        cancel: CancellationToken,
    ) -> Result<SubscriptionHandle>;

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()>;

    async fn start(&self, cancel: CancellationToken) -> Result<()>;

    async fn stop(&self, cancel: CancellationToken) -> Result<()>;

    async fn dispose(&self) -> Result<()>;

    /// Default: no optional feature is supported. Concrete adapters override.
    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities::default()
    }

    /// Derives a transport-neutral routing key from a pattern such as
    /// `"{MessageType}"` or `"relay.{MessageType}"`, per §4.L. Transports
    /// with a native routing concept (subject, partition key, queue URL)
    /// may remap the result further; this default just fills the template.
    fn derive_routing_key(&self, pattern: &str, message_type: &str, message_full_name: &str) -> String {
        pattern
            .replace("{MessageType}", message_type)
            .replace("{MessageFullName}", message_full_name)
    }
}

/// Maps a transport-layer failure into the edge-visible error kind.
pub fn transport_error(context: &str, err: impl std::fmt::Display) -> ConduitError {
    ConduitError::TransportError(format!("{context}: {err}"))
}
