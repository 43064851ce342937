//! Poison message handling: retry-exhausted quarantine, per §4.H.
//!
//! Grounded on `fc-router/src/warning.rs`'s `WarningService` shape — an
//! optional notification hook fired alongside a durable record of what went
//! wrong — generalized here to republishing the offending envelope to a
//! poison destination instead of recording an in-memory warning list.

use std::sync::Arc;

use conduit_common::{
    Envelope, HeaderValue, PublishOptions, HEADER_ATTEMPTS, HEADER_EXCEPTION, HEADER_ORIGINAL_TYPE,
};
use conduit_telemetry::PoisonEventSink;
use conduit_transport::TransportAdapter;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// Republishes an envelope that exhausted its retry budget to a poison
/// destination, stamping the headers §4.H requires, and fires the optional
/// observation hook. Never fails the caller's consume path — a failure to
/// quarantine a message is logged, not propagated, since the alternative is
/// losing the original failure's context entirely.
pub struct PoisonHandler {
    transport: Arc<dyn TransportAdapter>,
    sink: Arc<dyn PoisonEventSink>,
}

impl PoisonHandler {
    pub fn new(transport: Arc<dyn TransportAdapter>, sink: Arc<dyn PoisonEventSink>) -> Self {
        Self { transport, sink }
    }

    pub async fn quarantine(&self, mut envelope: Envelope, attempts: u32, reason: &str) {
        let original_type = envelope.message_type.clone();
        envelope = envelope
            .with_header(HEADER_EXCEPTION, HeaderValue::Str(reason.to_string()))
            .with_header(HEADER_ATTEMPTS, HeaderValue::Int(attempts as i64))
            .with_header(HEADER_ORIGINAL_TYPE, HeaderValue::Str(original_type.clone()));

        let poison_routing_key = format!("poison.{original_type}");
        let options = PublishOptions {
            routing_key: Some(poison_routing_key),
            ..PublishOptions::default()
        };

        self.sink.on_poisoned(&original_type, &envelope.message_id, attempts, reason);

        if let Err(err) = self
            .transport
            .send_one(envelope, options, CancellationToken::new())
            .await
        {
            error!(original_type = %original_type, error = %err, "failed to route message to poison destination");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_common::SubscriptionOptions;
    use conduit_transport::{DeliveryHandler, InMemoryTransport, TransportAdapter};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct RecordingPoisonSink {
        calls: Arc<AtomicU32>,
    }

    impl PoisonEventSink for RecordingPoisonSink {
        fn on_poisoned(&self, _message_type: &str, _message_id: &str, _attempts: u32, _reason: &str) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn quarantine_stamps_headers_and_republishes_to_poison_routing_key() {
        let transport = Arc::new(InMemoryTransport::new());
        let calls = Arc::new(AtomicU32::new(0));
        let sink = Arc::new(RecordingPoisonSink { calls: calls.clone() });
        let handler_fired = Arc::new(AtomicU32::new(0));
        let handler_fired_clone = handler_fired.clone();

        let delivery: DeliveryHandler = Arc::new(move |envelope: Envelope| {
            let handler_fired = handler_fired_clone.clone();
            Box::pin(async move {
                assert_eq!(envelope.message_type, "poison.OrderPlaced");
                assert_eq!(
                    envelope.headers.get(HEADER_ORIGINAL_TYPE),
                    Some(&HeaderValue::Str("OrderPlaced".to_string()))
                );
                handler_fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        transport
            .subscribe("poison.OrderPlaced", SubscriptionOptions::default(), delivery, CancellationToken::new())
            .await
            .unwrap();

        let handler = PoisonHandler::new(transport, sink);
        let envelope = Envelope::new("OrderPlaced", b"payload".to_vec());
        handler.quarantine(envelope, 3, "handler timed out").await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handler_fired.load(Ordering::SeqCst), 1);
    }
}
