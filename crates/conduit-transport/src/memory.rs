//! In-process reference transport. Delivers published envelopes directly to
//! registered handlers via `tokio::spawn`, with no network hop — useful for
//! tests, local development, and single-process deployments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use conduit_common::{ConduitError, Envelope, PublishOptions, Result, SubscriptionOptions};

use crate::{DeliveryHandler, SubscriptionHandle, TransportAdapter, TransportCapabilities};

struct Registration {
    handle: SubscriptionHandle,
    handler: DeliveryHandler,
}

/// An in-process publish/subscribe bus keyed by message type id. Fan-out is
/// "every live subscription for this type gets a copy" — matching §8's
/// "idempotent subscribe" testable property: subscribing the same handler
/// twice yields two independent deliveries.
pub struct InMemoryTransport {
    subscriptions: DashMap<String, Vec<Registration>>,
    started: AtomicBool,
    disposed: AtomicBool,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self {
            subscriptions: DashMap::new(),
            started: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConduitError::ObjectDisposed);
        }
        Ok(())
    }

    async fn deliver(&self, envelope: Envelope) {
        let Some(registrations) = self.subscriptions.get(&envelope.message_type) else {
            debug!(message_type = %envelope.message_type, "no subscribers for message type");
            return;
        };
        for reg in registrations.iter() {
            let handler = reg.handler.clone();
            let envelope = envelope.clone();
            tokio::spawn(async move {
                if let Err(err) = handler(envelope).await {
                    warn!(error = %err, "in-memory transport delivery failed");
                }
            });
        }
    }
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportAdapter for InMemoryTransport {
    async fn send_one(
        &self,
        envelope: Envelope,
        _options: PublishOptions,
        _cancel: CancellationToken,
    ) -> Result<()> {
        self.ensure_usable()?;
        self.deliver(envelope).await;
        Ok(())
    }

    async fn send_many(
        &self,
        envelopes: Vec<Envelope>,
        options: PublishOptions,
        cancel: CancellationToken,
    ) -> Result<()> {
        for envelope in envelopes {
            self.send_one(envelope, options.clone(), cancel.clone()).await?;
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        type_id: &str,
        _options: SubscriptionOptions,
        handler: DeliveryHandler,
        _cancel: CancellationToken,
    ) -> Result<SubscriptionHandle> {
        self.ensure_usable()?;
        let handle = SubscriptionHandle::new();
        self.subscriptions
            .entry(type_id.to_string())
            .or_default()
            .push(Registration {
                handle: handle.clone(),
                handler,
            });
        Ok(handle)
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<()> {
        for mut entry in self.subscriptions.iter_mut() {
            entry.value_mut().retain(|reg| &reg.handle != handle);
        }
        Ok(())
    }

    async fn start(&self, _cancel: CancellationToken) -> Result<()> {
        self.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self, _cancel: CancellationToken) -> Result<()> {
        self.started.store(false, Ordering::Release);
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        self.disposed.store(true, Ordering::Release);
        self.subscriptions.clear();
        Ok(())
    }

    fn capabilities(&self) -> TransportCapabilities {
        TransportCapabilities {
            scheduled_delivery: false,
            fifo_group_ids: false,
            priority: true,
            session_partition_key: false,
            dead_letter_move: false,
            transactions: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use tokio::time::{sleep, Duration};

    fn envelope(message_type: &str) -> Envelope {
        Envelope::new(message_type, b"payload".to_vec())
    }

    #[tokio::test]
    async fn duplicate_subscription_yields_independent_deliveries() {
        let transport = InMemoryTransport::new();
        let count = Arc::new(AtomicU32::new(0));

        for _ in 0..2 {
            let count = count.clone();
            let handler: DeliveryHandler = Arc::new(move |_env| {
                let count = count.clone();
                Box::pin(async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            });
            transport
                .subscribe("Order", SubscriptionOptions::default(), handler, CancellationToken::new())
                .await
                .unwrap();
        }

        transport
            .send_one(envelope("Order"), PublishOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let transport = InMemoryTransport::new();
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        let handler: DeliveryHandler = Arc::new(move |_env| {
            let count = count_clone.clone();
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let handle = transport
            .subscribe("Order", SubscriptionOptions::default(), handler, CancellationToken::new())
            .await
            .unwrap();

        transport.unsubscribe(&handle).await.unwrap();
        transport
            .send_one(envelope("Order"), PublishOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn operations_after_dispose_fail() {
        let transport = InMemoryTransport::new();
        transport.dispose().await.unwrap();
        let err = transport
            .send_one(envelope("Order"), PublishOptions::default(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::ObjectDisposed));
    }

    #[test]
    fn routing_key_pattern_substitution() {
        let transport = InMemoryTransport::new();
        assert_eq!(transport.derive_routing_key("{MessageType}", "Order", "app.Order"), "Order");
        assert_eq!(
            transport.derive_routing_key("relay.{MessageType}", "Order", "app.Order"),
            "relay.Order"
        );
    }
}
