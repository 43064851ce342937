//! Development monolith: wires every conduit crate into a single running
//! broker, for exercising the stack locally without a real transport,
//! database, or scheduler behind it.
//!
//! Grounded on `bin/fc-dev/src/main.rs`'s shape: `clap`-parsed args,
//! `init_logging()` first, a broadcast shutdown signal fanned out to every
//! spawned subsystem via `tokio::select!`, and a timed graceful shutdown.
//! Unlike `fc-dev` this binary has no HTTP surface or external database to
//! start — the subsystems here are the outbox publisher, the outbox and
//! inbox cleanup sweepers, and a demo publish/subscribe round trip.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conduit_common::{Envelope, PublishOptions, Result as ConduitResult, SubscriptionOptions, TypeRegistry};
use conduit_config::ConfigLoader;
use conduit_core::{Broker, BrokerBuilder, HandlerContext};
use conduit_inbox::{InMemoryInboxStore, InboxCleanupConfig, InboxCleanupWorker};
use conduit_outbox::{
    InMemoryOutboxStore, OutboxCleanupConfig, OutboxCleanupWorker, OutboxPublisherConfig, OutboxPublisherWorker,
    OutboxSender,
};
use conduit_transport::{InMemoryTransport, TransportAdapter};

#[derive(Parser, Debug)]
#[command(name = "conduit-dev", about = "Runs a conduit broker against an in-memory transport")]
struct Args {
    /// Path to a `conduit.toml` config file. Missing is not an error; defaults apply.
    #[arg(long, env = "CONDUIT_CONFIG", default_value = "conduit.toml")]
    config: String,

    /// Number of demo `DemoEvent` messages to publish after startup.
    #[arg(long, env = "CONDUIT_DEMO_MESSAGES", default_value_t = 3)]
    messages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DemoEvent {
    id: u32,
    note: String,
}

/// Adapts a `TransportAdapter` to the narrower `OutboxSender` seam the
/// outbox publisher worker depends on, so `conduit-outbox` doesn't need a
/// direct dependency on `conduit-transport`.
struct TransportOutboxSender(Arc<dyn TransportAdapter>);

#[async_trait]
impl OutboxSender for TransportOutboxSender {
    async fn send(&self, envelope: Envelope, options: PublishOptions, cancel: CancellationToken) -> ConduitResult<()> {
        self.0.send_one(envelope, options, cancel).await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    conduit_common::logging::init_logging();

    let args = Args::parse();
    let config = ConfigLoader::load_from(std::path::Path::new(&args.config))
        .with_context(|| format!("loading config from {}", args.config))?;
    info!(transport = %config.broker.transport_type, "configuration loaded");

    let registry = TypeRegistry::new();
    registry.register_json::<DemoEvent>("DemoEvent");

    let transport = Arc::new(InMemoryTransport::new());

    let mut builder = BrokerBuilder::new(config.clone())
        .with_transport(transport.clone())
        .with_registry(registry.clone());

    let outbox_store = if config.outbox.enabled {
        let store = Arc::new(InMemoryOutboxStore::new());
        builder = builder.with_outbox(store.clone());
        Some(store)
    } else {
        None
    };

    let inbox_store = if config.inbox.enabled {
        let store = Arc::new(InMemoryInboxStore::new());
        builder = builder.with_inbox(store.clone());
        Some(store)
    } else {
        None
    };

    let broker = Arc::new(builder.build().map_err(|err| anyhow!(err))?);

    let root_cancel = CancellationToken::new();
    let mut worker_handles: Vec<JoinHandle<()>> = Vec::new();

    if let Some(store) = outbox_store {
        let sender = Arc::new(TransportOutboxSender(transport.clone()));
        let publisher_config = OutboxPublisherConfig {
            poll_interval: Duration::from_millis(config.outbox.polling_interval_ms),
            batch_size: config.outbox.batch_size,
            lease_duration: Duration::from_secs(config.outbox.lease_duration_secs),
            ..OutboxPublisherConfig::default()
        };
        let publisher = Arc::new(OutboxPublisherWorker::new(store.clone(), sender, publisher_config));
        worker_handles.push(publisher.spawn(root_cancel.child_token()));

        let cleanup = Arc::new(OutboxCleanupWorker::new(
            store,
            OutboxCleanupConfig {
                retention: Duration::from_secs(config.outbox.retention_period_secs),
                ..OutboxCleanupConfig::default()
            },
        ));
        worker_handles.push(cleanup.spawn(root_cancel.child_token()));
    }

    if let Some(store) = inbox_store {
        let cleanup = Arc::new(InboxCleanupWorker::new(
            store,
            InboxCleanupConfig {
                interval: Duration::from_secs(config.inbox.cleanup_interval_secs),
                retention: Duration::from_secs(config.inbox.retention_period_secs),
            },
        ));
        worker_handles.push(cleanup.spawn(root_cancel.child_token()));
    }

    let received = Arc::new(AtomicU32::new(0));
    let received_for_handler = received.clone();
    broker
        .subscribe::<DemoEvent>(
            "DemoEvent",
            Arc::new(move |event: &DemoEvent, ctx: HandlerContext, _cancel: CancellationToken| {
                let received = received_for_handler.clone();
                let event = event.clone();
                Box::pin(async move {
                    info!(id = event.id, note = %event.note, message_id = %ctx.message_id, attempt = ctx.attempt, "handled demo event");
                    received.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
            }),
            SubscriptionOptions::default(),
            root_cancel.child_token(),
        )
        .await
        .context("subscribing to DemoEvent")?;

    for id in 0..args.messages {
        let event = DemoEvent { id, note: format!("demo message {id}") };
        broker
            .publish("DemoEvent", &event, PublishOptions::default(), root_cancel.child_token())
            .await
            .with_context(|| format!("publishing demo event {id}"))?;
    }

    tokio::select! {
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
        _ = settle(&received, args.messages) => {
            info!("demo publish/subscribe round trip settled");
        }
    }

    graceful_shutdown(broker, root_cancel, worker_handles).await;
    Ok(())
}

/// Polls until the demo handler has seen every published message, or gives
/// up after a few seconds so a misconfigured run still exits.
async fn settle(received: &AtomicU32, expected: u32) {
    for _ in 0..50 {
        if received.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    warn!(received = received.load(Ordering::SeqCst), expected, "demo round trip did not fully settle");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn graceful_shutdown(broker: Arc<Broker>, root_cancel: CancellationToken, workers: Vec<JoinHandle<()>>) {
    let cancel = CancellationToken::new();
    if let Err(err) = broker.stop(cancel.clone()).await {
        warn!(error = %err, "error stopping broker");
    }
    if let Err(err) = broker.dispose().await {
        warn!(error = %err, "error disposing broker");
    }
    root_cancel.cancel();

    let join_all = async {
        for handle in workers {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(Duration::from_secs(10), join_all).await.is_err() {
        warn!("worker tasks did not shut down within the grace period");
    }
}
