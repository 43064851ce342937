//! Durable publisher-side outbox: buffers outbound envelopes so a publish
//! that commits to storage is guaranteed to eventually reach the transport,
//! even across a process crash, per §4.I.

pub mod cleanup;
pub mod memory;
pub mod publisher;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cleanup::{OutboxCleanupConfig, OutboxCleanupWorker};
pub use memory::InMemoryOutboxStore;
pub use publisher::{OutboxPublisherConfig, OutboxPublisherWorker, OutboxSender};
pub use store::{OutboxEntry, OutboxStatus, OutboxStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOutboxStore;
