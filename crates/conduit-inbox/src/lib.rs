//! Consumer-side idempotency store: records which `(consumer, message_id)`
//! pairs have already completed processing so redelivery cannot cause a
//! handler to run twice, per §4.J.

pub mod cleanup;
pub mod memory;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use cleanup::{InboxCleanupConfig, InboxCleanupWorker};
pub use memory::InMemoryInboxStore;
pub use store::{BeginOutcome, InboxEntry, InboxStatus, InboxStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteInboxStore;
