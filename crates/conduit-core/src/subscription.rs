//! Subscription bookkeeping: `SubscriptionId` plus the per-subscription
//! state machine from §4.L.
//!
//! Subscriptions are looked up by id out of the broker's `DashMap`; nothing
//! here holds a reference back to the broker, per §9's cyclic-ownership
//! redesign note.

use conduit_common::SubscriptionOptions;
use conduit_transport::SubscriptionHandle;
use tokio_util::sync::CancellationToken;

pub type SubscriptionId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Registered,
    Active,
    Draining,
    Stopped,
}

pub struct SubscriptionState {
    pub id: SubscriptionId,
    pub type_id: String,
    pub options: SubscriptionOptions,
    pub status: SubscriptionStatus,
    pub transport_handle: Option<SubscriptionHandle>,
    pub cancel: CancellationToken,
}

impl SubscriptionState {
    pub fn new(type_id: impl Into<String>, options: SubscriptionOptions, cancel: CancellationToken) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            type_id: type_id.into(),
            options,
            status: SubscriptionStatus::Registered,
            transport_handle: None,
            cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_subscription_starts_registered_with_a_fresh_id() {
        let a = SubscriptionState::new("OrderPlaced", SubscriptionOptions::default(), CancellationToken::new());
        let b = SubscriptionState::new("OrderPlaced", SubscriptionOptions::default(), CancellationToken::new());

        assert_eq!(a.status, SubscriptionStatus::Registered);
        assert_eq!(a.type_id, "OrderPlaced");
        assert!(a.transport_handle.is_none());
        assert_ne!(a.id, b.id);
    }
}
