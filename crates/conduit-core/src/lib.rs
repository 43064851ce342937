//! The broker core: the publish/subscribe facade applications hold onto,
//! composing the resilience mesh, the reliability pipeline, and a transport
//! adapter behind a single entry point.

pub mod broker;
pub mod builder;
pub mod poison;
pub mod subscription;

pub use broker::{Broker, Handler, HandlerContext};
pub use builder::BrokerBuilder;
pub use poison::PoisonHandler;
pub use subscription::{SubscriptionId, SubscriptionState, SubscriptionStatus};
