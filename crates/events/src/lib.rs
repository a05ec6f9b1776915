//! Order-event consumption: decoding, routing, and the subscription runner.

pub mod channel;
pub mod decoder;
pub mod router;
pub mod runner;

pub use channel::{AckHandle, ChannelError, Delivery, EventChannel};
pub use decoder::{decode_order_event, DecodeError, OrderEvent, SHIPPED_STATUS};
pub use router::{RouteOutcome, ShipmentEventRouter};
pub use runner::{RunnerConfig, RunnerHandle, SubscriptionRunner};
