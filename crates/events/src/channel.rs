//! Channel capability: how messages reach the subscription runner.
//!
//! The transport is an external, managed at-least-once pub/sub system; this
//! module only defines the narrow capability the runner needs. Backends live
//! in the infra crate (in-memory channel for tests/dev, Redis Streams
//! consumer group for durable delivery).
//!
//! A channel handle is owned and passed in at construction. There is no
//! process-wide client state; releasing the handle releases the
//! subscription.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel connection error: {0}")]
    Connection(String),

    #[error("channel command error: {0}")]
    Command(String),

    #[error("channel is closed")]
    Closed,
}

/// Per-delivery acknowledgement capability.
///
/// Consuming `self` makes double-acking a compile error. `ack` must only be
/// called once the store effect the message triggered has durably completed
/// or the message has been classified terminal; anything else breaks the
/// at-least-once redelivery guarantee on crash.
#[async_trait]
pub trait AckHandle: Send {
    /// Mark the message consumed; it will not be redelivered.
    async fn ack(self: Box<Self>) -> Result<(), ChannelError>;

    /// Return the message for redelivery after the channel's nack delay.
    async fn nack(self: Box<Self>) -> Result<(), ChannelError>;
}

/// A single received message.
///
/// `attempt` counts deliveries, starting at 1; the runner uses it to bound
/// redelivery before dead-lettering.
pub struct Delivery {
    pub message_id: String,
    pub payload: Vec<u8>,
    pub attempt: u32,
    pub ack: Box<dyn AckHandle>,
}

impl core::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// Subscription handle over the external at-least-once channel.
#[async_trait]
pub trait EventChannel: Send + Sync {
    /// Wait for the next message.
    ///
    /// `Ok(None)` means the channel is drained and closed; the runner treats
    /// it as end-of-stream. Implementations should block until a message is
    /// available or the channel closes.
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError>;

    /// Route a message aside for manual inspection, out of the retry cycle.
    ///
    /// The caller still acks the original delivery afterwards; dead-lettering
    /// only files the copy.
    async fn dead_letter(
        &self,
        message_id: &str,
        payload: &[u8],
        reason: &str,
    ) -> Result<(), ChannelError>;
}
