//! In-memory event channel for tests/dev.
//!
//! Models the external at-least-once feed: nacked messages come back after
//! a delay with an incremented attempt counter, and dead-lettered messages
//! land in an inspectable buffer instead of a DLQ stream.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use shipbill_events::{AckHandle, ChannelError, Delivery, EventChannel};

type QueuedMessage = (String, Vec<u8>, u32);

/// A message filed aside after exhausting its retry budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message_id: String,
    pub payload: Vec<u8>,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct InMemoryEventChannel {
    tx: mpsc::UnboundedSender<QueuedMessage>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<QueuedMessage>>,
    nack_delay: Duration,
    next_id: AtomicU64,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryEventChannel {
    pub fn new(nack_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            nack_delay,
            next_id: AtomicU64::new(1),
            dead_letters: Mutex::new(Vec::new()),
        }
    }

    /// Deliver a payload to the subscription, returning its message id.
    pub fn publish(&self, payload: impl Into<Vec<u8>>) -> String {
        let message_id = format!("m-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        // Receiver lives as long as the channel, so send cannot fail.
        let _ = self.tx.send((message_id.clone(), payload.into(), 1));
        message_id
    }

    /// Snapshot of the dead-letter buffer (inspection in tests/ops).
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for InMemoryEventChannel {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

struct InMemoryAck {
    message_id: String,
    payload: Vec<u8>,
    attempt: u32,
    requeue: mpsc::UnboundedSender<QueuedMessage>,
    nack_delay: Duration,
}

#[async_trait]
impl AckHandle for InMemoryAck {
    async fn ack(self: Box<Self>) -> Result<(), ChannelError> {
        // Consuming the handle removes the message; nothing to persist.
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), ChannelError> {
        let requeue = self.requeue.clone();
        let message = (self.message_id, self.payload, self.attempt + 1);
        let delay = self.nack_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = requeue.send(message);
        });
        Ok(())
    }
}

#[async_trait]
impl EventChannel for InMemoryEventChannel {
    async fn receive(&self) -> Result<Option<Delivery>, ChannelError> {
        let next = self.rx.lock().await.recv().await;
        match next {
            Some((message_id, payload, attempt)) => Ok(Some(Delivery {
                message_id: message_id.clone(),
                payload: payload.clone(),
                attempt,
                ack: Box::new(InMemoryAck {
                    message_id,
                    payload,
                    attempt,
                    requeue: self.tx.clone(),
                    nack_delay: self.nack_delay,
                }),
            })),
            None => Ok(None),
        }
    }

    async fn dead_letter(
        &self,
        message_id: &str,
        payload: &[u8],
        reason: &str,
    ) -> Result<(), ChannelError> {
        self.dead_letters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(DeadLetter {
                message_id: message_id.to_string(),
                payload: payload.to_vec(),
                reason: reason.to_string(),
                failed_at: Utc::now(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_receive_round_trip() {
        let channel = InMemoryEventChannel::default();
        let id = channel.publish(b"hello".to_vec());

        let delivery = channel.receive().await.unwrap().unwrap();
        assert_eq!(delivery.message_id, id);
        assert_eq!(delivery.payload, b"hello");
        assert_eq!(delivery.attempt, 1);

        delivery.ack.ack().await.unwrap();
    }

    #[tokio::test]
    async fn nack_redelivers_with_bumped_attempt() {
        let channel = InMemoryEventChannel::new(Duration::from_millis(5));
        channel.publish(b"retry me".to_vec());

        let first = channel.receive().await.unwrap().unwrap();
        assert_eq!(first.attempt, 1);
        first.ack.nack().await.unwrap();

        let second = channel.receive().await.unwrap().unwrap();
        assert_eq!(second.attempt, 2);
        assert_eq!(second.payload, b"retry me");
    }

    #[tokio::test]
    async fn dead_letter_is_inspectable() {
        let channel = InMemoryEventChannel::default();
        channel
            .dead_letter("m-9", b"bad payload", "decode failed")
            .await
            .unwrap();

        let dead = channel.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message_id, "m-9");
        assert_eq!(dead[0].reason, "decode failed");
    }
}
