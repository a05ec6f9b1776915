//! Subscription runner: the receive/decode/route/ack loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use shipbill_invoicing::InvoiceStore;

use crate::channel::{Delivery, EventChannel};
use crate::decoder::decode_order_event;
use crate::router::{RouteOutcome, ShipmentEventRouter};

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Maximum in-flight message handlers.
    pub max_concurrent: usize,
    /// Deliveries per message before dead-lettering (first delivery counts).
    pub max_attempts: u32,
    /// Bound on a single handler's execution; an expired handler is nacked.
    pub handler_timeout: Duration,
    /// Pause after a channel receive error before retrying.
    pub receive_backoff: Duration,
    /// Name for logging.
    pub name: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            max_attempts: 5,
            handler_timeout: Duration::from_secs(30),
            receive_backoff: Duration::from_millis(500),
            name: "invoice-dispatch".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max.max(1);
        self
    }

    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max.max(1);
        self
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_receive_backoff(mut self, backoff: Duration) -> Self {
        self.receive_backoff = backoff;
        self
    }
}

/// Handle to control and join a running subscription loop.
#[derive(Debug)]
pub struct RunnerHandle {
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl RunnerHandle {
    /// Request graceful shutdown and wait for the runner to stop.
    ///
    /// Stops accepting new receives, lets in-flight handlers finish, then
    /// releases the channel subscription.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

/// Owns the subscribe/receive/ack loop against the external channel.
///
/// Messages are processed concurrently up to `max_concurrent`. Correctness
/// for duplicate or concurrent deliveries of the same order rests entirely
/// on the store's conditional `mark_sent`; the runner never serializes
/// per-order traffic.
#[derive(Debug)]
pub struct SubscriptionRunner;

impl SubscriptionRunner {
    /// Spawn the runner on the current tokio runtime.
    pub fn spawn<S>(
        channel: Arc<dyn EventChannel>,
        router: ShipmentEventRouter<S>,
        config: RunnerConfig,
    ) -> RunnerHandle
    where
        S: InvoiceStore + Clone + Send + Sync + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(run_loop(channel, router, config, shutdown_rx));

        RunnerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn run_loop<S>(
    channel: Arc<dyn EventChannel>,
    router: ShipmentEventRouter<S>,
    config: RunnerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: InvoiceStore + Clone + Send + Sync + 'static,
{
    info!(
        runner = %config.name,
        max_concurrent = config.max_concurrent,
        max_attempts = config.max_attempts,
        "subscription runner started"
    );

    // The drain below re-acquires the bound as a u32, and tokio's semaphore
    // caps its permit count; clamp so neither can overflow.
    let max_concurrent = config.max_concurrent.min(u32::MAX as usize);
    let inflight = Arc::new(Semaphore::new(max_concurrent));

    loop {
        // Bound concurrency before receiving so the channel is never asked
        // for more than we can handle.
        let permit = tokio::select! {
            _ = shutdown_rx.changed() => break,
            permit = inflight.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            _ = shutdown_rx.changed() => {
                drop(permit);
                break;
            }
            received = channel.receive() => received,
        };

        match received {
            Ok(Some(delivery)) => {
                let router = router.clone();
                let channel = channel.clone();
                let max_attempts = config.max_attempts;
                let handler_timeout = config.handler_timeout;
                let name = config.name.clone();
                tokio::spawn(async move {
                    process_delivery(
                        &name,
                        &router,
                        channel.as_ref(),
                        delivery,
                        max_attempts,
                        handler_timeout,
                    )
                    .await;
                    drop(permit);
                });
            }
            Ok(None) => {
                drop(permit);
                info!(runner = %config.name, "channel closed, stopping");
                break;
            }
            Err(err) => {
                drop(permit);
                error!(runner = %config.name, error = %err, "channel receive failed");
                tokio::time::sleep(config.receive_backoff).await;
            }
        }
    }

    // Drain: wait until every in-flight handler has returned its permit.
    // The per-handler timeout bounds how long this can take.
    let _ = inflight.acquire_many(max_concurrent as u32).await;

    info!(runner = %config.name, "subscription runner stopped");
}

/// What the ack policy should do with a processed message.
enum Disposition {
    /// Terminal success; acknowledge.
    Ack(&'static str),
    /// Retryable; nack until the attempt bound, then dead-letter.
    Retry(String),
}

async fn process_delivery<S>(
    runner: &str,
    router: &ShipmentEventRouter<S>,
    channel: &dyn EventChannel,
    delivery: Delivery,
    max_attempts: u32,
    handler_timeout: Duration,
) where
    S: InvoiceStore + Clone + Send + Sync + 'static,
{
    let Delivery {
        message_id,
        payload,
        attempt,
        ack,
    } = delivery;

    let (order_id, disposition) = match decode_order_event(&payload) {
        Ok(event) => {
            let order_id = event.order_id.to_string();
            // A hung handler (e.g. a stalled store connection) must not hold
            // its permit forever; time it out and nack for redelivery.
            let disposition =
                match tokio::time::timeout(handler_timeout, router.handle(&event)).await {
                    Ok(RouteOutcome::Ignored) => Disposition::Ack("ignored"),
                    Ok(RouteOutcome::Sent { .. }) => Disposition::Ack("sent"),
                    Ok(RouteOutcome::Deferred) => {
                        Disposition::Retry("no invoice yet for order".to_string())
                    }
                    Ok(RouteOutcome::Failed(err)) => Disposition::Retry(err.to_string()),
                    Err(_) => {
                        Disposition::Retry(format!("handler exceeded {handler_timeout:?}"))
                    }
                };
            (Some(order_id), disposition)
        }
        Err(err) => (None, Disposition::Retry(err.to_string())),
    };

    match disposition {
        Disposition::Ack(outcome) => {
            if let Err(err) = ack.ack().await {
                error!(runner, message_id = %message_id, error = %err, "ack failed");
                return;
            }
            info!(
                runner,
                message_id = %message_id,
                order_id = ?order_id,
                outcome,
                "message acknowledged"
            );
        }
        Disposition::Retry(reason) if attempt >= max_attempts => {
            // Terminal: file a dead-letter copy, then ack the original so
            // redelivery stops.
            if let Err(err) = channel.dead_letter(&message_id, &payload, &reason).await {
                error!(runner, message_id = %message_id, error = %err, "dead-letter failed, nacking");
                let _ = ack.nack().await;
                return;
            }
            if let Err(err) = ack.ack().await {
                error!(runner, message_id = %message_id, error = %err, "ack after dead-letter failed");
                return;
            }
            warn!(
                runner,
                message_id = %message_id,
                order_id = ?order_id,
                attempt,
                reason = %reason,
                outcome = "dead-lettered",
                "message dead-lettered after retry bound"
            );
        }
        Disposition::Retry(reason) => {
            if let Err(err) = ack.nack().await {
                error!(runner, message_id = %message_id, error = %err, "nack failed");
                return;
            }
            debug!(
                runner,
                message_id = %message_id,
                order_id = ?order_id,
                attempt,
                reason = %reason,
                "message nacked for redelivery"
            );
        }
    }
}
