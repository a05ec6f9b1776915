use std::sync::Arc;

use shipbill_api::app::{self, services};
use shipbill_api::config::ApiConfig;
use shipbill_events::{RunnerConfig, ShipmentEventRouter, SubscriptionRunner};
use shipbill_invoicing::InvoiceLifecycle;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    shipbill_observability::init();

    let config = ApiConfig::from_env();

    let store = services::build_store(&config).await?;
    let app_services = Arc::new(services::AppServices::new(store.clone()));

    let runner = match build_channel(&config).await? {
        Some(channel) => {
            let runner_config = RunnerConfig::default()
                .with_name(config.consumer_group.clone())
                .with_max_concurrent(config.dispatch_max_concurrent)
                .with_max_attempts(config.dispatch_max_attempts)
                .with_handler_timeout(config.dispatch_handler_timeout)
                .with_receive_backoff(config.dispatch_receive_backoff);
            let router = ShipmentEventRouter::new(InvoiceLifecycle::new(store));
            Some(SubscriptionRunner::spawn(channel, router, runner_config))
        }
        None => {
            tracing::warn!("no event channel configured; order event subscription disabled");
            None
        }
    };

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app::build_app(app_services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(runner) = runner {
        tracing::info!("draining subscription runner");
        runner.shutdown().await;
    }

    Ok(())
}

#[cfg(feature = "redis")]
async fn build_channel(
    config: &ApiConfig,
) -> anyhow::Result<Option<Arc<dyn shipbill_events::EventChannel>>> {
    use shipbill_infra::{RedisStreamsConfig, RedisStreamsEventChannel};

    let Some(redis_url) = &config.redis_url else {
        return Ok(None);
    };

    let streams_config = RedisStreamsConfig::new(
        config.order_stream_key.clone(),
        config.consumer_group.clone(),
        config.consumer_name.clone(),
    );
    let channel = RedisStreamsEventChannel::connect(redis_url, streams_config).await?;
    Ok(Some(Arc::new(channel)))
}

#[cfg(not(feature = "redis"))]
async fn build_channel(
    _config: &ApiConfig,
) -> anyhow::Result<Option<Arc<dyn shipbill_events::EventChannel>>> {
    Ok(None)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
