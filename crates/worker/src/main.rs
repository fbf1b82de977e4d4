use std::sync::Arc;

use tracing::{info, warn};

use bazaar_commerce::{channels, default_registry};
use bazaar_core::Environment;
use bazaar_events::EventConsumer;
use bazaar_infra::{AppConfig, RabbitMqChannel};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let environment = std::env::var("APP_ENV")
        .ok()
        .and_then(|raw| raw.parse::<Environment>().ok())
        .unwrap_or_default();
    bazaar_observability::init(environment);

    let config = AppConfig::from_env()?;

    let mut consumer_config = config.consumer.clone();
    if consumer_config.bindings.is_empty() {
        consumer_config.bindings = channels::default_bindings();
    }

    let channel = Arc::new(RabbitMqChannel::connect(&config.amqp_url).await?);
    let registry = Arc::new(default_registry()?);
    info!(discriminators = ?registry.discriminators(), "handlers registered");

    let consumer = Arc::new(EventConsumer::new(channel.clone(), registry, consumer_config)?);
    consumer.declare_topology().await?;
    let running = Arc::clone(&consumer).spawn();

    let requested = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("shutdown requested, draining in-flight deliveries");
            true
        }
        () = running.stopped() => false,
    };

    let result = running.shutdown().await;
    if let Err(err) = channel.close().await {
        warn!(error = %err, "failed to close AMQP connection");
    }
    info!(stats = ?consumer.stats(), "worker stopped");

    result?;
    if !requested {
        anyhow::bail!("consumer stopped without a shutdown request");
    }
    Ok(())
}
