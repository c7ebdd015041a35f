//! AMQP publisher for released matches

use crate::amqp::connection::next_delay;
use crate::amqp::messages::{MessageEnvelope, MATCH_EVENTS_EXCHANGE};
use crate::error::{BookingError, Result};
use crate::metrics::MetricsCollector;
use crate::session::SessionStarter;
use crate::types::MatchStart;
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

const MAX_PUBLISH_DELAY_MS: u64 = 5000;

/// Configuration for match publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            publish_timeout_ms: 5000,
        }
    }
}

/// Session starter that announces each released match on the match exchange
///
/// The announcement is the hand-off: whoever runs matches consumes
/// `match.starting` and takes it from there. Each release carries a fresh
/// match id and is announced once, so the publisher keeps no per-match state.
pub struct AmqpSessionStarter {
    channel: Channel,
    config: PublisherConfig,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl AmqpSessionStarter {
    /// Create a publisher and declare the match exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let starter = Self {
            channel,
            config,
            metrics_collector: None,
        };

        starter.setup_exchange().await?;

        Ok(starter)
    }

    /// Record publish outcomes into `collector`
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    async fn setup_exchange(&self) -> Result<()> {
        let args = ExchangeDeclareArguments::new(MATCH_EVENTS_EXCHANGE, "topic")
            .durable(true)
            .finish();
        self.channel.exchange_declare(args).await.map_err(|e| {
            BookingError::AmqpConnectionFailed {
                message: format!("Failed to declare match exchange: {}", e),
            }
        })?;

        info!("Declared exchange '{}'", MATCH_EVENTS_EXCHANGE);
        Ok(())
    }

    /// Publish with retry and exponential backoff
    async fn publish_with_retry(&self, envelope: &MessageEnvelope<MatchStart>) -> Result<()> {
        retry_publish(&self.config, &envelope.correlation_id, move || async move {
            let started = Instant::now();
            let attempt = self.try_publish(envelope).await;
            self.record_attempt(attempt.is_ok(), started.elapsed());
            attempt
        })
        .await?;

        debug!(
            "Published match {} to exchange {}",
            envelope.correlation_id, MATCH_EVENTS_EXCHANGE
        );
        Ok(())
    }

    /// Single publish attempt, bounded by the publish timeout
    async fn try_publish(&self, envelope: &MessageEnvelope<MatchStart>) -> Result<()> {
        let payload = envelope.to_bytes()?;

        let args = BasicPublishArguments::new(MATCH_EVENTS_EXCHANGE, &envelope.routing_key);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&envelope.correlation_id)
            .with_timestamp(envelope.timestamp.timestamp() as u64)
            .with_content_type("application/json");

        timeout(
            Duration::from_millis(self.config.publish_timeout_ms),
            self.channel.basic_publish(properties, payload, args),
        )
        .await
        .map_err(|_| BookingError::AmqpConnectionFailed {
            message: format!(
                "Publish timed out after {}ms",
                self.config.publish_timeout_ms
            ),
        })?
        .map_err(|e| BookingError::AmqpConnectionFailed {
            message: format!("Failed to publish message: {}", e),
        })?;

        Ok(())
    }

    fn record_attempt(&self, success: bool, duration: Duration) {
        if let Some(metrics) = &self.metrics_collector {
            metrics.record_amqp_operation("publish", success, duration);
        }
    }
}

/// Run `attempt` until it succeeds or `config.max_retries` retries are spent
async fn retry_publish<F, Fut>(config: &PublisherConfig, match_id: &str, mut attempt: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut retry_count = 0;
    let mut delay = Duration::from_millis(config.retry_delay_ms);

    loop {
        match attempt().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                retry_count += 1;
                if retry_count > config.max_retries {
                    error!(
                        "Failed to publish match {} after {} retries: {}",
                        match_id, config.max_retries, e
                    );
                    return Err(BookingError::SessionStartFailed {
                        message: e.to_string(),
                    }
                    .into());
                }

                warn!(
                    "Publish attempt {} failed for match {}: {}. Retrying in {:?}",
                    retry_count, match_id, e, delay
                );

                sleep(delay).await;
                delay = next_delay(delay, MAX_PUBLISH_DELAY_MS);
            }
        }
    }
}

#[async_trait]
impl SessionStarter for AmqpSessionStarter {
    async fn start_match(&self, start: MatchStart) -> Result<()> {
        info!(
            "Announcing match {} ({}, {} seats)",
            start.match_id,
            start.match_type,
            start.roster.len()
        );
        let envelope = MessageEnvelope::match_starting(start);
        self.publish_with_retry(&envelope).await
    }
}
