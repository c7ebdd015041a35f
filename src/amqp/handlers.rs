//! AMQP consumer for inbound booking commands
//!
//! Deliveries are decoded into [`InboundCommand`]s and handed to a
//! [`CommandHandler`]. A delivery that does not decode is a protocol violation:
//! it is rejected without requeue and reported to the handler, which decides
//! how the service goes down.

use crate::amqp::messages::InboundCommand;
use crate::error::{BookingError, Result};
use crate::metrics::MetricsCollector;
use crate::utils::as_millis_f64;
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicNackArguments,
        Channel,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Trait defining the interface for handling booking commands
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Apply a decoded command
    async fn handle_command(&self, command: InboundCommand) -> Result<()>;

    /// Called once for every delivery that is not a well-formed command
    async fn handle_protocol_violation(&self, error: BookingError, message_data: &[u8]);
}

/// What the consumer does with a delivery after processing it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryDisposition {
    /// Processed; acknowledge
    Ack,
    /// Failed for a transient reason; return to the queue
    Requeue,
    /// Will never succeed; drop it
    Reject,
}

/// Consumer for the booking command queue
pub struct CommandConsumer {
    handler: Arc<dyn CommandHandler>,
    channel: Channel,
    consumer_tag: String,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

impl CommandConsumer {
    /// Create a new command consumer
    pub fn new(handler: Arc<dyn CommandHandler>, channel: Channel) -> Self {
        let consumer_tag = format!("booking-consumer-{}", uuid::Uuid::new_v4());

        Self {
            handler,
            channel,
            consumer_tag,
            metrics_collector: None,
        }
    }

    /// Record consumed messages into `collector`
    pub fn with_metrics(mut self, collector: Arc<MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    /// Start consuming messages from the queue
    pub async fn start_consuming(&self, queue_name: &str) -> Result<()> {
        let args = BasicConsumeArguments::new(queue_name, &self.consumer_tag);
        let consumer = CommandDeliveryConsumer {
            handler: self.handler.clone(),
            metrics_collector: self.metrics_collector.clone(),
        };

        self.channel
            .basic_consume(consumer, args)
            .await
            .map_err(|e| BookingError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!("Started consuming messages from queue: {}", queue_name);
        Ok(())
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| BookingError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming messages");
        Ok(())
    }
}

/// Per-delivery consumer registered with the channel
struct CommandDeliveryConsumer {
    handler: Arc<dyn CommandHandler>,
    metrics_collector: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl AsyncConsumer for CommandDeliveryConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "AMQP message received - delivery_tag: {}, routing_key: '{}', size: {} bytes",
            delivery_tag,
            deliver.routing_key(),
            content.len()
        );

        let start_time = Instant::now();
        let disposition = process_delivery(self.handler.as_ref(), &content).await;
        let processing_time = start_time.elapsed();

        if let Some(metrics) = &self.metrics_collector {
            metrics.record_amqp_operation(
                "consume",
                disposition == DeliveryDisposition::Ack,
                processing_time,
            );
        }

        let settled = match disposition {
            DeliveryDisposition::Ack => {
                debug!(
                    "Message processed - delivery_tag: {}, processing_time: {:.2}ms",
                    delivery_tag,
                    as_millis_f64(processing_time)
                );
                channel
                    .basic_ack(BasicAckArguments::new(delivery_tag, false))
                    .await
            }
            DeliveryDisposition::Requeue => {
                channel
                    .basic_nack(BasicNackArguments::new(delivery_tag, false, true))
                    .await
            }
            DeliveryDisposition::Reject => {
                channel
                    .basic_nack(BasicNackArguments::new(delivery_tag, false, false))
                    .await
            }
        };

        if let Err(e) = settled {
            error!(
                "Failed to settle delivery {} as {:?}: {}",
                delivery_tag, disposition, e
            );
        }
    }
}

/// Decode one delivery and hand it to `handler`
pub async fn process_delivery(
    handler: &dyn CommandHandler,
    content: &[u8],
) -> DeliveryDisposition {
    let command = match InboundCommand::from_bytes(content) {
        Ok(command) => command,
        Err(e) => {
            let violation = match e.downcast::<BookingError>() {
                Ok(violation) => violation,
                Err(other) => BookingError::ProtocolViolation {
                    reason: other.to_string(),
                },
            };
            error!("Rejecting delivery: {}", violation);
            handler.handle_protocol_violation(violation, content).await;
            return DeliveryDisposition::Reject;
        }
    };

    let name = command.name();
    match handler.handle_command(command).await {
        Ok(()) => DeliveryDisposition::Ack,
        Err(e) => {
            warn!("Failed to apply {} command: {}", name, e);
            DeliveryDisposition::Requeue
        }
    }
}

/// Mock command handler for testing
#[derive(Debug, Default)]
pub struct MockCommandHandler {
    pub received_commands: tokio::sync::Mutex<Vec<InboundCommand>>,
    pub violations: tokio::sync::Mutex<Vec<String>>,
    fail_commands: bool,
}

impl MockCommandHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler whose every command fails
    pub fn failing() -> Self {
        Self {
            fail_commands: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl CommandHandler for MockCommandHandler {
    async fn handle_command(&self, command: InboundCommand) -> Result<()> {
        if self.fail_commands {
            return Err(BookingError::ServiceUnavailable {
                message: "mock handler refuses commands".to_string(),
            }
            .into());
        }
        self.received_commands.lock().await.push(command);
        Ok(())
    }

    async fn handle_protocol_violation(&self, error: BookingError, _message_data: &[u8]) {
        self.violations.lock().await.push(error.to_string());
    }
}
