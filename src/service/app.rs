//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the booking core to
//! AMQP, the session registry, and the monitoring endpoints.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{CommandConsumer, CommandHandler};
use crate::amqp::messages::{InboundCommand, BOOKING_COMMANDS_QUEUE};
use crate::amqp::publisher::{AmqpSessionStarter, PublisherConfig};
use crate::booking::manager::{BookOutcome, BookingManager};
use crate::booking::service::{BookingHandle, BookingService};
use crate::config::AppConfig;
use crate::error::{BookingError, Result as BookingResult};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::service::health::{HealthCheck, HealthStatus, ServiceProbe};
use crate::session::{ActiveSessionRegistry, RegisteringSessionStarter, SessionStarter};
use crate::utils::as_millis_f64;
use amqprs::channel::QueueDeclareArguments;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// Interval between health gauge refreshes
const HEALTH_METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Routes decoded AMQP commands to the booking service and session registry
pub struct BookingCommandHandler {
    booking: BookingHandle,
    registry: Arc<ActiveSessionRegistry>,
    fatal_tx: broadcast::Sender<String>,
}

impl BookingCommandHandler {
    pub fn new(
        booking: BookingHandle,
        registry: Arc<ActiveSessionRegistry>,
        fatal_tx: broadcast::Sender<String>,
    ) -> Self {
        Self {
            booking,
            registry,
            fatal_tx,
        }
    }
}

#[async_trait]
impl CommandHandler for BookingCommandHandler {
    async fn handle_command(&self, command: InboundCommand) -> BookingResult<()> {
        let start_time = Instant::now();
        let name = command.name();

        match command {
            InboundCommand::Book { uid, match_type } => {
                let outcome = self.booking.book(uid, match_type).await?;
                match &outcome {
                    BookOutcome::Released(start) => info!(
                        "Book from uid {} released {} match {}",
                        uid, match_type, start.match_id
                    ),
                    other => debug!("Book from uid {} for {}: {:?}", uid, match_type, other),
                }
            }
            InboundCommand::Unbook { uid } => {
                let removed_from = self.booking.unbook(uid).await?;
                debug!("Unbook from uid {} left {:?}", uid, removed_from);
            }
            InboundCommand::SessionOpened { uids } => {
                self.registry.open_session(&uids)?;
                info!("Session opened for {} players", uids.len());
            }
            InboundCommand::SessionClosed { uids } => {
                self.registry.close_session(&uids)?;
                info!("Session closed for {} players", uids.len());
            }
        }

        debug!(
            "Handled {} command in {:.2}ms",
            name,
            as_millis_f64(start_time.elapsed())
        );
        Ok(())
    }

    async fn handle_protocol_violation(&self, error: BookingError, message_data: &[u8]) {
        error!(
            "Protocol violation on {} - {}, message_size: {} bytes",
            BOOKING_COMMANDS_QUEUE,
            error,
            message_data.len()
        );

        if !message_data.is_empty() {
            let preview_len = std::cmp::min(100, message_data.len());
            let preview = String::from_utf8_lossy(&message_data[..preview_len]);
            error!("Message preview: {:?}", preview);
        }

        if self.fatal_tx.send(error.to_string()).is_err() {
            warn!("No listener for fatal errors; the service keeps running");
        }
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Entry point to the booking mailbox
    booking: BookingHandle,

    /// Task draining the booking mailbox
    booking_task: Option<JoinHandle<()>>,

    /// Players currently in a match
    registry: Arc<ActiveSessionRegistry>,

    /// AMQP connection for message handling
    amqp_connection: Arc<AmqpConnection>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Snapshot source for health checks
    probe: ServiceProbe,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// AMQP consumer for booking commands
    command_consumer: Option<CommandConsumer>,

    /// Service status
    is_running: Arc<RwLock<bool>>,

    /// Fatal errors that must stop the process
    fatal_tx: broadcast::Sender<String>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} booking service", config.service.name);
        info!(
            "Configuration: service={}, amqp_url={}",
            config.service.name, config.amqp.url
        );

        let format_provider =
            Arc::new(
                config
                    .format_provider()
                    .map_err(|e| ServiceError::Configuration {
                        message: format!("Invalid match formats: {}", e),
                    })?,
            );

        let amqp_connection = Self::initialize_amqp(&config).await?;
        let metrics_collector = Self::create_metrics_collector()?;

        let registry = Arc::new(ActiveSessionRegistry::new());
        let starter = Self::initialize_session_starter(
            amqp_connection.clone(),
            registry.clone(),
            metrics_collector.clone(),
        )
        .await?;

        let manager = BookingManager::with_metrics(
            format_provider,
            registry.clone(),
            starter,
            metrics_collector.clone(),
        )
        .with_oracle_timeout(config.oracle_timeout());
        let (booking, booking_task) =
            BookingService::spawn(manager, config.booking.mailbox_capacity);

        let is_running = Arc::new(RwLock::new(false));
        let probe = ServiceProbe::new(
            config.service.name.clone(),
            is_running.clone(),
            booking.clone(),
            registry.clone(),
        )
        .with_amqp(amqp_connection.clone());

        let metrics_service = Self::initialize_metrics(&config, metrics_collector, probe.clone());
        let (fatal_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            booking,
            booking_task: Some(booking_task),
            registry,
            amqp_connection,
            metrics_service,
            probe,
            background_tasks: Vec::new(),
            command_consumer: None,
            is_running,
            fatal_tx,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting booking service");

        *self.is_running.write().await = true;

        self.start_metrics_service().await?;
        self.start_amqp_consumption().await?;
        self.start_background_tasks();

        info!("Booking service started");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of booking service");

        *self.is_running.write().await = false;

        if let Some(consumer) = self.command_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("AMQP message consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        }

        match self.booking.flush().await {
            Ok(flushed) if flushed > 0 => info!("Waited for {} match hand-offs", flushed),
            Ok(_) => {}
            Err(e) => warn!("Failed to flush match hand-offs: {}", e),
        }

        let final_stats =
            self.booking
                .stats()
                .await
                .map_err(|e| ServiceError::BackgroundTask {
                    message: format!("Failed to get final stats: {}", e),
                })?;
        info!("Final booking statistics: {:?}", final_stats);

        let counts = self.booking.count_query().await.unwrap_or_default();
        if counts.total() > 0 {
            warn!(
                "Shutting down with {} players still waiting: {:?}",
                counts.total(),
                counts
            );
        }

        if let Some(task) = self.booking_task.take() {
            task.abort();
        }

        info!("Booking service shutdown completed");
        Ok(())
    }

    /// Subscribe to fatal errors raised while the service runs
    pub fn fatal_errors(&self) -> broadcast::Receiver<String> {
        self.fatal_tx.subscribe()
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Entry point to the booking mailbox
    pub fn booking(&self) -> BookingHandle {
        self.booking.clone()
    }

    /// Players currently in a match
    pub fn session_registry(&self) -> Arc<ActiveSessionRegistry> {
        self.registry.clone()
    }

    /// Snapshot source for health checks
    pub fn probe(&self) -> ServiceProbe {
        self.probe.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Get AMQP connection for health checks
    pub fn amqp_connection(&self) -> Arc<AmqpConnection> {
        self.amqp_connection.clone()
    }

    fn create_metrics_collector() -> Result<Arc<MetricsCollector>, ServiceError> {
        MetricsCollector::new()
            .map(Arc::new)
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create metrics collector: {}", e),
            })
    }

    /// Initialize metrics service
    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        probe: ServiceProbe,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server =
            Arc::new(HealthServer::new(health_config, metrics_collector.clone()).with_probe(probe));
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    /// Start metrics service
    async fn start_metrics_service(&mut self) -> Result<(), ServiceError> {
        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("Metrics service started on port {}", port);
        Ok(())
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config = Self::amqp_config(config)?;
        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    /// Connection settings from the URL plus the configured retry policy
    fn amqp_config(config: &AppConfig) -> Result<AmqpConfig, ServiceError> {
        let mut amqp_config = AmqpConfig::from_url(&config.amqp.url)
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?
            .with_retry(config.amqp.max_retry_attempts, config.amqp.retry_delay_ms);
        amqp_config.connection_timeout_ms = config.amqp_connection_timeout().as_millis() as u64;
        Ok(amqp_config)
    }

    /// Publisher for released matches, wrapped so seated players count as playing
    async fn initialize_session_starter(
        amqp_connection: Arc<AmqpConnection>,
        registry: Arc<ActiveSessionRegistry>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<Arc<dyn SessionStarter>, ServiceError> {
        let channel = amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open AMQP channel: {}", e),
            })?;

        let publisher = AmqpSessionStarter::new(channel, PublisherConfig::default())
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize match publisher: {}", e),
            })?
            .with_metrics(metrics_collector);

        Ok(Arc::new(RegisteringSessionStarter::new(
            registry,
            Arc::new(publisher),
        )))
    }

    /// Start AMQP message consumption
    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let channel = self
            .amqp_connection
            .connection()
            .open_channel(None)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let queue_declare_args = QueueDeclareArguments::new(BOOKING_COMMANDS_QUEUE)
            .durable(true)
            .auto_delete(false)
            .finish();
        channel
            .queue_declare(queue_declare_args)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to declare queue {}: {}", BOOKING_COMMANDS_QUEUE, e),
            })?;
        info!("Queue '{}' declared", BOOKING_COMMANDS_QUEUE);

        let handler = Arc::new(BookingCommandHandler::new(
            self.booking.clone(),
            self.registry.clone(),
            self.fatal_tx.clone(),
        ));
        let consumer =
            CommandConsumer::new(handler, channel).with_metrics(self.metrics_service.collector());

        consumer
            .start_consuming(BOOKING_COMMANDS_QUEUE)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.command_consumer = Some(consumer);
        Ok(())
    }

    /// Start background maintenance tasks
    fn start_background_tasks(&mut self) {
        let metrics_collector = self.metrics_service.collector();
        let probe = self.probe.clone();
        let is_running = self.is_running.clone();

        let health_metrics_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEALTH_METRICS_INTERVAL);
            let start_time = tokio::time::Instant::now();
            info!("Health metrics task started");

            while *is_running.read().await {
                interval.tick().await;

                metrics_collector
                    .service()
                    .uptime_seconds
                    .set(start_time.elapsed().as_secs() as i64);

                match HealthCheck::check(&probe).await {
                    Ok(health) => {
                        metrics_collector.update_health_status(health.status.as_gauge());
                        for check in &health.checks {
                            metrics_collector.update_component_health(
                                &check.name,
                                check.status != HealthStatus::Unhealthy,
                            );
                        }
                        debug!(
                            "Health check: {} - {} players waiting, {} matches started",
                            health.status,
                            health.stats.players_waiting,
                            health.stats.matches_started
                        );
                    }
                    Err(e) => warn!("Health check failed: {}", e),
                }
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.push(health_metrics_task);
        info!("{} background tasks running", self.background_tasks.len());
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);
        for task in self.background_tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        info!("All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::format::StaticFormatProvider;
    use crate::session::{MockSessionStarter, SessionOracle};
    use crate::types::{MatchType, Uid};

    fn handler() -> (
        BookingCommandHandler,
        Arc<ActiveSessionRegistry>,
        Arc<MockSessionStarter>,
        broadcast::Receiver<String>,
    ) {
        let registry = Arc::new(ActiveSessionRegistry::new());
        let starter = Arc::new(MockSessionStarter::new());
        let manager = BookingManager::new(
            Arc::new(StaticFormatProvider::new()),
            registry.clone(),
            Arc::new(RegisteringSessionStarter::new(
                registry.clone(),
                starter.clone(),
            )),
        );
        let (booking, _task) = BookingService::spawn(manager, 8);
        let (fatal_tx, fatal_rx) = broadcast::channel(4);

        (
            BookingCommandHandler::new(booking, registry.clone(), fatal_tx),
            registry,
            starter,
            fatal_rx,
        )
    }

    #[tokio::test]
    async fn test_book_commands_reach_booking_service() {
        let (handler, registry, starter, _fatal_rx) = handler();

        for uid in [Uid(1), Uid(2)] {
            handler
                .handle_command(InboundCommand::Book {
                    uid,
                    match_type: MatchType::Pair,
                })
                .await
                .unwrap();
        }
        // Seats are claimed at release, before the hand-off runs
        assert!(registry.is_playing(Uid(1)).await.unwrap());
        handler.booking.flush().await.unwrap();

        let started = starter.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].roster.len(), 4);
        assert!(registry.is_playing(Uid(1)).await.unwrap());
        assert!(registry.is_playing(Uid(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_events_feed_the_oracle() {
        let (handler, registry, starter, _fatal_rx) = handler();

        handler
            .handle_command(InboundCommand::SessionOpened {
                uids: vec![Uid(5)],
            })
            .await
            .unwrap();
        handler
            .handle_command(InboundCommand::Book {
                uid: Uid(5),
                match_type: MatchType::Solo,
            })
            .await
            .unwrap();
        assert!(starter.started().is_empty());

        handler
            .handle_command(InboundCommand::SessionClosed {
                uids: vec![Uid(5)],
            })
            .await
            .unwrap();
        assert!(!registry.is_playing(Uid(5)).await.unwrap());

        handler
            .handle_command(InboundCommand::Book {
                uid: Uid(5),
                match_type: MatchType::Solo,
            })
            .await
            .unwrap();
        handler.booking.flush().await.unwrap();
        assert_eq!(starter.started().len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_violation_is_broadcast() {
        let (handler, _registry, _starter, mut fatal_rx) = handler();

        handler
            .handle_protocol_violation(
                BookingError::ProtocolViolation {
                    reason: "unknown command".to_string(),
                },
                b"{\"type\":\"x\"}",
            )
            .await;

        let reason = fatal_rx.recv().await.unwrap();
        assert!(reason.contains("unknown command"));
    }

    #[test]
    fn test_amqp_config_from_app_config() {
        let mut config = AppConfig::default();
        config.amqp.url = "amqp://booker:pw@rabbit:5673/%2f".to_string();
        config.amqp.max_retry_attempts = 2;
        config.amqp.connection_timeout_seconds = 3;

        let amqp_config = AppState::amqp_config(&config).unwrap();

        assert_eq!(amqp_config.host, "rabbit");
        assert_eq!(amqp_config.port, 5673);
        assert_eq!(amqp_config.max_retries, 2);
        assert_eq!(amqp_config.connection_timeout_ms, 3000);
    }

    #[test]
    fn test_bad_amqp_url_is_configuration_error() {
        let mut config = AppConfig::default();
        config.amqp.url = "rabbit:5672".to_string();

        assert!(matches!(
            AppState::amqp_config(&config),
            Err(ServiceError::Configuration { .. })
        ));
    }
}
