//! Health checks and monitoring
//!
//! This module provides health check functionality for the booking service,
//! including readiness and liveness probes.

use crate::amqp::connection::AmqpConnection;
use crate::booking::manager::BookingManagerStats;
use crate::booking::service::BookingHandle;
use crate::session::ActiveSessionRegistry;
use crate::types::BookingCounts;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Gauge value exported as `booking_hall_health_status`
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    /// The worse of two statuses
    fn worst(self, other: HealthStatus) -> HealthStatus {
        if self.as_gauge() <= other.as_gauge() {
            self
        } else {
            other
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Cheap handle onto the parts of a running service that health checks inspect
#[derive(Clone)]
pub struct ServiceProbe {
    service_name: String,
    is_running: Arc<RwLock<bool>>,
    booking: BookingHandle,
    registry: Arc<ActiveSessionRegistry>,
    amqp_connection: Option<Arc<AmqpConnection>>,
    started_at: Instant,
}

impl ServiceProbe {
    pub fn new(
        service_name: impl Into<String>,
        is_running: Arc<RwLock<bool>>,
        booking: BookingHandle,
        registry: Arc<ActiveSessionRegistry>,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            is_running,
            booking,
            registry,
            amqp_connection: None,
            started_at: Instant::now(),
        }
    }

    /// Include the broker connection in health checks
    pub fn with_amqp(mut self, connection: Arc<AmqpConnection>) -> Self {
        self.amqp_connection = Some(connection);
        self
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn booking(&self) -> &BookingHandle {
        &self.booking
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Players waiting per match type
    pub waiting: BookingCounts,
    /// Total players currently waiting
    pub players_waiting: usize,
    /// Players the session registry reports in a match
    pub players_in_session: usize,
    /// Matches released since service start
    pub matches_started: u64,
    /// Bots seated since service start
    pub synthetic_seated: u64,
    /// Book requests turned away since service start
    pub books_rejected: u64,
    /// Uptime in seconds
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(probe: &ServiceProbe) -> Result<Self> {
        let mut checks = Vec::new();

        checks.push(Self::check_service_running(probe).await);
        checks.push(Self::check_booking_service(probe).await);
        checks.push(Self::check_amqp_health(probe));

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |overall, check| {
                overall.worst(check.status.clone())
            });

        let stats = Self::gather_service_stats(probe).await;

        Ok(HealthCheck {
            status,
            service: probe.service_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if probe.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(probe: &ServiceProbe) -> Result<HealthStatus> {
        if !probe.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_booking_service(probe).await.status)
    }

    async fn check_service_running(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = if probe.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The booking mailbox answers a count query
    async fn check_booking_service(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match probe.booking.count_query().await {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(format!("Booking service not answering: {}", e)),
            ),
        };

        ComponentCheck {
            name: "booking_service".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_amqp_health(probe: &ServiceProbe) -> ComponentCheck {
        let start = Instant::now();

        let (status, message) = match &probe.amqp_connection {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("AMQP connection closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("AMQP not connected".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Gather current service statistics
    async fn gather_service_stats(probe: &ServiceProbe) -> ServiceStats {
        let mut stats = ServiceStats {
            players_in_session: probe.registry.active_count(),
            uptime_seconds: probe.started_at.elapsed().as_secs(),
            ..ServiceStats::default()
        };

        match probe.booking.count_query().await {
            Ok(counts) => {
                stats.players_waiting = counts.total();
                stats.waiting = counts;
            }
            Err(e) => debug!("Failed to get booking counts for health check: {}", e),
        }

        match probe.booking.stats().await {
            Ok(BookingManagerStats {
                matches_started,
                synthetic_seated,
                books_rejected,
                ..
            }) => {
                stats.matches_started = matches_started;
                stats.synthetic_seated = synthetic_seated;
                stats.books_rejected = books_rejected;
            }
            Err(e) => debug!("Failed to get booking stats for health check: {}", e),
        }

        stats
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}
