//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the booking service using
//! Prometheus metrics.

use crate::types::{BookingCounts, MatchType};
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the booking service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Booking-related metrics
    booking_metrics: BookingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Total AMQP messages processed
    pub amqp_messages_total: IntCounterVec,

    /// AMQP message processing errors
    pub amqp_errors_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Booking-related metrics
#[derive(Clone)]
pub struct BookingMetrics {
    /// Book requests by match type and outcome
    pub book_requests_total: IntCounterVec,

    /// Unbook requests
    pub unbooks_total: IntCounter,

    /// Players currently waiting per match type
    pub players_waiting: IntGaugeVec,

    /// Matches handed to the session starter
    pub matches_started_total: IntCounterVec,

    /// Bots seated by roster padding
    pub synthetic_participants_total: IntCounterVec,

    /// Session starter hand-off failures
    pub session_start_failures_total: IntCounter,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Session oracle round trip
    pub oracle_duration: Histogram,

    /// Oracle errors and timeouts
    pub oracle_failures_total: IntCounter,

    /// Mailbox command processing time
    pub command_duration: HistogramVec,

    /// AMQP operation durations
    pub amqp_operation_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let booking_metrics = BookingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            booking_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Get service metrics
    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    /// Get booking metrics
    pub fn booking(&self) -> &BookingMetrics {
        &self.booking_metrics
    }

    /// Get performance metrics
    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record a processed book request
    pub fn record_book_request(&self, match_type: MatchType, outcome: &str) {
        self.booking_metrics
            .book_requests_total
            .with_label_values(&[match_type.as_str(), outcome])
            .inc();
    }

    /// Record an unbook request
    pub fn record_unbook(&self) {
        self.booking_metrics.unbooks_total.inc();
    }

    /// Record a released match
    pub fn record_match_started(&self, match_type: MatchType, synthetic_count: usize) {
        self.booking_metrics
            .matches_started_total
            .with_label_values(&[match_type.as_str()])
            .inc();

        self.booking_metrics
            .synthetic_participants_total
            .with_label_values(&[match_type.as_str()])
            .inc_by(synthetic_count as u64);
    }

    /// Record a failed hand-off to the session starter
    pub fn record_session_start_failure(&self) {
        self.booking_metrics.session_start_failures_total.inc();
    }

    /// Record one oracle call
    pub fn record_oracle_call(&self, duration: Duration, success: bool) {
        self.performance_metrics
            .oracle_duration
            .observe(duration.as_secs_f64());

        if !success {
            self.performance_metrics.oracle_failures_total.inc();
        }
    }

    /// Record mailbox command processing time
    pub fn record_command(&self, command: &str, duration: Duration) {
        self.performance_metrics
            .command_duration
            .with_label_values(&[command])
            .observe(duration.as_secs_f64());
    }

    /// Publish the current waiting counts
    pub fn update_waiting(&self, counts: &BookingCounts) {
        for match_type in MatchType::ALL {
            self.booking_metrics
                .players_waiting
                .with_label_values(&[match_type.as_str()])
                .set(counts.get(match_type) as i64);
        }
    }

    /// Record AMQP operation
    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.performance_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("booking_hall_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "booking_hall_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("booking_hall_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let health_status = IntGauge::new(
            "booking_hall_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("booking_hall_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            health_status,
            component_health,
        })
    }
}

impl BookingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let book_requests_total = IntCounterVec::new(
            Opts::new(
                "booking_hall_book_requests_total",
                "Book requests by outcome",
            ),
            &["match_type", "outcome"],
        )?;
        registry.register(Box::new(book_requests_total.clone()))?;

        let unbooks_total =
            IntCounter::new("booking_hall_unbooks_total", "Total unbook requests")?;
        registry.register(Box::new(unbooks_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "booking_hall_players_waiting",
                "Players currently waiting per match type",
            ),
            &["match_type"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let matches_started_total = IntCounterVec::new(
            Opts::new(
                "booking_hall_matches_started_total",
                "Matches handed to the session starter",
            ),
            &["match_type"],
        )?;
        registry.register(Box::new(matches_started_total.clone()))?;

        let synthetic_participants_total = IntCounterVec::new(
            Opts::new(
                "booking_hall_synthetic_participants_total",
                "Bots seated by roster padding",
            ),
            &["match_type"],
        )?;
        registry.register(Box::new(synthetic_participants_total.clone()))?;

        let session_start_failures_total = IntCounter::new(
            "booking_hall_session_start_failures_total",
            "Failed hand-offs to the session starter",
        )?;
        registry.register(Box::new(session_start_failures_total.clone()))?;

        Ok(Self {
            book_requests_total,
            unbooks_total,
            players_waiting,
            matches_started_total,
            synthetic_participants_total,
            session_start_failures_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let oracle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "booking_hall_oracle_duration_seconds",
                "Session oracle round trip",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        )?;
        registry.register(Box::new(oracle_duration.clone()))?;

        let oracle_failures_total = IntCounter::new(
            "booking_hall_oracle_failures_total",
            "Session oracle errors and timeouts",
        )?;
        registry.register(Box::new(oracle_failures_total.clone()))?;

        let command_duration = HistogramVec::new(
            HistogramOpts::new(
                "booking_hall_command_duration_seconds",
                "Mailbox command processing time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["command"],
        )?;
        registry.register(Box::new(command_duration.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "booking_hall_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        Ok(Self {
            oracle_duration,
            oracle_failures_total,
            command_duration,
            amqp_operation_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
