//! Main entry point for the Booking Hall service
//!
//! Loads configuration, starts the booking service with its AMQP and HTTP
//! surfaces, and shuts down on a signal or on a fatal protocol violation.

use anyhow::Result;
use booking_hall::booking::FormatProvider;
use booking_hall::config::{validate_config, AppConfig};
use booking_hall::service::AppState;
use clap::Parser;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Booking Hall - match admission service
#[derive(Parser)]
#[command(
    name = "booking-hall",
    version,
    about = "Collects match bookings and releases rosters once enough players are waiting",
    long_about = "Booking Hall accepts book and unbook commands over AMQP, keeps one ordered \
                 waiting list per match type, and announces a padded roster on the match \
                 exchange whenever a list reaches its threshold."
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// AMQP URL override
    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    /// Health port override
    #[arg(long, value_name = "PORT", help = "Override health and metrics server port")]
    health_port: Option<u16>,

    /// Enable debug mode
    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    /// Dry run mode (validate config and exit)
    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Why the service stopped
enum ShutdownReason {
    Signal,
    Fatal(String),
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT (Ctrl+C) signal");
            },
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            },
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}

/// Wait for a signal or a fatal service error, whichever comes first
async fn wait_for_shutdown(mut fatal_rx: broadcast::Receiver<String>) -> ShutdownReason {
    tokio::select! {
        result = wait_for_shutdown_signal() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            ShutdownReason::Signal
        },
        fatal = fatal_rx.recv() => {
            let reason = fatal.unwrap_or_else(|e| format!("fatal error channel closed: {}", e));
            ShutdownReason::Fatal(reason)
        },
    }
}

/// Display startup banner with service information
fn display_startup_banner(config: &AppConfig) {
    info!("Booking Hall");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {}", config.amqp.url);
    info!("   Oracle timeout: {}ms", config.booking.oracle_timeout_ms);
    info!("   Mailbox capacity: {}", config.booking.mailbox_capacity);
    match config.format_provider() {
        Ok(provider) => {
            for match_type in provider.match_types() {
                let format = provider.format_for(match_type);
                info!(
                    "   {}: {} players, {} seats",
                    match_type, format.needed_players, format.capacity
                );
            }
        }
        Err(e) => warn!("   Match formats invalid: {}", e),
    }
}

/// Load and merge configuration from file, environment and CLI arguments
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(config_path) => AppConfig::from_file(config_path)?,
        None => AppConfig::from_env()?,
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    display_startup_banner(&config);

    if args.dry_run {
        info!("Configuration validation successful");
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    info!("Initializing service components...");
    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    let fatal_rx = app_state.fatal_errors();

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("Booking Hall is running");
    info!("Press Ctrl+C to shutdown gracefully...");

    let reason = wait_for_shutdown(fatal_rx).await;
    match &reason {
        ShutdownReason::Signal => info!("Shutdown signal received, beginning graceful shutdown..."),
        ShutdownReason::Fatal(message) => {
            error!("Fatal error, shutting down: {}", message)
        }
    }

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    info!("Booking Hall stopped");

    if let ShutdownReason::Fatal(_) = reason {
        std::process::exit(2);
    }
    Ok(())
}
