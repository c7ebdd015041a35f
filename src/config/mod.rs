//! Configuration management for the booking service
//!
//! Settings come from defaults, an optional TOML file, environment variables
//! and finally command line flags, each layer overriding the previous one.

pub mod app;

// Re-export commonly used types
pub use app::{validate_config, AmqpSettings, AppConfig, BookingSettings, ServiceSettings};
