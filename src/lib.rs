//! Booking Hall - match admission service
//!
//! This crate collects players who book a match type, releases a roster once
//! enough of them are waiting, and hands the match off over AMQP.

pub mod amqp;
pub mod booking;
pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod session;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{BookingError, Result};
pub use types::*;

// Re-export key components
pub use booking::{BookOutcome, BookingHandle, BookingManager, BookingService};
pub use session::{ActiveSessionRegistry, SessionOracle, SessionStarter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
