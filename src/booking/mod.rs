//! Match booking core
//!
//! This module collects players per match type, releases a roster once enough
//! of them have booked, and pads it with bots up to the format's seat count.

pub mod format;
pub mod manager;
pub mod roster;
pub mod service;
pub mod state;

// Re-export commonly used types
pub use format::{FormatProvider, MatchFormat, StaticFormatProvider};
pub use manager::{BookOutcome, BookingManager, BookingManagerStats, RejectReason};
pub use roster::{fill_roster, SyntheticIdAllocator};
pub use service::{BookingCommand, BookingHandle, BookingService};
pub use state::BookState;
