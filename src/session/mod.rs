//! Collaborators at the session boundary
//!
//! The booking core consumes two services it does not own: an oracle telling
//! whether a player is already in a match, and a starter that turns a roster
//! into a running match.

pub mod oracle;
pub mod starter;

// Re-export commonly used types
pub use oracle::{ActiveSessionRegistry, SessionOracle};
pub use starter::{MockSessionStarter, RegisteringSessionStarter, SessionStarter};
