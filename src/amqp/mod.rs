//! AMQP integration for the booking service
//!
//! Book and unbook commands arrive on a durable queue; released matches leave
//! through a topic exchange.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{CommandConsumer, CommandHandler};
pub use messages::*;
pub use publisher::{AmqpSessionStarter, PublisherConfig};
