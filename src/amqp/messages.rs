//! AMQP message definitions and serialization

use crate::error::{BookingError, Result};
use crate::types::{MatchStart, MatchType, Uid};
use serde::{Deserialize, Serialize};

/// Queue carrying inbound booking commands
pub const BOOKING_COMMANDS_QUEUE: &str = "booking.commands";

/// Topic exchange released matches are published to
pub const MATCH_EVENTS_EXCHANGE: &str = "booking.matches";

/// Routing key for released matches
pub const MATCH_STARTING_ROUTING_KEY: &str = "match.starting";

/// Message envelope with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub payload: T,
    pub correlation_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub routing_key: String,
}

impl<T> MessageEnvelope<T>
where
    T: Serialize + serde::de::DeserializeOwned,
{
    /// Create a new message envelope
    pub fn new(payload: T, routing_key: String) -> Self {
        Self::with_correlation_id(payload, routing_key, uuid::Uuid::new_v4().to_string())
    }

    /// Create an envelope with a caller-chosen correlation id
    pub fn with_correlation_id(payload: T, routing_key: String, correlation_id: String) -> Self {
        Self {
            payload,
            correlation_id,
            timestamp: chrono::Utc::now(),
            routing_key,
        }
    }

    /// Serialize the envelope to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            BookingError::InternalError {
                message: format!("Failed to serialize message: {}", e),
            }
            .into()
        })
    }

    /// Deserialize envelope from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            BookingError::ProtocolViolation {
                reason: format!("Failed to deserialize envelope: {}", e),
            }
            .into()
        })
    }
}

impl MessageEnvelope<MatchStart> {
    /// Envelope announcing a released match, correlated by its match id
    pub fn match_starting(start: MatchStart) -> Self {
        let correlation_id = start.match_id.to_string();
        Self::with_correlation_id(start, MATCH_STARTING_ROUTING_KEY.to_string(), correlation_id)
    }
}

/// Commands accepted on [`BOOKING_COMMANDS_QUEUE`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundCommand {
    /// Ask to be seated in the next match of a type
    Book { uid: Uid, match_type: MatchType },
    /// Withdraw from every match type
    Unbook { uid: Uid },
    /// These players entered a running match
    SessionOpened { uids: Vec<Uid> },
    /// These players left their match
    SessionClosed { uids: Vec<Uid> },
}

impl InboundCommand {
    /// Decode and validate a command
    ///
    /// Anything that is not a well-formed command is a protocol violation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let command: InboundCommand =
            serde_json::from_slice(bytes).map_err(|e| BookingError::ProtocolViolation {
                reason: format!("Undecodable booking command: {}", e),
            })?;

        command.validate()?;
        Ok(command)
    }

    /// Serialize a command to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.validate()?;
        serde_json::to_vec(self).map_err(|e| {
            BookingError::InternalError {
                message: format!("Failed to serialize booking command: {}", e),
            }
            .into()
        })
    }

    /// Reject commands that decode but carry no meaning
    pub fn validate(&self) -> Result<()> {
        match self {
            InboundCommand::SessionOpened { uids } | InboundCommand::SessionClosed { uids }
                if uids.is_empty() =>
            {
                Err(BookingError::ProtocolViolation {
                    reason: format!("{} carries no players", self.name()),
                }
                .into())
            }
            _ => Ok(()),
        }
    }

    /// Label used for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            InboundCommand::Book { .. } => "book",
            InboundCommand::Unbook { .. } => "unbook",
            InboundCommand::SessionOpened { .. } => "session_opened",
            InboundCommand::SessionClosed { .. } => "session_closed",
        }
    }
}
