//! Common types used throughout the booking service

use crate::error::BookingError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a real player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(pub u64);

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Uid {
    fn from(value: u64) -> Self {
        Uid(value)
    }
}

/// Identifier of a computer-controlled roster filler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BotId(pub u64);

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bot-{}", self.0)
    }
}

/// Unique identifier for started matches
pub type MatchId = Uuid;

/// One seat of a roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Participant {
    Player(Uid),
    Synthetic(BotId),
}

impl Participant {
    /// The player uid, if this seat is held by a real player
    pub fn uid(&self) -> Option<Uid> {
        match self {
            Participant::Player(uid) => Some(*uid),
            Participant::Synthetic(_) => None,
        }
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, Participant::Synthetic(_))
    }
}

impl fmt::Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Player(uid) => write!(f, "{}", uid),
            Participant::Synthetic(bot) => write!(f, "{}", bot),
        }
    }
}

/// Kind of match a player can book
///
/// The set is fixed; every value owns exactly one booking slot addressed by
/// [`MatchType::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Four real players, no padding
    Ranked,
    /// Two real players, padded with bots
    Pair,
    /// A single player against bots
    Solo,
}

impl MatchType {
    /// Number of match types
    pub const COUNT: usize = 3;

    /// All match types in index order
    pub const ALL: [MatchType; MatchType::COUNT] =
        [MatchType::Ranked, MatchType::Pair, MatchType::Solo];

    /// Stable index of this match type's booking slot
    pub const fn index(self) -> usize {
        match self {
            MatchType::Ranked => 0,
            MatchType::Pair => 1,
            MatchType::Solo => 2,
        }
    }

    /// Label used for metrics and routing keys
    pub const fn as_str(self) -> &'static str {
        match self {
            MatchType::Ranked => "ranked",
            MatchType::Pair => "pair",
            MatchType::Solo => "solo",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Ranked => write!(f, "Ranked"),
            MatchType::Pair => write!(f, "Pair"),
            MatchType::Solo => write!(f, "Solo"),
        }
    }
}

impl FromStr for MatchType {
    type Err = BookingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ranked" => Ok(MatchType::Ranked),
            "pair" => Ok(MatchType::Pair),
            "solo" => Ok(MatchType::Solo),
            _ => Err(BookingError::InvalidMatchType {
                value: s.to_string(),
            }),
        }
    }
}

/// Roster handed to the session starter when a booking slot releases
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchStart {
    pub match_id: MatchId,
    pub match_type: MatchType,
    pub roster: Vec<Participant>,
    pub timestamp: DateTime<Utc>,
}

impl MatchStart {
    /// Real players in booking order
    pub fn players(&self) -> Vec<Uid> {
        self.roster.iter().filter_map(Participant::uid).collect()
    }

    /// Number of synthetic seats
    pub fn synthetic_count(&self) -> usize {
        self.roster.iter().filter(|p| p.is_synthetic()).count()
    }
}

/// Snapshot of waiting players per match type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingCounts(BTreeMap<MatchType, usize>);

impl BookingCounts {
    pub fn new(counts: BTreeMap<MatchType, usize>) -> Self {
        Self(counts)
    }

    /// Waiting count for a match type, zero if absent
    pub fn get(&self, match_type: MatchType) -> usize {
        self.0.get(&match_type).copied().unwrap_or(0)
    }

    /// Waiting players across all match types
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MatchType, usize)> + '_ {
        self.0.iter().map(|(match_type, count)| (*match_type, *count))
    }
}
