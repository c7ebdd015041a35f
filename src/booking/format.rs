//! Match format traits and implementations
//!
//! A match format says how many real players a match type waits for and how
//! many seats the finished roster has. The gap is filled with bots.

use crate::error::{BookingError, Result};
use crate::types::MatchType;
use serde::{Deserialize, Serialize};

/// Largest roster the session subsystem accepts
pub const MAX_SEATS: usize = 8;

/// Configuration for a specific match type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFormat {
    /// Match type this format applies to
    pub match_type: MatchType,
    /// Real players that must book before the match releases
    pub needed_players: usize,
    /// Seats in the released roster
    pub capacity: usize,
}

impl MatchFormat {
    /// Four real players at a four-seat table
    pub fn ranked() -> Self {
        Self {
            match_type: MatchType::Ranked,
            needed_players: 4,
            capacity: 4,
        }
    }

    /// Two real players, two bots
    pub fn pair() -> Self {
        Self {
            match_type: MatchType::Pair,
            needed_players: 2,
            capacity: 4,
        }
    }

    /// One real player, three bots
    pub fn solo() -> Self {
        Self {
            match_type: MatchType::Solo,
            needed_players: 1,
            capacity: 4,
        }
    }

    /// Default format for a match type
    pub fn default_for(match_type: MatchType) -> Self {
        match match_type {
            MatchType::Ranked => Self::ranked(),
            MatchType::Pair => Self::pair(),
            MatchType::Solo => Self::solo(),
        }
    }

    /// Seats filled by bots on release
    pub fn synthetic_seats(&self) -> usize {
        self.capacity.saturating_sub(self.needed_players)
    }

    /// Check the format is usable
    pub fn validate(&self) -> Result<()> {
        if self.needed_players == 0 {
            return Err(BookingError::ConfigurationError {
                message: format!("{} format must need at least one player", self.match_type),
            }
            .into());
        }

        if self.needed_players > self.capacity {
            return Err(BookingError::ConfigurationError {
                message: format!(
                    "{} format needs {} players but only seats {}",
                    self.match_type, self.needed_players, self.capacity
                ),
            }
            .into());
        }

        if self.capacity > MAX_SEATS {
            return Err(BookingError::ConfigurationError {
                message: format!(
                    "{} format capacity cannot exceed {} seats",
                    self.match_type, MAX_SEATS
                ),
            }
            .into());
        }

        Ok(())
    }
}

/// Trait for providing match formats
pub trait FormatProvider: Send + Sync {
    /// Get the format for a specific match type
    fn format_for(&self, match_type: MatchType) -> MatchFormat;

    /// All match types this provider serves
    fn match_types(&self) -> Vec<MatchType> {
        MatchType::ALL.to_vec()
    }
}

/// Static format table, one entry per match type
#[derive(Debug, Clone)]
pub struct StaticFormatProvider {
    formats: [MatchFormat; MatchType::COUNT],
}

impl StaticFormatProvider {
    /// Create a provider with the default formats
    pub fn new() -> Self {
        Self {
            formats: MatchType::ALL.map(MatchFormat::default_for),
        }
    }

    /// Create a provider from overrides; match types not listed keep their defaults
    pub fn with_formats(overrides: &[MatchFormat]) -> Result<Self> {
        let mut provider = Self::new();
        for format in overrides {
            provider.update_format(*format)?;
        }
        Ok(provider)
    }

    /// Replace the format for one match type
    pub fn update_format(&mut self, format: MatchFormat) -> Result<()> {
        format.validate()?;
        self.formats[format.match_type.index()] = format;
        Ok(())
    }
}

impl Default for StaticFormatProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatProvider for StaticFormatProvider {
    fn format_for(&self, match_type: MatchType) -> MatchFormat {
        self.formats[match_type.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_formats() {
        let provider = StaticFormatProvider::new();

        let ranked = provider.format_for(MatchType::Ranked);
        assert_eq!(ranked.needed_players, 4);
        assert_eq!(ranked.synthetic_seats(), 0);

        let pair = provider.format_for(MatchType::Pair);
        assert_eq!(pair.needed_players, 2);
        assert_eq!(pair.capacity, 4);
        assert_eq!(pair.synthetic_seats(), 2);

        let solo = provider.format_for(MatchType::Solo);
        assert_eq!(solo.synthetic_seats(), 3);
    }

    #[test]
    fn test_defaults_are_valid() {
        for match_type in MatchType::ALL {
            assert!(MatchFormat::default_for(match_type).validate().is_ok());
        }
    }

    #[test]
    fn test_format_validation() {
        let mut format = MatchFormat::pair();
        format.needed_players = 0;
        assert!(format.validate().is_err());

        let mut format = MatchFormat::pair();
        format.needed_players = 5;
        assert!(format.validate().is_err());

        let mut format = MatchFormat::ranked();
        format.capacity = 9;
        format.needed_players = 9;
        assert!(format.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let custom = MatchFormat {
            match_type: MatchType::Pair,
            needed_players: 3,
            capacity: 6,
        };
        let provider = StaticFormatProvider::with_formats(&[custom]).unwrap();

        assert_eq!(provider.format_for(MatchType::Pair), custom);
        assert_eq!(provider.format_for(MatchType::Ranked), MatchFormat::ranked());
        assert_eq!(provider.match_types().len(), MatchType::COUNT);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let broken = MatchFormat {
            match_type: MatchType::Solo,
            needed_players: 4,
            capacity: 2,
        };
        assert!(StaticFormatProvider::with_formats(&[broken]).is_err());
    }
}
