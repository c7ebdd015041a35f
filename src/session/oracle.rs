//! Session-existence oracle
//!
//! The booking manager asks the oracle whether a player is already in a running
//! match before enrolling them. Any error from the oracle is treated as "yes".

use crate::error::{BookingError, Result};
use crate::types::Uid;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::RwLock;
use tracing::debug;

/// Answers whether a player currently has an active match
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionOracle: Send + Sync {
    /// True when `uid` is already playing
    async fn is_playing(&self, uid: Uid) -> Result<bool>;
}

/// In-memory view of which players are seated in a running match
///
/// Fed by session-opened/session-closed notifications from the session
/// subsystem and by the booking service itself when it hands off a roster.
#[derive(Debug, Default)]
pub struct ActiveSessionRegistry {
    playing: RwLock<HashSet<Uid>>,
}

impl ActiveSessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark players as seated in a match
    pub fn open_session(&self, uids: &[Uid]) -> Result<()> {
        let mut playing = self
            .playing
            .write()
            .map_err(|_| BookingError::InternalError {
                message: "Failed to acquire session registry write lock".to_string(),
            })?;

        playing.extend(uids.iter().copied());
        debug!(
            "Registered {} players as playing ({} active)",
            uids.len(),
            playing.len()
        );
        Ok(())
    }

    /// Mark players as seated; returns only those not already seated
    pub fn claim(&self, uids: &[Uid]) -> Result<Vec<Uid>> {
        let mut playing = self
            .playing
            .write()
            .map_err(|_| BookingError::InternalError {
                message: "Failed to acquire session registry write lock".to_string(),
            })?;

        let claimed: Vec<Uid> = uids
            .iter()
            .copied()
            .filter(|uid| playing.insert(*uid))
            .collect();
        debug!(
            "Claimed {} of {} players ({} active)",
            claimed.len(),
            uids.len(),
            playing.len()
        );
        Ok(claimed)
    }

    /// Mark players as free again
    pub fn close_session(&self, uids: &[Uid]) -> Result<()> {
        let mut playing = self
            .playing
            .write()
            .map_err(|_| BookingError::InternalError {
                message: "Failed to acquire session registry write lock".to_string(),
            })?;

        for uid in uids {
            playing.remove(uid);
        }
        debug!(
            "Released {} players from active sessions ({} active)",
            uids.len(),
            playing.len()
        );
        Ok(())
    }

    /// Number of players currently seated
    pub fn active_count(&self) -> usize {
        self.playing.read().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SessionOracle for ActiveSessionRegistry {
    async fn is_playing(&self, uid: Uid) -> Result<bool> {
        let playing = self
            .playing
            .read()
            .map_err(|_| BookingError::OracleUnavailable {
                message: "Session registry lock poisoned".to_string(),
            })?;

        Ok(playing.contains(&uid))
    }
}
