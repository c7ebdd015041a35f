//! Session starter interface and implementations
//!
//! The starter receives a released roster and hands it to whatever subsystem
//! runs matches. The booking manager does not wait on the match itself.

use crate::error::{BookingError, Result};
use crate::session::oracle::ActiveSessionRegistry;
use crate::types::{MatchId, MatchStart, Uid};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Trait for handing released rosters to the session subsystem
#[async_trait]
pub trait SessionStarter: Send + Sync {
    /// Claim the roster's players before the hand-off runs
    ///
    /// Called synchronously at release, so it takes effect before the next
    /// booking command. `start_match` follows on a separate task.
    fn reserve(&self, _start: &MatchStart) -> Result<()> {
        Ok(())
    }

    /// Start a match for the given roster
    async fn start_match(&self, start: MatchStart) -> Result<()>;
}

/// Starter that marks the roster's players as playing before delegating
///
/// Keeps a just-released player from booking again before the session
/// subsystem reports the match as open. A failed hand-off frees only the
/// players this starter claimed.
pub struct RegisteringSessionStarter {
    registry: Arc<ActiveSessionRegistry>,
    inner: Arc<dyn SessionStarter>,
    /// Players claimed per match whose hand-off has not finished
    claimed: Mutex<HashMap<MatchId, Vec<Uid>>>,
}

impl RegisteringSessionStarter {
    pub fn new(registry: Arc<ActiveSessionRegistry>, inner: Arc<dyn SessionStarter>) -> Self {
        Self {
            registry,
            inner,
            claimed: Mutex::new(HashMap::new()),
        }
    }

    /// Matches reserved but not yet handed off
    pub fn pending_count(&self) -> usize {
        self.claimed.lock().map(|claimed| claimed.len()).unwrap_or(0)
    }

    fn take_claim(&self, match_id: &MatchId) -> Result<Option<Vec<Uid>>> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| BookingError::InternalError {
                message: "Failed to acquire claimed players lock".to_string(),
            })?;
        Ok(claimed.remove(match_id))
    }
}

#[async_trait]
impl SessionStarter for RegisteringSessionStarter {
    fn reserve(&self, start: &MatchStart) -> Result<()> {
        let newly_seated = self.registry.claim(&start.players())?;

        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| BookingError::InternalError {
                message: "Failed to acquire claimed players lock".to_string(),
            })?;
        claimed.insert(start.match_id, newly_seated);
        Ok(())
    }

    async fn start_match(&self, start: MatchStart) -> Result<()> {
        let match_id = start.match_id;
        let newly_seated = match self.take_claim(&match_id)? {
            Some(newly_seated) => newly_seated,
            None => self.registry.claim(&start.players())?,
        };

        if let Err(e) = self.inner.start_match(start).await {
            // The match never started; free the players seated for it
            warn!(
                "Match {} not started, freeing {} players",
                match_id,
                newly_seated.len()
            );
            self.registry.close_session(&newly_seated)?;
            return Err(e);
        }

        Ok(())
    }
}

/// Mock session starter for testing
#[derive(Debug, Default)]
pub struct MockSessionStarter {
    started: Mutex<Vec<MatchStart>>,
}

impl MockSessionStarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all started matches (for testing)
    pub fn started(&self) -> Vec<MatchStart> {
        self.started
            .lock()
            .map(|started| started.clone())
            .unwrap_or_default()
    }

    /// Clear recorded matches (for testing)
    pub fn clear(&self) {
        if let Ok(mut started) = self.started.lock() {
            started.clear();
        }
    }
}

#[async_trait]
impl SessionStarter for MockSessionStarter {
    async fn start_match(&self, start: MatchStart) -> Result<()> {
        debug!("Mock starter received match {}", start.match_id);
        if let Ok(mut started) = self.started.lock() {
            started.push(start);
        }
        Ok(())
    }
}
