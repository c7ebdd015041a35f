//! Test fixtures and mock implementations for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use booking_hall::booking::{BookingHandle, BookingManager, BookingService, StaticFormatProvider};
use booking_hall::error::{BookingError, Result};
use booking_hall::session::{SessionOracle, SessionStarter};
use booking_hall::types::{MatchStart, Uid};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Oracle whose answers are set up front by the test
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    playing: Mutex<HashSet<Uid>>,
    failing: Mutex<HashSet<Uid>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `uid` as being in a match
    pub fn set_playing(&self, uid: Uid) {
        if let Ok(mut playing) = self.playing.lock() {
            playing.insert(uid);
        }
    }

    /// Fail every lookup for `uid`
    pub fn set_failing(&self, uid: Uid) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(uid);
        }
    }

    /// Lookups answered so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionOracle for ScriptedOracle {
    async fn is_playing(&self, uid: Uid) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self.failing.lock().map(|f| f.contains(&uid)).unwrap_or(true);
        if failing {
            return Err(BookingError::OracleUnavailable {
                message: format!("scripted failure for uid {}", uid),
            }
            .into());
        }

        Ok(self.playing.lock().map(|p| p.contains(&uid)).unwrap_or(true))
    }
}

/// Session starter that records every roster it receives
#[derive(Debug, Default)]
pub struct RecordingStarter {
    started: Mutex<Vec<MatchStart>>,
    fail: bool,
    delay: Option<Duration>,
}

impl RecordingStarter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A starter that records and then refuses every match
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// A starter whose hand-off takes `delay` before it records the match
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn started(&self) -> Vec<MatchStart> {
        self.started
            .lock()
            .map(|started| started.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStarter for RecordingStarter {
    async fn start_match(&self, start: MatchStart) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut started) = self.started.lock() {
            started.push(start);
        }
        if self.fail {
            return Err(BookingError::SessionStartFailed {
                message: "recording starter refuses matches".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

/// Manager over the default formats
pub fn create_manager(
    oracle: Arc<ScriptedOracle>,
    starter: Arc<RecordingStarter>,
) -> BookingManager {
    BookingManager::new(Arc::new(StaticFormatProvider::new()), oracle, starter)
}

/// Running booking service over the default formats
pub fn create_test_system() -> (BookingHandle, Arc<ScriptedOracle>, Arc<RecordingStarter>) {
    let oracle = Arc::new(ScriptedOracle::new());
    let starter = Arc::new(RecordingStarter::new());
    let manager = create_manager(oracle.clone(), starter.clone());
    let (handle, _task) = BookingService::spawn(manager, 64);
    (handle, oracle, starter)
}
