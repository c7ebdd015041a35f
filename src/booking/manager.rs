//! Booking manager: the three booking operations over the per-type waiting lists
//!
//! The manager owns one [`BookState`] per [`MatchType`] and is driven by a
//! single consumer (see [`crate::booking::service`]). It holds no locks: all
//! operations take `&mut self`, so the caller serializes them.

use crate::booking::format::{FormatProvider, MatchFormat};
use crate::booking::roster::{fill_roster, SyntheticIdAllocator};
use crate::booking::state::BookState;
use crate::error::BookingError;
use crate::metrics::MetricsCollector;
use crate::session::{SessionOracle, SessionStarter};
use crate::types::{BookingCounts, MatchStart, MatchType, Uid};
use crate::utils::{as_millis_f64, current_timestamp, generate_match_id};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

/// Default bound on a single oracle lookup
pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a book request was turned away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The oracle reports the player in an active match
    AlreadyPlaying,
    /// The oracle failed or timed out; the player is assumed to be playing
    OracleUnavailable,
}

/// Result of a book request
#[derive(Debug, Clone, PartialEq)]
pub enum BookOutcome {
    /// The player was already waiting for this match type
    AlreadyBooked,
    /// Nothing changed
    Rejected(RejectReason),
    /// The player is waiting; `waiting` players are now queued for the type
    Enrolled { waiting: usize },
    /// The player completed a roster and the match was handed off
    Released(MatchStart),
}

impl BookOutcome {
    /// Metric label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            BookOutcome::AlreadyBooked => "already_booked",
            BookOutcome::Rejected(RejectReason::AlreadyPlaying) => "already_playing",
            BookOutcome::Rejected(RejectReason::OracleUnavailable) => "oracle_unavailable",
            BookOutcome::Enrolled { .. } => "enrolled",
            BookOutcome::Released(_) => "released",
        }
    }
}

/// Statistics about booking manager operations
#[derive(Debug, Clone, Default, Serialize)]
pub struct BookingManagerStats {
    /// Book requests received
    pub books_received: u64,
    /// Players added to a waiting list
    pub players_enrolled: u64,
    /// Book requests turned away by the oracle
    pub books_rejected: u64,
    /// Oracle errors and timeouts
    pub oracle_failures: u64,
    /// Unbook requests that removed at least one entry
    pub players_unbooked: u64,
    /// Matches handed to the session starter
    pub matches_started: u64,
    /// Bots seated by roster padding
    pub synthetic_seated: u64,
    /// Hand-offs the session starter refused, counted once they finish
    pub session_start_failures: u64,
}

/// The main booking manager
pub struct BookingManager {
    /// Waiting list per match type, indexed by `MatchType::index`
    states: [BookState; MatchType::COUNT],
    /// Format per match type, fixed at construction
    formats: [MatchFormat; MatchType::COUNT],
    /// Answers whether a player is already in a match
    oracle: Arc<dyn SessionOracle>,
    /// Receives released rosters
    starter: Arc<dyn SessionStarter>,
    /// Issues bot ids for roster padding
    allocator: SyntheticIdAllocator,
    /// Bound on a single oracle lookup
    oracle_timeout: Duration,
    /// Manager statistics
    stats: BookingManagerStats,
    /// Session hand-offs still in flight
    hand_offs: JoinSet<bool>,
    /// Metrics collector for recording performance data
    metrics_collector: Arc<MetricsCollector>,
}

impl BookingManager {
    /// Create a new booking manager
    pub fn new(
        format_provider: Arc<dyn FormatProvider>,
        oracle: Arc<dyn SessionOracle>,
        starter: Arc<dyn SessionStarter>,
    ) -> Self {
        let metrics_collector = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(format_provider, oracle, starter, metrics_collector)
    }

    /// Create a new booking manager with metrics collector
    pub fn with_metrics(
        format_provider: Arc<dyn FormatProvider>,
        oracle: Arc<dyn SessionOracle>,
        starter: Arc<dyn SessionStarter>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        let formats = MatchType::ALL.map(|match_type| format_provider.format_for(match_type));
        let states = formats.map(|format| BookState::new(format.needed_players));

        Self {
            states,
            formats,
            oracle,
            starter,
            allocator: SyntheticIdAllocator::new(),
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            stats: BookingManagerStats::default(),
            hand_offs: JoinSet::new(),
            metrics_collector,
        }
    }

    /// Set the bound on a single oracle lookup
    pub fn with_oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    /// Book `uid` into the waiting list for `match_type`
    pub async fn book(&mut self, uid: Uid, match_type: MatchType) -> BookOutcome {
        info!(
            "Processing book request - uid: {}, match_type: {}",
            uid, match_type
        );
        self.stats.books_received += 1;

        let outcome = self.try_book(uid, match_type).await;

        info!(
            "Book request completed - uid: {}, match_type: {}, outcome: {}",
            uid,
            match_type,
            outcome.label()
        );
        self.metrics_collector
            .record_book_request(match_type, outcome.label());
        self.metrics_collector.update_waiting(&self.count_query());

        outcome
    }

    async fn try_book(&mut self, uid: Uid, match_type: MatchType) -> BookOutcome {
        if self.states[match_type.index()].contains(uid) {
            debug!(
                "uid {} already waiting for {}, ignoring repeated book",
                uid, match_type
            );
            return BookOutcome::AlreadyBooked;
        }

        match self.check_playing(uid).await {
            Ok(false) => {}
            Ok(true) => {
                info!("uid {} is already in a match, not booking {}", uid, match_type);
                self.stats.books_rejected += 1;
                return BookOutcome::Rejected(RejectReason::AlreadyPlaying);
            }
            Err(e) => {
                warn!("Dropping book for uid {}: {}", uid, e);
                self.stats.books_rejected += 1;
                self.stats.oracle_failures += 1;
                return BookOutcome::Rejected(RejectReason::OracleUnavailable);
            }
        }

        let state = &mut self.states[match_type.index()];
        let waiting = match state.push(uid) {
            Ok(waiting) => waiting,
            // Refusals are logged by the state; treat like a repeated book
            Err(_) => return BookOutcome::AlreadyBooked,
        };
        self.stats.players_enrolled += 1;

        info!(
            "uid {} waiting for {} - {}/{} players",
            uid,
            match_type,
            waiting,
            state.needed()
        );

        if state.is_ready() {
            let start = self.release(match_type);
            return BookOutcome::Released(start);
        }

        BookOutcome::Enrolled { waiting }
    }

    /// Ask the oracle about `uid`, bounded by the oracle timeout
    async fn check_playing(&self, uid: Uid) -> Result<bool, BookingError> {
        let timer = self.metrics_collector.start_timer();

        let result = match tokio::time::timeout(self.oracle_timeout, self.oracle.is_playing(uid))
            .await
        {
            Ok(Ok(playing)) => Ok(playing),
            Ok(Err(e)) => Err(BookingError::OracleUnavailable {
                message: e.to_string(),
            }),
            Err(_) => Err(BookingError::OracleUnavailable {
                message: format!("no answer within {:?}", self.oracle_timeout),
            }),
        };

        let duration = timer.stop();
        debug!(
            "Oracle lookup for uid {} took {:.2}ms",
            uid,
            as_millis_f64(duration)
        );
        self.metrics_collector
            .record_oracle_call(duration, result.is_ok());

        result
    }

    /// Drain a full waiting list and hand the roster to the session starter
    ///
    /// The roster is reserved with the starter before this returns; the
    /// hand-off itself runs on its own task so the mailbox keeps draining.
    fn release(&mut self, match_type: MatchType) -> MatchStart {
        let format = self.formats[match_type.index()];
        let players = self.states[match_type.index()].drain();

        // Released players leave every other waiting list too
        for uid in &players {
            for state in self.states.iter_mut() {
                state.remove(*uid);
            }
        }

        let roster = fill_roster(&players, &format, &mut self.allocator);
        let start = MatchStart {
            match_id: generate_match_id(),
            match_type,
            roster,
            timestamp: current_timestamp(),
        };

        let synthetic = start.synthetic_count();
        info!(
            "Releasing {} match {} - players: {}, bots: {}",
            match_type,
            start.match_id,
            players.len(),
            synthetic
        );

        self.stats.matches_started += 1;
        self.stats.synthetic_seated += synthetic as u64;
        self.metrics_collector
            .record_match_started(match_type, synthetic);

        if let Err(e) = self.starter.reserve(&start) {
            warn!(
                "Failed to reserve players of {} match {}: {}",
                match_type, start.match_id, e
            );
        }

        self.reap_hand_offs();
        let starter = self.starter.clone();
        let metrics = self.metrics_collector.clone();
        let hand_off = start.clone();
        self.hand_offs.spawn(async move {
            let match_id = hand_off.match_id;
            match starter.start_match(hand_off).await {
                Ok(()) => {
                    debug!("{} match {} handed off", match_type, match_id);
                    true
                }
                Err(e) => {
                    error!(
                        "Failed to hand off {} match {} to session starter: {}",
                        match_type, match_id, e
                    );
                    metrics.record_session_start_failure();
                    false
                }
            }
        });

        start
    }

    /// Fold finished hand-offs into the stats without waiting
    fn reap_hand_offs(&mut self) {
        while let Some(result) = self.hand_offs.try_join_next() {
            self.record_hand_off(result);
        }
    }

    fn record_hand_off(&mut self, result: std::result::Result<bool, JoinError>) {
        match result {
            Ok(true) => {}
            Ok(false) => self.stats.session_start_failures += 1,
            Err(e) => {
                error!("Session hand-off task failed: {}", e);
                self.stats.session_start_failures += 1;
            }
        }
    }

    /// Wait for every in-flight hand-off; returns how many were awaited
    pub async fn flush_hand_offs(&mut self) -> usize {
        let mut flushed = 0;
        while let Some(result) = self.hand_offs.join_next().await {
            self.record_hand_off(result);
            flushed += 1;
        }
        if flushed > 0 {
            debug!("Flushed {} session hand-offs", flushed);
        }
        flushed
    }

    /// Hand-offs still running
    pub fn pending_hand_offs(&self) -> usize {
        self.hand_offs.len()
    }

    /// Remove `uid` from every waiting list; returns the match types it left
    pub fn unbook(&mut self, uid: Uid) -> Vec<MatchType> {
        let removed_from: Vec<MatchType> = MatchType::ALL
            .into_iter()
            .filter(|match_type| self.states[match_type.index()].remove(uid))
            .collect();

        if removed_from.is_empty() {
            debug!("Unbook for uid {} matched no waiting list", uid);
        } else {
            if removed_from.len() > 1 {
                warn!(
                    "uid {} was waiting for {} match types at once",
                    uid,
                    removed_from.len()
                );
            }
            info!("uid {} unbooked from {:?}", uid, removed_from);
            self.stats.players_unbooked += 1;
        }

        self.metrics_collector.record_unbook();
        self.metrics_collector.update_waiting(&self.count_query());

        removed_from
    }

    /// Waiting count for every match type
    pub fn count_query(&self) -> BookingCounts {
        BookingCounts::new(
            MatchType::ALL
                .into_iter()
                .map(|match_type| (match_type, self.states[match_type.index()].count()))
                .collect(),
        )
    }

    /// Players waiting for a match type, in booking order
    pub fn waiting(&self, match_type: MatchType) -> &[Uid] {
        self.states[match_type.index()].waiting()
    }

    /// Format the manager releases `match_type` with
    pub fn format(&self, match_type: MatchType) -> MatchFormat {
        self.formats[match_type.index()]
    }

    /// Get current manager statistics
    pub fn stats(&mut self) -> BookingManagerStats {
        self.reap_hand_offs();
        self.stats.clone()
    }

    /// Metrics collector the manager records into
    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::format::StaticFormatProvider;
    use crate::session::oracle::MockSessionOracle;
    use crate::session::MockSessionStarter;
    use crate::types::{BotId, Participant};
    use async_trait::async_trait;

    fn free_oracle() -> MockSessionOracle {
        let mut oracle = MockSessionOracle::new();
        oracle.expect_is_playing().returning(|_| Ok(false));
        oracle
    }

    fn create_test_manager(oracle: MockSessionOracle) -> (BookingManager, Arc<MockSessionStarter>) {
        let starter = Arc::new(MockSessionStarter::new());
        let manager = BookingManager::new(
            Arc::new(StaticFormatProvider::new()),
            Arc::new(oracle),
            starter.clone(),
        );
        (manager, starter)
    }

    struct SlowOracle;

    #[async_trait]
    impl SessionOracle for SlowOracle {
        async fn is_playing(&self, _uid: Uid) -> crate::error::Result<bool> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_book_enrolls_player() {
        let (mut manager, starter) = create_test_manager(free_oracle());

        let outcome = manager.book(Uid(1), MatchType::Ranked).await;

        assert_eq!(outcome, BookOutcome::Enrolled { waiting: 1 });
        assert_eq!(manager.count_query().get(MatchType::Ranked), 1);
        assert!(starter.started().is_empty());
    }

    #[tokio::test]
    async fn test_repeated_book_is_idempotent() {
        let mut oracle = MockSessionOracle::new();
        // The second request short-circuits before reaching the oracle
        oracle.expect_is_playing().times(1).returning(|_| Ok(false));
        let (mut manager, _starter) = create_test_manager(oracle);

        manager.book(Uid(7), MatchType::Ranked).await;
        let outcome = manager.book(Uid(7), MatchType::Ranked).await;

        assert_eq!(outcome, BookOutcome::AlreadyBooked);
        assert_eq!(manager.count_query().get(MatchType::Ranked), 1);
    }

    #[tokio::test]
    async fn test_threshold_releases_full_roster() {
        let (mut manager, starter) = create_test_manager(free_oracle());

        for id in 1..=3 {
            manager.book(Uid(id), MatchType::Ranked).await;
        }
        assert_eq!(manager.count_query().get(MatchType::Ranked), 3);
        assert!(starter.started().is_empty());

        let outcome = manager.book(Uid(4), MatchType::Ranked).await;
        assert!(matches!(outcome, BookOutcome::Released(_)));
        assert_eq!(manager.count_query().get(MatchType::Ranked), 0);
        assert_eq!(manager.flush_hand_offs().await, 1);

        let started = starter.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].match_type, MatchType::Ranked);
        assert_eq!(started[0].players(), vec![Uid(1), Uid(2), Uid(3), Uid(4)]);
        assert_eq!(started[0].synthetic_count(), 0);
    }

    #[tokio::test]
    async fn test_pair_release_pads_with_bots() {
        let (mut manager, starter) = create_test_manager(free_oracle());

        manager.book(Uid(10), MatchType::Pair).await;
        manager.book(Uid(20), MatchType::Pair).await;
        manager.flush_hand_offs().await;

        let started = starter.started();
        assert_eq!(started.len(), 1);
        assert_eq!(
            started[0].roster,
            vec![
                Participant::Player(Uid(10)),
                Participant::Player(Uid(20)),
                Participant::Synthetic(BotId(0)),
                Participant::Synthetic(BotId(1)),
            ]
        );
        assert_eq!(manager.stats().synthetic_seated, 2);
    }

    #[tokio::test]
    async fn test_oracle_reports_playing() {
        let mut oracle = MockSessionOracle::new();
        oracle
            .expect_is_playing()
            .returning(|uid| Ok(uid == Uid(99)));
        let (mut manager, _starter) = create_test_manager(oracle);

        let outcome = manager.book(Uid(99), MatchType::Solo).await;

        assert_eq!(outcome, BookOutcome::Rejected(RejectReason::AlreadyPlaying));
        assert_eq!(manager.count_query().total(), 0);
    }

    #[tokio::test]
    async fn test_oracle_error_fails_closed() {
        let mut oracle = MockSessionOracle::new();
        oracle
            .expect_is_playing()
            .returning(|_| Err(anyhow::anyhow!("connection refused")));
        let (mut manager, starter) = create_test_manager(oracle);

        let outcome = manager.book(Uid(1), MatchType::Solo).await;

        assert_eq!(
            outcome,
            BookOutcome::Rejected(RejectReason::OracleUnavailable)
        );
        assert_eq!(manager.count_query().get(MatchType::Solo), 0);
        assert!(starter.started().is_empty());
        assert_eq!(manager.stats().oracle_failures, 1);
    }

    #[tokio::test]
    async fn test_oracle_timeout_fails_closed() {
        let starter = Arc::new(MockSessionStarter::new());
        let mut manager = BookingManager::new(
            Arc::new(StaticFormatProvider::new()),
            Arc::new(SlowOracle),
            starter,
        )
        .with_oracle_timeout(Duration::from_millis(20));

        let outcome = manager.book(Uid(1), MatchType::Ranked).await;

        assert_eq!(
            outcome,
            BookOutcome::Rejected(RejectReason::OracleUnavailable)
        );
        assert_eq!(manager.count_query().get(MatchType::Ranked), 0);
    }

    #[tokio::test]
    async fn test_unbook_preserves_order() {
        let (mut manager, _starter) = create_test_manager(free_oracle());

        for id in [5, 6, 7] {
            manager.book(Uid(id), MatchType::Ranked).await;
        }

        let removed_from = manager.unbook(Uid(6));

        assert_eq!(removed_from, vec![MatchType::Ranked]);
        assert_eq!(manager.waiting(MatchType::Ranked), &[Uid(5), Uid(7)]);
        assert_eq!(manager.count_query().get(MatchType::Ranked), 2);
    }

    #[tokio::test]
    async fn test_unbook_unknown_player_is_noop() {
        let (mut manager, _starter) = create_test_manager(free_oracle());
        manager.book(Uid(1), MatchType::Ranked).await;

        assert!(manager.unbook(Uid(2)).is_empty());
        assert_eq!(manager.count_query().get(MatchType::Ranked), 1);
    }

    #[tokio::test]
    async fn test_unbook_scans_every_match_type() {
        let (mut manager, _starter) = create_test_manager(free_oracle());

        manager.book(Uid(1), MatchType::Ranked).await;
        manager.book(Uid(1), MatchType::Pair).await;

        let removed_from = manager.unbook(Uid(1));

        assert_eq!(removed_from, vec![MatchType::Ranked, MatchType::Pair]);
        assert_eq!(manager.count_query().total(), 0);
    }

    #[tokio::test]
    async fn test_booking_is_isolated_per_match_type() {
        let (mut manager, _starter) = create_test_manager(free_oracle());

        manager.book(Uid(1), MatchType::Ranked).await;
        manager.book(Uid(2), MatchType::Pair).await;

        assert_eq!(manager.waiting(MatchType::Ranked), &[Uid(1)]);
        assert_eq!(manager.waiting(MatchType::Pair), &[Uid(2)]);
        assert!(manager.waiting(MatchType::Solo).is_empty());
    }

    #[tokio::test]
    async fn test_release_withdraws_players_from_other_types() {
        let (mut manager, starter) = create_test_manager(free_oracle());

        manager.book(Uid(1), MatchType::Ranked).await;
        manager.book(Uid(2), MatchType::Ranked).await;
        manager.book(Uid(1), MatchType::Pair).await;
        manager.book(Uid(3), MatchType::Pair).await;
        manager.flush_hand_offs().await;

        assert_eq!(starter.started().len(), 1);
        assert_eq!(manager.waiting(MatchType::Ranked), &[Uid(2)]);
        assert_eq!(manager.count_query().get(MatchType::Pair), 0);
    }

    #[tokio::test]
    async fn test_solo_releases_immediately() {
        let (mut manager, starter) = create_test_manager(free_oracle());

        let outcome = manager.book(Uid(42), MatchType::Solo).await;

        match outcome {
            BookOutcome::Released(start) => {
                assert_eq!(start.roster.len(), 4);
                assert_eq!(start.roster[0], Participant::Player(Uid(42)));
                assert_eq!(start.synthetic_count(), 3);
            }
            other => panic!("expected release, got {:?}", other),
        }
        manager.flush_hand_offs().await;
        assert_eq!(starter.started().len(), 1);
        assert_eq!(manager.count_query().get(MatchType::Solo), 0);
    }

    struct RefusingStarter;

    #[async_trait]
    impl SessionStarter for RefusingStarter {
        async fn start_match(&self, _start: MatchStart) -> crate::error::Result<()> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Err(anyhow::anyhow!("session subsystem offline"))
        }
    }

    #[tokio::test]
    async fn test_release_does_not_wait_for_hand_off() {
        let mut manager = BookingManager::new(
            Arc::new(StaticFormatProvider::new()),
            Arc::new(free_oracle()),
            Arc::new(RefusingStarter),
        );

        let started = std::time::Instant::now();
        let outcome = manager.book(Uid(1), MatchType::Solo).await;

        assert!(matches!(outcome, BookOutcome::Released(_)));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(manager.pending_hand_offs(), 1);
        assert_eq!(manager.count_query().total(), 0);

        // Failures are counted once the hand-off finishes; nobody is re-enrolled
        assert_eq!(manager.flush_hand_offs().await, 1);
        assert_eq!(manager.stats().session_start_failures, 1);
        assert_eq!(manager.count_query().total(), 0);
    }

    #[tokio::test]
    async fn test_stats_tracking() {
        let (mut manager, _starter) = create_test_manager(free_oracle());

        manager.book(Uid(1), MatchType::Pair).await;
        manager.book(Uid(1), MatchType::Pair).await;
        manager.book(Uid(2), MatchType::Pair).await;
        manager.unbook(Uid(3));

        let stats = manager.stats();
        assert_eq!(stats.books_received, 3);
        assert_eq!(stats.players_enrolled, 2);
        assert_eq!(stats.matches_started, 1);
        assert_eq!(stats.players_unbooked, 0);
    }

    #[tokio::test]
    async fn test_metrics_integration() {
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let mut manager = BookingManager::with_metrics(
            Arc::new(StaticFormatProvider::new()),
            Arc::new(free_oracle()),
            Arc::new(MockSessionStarter::new()),
            metrics.clone(),
        );

        manager.book(Uid(1), MatchType::Ranked).await;
        manager.book(Uid(2), MatchType::Pair).await;
        manager.book(Uid(3), MatchType::Pair).await;

        let booking = metrics.booking();
        assert_eq!(
            booking
                .book_requests_total
                .with_label_values(&["ranked", "enrolled"])
                .get(),
            1
        );
        assert_eq!(
            booking
                .matches_started_total
                .with_label_values(&["pair"])
                .get(),
            1
        );
        assert_eq!(booking.players_waiting.with_label_values(&["ranked"]).get(), 1);
        assert_eq!(booking.players_waiting.with_label_values(&["pair"]).get(), 0);
    }
}
