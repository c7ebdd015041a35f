//! Serialized mailbox in front of the booking manager
//!
//! A single tokio task owns the [`BookingManager`] and drains a bounded
//! channel of [`BookingCommand`]s one at a time. Every caller talks to it
//! through a cloneable [`BookingHandle`], so operations observe a strict total
//! order: the order in which they entered the mailbox.

use crate::booking::manager::{BookOutcome, BookingManager, BookingManagerStats};
use crate::error::{BookingError, Result};
use crate::types::{BookingCounts, MatchType, Uid};
use crate::utils::as_millis_f64;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default number of commands the mailbox buffers
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

/// Operations accepted by the booking mailbox
#[derive(Debug)]
pub enum BookingCommand {
    Book {
        uid: Uid,
        match_type: MatchType,
        reply: oneshot::Sender<BookOutcome>,
    },
    Unbook {
        uid: Uid,
        reply: oneshot::Sender<Vec<MatchType>>,
    },
    CountQuery {
        reply: oneshot::Sender<BookingCounts>,
    },
    Stats {
        reply: oneshot::Sender<BookingManagerStats>,
    },
    /// Wait for in-flight session hand-offs
    Flush {
        reply: oneshot::Sender<usize>,
    },
}

impl BookingCommand {
    /// Label used for logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            BookingCommand::Book { .. } => "book",
            BookingCommand::Unbook { .. } => "unbook",
            BookingCommand::CountQuery { .. } => "count_query",
            BookingCommand::Stats { .. } => "stats",
            BookingCommand::Flush { .. } => "flush",
        }
    }
}

/// Owner of the booking manager's consumer task
pub struct BookingService;

impl BookingService {
    /// Move `manager` into a consumer task and return the handle feeding it
    ///
    /// The task ends once every handle has been dropped.
    pub fn spawn(manager: BookingManager, mailbox_capacity: usize) -> (BookingHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(mailbox_capacity.max(1));
        let task = tokio::spawn(Self::run(manager, rx));

        info!(
            "Booking service started (mailbox capacity {})",
            mailbox_capacity.max(1)
        );
        (BookingHandle { tx }, task)
    }

    async fn run(mut manager: BookingManager, mut rx: mpsc::Receiver<BookingCommand>) {
        let metrics = manager.metrics_collector();

        while let Some(command) = rx.recv().await {
            let name = command.name();
            let timer = metrics.start_timer();

            Self::dispatch(&mut manager, command).await;

            let duration = timer.stop();
            debug!(
                "Processed {} command in {:.2}ms",
                name,
                as_millis_f64(duration)
            );
            metrics.record_command(name, duration);
        }

        manager.flush_hand_offs().await;
        info!(
            "Booking mailbox closed, final stats: {:?}",
            manager.stats()
        );
    }

    async fn dispatch(manager: &mut BookingManager, command: BookingCommand) {
        // A dropped reply receiver means the caller stopped waiting; the
        // operation itself has already been applied.
        match command {
            BookingCommand::Book {
                uid,
                match_type,
                reply,
            } => {
                let outcome = manager.book(uid, match_type).await;
                let _ = reply.send(outcome);
            }
            BookingCommand::Unbook { uid, reply } => {
                let removed_from = manager.unbook(uid);
                let _ = reply.send(removed_from);
            }
            BookingCommand::CountQuery { reply } => {
                let _ = reply.send(manager.count_query());
            }
            BookingCommand::Stats { reply } => {
                let _ = reply.send(manager.stats());
            }
            BookingCommand::Flush { reply } => {
                let _ = reply.send(manager.flush_hand_offs().await);
            }
        }
    }
}

/// Cloneable entry point to a running booking service
#[derive(Debug, Clone)]
pub struct BookingHandle {
    tx: mpsc::Sender<BookingCommand>,
}

impl BookingHandle {
    /// Book `uid` for `match_type`
    pub async fn book(&self, uid: Uid, match_type: MatchType) -> Result<BookOutcome> {
        self.call(|reply| BookingCommand::Book {
            uid,
            match_type,
            reply,
        })
        .await
    }

    /// Withdraw `uid` from every match type
    pub async fn unbook(&self, uid: Uid) -> Result<Vec<MatchType>> {
        self.call(|reply| BookingCommand::Unbook { uid, reply }).await
    }

    /// Waiting count per match type
    pub async fn count_query(&self) -> Result<BookingCounts> {
        self.call(|reply| BookingCommand::CountQuery { reply }).await
    }

    /// Manager statistics
    pub async fn stats(&self) -> Result<BookingManagerStats> {
        self.call(|reply| BookingCommand::Stats { reply }).await
    }

    /// Wait until every released match has been handed off
    ///
    /// Holds up the mailbox while it waits; meant for shutdown.
    pub async fn flush(&self) -> Result<usize> {
        self.call(|reply| BookingCommand::Flush { reply }).await
    }

    /// Whether the consumer task has gone away
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(
        &self,
        make_command: impl FnOnce(oneshot::Sender<T>) -> BookingCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = make_command(reply_tx);
        let name = command.name();

        self.tx
            .send(command)
            .await
            .map_err(|_| BookingError::ServiceUnavailable {
                message: format!("mailbox closed, {} not delivered", name),
            })?;

        reply_rx.await.map_err(|_| {
            BookingError::ServiceUnavailable {
                message: format!("booking service stopped before answering {}", name),
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::format::StaticFormatProvider;
    use crate::session::{ActiveSessionRegistry, MockSessionStarter, SessionStarter};
    use crate::types::MatchStart;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn spawn_test_service() -> (BookingHandle, JoinHandle<()>, Arc<MockSessionStarter>) {
        let starter = Arc::new(MockSessionStarter::new());
        let manager = BookingManager::new(
            Arc::new(StaticFormatProvider::new()),
            Arc::new(ActiveSessionRegistry::new()),
            starter.clone(),
        );
        let (handle, task) = BookingService::spawn(manager, 16);
        (handle, task, starter)
    }

    #[tokio::test]
    async fn test_commands_round_trip_through_mailbox() {
        let (handle, _task, starter) = spawn_test_service();

        let outcome = handle.book(Uid(1), MatchType::Ranked).await.unwrap();
        assert_eq!(outcome, BookOutcome::Enrolled { waiting: 1 });

        let counts = handle.count_query().await.unwrap();
        assert_eq!(counts.get(MatchType::Ranked), 1);

        let removed = handle.unbook(Uid(1)).await.unwrap();
        assert_eq!(removed, vec![MatchType::Ranked]);
        assert_eq!(handle.count_query().await.unwrap().total(), 0);
        assert!(starter.started().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_books_are_serialized() {
        let (handle, _task, starter) = spawn_test_service();

        let mut tasks = Vec::new();
        for id in 1..=8 {
            let handle = handle.clone();
            tasks.push(tokio::spawn(async move {
                handle.book(Uid(id), MatchType::Ranked).await.unwrap()
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        handle.flush().await.unwrap();

        // Eight distinct players at a four-seat threshold: exactly two matches
        let started = starter.started();
        assert_eq!(started.len(), 2);
        let mut seated: Vec<Uid> = started.iter().flat_map(|s| s.players()).collect();
        seated.sort();
        seated.dedup();
        assert_eq!(seated.len(), 8);
        assert_eq!(handle.count_query().await.unwrap().get(MatchType::Ranked), 0);
    }

    struct SlowStarter {
        delay: Duration,
        inner: MockSessionStarter,
    }

    #[async_trait]
    impl SessionStarter for SlowStarter {
        async fn start_match(&self, start: MatchStart) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.start_match(start).await
        }
    }

    #[tokio::test]
    async fn test_slow_hand_off_does_not_hold_up_the_mailbox() {
        let starter = Arc::new(SlowStarter {
            delay: Duration::from_millis(1500),
            inner: MockSessionStarter::new(),
        });
        let manager = BookingManager::new(
            Arc::new(StaticFormatProvider::new()),
            Arc::new(ActiveSessionRegistry::new()),
            starter.clone(),
        );
        let (handle, _task) = BookingService::spawn(manager, 16);

        let outcome = handle.book(Uid(1), MatchType::Solo).await.unwrap();
        assert!(matches!(outcome, BookOutcome::Released(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        let asked = Instant::now();
        let counts = handle.count_query().await.unwrap();
        let waited = asked.elapsed();

        assert_eq!(counts.total(), 0);
        assert!(
            waited < Duration::from_millis(500),
            "count query waited {:?} behind a hand-off",
            waited
        );
        assert!(starter.inner.started().is_empty());

        assert_eq!(handle.flush().await.unwrap(), 1);
        assert_eq!(starter.inner.started().len(), 1);
    }

    #[tokio::test]
    async fn test_service_stops_when_handles_dropped() {
        let (handle, task, _starter) = spawn_test_service();
        drop(handle);

        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_mailbox_reports_unavailable() {
        let (handle, task, _starter) = spawn_test_service();
        task.abort();
        let _ = task.await;

        let err = handle.count_query().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BookingError>(),
            Some(BookingError::ServiceUnavailable { .. })
        ));
        assert!(handle.is_closed());
    }
}
