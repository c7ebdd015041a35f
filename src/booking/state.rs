//! Per-match-type waiting list
//!
//! A [`BookState`] holds the players currently waiting for one match type, in
//! booking order. It never holds a player twice and never grows past the
//! number of real players its format needs.

use crate::types::Uid;
use tracing::error;

/// Why an insert was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRefusal {
    Duplicate,
    Full,
}

/// Waiting players for a single match type
#[derive(Debug, Clone)]
pub struct BookState {
    waiting: Vec<Uid>,
    needed: usize,
}

impl BookState {
    /// Create an empty state that releases at `needed` players
    pub fn new(needed: usize) -> Self {
        Self {
            waiting: Vec::with_capacity(needed),
            needed,
        }
    }

    /// Number of waiting players
    pub fn count(&self) -> usize {
        self.waiting.len()
    }

    /// Players required before the state releases
    pub fn needed(&self) -> usize {
        self.needed
    }

    pub fn waiting(&self) -> &[Uid] {
        &self.waiting
    }

    pub fn contains(&self, uid: Uid) -> bool {
        self.waiting.contains(&uid)
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Whether the waiting list reached its release threshold
    pub fn is_ready(&self) -> bool {
        self.waiting.len() >= self.needed
    }

    /// Append a player.
    ///
    /// Callers check [`contains`](Self::contains) and [`is_ready`](Self::is_ready)
    /// first; hitting either refusal here is a logic fault.
    pub fn push(&mut self, uid: Uid) -> Result<usize, InsertRefusal> {
        if self.contains(uid) {
            debug_assert!(false, "uid {} booked twice", uid);
            error!("Refusing duplicate entry for uid {} in booking state", uid);
            return Err(InsertRefusal::Duplicate);
        }
        if self.is_ready() {
            debug_assert!(false, "booking state overflow at {} players", self.needed);
            error!(
                "Refusing uid {}: booking state already holds {}/{} players",
                uid,
                self.waiting.len(),
                self.needed
            );
            return Err(InsertRefusal::Full);
        }

        self.waiting.push(uid);
        Ok(self.waiting.len())
    }

    /// Remove a player if present, keeping the others in order
    pub fn remove(&mut self, uid: Uid) -> bool {
        match self.waiting.iter().position(|&waiting| waiting == uid) {
            Some(pos) => {
                self.waiting.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Empty the state, returning the players in booking order
    pub fn drain(&mut self) -> Vec<Uid> {
        std::mem::take(&mut self.waiting)
    }
}
