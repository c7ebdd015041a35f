//! Roster fill policy
//!
//! When a waiting list reaches its threshold the real players keep their
//! booking order and the remaining seats go to freshly numbered bots.

use crate::booking::format::MatchFormat;
use crate::types::{BotId, Participant, Uid};

/// Issues bot ids; ids are never handed out twice by the same allocator
#[derive(Debug, Clone, Default)]
pub struct SyntheticIdAllocator {
    next: u64,
}

impl SyntheticIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering at `first`
    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Take the next unused id
    pub fn allocate(&mut self) -> BotId {
        let id = BotId(self.next);
        self.next += 1;
        id
    }

    /// Ids handed out so far
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// Build the released roster: `players` in order, then bots up to capacity
pub fn fill_roster(
    players: &[Uid],
    format: &MatchFormat,
    allocator: &mut SyntheticIdAllocator,
) -> Vec<Participant> {
    let seats = format.capacity.max(players.len());
    let mut roster = Vec::with_capacity(seats);

    roster.extend(players.iter().copied().map(Participant::Player));
    while roster.len() < seats {
        roster.push(Participant::Synthetic(allocator.allocate()));
    }

    roster
}
