//! Bounded ranking of slow statements
//!
//! A fixed number of slots kept sorted by descending duration. Empty slots
//! sort last, so the last slot is always the one to evict.

use std::cmp::Ordering;

use chrono::Duration;

/// One timed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedStatement {
    pub duration: Duration,
    pub sql: String,
}

impl RankedStatement {
    /// Whole seconds and sub-second microseconds, the ranking key
    fn key(&self) -> (i64, i64) {
        let secs = self.duration.num_seconds();
        let micros = (self.duration - Duration::seconds(secs))
            .num_microseconds()
            .unwrap_or(0);
        (secs, micros)
    }
}

/// Outcome of offering a statement to the ranking
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Placed in a free slot
    Filled,
    /// Took the place of the given statement
    Evicted(RankedStatement),
    /// Not slow enough to rank
    Rejected,
}

#[derive(Debug, Clone)]
pub struct TopRanking {
    slots: Vec<Option<RankedStatement>>,
}

impl TopRanking {
    /// A zero capacity is treated as one slot
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Inserts with eviction and restores the order
    pub fn offer(&mut self, duration: Duration, sql: String) -> Offer {
        let candidate = RankedStatement { duration, sql };

        let free = self.slots.iter().position(Option::is_none);
        let outcome = if let Some(idx) = free {
            self.slots[idx] = Some(candidate);
            Offer::Filled
        } else {
            let last = self.slots.len() - 1;
            let beats_smallest = matches!(
                &self.slots[last],
                Some(smallest) if candidate.key() > smallest.key()
            );
            if !beats_smallest {
                Offer::Rejected
            } else {
                match self.slots[last].replace(candidate) {
                    Some(evicted) => Offer::Evicted(evicted),
                    None => Offer::Filled,
                }
            }
        };

        if outcome != Offer::Rejected {
            self.slots.sort_by(compare_slots);
        }
        outcome
    }

    /// Occupied slots in rank order
    pub fn entries(&self) -> impl Iterator<Item = &RankedStatement> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}

fn compare_slots(a: &Option<RankedStatement>, b: &Option<RankedStatement>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.key().cmp(&a.key()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
