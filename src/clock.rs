// Copyright 2020 Graydon Hoare <graydon@pobox.com>
// Licensed under the MIT and Apache-2.0 licenses.

use crate::Timestamp;
use pergola::{LatticeElt, MaxDef};
use std::hash::{Hash, Hasher};
use tracing::trace;

type TimeLE = LatticeElt<MaxDef<Timestamp>>;

/// Largest timestamp accepted from a peer. Anything above it would leave the
/// local clock no room to tick.
pub const MAX_TIMESTAMP: Timestamp = Timestamp::MAX / 2;

/// A Lamport clock. The value lives in a max-lattice, so observing a peer's
/// timestamp is a join and can never move the clock backwards; the only other
/// way it changes is `tick`, which adds one.
#[derive(Clone, Debug, Default)]
pub struct LogicalClock {
    time: TimeLE,
}

impl LogicalClock {
    pub fn new() -> Self {
        LogicalClock::default()
    }

    pub fn now(&self) -> Timestamp {
        self.time.value
    }

    /// Advance for a local event (issuing a request). Returns the new time,
    /// or `None` if the clock is exhausted, in which case it is unchanged.
    pub fn tick(&mut self) -> Option<Timestamp> {
        self.time.value = self.time.value.checked_add(1)?;
        trace!("clock ticked to {}", self.time.value);
        Some(self.time.value)
    }

    /// Fold in a timestamp carried by a peer's message. Does not increment.
    pub fn observe(&mut self, ts: Timestamp) -> Timestamp {
        self.time = &self.time + &TimeLE::new_from(ts);
        trace!("clock observed {}, now {}", ts, self.time.value);
        self.time.value
    }
}

// Compare and hash by the raw value rather than through the lattice order.
impl PartialEq for LogicalClock {
    fn eq(&self, other: &Self) -> bool {
        self.time.value == other.time.value
    }
}

impl Eq for LogicalClock {}

impl Hash for LogicalClock {
    fn hash<H: Hasher>(&self, hstate: &mut H) {
        self.time.value.hash(hstate);
    }
}
