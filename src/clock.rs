//! Per-participant vector clock.
//!
//! Minkowski-style causal ordering elsewhere in this crate's ancestry reasoned about causality
//! through a physical light cone; here causality is logical: a mapping from participant id to a
//! monotonically non-decreasing counter. Two events are causally related exactly when one clock
//! dominates the other componentwise; otherwise they are concurrent.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ParticipantId;

/// A value-copy of a [`VectorClock`]'s entries at one instant.
///
/// Snapshots are immune to later mutation of the clock they were taken from: every entry is
/// copied by value, never borrowed.
pub type ClockSnapshot = BTreeMap<ParticipantId, u64>;

/// Per-participant logical clock.
///
/// Invariants upheld by this type:
/// - the owner's own entry is always present and never decreases,
/// - `merge` is commutative, associative, and idempotent (it is a pointwise max),
/// - an entry missing from the map reads as zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: BTreeMap<ParticipantId, u64>,
}

impl VectorClock {
    /// Creates a clock for `owner` with a single `{owner: 0}` entry.
    pub fn new(owner: ParticipantId) -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(owner, 0);
        Self { entries }
    }

    /// Builds a clock directly from a snapshot, e.g. when initializing a late joiner's clock from
    /// the current membership (see the hub's join handling).
    pub fn from_snapshot(entries: ClockSnapshot) -> Self {
        Self { entries }
    }

    /// Reads participant `id`'s entry, or zero if never observed.
    pub fn get(&self, id: ParticipantId) -> u64 {
        self.entries.get(&id).copied().unwrap_or(0)
    }

    /// Ensures `id` is present, inserting it at zero if absent. Idempotent.
    pub fn add_peer(&mut self, id: ParticipantId) {
        self.entries.entry(id).or_insert(0);
    }

    /// Increments `owner`'s own entry by one and returns a snapshot of the resulting clock.
    pub fn tick(&mut self, owner: ParticipantId) -> ClockSnapshot {
        let counter = self.entries.entry(owner).or_insert(0);
        *counter += 1;
        self.snapshot()
    }

    /// Merges `other` into this clock: every entry becomes the componentwise maximum.
    ///
    /// Ids present in `other` but not yet known locally are added. This is the only mutation
    /// allowed on receipt of a message's stamped clock, and it must happen before the message is
    /// handed to the causal delivery engine's buffer re-scan (see [`crate::causal`]).
    pub fn merge(&mut self, other: &ClockSnapshot) {
        for (&id, &count) in other {
            let entry = self.entries.entry(id).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    /// Value-copy of every entry.
    pub fn snapshot(&self) -> ClockSnapshot {
        self.entries.clone()
    }

    /// Number of participants this clock has ever observed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The causal readiness predicate (§4.1):
    ///
    /// A message stamped with `message_clock` from `sender_id` is deliverable against this clock
    /// iff the sender's entry is exactly the next tick, and every other entry in `message_clock`
    /// is already covered by this clock.
    pub fn is_ready(&self, sender_id: ParticipantId, message_clock: &ClockSnapshot) -> bool {
        let expected = self.get(sender_id) + 1;
        let sender_entry = message_clock.get(&sender_id).copied().unwrap_or(0);
        if sender_entry != expected {
            return false;
        }
        message_clock
            .iter()
            .filter(|(&id, _)| id != sender_id)
            .all(|(&id, &count)| count <= self.get(id))
    }

    /// True if `message_clock`'s sender entry is behind this clock's record of the sender — i.e.
    /// a message this clock has already delivered or superseded.
    pub fn is_stale(&self, sender_id: ParticipantId, message_clock: &ClockSnapshot) -> bool {
        let sender_entry = message_clock.get(&sender_id).copied().unwrap_or(0);
        sender_entry <= self.get(sender_id)
    }
}

/// Componentwise happens-before relation between two clock snapshots, reading absent entries as
/// zero. Returns `None` when the snapshots are concurrent (neither dominates the other) or equal.
pub fn happens_before(a: &ClockSnapshot, b: &ClockSnapshot) -> Option<Ordering> {
    let mut a_less = false;
    let mut b_less = false;

    let mut ids: Vec<ParticipantId> = a.keys().chain(b.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    for id in ids {
        let av = a.get(&id).copied().unwrap_or(0);
        let bv = b.get(&id).copied().unwrap_or(0);
        match av.cmp(&bv) {
            Ordering::Less => a_less = true,
            Ordering::Greater => b_less = true,
            Ordering::Equal => {}
        }
    }

    match (a_less, b_less) {
        (true, true) => None,
        (true, false) => Some(Ordering::Less),
        (false, true) => Some(Ordering::Greater),
        (false, false) => Some(Ordering::Equal),
    }
}
