//! Causal delivery engine: the per-participant buffer that withholds messages until their causal
//! predecessors have arrived.
//!
//! This plays the same role that the speed-of-light gate once played for this codebase: instead
//! of buffering until a propagation deadline elapses, messages are buffered until the recipient's
//! vector clock dominates every dependency the sender had observed. The draining discipline —
//! ingest without blocking, periodically (or eagerly) drain whatever has become ready — is
//! unchanged.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::clock::{happens_before, VectorClock};
use crate::ids::{MessageId, ParticipantId};
use crate::message::Message;

/// Why `offer` did not deliver a message immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferReason {
    WaitingForCausalDependencies,
    Duplicate,
    BufferOverflow,
}

/// Result of offering a message to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferOutcome {
    pub delivered_now: bool,
    pub reason: Option<OfferReason>,
}

impl OfferOutcome {
    fn delivered() -> Self {
        Self {
            delivered_now: true,
            reason: None,
        }
    }

    fn buffered() -> Self {
        Self {
            delivered_now: false,
            reason: Some(OfferReason::WaitingForCausalDependencies),
        }
    }

    fn duplicate() -> Self {
        Self {
            delivered_now: false,
            reason: Some(OfferReason::Duplicate),
        }
    }

    fn overflow() -> Self {
        Self {
            delivered_now: false,
            reason: Some(OfferReason::BufferOverflow),
        }
    }
}

/// One withheld message, plus the bookkeeping needed to report on it.
#[derive(Debug, Clone)]
struct BufferedEntry {
    message: Message,
    received_at: Instant,
    attempts: u64,
}

/// An observability-friendly view of a buffered entry, returned by [`CausalDeliveryEngine::buffered`].
#[derive(Debug, Clone)]
pub struct BufferedView {
    pub message_id: MessageId,
    pub received_at: Instant,
    pub attempts: u64,
    pub wait_time: Duration,
}

/// Counters tracked by the engine for observability (§4.2).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub total_offered: u64,
    pub delivered_immediately: u64,
    pub buffered_total: u64,
    pub max_buffer_size: usize,
    pub current_buffer_size: usize,
    pub total_delivered: u64,
    pub overflow_total: u64,
}

/// Per-participant causal delivery engine.
///
/// Owns the participant's vector clock and its buffer of not-yet-deliverable messages. The hub
/// never buffers on behalf of a participant (§4.2); this engine is what a client-side consumer of
/// the hub's broadcast stream runs locally.
pub struct CausalDeliveryEngine {
    owner: ParticipantId,
    clock: VectorClock,
    buffer: HashMap<MessageId, BufferedEntry>,
    delivered: HashMap<MessageId, ()>,
    cap: Option<usize>,
    stats: EngineStats,
}

impl CausalDeliveryEngine {
    /// Creates an engine for `owner` with a fresh `{owner: 0}` clock and an unbounded buffer.
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            owner,
            clock: VectorClock::new(owner),
            buffer: HashMap::new(),
            delivered: HashMap::new(),
            cap: None,
            stats: EngineStats::default(),
        }
    }

    /// Creates an engine whose buffer reports `buffer_overflow` once it would exceed `cap`
    /// entries, rather than growing unboundedly (§5's resource policy expansion).
    pub fn with_cap(owner: ParticipantId, cap: usize) -> Self {
        let mut engine = Self::new(owner);
        engine.cap = Some(cap);
        engine
    }

    /// Seeds the clock from a server-provided snapshot, e.g. a late joiner's initial clock
    /// (§4.3 step 2). Only meaningful before any message has been offered.
    pub fn seed_clock(&mut self, clock: VectorClock) {
        self.clock = clock;
    }

    /// Registers a peer with the underlying clock without waiting for its first message.
    pub fn add_peer(&mut self, id: ParticipantId) {
        self.clock.add_peer(id);
    }

    pub fn clock(&self) -> &VectorClock {
        &self.clock
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Enumerates the current buffer contents for observability.
    pub fn buffered(&self) -> Vec<BufferedView> {
        let now = Instant::now();
        self.buffer
            .values()
            .map(|entry| BufferedView {
                message_id: entry.message.message_id,
                received_at: entry.received_at,
                attempts: entry.attempts,
                wait_time: now.saturating_duration_since(entry.received_at),
            })
            .collect()
    }

    /// Clears all state: the buffer, delivery history, and counters, and resets the clock to a
    /// fresh `{owner: 0}`.
    pub fn reset(&mut self) {
        self.clock = VectorClock::new(self.owner);
        self.buffer.clear();
        self.delivered.clear();
        self.stats = EngineStats::default();
    }

    /// Offers a message to the engine. Returns whether it was delivered immediately, and if not,
    /// why.
    pub fn offer(&mut self, message: Message) -> OfferOutcome {
        self.stats.total_offered += 1;

        if self.buffer.contains_key(&message.message_id) || self.delivered.contains_key(&message.message_id) {
            return OfferOutcome::duplicate();
        }

        if self.clock.is_ready(message.sender_id, &message.sent_clock) {
            self.commit(message);
            self.stats.delivered_immediately += 1;
            self.stats.total_delivered += 1;
            return OfferOutcome::delivered();
        }

        // A sender entry the recipient has already passed can never become ready again — clocks
        // are monotonic — so this is a duplicate under a new id (§7), not a missing predecessor.
        // Buffering it would hold the slot forever and, under a cap, starve real buffered entries.
        if self.clock.is_stale(message.sender_id, &message.sent_clock) {
            return OfferOutcome::duplicate();
        }

        if let Some(cap) = self.cap {
            if self.buffer.len() >= cap {
                self.stats.overflow_total += 1;
                return OfferOutcome::overflow();
            }
        }

        self.buffer.insert(
            message.message_id,
            BufferedEntry {
                message,
                received_at: Instant::now(),
                attempts: 0,
            },
        );
        self.stats.buffered_total += 1;
        self.stats.current_buffer_size = self.buffer.len();
        self.stats.max_buffer_size = self.stats.max_buffer_size.max(self.stats.current_buffer_size);
        OfferOutcome::buffered()
    }

    /// Merges a delivered message's clock and records it as delivered so future duplicate offers
    /// are recognized even after the buffer slot is gone.
    fn commit(&mut self, message: Message) {
        self.clock.merge(&message.sent_clock);
        self.delivered.insert(message.message_id, ());
    }

    /// Drains the buffer to a fixpoint: repeatedly scans for newly-ready messages, delivering one
    /// at a time (merging its clock before evaluating the next), until a full scan finds nothing
    /// new to deliver. Returns every delivered message across all passes, in delivery order.
    pub fn drain(&mut self) -> Vec<Message> {
        let mut delivered = Vec::new();
        loop {
            let pass = self.drain_pass();
            if pass.is_empty() {
                break;
            }
            delivered.extend(pass);
        }
        delivered
    }

    /// A single drain pass: finds every buffered entry ready against the *current* clock, orders
    /// them per the tie-break rule (§4.2), then commits them one at a time — merging each one's
    /// clock before checking readiness of the rest, since delivering one message can make another
    /// ready within the same pass. Entries still not ready have their attempt counter bumped.
    fn drain_pass(&mut self) -> Vec<Message> {
        let ready_ids: Vec<MessageId> = self
            .buffer
            .iter()
            .filter(|(_, entry)| self.clock.is_ready(entry.message.sender_id, &entry.message.sent_clock))
            .map(|(id, _)| *id)
            .collect();

        for (id, entry) in self.buffer.iter_mut() {
            if !ready_ids.contains(id) {
                entry.attempts += 1;
            }
        }

        if ready_ids.is_empty() {
            return Vec::new();
        }

        let mut candidates: Vec<BufferedEntry> = ready_ids
            .iter()
            .map(|id| self.buffer.remove(id).expect("id came from this buffer"))
            .collect();

        let mut delivered = Vec::new();
        while !candidates.is_empty() {
            let pick = select_minimal(&candidates);
            let entry = candidates.remove(pick);
            self.commit(entry.message.clone());
            delivered.push(entry.message);
        }

        self.stats.current_buffer_size = self.buffer.len();
        self.stats.total_delivered += delivered.len() as u64;
        delivered
    }
}

/// Picks the index of the entry that should be delivered next among a batch that all became ready
/// in the same pass: the one not causally preceded (dominated) by any other remaining candidate,
/// breaking ties by `received_at` ascending, then `message_id` ascending.
fn select_minimal(candidates: &[BufferedEntry]) -> usize {
    let mut best = 0;
    for i in 1..candidates.len() {
        if is_before(&candidates[i], &candidates[best]) {
            best = i;
        }
    }
    best
}

/// True if `a` should be ordered strictly before `b`: either `a`'s clock causally precedes `b`'s,
/// or they are incomparable and `a` wins the deterministic tie-break.
fn is_before(a: &BufferedEntry, b: &BufferedEntry) -> bool {
    match happens_before(&a.message.sent_clock, &b.message.sent_clock) {
        Some(std::cmp::Ordering::Less) => true,
        Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal) => false,
        None => {
            (a.received_at, a.message.message_id) < (b.received_at, b.message.message_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageMetadata;

    fn msg(sender: ParticipantId, room: crate::ids::RoomId, clock: crate::clock::ClockSnapshot, text: &str) -> Message {
        Message {
            message_id: MessageId::new(),
            sender_id: sender,
            sender_display_name: "tester".to_string(),
            text: text.to_string(),
            sent_clock: clock,
            wall_timestamp: 0,
            room_id: room,
            metadata: MessageMetadata::default(),
        }
    }

    fn clock_of(pairs: &[(ParticipantId, u64)]) -> crate::clock::ClockSnapshot {
        pairs.iter().copied().collect()
    }

    #[test]
    fn immediate_delivery_when_ready() {
        let a = ParticipantId::new();
        let bob = ParticipantId::new();
        let room = crate::ids::RoomId::main();
        let mut engine = CausalDeliveryEngine::new(bob);
        engine.add_peer(a);

        let m1 = msg(a, room, clock_of(&[(a, 1)]), "hello");
        let outcome = engine.offer(m1);
        assert!(outcome.delivered_now);
        assert_eq!(engine.clock().get(a), 1);
    }

    #[test]
    fn buffers_when_predecessor_missing_then_drains() {
        let a = ParticipantId::new();
        let bob = ParticipantId::new();
        let room = crate::ids::RoomId::main();
        let mut engine = CausalDeliveryEngine::new(bob);
        engine.add_peer(a);

        let m2 = msg(a, room.clone(), clock_of(&[(a, 2)]), "second");
        let outcome = engine.offer(m2.clone());
        assert!(!outcome.delivered_now);
        assert_eq!(outcome.reason, Some(OfferReason::WaitingForCausalDependencies));

        let m1 = msg(a, room, clock_of(&[(a, 1)]), "first");
        let outcome1 = engine.offer(m1);
        assert!(outcome1.delivered_now);

        let drained = engine.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].message_id, m2.message_id);
        assert_eq!(engine.clock().get(a), 2);
    }

    #[test]
    fn duplicate_offer_is_reported_and_does_not_advance_clock() {
        let a = ParticipantId::new();
        let bob = ParticipantId::new();
        let room = crate::ids::RoomId::main();
        let mut engine = CausalDeliveryEngine::new(bob);
        engine.add_peer(a);

        let m1 = msg(a, room, clock_of(&[(a, 1)]), "hi");
        let first = engine.offer(m1.clone());
        assert!(first.delivered_now);

        let second = engine.offer(m1);
        assert!(!second.delivered_now);
        assert_eq!(second.reason, Some(OfferReason::Duplicate));
        assert_eq!(engine.clock().get(a), 1);
    }

    #[test]
    fn stale_resend_under_a_fresh_id_is_dropped_not_buffered() {
        let a = ParticipantId::new();
        let bob = ParticipantId::new();
        let room = crate::ids::RoomId::main();
        let mut engine = CausalDeliveryEngine::new(bob);
        engine.add_peer(a);

        let m1 = msg(a, room.clone(), clock_of(&[(a, 1)]), "hi");
        assert!(engine.offer(m1).delivered_now);

        // A resend of the same logical event under a fresh message_id: the sender entry is
        // already covered by the recipient's clock, so it can never become ready. It must be
        // reported as a duplicate and never occupy a buffer slot.
        let resend = msg(a, room, clock_of(&[(a, 1)]), "hi again");
        let outcome = engine.offer(resend);
        assert!(!outcome.delivered_now);
        assert_eq!(outcome.reason, Some(OfferReason::Duplicate));
        assert!(engine.buffered().is_empty(), "a stale resend must not consume a buffer slot");
    }

    #[test]
    fn buffer_cap_reports_overflow_instead_of_growing() {
        let a = ParticipantId::new();
        let bob = ParticipantId::new();
        let room = crate::ids::RoomId::main();
        let mut engine = CausalDeliveryEngine::with_cap(bob, 1);
        engine.add_peer(a);

        let m2 = msg(a, room.clone(), clock_of(&[(a, 2)]), "second");
        let m3 = msg(a, room, clock_of(&[(a, 3)]), "third");
        assert!(!engine.offer(m2).delivered_now);
        let overflowed = engine.offer(m3);
        assert_eq!(overflowed.reason, Some(OfferReason::BufferOverflow));
        assert_eq!(engine.stats().overflow_total, 1);
    }

    #[test]
    fn drain_is_a_fixpoint() {
        let a = ParticipantId::new();
        let bob = ParticipantId::new();
        let room = crate::ids::RoomId::main();
        let mut engine = CausalDeliveryEngine::new(bob);
        engine.add_peer(a);

        engine.offer(msg(a, room.clone(), clock_of(&[(a, 3)]), "c"));
        engine.offer(msg(a, room.clone(), clock_of(&[(a, 2)]), "b"));
        engine.offer(msg(a, room, clock_of(&[(a, 1)]), "a"));

        let drained = engine.drain();
        assert_eq!(drained.iter().map(|m| m.text.clone()).collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(engine.buffered().is_empty());
        assert_eq!(engine.drain(), Vec::new(), "a second drain must find nothing new");
    }
}
