//! Room state: membership and the bounded recent-history window.
//!
//! A room is a broadcast domain. Its membership set and history window are the only hub state
//! mutated by joins, leaves, and chat sends; §5 calls for serializing that mutation behind a
//! single mutex per room, held only for the duration of the mutation or snapshot copy, never
//! across I/O. That discipline lives one level up in [`crate::hub`]; this module is the plain,
//! lock-free data the hub mutates under its lock.

use std::collections::{HashSet, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ids::{ParticipantId, RoomId};
use crate::message::Message;

/// Number of most-recent messages retained per room (§3, §4.3).
pub const HISTORY_WINDOW: usize = 50;

/// A broadcast domain: a membership set plus a bounded FIFO of recent messages.
pub struct Room {
    pub room_id: RoomId,
    pub display_name: String,
    members: HashSet<ParticipantId>,
    history: VecDeque<Message>,
    pub created_at: i64,
}

impl Room {
    pub fn new(room_id: RoomId) -> Self {
        let display_name = room_id.0.clone();
        Self {
            room_id,
            display_name,
            members: HashSet::new(),
            history: VecDeque::with_capacity(HISTORY_WINDOW),
            created_at: now_ms(),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.members.iter().copied()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.contains(&id)
    }

    pub fn add_member(&mut self, id: ParticipantId) {
        self.members.insert(id);
    }

    pub fn remove_member(&mut self, id: ParticipantId) {
        self.members.remove(&id);
    }

    /// Appends a message to the history window, dropping the oldest entry if at capacity.
    pub fn push_history(&mut self, message: Message) {
        if self.history.len() >= HISTORY_WINDOW {
            self.history.pop_front();
        }
        self.history.push_back(message);
    }

    /// The full retained history, oldest first, up to [`HISTORY_WINDOW`] entries.
    pub fn history(&self) -> impl Iterator<Item = &Message> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockSnapshot;
    use crate::message::MessageMetadata;
    use crate::ids::MessageId;

    fn msg(room: RoomId) -> Message {
        Message {
            message_id: MessageId::new(),
            sender_id: ParticipantId::new(),
            sender_display_name: "a".to_string(),
            text: "hi".to_string(),
            sent_clock: ClockSnapshot::new(),
            wall_timestamp: 0,
            room_id: room,
            metadata: MessageMetadata::default(),
        }
    }

    #[test]
    fn history_drops_oldest_past_window() {
        let mut room = Room::new(RoomId::main());
        for _ in 0..(HISTORY_WINDOW + 10) {
            room.push_history(msg(room.room_id.clone()));
        }
        assert_eq!(room.history_len(), HISTORY_WINDOW);
    }

    #[test]
    fn membership_tracks_joins_and_leaves() {
        let mut room = Room::new(RoomId::main());
        let p = ParticipantId::new();
        assert!(!room.contains(p));
        room.add_member(p);
        assert!(room.contains(p));
        room.remove_member(p);
        assert!(!room.contains(p));
    }
}
