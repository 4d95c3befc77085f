//! The chat message itself, and the simulation hints it carries.

use serde::{Deserialize, Serialize};

use crate::clock::ClockSnapshot;
use crate::ids::{MessageId, ParticipantId, RoomId};

/// Per-message simulation hints.
///
/// `simulate_delay`/`delay_ms` let a client ask the hub to defer fan-out of this particular
/// message, reproducing wire-level reordering so causal delivery can be exercised end-to-end
/// (scenario 5, §8). Unknown fields in the wire representation are ignored by serde by default,
/// satisfying the codec's forward-compatibility requirement (§4.5).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub simulate_delay: bool,
    #[serde(default)]
    pub delay_ms: u64,
}

/// An immutable chat message as constructed by the hub upon receipt of a `chat` frame.
///
/// `sent_clock` is the sender's vector clock snapshot *after* it was incremented for this send —
/// the clock the recipient compares against its own view to decide deliverability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub sender_id: ParticipantId,
    pub sender_display_name: String,
    pub text: String,
    pub sent_clock: ClockSnapshot,
    /// Milliseconds since the Unix epoch.
    pub wall_timestamp: i64,
    pub room_id: RoomId,
    #[serde(default)]
    pub metadata: MessageMetadata,
}
