//! The wire frame taxonomy (§6) and its JSON codec (§4.5).
//!
//! Frames are tagged by a `type` field and decoded as line-delimited JSON (§4.5's concrete wire
//! choice). Decoding distinguishes "missing `type`" from "unknown `type`" because the hub reports
//! them as the same protocol-error category but callers (and tests) benefit from knowing which.
//! Unknown *extra* fields are tolerated automatically: neither frame enum derives
//! `deny_unknown_fields`, so serde drops them silently, satisfying the forward-compatibility
//! requirement.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::ClockSnapshot;
use crate::error::FrameError;
use crate::ids::{MessageId, ParticipantId, RoomId};
use crate::message::{Message, MessageMetadata};

/// Sorts a clock snapshot into the `[[id, count], ...]` wire shape (§4.5: ordering is a display
/// convention, not load-bearing for semantics — a `BTreeMap` already iterates in id order).
pub fn clock_to_wire(snapshot: &ClockSnapshot) -> Vec<(ParticipantId, u64)> {
    snapshot.iter().map(|(&id, &count)| (id, count)).collect()
}

pub fn wire_to_clock(pairs: &[(ParticipantId, u64)]) -> ClockSnapshot {
    pairs.iter().copied().collect()
}

/// The `chat` payload shape, shared between the standalone `chat` frame and each entry of a
/// `history` frame's `messages` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFrame {
    pub id: MessageId,
    pub user_id: ParticipantId,
    pub username: String,
    pub text: String,
    pub vector_clock: Vec<(ParticipantId, u64)>,
    pub timestamp: i64,
    pub room_id: RoomId,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl From<&Message> for ChatFrame {
    fn from(message: &Message) -> Self {
        Self {
            id: message.message_id,
            user_id: message.sender_id,
            username: message.sender_display_name.clone(),
            text: message.text.clone(),
            vector_clock: clock_to_wire(&message.sent_clock),
            timestamp: message.wall_timestamp,
            room_id: message.room_id.clone(),
            metadata: message.metadata.clone(),
        }
    }
}

/// A member entry within a `user_list` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: ParticipantId,
    pub username: String,
    pub joined_at: i64,
    pub vector_clock: Vec<(ParticipantId, u64)>,
}

/// Frames sent from a client to the hub.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Join {
        username: String,
        #[serde(default)]
        room_id: Option<String>,
    },
    Chat {
        text: String,
        /// The client's own view of its clock at send time. The hub does not trust this for
        /// stamping — it stamps with its own server-side session clock (§4.3) — but accepts and
        /// logs it for forward compatibility and diagnostics.
        #[serde(default)]
        vector_clock: Vec<(ParticipantId, u64)>,
        #[serde(default)]
        metadata: MessageMetadata,
    },
    Typing {
        is_typing: bool,
    },
    RequestHistory,
    GetUsers,
    Ping,
}

/// Frames sent from the hub to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    Init {
        client_id: ParticipantId,
        server_time: i64,
        default_room: RoomId,
    },
    JoinSuccess {
        room: RoomId,
        users: Vec<UserInfo>,
        message_count: usize,
    },
    UserList {
        users: Vec<UserInfo>,
        timestamp: i64,
    },
    Chat(ChatFrame),
    System {
        message: String,
        timestamp: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<ParticipantId>,
    },
    History {
        messages: Vec<ChatFrame>,
        total: usize,
    },
    UserTyping {
        user_id: ParticipantId,
        username: String,
        is_typing: bool,
    },
    MessageDelivered {
        message_id: MessageId,
        timestamp: i64,
    },
    Pong,
    Error {
        message: String,
        timestamp: i64,
    },
}

const KNOWN_INBOUND_TYPES: &[&str] = &[
    "join",
    "chat",
    "typing",
    "request_history",
    "get_users",
    "ping",
];

/// Decodes one line of JSON into an [`InboundFrame`], distinguishing a missing `type` field from
/// an unrecognized one so the hub can log the precise protocol-error category (§7).
pub fn decode_inbound(line: &str) -> Result<InboundFrame, FrameError> {
    let value: Value = serde_json::from_str(line)?;
    let type_field = value.get("type").and_then(Value::as_str).ok_or(FrameError::MissingType)?;
    if !KNOWN_INBOUND_TYPES.contains(&type_field) {
        return Err(FrameError::UnknownType(type_field.to_string()));
    }
    serde_json::from_value(value).map_err(FrameError::from)
}

/// Encodes an [`OutboundFrame`] as one JSON line (no trailing newline; the transport appends it).
pub fn encode_outbound(frame: &OutboundFrame) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(FrameError::from)
}
