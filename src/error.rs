//! Typed error taxonomy (§7).
//!
//! Three error enums, one per failure category the spec distinguishes. Each implements
//! [`std::error::Error`] via `thiserror` so callers can match on the exact failure kind; `anyhow`
//! is reserved for the binary boundary (see `main.rs`), where these are collapsed for logging.

use thiserror::Error;

/// Codec-level failures: the frame never reaches the hub's dispatch logic.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is missing the required `type` field")]
    MissingType,
    #[error("unknown frame type `{0}`")]
    UnknownType(String),
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// State errors: the frame is well-formed but invalid given the session's current state.
/// Replied to with a `system` error notice; causes no state mutation (§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("chat frame received before join")]
    ChatBeforeJoin,
    #[error("frame requires an active room membership, but this session has not joined yet")]
    NotJoined,
    #[error("room id must not be empty")]
    InvalidRoomId,
}

/// Transport/backpressure failures that trigger session teardown via the leave protocol (§7, §5).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("outbound queue overflowed; closing session")]
    BackpressureOverflow,
    #[error("transport read failed: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("transport write failed: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
}
