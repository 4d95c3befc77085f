//! Causal-order group chat: a per-participant vector-clock delivery engine plus the broadcast hub
//! that stamps and fans out messages to connected sessions.
//!
//! The two subsystems are independent: [`hub`] is the authoritative server that assigns causal
//! stamps and ships frames to clients in whatever order the network (or a simulated delay)
//! delivers them, and [`causal`] is the buffering engine a consumer of that stream — a client, or
//! a test harness standing in for one — runs locally to recover causal order before display.

pub mod causal;
pub mod clock;
pub mod config;
pub mod error;
pub mod frame;
pub mod hub;
pub mod ids;
pub mod message;
pub mod room;
pub mod session;
pub mod transport;
