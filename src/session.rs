//! Hub-side per-connection state (§4.4).
//!
//! A session owns its identity, its current room (once joined), its server-side vector clock, and
//! a single outbound queue. Other sessions never reach into a session directly; all cross-session
//! traffic is enqueued here through [`Session::send`], which is what makes concurrent broadcasters
//! safe without a session-level lock held across I/O: the queue is the serialization point, and a
//! send attempt never blocks on the session's own I/O.

use tokio::sync::{mpsc, Mutex};

use crate::clock::{ClockSnapshot, VectorClock};
use crate::error::{HubError, SessionError};
use crate::frame::OutboundFrame;
use crate::ids::{ParticipantId, RoomId};

/// Capacity of a session's outbound queue. A consumer that falls this far behind is torn down
/// rather than allowed to stall every broadcaster waiting on it (§4.4, §5).
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct JoinedState {
    display_name: String,
    room_id: RoomId,
    clock: VectorClock,
    joined_at: i64,
}

enum Phase {
    ConnectedAnonymous,
    Joined(JoinedState),
}

/// One connected participant, as seen by the hub.
pub struct Session {
    pub id: ParticipantId,
    outbound: mpsc::Sender<OutboundFrame>,
    phase: Mutex<Phase>,
}

impl Session {
    pub fn new(id: ParticipantId) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        (
            Self {
                id,
                outbound: tx,
                phase: Mutex::new(Phase::ConnectedAnonymous),
            },
            rx,
        )
    }

    /// Enqueues a frame for delivery to this participant. Non-blocking: a full queue or a closed
    /// receiver is reported as an error rather than awaited, so one slow session can never stall a
    /// broadcaster fanning out to many others.
    pub fn send(&self, frame: OutboundFrame) -> Result<(), SessionError> {
        use tokio::sync::mpsc::error::TrySendError;
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SessionError::BackpressureOverflow),
            Err(TrySendError::Closed(_)) => Err(SessionError::PeerClosed),
        }
    }

    pub async fn is_joined(&self) -> bool {
        matches!(*self.phase.lock().await, Phase::Joined(_))
    }

    pub async fn display_name(&self) -> Option<String> {
        match &*self.phase.lock().await {
            Phase::Joined(state) => Some(state.display_name.clone()),
            Phase::ConnectedAnonymous => None,
        }
    }

    pub async fn room_id(&self) -> Option<RoomId> {
        match &*self.phase.lock().await {
            Phase::Joined(state) => Some(state.room_id.clone()),
            Phase::ConnectedAnonymous => None,
        }
    }

    pub async fn joined_at(&self) -> Option<i64> {
        match &*self.phase.lock().await {
            Phase::Joined(state) => Some(state.joined_at),
            Phase::ConnectedAnonymous => None,
        }
    }

    /// This session's own entry in its clock, i.e. how many messages it has sent — the value a
    /// new joiner copies when initializing its clock against existing members (§4.3 step 2).
    pub async fn self_entry(&self) -> Option<u64> {
        match &*self.phase.lock().await {
            Phase::Joined(state) => Some(state.clock.get(self.id)),
            Phase::ConnectedAnonymous => None,
        }
    }

    pub async fn clock_snapshot(&self) -> Option<ClockSnapshot> {
        match &*self.phase.lock().await {
            Phase::Joined(state) => Some(state.clock.snapshot()),
            Phase::ConnectedAnonymous => None,
        }
    }

    /// Transitions the session into the *Joined* state with a clock initialized by the hub
    /// (§4.3 step 2).
    pub async fn join(&self, display_name: String, room_id: RoomId, clock: VectorClock, joined_at: i64) {
        let mut phase = self.phase.lock().await;
        *phase = Phase::Joined(JoinedState {
            display_name,
            room_id,
            clock,
            joined_at,
        });
    }

    /// Increments this session's own clock entry for an outgoing chat send, returning the
    /// snapshot to stamp the message with. Errors if the session has not joined yet (§7: chat
    /// before join is a state error, not a mutation).
    pub async fn tick(&self) -> Result<ClockSnapshot, HubError> {
        let mut phase = self.phase.lock().await;
        match &mut *phase {
            Phase::Joined(state) => Ok(state.clock.tick(self.id)),
            Phase::ConnectedAnonymous => Err(HubError::ChatBeforeJoin),
        }
    }
}
