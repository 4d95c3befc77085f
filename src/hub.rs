//! The broadcast hub (§4.3): the single owning entity for the room registry and the connection
//! registry.
//!
//! This plays the role `Cluster` played in this codebase's ancestry — a registry mapping
//! participant ids to outbound handles — generalized with room membership and causal stamping on
//! top. Ownership is split exactly as §9 prescribes: the hub owns sessions and rooms; a session
//! never reaches into another session directly, only through the hub's broadcast primitives.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, instrument, warn};

use crate::clock::VectorClock;
use crate::error::HubError;
use crate::frame::{ChatFrame, OutboundFrame, UserInfo};
use crate::ids::{ParticipantId, RoomId};
use crate::message::{Message, MessageMetadata};
use crate::room::{now_ms, Room};
use crate::session::Session;

/// How long the hub waits between the "X left" system notice and the follow-up roster refresh
/// (§4.3 step 5's "brief settle").
const LEAVE_SETTLE: Duration = Duration::from_millis(50);

/// Outcome of a successful join, mirroring the `join_success` frame's payload (§6).
pub struct JoinOutcome {
    pub room_id: RoomId,
    pub users: Vec<UserInfo>,
    pub message_count: usize,
}

/// The broadcast hub. Create one per process (or one per test); each instance owns an
/// independent room and connection registry.
pub struct Hub {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
    sessions: DashMap<ParticipantId, Arc<Session>>,
}

impl Hub {
    /// Creates a hub with the always-present `main` room (§3).
    pub fn new() -> Self {
        let hub = Self {
            rooms: DashMap::new(),
            sessions: DashMap::new(),
        };
        hub.rooms.insert(RoomId::main(), Arc::new(Mutex::new(Room::new(RoomId::main()))));
        hub
    }

    /// Accepts a new connection: allocates an identifier, registers a session, and returns both
    /// the identifier and the receiver end of its outbound queue for the transport layer to pump
    /// onto the wire. The caller is responsible for sending the `init` frame (§4.3 step 1);
    /// [`Hub::init_frame`] builds it.
    pub fn register(&self) -> (ParticipantId, mpsc::Receiver<OutboundFrame>) {
        let id = ParticipantId::new();
        let (session, rx) = Session::new(id);
        self.sessions.insert(id, Arc::new(session));
        info!(participant = %id, "session registered");
        (id, rx)
    }

    pub fn init_frame(&self, id: ParticipantId) -> OutboundFrame {
        OutboundFrame::Init {
            client_id: id,
            server_time: now_ms(),
            default_room: RoomId::main(),
        }
    }

    fn room_or_create(&self, room_id: RoomId) -> Arc<Mutex<Room>> {
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Room::new(room_id))))
            .clone()
    }

    fn session(&self, id: ParticipantId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    /// Handles a `join` frame (§4.3 step 2).
    #[instrument(skip(self))]
    pub async fn join(&self, id: ParticipantId, username: String, room_id: Option<String>) -> Result<JoinOutcome, HubError> {
        let room_id: RoomId = match room_id {
            Some(raw) if raw.is_empty() => return Err(HubError::InvalidRoomId),
            Some(raw) => RoomId(raw),
            None => RoomId::main(),
        };

        let session = self.session(id).ok_or(HubError::NotJoined)?;
        let room_lock = self.room_or_create(room_id.clone());

        // Copy each existing member's own self-entry (how many messages *they* have sent), not
        // their full clock view — §4.3 step 2 is explicit that a late joiner's initial clock is
        // assembled from self-entries, never from a member's merged knowledge of others.
        let (existing_members, message_count) = {
            let room = room_lock.lock().await;
            (room.members().collect::<Vec<_>>(), room.history_len())
        };
        let mut entries = crate::clock::ClockSnapshot::new();
        entries.insert(id, 0);
        for member in existing_members {
            if let Some(peer) = self.session(member) {
                if let Some(self_entry) = peer.self_entry().await {
                    entries.insert(member, self_entry);
                }
            }
        }
        let clock = VectorClock::from_snapshot(entries);

        let room_size = {
            let mut room = room_lock.lock().await;
            room.add_member(id);
            room.member_count()
        };
        info!(participant = %id, room = %room_id, room_size, "joined room");

        let joined_at = now_ms();
        session.join(username, room_id.clone(), clock, joined_at).await;

        let users = self.user_list(&room_lock).await;
        self.send_user_list(&room_lock, users.clone()).await;
        self.send_system(&room_lock, format!("{} joined", session.display_name().await.unwrap_or_default()), Some(id)).await;

        Ok(JoinOutcome {
            room_id,
            users,
            message_count,
        })
    }

    async fn user_list(&self, room_lock: &Arc<Mutex<Room>>) -> Vec<UserInfo> {
        let members = {
            let room = room_lock.lock().await;
            room.members().collect::<Vec<_>>()
        };
        let mut users = Vec::with_capacity(members.len());
        for member in members {
            if let Some(session) = self.session(member) {
                if let (Some(display_name), Some(joined_at), Some(clock)) =
                    (session.display_name().await, session.joined_at().await, session.clock_snapshot().await)
                {
                    users.push(UserInfo {
                        id: member,
                        username: display_name,
                        joined_at,
                        vector_clock: crate::frame::clock_to_wire(&clock),
                    });
                }
            }
        }
        users
    }

    async fn send_user_list(&self, room_lock: &Arc<Mutex<Room>>, users: Vec<UserInfo>) {
        let frame = OutboundFrame::UserList { users, timestamp: now_ms() };
        self.broadcast_to_room(room_lock, &frame, None).await;
    }

    async fn send_system(&self, room_lock: &Arc<Mutex<Room>>, message: String, exclude: Option<ParticipantId>) {
        let frame = OutboundFrame::System {
            message,
            timestamp: now_ms(),
            user_id: exclude,
        };
        self.broadcast_to_room(room_lock, &frame, exclude).await;
    }

    /// Sends `frame` to every member of the room except `exclude`, tearing down any session whose
    /// queue rejects the send (§4.4's backpressure policy: drop-session, not drop-message).
    async fn broadcast_to_room(&self, room_lock: &Arc<Mutex<Room>>, frame: &OutboundFrame, exclude: Option<ParticipantId>) {
        let members = {
            let room = room_lock.lock().await;
            room.members().collect::<Vec<_>>()
        };
        for member in members {
            if Some(member) == exclude {
                continue;
            }
            if let Some(session) = self.session(member) {
                if let Err(err) = session.send(frame.clone()) {
                    warn!(participant = %member, error = %err, "dropping unresponsive session");
                    self.disconnect(member).await;
                }
            }
        }
    }

    /// Handles a `chat` frame (§4.3 step 3). Returns the constructed message; the caller (or this
    /// method, for delayed sends) is responsible for nothing further — broadcast and ack both
    /// happen here.
    #[instrument(skip(self, text))]
    pub async fn chat(&self, id: ParticipantId, text: String, metadata: MessageMetadata) -> Result<Message, HubError> {
        let session = self.session(id).ok_or(HubError::ChatBeforeJoin)?;
        let sent_clock = session.tick().await?;
        let room_id = session.room_id().await.ok_or(HubError::ChatBeforeJoin)?;
        let display_name = session.display_name().await.unwrap_or_default();

        let message = Message {
            message_id: crate::ids::MessageId::new(),
            sender_id: id,
            sender_display_name: display_name,
            text,
            sent_clock,
            wall_timestamp: now_ms(),
            room_id: room_id.clone(),
            metadata,
        };

        let room_lock = self.room_or_create(room_id.clone());
        {
            let mut room = room_lock.lock().await;
            room.push_history(message.clone());
        }

        if let Err(err) = session.send(OutboundFrame::MessageDelivered {
            message_id: message.message_id,
            timestamp: message.wall_timestamp,
        }) {
            warn!(participant = %id, error = %err, "failed to ack sender, tearing down session");
            self.disconnect(id).await;
        }

        self.schedule_broadcast(room_lock, message.clone(), id).await;

        Ok(message)
    }

    /// Fans `message` out to every other room member, honoring the simulated delay hint (§4.3):
    /// the clock increment, history append, and sender ack already happened by the time this
    /// runs, but the fan-out itself may be deferred. Each delayed send is scheduled
    /// independently so concurrent delayed messages are never serialized behind one another.
    async fn schedule_broadcast(&self, room_lock: Arc<Mutex<Room>>, message: Message, sender: ParticipantId) {
        let frame = OutboundFrame::Chat(ChatFrame::from(&message));
        if message.metadata.simulate_delay && message.metadata.delay_ms > 0 {
            let delay = Duration::from_millis(message.metadata.delay_ms);
            let hub_rooms = self.rooms.clone();
            let hub_sessions = self.sessions.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let hub = HubRef { rooms: &hub_rooms, sessions: &hub_sessions };
                hub.broadcast_to_room(&room_lock, &frame, Some(sender)).await;
            });
        } else {
            self.broadcast_to_room(&room_lock, &frame, Some(sender)).await;
        }
    }

    /// Handles a `typing` frame.
    pub async fn typing(&self, id: ParticipantId, is_typing: bool) -> Result<(), HubError> {
        let session = self.session(id).ok_or(HubError::NotJoined)?;
        let room_id = session.room_id().await.ok_or(HubError::NotJoined)?;
        let display_name = session.display_name().await.unwrap_or_default();
        let room_lock = self.room_or_create(room_id);
        let frame = OutboundFrame::UserTyping {
            user_id: id,
            username: display_name,
            is_typing,
        };
        self.broadcast_to_room(&room_lock, &frame, Some(id)).await;
        Ok(())
    }

    /// Handles a `request_history` frame: up to the last 50 messages of the caller's room.
    pub async fn request_history(&self, id: ParticipantId) -> Result<Vec<ChatFrame>, HubError> {
        let session = self.session(id).ok_or(HubError::NotJoined)?;
        let room_id = session.room_id().await.ok_or(HubError::NotJoined)?;
        let room_lock = self.room_or_create(room_id);
        let room = room_lock.lock().await;
        Ok(room.history().map(ChatFrame::from).collect())
    }

    /// Handles a `get_users` frame.
    pub async fn get_users(&self, id: ParticipantId) -> Result<Vec<UserInfo>, HubError> {
        let session = self.session(id).ok_or(HubError::NotJoined)?;
        let room_id = session.room_id().await.ok_or(HubError::NotJoined)?;
        let room_lock = self.room_or_create(room_id);
        Ok(self.user_list(&room_lock).await)
    }

    /// Sends a frame directly to one participant, e.g. a `pong` reply or an `error` notice.
    pub fn reply(&self, id: ParticipantId, frame: OutboundFrame) {
        if let Some(session) = self.session(id) {
            let _ = session.send(frame);
        }
    }

    /// Tears a session down: removes it from the connection registry and, if it had joined a
    /// room, removes it from that room's membership and broadcasts the leave protocol (§4.3
    /// step 5). Clock history in other sessions is left untouched — departed entries are never
    /// pruned (§9's open question).
    #[instrument(skip(self))]
    pub async fn disconnect(&self, id: ParticipantId) {
        let Some((_, session)) = self.sessions.remove(&id) else {
            return;
        };
        let Some(room_id) = session.room_id().await else {
            return;
        };
        let display_name = session.display_name().await.unwrap_or_default();
        let room_lock = self.room_or_create(room_id);
        {
            let mut room = room_lock.lock().await;
            room.remove_member(id);
        }
        self.send_system(&room_lock, format!("{display_name} left"), None).await;

        let rooms = self.rooms.clone();
        let sessions = self.sessions.clone();
        tokio::spawn(async move {
            tokio::time::sleep(LEAVE_SETTLE).await;
            let hub = HubRef { rooms: &rooms, sessions: &sessions };
            let users = hub.user_list(&room_lock).await;
            hub.send_user_list(&room_lock, users).await;
        });
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

/// A borrowed view of the hub's registries, used by tasks spawned for delayed work (delayed
/// broadcast, post-leave roster refresh) so they do not need to hold an `Arc<Hub>` themselves.
struct HubRef<'a> {
    rooms: &'a DashMap<RoomId, Arc<Mutex<Room>>>,
    sessions: &'a DashMap<ParticipantId, Arc<Session>>,
}

impl<'a> HubRef<'a> {
    fn session(&self, id: ParticipantId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| entry.clone())
    }

    async fn user_list(&self, room_lock: &Arc<Mutex<Room>>) -> Vec<UserInfo> {
        let members = {
            let room = room_lock.lock().await;
            room.members().collect::<Vec<_>>()
        };
        let mut users = Vec::with_capacity(members.len());
        for member in members {
            if let Some(session) = self.session(member) {
                if let (Some(display_name), Some(joined_at), Some(clock)) =
                    (session.display_name().await, session.joined_at().await, session.clock_snapshot().await)
                {
                    users.push(UserInfo {
                        id: member,
                        username: display_name,
                        joined_at,
                        vector_clock: crate::frame::clock_to_wire(&clock),
                    });
                }
            }
        }
        users
    }

    async fn send_user_list(&self, room_lock: &Arc<Mutex<Room>>, users: Vec<UserInfo>) {
        let frame = OutboundFrame::UserList { users, timestamp: now_ms() };
        self.broadcast_to_room(room_lock, &frame, None).await;
    }

    async fn broadcast_to_room(&self, room_lock: &Arc<Mutex<Room>>, frame: &OutboundFrame, exclude: Option<ParticipantId>) {
        let members = {
            let room = room_lock.lock().await;
            room.members().collect::<Vec<_>>()
        };
        for member in members {
            if Some(member) == exclude {
                continue;
            }
            if let Some(session) = self.session(member) {
                let _ = session.send(frame.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn join(hub: &Hub, name: &str) -> ParticipantId {
        let (id, _rx) = hub.register();
        hub.join(id, name.to_string(), None).await.expect("join succeeds");
        id
    }

    #[tokio::test]
    async fn join_initializes_clock_from_existing_members_self_entries() {
        let hub = Hub::new();
        let alice = join(&hub, "alice").await;
        hub.chat(alice, "hi".to_string(), MessageMetadata::default()).await.unwrap();
        hub.chat(alice, "again".to_string(), MessageMetadata::default()).await.unwrap();

        let (carol, _rx) = hub.register();
        hub.join(carol, "carol".to_string(), None).await.expect("join succeeds");

        let carol_session = hub.session(carol).unwrap();
        let clock = carol_session.clock_snapshot().await.unwrap();
        assert_eq!(clock.get(&alice), Some(&2), "carol's clock must copy alice's self-entry");
        assert_eq!(clock.get(&carol), Some(&0));
    }

    #[tokio::test]
    async fn chat_before_join_is_rejected_without_mutating_state() {
        let hub = Hub::new();
        let (id, _rx) = hub.register();
        let result = hub.chat(id, "hi".to_string(), MessageMetadata::default()).await;
        assert!(matches!(result, Err(HubError::ChatBeforeJoin)));
    }

    #[tokio::test]
    async fn history_is_capped_and_served_in_order() {
        let hub = Hub::new();
        let alice = join(&hub, "alice").await;
        for i in 0..5 {
            hub.chat(alice, format!("msg{i}"), MessageMetadata::default()).await.unwrap();
        }
        let history = hub.request_history(alice).await.unwrap();
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].text, "msg0");
        assert_eq!(history[4].text, "msg4");
    }

    #[tokio::test]
    async fn disconnect_removes_membership_and_notifies_room() {
        let hub = Hub::new();
        let alice = join(&hub, "alice").await;
        let (bob_id, mut bob_rx) = hub.register();
        hub.join(bob_id, "bob".to_string(), None).await.unwrap();

        // Drain join-time notifications for bob.
        while bob_rx.try_recv().is_ok() {}

        hub.disconnect(alice).await;

        let notice = bob_rx.recv().await.expect("bob should see the leave notice");
        match notice {
            OutboundFrame::System { message, .. } => assert!(message.contains("left")),
            other => panic!("expected a system notice, got {other:?}"),
        }
    }
}
