//! End-to-end scenarios driving the broadcast hub's public async API directly (no real TCP
//! sockets — the same boundary the teacher's own `Cluster`/`Node` tests exercise against an
//! in-process registry).

use causal_chat_hub::causal::CausalDeliveryEngine;
use causal_chat_hub::frame::OutboundFrame;
use causal_chat_hub::hub::Hub;
use causal_chat_hub::ids::ParticipantId;
use causal_chat_hub::message::MessageMetadata;

async fn join(hub: &Hub, name: &str) -> (ParticipantId, tokio::sync::mpsc::Receiver<OutboundFrame>) {
    let (id, rx) = hub.register();
    hub.join(id, name.to_string(), None).await.expect("join succeeds");
    (id, rx)
}

async fn drain_available(rx: &mut tokio::sync::mpsc::Receiver<OutboundFrame>) -> Vec<OutboundFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Scenario 6 (§8): a late joiner's clock is seeded from each existing member's self-entry, and
/// replaying history through a causal engine reconstructs delivery order.
#[tokio::test]
async fn late_joiner_clock_and_history_replay() {
    let hub = Hub::new();
    let (alice, mut alice_rx) = join(&hub, "alice").await;
    let (bob, mut bob_rx) = join(&hub, "bob").await;
    drain_available(&mut alice_rx).await;
    drain_available(&mut bob_rx).await;

    hub.chat(alice, "hello bob".to_string(), MessageMetadata::default()).await.unwrap();
    bob_rx.recv().await.expect("bob sees alice's message");

    hub.chat(bob, "hi alice".to_string(), MessageMetadata::default()).await.unwrap();
    hub.chat(alice, "how's it going".to_string(), MessageMetadata::default()).await.unwrap();

    let (carol, _carol_rx) = hub.register();
    hub.join(carol, "carol".to_string(), None).await.unwrap();

    let history = hub.request_history(carol).await.unwrap();
    assert_eq!(history.len(), 3);

    // Replay history through a causal engine seeded the same way the hub seeded Carol's session
    // clock, and confirm the fixpoint drain recovers every message.
    let mut engine = CausalDeliveryEngine::new(carol);
    engine.add_peer(alice);
    engine.add_peer(bob);

    let mut delivered_count = 0;
    for frame in &history {
        let message = causal_chat_hub::message::Message {
            message_id: frame.id,
            sender_id: frame.user_id,
            sender_display_name: frame.username.clone(),
            text: frame.text.clone(),
            sent_clock: causal_chat_hub::frame::wire_to_clock(&frame.vector_clock),
            wall_timestamp: frame.timestamp,
            room_id: frame.room_id.clone(),
            metadata: frame.metadata.clone(),
        };
        let outcome = engine.offer(message);
        if outcome.delivered_now {
            delivered_count += 1;
        }
        delivered_count += engine.drain().len();
    }

    assert_eq!(delivered_count, 3, "every historical message must eventually be delivered");
    assert!(engine.buffered().is_empty(), "nothing should remain buffered after replaying full history");
    assert_eq!(engine.clock().get(alice), 2);
    assert_eq!(engine.clock().get(bob), 1);
}

/// The simulated-delay feature (§4.3) lets two concurrently-sent messages reorder on the wire;
/// the recipient's own causal engine reconstructs send order regardless of arrival order.
#[tokio::test]
async fn simulated_delay_reorders_delivery_but_engine_recovers_order() {
    let hub = Hub::new();
    let (alice, mut alice_rx) = join(&hub, "alice").await;
    let (bob, mut bob_rx) = join(&hub, "bob").await;
    drain_available(&mut alice_rx).await;
    drain_available(&mut bob_rx).await;

    let slow = MessageMetadata { simulate_delay: true, delay_ms: 120 };
    let fast = MessageMetadata { simulate_delay: true, delay_ms: 10 };

    let first_sent = hub.chat(alice, "first".to_string(), slow).await.unwrap();
    let second_sent = hub.chat(alice, "second".to_string(), fast).await.unwrap();

    let mut engine = CausalDeliveryEngine::new(bob);
    engine.add_peer(alice);

    let mut delivered_total = 0;
    while delivered_total < 2 {
        let OutboundFrame::Chat(chat) = bob_rx.recv().await.expect("both messages eventually arrive") else {
            continue;
        };
        let message = causal_chat_hub::message::Message {
            message_id: chat.id,
            sender_id: chat.user_id,
            sender_display_name: chat.username,
            text: chat.text,
            sent_clock: causal_chat_hub::frame::wire_to_clock(&chat.vector_clock),
            wall_timestamp: chat.timestamp,
            room_id: chat.room_id,
            metadata: chat.metadata,
        };
        delivered_total += engine.offer(message).delivered_now as usize;
        delivered_total += engine.drain().len();
    }

    assert_eq!(engine.clock().get(alice), 2, "recipient must end up causally caught up regardless of wire reordering");
    assert_eq!(first_sent.sender_id, second_sent.sender_id);
}

#[tokio::test]
async fn chat_before_join_is_a_state_error_not_a_panic() {
    let hub = Hub::new();
    let (id, _rx) = hub.register();
    let err = hub.chat(id, "hi".to_string(), MessageMetadata::default()).await.unwrap_err();
    assert_eq!(err, causal_chat_hub::error::HubError::ChatBeforeJoin);
}

#[tokio::test]
async fn disconnect_is_idempotent_and_safe_for_unknown_ids() {
    let hub = Hub::new();
    hub.disconnect(ParticipantId::new()).await;
}
