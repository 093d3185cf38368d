//! Coordinator behavior against the in-memory hub.
//!
//! Each test wires one or more coordinators to a shared `SimHub` and a
//! virtual clock, then delivers pushes by hand so the interleaving of
//! acknowledgements and echoes is explicit.

use std::{sync::Arc, time::Duration};

use roomsync_client::{
    CommandOutcome, ConnectionState, EventName, HubSignal, PushEvent, RawPush, RoomPhase, Runtime,
    StaticAccount, SyncConfig, SyncCoordinator, SyncError,
};
use roomsync_core::{Environment, Message, Participant, RoomId, UserId};
use roomsync_harness::{SharedSimHub, SimClient, SimEnv};
use tokio::sync::mpsc;

fn world() -> (SharedSimHub, SimEnv) {
    let env = SimEnv::new();
    (SharedSimHub::new(env.clone()), env)
}

fn client(hub: &SharedSimHub, env: &SimEnv, user: &str) -> SimClient {
    let profile = Participant::new(user, user.to_uppercase());
    SyncCoordinator::new(
        hub.connect(profile.clone()),
        StaticAccount::new(profile),
        env.clone(),
        SyncConfig::default(),
    )
}

/// Deliver every queued push, returning how many changed the stores.
async fn deliver(hub: &SharedSimHub, client: &SimClient) -> usize {
    let mut changed = 0;
    for pending in hub.take_pushes(&client.current_user_id(), usize::MAX) {
        if client.handle_push(&pending.push).await {
            changed += 1;
        }
    }
    changed
}

async fn history_len(client: &SimClient, room_id: &RoomId) -> usize {
    client.with_state(|state| state.conversations().history(room_id).len()).await
}

#[tokio::test]
async fn create_room_joins_and_activates() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");

    let room = ada.create_room("  general ").await.unwrap();
    assert_eq!(room.name, "general");

    let model = ada.snapshot();
    assert_eq!(model.active_room_id(), Some(&room.id));
    assert!(model.is_joined(&room.id));
    assert_eq!(ada.phase(&room.id).await, RoomPhase::Active);

    // The room-created echo changes nothing and publishes nothing.
    let version = ada.snapshot().version;
    assert_eq!(deliver(&hub, &ada).await, 0);
    assert_eq!(ada.snapshot().version, version);
}

#[tokio::test]
async fn sent_message_and_its_echo_yield_one_copy() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();

    let message = ada.send_message(&room.id, "hi").await.unwrap();
    assert_eq!(message.content, "hi");
    deliver(&hub, &ada).await;

    let view = ada.room_view(&room.id).await.unwrap();
    assert_eq!(view.history.len(), 1);
    assert_eq!(view.history[0].id, message.id);
}

#[tokio::test]
async fn concurrent_sends_both_land() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();

    let (first, second) =
        tokio::join!(ada.send_message(&room.id, "one"), ada.send_message(&room.id, "two"));
    first.unwrap();
    second.unwrap();
    deliver(&hub, &ada).await;

    assert_eq!(history_len(&ada, &room.id).await, 2);
}

#[tokio::test]
async fn leaving_active_room_moves_focus() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let first = ada.create_room("first").await.unwrap();
    let second = ada.create_room("second").await.unwrap();
    assert_eq!(ada.snapshot().active_room_id(), Some(&second.id));

    assert_eq!(ada.leave_room(&second.id).await, Ok(CommandOutcome::Applied));
    assert_eq!(ada.snapshot().active_room_id(), Some(&first.id));
    assert_eq!(ada.phase(&second.id).await, RoomPhase::Left);

    assert_eq!(ada.leave_room(&second.id).await, Ok(CommandOutcome::AlreadyResolved));
}

#[tokio::test]
async fn participant_left_for_absent_user_changes_nothing() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    deliver(&hub, &ada).await;

    let push = PushEvent::ParticipantLeft { room_id: room.id.clone(), user_id: "ghost".into() }
        .encode()
        .unwrap();
    assert!(!ada.handle_push(&push).await);
}

#[tokio::test]
async fn failed_request_mutates_nothing() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    let version = ada.snapshot().version;

    hub.fail_next(&"ada".into(), "SendMessage");
    let err = ada.send_message(&room.id, "hi").await.unwrap_err();

    assert!(matches!(err, SyncError::RequestFailed { operation: "SendMessage", .. }));
    assert!(err.is_retryable());
    assert_eq!(history_len(&ada, &room.id).await, 0);
    assert_eq!(ada.snapshot().version, version);

    // Retrying succeeds once the hub recovers.
    ada.send_message(&room.id, "hi").await.unwrap();
    assert_eq!(history_len(&ada, &room.id).await, 1);
}

#[tokio::test]
async fn invalid_commands_rejected_locally() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let unjoined = RoomId::from("room-404");

    let invalid = |result: Result<_, SyncError>| {
        matches!(result, Err(SyncError::InvalidOperation { .. }))
    };

    assert!(invalid(ada.create_room("   ").await.map(|_| ())));
    assert!(invalid(ada.join_room(&RoomId::from(" ")).await.map(|_| ())));
    assert!(invalid(ada.send_message(&unjoined, "hi").await.map(|_| ())));
    assert!(invalid(ada.notify_typing(&unjoined).await.map(|_| ())));
    assert!(invalid(ada.set_active(Some(&unjoined)).await));

    let room = ada.create_room("general").await.unwrap();
    assert!(invalid(ada.send_message(&room.id, " \n ").await.map(|_| ())));
}

#[tokio::test]
async fn read_only_room_rejects_messages() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("announcements").await.unwrap();
    hub.set_read_only(&room.id, true);
    ada.load_directory().await.unwrap();

    let err = ada.send_message(&room.id, "hi").await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidOperation { .. }));
}

#[tokio::test]
async fn edit_and_delete_own_message() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    let message = ada.send_message(&room.id, "draft").await.unwrap();

    assert_eq!(
        ada.edit_message(&room.id, &message.id, "final").await,
        Ok(CommandOutcome::Applied)
    );
    deliver(&hub, &ada).await;
    let view = ada.room_view(&room.id).await.unwrap();
    assert_eq!(view.history[0].content, "final");
    assert!(view.history[0].is_edited());

    assert_eq!(ada.delete_message(&room.id, &message.id).await, Ok(CommandOutcome::Applied));
    assert_eq!(history_len(&ada, &room.id).await, 0);

    // The message-deleted echo finds nothing left to remove.
    assert_eq!(deliver(&hub, &ada).await, 0);
    assert_eq!(
        ada.delete_message(&room.id, &message.id).await,
        Ok(CommandOutcome::AlreadyResolved)
    );
    assert_eq!(
        ada.edit_message(&room.id, &message.id, "again").await,
        Ok(CommandOutcome::AlreadyResolved)
    );
}

#[tokio::test]
async fn join_looks_up_unlisted_room_and_participants() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    ada.send_message(&room.id, "welcome").await.unwrap();

    assert_eq!(bo.join_room(&room.id).await, Ok(CommandOutcome::Applied));

    let model = bo.snapshot();
    assert_eq!(model.active_room_id(), Some(&room.id));
    let view = model.active.unwrap();
    assert_eq!(view.room.name, "general");
    assert_eq!(view.history.len(), 1);
    let members: Vec<&str> = view.participants.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(members, ["ada", "bo"]);

    assert_eq!(bo.join_room(&room.id).await, Ok(CommandOutcome::AlreadyResolved));
}

#[tokio::test]
async fn failed_room_lookup_lists_placeholder_until_push() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();

    hub.fail_next(&"bo".into(), "GetRoom");
    bo.join_room(&room.id).await.unwrap();
    let listed = bo.with_state(|state| state.directory().get(&room.id).cloned()).await.unwrap();
    assert_eq!(listed.name, room.id.as_str());

    deliver(&hub, &bo).await;
    let listed = bo.with_state(|state| state.directory().get(&room.id).cloned()).await.unwrap();
    assert_eq!(listed.name, "general");
}

#[tokio::test]
async fn typing_notices_are_throttled() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();

    assert_eq!(ada.notify_typing(&room.id).await, Ok(true));
    assert_eq!(ada.notify_typing(&room.id).await, Ok(false));

    env.advance(Duration::from_secs(3));
    assert_eq!(ada.notify_typing(&room.id).await, Ok(true));

    ada.notify_stopped_typing(&room.id).await.unwrap();
    assert_eq!(ada.notify_typing(&room.id).await, Ok(true));
}

#[tokio::test]
async fn others_typing_expires_and_clears_on_message() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    bo.join_room(&room.id).await.unwrap();
    deliver(&hub, &ada).await;
    deliver(&hub, &bo).await;

    bo.notify_typing(&room.id).await.unwrap();
    deliver(&hub, &ada).await;
    let view = ada.room_view(&room.id).await.unwrap();
    assert_eq!(view.typists_at(env.now()), [&UserId::from("bo")]);

    // A message from the typist ends the entry.
    bo.send_message(&room.id, "done").await.unwrap();
    deliver(&hub, &ada).await;
    let view = ada.room_view(&room.id).await.unwrap();
    assert!(view.typists_at(env.now()).is_empty());

    env.advance(Duration::from_secs(10));
    bo.notify_typing(&room.id).await.unwrap();
    deliver(&hub, &ada).await;
    env.advance(Duration::from_secs(6));
    let view = ada.room_view(&room.id).await.unwrap();
    assert!(view.typists_at(env.now()).is_empty());
    assert!(ada.sweep_typing().await);
}

#[tokio::test]
async fn own_typing_echo_is_ignored() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    deliver(&hub, &ada).await;

    ada.notify_typing(&room.id).await.unwrap();
    assert_eq!(deliver(&hub, &ada).await, 0);
    let view = ada.room_view(&room.id).await.unwrap();
    assert!(view.typing.is_empty());
}

#[tokio::test]
async fn malformed_pushes_are_dropped() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    deliver(&hub, &ada).await;
    let version = ada.snapshot().version;

    let bad = [
        RawPush::new("message-created", serde_json::json!({ "roomId": 5 })),
        RawPush::new("room-renamed", serde_json::json!({ "roomId": room.id })),
        RawPush::new("typing-started", serde_json::json!({ "roomId": room.id, "userId": "" })),
    ];
    for push in &bad {
        assert!(!ada.handle_push(push).await);
    }
    assert_eq!(ada.snapshot().version, version);

    // Later valid pushes still apply.
    let valid = PushEvent::TypingStarted { room_id: room.id.clone(), user_id: "bo".into() }
        .encode()
        .unwrap();
    assert!(ada.handle_push(&valid).await);
}

#[tokio::test]
async fn unsubscribed_events_are_not_routed() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    let typing = PushEvent::TypingStarted { room_id: room.id.clone(), user_id: "bo".into() }
        .encode()
        .unwrap();

    assert!(ada.unsubscribe(EventName::TypingStarted).await);
    assert!(!ada.unsubscribe(EventName::TypingStarted).await);
    assert!(!ada.handle_push(&typing).await);

    assert!(ada.subscribe(EventName::TypingStarted).await);
    assert!(ada.handle_push(&typing).await);
}

#[tokio::test]
async fn reconnect_resync_recovers_missed_messages() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    bo.join_room(&room.id).await.unwrap();
    deliver(&hub, &bo).await;

    hub.disconnect(&"bo".into());
    bo.handle_signal(HubSignal::Disconnected).await.unwrap();
    assert_eq!(bo.snapshot().connection, ConnectionState::Disconnected);

    ada.send_message(&room.id, "one").await.unwrap();
    ada.send_message(&room.id, "two").await.unwrap();
    assert_eq!(history_len(&bo, &room.id).await, 0);

    hub.reconnect(&"bo".into());
    bo.handle_signal(HubSignal::Reconnected).await.unwrap();

    assert_eq!(bo.snapshot().connection, ConnectionState::Connected);
    assert_eq!(history_len(&bo, &room.id).await, 2);
}

#[tokio::test]
async fn failed_resync_leaves_state_stale() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    ada.create_room("general").await.unwrap();

    hub.fail_next(&"ada".into(), "GetHistory");
    let err = ada.resync().await.unwrap_err();
    assert!(matches!(err, SyncError::RequestFailed { operation: "GetHistory", .. }));
    assert_eq!(ada.snapshot().connection, ConnectionState::Stale);

    ada.resync().await.unwrap();
    assert_eq!(ada.snapshot().connection, ConnectionState::Connected);
}

#[tokio::test]
async fn room_deleted_while_disconnected_is_dropped_on_resync() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    bo.join_room(&room.id).await.unwrap();

    hub.disconnect(&"bo".into());
    assert!(hub.delete_room(&room.id));
    hub.reconnect(&"bo".into());
    bo.resync().await.unwrap();

    assert_eq!(bo.phase(&room.id).await, RoomPhase::Deleted);
    assert_eq!(bo.snapshot().active_room_id(), None);
    assert!(bo.snapshot().rooms.is_empty());

    // The live client learns of it from the push.
    deliver(&hub, &ada).await;
    assert_eq!(ada.phase(&room.id).await, RoomPhase::Deleted);
}

#[tokio::test]
async fn every_change_bumps_the_published_version() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let mut watch = ada.watch();
    assert!(!watch.has_changed().unwrap());

    let room = ada.create_room("general").await.unwrap();
    assert!(watch.has_changed().unwrap());
    let created = watch.borrow_and_update().version;
    assert_eq!(created, 1);

    ada.send_message(&room.id, "hi").await.unwrap();
    assert_eq!(watch.borrow_and_update().version, created + 1);
    assert_eq!(deliver(&hub, &ada).await, 0);
    assert!(!watch.has_changed().unwrap());
}

#[tokio::test]
async fn runtime_routes_signals_and_sweeps_on_virtual_time() {
    let (hub, env) = world();
    let ada = Arc::new(client(&hub, &env, "ada"));
    let room = ada.create_room("general").await.unwrap();
    deliver(&hub, &ada).await;

    let (signals, rx) = mpsc::channel(8);
    let runtime = tokio::spawn(Runtime::new(Arc::clone(&ada)).run(rx));
    let mut watch = ada.watch();

    let typing = PushEvent::TypingStarted { room_id: room.id.clone(), user_id: "bo".into() }
        .encode()
        .unwrap();
    signals.send(HubSignal::Push(typing)).await.unwrap();
    watch.changed().await.unwrap();
    let typists = ada.with_state(|state| state.typing().active_typists(&room.id, env.now())).await;
    assert_eq!(typists, [UserId::from("bo")]);

    env.advance(Duration::from_secs(6));
    watch.changed().await.unwrap();
    let remaining = ada.with_state(|state| state.typing().next_expiry()).await;
    assert_eq!(remaining, None);

    drop(signals);
    runtime.await.unwrap();
}

// Replies held back by the hub while pushes and other commands overtake them.

#[tokio::test]
async fn listing_in_flight_during_create_keeps_created_room() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let mut listing = hub.hold_reply(&"ada".into(), "GetAllRooms");

    let (loaded, room) = tokio::join!(ada.load_directory(), async {
        assert!(listing.arrived().await);
        let room = ada.create_room("general").await.unwrap();
        listing.release();
        room
    });
    loaded.unwrap();

    assert_eq!(ada.phase(&room.id).await, RoomPhase::Active);
    assert!(ada.snapshot().rooms.iter().any(|r| r.id == room.id));
    assert_eq!(ada.leave_room(&room.id).await, Ok(CommandOutcome::Applied));
    assert_eq!(ada.join_room(&room.id).await, Ok(CommandOutcome::Applied));
}

#[tokio::test]
async fn deletion_pushed_during_listing_stays_deleted() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    let mut listing = hub.hold_reply(&"bo".into(), "GetAllRooms");

    let (loaded, ()) = tokio::join!(bo.load_directory(), async {
        assert!(listing.arrived().await);
        assert!(hub.delete_room(&room.id));
        deliver(&hub, &bo).await;
        listing.release();
    });
    loaded.unwrap();

    assert_eq!(bo.phase(&room.id).await, RoomPhase::Deleted);
    assert!(bo.snapshot().rooms.is_empty());
}

#[tokio::test]
async fn room_left_during_resync_is_not_rejoined() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    let mut listing = hub.hold_reply(&"ada".into(), "GetAllRooms");

    let (resynced, left) = tokio::join!(ada.resync(), async {
        assert!(listing.arrived().await);
        let left = ada.leave_room(&room.id).await;
        listing.release();
        left
    });
    resynced.unwrap();
    assert_eq!(left, Ok(CommandOutcome::Applied));

    assert_eq!(ada.phase(&room.id).await, RoomPhase::Left);
    assert!(!ada.snapshot().is_joined(&room.id));
    assert!(hub.with_hub(|h| h.memberships(&"ada".into())).is_empty());
}

#[tokio::test]
async fn room_created_during_resync_survives_it() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let mut listing = hub.hold_reply(&"ada".into(), "GetAllRooms");

    let (resynced, room) = tokio::join!(ada.resync(), async {
        assert!(listing.arrived().await);
        let room = ada.create_room("general").await.unwrap();
        listing.release();
        room
    });
    resynced.unwrap();

    assert_eq!(ada.phase(&room.id).await, RoomPhase::Active);
    assert_eq!(ada.snapshot().connection, ConnectionState::Connected);
}

#[tokio::test]
async fn message_echo_before_send_ack_yields_one_copy() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    deliver(&hub, &ada).await;
    let mut ack = hub.hold_reply(&"ada".into(), "SendMessage");

    let (sent, echoed) = tokio::join!(ada.send_message(&room.id, "hi"), async {
        assert!(ack.arrived().await);
        let echoed = deliver(&hub, &ada).await;
        ack.release();
        echoed
    });
    let sent = sent.unwrap();

    assert_eq!(echoed, 1);
    let view = ada.room_view(&room.id).await.unwrap();
    assert_eq!(view.history.len(), 1);
    assert_eq!(view.history[0].id, sent.id);
}

#[tokio::test]
async fn own_join_echo_before_join_ack() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    ada.send_message(&room.id, "welcome").await.unwrap();
    let mut ack = hub.hold_reply(&"bo".into(), "JoinRoom");

    let (joined, ()) = tokio::join!(bo.join_room(&room.id), async {
        assert!(ack.arrived().await);
        deliver(&hub, &bo).await;
        assert!(bo.snapshot().is_joined(&room.id));
        ack.release();
    });
    assert_eq!(joined, Ok(CommandOutcome::Applied));

    assert_eq!(bo.phase(&room.id).await, RoomPhase::Active);
    let view = bo.room_view(&room.id).await.unwrap();
    assert_eq!(view.history.len(), 1);
    let members: Vec<&str> = view.participants.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(members, ["ada", "bo"]);
}

#[tokio::test]
async fn room_deleted_before_join_ack_stays_deleted() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let bo = client(&hub, &env, "bo");
    let room = ada.create_room("general").await.unwrap();
    let mut ack = hub.hold_reply(&"bo".into(), "JoinRoom");

    let (joined, ()) = tokio::join!(bo.join_room(&room.id), async {
        assert!(ack.arrived().await);
        assert!(hub.delete_room(&room.id));
        deliver(&hub, &bo).await;
        ack.release();
    });

    assert_eq!(joined, Ok(CommandOutcome::AlreadyResolved));
    assert_eq!(bo.phase(&room.id).await, RoomPhase::Deleted);
    assert!(!bo.snapshot().is_joined(&room.id));
    assert!(bo.snapshot().rooms.is_empty());
}

#[tokio::test]
async fn edit_ack_keeps_hub_stamp_so_later_edits_land() {
    let (hub, env) = world();
    let ada = client(&hub, &env, "ada");
    let room = ada.create_room("general").await.unwrap();
    let message = ada.send_message(&room.id, "v1").await.unwrap();
    let mut ack = hub.hold_reply(&"ada".into(), "EditMessage");

    // The local clock runs well past the hub's stamp before the ack lands.
    let (edited, ()) = tokio::join!(ada.edit_message(&room.id, &message.id, "v2"), async {
        assert!(ack.arrived().await);
        env.advance(Duration::from_secs(60));
        ack.release();
    });
    assert_eq!(edited, Ok(CommandOutcome::Applied));

    let stored = hub.with_hub(|h| h.history(&room.id)).remove(0);
    let held = ada.room_view(&room.id).await.unwrap().history.remove(0);
    assert_eq!(held, stored);

    let later = Message { content: "v3".into(), updated_at: stored.updated_at + 1, ..stored };
    let push = PushEvent::MessageEdited(later).encode().unwrap();
    assert!(ada.handle_push(&push).await);
    let view = ada.room_view(&room.id).await.unwrap();
    assert_eq!(view.history[0].content, "v3");
}
