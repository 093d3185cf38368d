//! Property-based tests for the stores.
//!
//! Each property is checked against arbitrary operation sequences rather than
//! hand-picked scenarios.

use std::time::Duration;

use proptest::prelude::*;
use roomsync_core::{
    ConversationStore, MembershipTracker, Message, MessageId, Participant, ParticipantRegistry,
    RoomId, TypingTracker, UserId,
};

fn message(id: u8, content: &str) -> Message {
    Message {
        id: format!("m{id}").into(),
        room_id: "r1".into(),
        author_id: "u1".into(),
        author_name: "Ada".into(),
        author_avatar: None,
        content: content.into(),
        created_at: u64::from(id),
        updated_at: u64::from(id),
        is_system: false,
    }
}

#[derive(Debug, Clone)]
enum MembershipOp {
    Join(u8),
    Leave(u8),
    SetActive(Option<u8>),
}

fn membership_op() -> impl Strategy<Value = MembershipOp> {
    prop_oneof![
        3 => (0u8..6).prop_map(MembershipOp::Join),
        2 => (0u8..6).prop_map(MembershipOp::Leave),
        2 => proptest::option::of(0u8..6).prop_map(MembershipOp::SetActive),
    ]
}

fn room(id: u8) -> RoomId {
    RoomId::new(format!("r{id}"))
}

proptest! {
    #[test]
    fn prop_duplicate_appends_match_single_append(ids in prop::collection::vec(0u8..20, 0..40)) {
        let room_id = RoomId::from("r1");
        let mut once = ConversationStore::new();
        let mut twice = ConversationStore::new();

        for id in &ids {
            once.append(&room_id, message(*id, "x"));
            twice.append(&room_id, message(*id, "x"));
            twice.append(&room_id, message(*id, "x"));
        }

        prop_assert_eq!(once.history(&room_id), twice.history(&room_id));
    }

    #[test]
    fn prop_absent_targets_leave_history_unchanged(
        ids in prop::collection::vec(0u8..10, 1..20),
        ghost in 100u8..200,
    ) {
        let room_id = RoomId::from("r1");
        let mut store = ConversationStore::new();
        for id in &ids {
            store.append(&room_id, message(*id, "x"));
        }
        let before = store.history(&room_id).to_vec();

        let ghost_id: MessageId = format!("m{ghost}").into();
        store.edit_in_place(&room_id, &ghost_id, "edited", 9_999);
        store.remove(&room_id, &ghost_id);

        prop_assert_eq!(store.history(&room_id), before.as_slice());
    }

    #[test]
    fn prop_participant_adds_are_idempotent(users in prop::collection::vec(0u8..8, 0..30)) {
        let room_id = RoomId::from("r1");
        let mut registry = ParticipantRegistry::new();
        for user in &users {
            registry.add(&room_id, Participant::new(format!("u{user}"), "name"));
        }

        let distinct: std::collections::BTreeSet<_> = users.iter().collect();
        prop_assert_eq!(registry.count(&room_id), distinct.len());
    }

    #[test]
    fn prop_active_room_always_joined(ops in prop::collection::vec(membership_op(), 0..60)) {
        let mut tracker = MembershipTracker::new();

        for op in ops {
            match op {
                MembershipOp::Join(id) => {
                    tracker.join(&room(id));
                },
                MembershipOp::Leave(id) => {
                    tracker.leave(&room(id));
                },
                MembershipOp::SetActive(target) => {
                    let target = target.map(room);
                    let joined = target.as_ref().is_none_or(|id| tracker.is_joined(id));
                    let result = tracker.set_active(target.as_ref());
                    prop_assert_eq!(result.is_ok(), joined);
                },
            }

            if let Some(active) = tracker.active_room_id() {
                prop_assert!(tracker.is_joined(active));
            }
        }
    }

    #[test]
    fn prop_typing_never_live_past_expiry(
        ttl_ms in 1u64..5_000,
        refreshes in prop::collection::vec(0u64..3_000, 0..5),
        probe_after in 1u64..10_000,
    ) {
        let room_id = RoomId::from("r1");
        let user = UserId::from("u1");
        let ttl = Duration::from_millis(ttl_ms);
        let mut tracker = TypingTracker::new();

        let mut now = Duration::ZERO;
        tracker.mark_typing(&room_id, &user, ttl, now);
        for step in refreshes {
            now += Duration::from_millis(step);
            tracker.mark_typing(&room_id, &user, ttl, now);
        }

        let probe = now + ttl + Duration::from_millis(probe_after - 1);
        prop_assert!(!tracker.active_typists(&room_id, probe).contains(&user));
    }
}
