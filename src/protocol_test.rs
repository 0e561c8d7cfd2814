use frames::Status;

use super::*;

fn event(name: &str, room: Option<&str>, data: Value) -> Frame {
    let mut frame = Frame::event(name, data);
    frame.room_id = room.map(str::to_owned);
    frame
}

// =============================================================================
// INBOUND
// =============================================================================

#[test]
fn receive_message_fills_room_and_sender_from_frame_header() {
    let frame = event(
        EVENT_RECEIVE_MESSAGE,
        Some("r1"),
        json!({"id": "m1", "content": "hey", "created_at": 10}),
    )
    .with_from("u2");

    let parsed = ServerEvent::from_frame(&frame).expect("parse").expect("known event");
    let ServerEvent::MessageReceived(msg) = parsed else {
        panic!("expected message");
    };
    assert_eq!(msg.room_id, "r1");
    assert_eq!(msg.sender_id, "u2");
    assert_eq!(msg.content.as_deref(), Some("hey"));
    assert!(msg.sent);
}

#[test]
fn receive_message_survives_wire_encoding() {
    let frame = event(
        EVENT_RECEIVE_MESSAGE,
        Some("r1"),
        json!({"id": "m1", "sender_id": "u1", "content": "x", "created_at": 1_700_000_000_000_i64}),
    );
    let decoded = frames::decode_frame(&frames::encode_frame(&frame)).expect("decode");
    let parsed = ServerEvent::from_frame(&decoded).expect("parse").expect("known event");
    let ServerEvent::MessageReceived(msg) = parsed else {
        panic!("expected message");
    };
    assert_eq!(msg.created_at, 1_700_000_000_000);
}

#[test]
fn edited_accepts_id_alias_and_payload_room() {
    let frame = event(EVENT_MESSAGE_EDITED, None, json!({"id": "m1", "room_id": "r1", "content": "new"}));
    assert_eq!(
        ServerEvent::from_frame(&frame).expect("parse"),
        Some(ServerEvent::MessageEdited {
            room_id: "r1".into(),
            message_id: "m1".into(),
            content: "new".into(),
        })
    );
}

#[test]
fn edited_without_content_is_a_parse_error() {
    let frame = event(EVENT_MESSAGE_EDITED, Some("r1"), json!({"message_id": "m1"}));
    assert!(matches!(ServerEvent::from_frame(&frame), Err(SyncError::Parse(_))));
}

#[test]
fn deleted_without_any_room_is_a_parse_error() {
    let frame = event(EVENT_MESSAGE_DELETED, None, json!({"message_id": "m1"}));
    let err = ServerEvent::from_frame(&frame).expect_err("missing room");
    assert!(matches!(err, SyncError::Parse(_)));
}

#[test]
fn known_event_with_malformed_payload_is_a_parse_error() {
    let frame = event(EVENT_RECEIVE_MESSAGE, Some("r1"), json!({"content": 5}));
    assert!(matches!(ServerEvent::from_frame(&frame), Err(SyncError::Parse(_))));
}

#[test]
fn unknown_event_is_ignored() {
    let frame = event("spotify-now-playing", Some("r1"), json!({}));
    assert_eq!(ServerEvent::from_frame(&frame).expect("parse"), None);
}

#[test]
fn typing_defaults_to_started_and_uses_sender() {
    let frame = event(EVENT_USER_TYPING, Some("r1"), json!({})).with_from("u2");
    assert_eq!(
        ServerEvent::from_frame(&frame).expect("parse"),
        Some(ServerEvent::Typing { room_id: "r1".into(), user_id: "u2".into(), typing: true })
    );

    let stop = event(EVENT_USER_TYPING, Some("r1"), json!({"user_id": "u2", "is_typing": false}));
    assert_eq!(
        ServerEvent::from_frame(&stop).expect("parse"),
        Some(ServerEvent::Typing { room_id: "r1".into(), user_id: "u2".into(), typing: false })
    );
}

#[test]
fn presence_events_are_not_room_scoped() {
    let frame = event(EVENT_PARTNER_OFFLINE, None, json!({"user_id": "u2"}));
    let parsed = ServerEvent::from_frame(&frame).expect("parse").expect("known");
    assert_eq!(parsed, ServerEvent::PartnerOffline { user_id: "u2".into() });
    assert_eq!(parsed.room_id(), None);
}

#[test]
fn connected_accepts_client_id_alias() {
    let frame = event(EVENT_CONNECTED, None, json!({"client_id": "c-9"}));
    assert_eq!(
        ServerEvent::from_frame(&frame).expect("parse"),
        Some(ServerEvent::Connected { connection_id: "c-9".into() })
    );
}

#[test]
fn error_status_frame_becomes_rejection_of_that_event() {
    let request = ClientCommand::DeleteMessage { room_id: "r1".into(), message_id: "m1".into() }.to_frame("u1");
    let frame = request.reject("not allowed");
    let parsed = ServerEvent::from_frame(&frame).expect("parse").expect("known");
    assert_eq!(
        parsed,
        ServerEvent::Rejected {
            event: CMD_DELETE_MESSAGE.into(),
            message: "not allowed".into(),
            code: None,
            parent_id: Some(request.id.clone()),
        }
    );
    assert!(matches!(parsed.as_error(), Some(SyncError::RemoteRejection { .. })));
}

#[test]
fn named_error_event_reads_event_and_code_from_payload() {
    let frame = event(EVENT_ERROR, None, json!({"event": "send-message", "message": "too long", "code": "E_LEN"}));
    let parsed = ServerEvent::from_frame(&frame).expect("parse").expect("known");
    let ServerEvent::Rejected { event, message, code, .. } = parsed else {
        panic!("expected rejection");
    };
    assert_eq!(event, "send-message");
    assert_eq!(message, "too long");
    assert_eq!(code.as_deref(), Some("E_LEN"));
}

// =============================================================================
// OUTBOUND
// =============================================================================

#[test]
fn join_command_builds_room_scoped_request() {
    let frame = ClientCommand::JoinRoom { room_id: "r1".into() }.to_frame("u1");
    assert_eq!(frame.event, CMD_JOIN_CHAT);
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.room_id.as_deref(), Some("r1"));
    assert_eq!(frame.from.as_deref(), Some("u1"));
    assert_eq!(frame.data["room_id"], "r1");
}

#[test]
fn typing_commands_carry_user_id() {
    let frame = ClientCommand::TypingStop { room_id: "r1".into() }.to_frame("u1");
    assert_eq!(frame.event, CMD_TYPING_STOP);
    assert_eq!(frame.data["user_id"], "u1");
}

#[test]
fn send_command_payload_parses_back_as_message() {
    let msg = Message {
        id: "m1".into(),
        room_id: "r1".into(),
        sender_id: "u1".into(),
        content: Some("hi".into()),
        media: Vec::new(),
        created_at: 3,
        edited: false,
        read: false,
        sent: false,
        reaction: None,
    };
    let frame = ClientCommand::SendMessage(msg.clone()).to_frame("u1");
    assert_eq!(frame.event, CMD_SEND_MESSAGE);
    let echoed: Message = serde_json::from_value(frame.data).expect("message payload");
    assert_eq!(echoed, msg);
}

#[test]
fn react_with_none_clears_reaction() {
    let frame = ClientCommand::React { room_id: "r1".into(), message_id: "m1".into(), reaction: None }.to_frame("u1");
    assert_eq!(frame.event, CMD_REACT_MESSAGE);
    assert!(frame.data["reaction"].is_null());
}
