use super::*;
use crate::connection::test_helpers::{connected_manager, mock_manager};
use crate::protocol::{CMD_DELETE_MESSAGE, CMD_EDIT_MESSAGE, CMD_REACT_MESSAGE, CMD_SEND_MESSAGE, CMD_TYPING_START};

const ECHO: Duration = Duration::from_secs(10);

fn invalid(e: ValidationError) -> SyncError {
    SyncError::Validation(e)
}

fn dispatcher(manager: ConnectionManager) -> CommandDispatcher {
    CommandDispatcher::new(manager, "r1", "u1", ECHO)
}

// =============================================================================
// VALIDATION
// =============================================================================

#[tokio::test]
async fn validation_runs_before_any_network_call() {
    let (_connector, manager, mut remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager.clone());
    let mut stream = MessageStream::new("r1", 10);
    let now = Instant::now();

    let empty = d.send(&mut stream, Some("   ".into()), Vec::new(), now);
    assert_eq!(empty, Err(invalid(ValidationError::EmptyMessage)));
    assert_eq!(d.edit("", "x", now), Err(invalid(ValidationError::MissingMessageId)));
    assert_eq!(d.edit("m1", " ", now), Err(invalid(ValidationError::EmptyEdit)));
    assert_eq!(d.delete(" ", now), Err(invalid(ValidationError::MissingMessageId)));

    let mut no_room = CommandDispatcher::new(manager, "", "u1", ECHO);
    assert_eq!(no_room.delete("m1", now), Err(invalid(ValidationError::MissingRoomId)));

    assert!(remote.drain().is_empty());
    assert!(stream.is_empty());
}

#[tokio::test]
async fn local_media_is_never_emitted() {
    let (_connector, manager, mut remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager);
    let mut stream = MessageStream::new("r1", 10);

    let err = d
        .send(&mut stream, None, vec!["file:///sdcard/a.jpg".into()], Instant::now())
        .expect_err("local media");
    assert!(matches!(err, SyncError::Validation(ValidationError::LocalMedia(_))));
    assert!(remote.drain().is_empty());
}

// =============================================================================
// SEND
// =============================================================================

#[tokio::test]
async fn send_is_optimistic_and_tracked_until_echo() {
    let (_connector, manager, mut remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager);
    let mut stream = MessageStream::new("r1", 10);

    let msg = d.send(&mut stream, Some("hi".into()), Vec::new(), Instant::now()).expect("send");

    let local = stream.get(&msg.id).expect("optimistic copy");
    assert!(!local.sent);
    assert_eq!(local.sender_id, "u1");
    assert!(d.is_pending(CommandKind::Send, &msg.id));

    let frames = remote.drain();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].event, CMD_SEND_MESSAGE);
    assert_eq!(frames[0].data["id"], msg.id.as_str());

    let mut echoed = msg.clone();
    echoed.sent = true;
    let echo = ServerEvent::MessageReceived(echoed);
    assert!(d.acknowledge(&echo));
    stream.apply_event(&echo);
    assert!(stream.get(&msg.id).expect("echo").sent);
    assert_eq!(d.pending_count(), 0);
}

#[tokio::test]
async fn media_only_message_is_allowed() {
    let (_connector, manager, _remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager);
    let mut stream = MessageStream::new("r1", 10);
    let msg = d
        .send(&mut stream, None, vec!["https://cdn.example.com/a.jpg".into()], Instant::now())
        .expect("send");
    assert_eq!(msg.content, None);
    assert_eq!(msg.media.len(), 1);
}

#[tokio::test]
async fn disconnected_send_is_dropped_without_optimistic_copy() {
    let (_connector, manager) = mock_manager();
    let mut d = dispatcher(manager);
    let mut stream = MessageStream::new("r1", 10);

    let err = d.send(&mut stream, Some("hi".into()), Vec::new(), Instant::now()).expect_err("offline");
    assert_eq!(err, SyncError::not_connected());
    assert!(stream.is_empty());
    assert_eq!(d.pending_count(), 0);
}

// =============================================================================
// EDIT / DELETE ROUND TRIP
// =============================================================================

#[tokio::test]
async fn edit_round_trips_through_the_server() {
    let (_connector, manager, mut remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager);

    d.edit("m1", "fixed", Instant::now()).expect("edit");
    let frames = remote.drain();
    assert_eq!(frames[0].event, CMD_EDIT_MESSAGE);
    assert_eq!(frames[0].data["content"], "fixed");
    assert!(d.is_pending(CommandKind::Edit, "m1"));

    let other_room = ServerEvent::MessageEdited { room_id: "r2".into(), message_id: "m1".into(), content: "fixed".into() };
    assert!(!d.acknowledge(&other_room));

    let echo = ServerEvent::MessageEdited { room_id: "r1".into(), message_id: "m1".into(), content: "fixed".into() };
    assert!(d.acknowledge(&echo));
    assert!(!d.is_pending(CommandKind::Edit, "m1"));
}

#[tokio::test]
async fn delete_echo_clears_every_pending_command_for_the_message() {
    let (_connector, manager, mut remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager);
    let now = Instant::now();

    d.edit("m1", "x", now).expect("edit");
    d.delete("m1", now).expect("delete");
    assert_eq!(remote.drain().last().map(|f| f.event.clone()).as_deref(), Some(CMD_DELETE_MESSAGE));
    assert_eq!(d.pending_count(), 2);

    assert!(d.acknowledge(&ServerEvent::MessageDeleted { room_id: "r1".into(), message_id: "m1".into() }));
    assert_eq!(d.pending_count(), 0);
}

#[tokio::test]
async fn missing_echo_expires_after_timeout() {
    let (_connector, manager, _remote) = connected_manager("u1").await;
    let mut d = dispatcher(manager);
    let t0 = Instant::now();

    d.delete("m1", t0).expect("delete");
    d.edit("m2", "y", t0 + Duration::from_secs(1)).expect("edit");
    assert_eq!(d.next_deadline(), Some(t0 + ECHO));

    assert!(d.expire(t0 + Duration::from_secs(9)).is_empty());
    let expired = d.expire(t0 + Duration::from_secs(11));
    assert_eq!(
        expired,
        vec![
            PendingCommand { kind: CommandKind::Delete, message_id: "m1".into(), deadline: t0 + ECHO },
            PendingCommand {
                kind: CommandKind::Edit,
                message_id: "m2".into(),
                deadline: t0 + Duration::from_secs(1) + ECHO,
            },
        ]
    );
    assert_eq!(d.pending_count(), 0);
}

// =============================================================================
// FIRE AND FORGET
// =============================================================================

#[tokio::test]
async fn reactions_and_typing_are_not_tracked() {
    let (_connector, manager, mut remote) = connected_manager("u1").await;
    let d = dispatcher(manager);

    d.react("m1", Some("❤️".into())).expect("react");
    d.mark_read("m1").expect("read");
    d.typing(TypingSignal::Start).expect("typing");

    let events: Vec<String> = remote.drain().into_iter().map(|f| f.event).collect();
    assert_eq!(events[0], CMD_REACT_MESSAGE);
    assert_eq!(events[2], CMD_TYPING_START);
    assert_eq!(d.pending_count(), 0);
}
