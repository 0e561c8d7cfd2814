use super::*;

#[test]
fn validation_errors_are_not_retryable() {
    let err = SyncError::from(ValidationError::MissingRoomId);
    assert_eq!(err.error_code(), "E_MISSING_ROOM_ID");
    assert!(!err.retryable());
}

#[test]
fn transport_failures_are_retryable() {
    assert!(SyncError::from(ConnectivityError::Closed).retryable());
    assert!(SyncError::from(ConnectivityError::Timeout).retryable());
    assert!(!SyncError::not_connected().retryable());
}

#[test]
fn remote_rejection_display_names_event() {
    let err = SyncError::RemoteRejection {
        event: "edit-message".to_owned(),
        message: "forbidden".to_owned(),
        code: Some("E_FORBIDDEN".to_owned()),
    };
    assert_eq!(err.to_string(), "server rejected edit-message: forbidden");
    assert_eq!(err.error_code(), "E_REMOTE_REJECTION");
}

#[test]
fn connectivity_display_is_transparent() {
    let err = SyncError::not_connected();
    assert_eq!(err.to_string(), "not connected");
    assert!(err.is_connectivity());
}

#[test]
fn codec_errors_become_parse_errors() {
    let codec = frames::decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    let err = SyncError::from(codec);
    assert!(matches!(err, SyncError::Parse(_)));
    assert_eq!(err.error_code(), "E_PARSE");
}

#[test]
fn json_errors_become_parse_errors() {
    let json = serde_json::from_str::<serde_json::Value>("{").expect_err("json should fail");
    assert!(matches!(SyncError::from(json), SyncError::Parse(_)));
}
