use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: Some("parent-1".to_owned()),
        ts: 42,
        room_id: Some("room-1".to_owned()),
        from: Some("user-1".to_owned()),
        event: "receive-message".to_owned(),
        status: Status::Event,
        data: serde_json::json!({
            "id": "m-1",
            "content": "hi there",
            "created_at": 1_700_000_000_123_i64,
            "edited": false,
            "media": ["https://cdn.example.com/a.jpg"],
            "reaction": null
        }),
    }
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Event.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
}

#[test]
fn only_error_status_reports_failure() {
    assert!(Status::Error.is_error());
    assert!(!Status::Event.is_error());
    assert!(!Status::Request.is_error());
}

#[test]
fn encoded_message_event_decodes_to_same_frame() {
    let frame = sample_frame();
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_status() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        event: "join-chat".to_owned(),
        status: 77,
        data: Some(json_to_proto_value(&serde_json::json!({}))),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("status should fail");
    assert!(matches!(err, CodecError::InvalidStatus(77)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        event: "connected".to_owned(),
        status: Status::Event.as_i32(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        event: "user-typing".to_owned(),
        status: Status::Event.as_i32(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
        }),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn integral_numbers_decode_as_json_integers() {
    let frame = Frame::event("receive-message", serde_json::json!({"created_at": 1_700_000_000_000_i64}));
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    let created_at = decoded.data.get("created_at").and_then(Value::as_i64);
    assert_eq!(created_at, Some(1_700_000_000_000));
}

#[test]
fn fractional_numbers_stay_floats() {
    let frame = Frame::event("receive-message", serde_json::json!({"score": 1.5}));
    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("score"), Some(&serde_json::json!(1.5)));
}

#[test]
fn request_constructor_stamps_id_and_time() {
    let frame = Frame::request("join-chat", serde_json::json!({}))
        .with_room_id("r1")
        .with_from("u1");
    assert_eq!(frame.status, Status::Request);
    assert_eq!(frame.room_id.as_deref(), Some("r1"));
    assert_eq!(frame.from.as_deref(), Some("u1"));
    assert!(!frame.id.is_empty());
    assert!(frame.ts > 0);
}

#[test]
fn reject_answers_original_request() {
    let req = Frame::request("edit-message", serde_json::json!({"message_id": "m1"})).with_room_id("r1");
    let err = req.reject("not your message");
    assert_eq!(err.status, Status::Error);
    assert_eq!(err.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(err.room_id.as_deref(), Some("r1"));
    assert_eq!(err.event, "edit-message");
    assert_eq!(err.data.get("message").and_then(Value::as_str), Some("not your message"));
}

#[test]
fn status_serializes_as_lowercase_json() {
    assert_eq!(serde_json::to_string(&Status::Event).expect("serialize"), "\"event\"");
    assert_eq!(serde_json::from_str::<Status>("\"error\"").expect("deserialize"), Status::Error);
    assert!(serde_json::from_str::<Status>("\"Error\"").is_err());
}
