//! Wire frame model and protobuf codec for the realtime chat channel.
//!
//! Every event exchanged with the chat server (message fan-out, typing,
//! presence, room membership) travels as one [`Frame`]. Payloads stay
//! flexible (`serde_json::Value`) so the protocol layer can evolve event
//! shapes without touching the codec, while the wire encoding is compact
//! protobuf.

use std::time::{SystemTime, UNIX_EPOCH};

use prost::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest integer that survives a round trip through an `f64` exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Error returned by [`decode_frame`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The raw bytes could not be decoded as a protobuf `WireFrame`.
    #[error("failed to decode protobuf frame: {0}")]
    Decode(#[from] prost::DecodeError),
    /// The `status` integer on the wire does not map to a known [`Status`] variant.
    #[error("invalid frame status: {0}")]
    InvalidStatus(i32),
}

/// Role of a frame on the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Client-originated command (`send-message`, `join-chat`, ...).
    Request,
    /// Server broadcast or server-originated notification.
    Event,
    /// Server rejection of a previously sent request.
    Error,
}

impl Status {
    /// Convert status into wire enum integer value.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Request => WireFrameStatus::Request as i32,
            Self::Event => WireFrameStatus::Event as i32,
            Self::Error => WireFrameStatus::Error as i32,
        }
    }

    /// Whether the frame reports a failure.
    #[must_use]
    pub fn is_error(self) -> bool {
        matches!(self, Self::Error)
    }

    fn from_i32(value: i32) -> Result<Self, CodecError> {
        match WireFrameStatus::try_from(value) {
            Ok(WireFrameStatus::Request) => Ok(Self::Request),
            Ok(WireFrameStatus::Event) => Ok(Self::Event),
            Ok(WireFrameStatus::Error) => Ok(Self::Error),
            Err(_) => Err(CodecError::InvalidStatus(value)),
        }
    }
}

/// A single message on the realtime wire protocol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame (UUID string).
    pub id: String,
    /// ID of the request frame this one answers, if any.
    pub parent_id: Option<String>,
    /// Milliseconds since the Unix epoch when the frame was created.
    pub ts: i64,
    /// Conversation scope, for room-bound events.
    pub room_id: Option<String>,
    /// Sender identifier (user ID, or `None` for server notifications).
    pub from: Option<String>,
    /// Event name, e.g. `"send-message"` or `"user-typing"`.
    pub event: String,
    /// Role of the frame.
    pub status: Status,
    /// Arbitrary JSON payload.
    pub data: Value,
}

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

impl Frame {
    fn new(event: impl Into<String>, status: Status, data: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            parent_id: None,
            ts: now_ms(),
            room_id: None,
            from: None,
            event: event.into(),
            status,
            data,
        }
    }

    /// Create a client request frame.
    pub fn request(event: impl Into<String>, data: Value) -> Self {
        Self::new(event, Status::Request, data)
    }

    /// Create a server event frame.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self::new(event, Status::Event, data)
    }

    /// Create an error frame answering `self`.
    #[must_use]
    pub fn reject(&self, message: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert("message".to_owned(), Value::String(message.into()));
        let mut frame = Self::new(self.event.clone(), Status::Error, Value::Object(data));
        frame.parent_id = Some(self.id.clone());
        frame.room_id.clone_from(&self.room_id);
        frame
    }

    #[must_use]
    pub fn with_room_id(mut self, room_id: impl Into<String>) -> Self {
        self.room_id = Some(room_id.into());
        self
    }

    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    #[must_use]
    pub fn with_parent_id(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Encode a frame into protobuf bytes.
#[must_use]
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let wire = frame_to_wire(frame);

    let mut out = Vec::with_capacity(wire.encoded_len());
    // Encoding into a growable Vec cannot hit `BufferTooSmall`.
    wire.encode(&mut out).unwrap_or_default();
    out
}

/// Decode protobuf bytes into a frame.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed bytes and
/// [`CodecError::InvalidStatus`] for out-of-range status values.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, CodecError> {
    let wire = WireFrame::decode(bytes)?;
    wire_to_frame(wire)
}

fn frame_to_wire(frame: &Frame) -> WireFrame {
    WireFrame {
        id: frame.id.clone(),
        parent_id: frame.parent_id.clone(),
        ts: frame.ts,
        room_id: frame.room_id.clone(),
        from: frame.from.clone(),
        event: frame.event.clone(),
        status: frame.status.as_i32(),
        data: Some(json_to_proto_value(&frame.data)),
    }
}

fn wire_to_frame(wire: WireFrame) -> Result<Frame, CodecError> {
    Ok(Frame {
        id: wire.id,
        parent_id: wire.parent_id,
        ts: wire.ts,
        room_id: wire.room_id,
        from: wire.from,
        event: wire.event,
        status: Status::from_i32(wire.status)?,
        data: wire
            .data
            .map_or(Value::Object(Map::new()), |v| proto_to_json_value(&v)),
    })
}

fn json_to_proto_value(value: &Value) -> prost_types::Value {
    let kind = match value {
        Value::Null => {
            prost_types::value::Kind::NullValue(prost_types::NullValue::NullValue as i32)
        }
        Value::Bool(v) => prost_types::value::Kind::BoolValue(*v),
        Value::Number(v) => prost_types::value::Kind::NumberValue(v.as_f64().unwrap_or(0.0)),
        Value::String(v) => prost_types::value::Kind::StringValue(v.clone()),
        Value::Array(v) => prost_types::value::Kind::ListValue(prost_types::ListValue {
            values: v.iter().map(json_to_proto_value).collect(),
        }),
        Value::Object(v) => prost_types::value::Kind::StructValue(prost_types::Struct {
            fields: v
                .iter()
                .map(|(k, v)| (k.clone(), json_to_proto_value(v)))
                .collect(),
        }),
    };

    prost_types::Value { kind: Some(kind) }
}

/// Protobuf only carries doubles; integral values inside the safe range come
/// back as JSON integers so timestamps and counters deserialize as `i64`.
#[allow(clippy::cast_possible_truncation)]
fn number_to_json(v: f64) -> Value {
    if v.fract() == 0.0 && v.abs() <= MAX_SAFE_INTEGER {
        return Value::Number(serde_json::Number::from(v as i64));
    }
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn proto_to_json_value(value: &prost_types::Value) -> Value {
    let Some(kind) = &value.kind else {
        return Value::Null;
    };

    match kind {
        prost_types::value::Kind::NullValue(_) => Value::Null,
        prost_types::value::Kind::NumberValue(v) => number_to_json(*v),
        prost_types::value::Kind::StringValue(v) => Value::String(v.clone()),
        prost_types::value::Kind::BoolValue(v) => Value::Bool(*v),
        prost_types::value::Kind::StructValue(v) => Value::Object(
            v.fields
                .iter()
                .map(|(k, v)| (k.clone(), proto_to_json_value(v)))
                .collect(),
        ),
        prost_types::value::Kind::ListValue(v) => {
            Value::Array(v.values.iter().map(proto_to_json_value).collect())
        }
    }
}

#[derive(Clone, PartialEq, Message)]
struct WireFrame {
    #[prost(string, tag = "1")]
    id: String,
    #[prost(string, optional, tag = "2")]
    parent_id: Option<String>,
    #[prost(int64, tag = "3")]
    ts: i64,
    #[prost(string, optional, tag = "4")]
    room_id: Option<String>,
    #[prost(string, optional, tag = "5")]
    from: Option<String>,
    #[prost(string, tag = "6")]
    event: String,
    #[prost(enumeration = "WireFrameStatus", tag = "7")]
    status: i32,
    #[prost(message, optional, tag = "8")]
    data: Option<prost_types::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, prost::Enumeration)]
#[repr(i32)]
enum WireFrameStatus {
    Request = 0,
    Event = 1,
    Error = 2,
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
