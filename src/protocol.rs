//! Named realtime events and their mapping onto wire frames.
//!
//! DESIGN
//! ======
//! The transport only knows `frames::Frame`. This module is the single place
//! that turns frames into typed [`ServerEvent`]s and typed [`ClientCommand`]s
//! into frames, so the reducer and dispatcher never touch raw JSON.
//!
//! Unknown inbound event names are ignored (`Ok(None)`); a known event whose
//! payload does not parse is a `SyncError::Parse`.

use frames::Frame;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::SyncError;
use crate::types::{Message, MessageId, RoomId, UserId};

// =============================================================================
// EVENT NAMES
// =============================================================================

pub const EVENT_CONNECTED: &str = "connected";
pub const EVENT_RECEIVE_MESSAGE: &str = "receive-message";
pub const EVENT_MESSAGE_EDITED: &str = "message-edited";
pub const EVENT_MESSAGE_DELETED: &str = "message-deleted";
pub const EVENT_MESSAGE_READ: &str = "message-read";
pub const EVENT_MESSAGE_REACTED: &str = "message-reacted";
pub const EVENT_USER_TYPING: &str = "user-typing";
pub const EVENT_USER_JOINED: &str = "user-joined";
pub const EVENT_USER_LEFT: &str = "user-left";
pub const EVENT_PARTNER_ONLINE: &str = "partner-online";
pub const EVENT_PARTNER_OFFLINE: &str = "partner-offline";
pub const EVENT_ERROR: &str = "error";

pub const CMD_JOIN_CHAT: &str = "join-chat";
pub const CMD_LEAVE_CHAT: &str = "leave-chat";
pub const CMD_SEND_MESSAGE: &str = "send-message";
pub const CMD_EDIT_MESSAGE: &str = "edit-message";
pub const CMD_DELETE_MESSAGE: &str = "delete-message";
pub const CMD_TYPING_START: &str = "typing-start";
pub const CMD_TYPING_STOP: &str = "typing-stop";
pub const CMD_MARK_READ: &str = "mark-read";
pub const CMD_REACT_MESSAGE: &str = "react-message";

// =============================================================================
// INBOUND
// =============================================================================

/// Typed inbound event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerEvent {
    Connected { connection_id: String },
    MessageReceived(Message),
    MessageEdited { room_id: RoomId, message_id: MessageId, content: String },
    MessageDeleted { room_id: RoomId, message_id: MessageId },
    MessageRead { room_id: RoomId, message_id: MessageId },
    MessageReacted { room_id: RoomId, message_id: MessageId, reaction: Option<String> },
    Typing { room_id: RoomId, user_id: UserId, typing: bool },
    UserJoined { room_id: RoomId, user_id: UserId },
    UserLeft { room_id: RoomId, user_id: UserId },
    PartnerOnline { user_id: UserId },
    PartnerOffline { user_id: UserId },
    /// The server rejected a request. `parent_id` names the request frame when known.
    Rejected { event: String, message: String, code: Option<String>, parent_id: Option<String> },
}

#[derive(Deserialize)]
struct ConnectedPayload {
    #[serde(alias = "client_id")]
    connection_id: String,
}

#[derive(Deserialize)]
struct MessageRefPayload {
    #[serde(alias = "id")]
    message_id: MessageId,
    #[serde(default)]
    room_id: Option<RoomId>,
}

#[derive(Deserialize)]
struct EditedPayload {
    #[serde(alias = "id")]
    message_id: MessageId,
    #[serde(default)]
    room_id: Option<RoomId>,
    content: String,
}

#[derive(Deserialize)]
struct ReactedPayload {
    #[serde(alias = "id")]
    message_id: MessageId,
    #[serde(default)]
    room_id: Option<RoomId>,
    #[serde(default)]
    reaction: Option<String>,
}

#[derive(Deserialize)]
struct MemberPayload {
    #[serde(default)]
    user_id: Option<UserId>,
    #[serde(default)]
    room_id: Option<RoomId>,
    #[serde(default = "default_true")]
    is_typing: bool,
}

fn default_true() -> bool {
    true
}

impl ServerEvent {
    /// Parse a frame into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Parse`] when a known event carries a malformed payload.
    pub fn from_frame(frame: &Frame) -> Result<Option<Self>, SyncError> {
        if frame.status.is_error() || frame.event == EVENT_ERROR {
            return Ok(Some(rejection(frame)));
        }

        let event = match frame.event.as_str() {
            EVENT_CONNECTED => {
                let p: ConnectedPayload = payload(frame)?;
                Self::Connected { connection_id: p.connection_id }
            }
            EVENT_RECEIVE_MESSAGE => Self::MessageReceived(parse_message(frame)?),
            EVENT_MESSAGE_EDITED => {
                let p: EditedPayload = payload(frame)?;
                Self::MessageEdited { room_id: room_of(frame, p.room_id)?, message_id: p.message_id, content: p.content }
            }
            EVENT_MESSAGE_DELETED => {
                let p: MessageRefPayload = payload(frame)?;
                Self::MessageDeleted { room_id: room_of(frame, p.room_id)?, message_id: p.message_id }
            }
            EVENT_MESSAGE_READ => {
                let p: MessageRefPayload = payload(frame)?;
                Self::MessageRead { room_id: room_of(frame, p.room_id)?, message_id: p.message_id }
            }
            EVENT_MESSAGE_REACTED => {
                let p: ReactedPayload = payload(frame)?;
                Self::MessageReacted {
                    room_id: room_of(frame, p.room_id)?,
                    message_id: p.message_id,
                    reaction: p.reaction,
                }
            }
            EVENT_USER_TYPING => {
                let p: MemberPayload = payload(frame)?;
                Self::Typing {
                    room_id: room_of(frame, p.room_id)?,
                    user_id: user_of(frame, p.user_id)?,
                    typing: p.is_typing,
                }
            }
            EVENT_USER_JOINED | EVENT_USER_LEFT => {
                let p: MemberPayload = payload(frame)?;
                let room_id = room_of(frame, p.room_id)?;
                let user_id = user_of(frame, p.user_id)?;
                if frame.event == EVENT_USER_JOINED {
                    Self::UserJoined { room_id, user_id }
                } else {
                    Self::UserLeft { room_id, user_id }
                }
            }
            EVENT_PARTNER_ONLINE | EVENT_PARTNER_OFFLINE => {
                let p: MemberPayload = payload(frame)?;
                let user_id = user_of(frame, p.user_id)?;
                if frame.event == EVENT_PARTNER_ONLINE {
                    Self::PartnerOnline { user_id }
                } else {
                    Self::PartnerOffline { user_id }
                }
            }
            other => {
                debug!(event = other, "protocol: ignoring unknown event");
                return Ok(None);
            }
        };
        Ok(Some(event))
    }

    /// Room scope of the event, for room-bound events.
    #[must_use]
    pub fn room_id(&self) -> Option<&str> {
        match self {
            Self::MessageReceived(msg) => Some(&msg.room_id),
            Self::MessageEdited { room_id, .. }
            | Self::MessageDeleted { room_id, .. }
            | Self::MessageRead { room_id, .. }
            | Self::MessageReacted { room_id, .. }
            | Self::Typing { room_id, .. }
            | Self::UserJoined { room_id, .. }
            | Self::UserLeft { room_id, .. } => Some(room_id),
            Self::Connected { .. } | Self::PartnerOnline { .. } | Self::PartnerOffline { .. } | Self::Rejected { .. } => {
                None
            }
        }
    }

    /// Convert a rejection into the error taxonomy.
    #[must_use]
    pub fn as_error(&self) -> Option<SyncError> {
        match self {
            Self::Rejected { event, message, code, .. } => Some(SyncError::RemoteRejection {
                event: event.clone(),
                message: message.clone(),
                code: code.clone(),
            }),
            _ => None,
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(frame: &Frame) -> Result<T, SyncError> {
    serde_json::from_value(frame.data.clone())
        .map_err(|e| SyncError::Parse(format!("{}: {e}", frame.event)))
}

fn room_of(frame: &Frame, from_payload: Option<RoomId>) -> Result<RoomId, SyncError> {
    from_payload
        .or_else(|| frame.room_id.clone())
        .filter(|r| !r.is_empty())
        .ok_or_else(|| SyncError::Parse(format!("{}: missing room_id", frame.event)))
}

fn user_of(frame: &Frame, from_payload: Option<UserId>) -> Result<UserId, SyncError> {
    from_payload
        .or_else(|| frame.from.clone())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| SyncError::Parse(format!("{}: missing user_id", frame.event)))
}

/// Messages may omit `room_id`/`sender_id` when the frame header carries them.
fn parse_message(frame: &Frame) -> Result<Message, SyncError> {
    let mut data = frame.data.clone();
    if let Some(obj) = data.as_object_mut() {
        if !obj.contains_key("room_id") {
            if let Some(room_id) = &frame.room_id {
                obj.insert("room_id".to_owned(), Value::String(room_id.clone()));
            }
        }
        if !obj.contains_key("sender_id") {
            if let Some(from) = &frame.from {
                obj.insert("sender_id".to_owned(), Value::String(from.clone()));
            }
        }
    }
    serde_json::from_value(data).map_err(|e| SyncError::Parse(format!("{}: {e}", frame.event)))
}

fn rejection(frame: &Frame) -> ServerEvent {
    let field = |key: &str| frame.data.get(key).and_then(Value::as_str).map(str::to_owned);
    let event = if frame.event == EVENT_ERROR {
        field("event").unwrap_or_else(|| EVENT_ERROR.to_owned())
    } else {
        frame.event.clone()
    };
    ServerEvent::Rejected {
        event,
        message: field("message").unwrap_or_else(|| "request failed".to_owned()),
        code: field("code"),
        parent_id: frame.parent_id.clone(),
    }
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Typed outbound command. Every command is fire-and-forget.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientCommand {
    JoinRoom { room_id: RoomId },
    LeaveRoom { room_id: RoomId },
    SendMessage(Message),
    EditMessage { room_id: RoomId, message_id: MessageId, content: String },
    DeleteMessage { room_id: RoomId, message_id: MessageId },
    TypingStart { room_id: RoomId },
    TypingStop { room_id: RoomId },
    MarkRead { room_id: RoomId, message_id: MessageId },
    React { room_id: RoomId, message_id: MessageId, reaction: Option<String> },
}

impl ClientCommand {
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => CMD_JOIN_CHAT,
            Self::LeaveRoom { .. } => CMD_LEAVE_CHAT,
            Self::SendMessage(_) => CMD_SEND_MESSAGE,
            Self::EditMessage { .. } => CMD_EDIT_MESSAGE,
            Self::DeleteMessage { .. } => CMD_DELETE_MESSAGE,
            Self::TypingStart { .. } => CMD_TYPING_START,
            Self::TypingStop { .. } => CMD_TYPING_STOP,
            Self::MarkRead { .. } => CMD_MARK_READ,
            Self::React { .. } => CMD_REACT_MESSAGE,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        match self {
            Self::SendMessage(msg) => &msg.room_id,
            Self::JoinRoom { room_id }
            | Self::LeaveRoom { room_id }
            | Self::EditMessage { room_id, .. }
            | Self::DeleteMessage { room_id, .. }
            | Self::TypingStart { room_id }
            | Self::TypingStop { room_id }
            | Self::MarkRead { room_id, .. }
            | Self::React { room_id, .. } => room_id,
        }
    }

    /// Build the request frame, stamping `from` with the session user.
    #[must_use]
    pub fn to_frame(&self, from: &str) -> Frame {
        let data = match self {
            Self::JoinRoom { room_id } | Self::LeaveRoom { room_id } => json!({ "room_id": room_id }),
            Self::SendMessage(msg) => serde_json::to_value(msg).unwrap_or_else(|_| Value::Object(Map::new())),
            Self::EditMessage { room_id, message_id, content } => {
                json!({ "room_id": room_id, "message_id": message_id, "content": content })
            }
            Self::DeleteMessage { room_id, message_id } | Self::MarkRead { room_id, message_id } => {
                json!({ "room_id": room_id, "message_id": message_id })
            }
            Self::TypingStart { room_id } | Self::TypingStop { room_id } => {
                json!({ "room_id": room_id, "user_id": from })
            }
            Self::React { room_id, message_id, reaction } => {
                json!({ "room_id": room_id, "message_id": message_id, "reaction": reaction })
            }
        };

        Frame::request(self.event_name(), data)
            .with_room_id(self.room_id())
            .with_from(from)
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
