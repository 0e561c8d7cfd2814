//! Chat domain types shared by the reducer, dispatcher, and wire mapping.
//!
//! SYSTEM CONTEXT
//! ==============
//! `Message` mirrors the rows served by the REST history API and the payload
//! of `receive-message` events, so one shape flows through both channels.

use serde::{Deserialize, Serialize};

pub type RoomId = String;
pub type UserId = String;
pub type MessageId = String;

/// A unit of conversation content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Globally unique, stable across edit and delete.
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Durable media URLs, in display order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<String>,
    /// Milliseconds since the Unix epoch. Never bumped by edits.
    pub created_at: i64,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub read: bool,
    /// False only for optimistic local copies the server has not echoed yet.
    #[serde(default = "default_sent")]
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reaction: Option<String>,
}

fn default_sent() -> bool {
    true
}

impl Message {
    /// Whether the message carries anything to display.
    #[must_use]
    pub fn has_body(&self) -> bool {
        self.content.as_deref().is_some_and(|c| !c.trim().is_empty()) || !self.media.is_empty()
    }
}

/// Transport link lifecycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Identity of the live session returned by `connect`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub user_id: UserId,
    /// Assigned by the server in its `connected` frame.
    pub connection_id: String,
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
