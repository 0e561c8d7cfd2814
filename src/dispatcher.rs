//! Command dispatcher: validate user actions locally, emit them, and track
//! which ones still wait for the server's rebroadcast.
//!
//! DESIGN
//! ======
//! - Send is optimistic: the message enters the stream with `sent = false`
//!   right after a successful emit; the server echo (same id) replaces it.
//! - Edit and delete round-trip: nothing changes locally until the
//!   `message-edited` / `message-deleted` broadcast arrives.
//! - Every send, edit, and delete gets an echo deadline. `acknowledge`
//!   clears it when the broadcast shows up; `expire` reports the ones that
//!   never did so the owner can resync.
//! - Reactions, read receipts, and typing signals are fire-and-forget.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::connection::ConnectionManager;
use crate::error::{SyncError, ValidationError};
use crate::media::ensure_durable;
use crate::protocol::{ClientCommand, ServerEvent};
use crate::stream::MessageStream;
use crate::types::{Message, MessageId, RoomId, UserId};
use crate::typing::TypingSignal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Send,
    Edit,
    Delete,
}

/// A command whose server echo has not arrived yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingCommand {
    pub kind: CommandKind,
    pub message_id: MessageId,
    pub deadline: Instant,
}

pub struct CommandDispatcher {
    manager: ConnectionManager,
    room_id: RoomId,
    sender_id: UserId,
    echo_timeout: Duration,
    pending: HashMap<(CommandKind, MessageId), Instant>,
}

impl CommandDispatcher {
    #[must_use]
    pub fn new(manager: ConnectionManager, room_id: impl Into<RoomId>, sender_id: impl Into<UserId>, echo_timeout: Duration) -> Self {
        Self {
            manager,
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            echo_timeout,
            pending: HashMap::new(),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    fn check_scope(&self) -> Result<(), SyncError> {
        if self.room_id.trim().is_empty() {
            return Err(ValidationError::MissingRoomId.into());
        }
        if self.sender_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId.into());
        }
        Ok(())
    }

    fn check_message_id(message_id: &str) -> Result<(), SyncError> {
        if message_id.trim().is_empty() {
            return Err(ValidationError::MissingMessageId.into());
        }
        Ok(())
    }

    fn emit(&self, command: &ClientCommand) -> Result<(), SyncError> {
        self.manager.emit(command).inspect_err(|e| {
            warn!(event = command.event_name(), room_id = %self.room_id, error = %e, "dispatcher: command dropped");
        })
    }

    fn track(&mut self, kind: CommandKind, message_id: &str, now: Instant) {
        self.pending.insert((kind, message_id.to_owned()), now + self.echo_timeout);
    }

    // =========================================================================
    // MESSAGE COMMANDS
    // =========================================================================

    /// Send text and/or durable media URLs, inserting an optimistic copy.
    ///
    /// # Errors
    ///
    /// Validation errors for a missing scope, an empty message, or local
    /// media; `Connectivity(NotConnected)` when the session is down.
    pub fn send(
        &mut self,
        stream: &mut MessageStream,
        content: Option<String>,
        media: Vec<String>,
        now: Instant,
    ) -> Result<Message, SyncError> {
        self.check_scope()?;
        let content = content.filter(|c| !c.trim().is_empty());
        if content.is_none() && media.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        ensure_durable(&media)?;

        let message = Message {
            id: Uuid::new_v4().to_string(),
            room_id: self.room_id.clone(),
            sender_id: self.sender_id.clone(),
            content,
            media,
            created_at: frames::now_ms(),
            edited: false,
            read: false,
            sent: false,
            reaction: None,
        };

        self.emit(&ClientCommand::SendMessage(message.clone()))?;
        stream.apply_local(message.clone());
        self.track(CommandKind::Send, &message.id, now);
        debug!(message_id = %message.id, room_id = %self.room_id, "dispatcher: sent");
        Ok(message)
    }

    /// Request an edit. The view changes when the broadcast returns.
    ///
    /// # Errors
    ///
    /// Validation errors for a missing id or empty content; connectivity
    /// errors when the session is down.
    pub fn edit(&mut self, message_id: &str, content: &str, now: Instant) -> Result<(), SyncError> {
        self.check_scope()?;
        Self::check_message_id(message_id)?;
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyEdit.into());
        }
        self.emit(&ClientCommand::EditMessage {
            room_id: self.room_id.clone(),
            message_id: message_id.to_owned(),
            content: content.to_owned(),
        })?;
        self.track(CommandKind::Edit, message_id, now);
        Ok(())
    }

    /// Request an unsend. The view changes when the broadcast returns.
    ///
    /// # Errors
    ///
    /// Validation errors for a missing id; connectivity errors when the
    /// session is down.
    pub fn delete(&mut self, message_id: &str, now: Instant) -> Result<(), SyncError> {
        self.check_scope()?;
        Self::check_message_id(message_id)?;
        self.emit(&ClientCommand::DeleteMessage { room_id: self.room_id.clone(), message_id: message_id.to_owned() })?;
        self.track(CommandKind::Delete, message_id, now);
        Ok(())
    }

    /// Set or clear (`None`) a reaction.
    ///
    /// # Errors
    ///
    /// Validation errors for a missing id; connectivity errors when the
    /// session is down.
    pub fn react(&self, message_id: &str, reaction: Option<String>) -> Result<(), SyncError> {
        self.check_scope()?;
        Self::check_message_id(message_id)?;
        self.emit(&ClientCommand::React { room_id: self.room_id.clone(), message_id: message_id.to_owned(), reaction })
    }

    /// # Errors
    ///
    /// Validation errors for a missing id; connectivity errors when the
    /// session is down.
    pub fn mark_read(&self, message_id: &str) -> Result<(), SyncError> {
        self.check_scope()?;
        Self::check_message_id(message_id)?;
        self.emit(&ClientCommand::MarkRead { room_id: self.room_id.clone(), message_id: message_id.to_owned() })
    }

    /// # Errors
    ///
    /// Connectivity errors when the session is down.
    pub fn typing(&self, signal: TypingSignal) -> Result<(), SyncError> {
        self.check_scope()?;
        let room_id = self.room_id.clone();
        let command = match signal {
            TypingSignal::Start => ClientCommand::TypingStart { room_id },
            TypingSignal::Stop => ClientCommand::TypingStop { room_id },
        };
        self.emit(&command)
    }

    // =========================================================================
    // ECHO TRACKING
    // =========================================================================

    /// Clear pending commands confirmed by a broadcast. Returns whether any cleared.
    pub fn acknowledge(&mut self, event: &ServerEvent) -> bool {
        if event.room_id().is_some_and(|room| room != self.room_id) {
            return false;
        }
        match event {
            ServerEvent::MessageReceived(msg) => self.pending.remove(&(CommandKind::Send, msg.id.clone())).is_some(),
            ServerEvent::MessageEdited { message_id, .. } => {
                self.pending.remove(&(CommandKind::Edit, message_id.clone())).is_some()
            }
            ServerEvent::MessageDeleted { message_id, .. } => {
                let before = self.pending.len();
                self.pending.retain(|(_, id), _| id != message_id);
                self.pending.len() != before
            }
            _ => false,
        }
    }

    /// Remove and return commands whose echo deadline has passed, oldest first.
    pub fn expire(&mut self, now: Instant) -> Vec<PendingCommand> {
        let mut expired: Vec<PendingCommand> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|((kind, id), deadline)| PendingCommand { kind: *kind, message_id: id.clone(), deadline: *deadline })
            .collect();
        for cmd in &expired {
            self.pending.remove(&(cmd.kind, cmd.message_id.clone()));
        }
        expired.sort_by(|a, b| a.deadline.cmp(&b.deadline).then_with(|| a.message_id.cmp(&b.message_id)));
        for cmd in &expired {
            warn!(kind = ?cmd.kind, message_id = %cmd.message_id, "dispatcher: no echo from server");
        }
        expired
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().copied().min()
    }

    #[must_use]
    pub fn is_pending(&self, kind: CommandKind, message_id: &str) -> bool {
        self.pending.contains_key(&(kind, message_id.to_owned()))
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget every pending command (resync or disconnect).
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod tests;
