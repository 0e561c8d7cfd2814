//! Screen-scoped chat controller.
//!
//! SYSTEM CONTEXT
//! ==============
//! A `ChatRoom` is what one open conversation screen owns: the merged message
//! view, the typing/presence signaler, the command dispatcher, and one
//! subscription on the shared connection. It joins its room on open and,
//! on `dispose` or drop, leaves the room and unregisters its listener
//! synchronously.
//!
//! EVENT FLOW
//! ==========
//! `next_update` multiplexes the subscription with the nearest local
//! deadline (typing stop, remote typing expiry, echo timeout) and yields one
//! [`RoomUpdate`] at a time. After `Connection(Connected)` the owner should
//! call `resync` to pick up anything missed while offline.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, Subscription};
use crate::dispatcher::{CommandDispatcher, PendingCommand};
use crate::error::SyncError;
use crate::history::HistoryApi;
use crate::media::{MediaRef, MediaUploader, resolve_media};
use crate::protocol::ServerEvent;
use crate::stream::MessageStream;
use crate::types::{ConnectionState, Message, RoomId, UserId};
use crate::typing::TypingSignaler;

/// Something the screen should re-render or report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoomUpdate {
    /// The merged message view changed.
    Messages,
    Typing { partner_typing: bool },
    Presence { partner_online: bool },
    Connection(ConnectionState),
    Error(SyncError),
    /// Commands whose server echo never arrived; a `resync` is advised.
    EchoTimeout(Vec<PendingCommand>),
    /// The connection manager shut down; no further updates.
    Closed,
}

pub struct ChatRoom {
    room_id: RoomId,
    manager: ConnectionManager,
    history: Arc<dyn HistoryApi>,
    uploader: Arc<dyn MediaUploader>,
    stream: MessageStream,
    typing: TypingSignaler,
    dispatcher: CommandDispatcher,
    subscription: Option<Subscription>,
    queued: VecDeque<RoomUpdate>,
}

impl ChatRoom {
    /// Subscribe and join `room_id`. Joining is deferred until the
    /// connection comes up when it is not live yet.
    #[must_use]
    pub fn open(
        manager: ConnectionManager,
        history: Arc<dyn HistoryApi>,
        uploader: Arc<dyn MediaUploader>,
        config: &SyncConfig,
        room_id: impl Into<RoomId>,
        self_id: impl Into<UserId>,
        partner_id: impl Into<UserId>,
    ) -> Self {
        let room_id = room_id.into();
        let self_id = self_id.into();
        let subscription = manager.subscribe();
        if manager.is_connected() {
            manager.join_room(&room_id);
        }
        info!(room_id = %room_id, user_id = %self_id, "room: opened");

        Self {
            stream: MessageStream::new(room_id.clone(), config.page_size),
            typing: TypingSignaler::new(self_id.clone(), partner_id, config.typing_idle, config.remote_typing_expiry),
            dispatcher: CommandDispatcher::new(manager.clone(), room_id.clone(), self_id, config.echo_timeout),
            room_id,
            manager,
            history,
            uploader,
            subscription: Some(subscription),
            queued: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.stream.messages()
    }

    #[must_use]
    pub fn stream(&self) -> &MessageStream {
        &self.stream
    }

    #[must_use]
    pub fn typing(&self) -> &TypingSignaler {
        &self.typing
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.subscription.is_some()
    }

    // =========================================================================
    // HISTORY
    // =========================================================================

    /// Fetch the next history page. `Ok(false)` when nothing was fetched
    /// (exhausted or a page already in flight).
    ///
    /// # Errors
    ///
    /// The REST error; the page can be retried.
    pub async fn load_next_page(&mut self) -> Result<bool, SyncError> {
        let Some(request) = self.stream.next_page_request() else {
            return Ok(false);
        };
        match self.history.fetch_page(&self.room_id, request).await {
            Ok(page) => {
                debug!(room_id = %self.room_id, offset = request.offset, rows = page.len(), "room: page loaded");
                Ok(self.stream.apply_page(request, page))
            }
            Err(e) => {
                warn!(room_id = %self.room_id, offset = request.offset, error = %e, "room: page fetch failed");
                self.stream.page_failed();
                Err(e)
            }
        }
    }

    /// Reconcile with the server: drop unconfirmed optimistic sends, forget
    /// pending echoes, and refetch from the first page.
    ///
    /// # Errors
    ///
    /// The REST error from the first-page fetch.
    pub async fn resync(&mut self) -> Result<(), SyncError> {
        let discarded = self.stream.discard_unsent();
        self.dispatcher.clear_pending();
        self.stream.reset_pagination();
        info!(room_id = %self.room_id, discarded, "room: resync");
        self.load_next_page().await.map(|_| ())
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// Local text-input change; emits `typing-start` on the leading edge.
    ///
    /// # Errors
    ///
    /// Connectivity errors from the emit.
    pub fn on_input(&mut self, now: Instant) -> Result<(), SyncError> {
        match self.typing.on_input(now) {
            Some(signal) => self.dispatcher.typing(signal),
            None => Ok(()),
        }
    }

    fn stop_typing(&mut self) {
        if let Some(signal) = self.typing.on_send() {
            let _ = self.dispatcher.typing(signal);
        }
    }

    /// # Errors
    ///
    /// Validation or connectivity errors from the dispatcher.
    pub fn send_text(&mut self, text: &str, now: Instant) -> Result<Message, SyncError> {
        let message = self.dispatcher.send(&mut self.stream, Some(text.to_owned()), Vec::new(), now)?;
        self.stop_typing();
        Ok(message)
    }

    /// Upload local media first, then send with durable URLs only.
    ///
    /// # Errors
    ///
    /// Upload failures, or validation/connectivity errors from the dispatcher.
    pub async fn send_media(&mut self, caption: Option<String>, media: &[MediaRef]) -> Result<Message, SyncError> {
        let urls = resolve_media(self.uploader.as_ref(), media).await?;
        let message = self.dispatcher.send(&mut self.stream, caption, urls, Instant::now())?;
        self.stop_typing();
        Ok(message)
    }

    /// Emit the edit, then persist it over REST. A REST failure is queued
    /// as a [`RoomUpdate::Error`] since the live edit already went out.
    ///
    /// # Errors
    ///
    /// Validation or connectivity errors from the dispatcher.
    pub async fn edit(&mut self, message_id: &str, content: &str, now: Instant) -> Result<(), SyncError> {
        self.dispatcher.edit(message_id, content, now)?;
        if let Err(e) = self.history.edit_message(message_id, content).await {
            warn!(message_id, error = %e, "room: edit backstop failed");
            self.queued.push_back(RoomUpdate::Error(e));
        }
        Ok(())
    }

    /// Emit the unsend, then persist it over REST.
    ///
    /// # Errors
    ///
    /// Validation or connectivity errors from the dispatcher.
    pub async fn delete(&mut self, message_id: &str, now: Instant) -> Result<(), SyncError> {
        self.dispatcher.delete(message_id, now)?;
        if let Err(e) = self.history.delete_message(message_id).await {
            warn!(message_id, error = %e, "room: delete backstop failed");
            self.queued.push_back(RoomUpdate::Error(e));
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Validation or connectivity errors from the dispatcher.
    pub fn react(&mut self, message_id: &str, reaction: Option<String>) -> Result<(), SyncError> {
        self.dispatcher.react(message_id, reaction)
    }

    /// # Errors
    ///
    /// Validation or connectivity errors from the dispatcher.
    pub fn mark_read(&mut self, message_id: &str) -> Result<(), SyncError> {
        self.dispatcher.mark_read(message_id)
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    /// Wait for the next update. `None` after `dispose`.
    pub async fn next_update(&mut self) -> Option<RoomUpdate> {
        loop {
            if let Some(update) = self.queued.pop_front() {
                return Some(update);
            }
            let deadline = self.next_deadline();
            let subscription = self.subscription.as_mut()?;

            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => {
                        if let Some(update) = self.handle_connection_event(event, Instant::now()) {
                            return Some(update);
                        }
                    }
                    None => {
                        self.subscription = None;
                        return Some(RoomUpdate::Closed);
                    }
                },
                () = sleep_until(deadline) => {
                    let updates = self.tick(Instant::now());
                    self.queued.extend(updates);
                }
            }
        }
    }

    /// Fold one connection event into room state.
    pub fn handle_connection_event(&mut self, event: ConnectionEvent, now: Instant) -> Option<RoomUpdate> {
        match event {
            ConnectionEvent::StateChanged(state) => {
                if state == ConnectionState::Disconnected {
                    self.typing.clear_remote();
                }
                Some(RoomUpdate::Connection(state))
            }
            ConnectionEvent::Connected { .. } => {
                self.manager.join_room(&self.room_id);
                None
            }
            ConnectionEvent::Reconnected { rejoined, .. } => {
                if !rejoined.contains(&self.room_id) {
                    self.manager.join_room(&self.room_id);
                }
                None
            }
            ConnectionEvent::Server(event) => self.apply_server_event(&event, now),
            ConnectionEvent::Error(e) => Some(RoomUpdate::Error(e)),
        }
    }

    fn apply_server_event(&mut self, event: &ServerEvent, now: Instant) -> Option<RoomUpdate> {
        match event {
            ServerEvent::Typing { room_id, user_id, typing } => {
                if *room_id != self.room_id || !self.typing.on_remote_typing(user_id, *typing, now) {
                    return None;
                }
                Some(RoomUpdate::Typing { partner_typing: self.typing.partner_typing() })
            }
            ServerEvent::PartnerOnline { user_id } | ServerEvent::PartnerOffline { user_id } => {
                let online = matches!(event, ServerEvent::PartnerOnline { .. });
                self.typing
                    .on_presence(user_id, online)
                    .then(|| RoomUpdate::Presence { partner_online: self.typing.partner_online() })
            }
            ServerEvent::Rejected { .. } => event.as_error().map(RoomUpdate::Error),
            ServerEvent::UserJoined { room_id, user_id } | ServerEvent::UserLeft { room_id, user_id } => {
                debug!(%room_id, %user_id, "room: membership change");
                None
            }
            ServerEvent::Connected { .. } => None,
            _ => {
                self.dispatcher.acknowledge(event);
                self.stream.apply_event(event).then_some(RoomUpdate::Messages)
            }
        }
    }

    /// Run every timer that is due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<RoomUpdate> {
        let mut updates = Vec::new();
        if let Some(signal) = self.typing.poll(now) {
            let _ = self.dispatcher.typing(signal);
        }
        if !self.typing.expire_remote(now).is_empty() {
            updates.push(RoomUpdate::Typing { partner_typing: self.typing.partner_typing() });
        }
        let expired = self.dispatcher.expire(now);
        if !expired.is_empty() {
            updates.push(RoomUpdate::EchoTimeout(expired));
        }
        updates
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.typing.next_deadline(), self.dispatcher.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // =========================================================================
    // LIFETIME
    // =========================================================================

    /// Stop typing, leave the room, and unregister the listener. Idempotent.
    pub fn dispose(&mut self) {
        if self.subscription.take().is_none() {
            return;
        }
        self.stop_typing();
        if self.manager.joined_rooms().contains(&self.room_id) {
            self.manager.leave_room(&self.room_id);
        }
        self.queued.clear();
        info!(room_id = %self.room_id, "room: closed");
    }
}

impl Drop for ChatRoom {
    fn drop(&mut self) {
        self.dispose();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
