//! Message stream reducer: one ordered, deduplicated timeline per room.
//!
//! DESIGN
//! ======
//! Two inputs feed the view:
//! - `historical`: REST pages, fetched on demand (oldest-request-first).
//! - `live`: socket events received since the room was opened, plus
//!   optimistic local sends.
//!
//! A merge pass keys everything by message id, inserting `live` first and
//! `historical` only where the id is still free, so a stale REST copy never
//! overwrites a newer live copy. This is source priority, not timestamp
//! comparison. The result is sorted by `created_at` descending (newest
//! first), ties broken by id descending.
//!
//! Deletions are tombstoned for the lifetime of the stream and win over any
//! historical copy merged afterwards. Edits, read receipts, and reactions are
//! kept as overlays so one that lands before its message (out-of-order
//! arrival across channels) is still reflected once any copy shows up.
//!
//! PAGINATION
//! ==========
//! Offset = pages fetched so far × page size. A page shorter than the page
//! size ends infinite scroll (`has_more = false`). Only one page may be in
//! flight at a time.

use std::collections::{HashMap, HashSet};

use crate::protocol::ServerEvent;
use crate::types::{Message, MessageId, RoomId};

/// Offset/limit pair for one history fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct EditOverlay {
    content: Option<String>,
}

/// Read/reaction state received by event. `reaction` only applies once
/// `reacted` is set, so a cleared reaction is distinct from no event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct FlagOverlay {
    read: bool,
    reacted: bool,
    reaction: Option<String>,
}

#[derive(Clone, Debug)]
pub struct MessageStream {
    room_id: RoomId,
    page_size: usize,
    live: HashMap<MessageId, Message>,
    historical: HashMap<MessageId, Message>,
    edits: HashMap<MessageId, EditOverlay>,
    flags: HashMap<MessageId, FlagOverlay>,
    deleted: HashSet<MessageId>,
    pages_fetched: usize,
    has_more: bool,
    in_flight: Option<PageRequest>,
    view: Vec<Message>,
}

impl MessageStream {
    #[must_use]
    pub fn new(room_id: impl Into<RoomId>, page_size: usize) -> Self {
        Self {
            room_id: room_id.into(),
            page_size: page_size.max(1),
            live: HashMap::new(),
            historical: HashMap::new(),
            edits: HashMap::new(),
            flags: HashMap::new(),
            deleted: HashSet::new(),
            pages_fetched: 0,
            has_more: true,
            in_flight: None,
            view: Vec::new(),
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The merged view, newest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.view
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.view.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<&Message> {
        self.view.iter().find(|m| m.id == message_id)
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    #[must_use]
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    // =========================================================================
    // PAGINATION
    // =========================================================================

    /// Claim the next page to fetch. `None` while a page is in flight or once
    /// history is exhausted.
    pub fn next_page_request(&mut self) -> Option<PageRequest> {
        if !self.has_more || self.in_flight.is_some() {
            return None;
        }
        let request = PageRequest { offset: self.pages_fetched * self.page_size, limit: self.page_size };
        self.in_flight = Some(request);
        Some(request)
    }

    /// Merge a fetched page. Returns `false` for a page nobody asked for.
    pub fn apply_page(&mut self, request: PageRequest, page: Vec<Message>) -> bool {
        if self.in_flight != Some(request) {
            return false;
        }
        self.in_flight = None;
        self.pages_fetched += 1;
        if page.len() < self.page_size {
            self.has_more = false;
        }
        self.merge_historical(page);
        true
    }

    /// Release the in-flight claim after a failed fetch so it can be retried.
    pub fn page_failed(&mut self) {
        self.in_flight = None;
    }

    /// Merge historical rows outside the pagination cursor (resync refetch).
    pub fn merge_historical(&mut self, rows: Vec<Message>) {
        for msg in rows {
            if msg.room_id != self.room_id || self.deleted.contains(&msg.id) {
                continue;
            }
            self.historical.insert(msg.id.clone(), msg);
        }
        self.rebuild();
    }

    /// Forget pagination progress but keep live state and tombstones.
    pub fn reset_pagination(&mut self) {
        self.pages_fetched = 0;
        self.has_more = true;
        self.in_flight = None;
    }

    /// Drop optimistic copies the server never echoed. Returns how many.
    pub fn discard_unsent(&mut self) -> usize {
        let before = self.live.len();
        self.live.retain(|_, m| m.sent);
        let removed = before - self.live.len();
        if removed > 0 {
            self.rebuild();
        }
        removed
    }

    /// Drop everything (room leave / logout).
    pub fn clear(&mut self) {
        *self = Self::new(std::mem::take(&mut self.room_id), self.page_size);
    }

    // =========================================================================
    // LIVE EVENTS
    // =========================================================================

    /// A message delivered by the live stream. Replaces any optimistic copy
    /// with the same id.
    pub fn apply_live(&mut self, msg: Message) -> bool {
        if msg.room_id != self.room_id || self.deleted.contains(&msg.id) {
            return false;
        }
        self.live.insert(msg.id.clone(), msg);
        self.rebuild();
        true
    }

    /// Optimistic insert of a locally composed message.
    pub fn apply_local(&mut self, mut msg: Message) -> bool {
        msg.sent = false;
        self.apply_live(msg)
    }

    /// Replace content in place and mark edited. Position is unchanged.
    pub fn apply_edit(&mut self, message_id: &str, content: Option<String>) -> bool {
        if self.deleted.contains(message_id) {
            return false;
        }
        let overlay = EditOverlay { content };
        if self.edits.get(message_id) == Some(&overlay) {
            return false;
        }
        self.edits.insert(message_id.to_owned(), overlay);
        self.rebuild();
        self.contains_raw(message_id)
    }

    /// Remove from the view for the rest of the session.
    pub fn apply_delete(&mut self, message_id: &str) -> bool {
        let was_visible = self.contains_raw(message_id);
        self.deleted.insert(message_id.to_owned());
        self.live.remove(message_id);
        self.historical.remove(message_id);
        self.edits.remove(message_id);
        self.flags.remove(message_id);
        self.rebuild();
        was_visible
    }

    /// Mark read. Returns whether a visible message changed; a receipt for a
    /// message not seen yet is held until it arrives.
    pub fn apply_read(&mut self, message_id: &str) -> bool {
        self.apply_flags(message_id, |f| !std::mem::replace(&mut f.read, true))
    }

    /// Set or clear (`None`) the reaction, held like [`Self::apply_read`].
    pub fn apply_reaction(&mut self, message_id: &str, reaction: Option<String>) -> bool {
        self.apply_flags(message_id, |f| {
            let changed = !f.reacted || f.reaction != reaction;
            f.reacted = true;
            f.reaction = reaction;
            changed
        })
    }

    /// Apply an inbound event scoped to this room. Returns whether the view changed.
    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        if event.room_id().is_some_and(|room| room != self.room_id) {
            return false;
        }
        match event {
            ServerEvent::MessageReceived(msg) => self.apply_live(msg.clone()),
            ServerEvent::MessageEdited { message_id, content, .. } => {
                self.apply_edit(message_id, Some(content.clone()))
            }
            ServerEvent::MessageDeleted { message_id, .. } => self.apply_delete(message_id),
            ServerEvent::MessageRead { message_id, .. } => self.apply_read(message_id),
            ServerEvent::MessageReacted { message_id, reaction, .. } => {
                self.apply_reaction(message_id, reaction.clone())
            }
            _ => false,
        }
    }

    // =========================================================================
    // MERGE
    // =========================================================================

    fn contains_raw(&self, message_id: &str) -> bool {
        self.live.contains_key(message_id) || self.historical.contains_key(message_id)
    }

    fn apply_flags(&mut self, message_id: &str, f: impl FnOnce(&mut FlagOverlay) -> bool) -> bool {
        if self.deleted.contains(message_id) {
            return false;
        }
        if !f(self.flags.entry(message_id.to_owned()).or_default()) {
            return false;
        }
        let before = self.get(message_id).cloned();
        self.rebuild();
        self.get(message_id) != before.as_ref()
    }

    fn rebuild(&mut self) {
        let mut merged: HashMap<&MessageId, &Message> = HashMap::with_capacity(self.live.len() + self.historical.len());
        for (id, msg) in &self.live {
            merged.insert(id, msg);
        }
        for (id, msg) in &self.historical {
            merged.entry(id).or_insert(msg);
        }

        let mut view: Vec<Message> = merged
            .into_values()
            .filter(|m| !self.deleted.contains(&m.id))
            .map(|m| {
                let mut m = m.clone();
                if let Some(edit) = self.edits.get(&m.id) {
                    m.content.clone_from(&edit.content);
                    m.edited = true;
                }
                if let Some(flags) = self.flags.get(&m.id) {
                    m.read |= flags.read;
                    if flags.reacted {
                        m.reaction.clone_from(&flags.reaction);
                    }
                }
                m
            })
            .collect();
        view.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        self.view = view;
    }
}

#[cfg(test)]
#[path = "stream_test.rs"]
mod tests;
