//! Typing and presence signaling for one open conversation.
//!
//! Local side: leading-edge `typing-start` on the first keystroke after idle,
//! trailing-edge `typing-stop` once no input arrived for the idle window.
//! Every keystroke pushes the deadline out; no duplicate starts.
//!
//! Remote side: a per-user boolean map fed by `user-typing` events. Entries
//! also expire locally after `remote_expiry`, so a peer that crashes
//! mid-typing does not leave a stale indicator.
//!
//! The signaler is a pure state machine over explicit instants; the room
//! controller owns the timer that calls [`TypingSignaler::poll`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::types::UserId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypingSignal {
    Start,
    Stop,
}

#[derive(Clone, Debug)]
pub struct TypingSignaler {
    self_id: UserId,
    partner_id: UserId,
    idle: Duration,
    remote_expiry: Duration,
    /// `Some` while the local user counts as typing.
    local_deadline: Option<Instant>,
    remote: HashMap<UserId, Instant>,
    partner_online: bool,
}

impl TypingSignaler {
    #[must_use]
    pub fn new(self_id: impl Into<UserId>, partner_id: impl Into<UserId>, idle: Duration, remote_expiry: Duration) -> Self {
        Self {
            self_id: self_id.into(),
            partner_id: partner_id.into(),
            idle,
            remote_expiry,
            local_deadline: None,
            remote: HashMap::new(),
            partner_online: false,
        }
    }

    // =========================================================================
    // LOCAL
    // =========================================================================

    /// Record a text-input change.
    pub fn on_input(&mut self, now: Instant) -> Option<TypingSignal> {
        let was_idle = self.local_deadline.is_none();
        self.local_deadline = Some(now + self.idle);
        was_idle.then_some(TypingSignal::Start)
    }

    /// Sending a message ends the typing burst immediately.
    pub fn on_send(&mut self) -> Option<TypingSignal> {
        self.local_deadline.take().map(|_| TypingSignal::Stop)
    }

    /// Fire the trailing-edge stop once the idle window has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<TypingSignal> {
        match self.local_deadline {
            Some(deadline) if deadline <= now => {
                self.local_deadline = None;
                Some(TypingSignal::Stop)
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn is_local_typing(&self) -> bool {
        self.local_deadline.is_some()
    }

    /// Earliest instant at which `poll` or `expire_remote` has work to do.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.remote
            .values()
            .copied()
            .chain(self.local_deadline)
            .min()
    }

    // =========================================================================
    // REMOTE
    // =========================================================================

    /// Apply a `user-typing` event. Returns whether the visible set changed.
    pub fn on_remote_typing(&mut self, user_id: &str, typing: bool, now: Instant) -> bool {
        if user_id == self.self_id {
            return false;
        }
        if typing {
            self.remote.insert(user_id.to_owned(), now + self.remote_expiry).is_none()
        } else {
            self.remote.remove(user_id).is_some()
        }
    }

    /// Drop remote indicators whose expiry has passed.
    pub fn expire_remote(&mut self, now: Instant) -> Vec<UserId> {
        let expired: Vec<UserId> = self
            .remote
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(user, _)| user.clone())
            .collect();
        for user in &expired {
            self.remote.remove(user);
        }
        expired
    }

    #[must_use]
    pub fn is_typing(&self, user_id: &str) -> bool {
        self.remote.contains_key(user_id)
    }

    #[must_use]
    pub fn partner_typing(&self) -> bool {
        self.is_typing(&self.partner_id)
    }

    /// Remote users currently typing, sorted.
    #[must_use]
    pub fn typing_users(&self) -> Vec<&str> {
        let mut users: Vec<&str> = self.remote.keys().map(String::as_str).collect();
        users.sort_unstable();
        users
    }

    /// Clear remote indicators (disconnect).
    pub fn clear_remote(&mut self) -> bool {
        let had_any = !self.remote.is_empty();
        self.remote.clear();
        had_any
    }

    // =========================================================================
    // PRESENCE
    // =========================================================================

    /// Apply an online/offline event. Only the partner is tracked; returns
    /// whether partner state changed.
    pub fn on_presence(&mut self, user_id: &str, online: bool) -> bool {
        if user_id != self.partner_id {
            return false;
        }
        let mut changed = self.partner_online != online;
        self.partner_online = online;
        if !online {
            changed |= self.remote.remove(user_id).is_some();
        }
        changed
    }

    #[must_use]
    pub fn partner_online(&self) -> bool {
        self.partner_online
    }

    #[must_use]
    pub fn partner_id(&self) -> &str {
        &self.partner_id
    }
}

#[cfg(test)]
#[path = "typing_test.rs"]
mod tests;
