//! Realtime one-to-one chat sync client.
//!
//! One [`connection::ConnectionManager`] owns the websocket session for the
//! signed-in user. Each open conversation is a [`room::ChatRoom`], which merges
//! REST history pages with live events into a single ordered timeline and
//! drives typing, presence, and message mutations over the shared session.

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod history;
pub mod media;
pub mod protocol;
pub mod room;
pub mod stream;
pub mod types;
pub mod typing;
