//! Connection manager: one realtime session per signed-in user.
//!
//! DESIGN
//! ======
//! `ConnectionManager` is an explicitly constructed handle; clones share one
//! session, so the app root owns it and screens borrow clones. The transport
//! is behind the [`Connector`] seam: `open` yields a [`Link`] (an outbound
//! frame sender plus an inbound frame receiver), and a background pump task
//! turns inbound frames into typed [`ConnectionEvent`]s for every
//! [`Subscription`].
//!
//! LIFECYCLE
//! =========
//! - `connect` is idempotent for the same user while the link is live.
//! - Joins, leaves, and emits while disconnected are logged and dropped.
//! - On link loss the pump retries with exponential backoff plus jitter and,
//!   when enabled, re-joins the rooms that were joined before the drop.
//! - `disconnect` aborts the pump, forgets rooms, and closes subscriptions.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use frames::Frame;
use futures_util::{SinkExt, Stream, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{ConnectivityError, SyncError, ValidationError};
use crate::protocol::{ClientCommand, EVENT_CONNECTED, ServerEvent};
use crate::types::{ConnectionInfo, ConnectionState, RoomId, UserId};

// =============================================================================
// TRANSPORT SEAM
// =============================================================================

/// An established transport session.
pub struct Link {
    pub connection_id: String,
    pub outbound: mpsc::UnboundedSender<Frame>,
    /// Closes when the transport drops. Decode failures arrive as `Err`.
    pub inbound: mpsc::UnboundedReceiver<Result<Frame, SyncError>>,
}

/// Opens transport sessions with the user identity attached at connect time.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    /// Establish a session and wait for the server to confirm it.
    ///
    /// # Errors
    ///
    /// Returns a connectivity error when the handshake fails or times out.
    async fn open(&self, user_id: &str) -> Result<Link, SyncError>;
}

/// Binary-frame WebSocket transport.
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    #[must_use]
    pub fn new(config: &SyncConfig) -> Self {
        Self { url: config.ws_url.clone(), connect_timeout: config.connect_timeout }
    }
}

/// Attach the user identity as a query credential.
pub(crate) fn session_url(base: &str, user_id: &str) -> Result<String, SyncError> {
    let mut url = reqwest::Url::parse(base)
        .map_err(|e| ConnectivityError::ConnectFailed(format!("invalid websocket url {base}: {e}")))?;
    url.query_pairs_mut().append_pair("user_id", user_id);
    Ok(url.into())
}

#[async_trait::async_trait]
impl Connector for WsConnector {
    async fn open(&self, user_id: &str) -> Result<Link, SyncError> {
        let url = session_url(&self.url, user_id)?;
        let (stream, _) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| ConnectivityError::Timeout)?
            .map_err(|e| ConnectivityError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let connection_id = tokio::time::timeout(self.connect_timeout, wait_for_connected(&mut read))
            .await
            .map_err(|_| ConnectivityError::Timeout)??;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = write.send(WsMessage::Binary(frames::encode_frame(&frame).into())).await {
                    warn!(error = %e, event = %frame.event, "ws: send failed");
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                let item = match message {
                    Ok(WsMessage::Binary(bytes)) => frames::decode_frame(&bytes).map_err(SyncError::from),
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "ws: read failed");
                        break;
                    }
                };
                if in_tx.send(item).is_err() {
                    break;
                }
            }
        });

        info!(%connection_id, user_id, "ws: connected");
        Ok(Link { connection_id, outbound: out_tx, inbound: in_rx })
    }
}

async fn wait_for_connected<S>(read: &mut S) -> Result<String, SyncError>
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let Some(message) = read.next().await else {
            return Err(ConnectivityError::Closed.into());
        };
        match message.map_err(|e| ConnectivityError::ConnectFailed(e.to_string()))? {
            WsMessage::Binary(bytes) => {
                let frame = frames::decode_frame(&bytes)?;
                if frame.event != EVENT_CONNECTED && !frame.status.is_error() {
                    debug!(event = %frame.event, "ws: frame before connected, skipping");
                    continue;
                }
                match ServerEvent::from_frame(&frame)? {
                    Some(ServerEvent::Connected { connection_id }) => return Ok(connection_id),
                    Some(rejected) => {
                        return Err(rejected
                            .as_error()
                            .unwrap_or(SyncError::Connectivity(ConnectivityError::Closed)));
                    }
                    None => {}
                }
            }
            WsMessage::Close(_) => return Err(ConnectivityError::Closed.into()),
            _ => {}
        }
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Everything a subscriber can observe about the session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
    Connected { connection_id: String },
    /// The link came back after a drop. `rejoined` lists rooms re-joined automatically.
    Reconnected { connection_id: String, rejoined: Vec<RoomId> },
    Server(ServerEvent),
    Error(SyncError),
}

/// Typed observer handle. Dropping it unregisters the listener.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Next event; `None` once the manager disconnects or is dropped.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ConnectionEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.lock().listeners.remove(&self.id);
        }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

struct Session {
    user_id: UserId,
    connection_id: String,
    outbound: mpsc::UnboundedSender<Frame>,
}

impl Session {
    fn send(&self, command: &ClientCommand) -> Result<(), SyncError> {
        self.outbound
            .send(command.to_frame(&self.user_id))
            .map_err(|_| SyncError::Connectivity(ConnectivityError::Closed))
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo { user_id: self.user_id.clone(), connection_id: self.connection_id.clone() }
    }
}

#[derive(Default)]
struct ManagerState {
    user_id: Option<UserId>,
    status: ConnectionState,
    session: Option<Session>,
    rooms: BTreeSet<RoomId>,
    listeners: HashMap<u64, mpsc::UnboundedSender<ConnectionEvent>>,
    next_listener: u64,
    /// Bumped on every connect/disconnect so a stale pump stands down.
    generation: u64,
    pump: Option<JoinHandle<()>>,
}

impl ManagerState {
    fn broadcast(&mut self, event: &ConnectionEvent) {
        self.listeners.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    fn set_status(&mut self, status: ConnectionState) {
        if self.status != status {
            self.status = status;
            self.broadcast(&ConnectionEvent::StateChanged(status));
        }
    }

    fn stop_pump(&mut self) {
        self.generation += 1;
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: SyncConfig,
    state: Mutex<ManagerState>,
    connect_lock: tokio::sync::Mutex<()>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver(&self, item: Result<Frame, SyncError>) {
        let event = match item.and_then(|frame| ServerEvent::from_frame(&frame)) {
            Ok(Some(event)) => {
                if let ServerEvent::Rejected { event: name, message, code, .. } = &event {
                    warn!(event = %name, %message, code = ?code, "connection: server rejected request");
                }
                ConnectionEvent::Server(event)
            }
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "connection: dropping undecodable frame");
                ConnectionEvent::Error(e)
            }
        };
        self.lock().broadcast(&event);
    }

    /// Returns whether the pump should try to reconnect.
    fn link_lost(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        state.session = None;
        state.set_status(ConnectionState::Disconnected);
        state.broadcast(&ConnectionEvent::Error(ConnectivityError::Closed.into()));
        warn!(rooms = state.rooms.len(), "connection: link lost");
        self.config.reconnect.enabled && state.user_id.is_some()
    }

    fn resume(&self, link: Link, generation: u64) -> Option<mpsc::UnboundedReceiver<Result<Frame, SyncError>>> {
        let mut state = self.lock();
        if state.generation != generation {
            return None;
        }
        let user_id = state.user_id.clone()?;
        let session = Session { user_id, connection_id: link.connection_id, outbound: link.outbound };

        let rejoined: Vec<RoomId> = if self.config.reconnect.auto_rejoin {
            state.rooms.iter().cloned().collect()
        } else {
            state.rooms.clear();
            Vec::new()
        };
        for room_id in &rejoined {
            if let Err(e) = session.send(&ClientCommand::JoinRoom { room_id: room_id.clone() }) {
                warn!(room_id = %room_id, error = %e, "connection: rejoin failed");
            }
        }

        let connection_id = session.connection_id.clone();
        state.session = Some(session);
        state.set_status(ConnectionState::Connected);
        info!(%connection_id, rejoined = rejoined.len(), "connection: reconnected");
        state.broadcast(&ConnectionEvent::Reconnected { connection_id, rejoined });
        Some(link.inbound)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
    }
}

/// Shared handle to the process-wide realtime session.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                state: Mutex::new(ManagerState::default()),
                connect_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Establish the session for `user_id`, reusing a live one.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an empty user id, the connector's
    /// error when the handshake fails (also broadcast to subscribers), or
    /// `Connectivity(Closed)` when `disconnect` ran before the handshake finished.
    pub async fn connect(&self, user_id: &str) -> Result<ConnectionInfo, SyncError> {
        if user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId.into());
        }
        let _guard = self.shared.connect_lock.lock().await;

        let started = {
            let mut state = self.shared.lock();
            if let Some(session) = &state.session {
                if session.user_id == user_id && !session.outbound.is_closed() {
                    debug!(user_id, "connection: reusing live session");
                    return Ok(session.info());
                }
            }
            if state.user_id.as_deref().is_some_and(|current| current != user_id) {
                info!(user_id, "connection: switching user, tearing down previous session");
                Self::teardown(&mut state);
            }
            state.stop_pump();
            state.session = None;
            state.user_id = Some(user_id.to_owned());
            state.set_status(ConnectionState::Connecting);
            state.generation
        };

        let opened = self.shared.connector.open(user_id).await;
        let mut state = self.shared.lock();
        // A disconnect while the handshake was in flight wins.
        if state.generation != started || state.user_id.as_deref() != Some(user_id) {
            if opened.is_ok() {
                info!(user_id, "connection: disconnected during connect, dropping new link");
            }
            return Err(ConnectivityError::Closed.into());
        }
        let link = match opened {
            Ok(link) => link,
            Err(e) => {
                warn!(user_id, error = %e, "connection: connect failed");
                state.set_status(ConnectionState::Disconnected);
                state.broadcast(&ConnectionEvent::Error(e.clone()));
                return Err(e);
            }
        };

        let session = Session { user_id: user_id.to_owned(), connection_id: link.connection_id, outbound: link.outbound };
        let info = session.info();
        state.session = Some(session);
        state.generation += 1;
        let generation = state.generation;
        state.pump = Some(tokio::spawn(pump(Arc::downgrade(&self.shared), link.inbound, generation)));
        state.set_status(ConnectionState::Connected);
        state.broadcast(&ConnectionEvent::Connected { connection_id: info.connection_id.clone() });
        info!(user_id, connection_id = %info.connection_id, "connection: connected");
        Ok(info)
    }

    /// Tear down the transport and clear rooms and listeners. Safe when never connected.
    pub fn disconnect(&self) {
        let mut state = self.shared.lock();
        if state.session.is_some() {
            info!(rooms = state.rooms.len(), "connection: disconnecting");
        }
        Self::teardown(&mut state);
    }

    /// Explicit end of the session owner's lifetime.
    pub fn dispose(&self) {
        self.disconnect();
    }

    fn teardown(state: &mut ManagerState) {
        state.stop_pump();
        if let Some(session) = state.session.take() {
            for room_id in std::mem::take(&mut state.rooms) {
                let _ = session.send(&ClientCommand::LeaveRoom { room_id });
            }
        }
        state.rooms.clear();
        state.user_id = None;
        state.set_status(ConnectionState::Disconnected);
        state.listeners.clear();
    }

    /// Join `room_id`, leaving any other joined room first. Returns `false`
    /// (with a warning) when not connected.
    pub fn join_room(&self, room_id: &str) -> bool {
        if room_id.is_empty() {
            warn!("connection: join with empty room id, ignoring");
            return false;
        }
        let mut state = self.shared.lock();
        let Some(session) = &state.session else {
            warn!(room_id, "connection: join while disconnected, ignoring");
            return false;
        };

        let others: Vec<RoomId> = state.rooms.iter().filter(|r| *r != room_id).cloned().collect();
        for other in &others {
            if let Err(e) = session.send(&ClientCommand::LeaveRoom { room_id: other.clone() }) {
                warn!(room_id = %other, error = %e, "connection: leave failed");
            }
        }
        if let Err(e) = session.send(&ClientCommand::JoinRoom { room_id: room_id.to_owned() }) {
            warn!(room_id, error = %e, "connection: join failed");
            return false;
        }
        for other in others {
            state.rooms.remove(&other);
        }
        state.rooms.insert(room_id.to_owned());
        debug!(room_id, "connection: joined room");
        true
    }

    /// Leave `room_id`. Returns `false` (with a warning) when not connected.
    pub fn leave_room(&self, room_id: &str) -> bool {
        let mut state = self.shared.lock();
        state.rooms.remove(room_id);
        let Some(session) = &state.session else {
            warn!(room_id, "connection: leave while disconnected, ignoring");
            return false;
        };
        match session.send(&ClientCommand::LeaveRoom { room_id: room_id.to_owned() }) {
            Ok(()) => true,
            Err(e) => {
                warn!(room_id, error = %e, "connection: leave failed");
                false
            }
        }
    }

    /// Fire-and-forget emission of an outbound command.
    ///
    /// # Errors
    ///
    /// Returns `Connectivity(NotConnected)` when there is no live session;
    /// the command is dropped, not queued.
    pub fn emit(&self, command: &ClientCommand) -> Result<(), SyncError> {
        let state = self.shared.lock();
        let Some(session) = &state.session else {
            warn!(event = command.event_name(), room_id = command.room_id(), "connection: dropping command while disconnected");
            return Err(SyncError::not_connected());
        };
        session.send(command)
    }

    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.shared.lock();
        let id = state.next_listener;
        state.next_listener += 1;
        state.listeners.insert(id, tx);
        Subscription { id, rx, shared: Arc::downgrade(&self.shared) }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().status
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[must_use]
    pub fn connection_id(&self) -> Option<String> {
        self.shared.lock().session.as_ref().map(|s| s.connection_id.clone())
    }

    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.shared.lock().user_id.clone()
    }

    #[must_use]
    pub fn joined_rooms(&self) -> Vec<RoomId> {
        self.shared.lock().rooms.iter().cloned().collect()
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.lock().listeners.len()
    }
}

// =============================================================================
// PUMP
// =============================================================================

async fn pump(shared: Weak<Shared>, mut inbound: mpsc::UnboundedReceiver<Result<Frame, SyncError>>, generation: u64) {
    loop {
        while let Some(item) = inbound.recv().await {
            let Some(strong) = shared.upgrade() else {
                return;
            };
            strong.deliver(item);
        }

        let should_retry = match shared.upgrade() {
            Some(strong) => strong.link_lost(generation),
            None => return,
        };
        if !should_retry {
            return;
        }

        inbound = match reconnect(&shared, generation).await {
            Some(rx) => rx,
            None => return,
        };
    }
}

async fn reconnect(
    shared: &Weak<Shared>,
    generation: u64,
) -> Option<mpsc::UnboundedReceiver<Result<Frame, SyncError>>> {
    let mut attempt: u32 = 0;
    loop {
        let (connector, delay, user_id) = {
            let strong = shared.upgrade()?;
            let state = strong.lock();
            if state.generation != generation {
                return None;
            }
            let delay = with_jitter(strong.config.reconnect.backoff(attempt));
            (Arc::clone(&strong.connector), delay, state.user_id.clone()?)
        };

        debug!(attempt, delay = ?delay, "connection: reconnect scheduled");
        tokio::time::sleep(delay).await;

        {
            let strong = shared.upgrade()?;
            let mut state = strong.lock();
            if state.generation != generation {
                return None;
            }
            state.set_status(ConnectionState::Connecting);
        }

        match connector.open(&user_id).await {
            Ok(link) => return shared.upgrade()?.resume(link, generation),
            Err(e) => {
                warn!(attempt, error = %e, "connection: reconnect failed");
                let strong = shared.upgrade()?;
                let mut state = strong.lock();
                if state.generation != generation {
                    return None;
                }
                state.set_status(ConnectionState::Disconnected);
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Add up to 25% random jitter so clients do not reconnect in lockstep.
fn with_jitter(base: Duration) -> Duration {
    let spread = u64::try_from(base.as_millis() / 4).unwrap_or(0);
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=spread))
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
