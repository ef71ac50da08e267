//! Per-board fan-out with backpressure.
//!
//! Uses tokio broadcast channels for O(1) send to all subscribers.
//! Frames are encoded once and shared as `Arc<String>`; each session
//! holds an independent receiver buffering up to `capacity` frames.
//!
//! Backpressure policy: a receiver that falls more than `capacity`
//! frames behind observes `Lagged` — the server force-closes that
//! session (`session_overloaded`) rather than dropping or reordering
//! the broadcast for anyone else. A healthy session never loses a
//! delta, and observes deltas in sequencer order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, ServerMessage};

/// A pre-encoded frame travelling through the hub.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Session that caused this frame (None for server-originated
    /// notifications). Receivers use it to tell their own echoes
    /// apart; everyone still gets the frame.
    pub origin: Option<Uuid>,
    /// Encoded JSON frame, shared across all receivers
    pub frame: Arc<String>,
}

/// A session registered with the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub name: String,
}

impl SessionInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            name: name.into(),
        }
    }

    pub fn with_id(session_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            session_id,
            name: name.into(),
        }
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_published: u64,
    pub sessions_dropped: u64,
    pub active_sessions: usize,
}

/// Atomic stats — lock-free on the publish path.
struct AtomicStats {
    frames_published: AtomicU64,
    sessions_dropped: AtomicU64,
}

/// Fan-out hub for one board.
///
/// All sessions on the board share one broadcast channel; a published
/// delta reaches every subscribed receiver.
pub struct BroadcastHub {
    sender: broadcast::Sender<Envelope>,
    sessions: Arc<RwLock<HashMap<Uuid, SessionInfo>>>,
    capacity: usize,
    stats: AtomicStats,
}

impl BroadcastHub {
    /// Create a hub with the given per-receiver buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            capacity,
            stats: AtomicStats {
                frames_published: AtomicU64::new(0),
                sessions_dropped: AtomicU64::new(0),
            },
        }
    }

    /// Register a session; returns its outbound receiver.
    pub async fn add_session(&self, info: SessionInfo) -> broadcast::Receiver<Envelope> {
        self.register_session(info).await;
        self.sender.subscribe()
    }

    /// Register a session without subscribing. The join path uses this
    /// so it can create the receiver separately, inside the board's
    /// sequencing critical section (see [`crate::session::Session::join`]).
    pub async fn register_session(&self, info: SessionInfo) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(info.session_id, info);
    }

    /// Remove a session.
    pub async fn remove_session(&self, session_id: &Uuid) -> Option<SessionInfo> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id)
    }

    /// Record that a session was force-closed for lagging.
    pub fn note_session_dropped(&self) {
        self.stats.sessions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish a message to every session on the board.
    ///
    /// The frame is encoded once; receivers share the allocation.
    /// Returns the number of receivers the frame reached.
    pub fn publish(
        &self,
        msg: &ServerMessage,
        origin: Option<Uuid>,
    ) -> Result<usize, ProtocolError> {
        let frame = Arc::new(msg.encode()?);
        Ok(self.publish_raw(Envelope { origin, frame }))
    }

    /// Publish a pre-encoded envelope (lock-free fast path).
    pub fn publish_raw(&self, envelope: Envelope) -> usize {
        let count = self.sender.send(envelope).unwrap_or(0);
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// All registered sessions.
    pub async fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn has_session(&self, session_id: &Uuid) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Stats snapshot (publish counters are lock-free).
    pub async fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_published: self.stats.frames_published.load(Ordering::Relaxed),
            sessions_dropped: self.stats.sessions_dropped.load(Ordering::Relaxed),
            active_sessions: self.sessions.read().await.len(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Raw subscription without session registration (server internals).
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }
}
