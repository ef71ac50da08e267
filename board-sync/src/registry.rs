//! Board lookup, lazy creation, and idle eviction.
//!
//! The registry maps board ids to live [`Board`] instances. A board is
//! constructed on first reference (seeded from the persistence
//! collaborator when a snapshot exists) and evicted once it has had
//! zero sessions for longer than the retention window, after flushing
//! its final state back to the store.
//!
//! Creation uses a read-lock fast path with a double-checked write
//! path, so concurrent lookups of the same id always converge on the
//! same `Arc<Board>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use board_core::ShapeStore;

use crate::broadcast::BroadcastHub;
use crate::sequencer::Sequencer;
use crate::storage::{BoardSnapshot, BoardStore};

/// A validated board identifier.
///
/// Ids are opaque strings restricted to `[A-Za-z0-9._-]`, non-empty,
/// at most 128 bytes — safe on the wire and as file stems.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BoardId(String);

impl BoardId {
    pub const MAX_LEN: usize = 128;

    /// Validate a raw id.
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        if raw.is_empty() || raw.len() > Self::MAX_LEN {
            return Err(RegistryError::InvalidBoardId(raw.to_string()));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(RegistryError::InvalidBoardId(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BoardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Empty or malformed board id
    InvalidBoardId(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::InvalidBoardId(id) => write!(f, "invalid board id {id:?}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// One live board: its sequencer, its broadcast hub, and its idle
/// clock. The board does not own sessions; the hub only tracks them.
pub struct Board {
    id: BoardId,
    sequencer: Sequencer,
    hub: Arc<BroadcastHub>,
    last_active: RwLock<Instant>,
}

impl Board {
    fn new(id: BoardId, store: ShapeStore, retention: usize, capacity: usize) -> Self {
        Self {
            id,
            sequencer: Sequencer::with_store(store, retention),
            hub: Arc::new(BroadcastHub::new(capacity)),
            last_active: RwLock::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &BoardId {
        &self.id
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Reset the idle clock (any session activity).
    pub async fn touch(&self) {
        *self.last_active.write().await = Instant::now();
    }

    /// Time since the last recorded activity.
    pub async fn idle_for(&self) -> Duration {
        self.last_active.read().await.elapsed()
    }
}

/// Maps board ids to live boards.
pub struct BoardRegistry {
    boards: RwLock<HashMap<BoardId, Arc<Board>>>,
    store: Arc<dyn BoardStore>,
    op_log_retention: usize,
    broadcast_capacity: usize,
}

/// Save retry schedule within one eviction sweep.
const SAVE_ATTEMPTS: u32 = 3;
const SAVE_BACKOFF: Duration = Duration::from_millis(50);

impl BoardRegistry {
    pub fn new(
        store: Arc<dyn BoardStore>,
        op_log_retention: usize,
        broadcast_capacity: usize,
    ) -> Self {
        Self {
            boards: RwLock::new(HashMap::new()),
            store,
            op_log_retention,
            broadcast_capacity,
        }
    }

    /// Return the live board for `id`, constructing it on first
    /// reference. Concurrent calls with the same id return the same
    /// instance; at most one construction wins the race.
    pub async fn get_or_create(&self, id: &BoardId) -> Arc<Board> {
        // Fast path: read lock
        {
            let boards = self.boards.read().await;
            if let Some(board) = boards.get(id) {
                return board.clone();
            }
        }

        // The store load happens outside the lock; if two callers race
        // here, the double-check below discards the loser's copy.
        let store = self.load_store(id);

        let mut boards = self.boards.write().await;
        if let Some(board) = boards.get(id) {
            return board.clone();
        }

        let board = Arc::new(Board::new(
            id.clone(),
            store,
            self.op_log_retention,
            self.broadcast_capacity,
        ));
        boards.insert(id.clone(), board.clone());
        log::info!("board {id} created ({} live boards)", boards.len());
        board
    }

    /// Look up a live board without creating it.
    pub async fn get(&self, id: &BoardId) -> Option<Arc<Board>> {
        self.boards.read().await.get(id).cloned()
    }

    pub async fn board_count(&self) -> usize {
        self.boards.read().await.len()
    }

    pub async fn board_ids(&self) -> Vec<BoardId> {
        self.boards.read().await.keys().cloned().collect()
    }

    /// Seed a shape store from persistence. A load failure degrades to
    /// an empty board with a logged warning — never an error to the
    /// client.
    fn load_store(&self, id: &BoardId) -> ShapeStore {
        match self.store.load_board(id.as_str()) {
            Ok(Some(snapshot)) => {
                log::info!(
                    "board {id} restored from storage at revision {}",
                    snapshot.revision
                );
                ShapeStore::from_snapshot(snapshot.revision, snapshot.shapes)
            }
            Ok(None) => ShapeStore::new(),
            Err(e) => {
                log::warn!("board {id} load failed, starting empty: {e}");
                ShapeStore::new()
            }
        }
    }

    /// Remove boards that have had zero sessions for longer than
    /// `max_idle`, flushing each to storage first. A board whose save
    /// keeps failing stays resident and is retried on the next sweep.
    /// Returns the number of boards evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let candidates: Vec<Arc<Board>> = {
            let boards = self.boards.read().await;
            let mut out = Vec::new();
            for board in boards.values() {
                if board.hub.session_count().await == 0 && board.idle_for().await >= max_idle {
                    out.push(board.clone());
                }
            }
            out
        };

        let mut evicted = 0;
        for board in candidates {
            if !self.flush_board(&board).await {
                continue;
            }

            let mut boards = self.boards.write().await;
            // A session may have joined while we were flushing
            if board.hub.session_count().await != 0 {
                continue;
            }
            boards.remove(&board.id);
            evicted += 1;
            log::info!("board {} evicted (idle)", board.id);
        }
        evicted
    }

    /// Persist one board, retrying with backoff. Returns false if all
    /// attempts failed.
    async fn flush_board(&self, board: &Board) -> bool {
        let (revision, shapes) = board.sequencer.snapshot().await;
        let snapshot = BoardSnapshot::new(board.id.as_str(), revision, shapes);

        for attempt in 1..=SAVE_ATTEMPTS {
            match self.store.save_board(&snapshot) {
                Ok(()) => {
                    log::debug!("board {} persisted at revision {revision}", board.id);
                    return true;
                }
                Err(e) if attempt < SAVE_ATTEMPTS => {
                    log::warn!(
                        "board {} save attempt {attempt} failed: {e}, retrying",
                        board.id
                    );
                    tokio::time::sleep(SAVE_BACKOFF * attempt).await;
                }
                Err(e) => {
                    log::warn!(
                        "board {} save failed after {SAVE_ATTEMPTS} attempts, keeping in memory: {e}",
                        board.id
                    );
                }
            }
        }
        false
    }

    /// Flush every live board (shutdown path).
    pub async fn flush_all(&self) -> usize {
        let boards: Vec<Arc<Board>> = self.boards.read().await.values().cloned().collect();
        let mut flushed = 0;
        for board in boards {
            if self.flush_board(&board).await {
                flushed += 1;
            }
        }
        flushed
    }
}
