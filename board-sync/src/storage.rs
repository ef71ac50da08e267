//! Persistence collaborator for boards.
//!
//! The engine treats persistence as a pluggable snapshot store:
//!
//! ```text
//! ┌──────────────┐  load_board / save_board  ┌──────────────┐
//! │ BoardRegistry│ ────────────────────────► │  BoardStore  │
//! │ (in-memory)  │   on create / eviction    │ (mem | file) │
//! └──────────────┘                           └──────────────┘
//! ```
//!
//! Failures here are never fatal to serving: a board that cannot be
//! loaded starts empty, a board that cannot be saved stays in memory
//! and is retried on the next eviction sweep.
//!
//! [`FileStore`] keeps one file per board: a bincode-encoded
//! [`BoardSnapshot`] behind LZ4 `compress_prepend_size`.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use board_core::Shape;

/// A persisted point-in-time board state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub board_id: String,
    pub revision: u64,
    pub shapes: Vec<Shape>,
}

impl BoardSnapshot {
    pub fn new(board_id: impl Into<String>, revision: u64, shapes: Vec<Shape>) -> Self {
        Self {
            board_id: board_id.into(),
            revision,
            shapes,
        }
    }
}

/// Persistence errors. All of them degrade to in-memory-only
/// operation upstream (`PersistenceUnavailable` semantics).
#[derive(Debug, Clone)]
pub enum PersistError {
    Io(String),
    Serialization(String),
    /// Stored bytes exist but cannot be decoded
    Corrupt(String),
}

impl std::fmt::Display for PersistError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistError::Io(e) => write!(f, "storage I/O error: {e}"),
            PersistError::Serialization(e) => write!(f, "storage serialization error: {e}"),
            PersistError::Corrupt(e) => write!(f, "corrupt board snapshot: {e}"),
        }
    }
}

impl std::error::Error for PersistError {}

/// Snapshot store interface consumed by the board registry.
pub trait BoardStore: Send + Sync {
    /// Load a board's last persisted snapshot, if any.
    fn load_board(&self, board_id: &str) -> Result<Option<BoardSnapshot>, PersistError>;

    /// Persist a board snapshot, replacing any previous one.
    fn save_board(&self, snapshot: &BoardSnapshot) -> Result<(), PersistError>;

    /// Ids of all persisted boards.
    fn list_boards(&self) -> Result<Vec<String>, PersistError>;
}

/// In-memory store (tests and ephemeral deployments).
#[derive(Default)]
pub struct MemoryStore {
    boards: RwLock<HashMap<String, BoardSnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BoardStore for MemoryStore {
    fn load_board(&self, board_id: &str) -> Result<Option<BoardSnapshot>, PersistError> {
        let boards = self
            .boards
            .read()
            .map_err(|e| PersistError::Io(e.to_string()))?;
        Ok(boards.get(board_id).cloned())
    }

    fn save_board(&self, snapshot: &BoardSnapshot) -> Result<(), PersistError> {
        let mut boards = self
            .boards
            .write()
            .map_err(|e| PersistError::Io(e.to_string()))?;
        boards.insert(snapshot.board_id.clone(), snapshot.clone());
        Ok(())
    }

    fn list_boards(&self) -> Result<Vec<String>, PersistError> {
        let boards = self
            .boards
            .read()
            .map_err(|e| PersistError::Io(e.to_string()))?;
        Ok(boards.keys().cloned().collect())
    }
}

const BOARD_FILE_EXT: &str = "board";

/// File-backed store: one compressed snapshot file per board.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating the directory if needed).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| PersistError::Io(e.to_string()))?;
        Ok(Self { dir })
    }

    fn board_path(&self, board_id: &str) -> PathBuf {
        // Board ids are already restricted to [A-Za-z0-9._-] by the
        // registry, so they are safe as file stems.
        self.dir.join(format!("{board_id}.{BOARD_FILE_EXT}"))
    }

    fn encode(snapshot: &BoardSnapshot) -> Result<Vec<u8>, PersistError> {
        let raw = bincode::serde::encode_to_vec(snapshot, bincode::config::standard())
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&raw))
    }

    fn decode(bytes: &[u8]) -> Result<BoardSnapshot, PersistError> {
        let raw = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| PersistError::Corrupt(e.to_string()))?;
        let (snapshot, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
            .map_err(|e| PersistError::Corrupt(e.to_string()))?;
        Ok(snapshot)
    }
}

impl BoardStore for FileStore {
    fn load_board(&self, board_id: &str) -> Result<Option<BoardSnapshot>, PersistError> {
        let path = self.board_path(board_id);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::Io(e.to_string())),
        };
        Self::decode(&bytes).map(Some)
    }

    fn save_board(&self, snapshot: &BoardSnapshot) -> Result<(), PersistError> {
        let encoded = Self::encode(snapshot)?;
        let path = self.board_path(&snapshot.board_id);
        let tmp = path.with_extension("tmp");

        // Write-then-rename so a crash never leaves a torn snapshot
        let mut file =
            std::fs::File::create(&tmp).map_err(|e| PersistError::Io(e.to_string()))?;
        file.write_all(&encoded)
            .map_err(|e| PersistError::Io(e.to_string()))?;
        file.sync_all().map_err(|e| PersistError::Io(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| PersistError::Io(e.to_string()))?;
        Ok(())
    }

    fn list_boards(&self) -> Result<Vec<String>, PersistError> {
        let mut ids = Vec::new();
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| PersistError::Io(e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| PersistError::Io(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(BOARD_FILE_EXT) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
        }
        Ok(ids)
    }
}
