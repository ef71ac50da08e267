//! JSON wire protocol for board synchronization.
//!
//! Text frames over WebSocket, internally tagged:
//!
//! ```json
//! { "type": "join", "board_id": "team-retro", "last_revision": 41 }
//! { "type": "operation", "payload": { "op": "create", ... } }
//! { "type": "snapshot", "revision": 42, "shapes": [ ... ] }
//! { "type": "delta", "revision": 43, "delta": { "change": "updated", ... } }
//! { "type": "error", "code": "duplicate_shape", "message": "..." }
//! ```
//!
//! Every delta frame carries the board revision it produced, so a
//! client can always tell the server exactly how far behind it is
//! when it reconnects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use board_core::{Delta, Operation, Shape};

/// Messages from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to a board. Must be the first frame.
    /// `last_revision` requests a catch-up resync instead of a full
    /// snapshot when the gap is within retained history.
    Join {
        board_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_revision: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Submit an edit operation for the bound board.
    Operation { payload: Operation },
    /// Heartbeat.
    Ping,
}

impl ClientMessage {
    pub fn join(board_id: impl Into<String>) -> Self {
        ClientMessage::Join {
            board_id: board_id.into(),
            last_revision: None,
            name: None,
        }
    }

    pub fn rejoin(board_id: impl Into<String>, last_revision: u64) -> Self {
        ClientMessage::Join {
            board_id: board_id.into(),
            last_revision: Some(last_revision),
            name: None,
        }
    }

    pub fn operation(payload: Operation) -> Self {
        ClientMessage::Operation { payload }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Messages from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full board state, sent on join and forced resync.
    Snapshot { revision: u64, shapes: Vec<Shape> },
    /// One accepted operation's visible change. `origin` names the
    /// session that submitted it.
    Delta {
        revision: u64,
        delta: Delta,
        origin: Uuid,
    },
    /// Direct confirmation to the submitting session.
    Ack { client_seq: u64, revision: u64 },
    /// Rejection or session-fatal condition.
    Error { code: ErrorCode, message: String },
    /// Another session joined the board.
    SessionJoined {
        session_id: Uuid,
        session_count: usize,
    },
    /// A session left the board.
    SessionLeft { session_id: Uuid },
    /// Heartbeat reply.
    Pong,
}

impl ServerMessage {
    pub fn snapshot(revision: u64, shapes: Vec<Shape>) -> Self {
        ServerMessage::Snapshot { revision, shapes }
    }

    pub fn delta(revision: u64, delta: Delta, origin: Uuid) -> Self {
        ServerMessage::Delta {
            revision,
            delta,
            origin,
        }
    }

    pub fn ack(client_seq: u64, revision: u64) -> Self {
        ServerMessage::Ack {
            client_seq,
            revision,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }

    /// Serialize to a JSON text frame.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Parse a JSON text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Error codes surfaced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidBoardId,
    InvalidOperation,
    DuplicateShape,
    /// Client revision is older than retained history; a full
    /// snapshot follows this error.
    StaleResyncRequired,
    /// Outbound queue overflowed; the session is being closed.
    SessionOverloaded,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::InvalidBoardId => "invalid_board_id",
            ErrorCode::InvalidOperation => "invalid_operation",
            ErrorCode::DuplicateShape => "duplicate_shape",
            ErrorCode::StaleResyncRequired => "stale_resync_required",
            ErrorCode::SessionOverloaded => "session_overloaded",
        };
        write!(f, "{s}")
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Malformed(String),
    Serialization(String),
    ConnectionClosed,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Malformed(e) => write!(f, "malformed message: {e}"),
            ProtocolError::Serialization(e) => write!(f, "serialization error: {e}"),
            ProtocolError::ConnectionClosed => write!(f, "connection closed"),
        }
    }
}

impl std::error::Error for ProtocolError {}
