//! WebSocket client for connecting to the sync server.
//!
//! Provides:
//! - Connection lifecycle (connect, join, disconnect)
//! - Operation submission with automatic sequence numbering
//! - An event stream of snapshots, deltas, and acks for the embedder
//!
//! The client tracks the board revision from every snapshot, delta,
//! and ack it sees, so submitted operations always carry the latest
//! revision the client has observed, and a reconnect can ask for an
//! incremental catch-up instead of a full snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use board_core::{Operation, Shape, ShapeAttrs};

use crate::protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the board client.
#[derive(Debug, Clone)]
pub enum BoardEvent {
    /// Connection established and join sent
    Connected,
    /// Connection lost
    Disconnected,
    /// Full board state from the server
    Snapshot { revision: u64, shapes: Vec<Shape> },
    /// One accepted operation's visible change
    Delta {
        revision: u64,
        delta: board_core::Delta,
        origin: Uuid,
    },
    /// The server accepted one of our operations
    Ack { client_seq: u64, revision: u64 },
    /// The server rejected something
    Error { code: ErrorCode, message: String },
    /// Another session joined the board
    SessionJoined {
        session_id: Uuid,
        session_count: usize,
    },
    /// A session left the board
    SessionLeft { session_id: Uuid },
    /// Heartbeat reply
    Pong,
}

/// The board client.
///
/// Manages a WebSocket connection to the sync server for one board,
/// numbering outbound operations and surfacing inbound frames as
/// [`BoardEvent`]s.
pub struct BoardClient {
    /// Board we are editing
    board_id: String,

    /// Display name sent with the join
    name: Option<String>,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Last board revision observed (snapshot, delta, or ack)
    revision: Arc<AtomicU64>,

    /// Next client_seq for outbound operations
    next_seq: AtomicU64,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<BoardEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<BoardEvent>,

    /// Server URL
    server_url: String,
}

impl BoardClient {
    /// Create a new client for one board.
    pub fn new(board_id: impl Into<String>, server_url: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            board_id: board_id.into(),
            name: None,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            revision: Arc::new(AtomicU64::new(0)),
            next_seq: AtomicU64::new(1),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Set the display name announced on join.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<BoardEvent>> {
        self.event_rx.take()
    }

    /// Connect to the server and join the board.
    ///
    /// Spawns background tasks for reading/writing WebSocket messages.
    /// On a reconnect the join carries the last observed revision, so
    /// the server can reply with an incremental catch-up.
    pub async fn connect(&mut self) -> Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.server_url)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Text(frame.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Join (or rejoin, carrying the last revision we saw)
        let seen = self.revision.load(Ordering::SeqCst);
        let join = ClientMessage::Join {
            board_id: self.board_id.clone(),
            last_revision: (seen > 0).then_some(seen),
            name: self.name.clone(),
        };
        self.send_frame(join.encode()?).await?;

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(BoardEvent::Connected).await;

        // Reader task: surface incoming frames as events
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let revision = self.revision.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Text(text)) => {
                        let server_msg = match ServerMessage::decode(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                log::warn!("Undecodable frame from server: {e}");
                                continue;
                            }
                        };

                        let event = match server_msg {
                            ServerMessage::Snapshot { revision: rev, shapes } => {
                                revision.store(rev, Ordering::SeqCst);
                                BoardEvent::Snapshot {
                                    revision: rev,
                                    shapes,
                                }
                            }
                            ServerMessage::Delta {
                                revision: rev,
                                delta,
                                origin,
                            } => {
                                revision.store(rev, Ordering::SeqCst);
                                BoardEvent::Delta {
                                    revision: rev,
                                    delta,
                                    origin,
                                }
                            }
                            ServerMessage::Ack {
                                client_seq,
                                revision: rev,
                            } => {
                                revision.fetch_max(rev, Ordering::SeqCst);
                                BoardEvent::Ack {
                                    client_seq,
                                    revision: rev,
                                }
                            }
                            ServerMessage::Error { code, message } => {
                                BoardEvent::Error { code, message }
                            }
                            ServerMessage::SessionJoined {
                                session_id,
                                session_count,
                            } => BoardEvent::SessionJoined {
                                session_id,
                                session_count,
                            },
                            ServerMessage::SessionLeft { session_id } => {
                                BoardEvent::SessionLeft { session_id }
                            }
                            ServerMessage::Pong => BoardEvent::Pong,
                        };
                        let _ = event_tx.send(event).await;
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(BoardEvent::Disconnected).await;
        });

        Ok(())
    }

    /// Submit a create for a new shape. Returns the client_seq the ack
    /// will carry.
    pub async fn create_shape(&self, shape: Shape) -> Result<u64, ProtocolError> {
        let (seq, based) = self.next_op();
        self.send_operation(Operation::create(seq, based, shape))
            .await?;
        Ok(seq)
    }

    /// Submit a partial attribute update.
    pub async fn update_shape(&self, shape_id: Uuid, attrs: ShapeAttrs) -> Result<u64, ProtocolError> {
        let (seq, based) = self.next_op();
        self.send_operation(Operation::update(seq, based, shape_id, attrs))
            .await?;
        Ok(seq)
    }

    /// Submit a delete.
    pub async fn delete_shape(&self, shape_id: Uuid) -> Result<u64, ProtocolError> {
        let (seq, based) = self.next_op();
        self.send_operation(Operation::delete(seq, based, shape_id))
            .await?;
        Ok(seq)
    }

    /// Submit a z-order change.
    pub async fn reorder_shape(&self, shape_id: Uuid, z_index: i64) -> Result<u64, ProtocolError> {
        let (seq, based) = self.next_op();
        self.send_operation(Operation::reorder(seq, based, shape_id, z_index))
            .await?;
        Ok(seq)
    }

    /// Send a fully-formed operation (the `create_shape` family is the
    /// usual entry point).
    pub async fn send_operation(&self, op: Operation) -> Result<(), ProtocolError> {
        self.send_frame(ClientMessage::operation(op).encode()?).await
    }

    /// Send a ping to the server.
    pub async fn send_ping(&self) -> Result<(), ProtocolError> {
        self.send_frame(ClientMessage::Ping.encode()?).await
    }

    fn next_op(&self) -> (u64, u64) {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let based = self.revision.load(Ordering::SeqCst);
        (seq, based)
    }

    async fn send_frame(&self, frame: String) -> Result<(), ProtocolError> {
        match &self.outgoing_tx {
            Some(tx) => tx
                .send(frame)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Last board revision observed.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Get the board ID.
    pub fn board_id(&self) -> &str {
        &self.board_id
    }

    /// Get the server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = BoardClient::new("team-retro", "ws://localhost:9290").with_name("alice");
        assert_eq!(client.board_id(), "team-retro");
        assert_eq!(client.server_url(), "ws://localhost:9290");
        assert_eq!(client.revision(), 0);
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let client = BoardClient::new("b", "ws://localhost:9290");
        assert_eq!(
            client.connection_state().await,
            ConnectionState::Disconnected
        );
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let client = BoardClient::new("b", "ws://localhost:9290");
        let result = client.send_ping().await;
        assert_eq!(result, Err(ProtocolError::ConnectionClosed));
    }

    #[test]
    fn test_sequence_numbers_are_unique_and_increasing() {
        let client = BoardClient::new("b", "ws://localhost:9290");
        let (a, _) = client.next_op();
        let (b, _) = client.next_op();
        let (c, _) = client.next_op();
        assert_eq!((a, b, c), (1, 2, 3));
    }

    #[tokio::test]
    async fn test_take_event_rx() {
        let mut client = BoardClient::new("b", "ws://localhost:9290");
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
    }
}
