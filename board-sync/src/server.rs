//! WebSocket sync server with board-based routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Board (board_id) ── Sequencer ── ShapeStore
//! Client B ──┘                          │
//!                                       ├── BoardStore (file / memory)
//!                                       │       └── Snapshots (LZ4)
//!                                       │
//!                            ┌──────────┼───────────┐
//!                            ▼          ▼           ▼
//!                         Client A   Client B    Client C
//! ```
//!
//! One task per connection. The first frame on a connection must be a
//! `join`; after that the task shuttles frames between the socket and
//! the board's broadcast hub. A background sweeper evicts boards with
//! no sessions, persisting them first.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::registry::{BoardId, BoardRegistry};
use crate::session::Session;
use crate::storage::{BoardStore, FileStore, MemoryStore};

/// How long a connection may sit idle before its join arrives.
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Maximum sessions per board
    pub max_sessions_per_board: usize,
    /// Broadcast channel capacity per board
    pub broadcast_capacity: usize,
    /// Retained deltas per board for incremental resync
    pub op_log_retention: usize,
    /// Idle time before a session-less board is evicted
    pub idle_eviction: Duration,
    /// How often the eviction sweeper runs
    pub eviction_sweep_interval: Duration,
    /// Grace period for flushing the final frame of a draining session
    pub drain_grace: Duration,
    /// Persistence directory (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9290".to_string(),
            max_sessions_per_board: 100,
            broadcast_capacity: 256,
            op_log_retention: 512,
            idle_eviction: Duration::from_secs(300),
            eviction_sweep_interval: Duration::from_secs(60),
            drain_grace: Duration::from_millis(500),
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub total_operations: u64,
    pub rejected_operations: u64,
    pub active_boards: usize,
    pub evicted_boards: u64,
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    registry: Arc<BoardRegistry>,
    stats: Arc<RwLock<ServerStats>>,
}

impl SyncServer {
    /// Create a new sync server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let store: Arc<dyn BoardStore> = match &config.storage_path {
            Some(path) => Arc::new(
                FileStore::open(path.clone()).expect("Failed to open board store"),
            ),
            None => Arc::new(MemoryStore::new()),
        };

        let registry = Arc::new(BoardRegistry::new(
            store,
            config.op_log_retention,
            config.broadcast_capacity,
        ));

        Self {
            config,
            registry,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// Create with persistence enabled at the given path.
    pub fn with_storage(bind_addr: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let config = ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        };
        Self::new(config)
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Sync server listening on {}", self.config.bind_addr);

        // Background eviction sweeper
        {
            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let idle = self.config.idle_eviction;
            let interval = self.config.eviction_sweep_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await; // first tick fires immediately
                loop {
                    ticker.tick().await;
                    let evicted = registry.evict_idle(idle).await;
                    if evicted > 0 {
                        let mut s = stats.write().await;
                        s.evicted_boards += evicted as u64;
                        s.active_boards = registry.board_count().await;
                    }
                }
            });
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let registry = self.registry.clone();
            let stats = self.stats.clone();
            let config = self.config.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, registry, stats, config).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        registry: Arc<BoardRegistry>,
        stats: Arc<RwLock<ServerStats>>,
        config: ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::info!("WebSocket connection established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        let outcome =
            Self::session_loop(&mut ws_sender, &mut ws_receiver, &registry, &stats, &config)
                .await;

        let mut s = stats.write().await;
        s.active_connections -= 1;
        s.active_boards = registry.board_count().await;
        drop(s);

        log::info!("Connection closed from {addr}");
        outcome
    }

    /// Join handshake plus the per-session frame loop.
    async fn session_loop(
        ws_sender: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
        ws_receiver: &mut futures_util::stream::SplitStream<WebSocketStream<TcpStream>>,
        registry: &Arc<BoardRegistry>,
        stats: &Arc<RwLock<ServerStats>>,
        config: &ServerConfig,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // First frame must be a join
        let (board_id, last_revision, name) = loop {
            let frame = match tokio::time::timeout(JOIN_TIMEOUT, ws_receiver.next()).await {
                Ok(Some(Ok(frame))) => frame,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Ok(()),
                Err(_) => {
                    Self::send(ws_sender, &ServerMessage::error(
                        ErrorCode::InvalidOperation,
                        "join timed out",
                    ))
                    .await?;
                    return Ok(());
                }
            };

            match frame {
                Message::Text(text) => match ClientMessage::decode(&text) {
                    Ok(ClientMessage::Join {
                        board_id,
                        last_revision,
                        name,
                    }) => break (board_id, last_revision, name),
                    Ok(_) => {
                        Self::send(ws_sender, &ServerMessage::error(
                            ErrorCode::InvalidOperation,
                            "expected join as first message",
                        ))
                        .await?;
                        return Ok(());
                    }
                    Err(e) => {
                        Self::send(ws_sender, &ServerMessage::error(
                            ErrorCode::InvalidOperation,
                            e.to_string(),
                        ))
                        .await?;
                        return Ok(());
                    }
                },
                Message::Ping(data) => {
                    ws_sender.send(Message::Pong(data)).await?;
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        };

        let board_id = match BoardId::parse(&board_id) {
            Ok(id) => id,
            Err(e) => {
                Self::send(ws_sender, &ServerMessage::error(
                    ErrorCode::InvalidBoardId,
                    e.to_string(),
                ))
                .await?;
                return Ok(());
            }
        };

        let board = registry.get_or_create(&board_id).await;
        if board.hub().session_count().await >= config.max_sessions_per_board {
            Self::send(ws_sender, &ServerMessage::error(
                ErrorCode::SessionOverloaded,
                "board is full",
            ))
            .await?;
            return Ok(());
        }

        let (mut session, mut broadcast_rx, replies) =
            Session::join(board, name, last_revision).await;
        for reply in &replies {
            Self::send(ws_sender, reply).await?;
        }
        session.activate();

        {
            let mut s = stats.write().await;
            s.active_boards = registry.board_count().await;
        }

        // Frame loop until the client disconnects or falls behind
        let result = loop {
            tokio::select! {
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let decoded = ClientMessage::decode(&text);
                            let is_operation =
                                matches!(decoded, Ok(ClientMessage::Operation { .. }));
                            let replies = match decoded {
                                Ok(msg) => session.handle_message(msg).await,
                                // Malformed frame: reject, session unaffected
                                Err(e) => vec![ServerMessage::error(
                                    ErrorCode::InvalidOperation,
                                    e.to_string(),
                                )],
                            };
                            let rejected = replies
                                .iter()
                                .any(|r| matches!(r, ServerMessage::Error { .. }));
                            {
                                let mut s = stats.write().await;
                                s.total_messages += 1;
                                s.total_bytes += text.len() as u64;
                                if is_operation {
                                    s.total_operations += 1;
                                }
                                if rejected {
                                    s.rejected_operations += 1;
                                }
                            }
                            for reply in &replies {
                                Self::send(ws_sender, reply).await?;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => break Ok(()),
                        Some(Err(e)) => {
                            log::warn!("WebSocket error from session {}: {e}", session.session_id());
                            break Ok(());
                        }
                        _ => {}
                    }
                }

                envelope = broadcast_rx.recv() => {
                    match envelope {
                        Ok(envelope) => {
                            // Frames the session caused directly were
                            // already answered on its own socket
                            if envelope.origin == Some(session.session_id()) {
                                continue;
                            }
                            ws_sender
                                .send(Message::Text(envelope.frame.as_str().into()))
                                .await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            log::warn!(
                                "session {} lagged by {n} frames, force-closing",
                                session.session_id()
                            );
                            session.board().hub().note_session_dropped();
                            let farewell = session.begin_drain(
                                ErrorCode::SessionOverloaded,
                                format!("fell behind by {n} frames"),
                            );
                            // Best-effort: the socket may itself be the
                            // reason the session lagged
                            let _ = tokio::time::timeout(config.drain_grace, async {
                                let _ = Self::send(ws_sender, &farewell).await;
                                let _ = ws_sender.send(Message::Close(None)).await;
                            })
                            .await;
                            break Ok(());
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break Ok(()),
                    }
                }
            }
        };

        session.close().await;
        result
    }

    async fn send(
        ws_sender: &mut SplitSink<WebSocketStream<TcpStream>, Message>,
        msg: &ServerMessage,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let frame = msg.encode()?;
        ws_sender.send(Message::Text(frame.into())).await?;
        Ok(())
    }

    /// Persist every live board (graceful shutdown).
    pub async fn flush(&self) -> usize {
        self.registry.flush_all().await
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        let mut stats = self.stats.read().await.clone();
        stats.active_boards = self.registry.board_count().await;
        stats
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Get the board registry.
    pub fn registry(&self) -> &Arc<BoardRegistry> {
        &self.registry
    }
}
