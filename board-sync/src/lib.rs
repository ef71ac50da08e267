//! # board-sync — Real-time whiteboard synchronization engine
//!
//! Multi-client synchronization for shared whiteboards over WebSocket.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌─────────────┐
//! │ BoardClient │ ◄─────────────────► │ SyncServer  │
//! │ (per user)  │     JSON frames     │             │
//! └─────────────┘                     └──────┬──────┘
//!                                            │
//!                                    ┌───────┴────────┐
//!                                    │ BoardRegistry  │
//!                                    └───────┬────────┘
//!                                            │ per board
//!                              ┌─────────────┼─────────────┐
//!                              ▼             ▼             ▼
//!                        ┌───────────┐ ┌────────────┐ ┌──────────┐
//!                        │ Sequencer │ │ ShapeStore │ │ Hub      │
//!                        │ (order)   │ │ (state)    │ │ (fan-out)│
//!                        └───────────┘ └────────────┘ └──────────┘
//! ```
//!
//! One task per session reads inbound frames; each board serializes
//! its mutations through the sequencer's critical section; accepted
//! deltas fan out through the broadcast hub to every session on that
//! board. Boards are fully independent of each other.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (ClientMessage/ServerMessage)
//! - [`sequencer`] — per-board total ordering and retained delta log
//! - [`registry`] — board lookup, lazy creation, idle eviction
//! - [`broadcast`] — per-board fan-out with backpressure
//! - [`session`] — connection lifecycle
//! - [`server`] — WebSocket sync server
//! - [`client`] — WebSocket client used by embedders and tests
//! - [`storage`] — persistence collaborator (memory / file)

pub mod broadcast;
pub mod client;
pub mod protocol;
pub mod registry;
pub mod sequencer;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastHub, BroadcastStats, Envelope, SessionInfo};
pub use client::{BoardClient, BoardEvent, ConnectionState};
pub use protocol::{ClientMessage, ErrorCode, ProtocolError, ServerMessage};
pub use registry::{Board, BoardId, BoardRegistry, RegistryError};
pub use sequencer::{Accepted, ResyncError, Sequencer, SubmitError};
pub use server::{ServerConfig, ServerStats, SyncServer};
pub use session::{Session, SessionState};
pub use storage::{BoardSnapshot, BoardStore, FileStore, MemoryStore, PersistError};
