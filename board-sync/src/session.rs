//! Connection lifecycle for one board session.
//!
//! A [`Session`] is the server-side view of a single connected client:
//! its identity on the board, its lifecycle state, and the message
//! handling between a decoded [`ClientMessage`] and the replies that
//! go back on that connection. Fan-out to other sessions goes through
//! the board's hub; everything returned from the handlers here is a
//! direct reply on the session's own socket.
//!
//! Lifecycle: `Connecting` from the join handshake until the direct
//! replies (snapshot or catch-up) have been flushed to the socket,
//! then `Active`; `Draining` when the server has decided to close the
//! session (overload) but the close frame is still in flight; `Closed`
//! after cleanup.

use std::sync::Arc;
use uuid::Uuid;

use crate::broadcast::{Envelope, SessionInfo};
use crate::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::registry::Board;
use crate::sequencer::{CatchUp, ResyncError, SubmitError};

const ANONYMOUS: &str = "anonymous";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Handshake accepted, initial snapshot not yet delivered
    Connecting,
    /// Joined to a board, exchanging frames
    Active,
    /// Server decided to close; final frames still being flushed
    Draining,
    Closed,
}

/// One client's membership on one board.
pub struct Session {
    info: SessionInfo,
    board: Arc<Board>,
    state: SessionState,
    joined_at: std::time::Instant,
}

impl Session {
    /// Complete the join handshake: register with the board's hub,
    /// announce the arrival, and build the direct replies that bring
    /// this client up to date.
    ///
    /// Returns the session (in `Connecting` until the caller flushes
    /// the replies and calls [`Session::activate`]), its broadcast
    /// receiver, and the replies to send on the socket in order. A
    /// client joining fresh (no `last_revision`) gets a full snapshot;
    /// a rejoining client gets the retained deltas since its revision,
    /// or an error plus a full snapshot when its revision is no longer
    /// catchable.
    pub async fn join(
        board: Arc<Board>,
        name: Option<String>,
        last_revision: Option<u64>,
    ) -> (
        Self,
        tokio::sync::broadcast::Receiver<Envelope>,
        Vec<ServerMessage>,
    ) {
        let info = SessionInfo::new(name.unwrap_or_else(|| ANONYMOUS.to_string()));
        let session_id = info.session_id;

        board.hub().register_session(info.clone()).await;
        let session_count = board.hub().session_count().await;
        board.touch().await;

        // The catch-up read and the subscription happen under the
        // board's sequencing lock: revisions up to the catch-up point
        // arrive as direct replies, everything after on the receiver,
        // and no delta is delivered through both.
        let hub = board.hub().clone();
        let (catch_up, rx) = board
            .sequencer()
            .catch_up(last_revision, || hub.subscribe())
            .await;

        // Announce to the rest of the board; the joiner learns of its
        // own arrival through the direct reply below, not the echo.
        let _ = board.hub().publish(
            &ServerMessage::SessionJoined {
                session_id,
                session_count,
            },
            Some(session_id),
        );

        let mut replies = vec![ServerMessage::SessionJoined {
            session_id,
            session_count,
        }];
        replies.extend(Self::catch_up_replies(catch_up, session_id));

        log::info!(
            "session {session_id} ({}) joined board {} ({session_count} active)",
            info.name,
            board.id()
        );

        (
            Self {
                info,
                board,
                state: SessionState::Connecting,
                joined_at: std::time::Instant::now(),
            },
            rx,
            replies,
        )
    }

    /// Mark the initial snapshot as delivered; the session is now live.
    pub fn activate(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Active;
        }
    }

    /// The direct replies that bring a (re)joining client current.
    fn catch_up_replies(catch_up: CatchUp, session_id: Uuid) -> Vec<ServerMessage> {
        match catch_up {
            CatchUp::Snapshot { revision, shapes } => {
                vec![ServerMessage::snapshot(revision, shapes)]
            }
            CatchUp::Deltas(deltas) => deltas
                .into_iter()
                .map(|(revision, delta)| ServerMessage::delta(revision, delta, session_id))
                .collect(),
            CatchUp::Resync {
                error,
                revision,
                shapes,
            } => {
                let code = match error {
                    ResyncError::StaleRevision { .. } => ErrorCode::StaleResyncRequired,
                    ResyncError::FutureRevision { .. } => ErrorCode::InvalidOperation,
                };
                vec![
                    ServerMessage::error(code, error.to_string()),
                    ServerMessage::snapshot(revision, shapes),
                ]
            }
        }
    }

    /// Handle one decoded inbound message, returning the direct
    /// replies for this session's socket. Accepted operations are
    /// broadcast to the whole board as a side effect.
    pub async fn handle_message(&mut self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Operation { payload } => self.handle_operation(payload).await,
            ClientMessage::Ping => vec![ServerMessage::Pong],
            ClientMessage::Join { .. } => vec![ServerMessage::error(
                ErrorCode::InvalidOperation,
                "already joined",
            )],
        }
    }

    async fn handle_operation(&mut self, op: board_core::Operation) -> Vec<ServerMessage> {
        let client_seq = op.client_seq;
        self.board.touch().await;

        let hub = self.board.hub();
        let session_id = self.info.session_id;
        // Publish inside the sequencing lock so every receiver sees
        // deltas in the revision order the sequencer assigned. Every
        // session gets the delta, the originator included; the origin
        // field lets clients tell their own apart.
        let result = self
            .board
            .sequencer()
            .submit_with(&op, |accepted| {
                let delta =
                    ServerMessage::delta(accepted.revision, accepted.delta.clone(), session_id);
                let _ = hub.publish(&delta, None);
            })
            .await;

        match result {
            Ok(accepted) => vec![ServerMessage::ack(client_seq, accepted.revision)],
            Err(SubmitError::DuplicateShape(id)) => {
                log::debug!(
                    "session {} rejected duplicate create of {id}",
                    self.info.session_id
                );
                vec![ServerMessage::error(
                    ErrorCode::DuplicateShape,
                    format!("shape {id} already exists or was deleted"),
                )]
            }
            Err(SubmitError::Invalid(e)) => {
                log::debug!(
                    "session {} rejected invalid operation: {e}",
                    self.info.session_id
                );
                vec![ServerMessage::error(ErrorCode::InvalidOperation, e.to_string())]
            }
        }
    }

    /// Mark the session as draining. Returns the final frame to send
    /// before closing the socket.
    pub fn begin_drain(&mut self, code: ErrorCode, message: impl Into<String>) -> ServerMessage {
        self.state = SessionState::Draining;
        ServerMessage::error(code, message)
    }

    /// Tear down: deregister from the hub and announce the departure.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;

        let session_id = self.info.session_id;
        self.board.hub().remove_session(&session_id).await;
        let _ = self
            .board
            .hub()
            .publish(&ServerMessage::SessionLeft { session_id }, Some(session_id));
        self.board.touch().await;

        log::info!(
            "session {session_id} left board {} after {:.1?} ({} remaining)",
            self.board.id(),
            self.joined_at.elapsed(),
            self.board.hub().session_count().await
        );
    }

    pub fn session_id(&self) -> Uuid {
        self.info.session_id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// How long this session has been on the board.
    pub fn connected_for(&self) -> std::time::Duration {
        self.joined_at.elapsed()
    }

    pub fn board(&self) -> &Arc<Board> {
        &self.board
    }
}
