//! Per-board total ordering and the retained operation log.
//!
//! The sequencer is the single serialized critical section for one
//! board: every mutation passes through its mutex, so operations are
//! sequenced strictly first-come-first-served and the store never
//! observes concurrency. The mutex being held IS the `Sequencing`
//! state; `Idle` is the mutex at rest. Nothing else in the engine
//! locks across boards, so unrelated boards stay independent.
//!
//! The log retains the last N `(revision, delta)` pairs so a client
//! reconnecting with a recent revision can catch up incrementally;
//! anything older forces a full snapshot resync.

use std::collections::VecDeque;

use tokio::sync::Mutex;
use uuid::Uuid;

use board_core::{ApplyError, Delta, Operation, Shape, ShapeStore, ValidationError};

/// A successfully sequenced operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Accepted {
    /// The revision this operation produced
    pub revision: u64,
    pub delta: Delta,
}

/// Rejection reasons from [`Sequencer::submit`]. The board revision is
/// untouched by a rejection.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitError {
    /// Structurally malformed operation
    Invalid(ValidationError),
    /// Create with an id that exists or was deleted
    DuplicateShape(Uuid),
}

impl std::fmt::Display for SubmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmitError::Invalid(e) => write!(f, "invalid operation: {e}"),
            SubmitError::DuplicateShape(id) => write!(f, "duplicate shape id {id}"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Resync failures from [`Sequencer::deltas_since`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResyncError {
    /// Requested revision predates retained history; take a snapshot
    StaleRevision { requested: u64, oldest_retained: u64 },
    /// Requested revision is ahead of the board
    FutureRevision { requested: u64, current: u64 },
}

impl std::fmt::Display for ResyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResyncError::StaleRevision {
                requested,
                oldest_retained,
            } => write!(
                f,
                "revision {requested} predates retained history (oldest {oldest_retained})"
            ),
            ResyncError::FutureRevision { requested, current } => {
                write!(f, "revision {requested} is ahead of board revision {current}")
            }
        }
    }
}

impl std::error::Error for ResyncError {}

/// What a (re)joining client needs to get current, read atomically
/// with respect to submissions.
#[derive(Debug, Clone, PartialEq)]
pub enum CatchUp {
    /// Fresh join: full board state
    Snapshot { revision: u64, shapes: Vec<Shape> },
    /// Rejoin within retained history: just the missed tail
    Deltas(Vec<(u64, Delta)>),
    /// Rejoin not incrementally satisfiable: the reason plus a full
    /// fallback snapshot
    Resync {
        error: ResyncError,
        revision: u64,
        shapes: Vec<Shape>,
    },
}

struct SequencerInner {
    store: ShapeStore,
    /// Retained `(revision, delta)` pairs, oldest first
    log: VecDeque<(u64, Delta)>,
    retention: usize,
}

impl SequencerInner {
    /// Retained deltas after `revision`, oldest first.
    fn tail_since(&self, revision: u64) -> Result<Vec<(u64, Delta)>, ResyncError> {
        let current = self.store.revision();

        if revision > current {
            return Err(ResyncError::FutureRevision {
                requested: revision,
                current,
            });
        }
        if revision == current {
            return Ok(Vec::new());
        }

        // Every revision in (revision, current] must still be logged.
        let oldest_retained = match self.log.front() {
            Some((rev, _)) => *rev,
            None => {
                return Err(ResyncError::StaleRevision {
                    requested: revision,
                    oldest_retained: current,
                })
            }
        };
        if oldest_retained > revision + 1 {
            return Err(ResyncError::StaleRevision {
                requested: revision,
                oldest_retained,
            });
        }

        Ok(self
            .log
            .iter()
            .filter(|(rev, _)| *rev > revision)
            .cloned()
            .collect())
    }
}

/// Total-orders all operations for one board.
pub struct Sequencer {
    inner: Mutex<SequencerInner>,
}

impl Sequencer {
    /// New sequencer over an empty board.
    pub fn new(retention: usize) -> Self {
        Self::with_store(ShapeStore::new(), retention)
    }

    /// New sequencer over a restored store (persistence load path).
    pub fn with_store(store: ShapeStore, retention: usize) -> Self {
        Self {
            inner: Mutex::new(SequencerInner {
                store,
                log: VecDeque::with_capacity(retention.min(1024)),
                retention,
            }),
        }
    }

    /// Sequence and apply one operation.
    pub async fn submit(&self, op: &Operation) -> Result<Accepted, SubmitError> {
        self.submit_with(op, |_| {}).await
    }

    /// Sequence and apply one operation, running `fanout` on the
    /// accepted result while the critical section is still held.
    ///
    /// Publishing the delta inside the lock means the broadcast
    /// channel carries deltas in exactly the revision order the
    /// sequencer assigned: two submissions cannot publish in the
    /// opposite order to the one they were sequenced in. `fanout` must
    /// be cheap and non-blocking (encode + channel send).
    pub async fn submit_with<F>(&self, op: &Operation, fanout: F) -> Result<Accepted, SubmitError>
    where
        F: FnOnce(&Accepted),
    {
        let mut inner = self.inner.lock().await;

        op.validate(inner.store.revision())
            .map_err(SubmitError::Invalid)?;

        let delta = match inner.store.apply(op) {
            Ok(delta) => delta,
            Err(ApplyError::DuplicateShape(id)) => {
                return Err(SubmitError::DuplicateShape(id));
            }
        };
        let revision = inner.store.revision();

        inner.log.push_back((revision, delta.clone()));
        while inner.log.len() > inner.retention {
            inner.log.pop_front();
        }

        log::trace!("sequenced op client_seq={} -> revision {revision}", op.client_seq);
        let accepted = Accepted { revision, delta };
        fanout(&accepted);
        Ok(accepted)
    }

    /// Consistent point-in-time snapshot.
    pub async fn snapshot(&self) -> (u64, Vec<Shape>) {
        self.inner.lock().await.store.snapshot()
    }

    /// Current board revision.
    pub async fn revision(&self) -> u64 {
        self.inner.lock().await.store.revision()
    }

    /// Deltas a client at `revision` is missing, oldest first.
    ///
    /// Empty when the client is current. `StaleRevision` when the gap
    /// extends past retained history — the caller must fall back to a
    /// full snapshot.
    pub async fn deltas_since(&self, revision: u64) -> Result<Vec<(u64, Delta)>, ResyncError> {
        self.inner.lock().await.tail_since(revision)
    }

    /// Catch-up read for a (re)joining client, with a hook run while
    /// the critical section is held.
    ///
    /// `with_lock` is where the caller subscribes to the board's
    /// broadcast channel: because deltas are published under this same
    /// lock (see [`Sequencer::submit_with`]), the catch-up data and
    /// the subscription partition the delta history exactly — every
    /// revision up to the catch-up point is in the returned [`CatchUp`]
    /// and every revision after it arrives on the new subscription,
    /// with no delta appearing in both.
    pub async fn catch_up<F, R>(&self, last_revision: Option<u64>, with_lock: F) -> (CatchUp, R)
    where
        F: FnOnce() -> R,
    {
        let inner = self.inner.lock().await;
        let subscription = with_lock();

        let catch_up = match last_revision {
            None => {
                let (revision, shapes) = inner.store.snapshot();
                CatchUp::Snapshot { revision, shapes }
            }
            Some(last) => match inner.tail_since(last) {
                Ok(deltas) => CatchUp::Deltas(deltas),
                Err(error) => {
                    let (revision, shapes) = inner.store.snapshot();
                    CatchUp::Resync {
                        error,
                        revision,
                        shapes,
                    }
                }
            },
        };
        (catch_up, subscription)
    }

    /// Number of retained log entries.
    pub async fn log_len(&self) -> usize {
        self.inner.lock().await.log.len()
    }
}
