//! Ordering and convergence guarantees, exercised directly against
//! the sequencer and session layer without a network in the way.

use std::sync::Arc;

use board_core::{
    Delta, Geometry, Operation, Point, Rect, Shape, ShapeAttrs, ShapeKind,
};
use board_sync::protocol::{ClientMessage, ServerMessage};
use board_sync::registry::{BoardId, BoardRegistry};
use board_sync::sequencer::{ResyncError, Sequencer, SubmitError};
use board_sync::session::Session;
use board_sync::storage::MemoryStore;
use uuid::Uuid;

fn rect_shape() -> Shape {
    Shape::new(
        ShapeKind::Rectangle,
        Geometry::Bounds(Rect::new(0.0, 0.0, 10.0, 10.0)),
    )
}

/// Revisions are contiguous under heavy concurrent submission, with
/// exactly one bump per accepted operation.
#[tokio::test]
async fn contiguous_revisions_under_concurrency() {
    let sequencer = Arc::new(Sequencer::new(1024));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sequencer = sequencer.clone();
        handles.push(tokio::spawn(async move {
            let mut revisions = Vec::new();
            for seq in 1..=25u64 {
                let based = sequencer.revision().await;
                let accepted = sequencer
                    .submit(&Operation::create(seq, based, rect_shape()))
                    .await
                    .unwrap();
                revisions.push(accepted.revision);
            }
            revisions
        }));
    }

    let mut all: Vec<u64> = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    all.sort();

    assert_eq!(all.len(), 200);
    for (i, rev) in all.iter().enumerate() {
        assert_eq!(*rev, i as u64 + 1, "revision gap at position {i}");
    }
    assert_eq!(sequencer.revision().await, 200);
}

/// Per-field last-writer-wins: the field value after a batch of
/// updates is the one from the update sequenced last, field by field.
#[tokio::test]
async fn later_field_writes_win() {
    let sequencer = Sequencer::new(64);
    let shape = rect_shape();
    let id = shape.id;
    sequencer
        .submit(&Operation::create(1, 0, shape))
        .await
        .unwrap();

    // Two sessions race: one recolors, one moves. Both are based on
    // revision 1 and both are accepted in arrival order.
    sequencer
        .submit(&Operation::update(
            1,
            1,
            id,
            ShapeAttrs::default().stroke("#ff0000"),
        ))
        .await
        .unwrap();
    sequencer
        .submit(&Operation::update(
            2,
            1,
            id,
            ShapeAttrs::default().position(Point::new(50.0, 50.0)),
        ))
        .await
        .unwrap();
    // A later write to the same field overrides the earlier one
    sequencer
        .submit(&Operation::update(
            3,
            2,
            id,
            ShapeAttrs::default().stroke("#00ff00"),
        ))
        .await
        .unwrap();

    let (revision, shapes) = sequencer.snapshot().await;
    assert_eq!(revision, 4);
    assert_eq!(shapes.len(), 1);
    assert_eq!(shapes[0].style.stroke, "#00ff00");
    assert_eq!(shapes[0].geometry.origin(), Point::new(50.0, 50.0));
}

/// Deleted shapes stay deleted: no later operation resurrects them.
#[tokio::test]
async fn tombstones_prevent_resurrection() {
    let sequencer = Sequencer::new(64);
    let shape = rect_shape();
    let id = shape.id;
    sequencer
        .submit(&Operation::create(1, 0, shape.clone()))
        .await
        .unwrap();
    sequencer
        .submit(&Operation::delete(2, 1, id))
        .await
        .unwrap();

    // Update of the tombstoned shape: accepted, but a no-op
    let accepted = sequencer
        .submit(&Operation::update(
            3,
            2,
            id,
            ShapeAttrs::default().stroke("#123456"),
        ))
        .await
        .unwrap();
    assert_eq!(accepted.delta, Delta::None);
    assert_eq!(accepted.revision, 3);

    // Reorder of the tombstoned shape: same
    let accepted = sequencer
        .submit(&Operation::reorder(4, 3, id, 9))
        .await
        .unwrap();
    assert_eq!(accepted.delta, Delta::None);

    // Re-create with the same id: rejected, revision untouched
    let err = sequencer
        .submit(&Operation::create(5, 4, shape))
        .await
        .unwrap_err();
    assert_eq!(err, SubmitError::DuplicateShape(id));
    assert_eq!(sequencer.revision().await, 4);

    let (_, shapes) = sequencer.snapshot().await;
    assert!(shapes.is_empty());
}

/// Operations on shapes that never existed are accepted no-ops, so
/// every session's revision counter still advances in lockstep.
#[tokio::test]
async fn unknown_shape_operations_are_noops() {
    let sequencer = Sequencer::new(64);
    let ghost = Uuid::new_v4();

    let accepted = sequencer
        .submit(&Operation::update(
            1,
            0,
            ghost,
            ShapeAttrs::default().stroke("#000"),
        ))
        .await
        .unwrap();
    assert_eq!(accepted, board_sync::sequencer::Accepted {
        revision: 1,
        delta: Delta::None,
    });

    let accepted = sequencer
        .submit(&Operation::delete(2, 1, ghost))
        .await
        .unwrap();
    assert_eq!(accepted.revision, 2);
    assert_eq!(accepted.delta, Delta::None);
}

/// Two boards fed the same operations in the same order end up in
/// identical states.
#[tokio::test]
async fn replay_is_deterministic() {
    let ops: Vec<Operation> = {
        let mut ops = Vec::new();
        let mut shapes = Vec::new();
        for i in 0..10u64 {
            let shape = rect_shape();
            shapes.push(shape.id);
            ops.push(Operation::create(i * 3 + 1, i * 3, shape));
            ops.push(Operation::update(
                i * 3 + 2,
                i * 3 + 1,
                shapes[i as usize],
                ShapeAttrs::default().position(Point::new(i as f32, i as f32)),
            ));
            ops.push(Operation::reorder(
                i * 3 + 3,
                i * 3 + 2,
                shapes[i as usize],
                i as i64,
            ));
        }
        ops
    };

    let a = Sequencer::new(64);
    let b = Sequencer::new(64);
    for op in &ops {
        a.submit(op).await.unwrap();
        b.submit(op).await.unwrap();
    }

    assert_eq!(a.snapshot().await, b.snapshot().await);
}

/// The retained delta log hands back exactly the missed tail, and
/// refuses revisions outside what it can serve.
#[tokio::test]
async fn delta_log_serves_exact_tail() {
    let sequencer = Sequencer::new(4);
    for seq in 1..=10u64 {
        sequencer
            .submit(&Operation::create(seq, seq - 1, rect_shape()))
            .await
            .unwrap();
    }

    // Retention 4: revisions 7..=10 are retained
    let tail = sequencer.deltas_since(8).await.unwrap();
    let revisions: Vec<u64> = tail.iter().map(|(rev, _)| *rev).collect();
    assert_eq!(revisions, vec![9, 10]);

    assert!(sequencer.deltas_since(10).await.unwrap().is_empty());

    assert_eq!(
        sequencer.deltas_since(2).await.unwrap_err(),
        ResyncError::StaleRevision {
            requested: 2,
            oldest_retained: 7,
        }
    );
    assert_eq!(
        sequencer.deltas_since(11).await.unwrap_err(),
        ResyncError::FutureRevision {
            requested: 11,
            current: 10,
        }
    );
}

/// Every subscriber observes broadcast deltas in exactly the order the
/// sequencer assigned them, even when many sessions submit at once.
#[tokio::test]
async fn deltas_broadcast_in_revision_order() {
    let registry = BoardRegistry::new(Arc::new(MemoryStore::new()), 256, 1024);
    let board = registry
        .get_or_create(&BoardId::parse("fanout-order").unwrap())
        .await;

    let (_observer, mut rx, _) =
        Session::join(board.clone(), Some("observer".into()), None).await;

    let mut writers = Vec::new();
    for _ in 0..8 {
        let (mut session, session_rx, _) = Session::join(board.clone(), None, None).await;
        drop(session_rx);
        writers.push(tokio::spawn(async move {
            for seq in 1..=25u64 {
                let replies = session
                    .handle_message(ClientMessage::operation(Operation::create(
                        seq,
                        0,
                        rect_shape(),
                    )))
                    .await;
                assert!(matches!(replies[0], ServerMessage::Ack { .. }));
            }
        }));
    }
    for w in writers {
        w.await.unwrap();
    }

    let mut seen = Vec::new();
    while seen.len() < 200 {
        let env = rx.recv().await.unwrap();
        if let ServerMessage::Delta { revision, .. } = ServerMessage::decode(&env.frame).unwrap() {
            seen.push(revision);
        }
    }
    let expected: Vec<u64> = (1..=200).collect();
    assert_eq!(seen, expected, "deltas must arrive in sequenced order");
}

/// A client that rejoins while writes are in flight sees each delta
/// exactly once: revisions up to the catch-up point arrive as direct
/// replies and everything after arrives on the broadcast receiver,
/// with no overlap between the two.
#[tokio::test]
async fn rejoin_catch_up_and_broadcast_do_not_overlap() {
    for _ in 0..20 {
        let registry = BoardRegistry::new(Arc::new(MemoryStore::new()), 256, 512);
        let board = registry
            .get_or_create(&BoardId::parse("rejoin-race").unwrap())
            .await;

        let (mut writer, writer_rx, _) = Session::join(board.clone(), None, None).await;
        drop(writer_rx);
        writer
            .handle_message(ClientMessage::operation(Operation::create(1, 0, rect_shape())))
            .await;

        let writes = tokio::spawn(async move {
            for seq in 2..=51u64 {
                writer
                    .handle_message(ClientMessage::operation(Operation::create(
                        seq,
                        0,
                        rect_shape(),
                    )))
                    .await;
            }
        });

        // Rejoin mid-stream at revision 1; the direct replies carry
        // some prefix of revisions 2..=51.
        let (_rejoiner, mut rx, replies) = Session::join(board.clone(), None, Some(1)).await;
        let caught_up_to = replies
            .iter()
            .filter_map(|r| match r {
                ServerMessage::Delta { revision, .. } => Some(*revision),
                _ => None,
            })
            .max()
            .unwrap_or(1);

        writes.await.unwrap();

        // The broadcast stream must resume exactly one past the
        // catch-up point and run contiguously to the end.
        let mut next = caught_up_to + 1;
        while next <= 51 {
            let env = rx.recv().await.unwrap();
            if let ServerMessage::Delta { revision, .. } =
                ServerMessage::decode(&env.frame).unwrap()
            {
                assert_eq!(revision, next, "duplicate or out-of-order delta after rejoin");
                next += 1;
            }
        }
    }
}

/// Snapshots list shapes in z-order so a client can paint them
/// back-to-front as received.
#[tokio::test]
async fn snapshot_is_z_ordered() {
    let sequencer = Sequencer::new(64);
    let mut ids = Vec::new();
    for seq in 1..=3u64 {
        let shape = rect_shape();
        ids.push(shape.id);
        sequencer
            .submit(&Operation::create(seq, seq - 1, shape))
            .await
            .unwrap();
    }
    // Push the first shape on top
    sequencer
        .submit(&Operation::reorder(4, 3, ids[0], 100))
        .await
        .unwrap();

    let (_, shapes) = sequencer.snapshot().await;
    assert_eq!(shapes.last().unwrap().id, ids[0]);
    assert!(shapes.windows(2).all(|w| w[0].z_index <= w[1].z_index));
}
