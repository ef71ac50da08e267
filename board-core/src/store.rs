//! The authoritative per-board shape collection.
//!
//! The store applies operations one at a time, in the total order the
//! sequencer assigned — it never sees concurrency. Last-writer-wins
//! per attribute field falls out of that: a later-sequenced update
//! overwrites exactly the fields it names and leaves the rest alone,
//! so disjoint-field updates merge and same-field updates resolve to
//! the later writer.
//!
//! Invariants:
//! - the revision advances by exactly 1 per accepted operation
//!   (rejections leave it untouched)
//! - every shape's `last_revision` <= the store revision
//! - a deleted shape id is tombstoned forever; nothing resurrects it

use std::collections::HashSet;

use uuid::Uuid;

use crate::operation::{Delta, Operation, OperationKind};
use crate::shape::Shape;

/// Rejection reasons from [`ShapeStore::apply`]. A rejected operation
/// does not advance the revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// Create with an id that already exists or was deleted
    DuplicateShape(Uuid),
}

impl std::fmt::Display for ApplyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApplyError::DuplicateShape(id) => write!(f, "duplicate shape id {id}"),
        }
    }
}

impl std::error::Error for ApplyError {}

/// Holds the ordered shapes of one board and applies sequenced
/// mutations. Purely synchronous; the sequencer provides exclusion.
#[derive(Debug, Clone, Default)]
pub struct ShapeStore {
    shapes: Vec<Shape>,
    /// Ids of deleted shapes. Tombstone precedence: operations that
    /// reference a tombstoned id are accepted no-ops (Create excepted,
    /// which is a duplicate).
    tombstones: HashSet<Uuid>,
    revision: u64,
}

impl ShapeStore {
    /// New empty store at revision 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot.
    pub fn from_snapshot(revision: u64, shapes: Vec<Shape>) -> Self {
        Self {
            shapes,
            tombstones: HashSet::new(),
            revision,
        }
    }

    /// Current board revision.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of live shapes.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Look up a live shape.
    pub fn get(&self, id: Uuid) -> Option<&Shape> {
        self.shapes.iter().find(|s| s.id == id)
    }

    /// Apply a single already-sequenced operation.
    ///
    /// Update/Delete/Reorder referencing a missing or tombstoned shape
    /// is an accepted no-op: it returns [`Delta::None`] but still
    /// advances the revision. This protects a client racing against a
    /// concurrent delete without surfacing an error.
    pub fn apply(&mut self, op: &Operation) -> Result<Delta, ApplyError> {
        let delta = match &op.kind {
            OperationKind::Create { shape } => {
                if self.tombstones.contains(&shape.id) || self.get(shape.id).is_some() {
                    return Err(ApplyError::DuplicateShape(shape.id));
                }
                let mut shape = shape.clone();
                shape.last_revision = self.revision + 1;
                self.shapes.push(shape.clone());
                Delta::Created { shape }
            }
            OperationKind::Update { shape_id, attrs } => {
                let next = self.revision + 1;
                match self.shapes.iter_mut().find(|s| s.id == *shape_id) {
                    Some(shape) => {
                        attrs.apply_to(shape);
                        shape.last_revision = next;
                        Delta::Updated {
                            shape_id: *shape_id,
                            attrs: attrs.clone(),
                        }
                    }
                    None => {
                        log::debug!("update of absent shape {shape_id}, recording no-op");
                        Delta::None
                    }
                }
            }
            OperationKind::Delete { shape_id } => {
                let before = self.shapes.len();
                self.shapes.retain(|s| s.id != *shape_id);
                if self.shapes.len() < before {
                    self.tombstones.insert(*shape_id);
                    Delta::Deleted { shape_id: *shape_id }
                } else {
                    log::debug!("delete of absent shape {shape_id}, recording no-op");
                    Delta::None
                }
            }
            OperationKind::Reorder { shape_id, z_index } => {
                let next = self.revision + 1;
                match self.shapes.iter_mut().find(|s| s.id == *shape_id) {
                    Some(shape) => {
                        shape.z_index = *z_index;
                        shape.last_revision = next;
                        Delta::Reordered {
                            shape_id: *shape_id,
                            z_index: *z_index,
                        }
                    }
                    None => Delta::None,
                }
            }
        };

        self.revision += 1;
        Ok(delta)
    }

    /// Consistent point-in-time copy, shapes in stacking order.
    pub fn snapshot(&self) -> (u64, Vec<Shape>) {
        let mut shapes = self.shapes.clone();
        shapes.sort_by_key(|s| s.z_index);
        (self.revision, shapes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Geometry, Point, Rect, ShapeAttrs, ShapeKind};

    fn rect_at(x: f32, y: f32) -> Shape {
        Shape::new(
            ShapeKind::Rectangle,
            Geometry::Bounds(Rect::new(x, y, 10.0, 10.0)),
        )
    }

    #[test]
    fn test_create_advances_revision() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let delta = store.apply(&Operation::create(1, 0, shape.clone())).unwrap();

        assert_eq!(store.revision(), 1);
        assert_eq!(store.len(), 1);
        match delta {
            Delta::Created { shape: s } => {
                assert_eq!(s.id, shape.id);
                assert_eq!(s.last_revision, 1);
            }
            other => panic!("expected Created, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_create_rejected_without_revision_bump() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        store.apply(&Operation::create(1, 0, shape.clone())).unwrap();

        let err = store.apply(&Operation::create(2, 1, shape.clone())).unwrap_err();
        assert_eq!(err, ApplyError::DuplicateShape(shape.id));
        assert_eq!(store.revision(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_update_missing_shape_is_noop_that_advances() {
        let mut store = ShapeStore::new();
        let attrs = ShapeAttrs::default().stroke("#ff0000");
        let delta = store
            .apply(&Operation::update(1, 0, Uuid::new_v4(), attrs))
            .unwrap();

        assert!(delta.is_empty());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_tombstone_precedence() {
        // Delete then update: shape stays absent, both ops accepted.
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        store.apply(&Operation::create(1, 0, shape)).unwrap();
        store.apply(&Operation::delete(2, 1, id)).unwrap();

        let delta = store
            .apply(&Operation::update(3, 1, id, ShapeAttrs::default().stroke("#f00")))
            .unwrap();
        assert!(delta.is_empty());
        assert!(store.get(id).is_none());
        assert_eq!(store.revision(), 3);
    }

    #[test]
    fn test_tombstoned_id_cannot_be_recreated() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        store.apply(&Operation::create(1, 0, shape.clone())).unwrap();
        store.apply(&Operation::delete(2, 1, id)).unwrap();

        let err = store.apply(&Operation::create(3, 2, shape)).unwrap_err();
        assert_eq!(err, ApplyError::DuplicateShape(id));
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut store = ShapeStore::new();
        let delta = store.apply(&Operation::delete(1, 0, Uuid::new_v4())).unwrap();
        assert!(delta.is_empty());
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn test_disjoint_field_merge() {
        // color=red at causal rev 1, position=(5,5) at causal rev 1
        // sequenced after: both take effect.
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        store.apply(&Operation::create(1, 0, shape)).unwrap();

        store
            .apply(&Operation::update(2, 1, id, ShapeAttrs::default().stroke("#ff0000")))
            .unwrap();
        store
            .apply(&Operation::update(3, 1, id, ShapeAttrs::default().position(Point::new(5.0, 5.0))))
            .unwrap();

        let s = store.get(id).unwrap();
        assert_eq!(s.style.stroke, "#ff0000");
        assert_eq!(s.geometry.origin(), Point::new(5.0, 5.0));
        assert_eq!(store.revision(), 3);
        assert_eq!(s.last_revision, 3);
    }

    #[test]
    fn test_same_field_later_writer_wins() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        store.apply(&Operation::create(1, 0, shape)).unwrap();

        store
            .apply(&Operation::update(2, 1, id, ShapeAttrs::default().stroke("#ff0000")))
            .unwrap();
        store
            .apply(&Operation::update(3, 1, id, ShapeAttrs::default().stroke("#0000ff")))
            .unwrap();

        assert_eq!(store.get(id).unwrap().style.stroke, "#0000ff");
    }

    #[test]
    fn test_disjoint_updates_commute() {
        // Same shape, disjoint fields: both orders produce an
        // identical store state (including last_revision).
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        let color = Operation::update(2, 1, id, ShapeAttrs::default().stroke("#ff0000"));
        let moved = Operation::update(3, 1, id, ShapeAttrs::default().position(Point::new(5.0, 5.0)));

        let mut a = ShapeStore::new();
        a.apply(&Operation::create(1, 0, shape.clone())).unwrap();
        let mut b = a.clone();

        a.apply(&color).unwrap();
        a.apply(&moved).unwrap();
        b.apply(&moved).unwrap();
        b.apply(&color).unwrap();

        assert_eq!(a.get(id), b.get(id));
        assert_eq!(a.revision(), b.revision());
    }

    #[test]
    fn test_reorder() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        store.apply(&Operation::create(1, 0, shape)).unwrap();

        let delta = store.apply(&Operation::reorder(2, 1, id, 5)).unwrap();
        assert_eq!(delta, Delta::Reordered { shape_id: id, z_index: 5 });
        assert_eq!(store.get(id).unwrap().z_index, 5);
    }

    #[test]
    fn test_snapshot_ordered_by_z() {
        let mut store = ShapeStore::new();
        let bottom = rect_at(0.0, 0.0);
        let top = rect_at(1.0, 1.0);
        store.apply(&Operation::create(1, 0, top.clone())).unwrap();
        store.apply(&Operation::create(2, 1, bottom.clone())).unwrap();
        store.apply(&Operation::reorder(3, 2, top.id, 10)).unwrap();
        store.apply(&Operation::reorder(4, 3, bottom.id, -1)).unwrap();

        let (revision, shapes) = store.snapshot();
        assert_eq!(revision, 4);
        assert_eq!(shapes[0].id, bottom.id);
        assert_eq!(shapes[1].id, top.id);
    }

    #[test]
    fn test_snapshot_recreate_roundtrip() {
        // snapshot() re-applied via sequential Creates reproduces the
        // same shape set.
        let mut store = ShapeStore::new();
        for i in 0..5 {
            store
                .apply(&Operation::create(i, store.revision(), rect_at(i as f32, 0.0)))
                .unwrap();
        }
        let (_, shapes) = store.snapshot();

        let mut rebuilt = ShapeStore::new();
        for shape in &shapes {
            rebuilt
                .apply(&Operation::create(0, rebuilt.revision(), shape.clone()))
                .unwrap();
        }
        let (_, rebuilt_shapes) = rebuilt.snapshot();
        let ids: Vec<Uuid> = shapes.iter().map(|s| s.id).collect();
        let rebuilt_ids: Vec<Uuid> = rebuilt_shapes.iter().map(|s| s.id).collect();
        assert_eq!(ids, rebuilt_ids);
        for (a, b) in shapes.iter().zip(rebuilt_shapes.iter()) {
            assert_eq!(a.geometry, b.geometry);
            assert_eq!(a.style, b.style);
            assert_eq!(a.z_index, b.z_index);
        }
    }

    #[test]
    fn test_revision_strictly_sequential() {
        let mut store = ShapeStore::new();
        for i in 0..100u64 {
            store
                .apply(&Operation::create(i, store.revision(), rect_at(i as f32, 0.0)))
                .unwrap();
            assert_eq!(store.revision(), i + 1);
        }
    }

    #[test]
    fn test_from_snapshot_resumes_revision() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        store.apply(&Operation::create(1, 0, shape)).unwrap();
        let (revision, shapes) = store.snapshot();

        let mut restored = ShapeStore::from_snapshot(revision, shapes);
        assert_eq!(restored.revision(), 1);
        restored
            .apply(&Operation::create(2, 1, rect_at(5.0, 5.0)))
            .unwrap();
        assert_eq!(restored.revision(), 2);
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_last_revision_never_exceeds_board_revision() {
        let mut store = ShapeStore::new();
        let shape = rect_at(0.0, 0.0);
        let id = shape.id;
        store.apply(&Operation::create(1, 0, shape)).unwrap();
        store
            .apply(&Operation::update(2, 1, id, ShapeAttrs::default().stroke("#123456")))
            .unwrap();
        store.apply(&Operation::delete(3, 2, Uuid::new_v4())).unwrap();

        for s in store.snapshot().1 {
            assert!(s.last_revision <= store.revision());
        }
    }
}
