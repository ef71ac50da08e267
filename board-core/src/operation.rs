//! Edit operations and the deltas they produce.
//!
//! An [`Operation`] is an atomic client intent. It is immutable once
//! created and carries the client's local sequence number plus the
//! board revision it was based on (its causal parent). The sequencer
//! assigns total order; the store turns each accepted operation into
//! a [`Delta`], the minimal change to broadcast.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shape::{Geometry, Shape, ShapeAttrs, ShapeKind};

/// An atomic edit intent from one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Client-local sequence number (echoed back in the ack)
    pub client_seq: u64,
    /// Board revision this operation was based on (causal parent)
    pub based_revision: u64,
    #[serde(flatten)]
    pub kind: OperationKind,
}

/// Operation variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OperationKind {
    Create { shape: Shape },
    Update { shape_id: Uuid, attrs: ShapeAttrs },
    Delete { shape_id: Uuid },
    Reorder { shape_id: Uuid, z_index: i64 },
}

impl Operation {
    pub fn create(client_seq: u64, based_revision: u64, shape: Shape) -> Self {
        Self {
            client_seq,
            based_revision,
            kind: OperationKind::Create { shape },
        }
    }

    pub fn update(client_seq: u64, based_revision: u64, shape_id: Uuid, attrs: ShapeAttrs) -> Self {
        Self {
            client_seq,
            based_revision,
            kind: OperationKind::Update { shape_id, attrs },
        }
    }

    pub fn delete(client_seq: u64, based_revision: u64, shape_id: Uuid) -> Self {
        Self {
            client_seq,
            based_revision,
            kind: OperationKind::Delete { shape_id },
        }
    }

    pub fn reorder(client_seq: u64, based_revision: u64, shape_id: Uuid, z_index: i64) -> Self {
        Self {
            client_seq,
            based_revision,
            kind: OperationKind::Reorder { shape_id, z_index },
        }
    }

    /// The shape this operation targets.
    pub fn shape_id(&self) -> Uuid {
        match &self.kind {
            OperationKind::Create { shape } => shape.id,
            OperationKind::Update { shape_id, .. }
            | OperationKind::Delete { shape_id }
            | OperationKind::Reorder { shape_id, .. } => *shape_id,
        }
    }

    /// Structural validation against the board's current revision.
    ///
    /// Catches malformed intents before they reach the store: nil
    /// shape ids, empty path geometry, updates naming no fields, and
    /// causal parents the board has not reached yet.
    pub fn validate(&self, current_revision: u64) -> Result<(), ValidationError> {
        if self.based_revision > current_revision {
            return Err(ValidationError::FutureRevision {
                based: self.based_revision,
                current: current_revision,
            });
        }
        if self.shape_id().is_nil() {
            return Err(ValidationError::NilShapeId);
        }
        match &self.kind {
            OperationKind::Create { shape } => {
                if shape.geometry.is_empty() {
                    return Err(ValidationError::EmptyGeometry);
                }
                let min_points = match shape.kind {
                    ShapeKind::Line => 2,
                    ShapeKind::Freehand => 1,
                    _ => 0,
                };
                if let Geometry::Path { points } = &shape.geometry {
                    if points.len() < min_points {
                        return Err(ValidationError::EmptyGeometry);
                    }
                }
            }
            OperationKind::Update { attrs, .. } => {
                if attrs.is_empty() {
                    return Err(ValidationError::EmptyUpdate);
                }
                if let Some(g) = &attrs.geometry {
                    if g.is_empty() {
                        return Err(ValidationError::EmptyGeometry);
                    }
                }
            }
            OperationKind::Delete { .. } | OperationKind::Reorder { .. } => {}
        }
        Ok(())
    }
}

/// Structural validation failures (surfaced as `invalid_operation`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NilShapeId,
    EmptyGeometry,
    EmptyUpdate,
    FutureRevision { based: u64, current: u64 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NilShapeId => write!(f, "shape id must not be nil"),
            ValidationError::EmptyGeometry => write!(f, "geometry has no points"),
            ValidationError::EmptyUpdate => write!(f, "update names no fields"),
            ValidationError::FutureRevision { based, current } => {
                write!(f, "based revision {based} is ahead of board revision {current}")
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// The minimal visible change produced by one accepted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum Delta {
    Created { shape: Shape },
    Updated { shape_id: Uuid, attrs: ShapeAttrs },
    Deleted { shape_id: Uuid },
    Reordered { shape_id: Uuid, z_index: i64 },
    /// Accepted no-op (e.g. update of a concurrently deleted shape).
    /// Still advances the revision so clients stay in lockstep.
    None,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        matches!(self, Delta::None)
    }
}
