//! # board-core — Whiteboard document model
//!
//! The authoritative data model for a collaborative whiteboard board:
//! shapes, edit operations, broadcastable deltas, and the per-board
//! [`ShapeStore`] that applies already-sequenced operations.
//!
//! ```text
//! ┌───────────┐   Operation    ┌────────────┐   Delta
//! │ Sequencer │ ─────────────► │ ShapeStore │ ─────────► broadcast
//! │ (upstream)│  (total order) │ (rev += 1) │
//! └───────────┘                └────────────┘
//! ```
//!
//! This crate is synchronous and I/O-free; ordering, sessions, and
//! transport live in `board-sync`.
//!
//! ## Modules
//!
//! - [`shape`] — shape variants, geometry, style, partial attributes
//! - [`operation`] — edit operations and resulting deltas
//! - [`store`] — the authoritative per-board shape collection

pub mod operation;
pub mod shape;
pub mod store;

// Re-exports for convenience
pub use operation::{Delta, Operation, OperationKind, ValidationError};
pub use shape::{AttrField, Geometry, Point, Rect, Shape, ShapeAttrs, ShapeKind, Style};
pub use store::{ApplyError, ShapeStore};
