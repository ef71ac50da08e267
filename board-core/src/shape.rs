//! Shape variants, geometry, and partial attribute updates.
//!
//! A [`Shape`] is a drawable element on the whiteboard. Shapes are only
//! ever mutated by the store when it applies a sequenced operation;
//! sessions never touch them directly.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A 2D point in board coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Shape type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeKind {
    Line,
    Rectangle,
    Ellipse,
    Freehand,
    Text,
    Image,
}

/// Geometry payload: an ordered point sequence (line, freehand) or a
/// bounding box (rectangle, ellipse, text, image).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geometry {
    Path { points: Vec<Point> },
    Bounds(Rect),
}

impl Geometry {
    /// The anchor point of this geometry: the first path point, or the
    /// bounding box origin.
    pub fn origin(&self) -> Point {
        match self {
            Geometry::Path { points } => points.first().copied().unwrap_or_default(),
            Geometry::Bounds(rect) => rect.origin(),
        }
    }

    /// Translate the geometry so its anchor lands on `target`.
    pub fn translate_to(&mut self, target: Point) {
        let origin = self.origin();
        let dx = target.x - origin.x;
        let dy = target.y - origin.y;
        match self {
            Geometry::Path { points } => {
                for p in points.iter_mut() {
                    p.x += dx;
                    p.y += dy;
                }
            }
            Geometry::Bounds(rect) => {
                rect.x = target.x;
                rect.y = target.y;
            }
        }
    }

    /// Whether the geometry carries no coordinates at all.
    pub fn is_empty(&self) -> bool {
        match self {
            Geometry::Path { points } => points.is_empty(),
            Geometry::Bounds(_) => false,
        }
    }
}

/// Visual style attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    /// Stroke color (CSS color string, e.g. "#000000")
    pub stroke: String,
    /// Fill color (None = unfilled)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    pub stroke_width: f32,
    pub opacity: f32,
    /// Text content (Text shapes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Blob-store reference (Image shapes)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: "#000000".to_string(),
            fill: None,
            stroke_width: 2.0,
            opacity: 1.0,
            text: None,
            image_ref: None,
        }
    }
}

/// A drawable element on the whiteboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    /// Unique within a board
    pub id: Uuid,
    pub kind: ShapeKind,
    pub geometry: Geometry,
    pub style: Style,
    /// Stacking order (higher draws on top)
    pub z_index: i64,
    /// Board revision that last wrote this shape. Assigned by the
    /// store; client-supplied values are overwritten on Create.
    #[serde(default)]
    pub last_revision: u64,
}

impl Shape {
    /// Create a shape with a fresh id and default style.
    pub fn new(kind: ShapeKind, geometry: Geometry) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            geometry,
            style: Style::default(),
            z_index: 0,
            last_revision: 0,
        }
    }

    /// Create with an explicit id (for testing and resync replay).
    pub fn with_id(id: Uuid, kind: ShapeKind, geometry: Geometry) -> Self {
        Self {
            id,
            kind,
            geometry,
            style: Style::default(),
            z_index: 0,
            last_revision: 0,
        }
    }
}

/// One updatable attribute field. Last-writer-wins conflict resolution
/// is keyed per (shape, field).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrField {
    Position,
    Geometry,
    Stroke,
    Fill,
    StrokeWidth,
    Opacity,
    Text,
    ImageRef,
}

/// A partial attribute update: only the `Some` fields are written.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShapeAttrs {
    /// Move the shape so its geometry anchor lands here
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Point>,
    /// Replace the geometry wholesale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl ShapeAttrs {
    /// No fields set.
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// The set of fields this update writes.
    pub fn fields(&self) -> Vec<AttrField> {
        let mut fields = Vec::new();
        if self.position.is_some() {
            fields.push(AttrField::Position);
        }
        if self.geometry.is_some() {
            fields.push(AttrField::Geometry);
        }
        if self.stroke.is_some() {
            fields.push(AttrField::Stroke);
        }
        if self.fill.is_some() {
            fields.push(AttrField::Fill);
        }
        if self.stroke_width.is_some() {
            fields.push(AttrField::StrokeWidth);
        }
        if self.opacity.is_some() {
            fields.push(AttrField::Opacity);
        }
        if self.text.is_some() {
            fields.push(AttrField::Text);
        }
        if self.image_ref.is_some() {
            fields.push(AttrField::ImageRef);
        }
        fields
    }

    /// Apply this update to a shape. Only the named fields change;
    /// geometry is applied before position so an update carrying both
    /// ends up at the requested position.
    pub fn apply_to(&self, shape: &mut Shape) {
        if let Some(ref geometry) = self.geometry {
            shape.geometry = geometry.clone();
        }
        if let Some(position) = self.position {
            shape.geometry.translate_to(position);
        }
        if let Some(ref stroke) = self.stroke {
            shape.style.stroke = stroke.clone();
        }
        if let Some(ref fill) = self.fill {
            shape.style.fill = Some(fill.clone());
        }
        if let Some(stroke_width) = self.stroke_width {
            shape.style.stroke_width = stroke_width;
        }
        if let Some(opacity) = self.opacity {
            shape.style.opacity = opacity;
        }
        if let Some(ref text) = self.text {
            shape.style.text = Some(text.clone());
        }
        if let Some(ref image_ref) = self.image_ref {
            shape.style.image_ref = Some(image_ref.clone());
        }
    }

    /// Builder: set position.
    pub fn position(mut self, p: Point) -> Self {
        self.position = Some(p);
        self
    }

    /// Builder: set stroke color.
    pub fn stroke(mut self, color: impl Into<String>) -> Self {
        self.stroke = Some(color.into());
        self
    }

    /// Builder: set text content.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Builder: replace geometry.
    pub fn geometry(mut self, g: Geometry) -> Self {
        self.geometry = Some(g);
        self
    }
}
