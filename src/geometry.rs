//! Geometry types and the label clipper.
//!
//! Labels carry a polygon in image pixel coordinates. Before a label is
//! persisted its polygon is intersected with the image rectangle
//! [0,0]–[width,height]; the stored bounding box is always derived from the
//! clipped vertices, never from the input.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Minimum number of vertices for a valid polygon ring.
pub const MIN_POLYGON_VERTICES: usize = 3;

/// A 2D point in image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Top-left corner X coordinate
    pub x: f64,
    /// Top-left corner Y coordinate
    pub y: f64,
    /// Width of the box
    pub width: f64,
    /// Height of the box
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Get the area of the box.
    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// A closed polygon ring. The last vertex implicitly connects to the first.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    /// The vertices of the ring in order.
    pub vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    /// Build a polygon from (x, y) coordinate pairs.
    pub fn from_coords(coords: &[(f64, f64)]) -> Self {
        Self {
            vertices: coords.iter().map(|&(x, y)| Point::new(x, y)).collect(),
        }
    }

    /// Build the rectangle polygon for a bounding box, counter-clockwise.
    pub fn from_bbox(bbox: &BoundingBox) -> Self {
        Self::from_coords(&[
            (bbox.x, bbox.y),
            (bbox.x + bbox.width, bbox.y),
            (bbox.x + bbox.width, bbox.y + bbox.height),
            (bbox.x, bbox.y + bbox.height),
        ])
    }

    /// Check if the ring has enough vertices to enclose an area.
    pub fn is_valid(&self) -> bool {
        self.vertices.len() >= MIN_POLYGON_VERTICES
    }

    /// Get the axis-aligned bounding box of the polygon.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        if self.vertices.is_empty() {
            return None;
        }

        let mut min_x = f64::INFINITY;
        let mut min_y = f64::INFINITY;
        let mut max_x = f64::NEG_INFINITY;
        let mut max_y = f64::NEG_INFINITY;

        for p in &self.vertices {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        Some(BoundingBox::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }
}

/// A polygon clipped to its image bounds, plus the derived bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundedGeometry {
    /// The clipped polygon.
    pub geometry: Polygon,
    /// Bounding box minimum X of the clipped polygon.
    pub x: f64,
    /// Bounding box minimum Y of the clipped polygon.
    pub y: f64,
    /// Bounding box width of the clipped polygon.
    pub width: f64,
    /// Bounding box height of the clipped polygon.
    pub height: f64,
}

/// Clip a polygon to the image rectangle [0,0]–[width,height].
///
/// Returns the intersection polygon and its bounding box, or
/// [`Error::OutOfBounds`] when the polygon lies entirely outside the image.
/// Clipping an already-contained polygon returns it unchanged.
///
/// Pure and side-effect free; safe to call concurrently.
pub fn clip_to_bounds(width: u32, height: u32, polygon: &Polygon) -> Result<BoundedGeometry> {
    if !polygon.is_valid() {
        return Err(Error::invalid_input(format!(
            "A label polygon needs at least {} vertices, got {}",
            MIN_POLYGON_VERTICES,
            polygon.vertices.len()
        )));
    }

    let w = width as f64;
    let h = height as f64;

    // Sutherland-Hodgman against the four image edges.
    let mut vertices = polygon.vertices.clone();
    for edge in [
        Edge::Left,
        Edge::Right(w),
        Edge::Top,
        Edge::Bottom(h),
    ] {
        vertices = clip_against_edge(&vertices, edge);
        if vertices.is_empty() {
            return Err(Error::OutOfBounds);
        }
    }

    let clipped = Polygon::new(vertices);
    if !clipped.is_valid() {
        return Err(Error::OutOfBounds);
    }

    // Derived from the clipped vertices, never from the input.
    let bbox = clipped
        .bounding_box()
        .ok_or(Error::OutOfBounds)?;
    if bbox.width <= 0.0 || bbox.height <= 0.0 {
        return Err(Error::OutOfBounds);
    }

    Ok(BoundedGeometry {
        geometry: clipped,
        x: bbox.x,
        y: bbox.y,
        width: bbox.width,
        height: bbox.height,
    })
}

/// One half-plane of the image rectangle.
#[derive(Clone, Copy)]
enum Edge {
    /// x >= 0
    Left,
    /// x <= width
    Right(f64),
    /// y >= 0
    Top,
    /// y <= height
    Bottom(f64),
}

impl Edge {
    fn inside(&self, p: &Point) -> bool {
        match self {
            Edge::Left => p.x >= 0.0,
            Edge::Right(w) => p.x <= *w,
            Edge::Top => p.y >= 0.0,
            Edge::Bottom(h) => p.y <= *h,
        }
    }

    /// Intersection of segment a-b with this edge line.
    fn intersect(&self, a: &Point, b: &Point) -> Point {
        match self {
            Edge::Left => intersect_vertical(a, b, 0.0),
            Edge::Right(w) => intersect_vertical(a, b, *w),
            Edge::Top => intersect_horizontal(a, b, 0.0),
            Edge::Bottom(h) => intersect_horizontal(a, b, *h),
        }
    }
}

fn intersect_vertical(a: &Point, b: &Point, x: f64) -> Point {
    let t = (x - a.x) / (b.x - a.x);
    Point::new(x, a.y + t * (b.y - a.y))
}

fn intersect_horizontal(a: &Point, b: &Point, y: f64) -> Point {
    let t = (y - a.y) / (b.y - a.y);
    Point::new(a.x + t * (b.x - a.x), y)
}

fn clip_against_edge(vertices: &[Point], edge: Edge) -> Vec<Point> {
    let mut output = Vec::with_capacity(vertices.len() + 1);

    for i in 0..vertices.len() {
        let current = vertices[i];
        let previous = vertices[(i + vertices.len() - 1) % vertices.len()];

        let current_inside = edge.inside(&current);
        let previous_inside = edge.inside(&previous);

        if current_inside {
            if !previous_inside {
                output.push(edge.intersect(&previous, &current));
            }
            output.push(current);
        } else if previous_inside {
            output.push(edge.intersect(&previous, &current));
        }
    }

    output
}
