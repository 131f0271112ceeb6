//! Planar geometry primitives for the resolver tiers.
//!
//! Everything works in image pixel coordinates (y grows downward). Lines are
//! kept in slope/intercept form because that is how the pose-geometry
//! collaborator publishes the pointing ray; vertical lines are therefore not
//! representable, and the degenerate cases surface as [`GeometryError`]
//! instead of panicking.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::BoundingBox;

// -------------------- Errors --------------------

/// Degenerate geometry during a tier evaluation.
///
/// These are local to a single candidate object: the resolver skips the
/// candidate and keeps going, it never aborts the whole resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryError {
    /// Perpendicular construction against a horizontal line (slope 0).
    DivisionByZero,
    /// Two lines with equal slope have no single intersection point.
    ParallelLines,
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::DivisionByZero => {
                write!(f, "cannot build a perpendicular to a zero-slope line")
            }
            GeometryError::ParallelLines => {
                write!(f, "parallel lines have no intersection point")
            }
        }
    }
}

impl std::error::Error for GeometryError {}

// -------------------- Points --------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

// -------------------- Lines --------------------

/// A non-vertical line `y = slope * x + intercept`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub slope: f64,
    pub intercept: f64,
}

impl Line {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self { slope, intercept }
    }

    pub fn y_at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    /// The line through `point` perpendicular to `self`.
    ///
    /// The perpendicular slope is `-1 / slope`, so a horizontal line has no
    /// representable perpendicular in slope/intercept form.
    pub fn perpendicular_through(&self, point: Point) -> Result<Line, GeometryError> {
        if self.slope == 0.0 {
            return Err(GeometryError::DivisionByZero);
        }
        let slope = -1.0 / self.slope;
        let intercept = point.y - slope * point.x;
        Ok(Line { slope, intercept })
    }

    /// Intersection point of two non-parallel lines.
    pub fn intersection(&self, other: &Line) -> Result<Point, GeometryError> {
        if self.slope == other.slope {
            return Err(GeometryError::ParallelLines);
        }
        let x = (other.intercept - self.intercept) / (self.slope - other.slope);
        let y = self.y_at(x);
        Ok(Point { x, y })
    }

    /// The chord of this line spanning `x` in `[0, width]`, used to extend
    /// the pointing ray across the whole camera frame.
    pub fn span(&self, width: f64) -> Segment {
        Segment {
            a: Point {
                x: 0.0,
                y: self.y_at(0.0),
            },
            b: Point {
                x: width,
                y: self.y_at(width),
            },
        }
    }
}

// -------------------- Segments --------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub a: Point,
    pub b: Point,
}

impl Segment {
    pub fn new(a: Point, b: Point) -> Self {
        Self { a, b }
    }

    /// Proper or touching intersection with another segment. Endpoints and
    /// collinear overlap count as intersection.
    pub fn intersects(&self, other: &Segment) -> bool {
        let d1 = orientation(other.a, other.b, self.a);
        let d2 = orientation(other.a, other.b, self.b);
        let d3 = orientation(self.a, self.b, other.a);
        let d4 = orientation(self.a, self.b, other.b);

        if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
            && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
        {
            return true;
        }

        (d1 == 0.0 && on_segment(other.a, other.b, self.a))
            || (d2 == 0.0 && on_segment(other.a, other.b, self.b))
            || (d3 == 0.0 && on_segment(self.a, self.b, other.a))
            || (d4 == 0.0 && on_segment(self.a, self.b, other.b))
    }
}

/// Cross product of (b - a) x (p - a); sign gives the turn direction.
fn orientation(a: Point, b: Point, p: Point) -> f64 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Whether `p`, already known collinear with `a`-`b`, lies within the segment.
fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

// -------------------- Polygons --------------------

/// A closed polygon; edges run between consecutive vertices and from the
/// last vertex back to the first.
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(vertices: Vec<Point>) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn edges(&self) -> impl Iterator<Item = Segment> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| Segment {
            a: self.vertices[i],
            b: self.vertices[(i + 1) % n],
        })
    }

    /// Whether `segment` crosses or touches any edge of the polygon.
    pub fn intersects_segment(&self, segment: &Segment) -> bool {
        self.edges().any(|edge| edge.intersects(segment))
    }
}

impl From<&BoundingBox> for Polygon {
    fn from(bbox: &BoundingBox) -> Self {
        Polygon::new(bbox.corners().to_vec())
    }
}

/// Tier 2 primitive: does the pointing ray, extended across the full frame
/// width, cross the bounding-box polygon?
pub fn ray_intersects_polygon(ray: &Line, polygon: &Polygon, frame_width: f64) -> bool {
    polygon.intersects_segment(&ray.span(frame_width))
}
