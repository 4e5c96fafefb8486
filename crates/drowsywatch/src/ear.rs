//! Eye aspect ratio (EAR) over the 68-point facial landmark layout.
//!
//! In the 68-point layout the eyes occupy indices 36-41 and 42-47, each
//! ordered outer corner, two upper-lid points, inner corner, two lower-lid
//! points. EAR is the mean lid opening divided by the eye width: roughly 0.3
//! for an open eye, approaching 0 as the lids close.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Average EAR below which a face is considered drowsy.
pub const DROWSY_EAR_THRESHOLD: f64 = 0.25;

/// Number of points produced by the landmark predictor.
pub const LANDMARK_COUNT: usize = 68;

/// Landmark index ranges for each eye.
pub mod eye_indices {
    use std::ops::Range;

    /// Subject's right eye (image left).
    pub const LEFT_EYE: Range<usize> = 36..42;
    /// Subject's left eye (image right).
    pub const RIGHT_EYE: Range<usize> = 42..48;
}

/// A 2-D pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// The six contour points of one eye.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyePoints(pub [Point; 6]);

impl EyePoints {
    /// Compute this eye's aspect ratio.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        eye_aspect_ratio(self)
    }
}

/// Eye aspect ratio: `(|p2-p6| + |p3-p5|) / (2 * |p1-p4|)`.
///
/// Returns 0.0 when the eye corners coincide.
#[must_use]
pub fn eye_aspect_ratio(eye: &EyePoints) -> f64 {
    let [p1, p2, p3, p4, p5, p6] = &eye.0;
    let vertical = p2.distance(p6) + p3.distance(p5);
    let horizontal = p1.distance(p4);
    if horizontal <= f64::EPSILON {
        return 0.0;
    }
    vertical / (2.0 * horizontal)
}

/// Whether an EAR value counts as drowsy under `threshold`.
#[must_use]
pub fn is_drowsy(ear: f64, threshold: f64) -> bool {
    ear < threshold
}

/// The 68 facial landmarks of one face.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: Vec<Point>,
}

impl Landmarks {
    /// Wrap a predictor's output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LandmarkCount`] unless exactly 68 points are given.
    pub fn new(points: Vec<Point>) -> Result<Self> {
        if points.len() != LANDMARK_COUNT {
            return Err(Error::LandmarkCount {
                expected: LANDMARK_COUNT,
                actual: points.len(),
            });
        }
        Ok(Self { points })
    }

    /// All points in predictor order.
    #[must_use]
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    fn eye(&self, range: std::ops::Range<usize>) -> EyePoints {
        let mut eye = [Point::default(); 6];
        eye.copy_from_slice(&self.points[range]);
        EyePoints(eye)
    }

    /// Points 36-41.
    #[must_use]
    pub fn left_eye(&self) -> EyePoints {
        self.eye(eye_indices::LEFT_EYE)
    }

    /// Points 42-47.
    #[must_use]
    pub fn right_eye(&self) -> EyePoints {
        self.eye(eye_indices::RIGHT_EYE)
    }

    /// Mean EAR of both eyes.
    #[must_use]
    pub fn average_ear(&self) -> f64 {
        (self.left_eye().aspect_ratio() + self.right_eye().aspect_ratio()) / 2.0
    }

    /// Axis-aligned bounding box `(min_x, min_y, max_x, max_y)` of all points.
    #[must_use]
    pub fn bounds(&self) -> (f64, f64, f64, f64) {
        self.points.iter().fold(
            (f64::MAX, f64::MAX, f64::MIN, f64::MIN),
            |(min_x, min_y, max_x, max_y), p| {
                (min_x.min(p.x), min_y.min(p.y), max_x.max(p.x), max_y.max(p.y))
            },
        )
    }
}
