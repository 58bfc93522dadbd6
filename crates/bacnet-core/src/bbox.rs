use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Errors produced when constructing a [`BoundingBox`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxError {
    #[error("degenerate bounding box ({x1}, {y1}) - ({x2}, {y2}): need x1 < x2 and y1 < y2")]
    Degenerate { x1: i32, y1: i32, x2: i32, y2: i32 },
}

/// Axis-aligned pixel rectangle `(x1, y1) - (x2, y2)` with `x1 < x2`, `y1 < y2`.
///
/// Geometric predicates treat both edges as inclusive, matching how the
/// segmentation stage crops `x1..=x2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Result<Self, BoxError> {
        if x1 >= x2 || y1 >= y2 {
            return Err(BoxError::Degenerate { x1, y1, x2, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Build from a top-left corner and a size.
    pub fn from_xywh(x: i32, y: i32, width: i32, height: i32) -> Result<Self, BoxError> {
        Self::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    #[inline]
    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    #[inline]
    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    #[inline]
    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    /// Exact center, possibly on a half pixel.
    #[inline]
    pub fn center(&self) -> Point2<f32> {
        Point2::new(
            self.x1 as f32 + self.width() as f32 / 2.0,
            self.y1 as f32 + self.height() as f32 / 2.0,
        )
    }

    /// Center rounded down to whole pixels.
    #[inline]
    pub fn center_floor(&self) -> Point2<i32> {
        Point2::new(
            (self.x1 + self.x2).div_euclid(2),
            (self.y1 + self.y2).div_euclid(2),
        )
    }

    /// Corners in TL, TR, BR, BL order.
    pub fn corners(&self) -> [Point2<i32>; 4] {
        [
            Point2::new(self.x1, self.y1),
            Point2::new(self.x2, self.y1),
            Point2::new(self.x2, self.y2),
            Point2::new(self.x1, self.y2),
        ]
    }

    /// Grow every side by `margin` pixels.
    pub fn inflate(&self, margin: i32) -> Self {
        Self {
            x1: self.x1 - margin,
            y1: self.y1 - margin,
            x2: self.x2 + margin,
            y2: self.y2 + margin,
        }
    }

    #[inline]
    pub fn contains_point(&self, p: Point2<i32>) -> bool {
        self.x1 <= p.x && p.x <= self.x2 && self.y1 <= p.y && p.y <= self.y2
    }

    /// Number of `other`'s corners lying inside `self`.
    pub fn corners_inside(&self, other: &BoundingBox) -> usize {
        other
            .corners()
            .iter()
            .filter(|&&c| self.contains_point(c))
            .count()
    }

    /// Closed-interval intersection test.
    #[inline]
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x1 <= other.x2 && other.x1 <= self.x2 && self.y1 <= other.y2 && other.y1 <= self.y2
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Self {
        Self {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Clip to `[0, width] x [0, height]`. Returns `None` when nothing with a
    /// positive area is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Self> {
        let w = width as i32;
        let h = height as i32;
        Self::new(
            self.x1.clamp(0, w),
            self.y1.clamp(0, h),
            self.x2.clamp(0, w),
            self.y2.clamp(0, h),
        )
        .ok()
    }
}

impl std::fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}, {}, {}]", self.x1, self.y1, self.x2, self.y2)
    }
}
