//! Axis aligned rectangles in georeferenced coordinates.

use approx::{AbsDiffEq, RelativeEq};

use crate::Point;

/// North up bounding box, the top left corner has the minimum x and maximum y coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    top_left: Point,
    bottom_right: Point,
}

impl Rect {
    /// Creates the rectangle spanned by two arbitrary corner points
    pub fn from_points(p1: Point, p2: Point) -> Self {
        Rect {
            top_left: Point::new(p1.x().min(p2.x()), p1.y().max(p2.y())),
            bottom_right: Point::new(p1.x().max(p2.x()), p1.y().min(p2.y())),
        }
    }

    /// Creates a rectangle from its north west and south east corner without reordering.
    /// The result can be inverted, which is reported by `is_empty`.
    pub fn from_nw_se(nw: Point, se: Point) -> Self {
        Rect {
            top_left: nw,
            bottom_right: se,
        }
    }

    pub fn min_x(&self) -> f64 {
        self.top_left.x()
    }

    pub fn max_x(&self) -> f64 {
        self.bottom_right.x()
    }

    pub fn min_y(&self) -> f64 {
        self.bottom_right.y()
    }

    pub fn max_y(&self) -> f64 {
        self.top_left.y()
    }

    pub fn width(&self) -> f64 {
        self.max_x() - self.min_x()
    }

    pub fn height(&self) -> f64 {
        self.max_y() - self.min_y()
    }

    /// True for degenerate (zero area) or inverted rectangles
    pub fn is_empty(&self) -> bool {
        self.min_x() >= self.max_x() || self.min_y() >= self.max_y()
    }

    pub fn top_left(&self) -> Point {
        self.top_left
    }

    pub fn bottom_right(&self) -> Point {
        self.bottom_right
    }

    /// The smallest rectangle containing both rectangles
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_nw_se(
            Point::new(self.min_x().min(other.min_x()), self.max_y().max(other.max_y())),
            Point::new(self.max_x().max(other.max_x()), self.min_y().min(other.min_y())),
        )
    }

    /// The largest rectangle contained in both rectangles.
    /// Disjoint rectangles result in an inverted rectangle, check with `is_empty`.
    pub fn intersection(&self, other: &Rect) -> Rect {
        Rect::from_nw_se(
            Point::new(self.min_x().max(other.min_x()), self.max_y().min(other.max_y())),
            Point::new(self.max_x().min(other.max_x()), self.min_y().max(other.min_y())),
        )
    }

    /// True when the top left and bottom right corners of both rectangles are within `tolerance` on both axes
    pub fn corners_within(&self, other: &Rect, tolerance: f64) -> bool {
        (self.min_x() - other.min_x()).abs() <= tolerance
            && (self.max_y() - other.max_y()).abs() <= tolerance
            && (self.max_x() - other.max_x()).abs() <= tolerance
            && (self.min_y() - other.min_y()).abs() <= tolerance
    }
}

impl AbsDiffEq for Rect {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.top_left.abs_diff_eq(&other.top_left, epsilon) && self.bottom_right.abs_diff_eq(&other.bottom_right, epsilon)
    }
}

impl RelativeEq for Rect {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: Self::Epsilon, max_relative: Self::Epsilon) -> bool {
        self.top_left.relative_eq(&other.top_left, epsilon, max_relative)
            && self.bottom_right.relative_eq(&other.bottom_right, epsilon, max_relative)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn rect(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Rect {
        Rect::from_points(Point::new(min_x, min_y), Point::new(max_x, max_y))
    }

    #[test]
    fn union_and_intersection() {
        let r1 = rect(0.0, 0.0, 100.0, 100.0);
        let r2 = rect(-10.0, -10.0, 90.0, 90.0);

        assert_relative_eq!(r1.union(&r2), rect(-10.0, -10.0, 100.0, 100.0));
        assert_relative_eq!(r1.intersection(&r2), rect(0.0, 0.0, 90.0, 90.0));
        assert_eq!(r1.intersection(&r2).width(), 90.0);
    }

    #[test]
    fn disjoint_intersection_is_empty() {
        let r1 = rect(0.0, 0.0, 10.0, 10.0);
        let r2 = rect(20.0, 20.0, 30.0, 30.0);

        assert!(r1.intersection(&r2).is_empty());
        assert!(!r1.union(&r2).is_empty());
    }

    #[test]
    fn corner_tolerance() {
        let r1 = rect(0.0, 0.0, 10.0, 10.0);
        assert!(r1.corners_within(&rect(0.5, -0.5, 10.5, 9.5), 1.0));
        assert!(!r1.corners_within(&rect(0.0, 0.0, 12.0, 10.0), 1.0));
    }
}
