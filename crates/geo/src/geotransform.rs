use std::fmt::Debug;

use approx::{AbsDiffEq, RelativeEq};

use crate::{Point, RasterSize, Rect};

/// Affine mapping from pixel/line coordinates to georeferenced coordinates.
#[derive(Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GeoTransform([f64; 6]);

impl GeoTransform {
    /// Creates a new `GeoTransform` from the provided coefficients.
    ///
    /// The coefficients are in the order: [top left x, pixel width, rotation (0 if north is up), top left y, rotation (0 if north is up), pixel height].
    pub const fn new(coefficients: [f64; 6]) -> Self {
        GeoTransform(coefficients)
    }

    /// North up transform without rotation terms
    pub const fn north_up(top_left_x: f64, top_left_y: f64, cell_size_x: f64, cell_size_y: f64) -> Self {
        Self::new([top_left_x, cell_size_x, 0.0, top_left_y, 0.0, cell_size_y])
    }

    /// Translates a pixel position to a point.
    /// Position (0, 0) is the top left corner of the raster.
    pub fn apply(&self, col: f64, row: f64) -> Point<f64> {
        let x = self.0[0] + self.0[1] * col + self.0[2] * row;
        let y = self.0[3] + self.0[4] * col + self.0[5] * row;
        Point::new(x, y)
    }

    pub fn top_left(&self) -> Point {
        Point::new(self.0[0], self.0[3])
    }

    /// The bottom right corner of a raster with the given size, rotation terms are ignored
    pub fn bottom_right(&self, size: RasterSize) -> Point {
        Point::new(
            self.0[0] + size.cols as f64 * self.0[1],
            self.0[3] + size.rows as f64 * self.0[5],
        )
    }

    /// The bounding box of a raster with the given size, rotation terms are ignored
    pub fn bounds(&self, size: RasterSize) -> Rect {
        Rect::from_points(self.top_left(), self.bottom_right(size))
    }

    /// The horizontal cell size
    pub fn cell_size_x(&self) -> f64 {
        self.0[1]
    }

    /// The vertical cell size (negative for north up rasters)
    pub fn cell_size_y(&self) -> f64 {
        self.0[5]
    }

    /// The largest absolute cell size of both axes
    pub fn max_cell_size(&self) -> f64 {
        self.0[1].abs().max(self.0[5].abs())
    }

    /// True when the transform contains rotation or shear terms
    pub fn has_rotation(&self) -> bool {
        self.0[2] != 0.0 || self.0[4] != 0.0
    }

    /// Returns the coefficients of the transformation.
    pub fn coefficients(&self) -> [f64; 6] {
        self.0
    }
}

impl From<[f64; 6]> for GeoTransform {
    fn from(coefficients: [f64; 6]) -> Self {
        GeoTransform(coefficients)
    }
}

impl From<GeoTransform> for [f64; 6] {
    fn from(geo_trans: GeoTransform) -> [f64; 6] {
        geo_trans.0
    }
}

impl Debug for GeoTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "GeoTransform(topleft: ({}, {}), pixel_width: {}, pixel_height: {}, rotation: ({}, {}))",
            self.0[0],
            self.0[3],
            self.cell_size_x(),
            self.cell_size_y(),
            self.0[2],
            self.0[4]
        )
    }
}

impl AbsDiffEq for GeoTransform {
    type Epsilon = f64;

    fn default_epsilon() -> Self::Epsilon {
        f64::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.0.abs_diff_eq(&other.0, epsilon)
    }
}

impl RelativeEq for GeoTransform {
    fn default_max_relative() -> Self::Epsilon {
        f64::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: Self::Epsilon, max_relative: Self::Epsilon) -> bool {
        self.0.relative_eq(&other.0, epsilon, max_relative)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn raster_bounds() {
        let gt = GeoTransform::north_up(-10.0, 90.0, 2.0, -2.0);
        let bounds = gt.bounds(RasterSize::with_rows_cols(50, 50));

        assert_relative_eq!(bounds.top_left(), Point::new(-10.0, 90.0));
        assert_relative_eq!(bounds.bottom_right(), Point::new(90.0, -10.0));
        assert_eq!(gt.max_cell_size(), 2.0);
        assert!(!gt.has_rotation());
        assert!(GeoTransform::new([0.0, 1.0, 0.1, 0.0, 0.0, -1.0]).has_rotation());
    }
}
