//! Pixel windows in the raster coordinate space of a band.

use crate::{Error, RasterSize, Result};

/// Integral pixel window, `x_off`/`y_off` are the column and row of the top left pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PixelWindow {
    pub x_off: usize,
    pub y_off: usize,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    pub const fn new(x_off: usize, y_off: usize, cols: usize, rows: usize) -> Self {
        PixelWindow { x_off, y_off, cols, rows }
    }

    /// The window covering a complete raster
    pub const fn full(size: RasterSize) -> Self {
        PixelWindow::new(0, 0, size.cols, size.rows)
    }

    pub fn size(&self) -> RasterSize {
        RasterSize::with_rows_cols(self.rows, self.cols)
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    pub fn x_end(&self) -> usize {
        self.x_off + self.cols
    }

    pub fn y_end(&self) -> usize {
        self.y_off + self.rows
    }

    /// True when the window lies completely inside a raster of the given size
    pub fn fits_in(&self, size: RasterSize) -> bool {
        self.x_end() <= size.cols && self.y_end() <= size.rows
    }

    /// Fails when the window does not lie completely inside a raster of the given size
    pub fn check_bounds(&self, size: RasterSize) -> Result<()> {
        if !self.fits_in(size) {
            return Err(Error::InvalidArgument(format!(
                "Window (x: {}, y: {}, cols: {}, rows: {}) exceeds the raster dimensions {size}",
                self.x_off, self.y_off, self.cols, self.rows
            )));
        }

        Ok(())
    }

    /// Clips the window at the right and bottom edges of a raster of the given size
    pub fn clipped(&self, size: RasterSize) -> PixelWindow {
        let x_off = self.x_off.min(size.cols);
        let y_off = self.y_off.min(size.rows);
        PixelWindow::new(x_off, y_off, self.x_end().min(size.cols) - x_off, self.y_end().min(size.rows) - y_off)
    }
}

impl From<PixelWindow> for SourceWindow {
    fn from(win: PixelWindow) -> Self {
        SourceWindow::new(win.x_off as f64, win.y_off as f64, win.cols as f64, win.rows as f64)
    }
}

/// Window with sub pixel precision, used as source window for resampled reads.
/// The window may extend beyond the raster, pixels outside the raster are clamped to the edge.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceWindow {
    pub x_off: f64,
    pub y_off: f64,
    pub x_size: f64,
    pub y_size: f64,
}

impl SourceWindow {
    pub const fn new(x_off: f64, y_off: f64, x_size: f64, y_size: f64) -> Self {
        SourceWindow {
            x_off,
            y_off,
            x_size,
            y_size,
        }
    }

    /// True when the window maps 1:1 on integral pixels of the given buffer size
    pub fn is_pixel_aligned(&self, buf_size: RasterSize) -> bool {
        self.x_off.fract() == 0.0
            && self.y_off.fract() == 0.0
            && self.x_off >= 0.0
            && self.y_off >= 0.0
            && self.x_size == buf_size.cols as f64
            && self.y_size == buf_size.rows as f64
    }

    /// Same window expressed relative to a new origin
    pub fn translated(&self, dx: f64, dy: f64) -> SourceWindow {
        SourceWindow::new(self.x_off + dx, self.y_off + dy, self.x_size, self.y_size)
    }
}
