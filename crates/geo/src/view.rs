//! Read only windowed views on existing raster datasets
//!
//! A view covers a rectangular pixel window of a source dataset, the window can extend beyond
//! the source raster. Pixels outside of the source read as the nodata value of the source band
//! (or 0 if the band has no nodata). No pixel data is copied until the view is read.

use std::sync::Arc;

use crate::{
    ArrayDataType, BandIndex, ColorInterpretation, GeoTransform, IMAGE_STRUCTURE_DOMAIN, NBITS_ITEM, PixelWindow, RasterBand,
    RasterDataset, RasterSize, Result, band_at,
};

pub struct WindowedDataset {
    description: String,
    size: RasterSize,
    geo_transform: GeoTransform,
    projection: Option<String>,
    bands: Vec<Arc<WindowedBand>>,
    // keeps the source alive for as long as the view exists
    _source: Arc<dyn RasterDataset>,
}

impl WindowedDataset {
    /// Creates a view of `size` pixels whose top left pixel is pixel (`x_off`, `y_off`) of the source
    pub fn new(
        source: Arc<dyn RasterDataset>,
        x_off: i64,
        y_off: i64,
        size: RasterSize,
        geo_transform: GeoTransform,
        projection: Option<String>,
    ) -> Result<Self> {
        let bands = (0..source.band_count())
            .map(|i| {
                Ok(Arc::new(WindowedBand {
                    source: source.band(band_at(i))?,
                    x_off,
                    y_off,
                    size,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        log::debug!(
            "Windowed view on '{}': offset ({x_off}, {y_off}) size {size}",
            source.description()
        );

        Ok(WindowedDataset {
            description: source.description().to_string(),
            size,
            geo_transform,
            projection,
            bands,
            _source: source,
        })
    }
}

impl RasterDataset for WindowedDataset {
    fn description(&self) -> &str {
        &self.description
    }

    fn raster_size(&self) -> RasterSize {
        self.size
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        Some(self.geo_transform)
    }

    fn projection(&self) -> Option<String> {
        self.projection.clone()
    }

    fn band_count(&self) -> usize {
        self.bands.len()
    }

    fn band(&self, index: BandIndex) -> Result<Arc<dyn RasterBand>> {
        match self.bands.get(index.get() - 1) {
            Some(band) => Ok(band.clone()),
            None => Err(crate::Error::InvalidArgument(format!(
                "Invalid band index {index} for view on '{}'",
                self.description
            ))),
        }
    }
}

pub struct WindowedBand {
    source: Arc<dyn RasterBand>,
    x_off: i64,
    y_off: i64,
    size: RasterSize,
}

impl RasterBand for WindowedBand {
    fn size(&self) -> RasterSize {
        self.size
    }

    fn data_type(&self) -> ArrayDataType {
        self.source.data_type()
    }

    fn nodata(&self) -> Option<f64> {
        self.source.nodata()
    }

    fn color_interpretation(&self) -> ColorInterpretation {
        self.source.color_interpretation()
    }

    fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        // only the image structure is meaningful for the view
        if key == NBITS_ITEM && domain == IMAGE_STRUCTURE_DOMAIN {
            self.source.metadata_item(key, domain)
        } else {
            None
        }
    }

    fn overview_count(&self) -> usize {
        self.source.overview_count()
    }

    /// The same window on the overview of the source, offset and size scaled by the overview factor
    fn overview(&self, index: usize) -> Result<Arc<dyn RasterBand>> {
        let overview = self.source.overview(index)?;
        let src_size = self.source.size();
        let ov_size = overview.size();

        let scale = |off: i64, len: usize, src_len: usize, ov_len: usize| {
            let factor = ov_len as f64 / src_len as f64;
            let start = (off as f64 * factor).floor() as i64;
            let end = ((off + len as i64) as f64 * factor).ceil() as i64;
            (start, (end - start).max(1) as usize)
        };

        let (x_off, cols) = scale(self.x_off, self.size.cols, src_size.cols, ov_size.cols);
        let (y_off, rows) = scale(self.y_off, self.size.rows, src_size.rows, ov_size.rows);

        Ok(Arc::new(WindowedBand {
            source: overview,
            x_off,
            y_off,
            size: RasterSize::with_rows_cols(rows, cols),
        }))
    }

    fn read_window(&self, window: PixelWindow, dst: &mut [f64]) -> Result<()> {
        window.check_bounds(self.size)?;
        let Some(dst) = dst.get_mut(..window.cell_count()) else {
            return Err(crate::Error::InvalidArgument(format!(
                "Destination buffer too small for window of {} pixels",
                window.cell_count()
            )));
        };
        dst.fill(self.source.nodata().unwrap_or(0.0));

        let src_size = self.source.size();
        let src_x0 = (self.x_off + window.x_off as i64).max(0);
        let src_y0 = (self.y_off + window.y_off as i64).max(0);
        let src_x1 = (self.x_off + window.x_end() as i64).min(src_size.cols as i64);
        let src_y1 = (self.y_off + window.y_end() as i64).min(src_size.rows as i64);
        if src_x0 >= src_x1 || src_y0 >= src_y1 {
            // the window lies completely outside of the source
            return Ok(());
        }

        let src_window = PixelWindow::new(
            src_x0 as usize,
            src_y0 as usize,
            (src_x1 - src_x0) as usize,
            (src_y1 - src_y0) as usize,
        );

        if src_window.size() == window.size() {
            return self.source.read_window(src_window, dst);
        }

        let mut src_data = vec![0.0; src_window.cell_count()];
        self.source.read_window(src_window, &mut src_data)?;

        let dst_col = (src_x0 - self.x_off) as usize - window.x_off;
        let dst_row = (src_y0 - self.y_off) as usize - window.y_off;
        for (row, src_row) in src_data.chunks_exact(src_window.cols).enumerate() {
            let start = (dst_row + row) * window.cols + dst_col;
            dst[start..start + src_window.cols].copy_from_slice(src_row);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FIRST_BAND, MemBand, MemDataset};

    fn source() -> Result<Arc<dyn RasterDataset>> {
        let band = MemBand::from_fn(RasterSize::square(4), ArrayDataType::Uint8, |r, c| (1 + r * 4 + c) as f64)
            .with_nodata(Some(0.0))
            .with_metadata_item(NBITS_ITEM, IMAGE_STRUCTURE_DOMAIN, "7");
        Ok(Arc::new(MemDataset::new("src", RasterSize::square(4)).with_band(band)?))
    }

    #[test]
    fn view_extending_beyond_source() -> Result<()> {
        let gt = GeoTransform::north_up(-1.0, 5.0, 1.0, -1.0);
        let view = WindowedDataset::new(source()?, -1, -1, RasterSize::square(6), gt, None)?;
        let band = view.band(FIRST_BAND)?;

        assert_eq!(band.nbits(), Some(7));
        assert_eq!(view.geo_transform(), Some(gt));

        let mut dst = vec![-1.0; 9];
        band.read_window(PixelWindow::new(0, 0, 3, 3), &mut dst)?;
        #[rustfmt::skip]
        assert_eq!(dst, [
            0.0, 0.0, 0.0,
            0.0, 1.0, 2.0,
            0.0, 5.0, 6.0,
        ]);

        band.read_window(PixelWindow::new(5, 5, 1, 1), &mut dst)?;
        assert_eq!(dst[0], 0.0);
        Ok(())
    }

    #[test]
    fn view_exposes_scaled_overviews() -> Result<()> {
        let band = MemBand::filled(RasterSize::square(4), ArrayDataType::Uint8, 1.0)
            .with_overview(MemBand::from_fn(RasterSize::square(2), ArrayDataType::Uint8, |r, c| (1 + r * 2 + c) as f64));
        let src: Arc<dyn RasterDataset> = Arc::new(MemDataset::new("src", RasterSize::square(4)).with_band(band)?);

        let view = WindowedDataset::new(src, -2, 0, RasterSize::with_rows_cols(4, 6), GeoTransform::default(), None)?;
        let band = view.band(FIRST_BAND)?;
        assert_eq!(band.overview_count(), 1);
        assert!(band.overview(1).is_err());

        let overview = band.overview(0)?;
        assert_eq!(overview.size(), RasterSize::with_rows_cols(2, 3));

        let mut dst = vec![-1.0; 6];
        overview.read_window(PixelWindow::new(0, 0, 3, 2), &mut dst)?;
        assert_eq!(dst, [0.0, 1.0, 2.0, 0.0, 3.0, 4.0]);
        Ok(())
    }

    #[test]
    fn view_inside_source() -> Result<()> {
        let view = WindowedDataset::new(source()?, 1, 2, RasterSize::with_rows_cols(2, 3), GeoTransform::default(), None)?;
        let mut dst = vec![0.0; 6];
        view.band(FIRST_BAND)?.read_window(PixelWindow::new(0, 0, 3, 2), &mut dst)?;
        assert_eq!(dst, [10.0, 11.0, 12.0, 14.0, 15.0, 16.0]);
        Ok(())
    }
}
