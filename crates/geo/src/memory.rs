//! In-memory raster sources
//!
//! Mostly useful for testing and for composing rasters that were computed on the fly.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use crate::{
    ArrayDataType, BandIndex, ColorInterpretation, DatasetOpener, Error, GeoTransform, PixelWindow, RasterBand, RasterDataset,
    RasterSize, Result,
};

pub struct MemBand {
    size: RasterSize,
    data_type: ArrayDataType,
    data: Vec<f64>,
    nodata: Option<f64>,
    color_interp: ColorInterpretation,
    metadata: HashMap<(String, String), String>,
    overviews: Vec<Arc<MemBand>>,
    read_count: AtomicUsize,
    fail_reads: AtomicBool,
}

impl MemBand {
    /// Creates a band from row major data, the values should be representable in `data_type`
    pub fn new(size: RasterSize, data_type: ArrayDataType, data: Vec<f64>) -> Result<Self> {
        if data.len() != size.cell_count() {
            return Err(Error::InvalidArgument(format!(
                "Band data contains {} values, expected {} for size {size}",
                data.len(),
                size.cell_count()
            )));
        }

        Ok(MemBand {
            size,
            data_type,
            data,
            nodata: None,
            color_interp: ColorInterpretation::Undefined,
            metadata: HashMap::new(),
            overviews: Vec::new(),
            read_count: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        })
    }

    pub fn filled(size: RasterSize, data_type: ArrayDataType, value: f64) -> Self {
        MemBand {
            size,
            data_type,
            data: vec![value; size.cell_count()],
            nodata: None,
            color_interp: ColorInterpretation::Undefined,
            metadata: HashMap::new(),
            overviews: Vec::new(),
            read_count: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Creates a band where every value is computed from its row and column
    pub fn from_fn(size: RasterSize, data_type: ArrayDataType, f: impl Fn(usize, usize) -> f64) -> Self {
        let mut band = MemBand::filled(size, data_type, 0.0);
        for row in 0..size.rows {
            for col in 0..size.cols {
                band.data[row * size.cols + col] = f(row, col);
            }
        }
        band
    }

    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }

    pub fn with_color_interpretation(mut self, color_interp: ColorInterpretation) -> Self {
        self.color_interp = color_interp;
        self
    }

    pub fn with_metadata_item(mut self, key: &str, domain: &str, value: &str) -> Self {
        self.metadata.insert((key.to_string(), domain.to_string()), value.to_string());
        self
    }

    pub fn with_overview(mut self, overview: MemBand) -> Self {
        self.overviews.push(Arc::new(overview));
        self
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// The number of `read_window` calls on this band
    pub fn read_count(&self) -> usize {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Makes subsequent reads fail, used to simulate I/O errors
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }
}

impl RasterBand for MemBand {
    fn size(&self) -> RasterSize {
        self.size
    }

    fn data_type(&self) -> ArrayDataType {
        self.data_type
    }

    fn nodata(&self) -> Option<f64> {
        self.nodata
    }

    fn color_interpretation(&self) -> ColorInterpretation {
        self.color_interp
    }

    fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        self.metadata.get(&(key.to_string(), domain.to_string())).cloned()
    }

    fn read_window(&self, window: PixelWindow, dst: &mut [f64]) -> Result<()> {
        self.read_count.fetch_add(1, Ordering::Relaxed);
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(Error::Runtime("Simulated read failure".to_string()));
        }

        window.check_bounds(self.size)?;
        if dst.len() < window.cell_count() {
            return Err(Error::InvalidArgument(format!(
                "Destination buffer too small: {} < {}",
                dst.len(),
                window.cell_count()
            )));
        }

        if window.cols == 0 {
            return Ok(());
        }

        for (row, dst_row) in dst.chunks_exact_mut(window.cols).take(window.rows).enumerate() {
            let start = (window.y_off + row) * self.size.cols + window.x_off;
            dst_row.copy_from_slice(&self.data[start..start + window.cols]);
        }

        Ok(())
    }

    fn overview_count(&self) -> usize {
        self.overviews.len()
    }

    fn overview(&self, index: usize) -> Result<Arc<dyn RasterBand>> {
        match self.overviews.get(index) {
            Some(ovr) => Ok(ovr.clone()),
            None => Err(Error::InvalidArgument(format!(
                "Overview index {index} out of range (overview count: {})",
                self.overviews.len()
            ))),
        }
    }
}

pub struct MemDataset {
    description: String,
    size: RasterSize,
    geo_transform: Option<GeoTransform>,
    projection: Option<String>,
    bands: Vec<Arc<MemBand>>,
}

impl MemDataset {
    pub fn new(description: impl Into<String>, size: RasterSize) -> Self {
        MemDataset {
            description: description.into(),
            size,
            geo_transform: None,
            projection: None,
            bands: Vec::new(),
        }
    }

    pub fn with_geo_transform(mut self, geo_transform: GeoTransform) -> Self {
        self.geo_transform = Some(geo_transform);
        self
    }

    pub fn with_projection(mut self, projection: impl Into<String>) -> Self {
        self.projection = Some(projection.into());
        self
    }

    pub fn with_band(mut self, band: MemBand) -> Result<Self> {
        if band.size != self.size {
            return Err(Error::SizeMismatch {
                size1: (self.size.cols, self.size.rows),
                size2: (band.size.cols, band.size.rows),
            });
        }

        self.bands.push(Arc::new(band));
        Ok(self)
    }

    /// Typed access to the bands, e.g. to inspect read statistics
    pub fn mem_band(&self, index: BandIndex) -> Option<Arc<MemBand>> {
        self.bands.get(index.get() - 1).cloned()
    }
}

impl RasterDataset for MemDataset {
    fn description(&self) -> &str {
        &self.description
    }

    fn raster_size(&self) -> RasterSize {
        self.size
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.geo_transform
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
            None => Err(Error::InvalidArgument(format!(
                "Invalid band index {index} for dataset '{}' ({} bands)",
                self.description,
                self.bands.len()
            ))),
        }
    }
}

/// Opener resolving paths to registered in-memory datasets
#[derive(Default)]
pub struct MemOpener {
    datasets: HashMap<PathBuf, Arc<dyn RasterDataset>>,
    open_count: AtomicUsize,
}

impl MemOpener {
    pub fn register(&mut self, path: impl Into<PathBuf>, dataset: Arc<dyn RasterDataset>) {
        self.datasets.insert(path.into(), dataset);
    }

    /// The number of successful `open` calls
    pub fn open_count(&self) -> usize {
        self.open_count.load(Ordering::Relaxed)
    }
}

impl DatasetOpener for MemOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn RasterDataset>> {
        let ds = self.datasets.get(path).cloned().ok_or_else(|| Error::InvalidPath(path.to_path_buf()))?;
        self.open_count.fetch_add(1, Ordering::Relaxed);
        Ok(ds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FIRST_BAND;

    #[test]
    fn read_window() -> Result<()> {
        let band = MemBand::from_fn(RasterSize::with_rows_cols(4, 5), ArrayDataType::Uint8, |r, c| (r * 10 + c) as f64);
        let ds = MemDataset::new("mem", RasterSize::with_rows_cols(4, 5)).with_band(band)?;

        let mut dst = vec![0.0; 4];
        ds.band(FIRST_BAND)?.read_window(PixelWindow::new(3, 2, 2, 2), &mut dst)?;
        assert_eq!(dst, [23.0, 24.0, 33.0, 34.0]);

        assert!(ds.band(FIRST_BAND)?.read_window(PixelWindow::new(4, 0, 2, 1), &mut dst).is_err());
        assert_eq!(ds.mem_band(FIRST_BAND).map(|b| b.read_count()), Some(2));
        Ok(())
    }

    #[test]
    fn band_size_must_match_dataset() {
        let band = MemBand::filled(RasterSize::square(2), ArrayDataType::Uint8, 1.0);
        assert!(MemDataset::new("mem", RasterSize::square(3)).with_band(band).is_err());
    }

    #[test]
    fn nbits_metadata() -> Result<()> {
        let band = MemBand::filled(RasterSize::square(2), ArrayDataType::Uint16, 1.0).with_metadata_item("NBITS", "IMAGE_STRUCTURE", "12");
        assert_eq!(band.nbits(), Some(12));
        Ok(())
    }
}
