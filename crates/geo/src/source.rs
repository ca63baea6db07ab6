//! Raster source abstraction
//!
//! The traits in this module are the boundary with the drivers that supply the pixel data.
//! They are object safe so heterogeneous sources (files, in-memory rasters, windowed views)
//! can be combined at runtime.

use std::{path::Path, sync::Arc};

use crate::{ArrayDataType, BandIndex, ColorInterpretation, Error, GeoTransform, PixelWindow, RasterSize, Result};

/// Metadata domain containing the image structure items
pub const IMAGE_STRUCTURE_DOMAIN: &str = "IMAGE_STRUCTURE";
/// Metadata item containing the number of significant bits of the band samples
pub const NBITS_ITEM: &str = "NBITS";

pub trait RasterBand: Send + Sync {
    fn size(&self) -> RasterSize;
    fn data_type(&self) -> ArrayDataType;
    fn nodata(&self) -> Option<f64>;

    fn color_interpretation(&self) -> ColorInterpretation {
        ColorInterpretation::Undefined
    }

    fn metadata_item(&self, _key: &str, _domain: &str) -> Option<String> {
        None
    }

    /// Reads the window at native resolution into `dst` (row major, `window.cols` samples per row)
    fn read_window(&self, window: PixelWindow, dst: &mut [f64]) -> Result<()>;

    fn overview_count(&self) -> usize {
        0
    }

    fn overview(&self, index: usize) -> Result<Arc<dyn RasterBand>> {
        Err(Error::InvalidArgument(format!("Band has no overview with index {index}")))
    }

    /// The number of significant bits of the samples as advertised in the image structure metadata
    fn nbits(&self) -> Option<u32> {
        self.metadata_item(NBITS_ITEM, IMAGE_STRUCTURE_DOMAIN)
            .and_then(|nbits| nbits.trim().parse().ok())
    }
}

pub trait RasterDataset: Send + Sync {
    /// Description of the dataset, the path for file based datasets
    fn description(&self) -> &str;
    fn raster_size(&self) -> RasterSize;
    fn geo_transform(&self) -> Option<GeoTransform>;
    /// Projection definition (WKT)
    fn projection(&self) -> Option<String>;
    fn band_count(&self) -> usize;
    fn band(&self, index: BandIndex) -> Result<Arc<dyn RasterBand>>;
}

/// Opens the datasets referenced by path in dataset descriptions
pub trait DatasetOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Arc<dyn RasterDataset>>;
}

/// A band of a dataset, keeps the dataset alive as long as the band is referenced
#[derive(Clone)]
pub struct SourceBand {
    dataset: Arc<dyn RasterDataset>,
    index: BandIndex,
    band: Arc<dyn RasterBand>,
}

impl SourceBand {
    pub fn new(dataset: Arc<dyn RasterDataset>, index: BandIndex) -> Result<Self> {
        let band = dataset.band(index)?;
        Ok(SourceBand { dataset, index, band })
    }

    pub fn dataset(&self) -> &Arc<dyn RasterDataset> {
        &self.dataset
    }

    pub fn index(&self) -> BandIndex {
        self.index
    }

    pub fn band(&self) -> &Arc<dyn RasterBand> {
        &self.band
    }

    /// True when both refer to the same dataset instance
    pub fn same_dataset(&self, other: &SourceBand) -> bool {
        Arc::ptr_eq(&self.dataset, &other.dataset)
    }
}

impl std::fmt::Debug for SourceBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SourceBand({}, band {})", self.dataset.description(), self.index)
    }
}
