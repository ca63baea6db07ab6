//! Output bands of a pansharpened dataset

use std::sync::Arc;

use geo::{
    ArrayDataType, BandIndex, ColorInterpretation, IMAGE_STRUCTURE_DOMAIN, NBITS_ITEM, PixelWindow, RasterBand, RasterBuffer,
    RasterNum, RasterSize, band_at,
};

use crate::{Error, Result, dataset::DatasetInner};

/// How the pixels of an output band are produced
#[derive(Clone)]
pub(crate) enum OutputBandKind {
    /// Output `index` of the pansharpening operation
    Pansharpened { index: usize },
    /// Copied from a source band of the same size, zero filled without source
    Passthrough { source: Option<Arc<dyn RasterBand>> },
}

/// Properties of an output band
#[derive(Clone)]
pub(crate) struct OutputBand {
    pub data_type: ArrayDataType,
    pub nodata: Option<f64>,
    pub color_interp: ColorInterpretation,
    pub nbits: Option<u32>,
    pub kind: OutputBandKind,
}

impl OutputBand {
    /// Output band `index` of the operation, sharpening `spectral`
    pub fn pansharpened(index: usize, spectral: &dyn RasterBand, data_type: Option<ArrayDataType>, nodata: Option<f64>) -> Self {
        OutputBand {
            data_type: data_type.unwrap_or(spectral.data_type()),
            nodata,
            color_interp: spectral.color_interpretation(),
            nbits: None,
            kind: OutputBandKind::Pansharpened { index },
        }
    }

    pub fn passthrough(source: Option<Arc<dyn RasterBand>>, data_type: Option<ArrayDataType>) -> Self {
        OutputBand {
            data_type: data_type
                .or_else(|| source.as_ref().map(|src| src.data_type()))
                .unwrap_or(ArrayDataType::Uint8),
            nodata: source.as_ref().and_then(|src| src.nodata()),
            color_interp: source
                .as_ref()
                .map(|src| src.color_interpretation())
                .unwrap_or_default(),
            nbits: source.as_ref().and_then(|src| src.nbits()),
            kind: OutputBandKind::Passthrough { source },
        }
    }

    pub fn is_pansharpened(&self) -> bool {
        matches!(self.kind, OutputBandKind::Pansharpened { .. })
    }
}

/// A band of a [`crate::PansharpenedDataset`]
///
/// The band shares the state of its dataset, reads through the band use the region and block
/// caches of the dataset.
#[derive(Clone)]
pub struct PansharpenedBand {
    dataset: Arc<DatasetInner>,
    index: usize,
}

impl PansharpenedBand {
    pub(crate) fn new(dataset: Arc<DatasetInner>, index: usize) -> Self {
        PansharpenedBand { dataset, index }
    }

    fn properties(&self) -> &OutputBand {
        &self.dataset.bands[self.index]
    }

    /// The 1-based band number
    pub fn band_index(&self) -> BandIndex {
        band_at(self.index)
    }

    pub fn is_pansharpened(&self) -> bool {
        self.properties().is_pansharpened()
    }

    pub fn block_size(&self) -> RasterSize {
        self.dataset.block_size
    }

    /// The block at block column `block_x` and block row `block_y`.
    ///
    /// Blocks at the right and bottom edge are zero padded to the full block size. Reading a block
    /// also caches the same block of the other bands.
    pub fn read_block(&self, block_x: usize, block_y: usize) -> Result<Arc<RasterBuffer>> {
        self.dataset.read_block(self.index, block_x, block_y)
    }

    /// Reads `window` resampled to `buf_size` into `dst`
    pub fn raster_io<T: RasterNum>(&self, window: PixelWindow, buf_size: RasterSize, dst: &mut [T]) -> Result<()> {
        self.dataset.band_raster_io(self.index, window, buf_size, dst)
    }

    /// Writing is not supported
    pub fn write_raster<T: RasterNum>(&self, _window: PixelWindow, _data: &[T]) -> Result<()> {
        Err(Error::Unsupported("Pansharpened bands are read-only".to_string()))
    }

    /// The same band of overview `index` of the dataset
    pub fn overview_band(&self, index: usize) -> Result<PansharpenedBand> {
        let overviews = self.dataset.overviews();
        let overview = overviews.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!("Overview index {index} out of range (overview count: {})", overviews.len()))
        })?;

        Ok(PansharpenedBand::new(overview.clone(), self.index))
    }
}

impl RasterBand for PansharpenedBand {
    fn size(&self) -> RasterSize {
        self.dataset.size
    }

    fn data_type(&self) -> ArrayDataType {
        self.properties().data_type
    }

    fn nodata(&self) -> Option<f64> {
        self.properties().nodata
    }

    fn color_interpretation(&self) -> ColorInterpretation {
        self.properties().color_interp
    }

    fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        if key == NBITS_ITEM && domain == IMAGE_STRUCTURE_DOMAIN {
            self.properties().nbits.map(|nbits| nbits.to_string())
        } else {
            None
        }
    }

    fn read_window(&self, window: PixelWindow, dst: &mut [f64]) -> geo::Result<()> {
        Ok(self.raster_io(window, window.size(), dst)?)
    }

    fn overview_count(&self) -> usize {
        self.dataset.overviews().len()
    }

    fn overview(&self, index: usize) -> geo::Result<Arc<dyn RasterBand>> {
        Ok(Arc::new(self.overview_band(index)?))
    }
}

impl std::fmt::Debug for PansharpenedBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PansharpenedBand")
            .field("band", &self.band_index())
            .field("data_type", &self.properties().data_type)
            .field("pansharpened", &self.is_pansharpened())
            .finish()
    }
}
