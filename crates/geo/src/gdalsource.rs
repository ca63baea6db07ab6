//! Raster sources backed by GDAL datasets

use std::{path::Path, sync::Arc};

use gdal::{Metadata as _, raster::GdalDataType};
use parking_lot::Mutex;

use crate::{
    ArrayDataType, BandIndex, ColorInterpretation, DatasetOpener, Error, GeoTransform, PixelWindow, RasterBand, RasterDataset,
    RasterSize, Result,
};

impl TryFrom<GdalDataType> for ArrayDataType {
    type Error = Error;

    fn try_from(value: GdalDataType) -> Result<Self> {
        Ok(match value {
            GdalDataType::UInt8 => ArrayDataType::Uint8,
            GdalDataType::Int8 => ArrayDataType::Int8,
            GdalDataType::UInt16 => ArrayDataType::Uint16,
            GdalDataType::Int16 => ArrayDataType::Int16,
            GdalDataType::UInt32 => ArrayDataType::Uint32,
            GdalDataType::Int32 => ArrayDataType::Int32,
            GdalDataType::UInt64 => ArrayDataType::Uint64,
            GdalDataType::Int64 => ArrayDataType::Int64,
            GdalDataType::Float32 => ArrayDataType::Float32,
            GdalDataType::Float64 => ArrayDataType::Float64,
            GdalDataType::Unknown => return Err(Error::Runtime("Unsupported gdal raster data type".to_string())),
        })
    }
}

fn color_interpretation(band: &gdal::raster::RasterBand) -> ColorInterpretation {
    use gdal::raster::ColorInterpretation as GdalColorInterp;

    match band.color_interpretation() {
        GdalColorInterp::GrayIndex => ColorInterpretation::Gray,
        GdalColorInterp::PaletteIndex => ColorInterpretation::Palette,
        GdalColorInterp::RedBand => ColorInterpretation::Red,
        GdalColorInterp::GreenBand => ColorInterpretation::Green,
        GdalColorInterp::BlueBand => ColorInterpretation::Blue,
        GdalColorInterp::AlphaBand => ColorInterpretation::Alpha,
        GdalColorInterp::Undefined => ColorInterpretation::Undefined,
        _ => ColorInterpretation::Other,
    }
}

/// A dataset opened through GDAL, band access is serialized because GDAL dataset handles are not reentrant
pub struct GdalDataset {
    description: String,
    ds: Arc<Mutex<gdal::Dataset>>,
    size: RasterSize,
    geo_transform: Option<GeoTransform>,
    projection: Option<String>,
    band_count: usize,
}

impl GdalDataset {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::InvalidPath(path.to_path_buf()));
        }

        let ds = gdal::Dataset::open(path)?;
        let (cols, rows) = ds.raster_size();
        let projection = ds.projection();

        Ok(GdalDataset {
            description: path.to_string_lossy().to_string(),
            size: RasterSize::with_rows_cols(rows, cols),
            geo_transform: ds.geo_transform().ok().map(GeoTransform::new),
            projection: (!projection.is_empty()).then_some(projection),
            band_count: ds.raster_count(),
            ds: Arc::new(Mutex::new(ds)),
        })
    }
}

impl RasterDataset for GdalDataset {
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
        self.band_count
    }

    fn band(&self, index: BandIndex) -> Result<Arc<dyn RasterBand>> {
        Ok(Arc::new(GdalBand::new(self.ds.clone(), index.get(), None)?))
    }
}

pub struct GdalBand {
    ds: Arc<Mutex<gdal::Dataset>>,
    band_nr: usize,
    overview: Option<usize>,
    size: RasterSize,
    data_type: ArrayDataType,
    nodata: Option<f64>,
    color_interp: ColorInterpretation,
    overview_count: usize,
}

impl GdalBand {
    fn new(ds: Arc<Mutex<gdal::Dataset>>, band_nr: usize, overview: Option<usize>) -> Result<Self> {
        let (size, data_type, nodata, color_interp, overview_count) = {
            let guard = ds.lock();
            let main_band = guard.rasterband(band_nr)?;
            let overview_count = main_band.overview_count()?.max(0) as usize;
            let band = match overview {
                Some(ovr) => main_band.overview(ovr)?,
                None => main_band,
            };

            let (cols, rows) = band.size();
            (
                RasterSize::with_rows_cols(rows, cols),
                ArrayDataType::try_from(band.band_type())?,
                band.no_data_value(),
                color_interpretation(&band),
                overview_count,
            )
        };

        Ok(GdalBand {
            ds,
            band_nr,
            overview,
            size,
            data_type,
            nodata,
            color_interp,
            overview_count,
        })
    }
}

impl RasterBand for GdalBand {
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
        let guard = self.ds.lock();
        let band = guard.rasterband(self.band_nr).ok()?;
        match self.overview {
            Some(ovr) => band.overview(ovr).ok()?.metadata_item(key, domain),
            None => band.metadata_item(key, domain),
        }
    }

    fn read_window(&self, window: PixelWindow, dst: &mut [f64]) -> Result<()> {
        window.check_bounds(self.size)?;
        let Some(dst) = dst.get_mut(..window.cell_count()) else {
            return Err(Error::InvalidArgument(format!(
                "Destination buffer too small for window of {} pixels",
                window.cell_count()
            )));
        };

        let guard = self.ds.lock();
        let main_band = guard.rasterband(self.band_nr)?;
        let band = match self.overview {
            Some(ovr) => main_band.overview(ovr)?,
            None => main_band,
        };

        band.read_into_slice::<f64>(
            (window.x_off as isize, window.y_off as isize),
            (window.cols, window.rows),
            (window.cols, window.rows),
            dst,
            None,
        )?;

        Ok(())
    }

    fn overview_count(&self) -> usize {
        if self.overview.is_some() { 0 } else { self.overview_count }
    }

    fn overview(&self, index: usize) -> Result<Arc<dyn RasterBand>> {
        if self.overview.is_some() || index >= self.overview_count {
            return Err(Error::InvalidArgument(format!("Band has no overview with index {index}")));
        }

        Ok(Arc::new(GdalBand::new(self.ds.clone(), self.band_nr, Some(index))?))
    }
}

/// Opens datasets from disk using GDAL
#[derive(Default)]
pub struct GdalOpener;

impl DatasetOpener for GdalOpener {
    fn open(&self, path: &Path) -> Result<Arc<dyn RasterDataset>> {
        Ok(Arc::new(GdalDataset::open(path)?))
    }
}
