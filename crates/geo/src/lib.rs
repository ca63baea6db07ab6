#![warn(clippy::unwrap_used)]
//! Raster primitives and the raster source abstraction
//!
//! Pixel data is provided through the object safe [`RasterDataset`] and [`RasterBand`] traits.
//! Implementations are provided for in-memory rasters ([`MemDataset`]), windowed views on other
//! datasets ([`WindowedDataset`]) and, with the `gdal` feature, files opened through GDAL.

#[macro_use]
mod rasterbuffer_macros;

mod arraydatatype;
mod bandindex;
mod colorinterp;
mod error;
#[cfg(feature = "gdal")]
mod gdalsource;
mod geotransform;
mod memory;
pub mod nodata;
mod rasterbuffer;
mod rasternum;
mod rastersize;
pub mod rect;
pub mod resample;
mod source;
mod view;
mod window;

pub type Result<T = ()> = std::result::Result<T, Error>;
pub type Point<T = f64> = geo_types::Point<T>;

#[doc(inline)]
pub use arraydatatype::ArrayDataType;
pub use bandindex::{BandIndex, FIRST_BAND, band_at, band_index};
pub use colorinterp::ColorInterpretation;
#[doc(inline)]
pub use error::Error;
#[cfg(feature = "gdal")]
pub use gdalsource::{GdalBand, GdalDataset, GdalOpener};
#[doc(inline)]
pub use geotransform::GeoTransform;
pub use memory::{MemBand, MemDataset, MemOpener};
pub use rasterbuffer::{RasterBuffer, try_zeroed_vec};
pub use rasternum::RasterNum;
#[doc(inline)]
pub use rastersize::RasterSize;
#[doc(inline)]
pub use rect::Rect;
#[doc(inline)]
pub use resample::ResampleAlg;
pub use source::{DatasetOpener, IMAGE_STRUCTURE_DOMAIN, NBITS_ITEM, RasterBand, RasterDataset, SourceBand};
pub use view::{WindowedBand, WindowedDataset};
pub use window::{PixelWindow, SourceWindow};
