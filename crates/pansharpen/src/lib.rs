#![warn(clippy::unwrap_used)]
//! Pansharpening of multispectral imagery
//!
//! Fuses a high resolution panchromatic band with lower resolution spectral bands into spectral
//! bands at the panchromatic resolution using the weighted Brovey transform.
//!
//! - [`PansharpenOperation`]: the pansharpening of pixel regions from opened bands
//! - [`PansharpenedDataset`]: a virtual dataset computing its bands on demand, described by a
//!   [`PansharpenConfig`] document

mod band;
mod cache;
mod config;
mod dataset;
mod engine;
mod error;
mod fusion;
mod options;
mod reconcile;

pub type Result<T = ()> = std::result::Result<T, Error>;

pub use band::PansharpenedBand;
pub use cache::{BlockCache, BlockKey, DEFAULT_BLOCK_CACHE_SIZE, RegionCache};
pub use config::{BandDeclaration, BandKind, DEFAULT_BLOCK_SIZE, NoDataSetting, PansharpenConfig, SourceRef, SpectralBandConfig};
pub use dataset::{DatasetOptions, PansharpenedDataset};
pub use engine::PansharpenOperation;
#[doc(inline)]
pub use error::Error;
pub use fusion::{FusionParams, weighted_brovey};
pub use options::{MAX_NUM_THREADS, NUM_THREADS_ENV, NumThreads, PansharpenAlgorithm, PansharpenOptions, uniform_weights};
pub use reconcile::{ReconciledSources, SpatialExtentAdjustment, reconcile};
