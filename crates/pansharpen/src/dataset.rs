//! The pansharpened dataset
//!
//! A virtual dataset whose bands are computed on demand from a panchromatic and a set of spectral
//! source bands. The dataset is described by a [`PansharpenConfig`] and can be constructed from a
//! configuration document, in which case the sources are opened (and owned) by the dataset, or from
//! bands that were opened by the caller.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use geo::{
    ArrayDataType, BandIndex, DatasetOpener, GeoTransform, PixelWindow, RasterBand, RasterBuffer, RasterDataset, RasterNum,
    RasterSize, ResampleAlg, SourceBand, SourceWindow, dispatch_datatype, nodata::nodata_equal, resample, try_zeroed_vec,
};
use itertools::Itertools;
use parking_lot::Mutex;

use crate::{
    Error, Result,
    band::{OutputBand, OutputBandKind, PansharpenedBand},
    cache::{BlockCache, DEFAULT_BLOCK_CACHE_SIZE, RegionCache},
    config::{BandKind, DEFAULT_BLOCK_SIZE, NoDataSetting, PansharpenConfig, SourceRef, SpectralBandConfig},
    engine::PansharpenOperation,
    options::{PansharpenOptions, uniform_weights},
    reconcile::reconcile,
};

/// Full width scanline reads are widened to regions of about this size
const SCANLINE_REGION_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    /// Capacity of the block cache in bytes (default = 64 MiB)
    pub block_cache_size: u64,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        DatasetOptions {
            block_cache_size: DEFAULT_BLOCK_CACHE_SIZE,
        }
    }
}

struct OwnedSource {
    path: Option<PathBuf>,
    dataset: Arc<dyn RasterDataset>,
}

/// Datasets acquired by the pansharpened dataset: opened sources and the views on them.
/// Released in reverse order of acquisition.
#[derive(Default)]
struct OwnedSources {
    sources: Vec<OwnedSource>,
}

impl OwnedSources {
    fn find_path(&self, path: &Path) -> Option<&Arc<dyn RasterDataset>> {
        self.sources
            .iter()
            .find(|src| src.path.as_deref() == Some(path))
            .map(|src| &src.dataset)
    }

    fn contains(&self, dataset: &Arc<dyn RasterDataset>) -> bool {
        self.sources.iter().any(|src| Arc::ptr_eq(&src.dataset, dataset))
    }

    fn push(&mut self, path: Option<PathBuf>, dataset: Arc<dyn RasterDataset>) {
        self.sources.push(OwnedSource { path, dataset });
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.sources.iter().filter_map(|src| src.path.clone()).collect()
    }
}

impl Drop for OwnedSources {
    fn drop(&mut self) {
        while let Some(source) = self.sources.pop() {
            log::debug!("Releasing source '{}'", source.dataset.description());
        }
    }
}

/// Opens the sources referenced by a configuration, every file is opened once
struct SourceOpener<'a> {
    opener: &'a dyn DatasetOpener,
    base_dir: Option<&'a Path>,
    owned: OwnedSources,
}

impl SourceOpener<'_> {
    fn open_band(&mut self, source: &SourceRef) -> Result<SourceBand> {
        let path = source.resolve(self.base_dir);
        let dataset = match self.owned.find_path(&path) {
            Some(dataset) => dataset.clone(),
            None => {
                let dataset = self
                    .opener
                    .open(&path)
                    .map_err(|e| Error::Config(format!("{} not a valid dataset: {e}", path.display())))?;
                self.owned.push(Some(path.clone()), dataset.clone());
                dataset
            }
        };

        SourceBand::new(dataset, source.band)
            .map_err(|_| Error::Config(format!("{} invalid band of {}", source.band, path.display())))
    }
}

/// The bands a dataset is constructed from
struct Sources {
    panchro: SourceBand,
    spectral: Vec<SourceBand>,
    /// Source of every declared band, `None` for pansharpened bands and passthrough bands without source
    passthrough: Vec<Option<SourceBand>>,
    owned: OwnedSources,
    file_list: Vec<PathBuf>,
}

pub(crate) struct DatasetInner {
    description: String,
    pub(crate) size: RasterSize,
    pub(crate) block_size: RasterSize,
    geo_transform: Option<GeoTransform>,
    projection: Option<String>,
    pub(crate) bands: Vec<OutputBand>,
    engine: PansharpenOperation,
    config: PansharpenConfig,
    file_list: Vec<PathBuf>,
    /// 0 for the full resolution dataset, overview number + 1 for overviews
    level: usize,
    overviews: OnceLock<Vec<Arc<DatasetInner>>>,
    region_cache: Mutex<Option<RegionCache>>,
    block_cache: BlockCache,
    block_cache_size: u64,
    warming_siblings: AtomicBool,
    // released after the engine and the bands that reference them
    _sources: OwnedSources,
}

/// Resets the flag when going out of scope
struct FlagGuard<'a>(&'a AtomicBool);

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn is_downsampling(window: PixelWindow, buf_size: RasterSize) -> bool {
    buf_size.cols < window.cols || buf_size.rows < window.rows
}

fn buffer_too_small(len: usize, required: usize) -> Error {
    Error::InvalidArgument(format!("Buffer of {len} samples too small, {required} samples required"))
}

impl DatasetInner {
    fn build(description: String, config: &PansharpenConfig, base_dir: Option<&Path>, sources: Sources, options: &DatasetOptions) -> Result<Self> {
        let Sources {
            panchro,
            spectral,
            passthrough,
            mut owned,
            file_list,
        } = sources;

        if spectral.is_empty() {
            return Err(Error::Config("No spectral band defined".to_string()));
        }

        let effective_config = effective_config(config, base_dir, &panchro, &spectral);

        let reconciled = reconcile(config.spatial_extent_adjustment, &panchro, &spectral)?;
        for band in std::iter::once(&reconciled.panchro).chain(&reconciled.spectral) {
            let is_input = std::iter::once(&panchro).chain(&spectral).any(|input| input.same_dataset(band));
            if !is_input && !owned.contains(band.dataset()) {
                owned.push(None, band.dataset().clone());
            }
        }

        let pan_band = reconciled.panchro.band();
        let size = pan_band.size();
        if let Some(declared) = config.raster_size
            && declared != size
        {
            return Err(Error::Config(format!(
                "Inconsistent declared dimensions {declared} with panchromatic band {size}"
            )));
        }

        // output band (0-based) -> index of the spectral band
        let mut dst_to_spectral = BTreeMap::new();
        if config.spectral_bands.is_empty() {
            dst_to_spectral.extend((0..spectral.len()).map(|i| (i, i)));
        } else {
            for (i, spectral_config) in config.spectral_bands.iter().enumerate() {
                let Some(dst_band) = spectral_config.dst_band else {
                    continue;
                };

                if dst_band == 0 {
                    return Err(Error::Config("dstBand must be >= 1".to_string()));
                }

                if dst_to_spectral.insert(dst_band - 1, i).is_some() {
                    return Err(Error::Config(format!(
                        "Another spectral band is already mapped to output band {dst_band}"
                    )));
                }
            }
        }

        let nodata = match config.nodata {
            NoDataSetting::Inherit => pan_band
                .nodata()
                .filter(|_| reconciled.spectral.iter().all(|b| nodata_equal(b.band().nodata(), pan_band.nodata()))),
            NoDataSetting::Disabled => None,
            NoDataSetting::Value(nodata) => Some(nodata),
        };

        let mut bands = Vec::new();
        if config.bands.is_empty() {
            for (position, (&dst, &spectral_idx)) in dst_to_spectral.iter().enumerate() {
                if dst != position {
                    return Err(Error::Config("Hole in dstBand numbering".to_string()));
                }

                bands.push(OutputBand::pansharpened(
                    position,
                    reconciled.spectral[spectral_idx].band().as_ref(),
                    None,
                    nodata,
                ));
            }
        } else {
            let mut pansharpened_count = 0;
            for (declaration, source) in config.bands.iter().zip(passthrough) {
                match &declaration.kind {
                    BandKind::Pansharpened => {
                        let Some(&spectral_idx) = dst_to_spectral.get(&(declaration.band - 1)) else {
                            return Err(Error::Config(format!(
                                "Band {} of type VRTPansharpenedRasterBand, but no corresponding SpectralBand",
                                declaration.band
                            )));
                        };

                        bands.push(OutputBand::pansharpened(
                            pansharpened_count,
                            reconciled.spectral[spectral_idx].band().as_ref(),
                            declaration.data_type,
                            nodata,
                        ));
                        pansharpened_count += 1;
                    }
                    BandKind::Passthrough { .. } => {
                        let source = source.map(|src| src.band().clone());
                        if let Some(src) = &source
                            && src.size() != size
                        {
                            return Err(Error::Config(format!(
                                "Size {} of the source of band {} differs from the dataset size {size}",
                                src.size(),
                                declaration.band
                            )));
                        }

                        bands.push(OutputBand::passthrough(source, declaration.data_type));
                    }
                }
            }

            for &dst in dst_to_spectral.keys() {
                if bands.get(dst).is_none_or(|band| !band.is_pansharpened()) {
                    return Err(Error::Config(format!("SpectralBand.dstBand = '{}' invalid", dst + 1)));
                }
            }
        }

        let bit_depth = match config.bit_depth {
            Some(bit_depth) => bit_depth,
            None => reconciled.spectral[0].band().nbits().unwrap_or(0),
        };

        if bit_depth != 0 {
            let nbits = (!matches!(bit_depth, 8 | 16 | 32)).then_some(bit_depth);
            for band in bands.iter_mut().filter(|band| band.is_pansharpened()) {
                band.nbits = nbits;
            }
        }

        if !reconciled.spectral[0].band().size().fits_in(&size) {
            log::warn!("Dimensions of spectral band larger than panchromatic band");
        }

        let weights = match &config.weights {
            Some(weights) if !weights.is_empty() => {
                if weights.len() != spectral.len() {
                    return Err(Error::Config(format!(
                        "{} weights defined, but {} input spectral bands",
                        weights.len(),
                        spectral.len()
                    )));
                }
                weights.clone()
            }
            _ => uniform_weights(spectral.len()),
        };

        if dst_to_spectral.is_empty() {
            log::warn!("No spectral band is mapped to an output band");
        }

        let pansharpen_options = PansharpenOptions {
            algorithm: config.algorithm,
            resampling: config.resampling.unwrap_or_default(),
            bit_depth,
            weights,
            panchro_band: Some(pan_band.clone()),
            spectral_bands: reconciled.spectral.iter().map(|band| band.band().clone()).collect(),
            output_bands: dst_to_spectral.values().copied().collect(),
            nodata,
            num_threads: config.num_threads.unwrap_or_default(),
            ms_shift_x: config.ms_shift_x,
            ms_shift_y: config.ms_shift_y,
        };

        let engine = PansharpenOperation::new(&pansharpen_options)?;

        let block_size = config
            .block_size
            .unwrap_or(RasterSize::square(DEFAULT_BLOCK_SIZE));

        log::debug!(
            "Pansharpened dataset '{description}': {size}, {} bands, {} spectral inputs",
            bands.len(),
            spectral.len()
        );

        Ok(DatasetInner {
            description,
            size,
            block_size: RasterSize::with_rows_cols(block_size.rows.max(1), block_size.cols.max(1)),
            geo_transform: reconciled.panchro.dataset().geo_transform(),
            projection: reconciled.panchro.dataset().projection(),
            bands,
            engine,
            config: effective_config,
            file_list,
            level: 0,
            overviews: OnceLock::new(),
            region_cache: Mutex::new(None),
            block_cache: BlockCache::new(options.block_cache_size),
            block_cache_size: options.block_cache_size,
            warming_siblings: AtomicBool::new(false),
            _sources: owned,
        })
    }

    pub(crate) fn overviews(&self) -> &[Arc<DatasetInner>] {
        self.overviews.get_or_init(|| self.build_overviews())
    }

    fn build_overviews(&self) -> Vec<Arc<DatasetInner>> {
        if self.level != 0 || !self.bands.iter().all(OutputBand::is_pansharpened) {
            return Vec::new();
        }

        let options = self.engine.options();
        let Some(pan) = &options.panchro_band else {
            return Vec::new();
        };

        let pan_overview_count = pan.overview_count();
        if pan_overview_count == 0 {
            return Vec::new();
        }

        let spectral_overview_count = if options.spectral_bands.iter().map(|band| band.overview_count()).all_equal() {
            options.spectral_bands.first().map_or(0, |band| band.overview_count())
        } else {
            log::warn!("Spectral bands have a different number of overviews, full resolution spectral bands are used for all overview levels");
            0
        };

        let mut overviews = Vec::with_capacity(pan_overview_count);
        for level in 0..pan_overview_count {
            match self.build_overview(pan.as_ref(), level, spectral_overview_count) {
                Ok(overview) => overviews.push(Arc::new(overview)),
                Err(e) => log::warn!("Failed to create overview level {level}, level skipped: {e}"),
            }
        }

        overviews
    }

    fn build_overview(&self, pan: &dyn RasterBand, level: usize, spectral_overview_count: usize) -> Result<DatasetInner> {
        let options = self.engine.options();
        let pan_overview = pan.overview(level)?;
        let spectral = options
            .spectral_bands
            .iter()
            .map(|band| match spectral_overview_count {
                0 => Ok(band.clone()),
                count => band.overview(level.min(count - 1)),
            })
            .collect::<geo::Result<Vec<_>>>()?;

        let engine = PansharpenOperation::new(&options.with_bands(pan_overview, spectral))?;
        let size = engine.raster_size();

        let geo_transform = self.geo_transform.map(|gt| {
            let [x0, dx, rx, y0, ry, dy] = gt.coefficients();
            let scale_x = self.size.cols as f64 / size.cols as f64;
            let scale_y = self.size.rows as f64 / size.rows as f64;
            GeoTransform::new([x0, dx * scale_x, rx * scale_y, y0, ry * scale_x, dy * scale_y])
        });

        log::debug!("Overview level {level} of '{}': {size}", self.description);

        Ok(DatasetInner {
            description: self.description.clone(),
            size,
            block_size: self.block_size,
            geo_transform,
            projection: self.projection.clone(),
            bands: self.bands.clone(),
            engine,
            config: self.config.clone(),
            file_list: Vec::new(),
            level: level + 1,
            overviews: OnceLock::new(),
            region_cache: Mutex::new(None),
            block_cache: BlockCache::new(self.block_cache_size),
            block_cache_size: self.block_cache_size,
            warming_siblings: AtomicBool::new(false),
            _sources: OwnedSources::default(),
        })
    }

    /// The coarsest overview that still has at least the resolution of the requested buffer,
    /// with `window` translated to the pixels of the overview
    fn overview_for(&self, window: PixelWindow, buf_size: RasterSize) -> Option<(&Arc<DatasetInner>, PixelWindow)> {
        if buf_size.is_empty() {
            return None;
        }

        let requested = (window.cols as f64 / buf_size.cols as f64).min(window.rows as f64 / buf_size.rows as f64);
        let overview = self
            .overviews()
            .iter()
            .filter(|ovr| !ovr.size.is_empty() && self.size.cols as f64 / ovr.size.cols as f64 <= requested)
            .min_by_key(|ovr| ovr.size.cell_count())?;

        let scale_x = self.size.cols as f64 / overview.size.cols as f64;
        let scale_y = self.size.rows as f64 / overview.size.rows as f64;
        let x0 = (window.x_off as f64 / scale_x).floor() as usize;
        let y0 = (window.y_off as f64 / scale_y).floor() as usize;
        let x1 = ((window.x_end() as f64 / scale_x).ceil() as usize).clamp(x0 + 1, overview.size.cols);
        let y1 = ((window.y_end() as f64 / scale_y).ceil() as usize).clamp(y0 + 1, overview.size.rows);

        Some((overview, PixelWindow::new(x0, y0, x1 - x0, y1 - y0)))
    }

    fn check_band(&self, band: usize) -> Result<()> {
        if band >= self.bands.len() {
            return Err(Error::InvalidArgument(format!(
                "Invalid band number {} ({} bands)",
                band + 1,
                self.bands.len()
            )));
        }

        Ok(())
    }

    fn raster_io<T: RasterNum>(&self, window: PixelWindow, buf_size: RasterSize, bands: &[usize], dst: &mut [T]) -> Result<()> {
        window.check_bounds(self.size)?;
        let plane_size = buf_size.cell_count();
        let required = plane_size * bands.len();
        if dst.len() < required {
            return Err(buffer_too_small(dst.len(), required));
        }

        for &band in bands {
            self.check_band(band)?;
        }

        let all_bands_in_order = bands.len() == self.bands.len() && bands.iter().enumerate().all(|(i, &band)| i == band);
        if buf_size == window.size() && all_bands_in_order && self.bands.iter().all(OutputBand::is_pansharpened) {
            return self.engine.process_region(window, &mut dst[..required]);
        }

        if is_downsampling(window, buf_size)
            && let Some((overview, overview_window)) = self.overview_for(window, buf_size)
        {
            return overview.raster_io(overview_window, buf_size, bands, dst);
        }

        for (&band, plane) in bands.iter().zip(dst.chunks_exact_mut(plane_size.max(1))) {
            self.band_raster_io(band, window, buf_size, plane)?;
        }

        Ok(())
    }

    pub(crate) fn band_raster_io<T: RasterNum>(&self, band: usize, window: PixelWindow, buf_size: RasterSize, dst: &mut [T]) -> Result<()> {
        self.check_band(band)?;
        window.check_bounds(self.size)?;
        let required = buf_size.cell_count();
        let len = dst.len();
        let Some(dst) = dst.get_mut(..required) else {
            return Err(buffer_too_small(len, required));
        };

        if buf_size == window.size() {
            return self.read_band(band, window, dst);
        }

        if is_downsampling(window, buf_size)
            && let Some((overview, overview_window)) = self.overview_for(window, buf_size)
        {
            return overview.band_raster_io(band, overview_window, buf_size, dst);
        }

        let mut native = try_zeroed_vec::<f64>(window.cell_count())?;
        self.read_band(band, window, &mut native)?;

        let mut resampled = try_zeroed_vec::<f64>(required)?;
        resample::resample(
            &native,
            window.size(),
            SourceWindow::from(PixelWindow::full(window.size())),
            ResampleAlg::Nearest,
            self.bands[band].nodata,
            &mut resampled,
            buf_size,
        )?;

        for (d, v) in dst.iter_mut().zip(resampled) {
            *d = T::from_f64_saturating(v);
        }

        Ok(())
    }

    /// Reads `window` of a band at native resolution
    fn read_band<T: RasterNum>(&self, band: usize, window: PixelWindow, dst: &mut [T]) -> Result<()> {
        match &self.bands[band].kind {
            OutputBandKind::Pansharpened { index } => self.read_pansharpened(*index, window, dst),
            OutputBandKind::Passthrough { source: None } => {
                dst.fill(T::from_f64_saturating(0.0));
                Ok(())
            }
            OutputBandKind::Passthrough { source: Some(source) } => {
                let mut data = try_zeroed_vec::<f64>(window.cell_count())?;
                source.read_window(window, &mut data)?;
                for (d, v) in dst.iter_mut().zip(data) {
                    *d = T::from_f64_saturating(v);
                }
                Ok(())
            }
        }
    }

    /// The region to process for a request, full width scanlines are widened to a larger region
    fn region_for(&self, window: PixelWindow, data_type: ArrayDataType) -> PixelWindow {
        if window.rows == 1 && window.x_off == 0 && window.cols == self.size.cols {
            let row_bytes = (window.cols * data_type.size_in_bytes()).max(1);
            let rows = (SCANLINE_REGION_BYTES / row_bytes).clamp(1, self.size.rows - window.y_off);
            PixelWindow::new(0, window.y_off, window.cols, rows)
        } else {
            window
        }
    }

    fn read_pansharpened<T: RasterNum>(&self, index: usize, window: PixelWindow, dst: &mut [T]) -> Result<()> {
        let mut cache = self.region_cache.lock();
        if let Some(region) = cache.as_ref()
            && region.covers(window, T::TYPE)
        {
            log::debug!("Region cache hit for {window:?}");
            return region.copy_band(index, window, dst);
        }

        let region_window = self.region_for(window, T::TYPE);
        log::debug!("Region cache miss for {window:?}, processing {region_window:?}");

        // the previous region is released before allocating the new one
        *cache = None;
        let mut data = RasterBuffer::try_zeroed(T::TYPE, region_window.cell_count() * self.engine.output_band_count())?;
        self.engine.process_region_buffer(region_window, &mut data)?;

        cache.insert(RegionCache::new(region_window, data)).copy_band(index, window, dst)
    }

    fn block_count(&self) -> (usize, usize) {
        (
            self.size.cols.div_ceil(self.block_size.cols),
            self.size.rows.div_ceil(self.block_size.rows),
        )
    }

    fn compute_block(&self, band: usize, block_x: usize, block_y: usize) -> Result<RasterBuffer> {
        self.check_band(band)?;
        let (blocks_x, blocks_y) = self.block_count();
        if block_x >= blocks_x || block_y >= blocks_y {
            return Err(Error::InvalidArgument(format!(
                "Block ({block_x}, {block_y}) out of range ({blocks_x} x {blocks_y} blocks)"
            )));
        }

        let block_size = self.block_size;
        let full = PixelWindow::new(block_x * block_size.cols, block_y * block_size.rows, block_size.cols, block_size.rows);
        let window = full.clipped(self.size);

        dispatch_datatype!(self.bands[band].data_type, T, {
            let mut block = try_zeroed_vec::<T>(block_size.cell_count())?;
            if window.size() == block_size {
                self.band_raster_io(band, window, block_size, &mut block)?;
            } else {
                // edge block, zero padded
                let mut data = try_zeroed_vec::<T>(window.cell_count())?;
                self.band_raster_io(band, window, window.size(), &mut data)?;
                for (row, src) in data.chunks_exact(window.cols).enumerate() {
                    let start = row * block_size.cols;
                    block[start..start + window.cols].copy_from_slice(src);
                }
            }

            Ok(T::into_buffer(block))
        })
    }

    pub(crate) fn read_block(&self, band: usize, block_x: usize, block_y: usize) -> Result<Arc<RasterBuffer>> {
        let key = (band, block_x, block_y);
        if let Some(block) = self.block_cache.get(&key) {
            return Ok(block);
        }

        let block = Arc::new(self.compute_block(band, block_x, block_y)?);
        self.block_cache.insert(key, block.clone());
        self.warm_sibling_blocks(band, block_x, block_y);
        Ok(block)
    }

    /// Computes the same block of the other bands while the region is in the region cache
    fn warm_sibling_blocks(&self, band: usize, block_x: usize, block_y: usize) {
        if self.bands.len() < 2 || self.warming_siblings.swap(true, Ordering::AcqRel) {
            return;
        }

        let _guard = FlagGuard(&self.warming_siblings);
        for sibling in (0..self.bands.len()).filter(|&b| b != band) {
            let key = (sibling, block_x, block_y);
            if self.block_cache.contains(&key) {
                continue;
            }

            match self.compute_block(sibling, block_x, block_y) {
                Ok(block) => self.block_cache.insert(key, Arc::new(block)),
                Err(e) => {
                    log::warn!("Failed to load block ({block_x}, {block_y}) of band {}: {e}", sibling + 1);
                    break;
                }
            }
        }
    }
}

/// The configuration with the sources filled in for bands that were provided as opened bands
fn effective_config(config: &PansharpenConfig, base_dir: Option<&Path>, panchro: &SourceBand, spectral: &[SourceBand]) -> PansharpenConfig {
    let source_ref = |band: &SourceBand| SourceRef::with_base_dir(Path::new(band.dataset().description()), band.index(), base_dir);

    let mut effective = config.clone();
    if effective.panchro_band.is_none() {
        effective.panchro_band = Some(source_ref(panchro));
    }

    if effective.spectral_bands.is_empty() {
        effective.spectral_bands = spectral
            .iter()
            .enumerate()
            .map(|(i, band)| SpectralBandConfig {
                source: Some(source_ref(band)),
                dst_band: Some(i + 1),
            })
            .collect();
    } else {
        for (spectral_config, band) in effective.spectral_bands.iter_mut().zip(spectral) {
            if spectral_config.source.is_none() {
                spectral_config.source = Some(source_ref(band));
            }
        }
    }

    effective
}

/// Virtual dataset producing pansharpened bands on demand
///
/// Cloning is cheap, the clones share the sources and caches.
#[derive(Clone)]
pub struct PansharpenedDataset {
    inner: Arc<DatasetInner>,
}

impl PansharpenedDataset {
    /// Opens a dataset description document, relative source paths are resolved against the
    /// directory of the document
    pub fn open(path: &Path, opener: &dyn DatasetOpener) -> Result<Self> {
        let config = PansharpenConfig::from_file(path)?;
        Self::create(
            path.display().to_string(),
            &config,
            path.parent(),
            opener,
            &DatasetOptions::default(),
        )
    }

    /// Creates the dataset described by `config`, the sources are opened using `opener`
    pub fn from_config(config: &PansharpenConfig, base_dir: Option<&Path>, opener: &dyn DatasetOpener, options: &DatasetOptions) -> Result<Self> {
        Self::create("VRTPansharpenedDataset".to_string(), config, base_dir, opener, options)
    }

    fn create(
        description: String,
        config: &PansharpenConfig,
        base_dir: Option<&Path>,
        opener: &dyn DatasetOpener,
        options: &DatasetOptions,
    ) -> Result<Self> {
        let mut sources = SourceOpener {
            opener,
            base_dir,
            owned: OwnedSources::default(),
        };

        let panchro_ref = config
            .panchro_band
            .as_ref()
            .ok_or_else(|| Error::Config("PanchroBand missing".to_string()))?;
        let panchro = sources.open_band(panchro_ref)?;

        let spectral = config
            .spectral_bands
            .iter()
            .map(|band| match &band.source {
                Some(source) => sources.open_band(source),
                None => Err(Error::Config("SpectralBand.SourceFilename missing".to_string())),
            })
            .collect::<Result<Vec<_>>>()?;

        let passthrough = config
            .bands
            .iter()
            .map(|declaration| match &declaration.kind {
                BandKind::Passthrough { source: Some(source) } => sources.open_band(source).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;

        let owned = sources.owned;
        let file_list = owned.paths();
        let inner = DatasetInner::build(
            description,
            config,
            base_dir,
            Sources {
                panchro,
                spectral,
                passthrough,
                owned,
                file_list,
            },
            options,
        )?;

        Ok(PansharpenedDataset { inner: Arc::new(inner) })
    }

    /// Creates a dataset from bands opened by the caller.
    ///
    /// The source fields of `config` are ignored. When `config` contains spectral band entries
    /// their number has to match `spectral`, their `dst_band` defines the output band mapping.
    /// Without entries every spectral band is sharpened into an output band.
    pub fn from_bands(config: &PansharpenConfig, panchro: SourceBand, spectral: Vec<SourceBand>, options: &DatasetOptions) -> Result<Self> {
        if !config.spectral_bands.is_empty() && config.spectral_bands.len() != spectral.len() {
            let relation = if config.spectral_bands.len() > spectral.len() { "More" } else { "Less" };
            return Err(Error::Config(format!("{relation} SpectralBand elements than in source array")));
        }

        if config
            .bands
            .iter()
            .any(|band| matches!(band.kind, BandKind::Passthrough { source: Some(_) }))
        {
            return Err(Error::Unsupported(
                "Band sources can only be opened when creating the dataset from a configuration".to_string(),
            ));
        }

        let file_list = std::iter::once(&panchro)
            .chain(&spectral)
            .map(|band| PathBuf::from(band.dataset().description()))
            .unique()
            .collect();

        let inner = DatasetInner::build(
            "VRTPansharpenedDataset".to_string(),
            config,
            None,
            Sources {
                panchro,
                passthrough: vec![None; config.bands.len()],
                spectral,
                owned: OwnedSources::default(),
                file_list,
            },
            options,
        )?;

        Ok(PansharpenedDataset { inner: Arc::new(inner) })
    }

    pub fn block_size(&self) -> RasterSize {
        self.inner.block_size
    }

    /// The pansharpening operation computing the pansharpened bands
    pub fn operation(&self) -> &PansharpenOperation {
        &self.inner.engine
    }

    pub fn pansharpened_band(&self, index: BandIndex) -> Result<PansharpenedBand> {
        self.inner.check_band(index.get() - 1)?;
        Ok(PansharpenedBand::new(self.inner.clone(), index.get() - 1))
    }

    /// Reads `window` of `bands` resampled to `buf_size` into `dst`, band after band
    pub fn raster_io<T: RasterNum>(&self, window: PixelWindow, buf_size: RasterSize, bands: &[BandIndex], dst: &mut [T]) -> Result<()> {
        let bands: Vec<usize> = bands.iter().map(|band| band.get() - 1).collect();
        self.inner.raster_io(window, buf_size, &bands, dst)
    }

    /// Reads `window` of all bands at native resolution
    pub fn read_all_bands<T: RasterNum>(&self, window: PixelWindow) -> Result<Vec<T>> {
        let bands: Vec<usize> = (0..self.inner.bands.len()).collect();
        let mut data = try_zeroed_vec::<T>(window.cell_count() * bands.len())?;
        self.inner.raster_io(window, window.size(), &bands, &mut data)?;
        Ok(data)
    }

    /// Writing is not supported
    pub fn write_raster(&self, _window: PixelWindow, _bands: &[BandIndex], _data: &RasterBuffer) -> Result<()> {
        Err(Error::Unsupported("Pansharpened datasets are read-only".to_string()))
    }

    /// Adding bands is not supported
    pub fn add_band(&mut self, _data_type: ArrayDataType) -> Result<()> {
        Err(Error::Unsupported("AddBand() not supported".to_string()))
    }

    pub fn overview_count(&self) -> usize {
        self.inner.overviews().len()
    }

    pub fn overview(&self, index: usize) -> Result<PansharpenedDataset> {
        let overviews = self.inner.overviews();
        let overview = overviews.get(index).ok_or_else(|| {
            Error::InvalidArgument(format!("Overview index {index} out of range (overview count: {})", overviews.len()))
        })?;

        Ok(PansharpenedDataset { inner: overview.clone() })
    }

    /// The configuration describing this dataset, sources that were provided as opened bands are
    /// referenced by their description
    pub fn to_config(&self) -> PansharpenConfig {
        self.inner.config.clone()
    }

    pub fn to_xml(&self) -> Result<String> {
        self.inner.config.to_xml()
    }

    /// The files the dataset was created from
    pub fn file_list(&self) -> Vec<PathBuf> {
        self.inner.file_list.clone()
    }
}

impl RasterDataset for PansharpenedDataset {
    fn description(&self) -> &str {
        &self.inner.description
    }

    fn raster_size(&self) -> RasterSize {
        self.inner.size
    }

    fn geo_transform(&self) -> Option<GeoTransform> {
        self.inner.geo_transform
    }

    fn projection(&self) -> Option<String> {
        self.inner.projection.clone()
    }

    fn band_count(&self) -> usize {
        self.inner.bands.len()
    }

    fn band(&self, index: BandIndex) -> geo::Result<Arc<dyn RasterBand>> {
        Ok(Arc::new(self.pansharpened_band(index)?))
    }
}

impl std::fmt::Debug for PansharpenedDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PansharpenedDataset")
            .field("description", &self.inner.description)
            .field("size", &self.inner.size)
            .field("bands", &self.inner.bands.len())
            .field("level", &self.inner.level)
            .finish()
    }
}
