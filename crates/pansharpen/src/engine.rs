//! The pansharpening operation
//!
//! Reads the panchromatic window of a region, upsamples the matching windows of the spectral bands
//! to the panchromatic grid and fuses them. Rows are partitioned in chunks that are processed on a
//! thread pool owned by the operation.

use std::sync::Arc;

use geo::{
    ArrayDataType, PixelWindow, RasterBand, RasterBuffer, RasterNum, RasterSize, ResampleAlg, SourceWindow, dispatch_datatype,
    dispatch_rasterbuffer, nodata::is_nodata, resample, try_zeroed_vec,
};
use rayon::prelude::*;

use crate::{
    Error, Result,
    fusion::{FusionParams, weighted_brovey},
    options::{PansharpenAlgorithm, PansharpenOptions},
};

/// Regions with fewer pixels per worker are processed serially
const MIN_PIXELS_PER_TASK: usize = 1024;

pub struct PansharpenOperation {
    options: PansharpenOptions,
    panchro_band: Arc<dyn RasterBand>,
    work_type: ArrayDataType,
    fusion: FusionParams,
    thread_count: usize,
    pool: Option<rayon::ThreadPool>,
}

fn create_thread_pool(thread_count: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .thread_name(|i| format!("pansharpen-{i}"))
        .build()
        .map_err(|e| Error::Runtime(format!("Failed to create threadpool: {e}")))
}

fn validate_bit_depth(bit_depth: u32, work_type: ArrayDataType) -> Result<u32> {
    if bit_depth == 0 {
        return Ok(0);
    }

    if bit_depth > 31
        || (work_type == ArrayDataType::Uint8 && bit_depth > 8)
        || (work_type == ArrayDataType::Uint16 && bit_depth > 16)
    {
        return Err(Error::Config(format!("Invalid value bit_depth = {bit_depth} for type {work_type}")));
    }

    if bit_depth == work_type.size_in_bits() {
        return Ok(0);
    }

    if !work_type.is_unsigned_integer() {
        log::warn!("Ignoring bit_depth = {bit_depth} for type {work_type}");
        return Ok(0);
    }

    Ok(bit_depth)
}

impl PansharpenOperation {
    /// Validates the options and prepares the operation.
    /// The operation keeps its own copy of the options.
    pub fn new(options: &PansharpenOptions) -> Result<Self> {
        let panchro_band = options
            .panchro_band
            .clone()
            .ok_or_else(|| Error::Config("No panchromatic band defined".to_string()))?;

        if options.algorithm != PansharpenAlgorithm::WeightedBrovey {
            return Err(Error::Config(format!("Algorithm {} unsupported", options.algorithm)));
        }

        let Some(first_spectral) = options.spectral_bands.first() else {
            return Err(Error::Config("No spectral band defined".to_string()));
        };

        if options.weights.len() != options.spectral_bands.len() {
            return Err(Error::Config(format!(
                "{} weights defined, but {} input spectral bands",
                options.weights.len(),
                options.spectral_bands.len()
            )));
        }

        let ms_size = first_spectral.size();
        let pan_size = panchro_band.size();
        if ms_size.is_empty() || !ms_size.fits_in(&pan_size) {
            return Err(Error::Config(format!(
                "Dimensions of spectral band {ms_size} larger than panchromatic band {pan_size}"
            )));
        }

        for (i, band) in options.spectral_bands.iter().enumerate().skip(1) {
            if band.size() != ms_size {
                return Err(Error::Config(format!(
                    "Dimensions of input spectral band {i} {} different from first spectral band {ms_size}",
                    band.size()
                )));
            }
        }

        if options.output_bands.is_empty() {
            log::warn!("No output pansharpened band defined");
        }

        for (i, &band_idx) in options.output_bands.iter().enumerate() {
            if band_idx >= options.spectral_bands.len() {
                return Err(Error::Config(format!("Invalid value output_bands[{i}] = {band_idx}")));
            }
        }

        let work_type = panchro_band.data_type();
        let mut options = options.clone();
        options.bit_depth = validate_bit_depth(options.bit_depth, work_type)?;

        let thread_count = options.num_threads.resolve();
        let pool = if thread_count > 1 {
            log::debug!("Pansharpening with {thread_count} threads");
            Some(create_thread_pool(thread_count)?)
        } else {
            None
        };

        let fusion = FusionParams {
            weights: options.weights.clone(),
            output_bands: options.output_bands.clone(),
            nodata: options.nodata,
            max_value: (options.bit_depth != 0).then(|| ((1u64 << options.bit_depth) - 1) as f64),
        };

        Ok(PansharpenOperation {
            options,
            panchro_band,
            work_type,
            fusion,
            thread_count,
            pool,
        })
    }

    /// The validated options, with the effective bit depth
    pub fn options(&self) -> &PansharpenOptions {
        &self.options
    }

    pub fn output_band_count(&self) -> usize {
        self.options.output_bands.len()
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    /// The size of the pansharpened output, equal to the panchromatic band size
    pub fn raster_size(&self) -> RasterSize {
        self.panchro_band.size()
    }

    /// Pansharpens `window` into `dst`.
    ///
    /// `dst` contains `window.cell_count()` samples per output band, band after band.
    pub fn process_region<T: RasterNum>(&self, window: PixelWindow, dst: &mut [T]) -> Result<()> {
        let pixel_count = window.cell_count();
        let band_count = self.output_band_count();
        if dst.len() != pixel_count * band_count {
            return Err(Error::InvalidArgument(format!(
                "Output buffer holds {} samples, {} bands of {pixel_count} pixels expected",
                dst.len(),
                band_count
            )));
        }

        window.check_bounds(self.raster_size())?;
        if pixel_count == 0 {
            return Ok(());
        }

        let mut pan = try_zeroed_vec::<f64>(pixel_count)?;
        self.panchro_band.read_window(window, &mut pan)?;

        let spectral = self.upsampled_spectral_bands(window)?;
        let spectral_planes: Vec<&[f64]> = spectral.chunks_exact(pixel_count).collect();

        let task_count = self.task_count(window);
        if task_count <= 1 {
            let mut outputs: Vec<&mut [T]> = dst.chunks_exact_mut(pixel_count).collect();
            return weighted_brovey(&self.fusion, &pan, &spectral_planes, &mut outputs);
        }

        // Row chunks: every task gets a disjoint slice of every output band
        let row_ranges: Vec<(usize, usize)> = (0..task_count)
            .map(|i| (i * window.rows / task_count, (i + 1) * window.rows / task_count))
            .collect();

        let mut tasks: Vec<Vec<&mut [T]>> = (0..task_count).map(|_| Vec::with_capacity(band_count)).collect();
        for mut plane in dst.chunks_exact_mut(pixel_count) {
            for (task, &(start, end)) in tasks.iter_mut().zip(&row_ranges) {
                let (chunk, rest) = std::mem::take(&mut plane).split_at_mut((end - start) * window.cols);
                task.push(chunk);
                plane = rest;
            }
        }

        let fusion = &self.fusion;
        let run = || {
            tasks.into_par_iter().zip(row_ranges.par_iter()).try_for_each(|(mut outputs, &(start, end))| {
                let range = start * window.cols..end * window.cols;
                let spectral: Vec<&[f64]> = spectral_planes.iter().map(|plane| &plane[range.clone()]).collect();
                weighted_brovey(fusion, &pan[range.clone()], &spectral, &mut outputs)
            })
        };

        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }

    /// Type erased variant of `process_region`, the samples are produced in the type of the buffer
    pub fn process_region_buffer(&self, window: PixelWindow, dst: &mut RasterBuffer) -> Result<()> {
        dispatch_rasterbuffer!(dst, data, self.process_region(window, data.as_mut_slice()))
    }

    fn task_count(&self, window: PixelWindow) -> usize {
        if self.pool.is_none() {
            return 1;
        }

        self.thread_count
            .min(window.rows)
            .min(window.cell_count() / MIN_PIXELS_PER_TASK)
            .max(1)
    }

    /// The source window in spectral pixel coordinates matching a panchromatic window
    fn spectral_source_window(&self, window: PixelWindow, ms_size: RasterSize) -> SourceWindow {
        let pan_size = self.raster_size();
        let ratio_x = pan_size.cols as f64 / ms_size.cols as f64;
        let ratio_y = pan_size.rows as f64 / ms_size.rows as f64;

        let x_size = window.cols as f64 / ratio_x;
        let y_size = window.rows as f64 / ratio_y;
        let mut x_off = (window.x_off as f64 + self.options.ms_shift_x) / ratio_x;
        let mut y_off = (window.y_off as f64 + self.options.ms_shift_y) / ratio_y;
        if x_off + x_size > ms_size.cols as f64 {
            x_off = ms_size.cols as f64 - x_size;
        }
        if y_off + y_size > ms_size.rows as f64 {
            y_off = ms_size.rows as f64 - y_size;
        }

        SourceWindow::new(x_off, y_off, x_size, y_size)
    }

    /// Reads the spectral bands and upsamples them to the panchromatic grid of `window`.
    /// The result contains one plane per spectral band.
    fn upsampled_spectral_bands(&self, window: PixelWindow) -> Result<Vec<f64>> {
        let pixel_count = window.cell_count();
        let alg = self.options.resampling;
        let ms_size = self.options.spectral_bands[0].size();
        let src_window = self.spectral_source_window(window, ms_size);
        let extract = extraction_window(src_window, window.size(), alg, ms_size);
        let relative_window = src_window.translated(-(extract.x_off as f64), -(extract.y_off as f64));

        let mut extracted = Vec::with_capacity(self.options.spectral_bands.len());
        for band in &self.options.spectral_bands {
            let mut data = try_zeroed_vec::<f64>(extract.cell_count())?;
            band.read_window(extract, &mut data)?;
            extracted.push(data);
        }

        let mut upsampled = try_zeroed_vec::<f64>(pixel_count * self.options.spectral_bands.len())?;
        let resample_band = |(plane, (src, band)): (&mut [f64], (&Vec<f64>, &Arc<dyn RasterBand>))| -> Result<()> {
            resample::resample(
                src,
                extract.size(),
                relative_window,
                alg,
                self.options.nodata,
                plane,
                window.size(),
            )?;
            self.quantize_to_work_type(plane, band.as_ref());
            Ok(())
        };

        match &self.pool {
            Some(pool) if self.task_count(window) > 1 => pool.install(|| {
                upsampled
                    .par_chunks_exact_mut(pixel_count)
                    .zip(extracted.par_iter().zip(self.options.spectral_bands.par_iter()))
                    .try_for_each(resample_band)
            })?,
            _ => upsampled
                .chunks_exact_mut(pixel_count)
                .zip(extracted.iter().zip(self.options.spectral_bands.iter()))
                .try_for_each(resample_band)?,
        }

        Ok(upsampled)
    }

    /// Rounds the upsampled values to the panchromatic data type and clamps kernel overshoot
    /// to the bit depth for bands that do not advertise their own bit depth
    fn quantize_to_work_type(&self, plane: &mut [f64], band: &dyn RasterBand) {
        let nodata = self.options.nodata;
        let max_value = self.fusion.max_value.filter(|_| {
            self.options.resampling.may_overshoot() && band.nbits().unwrap_or(0) < self.options.bit_depth
        });

        dispatch_datatype!(self.work_type, W, {
            for v in plane.iter_mut().filter(|v| !is_nodata(**v, nodata)) {
                let mut quantized = W::from_f64_saturating(*v).as_f64();
                if let Some(max) = max_value {
                    quantized = quantized.min(max);
                }
                *v = quantized;
            }
        })
    }
}

/// The integral window of spectral pixels needed to resample `src_window`, including the kernel
/// support, clipped to the spectral band
fn extraction_window(src_window: SourceWindow, dst_size: RasterSize, alg: ResampleAlg, ms_size: RasterSize) -> PixelWindow {
    let axis = |off: f64, size: f64, dst_len: usize, src_len: usize| -> (usize, usize) {
        let scale = (size / dst_len as f64).max(1.0);
        let margin = (alg.kernel_radius() as f64 * scale).ceil() as i64 + 1;
        let start = (off.floor() as i64 - margin).clamp(0, src_len as i64 - 1);
        let end = ((off + size).ceil() as i64 + margin).clamp(start + 1, src_len as i64);
        (start as usize, (end - start) as usize)
    };

    let (x_off, cols) = axis(src_window.x_off, src_window.x_size, dst_size.cols, ms_size.cols);
    let (y_off, rows) = axis(src_window.y_off, src_window.y_size, dst_size.rows, ms_size.rows);
    PixelWindow::new(x_off, y_off, cols, rows)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use geo::{ArrayDataType, MemBand, RasterBand, RasterSize};

    use super::*;
    use crate::options::NumThreads;

    fn band(size: usize, value: f64) -> Arc<dyn RasterBand> {
        Arc::new(MemBand::filled(RasterSize::square(size), ArrayDataType::Uint8, value))
    }

    fn gradient_band(size: usize, data_type: ArrayDataType, seed: usize) -> Arc<dyn RasterBand> {
        Arc::new(MemBand::from_fn(RasterSize::square(size), data_type, move |r, c| {
            ((r * 31 + c * 17 + seed * 7) % 200 + 20) as f64
        }))
    }

    #[test_log::test]
    fn end_to_end_byte_clamping() -> Result<()> {
        let mut options = PansharpenOptions::new(band(4, 200.0), vec![band(2, 100.0), band(2, 50.0)]);
        options.weights = vec![0.5, 0.5];
        options.output_bands = vec![0];
        options.resampling = ResampleAlg::Nearest;

        let op = PansharpenOperation::new(&options)?;
        let mut dst = vec![0u8; 16];
        op.process_region(PixelWindow::new(0, 0, 4, 4), &mut dst)?;

        // 100 * 200 / 75 = 267
        assert!(dst.iter().all(|&v| v == 255));

        let mut wide = vec![0u16; 16];
        op.process_region(PixelWindow::new(0, 0, 4, 4), &mut wide)?;
        assert!(wide.iter().all(|&v| v == 267));
        Ok(())
    }

    #[test_log::test]
    fn initialize_validates_weight_count() -> Result<()> {
        let mut options = PansharpenOptions::new(band(4, 200.0), vec![band(2, 100.0), band(2, 50.0)]);
        options.weights = vec![1.0];
        assert!(matches!(PansharpenOperation::new(&options), Err(Error::Config(_))));

        options.weights = vec![0.3, 0.7];
        assert!(PansharpenOperation::new(&options).is_ok());
        Ok(())
    }

    #[test_log::test]
    fn initialize_validation() {
        let valid = PansharpenOptions::new(band(4, 200.0), vec![band(2, 100.0), band(2, 50.0)]);

        let mut options = valid.clone();
        options.panchro_band = None;
        assert!(PansharpenOperation::new(&options).is_err());

        let options = PansharpenOptions::new(band(4, 200.0), vec![]);
        assert!(PansharpenOperation::new(&options).is_err());

        let options = valid.with_bands(band(4, 200.0), vec![band(2, 100.0), band(3, 50.0)]);
        assert!(PansharpenOperation::new(&options).is_err(), "spectral band sizes differ");

        let options = valid.with_bands(band(4, 200.0), vec![band(8, 100.0), band(8, 50.0)]);
        assert!(PansharpenOperation::new(&options).is_err(), "spectral band larger than panchro");

        let mut options = valid.clone();
        options.output_bands = vec![0, 2];
        assert!(PansharpenOperation::new(&options).is_err(), "output band out of range");

        let mut options = valid.clone();
        options.bit_depth = 12;
        assert!(PansharpenOperation::new(&options).is_err(), "bit depth too large for byte");

        let mut options = valid.clone();
        options.bit_depth = 8;
        assert_eq!(PansharpenOperation::new(&options).map(|op| op.options().bit_depth).ok(), Some(0));

        let mut options = valid;
        options.output_bands.clear();
        assert!(PansharpenOperation::new(&options).is_ok(), "no output bands only warns");
    }

    #[test_log::test]
    fn result_does_not_depend_on_thread_count() -> Result<()> {
        let pan = gradient_band(256, ArrayDataType::Uint16, 0);
        let spectral: Vec<_> = (1..=3).map(|seed| gradient_band(64, ArrayDataType::Uint16, seed)).collect();

        let window = PixelWindow::new(3, 5, 240, 200);
        let mut reference: Option<Vec<u16>> = None;
        for threads in [NumThreads::Count(1), NumThreads::Count(4), NumThreads::AllCpus] {
            for alg in [ResampleAlg::Nearest, ResampleAlg::Cubic, ResampleAlg::Lanczos] {
                let mut options = PansharpenOptions::new(pan.clone(), spectral.clone());
                options.num_threads = threads;
                options.resampling = alg;
                options.weights = vec![0.2, 0.5, 0.3];

                let op = PansharpenOperation::new(&options)?;
                let mut dst = vec![0u16; window.cell_count() * 3];
                op.process_region(window, &mut dst)?;

                if alg == ResampleAlg::Cubic {
                    match &reference {
                        Some(expected) => assert_eq!(expected, &dst, "threads: {threads:?}"),
                        None => reference = Some(dst),
                    }
                }
            }
        }
        Ok(())
    }

    #[test_log::test]
    fn region_matches_full_raster() -> Result<()> {
        let pan = gradient_band(32, ArrayDataType::Uint8, 0);
        let spectral: Vec<_> = (1..=2).map(|seed| gradient_band(16, ArrayDataType::Uint8, seed)).collect();
        let mut options = PansharpenOptions::new(pan, spectral);
        options.resampling = ResampleAlg::Bilinear;
        let op = PansharpenOperation::new(&options)?;

        let mut full = vec![0u8; 32 * 32 * 2];
        op.process_region(PixelWindow::new(0, 0, 32, 32), &mut full)?;

        let window = PixelWindow::new(8, 12, 10, 6);
        let mut part = vec![0u8; window.cell_count() * 2];
        op.process_region(window, &mut part)?;

        for band in 0..2 {
            for row in 0..window.rows {
                for col in 0..window.cols {
                    let full_idx = band * 32 * 32 + (window.y_off + row) * 32 + window.x_off + col;
                    let part_idx = band * window.cell_count() + row * window.cols + col;
                    assert_eq!(full[full_idx], part[part_idx]);
                }
            }
        }
        Ok(())
    }

    #[test_log::test]
    fn invalid_region() -> Result<()> {
        let options = PansharpenOptions::new(band(4, 200.0), vec![band(2, 100.0)]);
        let op = PansharpenOperation::new(&options)?;

        let mut dst = vec![0u8; 16];
        assert!(op.process_region(PixelWindow::new(1, 0, 4, 4), &mut dst).is_err());
        assert!(op.process_region(PixelWindow::new(0, 0, 2, 2), &mut dst).is_err());
        Ok(())
    }

    #[test_log::test]
    fn overshoot_is_clamped_to_bit_depth() -> Result<()> {
        let pan = Arc::new(MemBand::filled(RasterSize::square(16), ArrayDataType::Uint16, 1000.0));
        let spectral = Arc::new(MemBand::from_fn(RasterSize::square(4), ArrayDataType::Uint16, |_, c| {
            if c < 2 { 0.0 } else { 4095.0 }
        }));

        let mut options = PansharpenOptions::new(pan, vec![spectral]);
        options.bit_depth = 12;
        options.resampling = ResampleAlg::Cubic;
        options.weights = vec![1.0];
        let op = PansharpenOperation::new(&options)?;

        let window = PixelWindow::new(0, 0, 16, 16);
        let upsampled = op.upsampled_spectral_bands(window)?;
        assert!(upsampled.iter().all(|&v| (0.0..=4095.0).contains(&v)));
        assert!(upsampled.iter().all(|&v| v.fract() == 0.0));
        Ok(())
    }

    #[test_log::test]
    fn shifted_spectral_window() -> Result<()> {
        let pan = band(8, 100.0);
        let spectral: Arc<dyn RasterBand> = Arc::new(MemBand::from_fn(RasterSize::square(4), ArrayDataType::Uint8, |_, c| {
            (c + 1) as f64 * 10.0
        }));

        let mut options = PansharpenOptions::new(pan, vec![spectral]);
        options.resampling = ResampleAlg::Nearest;
        options.ms_shift_x = 2.0;
        let op = PansharpenOperation::new(&options)?;

        let upsampled = op.upsampled_spectral_bands(PixelWindow::new(0, 0, 4, 1))?;
        // shifted by 2 panchromatic pixels = 1 spectral pixel
        assert_eq!(upsampled, [20.0, 20.0, 30.0, 30.0]);
        Ok(())
    }
}
