//! Resampling of raster windows
//!
//! Resamples a window with sub pixel precision of a source buffer onto a destination grid.
//! Source coordinates of destination pixel `i` are `x_off + (i + 0.5) * x_size / dst_cols`.
//! Pixels outside of the source buffer are clamped to the edge, nodata samples do not contribute
//! to the result. The computation has no cross pixel state so the result does not depend on how
//! the destination is partitioned.

use std::f64::consts::PI;

use crate::{Error, RasterSize, Result, SourceWindow, nodata::is_nodata};

/// Resampling algorithms used to map source pixels on a destination grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ResampleAlg {
    /// Nearest neighbour, no smoothing
    Nearest,
    /// Bilinear interpolation using a 2×2 pixel kernel
    Bilinear,
    /// Cubic convolution (Keys, a = -0.5) using a 4×4 kernel
    #[default]
    Cubic,
    /// Cubic B-spline using a 4×4 kernel
    CubicSpline,
    /// Lanczos windowed sinc using a 6×6 kernel
    Lanczos,
    /// Weighted average of all non nodata pixels intersecting the destination pixel
    Average,
    /// Most frequent value of the pixels intersecting the destination pixel
    Mode,
}

impl ResampleAlg {
    pub fn to_str(&self) -> &'static str {
        match self {
            ResampleAlg::Nearest => "Nearest",
            ResampleAlg::Bilinear => "Bilinear",
            ResampleAlg::Cubic => "Cubic",
            ResampleAlg::CubicSpline => "CubicSpline",
            ResampleAlg::Lanczos => "Lanczos",
            ResampleAlg::Average => "Average",
            ResampleAlg::Mode => "Mode",
        }
    }

    /// Radius of the filter kernel in source pixels (when upsampling)
    pub fn kernel_radius(&self) -> usize {
        match self {
            ResampleAlg::Nearest | ResampleAlg::Average | ResampleAlg::Mode => 0,
            ResampleAlg::Bilinear => 1,
            ResampleAlg::Cubic | ResampleAlg::CubicSpline => 2,
            ResampleAlg::Lanczos => 3,
        }
    }

    /// Kernels with negative lobes can produce values outside of the input range
    pub fn may_overshoot(&self) -> bool {
        matches!(self, ResampleAlg::Cubic | ResampleAlg::CubicSpline | ResampleAlg::Lanczos)
    }

    fn kernel(&self, x: f64) -> f64 {
        let x = x.abs();
        match self {
            ResampleAlg::Bilinear => (1.0 - x).max(0.0),
            ResampleAlg::Cubic => {
                const A: f64 = -0.5;
                if x < 1.0 {
                    ((A + 2.0) * x - (A + 3.0)) * x * x + 1.0
                } else if x < 2.0 {
                    ((A * x - 5.0 * A) * x + 8.0 * A) * x - 4.0 * A
                } else {
                    0.0
                }
            }
            ResampleAlg::CubicSpline => {
                if x < 1.0 {
                    (4.0 - 6.0 * x * x + 3.0 * x * x * x) / 6.0
                } else if x < 2.0 {
                    (2.0 - x).powi(3) / 6.0
                } else {
                    0.0
                }
            }
            ResampleAlg::Lanczos => {
                const A: f64 = 3.0;
                if x == 0.0 {
                    1.0
                } else if x < A {
                    let px = PI * x;
                    A * px.sin() * (px / A).sin() / (px * px)
                } else {
                    0.0
                }
            }
            ResampleAlg::Nearest | ResampleAlg::Average | ResampleAlg::Mode => 0.0,
        }
    }
}

impl std::fmt::Display for ResampleAlg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl std::str::FromStr for ResampleAlg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "nearest" | "near" | "nearestneighbour" => ResampleAlg::Nearest,
            "bilinear" => ResampleAlg::Bilinear,
            "cubic" => ResampleAlg::Cubic,
            "cubicspline" => ResampleAlg::CubicSpline,
            "lanczos" => ResampleAlg::Lanczos,
            "average" => ResampleAlg::Average,
            "mode" => ResampleAlg::Mode,
            _ => return Err(Error::InvalidArgument(format!("Unsupported resampling algorithm: {s}"))),
        })
    }
}

/// Contributing source pixels of one destination pixel along one axis
struct Taps {
    indexes: Vec<usize>,
    weights: Vec<f64>,
}

fn clamp_index(idx: isize, len: usize) -> usize {
    idx.clamp(0, len as isize - 1) as usize
}

fn nearest_taps(dst_len: usize, src_len: usize, off: f64, size: f64) -> Vec<Taps> {
    let scale = size / dst_len as f64;
    (0..dst_len)
        .map(|i| {
            let src = off + (i as f64 + 0.5) * scale;
            Taps {
                indexes: vec![clamp_index(src.floor() as isize, src_len)],
                weights: vec![1.0],
            }
        })
        .collect()
}

fn kernel_taps(alg: ResampleAlg, dst_len: usize, src_len: usize, off: f64, size: f64) -> Vec<Taps> {
    let scale = size / dst_len as f64;
    // widen the kernel when downsampling
    let filter_scale = scale.max(1.0);
    let support = alg.kernel_radius() as f64 * filter_scale;

    (0..dst_len)
        .map(|i| {
            let center = off + (i as f64 + 0.5) * scale - 0.5;
            let first = (center - support).ceil() as isize;
            let last = (center + support).floor() as isize;

            let mut taps = Taps {
                indexes: Vec::with_capacity((last - first + 1).max(0) as usize),
                weights: Vec::with_capacity((last - first + 1).max(0) as usize),
            };
            for j in first..=last {
                let weight = alg.kernel((j as f64 - center) / filter_scale);
                if weight != 0.0 {
                    taps.indexes.push(clamp_index(j, src_len));
                    taps.weights.push(weight);
                }
            }

            if taps.indexes.is_empty() {
                taps.indexes.push(clamp_index(center.round() as isize, src_len));
                taps.weights.push(1.0);
            }

            taps
        })
        .collect()
}

fn area_taps(dst_len: usize, src_len: usize, off: f64, size: f64) -> Vec<Taps> {
    let scale = size / dst_len as f64;

    (0..dst_len)
        .map(|i| {
            let x0 = off + i as f64 * scale;
            let x1 = x0 + scale;

            let mut taps = Taps {
                indexes: Vec::new(),
                weights: Vec::new(),
            };
            let mut j = x0.floor() as isize;
            while (j as f64) < x1 {
                let overlap = x1.min((j + 1) as f64) - x0.max(j as f64);
                if overlap > 0.0 {
                    taps.indexes.push(clamp_index(j, src_len));
                    taps.weights.push(overlap);
                }
                j += 1;
            }

            if taps.indexes.is_empty() {
                taps.indexes.push(clamp_index(x0.floor() as isize, src_len));
                taps.weights.push(1.0);
            }

            taps
        })
        .collect()
}

/// Resamples `window` of the `src` buffer onto the `dst` buffer.
/// Both buffers are row major, `src` contains `src_size` samples and `dst` `dst_size` samples.
pub fn resample(
    src: &[f64],
    src_size: RasterSize,
    window: SourceWindow,
    alg: ResampleAlg,
    nodata: Option<f64>,
    dst: &mut [f64],
    dst_size: RasterSize,
) -> Result<()> {
    if src_size.is_empty() || src.len() < src_size.cell_count() {
        return Err(Error::InvalidArgument(format!(
            "Invalid resampling source: {} samples for size {src_size}",
            src.len()
        )));
    }

    if dst.len() < dst_size.cell_count() {
        return Err(Error::InvalidArgument(format!(
            "Resampling destination buffer too small: {} samples for size {dst_size}",
            dst.len()
        )));
    }

    if dst_size.is_empty() {
        return Ok(());
    }

    let (x_taps, y_taps) = match alg {
        ResampleAlg::Nearest => (
            nearest_taps(dst_size.cols, src_size.cols, window.x_off, window.x_size),
            nearest_taps(dst_size.rows, src_size.rows, window.y_off, window.y_size),
        ),
        ResampleAlg::Average | ResampleAlg::Mode => (
            area_taps(dst_size.cols, src_size.cols, window.x_off, window.x_size),
            area_taps(dst_size.rows, src_size.rows, window.y_off, window.y_size),
        ),
        _ => (
            kernel_taps(alg, dst_size.cols, src_size.cols, window.x_off, window.x_size),
            kernel_taps(alg, dst_size.rows, src_size.rows, window.y_off, window.y_size),
        ),
    };

    let fill = nodata.unwrap_or(0.0);
    let mut mode_counts: Vec<(f64, f64)> = Vec::new();

    for (dst_row, ty) in dst.chunks_exact_mut(dst_size.cols).take(dst_size.rows).zip(y_taps.iter()) {
        for (dst_val, tx) in dst_row.iter_mut().zip(x_taps.iter()) {
            if alg == ResampleAlg::Mode {
                mode_counts.clear();
                for (&sy, &wy) in ty.indexes.iter().zip(&ty.weights) {
                    for (&sx, &wx) in tx.indexes.iter().zip(&tx.weights) {
                        let v = src[sy * src_size.cols + sx];
                        if is_nodata(v, nodata) {
                            continue;
                        }

                        match mode_counts.iter_mut().find(|(val, _)| *val == v) {
                            Some((_, weight)) => *weight += wy * wx,
                            None => mode_counts.push((v, wy * wx)),
                        }
                    }
                }

                *dst_val = mode_counts
                    .iter()
                    .fold(None, |best: Option<(f64, f64)>, &(v, w)| match best {
                        Some((_, best_w)) if best_w >= w => best,
                        _ => Some((v, w)),
                    })
                    .map_or(fill, |(v, _)| v);
                continue;
            }

            let mut sum = 0.0;
            let mut weight_sum = 0.0;
            for (&sy, &wy) in ty.indexes.iter().zip(&ty.weights) {
                let src_row = &src[sy * src_size.cols..(sy + 1) * src_size.cols];
                for (&sx, &wx) in tx.indexes.iter().zip(&tx.weights) {
                    let v = src_row[sx];
                    if is_nodata(v, nodata) {
                        continue;
                    }

                    let w = wy * wx;
                    sum += w * v;
                    weight_sum += w;
                }
            }

            *dst_val = if weight_sum.abs() > 1e-12 { sum / weight_sum } else { fill };
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    const ALL_KERNELS: [ResampleAlg; 7] = [
        ResampleAlg::Nearest,
        ResampleAlg::Bilinear,
        ResampleAlg::Cubic,
        ResampleAlg::CubicSpline,
        ResampleAlg::Lanczos,
        ResampleAlg::Average,
        ResampleAlg::Mode,
    ];

    #[test]
    fn parse_names() -> Result<()> {
        assert_eq!("cubic".parse::<ResampleAlg>()?, ResampleAlg::Cubic);
        assert_eq!("NEAREST".parse::<ResampleAlg>()?, ResampleAlg::Nearest);
        assert_eq!("CubicSpline".parse::<ResampleAlg>()?, ResampleAlg::CubicSpline);
        assert!("gauss".parse::<ResampleAlg>().is_err());
        for alg in ALL_KERNELS {
            assert_eq!(alg.to_str().parse::<ResampleAlg>()?, alg);
        }
        Ok(())
    }

    #[test]
    fn nearest_upsampling_replicates_pixels() -> Result<()> {
        let src = [1.0, 2.0, 3.0, 4.0];
        let mut dst = vec![0.0; 16];
        resample(
            &src,
            RasterSize::square(2),
            SourceWindow::new(0.0, 0.0, 2.0, 2.0),
            ResampleAlg::Nearest,
            None,
            &mut dst,
            RasterSize::square(4),
        )?;

        #[rustfmt::skip]
        assert_eq!(dst, [
            1.0, 1.0, 2.0, 2.0,
            1.0, 1.0, 2.0, 2.0,
            3.0, 3.0, 4.0, 4.0,
            3.0, 3.0, 4.0, 4.0,
        ]);
        Ok(())
    }

    #[test]
    fn constant_input_is_preserved_by_all_kernels() -> Result<()> {
        let src = vec![42.0; 25];
        for alg in ALL_KERNELS {
            let mut dst = vec![0.0; 100];
            resample(
                &src,
                RasterSize::square(5),
                SourceWindow::new(0.0, 0.0, 5.0, 5.0),
                alg,
                None,
                &mut dst,
                RasterSize::square(10),
            )?;
            for v in dst {
                assert_relative_eq!(v, 42.0, epsilon = 1e-9);
            }
        }
        Ok(())
    }

    #[test]
    fn nodata_does_not_contribute() -> Result<()> {
        let src = [10.0, 0.0, 10.0, 10.0];
        let mut dst = vec![0.0; 16];
        resample(
            &src,
            RasterSize::square(2),
            SourceWindow::new(0.0, 0.0, 2.0, 2.0),
            ResampleAlg::Bilinear,
            Some(0.0),
            &mut dst,
            RasterSize::square(4),
        )?;
        // pixels that only see nodata samples become nodata, the others are not pulled towards 0
        assert!(dst.iter().all(|&v| v == 10.0 || v == 0.0));
        assert_eq!(dst[2], 10.0);
        assert_eq!(dst[3], 0.0);
        assert_eq!(dst[15], 10.0);

        let all_nodata = [0.0; 4];
        resample(
            &all_nodata,
            RasterSize::square(2),
            SourceWindow::new(0.0, 0.0, 2.0, 2.0),
            ResampleAlg::Cubic,
            Some(0.0),
            &mut dst,
            RasterSize::square(2),
        )?;
        assert!(dst[..4].iter().all(|&v| v == 0.0));
        Ok(())
    }

    #[test]
    fn average_downsampling() -> Result<()> {
        #[rustfmt::skip]
        let src = [
            1.0, 3.0, 5.0, 5.0,
            1.0, 3.0, 5.0, 5.0,
            2.0, 2.0, 8.0, 9.0,
            2.0, 2.0, 7.0, 8.0,
        ];
        let mut dst = vec![0.0; 4];
        resample(
            &src,
            RasterSize::square(4),
            SourceWindow::new(0.0, 0.0, 4.0, 4.0),
            ResampleAlg::Average,
            None,
            &mut dst,
            RasterSize::square(2),
        )?;
        assert_eq!(dst, [2.0, 5.0, 2.0, 8.0]);

        resample(
            &src,
            RasterSize::square(4),
            SourceWindow::new(0.0, 0.0, 4.0, 4.0),
            ResampleAlg::Mode,
            None,
            &mut dst,
            RasterSize::square(2),
        )?;
        assert_eq!(dst, [1.0, 5.0, 2.0, 8.0]);
        Ok(())
    }

    #[test]
    fn cubic_overshoots_at_edges() -> Result<()> {
        let src = [0.0, 0.0, 255.0, 255.0];
        let mut dst = vec![0.0; 16];
        resample(
            &src,
            RasterSize::with_rows_cols(1, 4),
            SourceWindow::new(0.0, 0.0, 4.0, 1.0),
            ResampleAlg::Cubic,
            None,
            &mut dst,
            RasterSize::with_rows_cols(1, 16),
        )?;
        assert!(dst.iter().any(|&v| v > 255.0));
        assert!(dst.iter().any(|&v| v < 0.0));
        Ok(())
    }
}
