//! Weighted Brovey fusion kernel
//!
//! Per pixel the synthetic panchromatic value is the weighted sum of all spectral inputs.
//! Every output sample is the spectral input scaled by the ratio of the real and the synthetic
//! panchromatic value. The kernel has no state across pixels, so it can be applied to any
//! partition of the pixels independently.

use geo::{RasterNum, nodata::is_nodata};

use crate::{Error, Result};

/// Parameters of the fusion kernel, derived from validated pansharpen options
#[derive(Debug, Clone, PartialEq)]
pub struct FusionParams {
    pub weights: Vec<f64>,
    /// Index of the spectral input for every output band
    pub output_bands: Vec<usize>,
    pub nodata: Option<f64>,
    /// Upper bound for the output values, derived from the bit depth
    pub max_value: Option<f64>,
}

/// Applies the weighted Brovey transform.
///
/// `pan` contains the panchromatic samples, `spectral` one slice per input spectral band with the
/// upsampled samples at the same positions and `outputs` one slice per output band.
pub fn weighted_brovey<T: RasterNum>(params: &FusionParams, pan: &[f64], spectral: &[&[f64]], outputs: &mut [&mut [T]]) -> Result<()> {
    let len = pan.len();
    if spectral.len() != params.weights.len() || spectral.iter().any(|band| band.len() != len) {
        return Err(Error::InvalidArgument(format!(
            "Fusion expects {} spectral inputs of {len} samples",
            params.weights.len()
        )));
    }

    if outputs.len() != params.output_bands.len() || outputs.iter().any(|band| band.len() != len) {
        return Err(Error::InvalidArgument(format!(
            "Fusion expects {} output bands of {len} samples",
            params.output_bands.len()
        )));
    }

    if let Some(&invalid) = params.output_bands.iter().find(|&&idx| idx >= spectral.len()) {
        return Err(Error::InvalidArgument(format!("Invalid output band mapping: spectral band {invalid}")));
    }

    match params.nodata {
        Some(nodata) => brovey_with_nodata(params, nodata, pan, spectral, outputs),
        None => brovey(params, pan, spectral, outputs),
    }

    Ok(())
}

#[inline]
fn pseudo_panchro(weights: &[f64], spectral: &[&[f64]], j: usize) -> f64 {
    weights.iter().zip(spectral).map(|(w, band)| w * band[j]).sum()
}

#[inline]
fn clamp_max(value: f64, max_value: Option<f64>) -> f64 {
    match max_value {
        Some(max) if value > max => max,
        _ => value,
    }
}

fn brovey<T: RasterNum>(params: &FusionParams, pan: &[f64], spectral: &[&[f64]], outputs: &mut [&mut [T]]) {
    for (j, &pan_value) in pan.iter().enumerate() {
        let pseudo = pseudo_panchro(&params.weights, spectral, j);
        let ratio = if pseudo != 0.0 { pan_value / pseudo } else { 0.0 };

        for (out, &band_idx) in outputs.iter_mut().zip(&params.output_bands) {
            out[j] = T::from_f64_saturating(clamp_max(spectral[band_idx][j] * ratio, params.max_value));
        }
    }
}

fn brovey_with_nodata<T: RasterNum>(params: &FusionParams, nodata: f64, pan: &[f64], spectral: &[&[f64]], outputs: &mut [&mut [T]]) {
    let nodata_out = T::from_f64_saturating(nodata);
    let valid_value = T::nearest_valid_value(nodata_out);

    for (j, &pan_value) in pan.iter().enumerate() {
        let has_nodata = is_nodata(pan_value, Some(nodata)) || spectral.iter().any(|band| is_nodata(band[j], Some(nodata)));
        let pseudo = if has_nodata {
            0.0
        } else {
            pseudo_panchro(&params.weights, spectral, j)
        };

        if pseudo == 0.0 {
            for out in outputs.iter_mut() {
                out[j] = nodata_out;
            }
            continue;
        }

        let ratio = pan_value / pseudo;
        for (out, &band_idx) in outputs.iter_mut().zip(&params.output_bands) {
            let value = T::from_f64_saturating(clamp_max(spectral[band_idx][j] * ratio, params.max_value));
            // a valid pixel should never be reported as nodata
            out[j] = if value == nodata_out { valid_value } else { value };
        }
    }
}

#[cfg(test)]
#[generic_tests::define]
mod generic {
    use super::*;

    fn params(weights: &[f64], output_bands: &[usize]) -> FusionParams {
        FusionParams {
            weights: weights.to_vec(),
            output_bands: output_bands.to_vec(),
            nodata: None,
            max_value: None,
        }
    }

    #[test]
    fn zero_pseudo_panchro_gives_zero<T: RasterNum>() -> Result<()> {
        let pan = [100.0, 50.0];
        let b1 = [0.0, 0.0];
        let b2 = [0.0, 7.0];
        let mut out1 = vec![T::from_f64_saturating(1.0); 2];
        let mut out2 = vec![T::from_f64_saturating(1.0); 2];

        // weights cancel out for the second pixel
        weighted_brovey(&params(&[1.0, 0.0], &[0, 1]), &pan, &[&b1, &b2], &mut [&mut out1, &mut out2])?;

        assert_eq!(out1[0].as_f64(), 0.0);
        assert_eq!(out2[0].as_f64(), 0.0);
        assert_eq!(out1[1].as_f64(), 0.0);
        assert_eq!(out2[1].as_f64(), 0.0);
        Ok(())
    }

    #[test]
    fn uniform_stack_reproduces_panchro<T: RasterNum>() -> Result<()> {
        let pan = [42.0, 17.0, 100.0];
        let spectral = [60.0, 60.0, 60.0];
        let mut outputs = vec![vec![T::from_f64_saturating(0.0); 3]; 3];
        let mut out_slices: Vec<&mut [T]> = outputs.iter_mut().map(|o| o.as_mut_slice()).collect();

        weighted_brovey(
            &params(&crate::options::uniform_weights(3), &[0, 1, 2]),
            &pan,
            &[&spectral, &spectral, &spectral],
            &mut out_slices,
        )?;

        for out in &outputs {
            for (v, p) in out.iter().zip(pan) {
                approx::assert_relative_eq!(v.as_f64(), p, epsilon = 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn nodata_is_propagated<T: RasterNum>() -> Result<()> {
        let mut p = params(&[0.5, 0.5], &[0]);
        p.nodata = Some(0.0);

        let pan = [0.0, 10.0, 10.0, 10.0];
        let b1 = [5.0, 0.0, 5.0, 1.0];
        let b2 = [5.0, 5.0, 5.0, -1.0];
        let mut out = vec![T::from_f64_saturating(99.0); 4];
        weighted_brovey(&p, &pan, &[&b1, &b2], &mut [&mut out])?;

        assert_eq!(out[0].as_f64(), 0.0, "panchro nodata");
        assert_eq!(out[1].as_f64(), 0.0, "spectral nodata");
        assert_eq!(out[2].as_f64(), 10.0);
        assert_eq!(out[3].as_f64(), 0.0, "zero synthetic panchro");
        Ok(())
    }

    #[test]
    fn mapping_validation<T: RasterNum>() {
        let pan = [1.0];
        let b1 = [1.0];
        let mut out = vec![T::from_f64_saturating(0.0); 1];
        assert!(weighted_brovey(&params(&[1.0], &[1]), &pan, &[&b1], &mut [&mut out]).is_err());
        assert!(weighted_brovey(&params(&[1.0, 1.0], &[0]), &pan, &[&b1], &mut [&mut out]).is_err());
    }

    #[instantiate_tests(<u8>)]
    mod u8 {}

    #[instantiate_tests(<u16>)]
    mod u16 {}

    #[instantiate_tests(<i16>)]
    mod i16 {}

    #[instantiate_tests(<u32>)]
    mod u32 {}

    #[instantiate_tests(<i32>)]
    mod i32 {}

    #[instantiate_tests(<f32>)]
    mod f32 {}

    #[instantiate_tests(<f64>)]
    mod f64 {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_to_byte_range() -> Result<()> {
        let params = FusionParams {
            weights: vec![0.5, 0.5],
            output_bands: vec![0, 1],
            nodata: None,
            max_value: None,
        };

        let pan = [200.0, 10.0];
        let b1 = [100.0, 100.0];
        let b2 = [50.0, -300.0];
        let mut out1 = [0u8; 2];
        let mut out2 = [0u8; 2];
        weighted_brovey(&params, &pan, &[&b1, &b2], &mut [&mut out1, &mut out2])?;

        // 100 * 200 / 75 = 266.67
        assert_eq!(out1[0], 255);
        assert_eq!(out2[0], 133);
        // negative ratio: 10 / -100
        assert_eq!(out1[1], 0);
        assert_eq!(out2[1], 30);
        Ok(())
    }

    #[test]
    fn float_output_is_not_clamped() -> Result<()> {
        let params = FusionParams {
            weights: vec![1.0],
            output_bands: vec![0],
            nodata: None,
            max_value: None,
        };

        let mut out = [0f32; 1];
        weighted_brovey(&params, &[3.0], &[&[2.0]], &mut [&mut out])?;
        assert_eq!(out[0], 3.0);

        weighted_brovey(&params, &[1000.0], &[&[-0.5]], &mut [&mut out])?;
        assert_eq!(out[0], 1000.0);
        Ok(())
    }

    #[test]
    fn bit_depth_limits_output() -> Result<()> {
        let params = FusionParams {
            weights: vec![1.0],
            output_bands: vec![0],
            nodata: None,
            max_value: Some(4095.0),
        };

        let mut out = [0u16; 2];
        weighted_brovey(&params, &[8000.0, 1000.0], &[&[1000.0, 1000.0]], &mut [&mut out])?;
        assert_eq!(out, [4095, 1000]);
        Ok(())
    }

    #[test]
    fn valid_value_is_not_mapped_to_nodata() -> Result<()> {
        let params = FusionParams {
            weights: vec![1.0, 0.0],
            output_bands: vec![1],
            nodata: Some(255.0),
            max_value: None,
        };

        // 150 * 100 / 50 = 300 saturates to the nodata value
        let mut out = [0u8; 1];
        weighted_brovey(&params, &[100.0], &[&[50.0], &[150.0]], &mut [&mut out])?;
        assert_eq!(out[0], 254);

        let params = FusionParams {
            nodata: Some(0.0),
            ..params
        };

        // 2 * 10 / 100 = 0.2 rounds to the nodata value
        weighted_brovey(&params, &[10.0], &[&[100.0], &[2.0]], &mut [&mut out])?;
        assert_eq!(out[0], 1);

        weighted_brovey(&params, &[10.0], &[&[100.0], &[50.0]], &mut [&mut out])?;
        assert_eq!(out[0], 5);
        Ok(())
    }
}
