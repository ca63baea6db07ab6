use std::sync::Arc;

use geo::{RasterBand, ResampleAlg};

use crate::{Error, Result};

/// The pansharpening algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PansharpenAlgorithm {
    /// Weighted Brovey transform: spectral values are scaled by the ratio of the panchromatic value
    /// and the weighted sum of all spectral values
    #[default]
    WeightedBrovey,
}

impl PansharpenAlgorithm {
    pub fn to_str(&self) -> &'static str {
        match self {
            PansharpenAlgorithm::WeightedBrovey => "WeightedBrovey",
        }
    }
}

impl std::fmt::Display for PansharpenAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl std::str::FromStr for PansharpenAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("WeightedBrovey") {
            Ok(PansharpenAlgorithm::WeightedBrovey)
        } else {
            Err(Error::Config(format!("Algorithm {s} unsupported")))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumThreads {
    /// Use a worker for every available cpu
    AllCpus,
    /// Fixed number of workers, 0 falls back to the `GDAL_NUM_THREADS` environment variable, 1 is serial
    Count(usize),
}

impl Default for NumThreads {
    fn default() -> Self {
        NumThreads::Count(0)
    }
}

/// Environment variable consulted when the thread count is left at 0
pub const NUM_THREADS_ENV: &str = "GDAL_NUM_THREADS";

/// Upper bound of the number of worker threads
pub const MAX_NUM_THREADS: usize = 128;

impl NumThreads {
    /// Parses the `ALL_CPUS` literal or a thread count (-1 also means all cpus)
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("ALL_CPUS") {
            return Ok(NumThreads::AllCpus);
        }

        match s.parse::<i64>()? {
            -1 => Ok(NumThreads::AllCpus),
            count if count >= 0 => Ok(NumThreads::Count(count as usize)),
            count => Err(Error::Config(format!("Invalid thread count: {count}"))),
        }
    }

    /// The number of workers to use, between 1 and [`MAX_NUM_THREADS`]
    pub fn resolve(&self) -> usize {
        let all_cpus = || std::thread::available_parallelism().map_or(1, |n| n.get());

        let count = match self {
            NumThreads::AllCpus => all_cpus(),
            NumThreads::Count(0) => match std::env::var(NUM_THREADS_ENV) {
                Ok(val) => match NumThreads::parse(&val) {
                    Ok(NumThreads::AllCpus) => all_cpus(),
                    Ok(NumThreads::Count(count)) => count.max(1),
                    Err(_) => 1,
                },
                Err(_) => 1,
            },
            NumThreads::Count(count) => *count,
        };

        if count > MAX_NUM_THREADS {
            log::debug!("Thread count {count} limited to {MAX_NUM_THREADS}");
        }

        count.clamp(1, MAX_NUM_THREADS)
    }
}

/// Options of a pansharpening operation
///
/// The band references are shared handles, cloning the options copies the weight and band lists
/// while the bands themselves stay owned by whoever opened them.
#[derive(Clone, Default)]
pub struct PansharpenOptions {
    /// The pansharpening algorithm (default = `WeightedBrovey`)
    pub algorithm: PansharpenAlgorithm,
    /// Kernel used to upsample the spectral bands to the panchromatic resolution (default = `Cubic`)
    pub resampling: ResampleAlg,
    /// Number of significant bits of the samples, 0 means unspecified (default = 0)
    pub bit_depth: u32,
    /// Weight of every input spectral band in the synthetic panchromatic value
    pub weights: Vec<f64>,
    /// The high resolution panchromatic band
    pub panchro_band: Option<Arc<dyn RasterBand>>,
    /// The lower resolution spectral input bands
    pub spectral_bands: Vec<Arc<dyn RasterBand>>,
    /// For every output band the index of the spectral input band it sharpens
    pub output_bands: Vec<usize>,
    /// Nodata value shared by the panchromatic and spectral bands
    pub nodata: Option<f64>,
    /// Configure how many threads to use (default = `NumThreads::Count(0)`)
    pub num_threads: NumThreads,
    /// Shift of the spectral bands, expressed in panchromatic pixels
    pub ms_shift_x: f64,
    pub ms_shift_y: f64,
}

impl PansharpenOptions {
    /// Options with uniform weights where every spectral band produces an output band
    pub fn new(panchro_band: Arc<dyn RasterBand>, spectral_bands: Vec<Arc<dyn RasterBand>>) -> Self {
        let band_count = spectral_bands.len();
        PansharpenOptions {
            weights: uniform_weights(band_count),
            panchro_band: Some(panchro_band),
            spectral_bands,
            output_bands: (0..band_count).collect(),
            ..Default::default()
        }
    }

    /// Copy of the options referring to different bands, used to pansharpen overview levels
    pub fn with_bands(&self, panchro_band: Arc<dyn RasterBand>, spectral_bands: Vec<Arc<dyn RasterBand>>) -> Self {
        PansharpenOptions {
            panchro_band: Some(panchro_band),
            spectral_bands,
            ..self.clone()
        }
    }
}

impl std::fmt::Debug for PansharpenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PansharpenOptions")
            .field("algorithm", &self.algorithm)
            .field("resampling", &self.resampling)
            .field("bit_depth", &self.bit_depth)
            .field("weights", &self.weights)
            .field("panchro_band", &self.panchro_band.as_ref().map(|b| b.size()))
            .field("spectral_bands", &self.spectral_bands.len())
            .field("output_bands", &self.output_bands)
            .field("nodata", &self.nodata)
            .field("num_threads", &self.num_threads)
            .field("ms_shift", &(self.ms_shift_x, self.ms_shift_y))
            .finish()
    }
}

/// `count` weights of `1 / count`
pub fn uniform_weights(count: usize) -> Vec<f64> {
    vec![1.0 / count as f64; count]
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn parse_thread_count() -> Result<()> {
        assert_eq!(NumThreads::parse("ALL_CPUS")?, NumThreads::AllCpus);
        assert_eq!(NumThreads::parse("-1")?, NumThreads::AllCpus);
        assert_eq!(NumThreads::parse(" 4 ")?, NumThreads::Count(4));
        assert!(NumThreads::parse("-3").is_err());
        assert!(NumThreads::parse("many").is_err());

        assert_eq!(NumThreads::Count(3).resolve(), 3);
        assert!(NumThreads::AllCpus.resolve() >= 1);
        assert!(NumThreads::AllCpus.resolve() <= MAX_NUM_THREADS);
        assert_eq!(NumThreads::Count(100_000).resolve(), MAX_NUM_THREADS);
        Ok(())
    }

    #[test]
    fn default_weights_are_uniform() {
        let weights = uniform_weights(3);
        assert_eq!(weights.len(), 3);
        for w in &weights {
            assert_relative_eq!(*w, 1.0 / 3.0);
        }
        assert_relative_eq!(weights.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn parse_algorithm() {
        assert!("WeightedBrovey".parse::<PansharpenAlgorithm>().is_ok());
        assert!(matches!("IHS".parse::<PansharpenAlgorithm>(), Err(Error::Config(_))));
    }
}
