//! Band index utilities.

use crate::{Error, Result};

/// 1-based raster band index.
///
/// The band api's use a 1-based index for bands. We use `NonZeroUsize` to
/// make it impossible to represent band index 0.
pub type BandIndex = std::num::NonZeroUsize;

/// Convenience constant for the first band (band 1).
pub const FIRST_BAND: BandIndex = std::num::NonZeroUsize::new(1).unwrap();

/// Converts a 1-based band number coming from user input to a `BandIndex`
pub fn band_index(band_nr: usize) -> Result<BandIndex> {
    BandIndex::new(band_nr).ok_or_else(|| Error::InvalidArgument("Band numbers are 1-based, got band 0".to_string()))
}

/// The `BandIndex` of the band at the 0-based position `pos`
pub fn band_at(pos: usize) -> BandIndex {
    BandIndex::MIN.saturating_add(pos)
}
