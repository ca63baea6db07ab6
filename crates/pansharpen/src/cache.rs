//! Caches of pansharpened pixel data
//!
//! - [`RegionCache`]: the last region processed by the engine, for all pansharpened bands at once.
//!   Consecutive scanline reads of the different bands are served from it.
//! - [`BlockCache`]: bounded cache of complete blocks, filled by block reads and sibling warming.

use std::sync::Arc;

use geo::{ArrayDataType, PixelWindow, RasterBuffer, RasterNum};
use moka::sync::Cache as MokaCache;

use crate::{Error, Result};

/// Default capacity of the block cache in bytes
pub const DEFAULT_BLOCK_CACHE_SIZE: u64 = 64 * 1024 * 1024;

/// The output of one engine invocation, band after band
pub struct RegionCache {
    window: PixelWindow,
    data: RasterBuffer,
}

impl RegionCache {
    pub fn new(window: PixelWindow, data: RasterBuffer) -> Self {
        RegionCache { window, data }
    }

    pub fn window(&self) -> PixelWindow {
        self.window
    }

    pub fn data_type(&self) -> ArrayDataType {
        self.data.data_type()
    }

    /// A request can be served when it has the same horizontal extent and data type and its rows
    /// are contained in the cached rows
    pub fn covers(&self, window: PixelWindow, data_type: ArrayDataType) -> bool {
        self.data.data_type() == data_type
            && self.window.x_off == window.x_off
            && self.window.cols == window.cols
            && window.y_off >= self.window.y_off
            && window.y_end() <= self.window.y_end()
    }

    /// Copies the rows of `window` of the cached output band `band` to `dst`
    pub fn copy_band<T: RasterNum>(&self, band: usize, window: PixelWindow, dst: &mut [T]) -> Result<()> {
        let band_offset = band * self.window.cell_count();
        let row_offset = (window.y_off - self.window.y_off) * self.window.cols;
        let Some(dst) = dst.get_mut(..window.cell_count()) else {
            return Err(Error::InvalidArgument(format!(
                "Destination buffer too small for window of {} pixels",
                window.cell_count()
            )));
        };

        self.data.copy_to(band_offset + row_offset, dst)?;
        Ok(())
    }
}

/// Key of a cached block: (band index, block column, block row)
pub type BlockKey = (usize, usize, usize);

/// Blocks of the output bands, evicted when the total size exceeds the capacity
pub struct BlockCache {
    cache: MokaCache<BlockKey, Arc<RasterBuffer>>,
}

impl BlockCache {
    pub fn new(max_size_bytes: u64) -> Self {
        let cache = MokaCache::builder()
            .weigher(|_key: &BlockKey, block: &Arc<RasterBuffer>| -> u32 {
                block.size_in_bytes().min(u32::MAX as usize) as u32
            })
            .max_capacity(max_size_bytes)
            .build();

        BlockCache { cache }
    }

    pub fn get(&self, key: &BlockKey) -> Option<Arc<RasterBuffer>> {
        self.cache.get(key)
    }

    pub fn contains(&self, key: &BlockKey) -> bool {
        self.cache.contains_key(key)
    }

    pub fn insert(&self, key: BlockKey, block: Arc<RasterBuffer>) {
        self.cache.insert(key, block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_cache_covers_row_ranges() -> Result<()> {
        let window = PixelWindow::new(2, 10, 3, 4);
        // 2 bands of 3x4 pixels
        let data = RasterBuffer::U8((0..24).collect());
        let cache = RegionCache::new(window, data);

        assert!(cache.covers(PixelWindow::new(2, 11, 3, 2), ArrayDataType::Uint8));
        assert!(cache.covers(window, ArrayDataType::Uint8));
        assert!(!cache.covers(PixelWindow::new(2, 11, 3, 2), ArrayDataType::Uint16));
        assert!(!cache.covers(PixelWindow::new(1, 11, 3, 2), ArrayDataType::Uint8));
        assert!(!cache.covers(PixelWindow::new(2, 11, 2, 2), ArrayDataType::Uint8));
        assert!(!cache.covers(PixelWindow::new(2, 13, 3, 2), ArrayDataType::Uint8));

        let mut dst = [0u8; 6];
        cache.copy_band(1, PixelWindow::new(2, 11, 3, 2), &mut dst)?;
        assert_eq!(dst, [15, 16, 17, 18, 19, 20]);
        Ok(())
    }

    #[test]
    fn block_cache() {
        let cache = BlockCache::new(DEFAULT_BLOCK_CACHE_SIZE);
        assert!(cache.get(&(0, 0, 0)).is_none());

        cache.insert((0, 0, 0), Arc::new(RasterBuffer::U16(vec![1, 2, 3])));
        assert!(cache.contains(&(0, 0, 0)));
        assert!(!cache.contains(&(1, 0, 0)));
        assert_eq!(cache.get(&(0, 0, 0)).map(|b| b.len()), Some(3));
    }
}
