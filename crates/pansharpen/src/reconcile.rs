//! Unification of the grids of the panchromatic and spectral sources
//!
//! The sources of a pansharpened dataset do not necessarily cover the same area. Depending on the
//! configured [`SpatialExtentAdjustment`] the sources are wrapped in windowed views that share a
//! common extent, aligned on the panchromatic grid.

use std::sync::Arc;

use geo::{GeoTransform, RasterDataset, RasterSize, Rect, SourceBand, WindowedDataset};

use crate::{Error, Result};

/// How to handle panchromatic and spectral sources with a different spatial extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpatialExtentAdjustment {
    /// The smallest extent containing all sources
    #[default]
    Union,
    /// The largest extent contained in all sources
    Intersection,
    /// Use the grids unmodified, warn about mismatches
    None,
    /// Use the grids unmodified
    NoneWithoutWarning,
}

impl SpatialExtentAdjustment {
    pub fn to_str(&self) -> &'static str {
        match self {
            SpatialExtentAdjustment::Union => "Union",
            SpatialExtentAdjustment::Intersection => "Intersection",
            SpatialExtentAdjustment::None => "None",
            SpatialExtentAdjustment::NoneWithoutWarning => "NoneWithoutWarning",
        }
    }
}

impl std::fmt::Display for SpatialExtentAdjustment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl std::str::FromStr for SpatialExtentAdjustment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            SpatialExtentAdjustment::Union,
            SpatialExtentAdjustment::Intersection,
            SpatialExtentAdjustment::None,
            SpatialExtentAdjustment::NoneWithoutWarning,
        ]
        .into_iter()
        .find(|adjustment| adjustment.to_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| Error::Config(format!("Unsupported value for SpatialExtentAdjustment: {s}")))
    }
}

/// The sources after reconciliation, sources that were adjusted refer to a windowed view
#[derive(Debug, Clone)]
pub struct ReconciledSources {
    pub panchro: SourceBand,
    pub spectral: Vec<SourceBand>,
}

/// A distinct source dataset with its georeferencing
struct GridSource {
    dataset: Arc<dyn RasterDataset>,
    geo_transform: GeoTransform,
    bounds: Rect,
}

impl GridSource {
    fn new(dataset: &Arc<dyn RasterDataset>) -> Option<Self> {
        let geo_transform = dataset.geo_transform()?;
        Some(GridSource {
            dataset: dataset.clone(),
            geo_transform,
            bounds: geo_transform.bounds(dataset.raster_size()),
        })
    }
}

fn distinct_datasets<'a>(bands: impl Iterator<Item = &'a SourceBand>) -> Vec<Arc<dyn RasterDataset>> {
    let mut datasets: Vec<Arc<dyn RasterDataset>> = Vec::new();
    for band in bands {
        if !datasets.iter().any(|ds| Arc::ptr_eq(ds, band.dataset())) {
            datasets.push(band.dataset().clone());
        }
    }

    datasets
}

/// Snaps the extent outward to the pixel boundaries of the panchromatic grid
fn snap_to_grid(extent: &Rect, pan_gt: &GeoTransform) -> Rect {
    const EPS: f64 = 1e-6;
    let [x0, dx, _, y0, _, dy] = pan_gt.coefficients();

    let col_min = ((extent.min_x() - x0) / dx + EPS).floor();
    let row_min = ((extent.max_y() - y0) / dy + EPS).floor();
    let col_max = ((extent.max_x() - x0) / dx - EPS).ceil();
    let row_max = ((extent.min_y() - y0) / dy - EPS).ceil();

    Rect::from_points(pan_gt.apply(col_min, row_min), pan_gt.apply(col_max, row_max))
}

/// View of `source` covering `extent`, keeping the resolution of the source
fn windowed_view(source: &GridSource, extent: &Rect, projection: Option<String>) -> Result<Arc<dyn RasterDataset>> {
    let [gt0, gt1, _, gt3, _, gt5] = source.geo_transform.coefficients();

    let x_off = ((extent.min_x() - gt0) / gt1 + 0.001).floor() as i64;
    let y_off = ((extent.max_y() - gt3) / gt5 + 0.001).floor() as i64;
    let size = RasterSize::with_rows_cols(
        (0.5 + extent.height() / gt5.abs()) as usize,
        (0.5 + extent.width() / gt1.abs()) as usize,
    );

    let view = WindowedDataset::new(
        source.dataset.clone(),
        x_off,
        y_off,
        size,
        GeoTransform::new([extent.min_x(), gt1, 0.0, extent.max_y(), 0.0, gt5]),
        projection,
    )?;

    Ok(Arc::new(view))
}

fn rebind(band: &SourceBand, adjusted: &[(Arc<dyn RasterDataset>, Arc<dyn RasterDataset>)]) -> Result<SourceBand> {
    match adjusted.iter().find(|(original, _)| Arc::ptr_eq(original, band.dataset())) {
        Some((_, view)) => Ok(SourceBand::new(view.clone(), band.index())?),
        None => Ok(band.clone()),
    }
}

/// Unifies the grids of the panchromatic and spectral sources according to `adjustment`.
///
/// Sources that already match the target extent are returned unchanged. Nothing is adjusted when
/// the panchromatic source is not georeferenced.
pub fn reconcile(adjustment: SpatialExtentAdjustment, panchro: &SourceBand, spectral: &[SourceBand]) -> Result<ReconciledSources> {
    let unchanged = || ReconciledSources {
        panchro: panchro.clone(),
        spectral: spectral.to_vec(),
    };

    let Some(pan) = GridSource::new(panchro.dataset()) else {
        return Ok(unchanged());
    };

    let pan_projection = pan.dataset.projection();
    let mut sources = vec![];
    let mut has_rotation = pan.geo_transform.has_rotation();
    let mut mismatch = false;
    let mut union = pan.bounds;
    let mut intersection = pan.bounds;

    for dataset in distinct_datasets(spectral.iter()) {
        if Arc::ptr_eq(&dataset, &pan.dataset) {
            continue;
        }

        let Some(source) = GridSource::new(&dataset) else {
            log::debug!("Spectral source '{}' is not georeferenced, not adjusted", dataset.description());
            continue;
        };

        let projection = source.dataset.projection();
        if adjustment != SpatialExtentAdjustment::NoneWithoutWarning && projection != pan_projection {
            log::warn!(
                "Panchromatic band and spectral band '{}' have different projections",
                source.dataset.description()
            );
        }

        has_rotation |= source.geo_transform.has_rotation();
        // only the sources that do not match the panchromatic extent shape the target extent
        if !source.bounds.corners_within(&pan.bounds, source.geo_transform.max_cell_size()) {
            mismatch = true;
            union = union.union(&source.bounds);
            intersection = intersection.intersection(&source.bounds);
        }

        sources.push(source);
    }

    if !mismatch {
        return Ok(unchanged());
    }

    let extent = match adjustment {
        SpatialExtentAdjustment::NoneWithoutWarning => return Ok(unchanged()),
        SpatialExtentAdjustment::None => {
            log::warn!("Panchromatic and spectral datasets do not cover the same spatial extent");
            return Ok(unchanged());
        }
        SpatialExtentAdjustment::Union | SpatialExtentAdjustment::Intersection if has_rotation => {
            return Err(Error::Geometry(
                "One of the panchromatic or spectral datasets has rotating terms in their geotransform matrix. Adjustment not possible"
                    .to_string(),
            ));
        }
        SpatialExtentAdjustment::Union => {
            log::debug!(
                "Using union extent: ({}, {}) - ({}, {})",
                union.min_x(),
                union.min_y(),
                union.max_x(),
                union.max_y()
            );
            union
        }
        SpatialExtentAdjustment::Intersection => {
            if intersection.is_empty() {
                return Err(Error::Geometry(
                    "Empty intersection between panchromatic and spectral datasets".to_string(),
                ));
            }

            log::debug!(
                "Using intersection extent: ({}, {}) - ({}, {})",
                intersection.min_x(),
                intersection.min_y(),
                intersection.max_x(),
                intersection.max_y()
            );
            intersection
        }
    };

    let target = snap_to_grid(&extent, &pan.geo_transform);
    let pan_cell_size = pan.geo_transform.max_cell_size();

    let mut adjusted = Vec::new();
    for source in std::iter::once(&pan).chain(sources.iter()) {
        let tolerance = source.geo_transform.max_cell_size().max(pan_cell_size);
        if source.bounds.corners_within(&target, tolerance) {
            continue;
        }

        let view = windowed_view(source, &target, pan_projection.clone())?;
        adjusted.push((source.dataset.clone(), view));
    }

    Ok(ReconciledSources {
        panchro: rebind(panchro, &adjusted)?,
        spectral: spectral.iter().map(|band| rebind(band, &adjusted)).collect::<Result<_>>()?,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use geo::{ArrayDataType, FIRST_BAND, MemBand, MemDataset, Point};

    use super::*;

    fn dataset(name: &str, top_left: (f64, f64), cell_size: f64, size: usize) -> Result<Arc<dyn RasterDataset>> {
        let size = RasterSize::square(size);
        let ds = MemDataset::new(name, size)
            .with_geo_transform(GeoTransform::north_up(top_left.0, top_left.1, cell_size, -cell_size))
            .with_band(MemBand::filled(size, ArrayDataType::Uint8, 1.0))?;
        Ok(Arc::new(ds))
    }

    fn first_band(ds: &Arc<dyn RasterDataset>) -> Result<SourceBand> {
        Ok(SourceBand::new(ds.clone(), FIRST_BAND)?)
    }

    fn bounds(band: &SourceBand) -> Option<Rect> {
        let ds = band.dataset();
        ds.geo_transform().map(|gt| gt.bounds(ds.raster_size()))
    }

    fn rect(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Rect {
        Rect::from_points(Point::new(x_min, y_min), Point::new(x_max, y_max))
    }

    #[test]
    fn parse_adjustment() -> Result<()> {
        assert_eq!("union".parse::<SpatialExtentAdjustment>()?, SpatialExtentAdjustment::Union);
        assert_eq!(
            "NoneWithoutWarning".parse::<SpatialExtentAdjustment>()?,
            SpatialExtentAdjustment::NoneWithoutWarning
        );
        assert!("Both".parse::<SpatialExtentAdjustment>().is_err());
        Ok(())
    }

    #[test_log::test]
    fn union_of_extents() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        let spectral = first_band(&dataset("ms", (-10.0, 90.0), 2.0, 50)?)?;

        let result = reconcile(SpatialExtentAdjustment::Union, &pan, std::slice::from_ref(&spectral))?;
        let expected = rect(-10.0, -10.0, 100.0, 100.0);

        assert!(!result.panchro.same_dataset(&pan));
        assert_relative_eq!(bounds(&result.panchro).expect("georeferenced"), expected);
        assert_eq!(result.panchro.band().size(), RasterSize::square(110));
        assert_relative_eq!(bounds(&result.spectral[0]).expect("georeferenced"), expected);
        assert_eq!(result.spectral[0].band().size(), RasterSize::square(55));
        Ok(())
    }

    #[test_log::test]
    fn intersection_of_extents() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        let spectral = first_band(&dataset("ms", (-10.0, 90.0), 2.0, 50)?)?;

        let result = reconcile(SpatialExtentAdjustment::Intersection, &pan, std::slice::from_ref(&spectral))?;
        let expected = rect(0.0, 0.0, 90.0, 90.0);

        assert_relative_eq!(bounds(&result.panchro).expect("georeferenced"), expected);
        assert_eq!(result.panchro.band().size(), RasterSize::square(90));
        assert_relative_eq!(bounds(&result.spectral[0]).expect("georeferenced"), expected);
        assert_eq!(result.spectral[0].band().size(), RasterSize::square(45));
        Ok(())
    }

    #[test_log::test]
    fn disjoint_intersection_fails() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        let spectral = first_band(&dataset("ms", (200.0, 100.0), 2.0, 50)?)?;

        let result = reconcile(SpatialExtentAdjustment::Intersection, &pan, &[spectral]);
        assert!(matches!(result, Err(Error::Geometry(_))));
        Ok(())
    }

    #[test_log::test]
    fn matching_grids_are_not_adjusted() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        // within one spectral pixel of the panchromatic extent
        let spectral = first_band(&dataset("ms", (1.0, 99.0), 2.0, 50)?)?;

        let result = reconcile(SpatialExtentAdjustment::Union, &pan, std::slice::from_ref(&spectral))?;
        assert!(result.panchro.same_dataset(&pan));
        assert!(result.spectral[0].same_dataset(&spectral));
        Ok(())
    }

    #[test_log::test]
    fn matching_sources_do_not_extend_the_target() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        // overshoots the panchromatic extent by less than a spectral pixel
        let matching = first_band(&dataset("ms1", (1.5, 101.5), 2.0, 50)?)?;
        let shifted = first_band(&dataset("ms2", (-10.0, 90.0), 2.0, 50)?)?;
        let spectral = [matching, shifted];

        let result = reconcile(SpatialExtentAdjustment::Union, &pan, &spectral)?;
        let expected = rect(-10.0, -10.0, 100.0, 100.0);
        assert_relative_eq!(bounds(&result.panchro).expect("georeferenced"), expected);
        assert_eq!(result.panchro.band().size(), RasterSize::square(110));
        for band in &result.spectral {
            assert_relative_eq!(bounds(band).expect("georeferenced"), expected);
            assert_eq!(band.band().size(), RasterSize::square(55));
        }

        let result = reconcile(SpatialExtentAdjustment::Intersection, &pan, &spectral)?;
        let expected = rect(0.0, 0.0, 90.0, 90.0);
        assert_relative_eq!(bounds(&result.panchro).expect("georeferenced"), expected);
        assert_eq!(result.panchro.band().size(), RasterSize::square(90));
        assert_relative_eq!(bounds(&result.spectral[0]).expect("georeferenced"), expected);
        Ok(())
    }

    #[test_log::test]
    fn adjusted_sources_keep_their_overviews() -> Result<()> {
        let overviewed = |name: &str, top_left: (f64, f64), cell_size: f64, size: usize| -> Result<Arc<dyn RasterDataset>> {
            let band = MemBand::filled(RasterSize::square(size), ArrayDataType::Uint8, 1.0)
                .with_overview(MemBand::filled(RasterSize::square(size / 2), ArrayDataType::Uint8, 1.0));
            let ds = MemDataset::new(name, RasterSize::square(size))
                .with_geo_transform(GeoTransform::north_up(top_left.0, top_left.1, cell_size, -cell_size))
                .with_band(band)?;
            Ok(Arc::new(ds))
        };

        let pan = first_band(&overviewed("pan", (0.0, 100.0), 1.0, 100)?)?;
        let spectral = first_band(&overviewed("ms", (-10.0, 90.0), 2.0, 50)?)?;

        let result = reconcile(SpatialExtentAdjustment::Union, &pan, std::slice::from_ref(&spectral))?;
        assert!(!result.panchro.same_dataset(&pan));
        assert_eq!(result.panchro.band().overview_count(), 1);
        assert_eq!(result.panchro.band().overview(0)?.size(), RasterSize::square(55));
        assert_eq!(result.spectral[0].band().overview_count(), 1);
        assert_eq!(result.spectral[0].band().overview(0)?.size(), RasterSize::with_rows_cols(28, 28));
        Ok(())
    }

    #[test_log::test]
    fn rotation_prevents_adjustment() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        let size = RasterSize::square(50);
        let sheared: Arc<dyn RasterDataset> = Arc::new(
            MemDataset::new("sheared", size)
                .with_geo_transform(GeoTransform::new([-10.0, 2.0, 0.1, 90.0, 0.0, -2.0]))
                .with_band(MemBand::filled(size, ArrayDataType::Uint8, 1.0))?,
        );
        let spectral = first_band(&sheared)?;

        for adjustment in [SpatialExtentAdjustment::Union, SpatialExtentAdjustment::Intersection] {
            let result = reconcile(adjustment, &pan, std::slice::from_ref(&spectral));
            assert!(matches!(result, Err(Error::Geometry(_))), "{adjustment}");
        }

        let result = reconcile(SpatialExtentAdjustment::None, &pan, std::slice::from_ref(&spectral))?;
        assert!(result.panchro.same_dataset(&pan));
        assert!(result.spectral[0].same_dataset(&spectral));
        Ok(())
    }

    #[test_log::test]
    fn shared_spectral_dataset_gets_one_view() -> Result<()> {
        let pan = first_band(&dataset("pan", (0.0, 100.0), 1.0, 100)?)?;
        let size = RasterSize::square(50);
        let ms: Arc<dyn RasterDataset> = Arc::new(
            MemDataset::new("ms", size)
                .with_geo_transform(GeoTransform::north_up(-10.0, 90.0, 2.0, -2.0))
                .with_band(MemBand::filled(size, ArrayDataType::Uint8, 1.0))?
                .with_band(MemBand::filled(size, ArrayDataType::Uint8, 2.0))?,
        );
        let spectral = vec![SourceBand::new(ms.clone(), FIRST_BAND)?, SourceBand::new(ms, geo::band_at(1))?];

        let result = reconcile(SpatialExtentAdjustment::Union, &pan, &spectral)?;
        assert!(result.spectral[0].same_dataset(&result.spectral[1]));
        assert_eq!(result.spectral[1].index(), geo::band_at(1));
        Ok(())
    }

    #[test]
    fn ungeoreferenced_panchro_is_not_adjusted() -> Result<()> {
        let size = RasterSize::square(4);
        let pan_ds: Arc<dyn RasterDataset> =
            Arc::new(MemDataset::new("pan", size).with_band(MemBand::filled(size, ArrayDataType::Uint8, 1.0))?);
        let pan = first_band(&pan_ds)?;
        let spectral = first_band(&dataset("ms", (-10.0, 90.0), 2.0, 2)?)?;

        let result = reconcile(SpatialExtentAdjustment::Intersection, &pan, std::slice::from_ref(&spectral))?;
        assert!(result.panchro.same_dataset(&pan));
        assert!(result.spectral[0].same_dataset(&spectral));
        Ok(())
    }
}
