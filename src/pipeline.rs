//! Per-year processing: download, composite, georeference, clip, normalize

use crate::config::{ProjectPaths, StudyConfig};
use crate::core::clip::clip_raster_to_geometry;
use crate::core::composite::AnnualCompositor;
use crate::core::georef::georef_with_bbox;
use crate::core::normalize::minmax_normalize;
use crate::io::boundary::{Boundary, BoundaryLoader, BoundarySource};
use crate::io::download::{existing_granules, year_dir, BlackMarbleDownloader, GranuleArchive};
use crate::io::raster::RasterIo;
use crate::types::{NtlError, NtlResult};
use std::path::PathBuf;

/// Processing stage, used to name output rasters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Mean,
    Clipped,
    Normalized,
}

impl Stage {
    pub fn file_name(&self, year: i32) -> String {
        match self {
            Stage::Mean => format!("ntl_{}_mean.tif", year),
            Stage::Clipped => format!("ntl_{}_chile.tif", year),
            Stage::Normalized => format!("ntl_{}_chile_norm.tif", year),
        }
    }

    /// Output path of this stage for `year`
    pub fn path(&self, paths: &ProjectPaths, year: i32) -> PathBuf {
        let dir = match self {
            Stage::Mean => &paths.interim,
            Stage::Clipped | Stage::Normalized => &paths.processed,
        };
        dir.join(self.file_name(year))
    }
}

/// Files produced for one year
#[derive(Debug, Clone)]
pub struct YearOutputs {
    pub year: i32,
    pub granules: usize,
    pub mean: PathBuf,
    pub clipped: PathBuf,
    pub normalized: PathBuf,
}

/// Average a year's raw granules and write the composite into `interim`.
///
/// Composites without any georeferencing get the study bbox assigned.
pub fn build_annual_composite(
    paths: &ProjectPaths,
    config: &StudyConfig,
    year: i32,
    granules: &[PathBuf],
) -> NtlResult<PathBuf> {
    let compositor = AnnualCompositor::new(config.use_quality_mask);
    let composite = compositor.composite(granules)?;

    let mut raster = composite.raster;
    if raster.lacks_georeference() {
        log::warn!("{}: composite has no georeferencing, using bbox fallback", year);
        raster = georef_with_bbox(raster, &config.bbox, &config.crs)?;
    }

    let out = Stage::Mean.path(paths, year);
    RasterIo::write_geotiff(&raster, &out)?;
    Ok(out)
}

/// Clip and normalize an annual composite already present in `interim`
pub fn finish_year(
    paths: &ProjectPaths,
    config: &StudyConfig,
    boundary: &Boundary,
    year: i32,
) -> NtlResult<(PathBuf, PathBuf)> {
    let mean = Stage::Mean.path(paths, year);
    let clipped = clip_raster_to_geometry(&mean, Stage::Clipped.path(paths, year), boundary, &config.crs)?;
    let normalized = minmax_normalize(&clipped, Stage::Normalized.path(paths, year))?;
    Ok((clipped, normalized))
}

/// Drives the whole pipeline for the configured years
pub struct Pipeline<A: GranuleArchive, S: BoundarySource> {
    paths: ProjectPaths,
    config: StudyConfig,
    downloader: Option<BlackMarbleDownloader<A>>,
    boundary_loader: BoundaryLoader<S>,
}

impl<A: GranuleArchive, S: BoundarySource> Pipeline<A, S> {
    /// `downloader: None` processes whatever granules are already on disk
    pub fn new(
        paths: ProjectPaths,
        config: StudyConfig,
        downloader: Option<BlackMarbleDownloader<A>>,
        boundary_loader: BoundaryLoader<S>,
    ) -> Self {
        Self { paths, config, downloader, boundary_loader }
    }

    fn granules_for(&self, year: i32) -> NtlResult<Vec<PathBuf>> {
        match &self.downloader {
            Some(downloader) => downloader.download_year(year, &self.config.bbox, &self.paths.raw),
            None => existing_granules(&year_dir(&self.paths.raw, year)),
        }
    }

    pub fn run_year(&self, year: i32, boundary: &Boundary) -> NtlResult<YearOutputs> {
        log::info!("=== {} ===", year);
        let granules = self.granules_for(year)?;
        if granules.is_empty() {
            return Err(NtlError::NoGranules);
        }

        let mean = build_annual_composite(&self.paths, &self.config, year, &granules)?;
        let (clipped, normalized) = finish_year(&self.paths, &self.config, boundary, year)?;

        Ok(YearOutputs { year, granules: granules.len(), mean, clipped, normalized })
    }

    /// Process every configured year in order; the first failure aborts
    pub fn run(&self) -> NtlResult<Vec<YearOutputs>> {
        self.paths.ensure_dirs()?;
        let boundary = self.boundary_loader.load(self.paths.boundary_cache())?;

        self.config
            .years
            .iter()
            .map(|&year| self.run_year(year, &boundary))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_paths() {
        let paths = ProjectPaths::new("/repo");
        assert_eq!(
            Stage::Mean.path(&paths, 2014),
            PathBuf::from("/repo/data/interim/ntl_2014_mean.tif")
        );
        assert_eq!(
            Stage::Normalized.path(&paths, 2024),
            PathBuf::from("/repo/data/processed/ntl_2024_chile_norm.tif")
        );
    }
}
