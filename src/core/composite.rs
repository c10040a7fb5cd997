use crate::core::resample::{is_aligned, reproject_match};
use crate::io::granule::{GranuleReader, NtlLayer};
use crate::types::{display_name, NtlError, NtlResult, Raster};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Source of nighttime-lights layers, one per granule path
pub trait LayerSource {
    fn load(&self, path: &Path, use_quality_mask: bool) -> NtlResult<NtlLayer>;
}

/// Loads layers from HDF5 granules through GDAL
#[derive(Debug, Default, Clone, Copy)]
pub struct GdalLayerSource;

impl LayerSource for GdalLayerSource {
    fn load(&self, path: &Path, use_quality_mask: bool) -> NtlResult<NtlLayer> {
        GranuleReader::open_ntl_layer(path, use_quality_mask)
    }
}

/// Annual mean built from monthly granules
#[derive(Debug, Clone)]
pub struct Composite {
    pub raster: Raster,
    pub granules_used: usize,
    pub skipped: Vec<PathBuf>,
    /// Layers whose quality mask could not be applied
    pub unmasked: usize,
}

/// Averages monthly granules into one annual raster
pub struct AnnualCompositor<S: LayerSource = GdalLayerSource> {
    source: S,
    use_quality_mask: bool,
}

impl AnnualCompositor<GdalLayerSource> {
    pub fn new(use_quality_mask: bool) -> Self {
        Self::with_source(GdalLayerSource, use_quality_mask)
    }
}

impl<S: LayerSource> AnnualCompositor<S> {
    pub fn with_source(source: S, use_quality_mask: bool) -> Self {
        Self { source, use_quality_mask }
    }

    /// Read every granule, skipping unreadable ones, and average them on the
    /// grid of the first readable granule.
    pub fn composite<P: AsRef<Path>>(&self, h5_files: &[P]) -> NtlResult<Composite> {
        log::info!("Reading {} NTL granules", h5_files.len());

        let mut rasters = Vec::with_capacity(h5_files.len());
        let mut skipped = Vec::new();
        let mut unmasked = 0;

        for (i, path) in h5_files.iter().enumerate() {
            let path = path.as_ref();
            log::info!("Granule {}/{}: {}", i + 1, h5_files.len(), display_name(path));

            match self.source.load(path, self.use_quality_mask) {
                Ok(layer) => {
                    if self.use_quality_mask && !layer.mask.is_applied() {
                        unmasked += 1;
                    }
                    rasters.push(layer.raster);
                }
                Err(e) => {
                    log::warn!("Skipping {} -> {}", display_name(path), e);
                    skipped.push(path.to_path_buf());
                }
            }
        }

        let granules_used = rasters.len();
        let raster = mean_composite(rasters)?;

        log::info!(
            "Composite built from {} granules ({} skipped, {} without quality mask)",
            granules_used,
            skipped.len(),
            unmasked
        );

        Ok(Composite { raster, granules_used, skipped, unmasked })
    }
}

/// Align every raster to the first one and take the per-pixel mean,
/// ignoring NaN. Cells missing in every layer stay NaN.
pub fn mean_composite(rasters: Vec<Raster>) -> NtlResult<Raster> {
    let mut iter = rasters.into_iter();
    let base = iter.next().ok_or(NtlError::NoGranules)?;

    let shape = base.shape();
    let mut sum = Array2::<f64>::zeros(shape);
    let mut count = Array2::<u32>::zeros(shape);
    accumulate(&mut sum, &mut count, &base);

    for raster in iter {
        if is_aligned(&raster, &base)? {
            accumulate(&mut sum, &mut count, &raster);
        } else {
            let aligned = reproject_match(&raster, &base)?;
            accumulate(&mut sum, &mut count, &aligned);
        }
    }

    let mut mean = Array2::<f32>::from_elem(shape, f32::NAN);
    ndarray::Zip::from(&mut mean)
        .and(&sum)
        .and(&count)
        .for_each(|m, &s, &n| {
            if n > 0 {
                *m = (s / n as f64) as f32;
            }
        });

    Ok(Raster::new(mean, base.transform, base.crs))
}

fn accumulate(sum: &mut Array2<f64>, count: &mut Array2<u32>, raster: &Raster) {
    ndarray::Zip::from(sum)
        .and(count)
        .and(&raster.data)
        .for_each(|s, n, &v| {
            if !v.is_nan() {
                *s += v as f64;
                *n += 1;
            }
        });
}
