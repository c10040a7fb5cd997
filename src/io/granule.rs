//! VNP46A3 granule access: subdataset lookup and quality-masked layer loading

use crate::io::raster::RasterIo;
use crate::types::{display_name, NtlError, NtlImage, NtlResult, Raster};
use gdal::{Dataset, Metadata};
use regex::Regex;
use std::path::Path;

/// Nighttime-lights layers, in priority order
pub const NTL_CANDIDATES: [&str; 3] = [
    "AllAngle_Composite_Snow_Free",
    "NearNadir_Composite_Snow_Free",
    "AllAngle_Composite_Snow_Covered",
];

/// Per-pixel quality layers, in priority order
pub const QUALITY_CANDIDATES: [&str; 3] = [
    "AllAngle_Composite_Snow_Free_Quality",
    "NearNadir_Composite_Snow_Free_Quality",
    "AllAngle_Composite_Snow_Covered_Quality",
];

/// What happened to the quality mask while loading a layer
#[derive(Debug, Clone, PartialEq)]
pub enum QualityMask {
    /// Mask applied; `masked` cells were set to NaN
    Applied { masked: usize },
    /// Mask requested but unavailable, layer returned unmasked
    Skipped { reason: String },
    /// Mask not requested
    Disabled,
}

impl QualityMask {
    pub fn is_applied(&self) -> bool {
        matches!(self, QualityMask::Applied { .. })
    }
}

/// A loaded nighttime-lights layer
#[derive(Debug, Clone)]
pub struct NtlLayer {
    pub raster: Raster,
    pub mask: QualityMask,
}

/// Pick the first subdataset containing a candidate fragment.
///
/// Candidates are tried in order; for each candidate the first matching
/// subdataset wins.
pub fn resolve_subdataset(
    file_name: &str,
    subdatasets: &[String],
    candidates: &[&str],
) -> NtlResult<String> {
    for name in candidates {
        if let Some(s) = subdatasets.iter().find(|s| s.contains(name)) {
            log::debug!("{}: '{}' matched {}", file_name, name, s);
            return Ok(s.clone());
        }
    }

    Err(NtlError::SubdatasetNotFound {
        file: file_name.to_string(),
        candidates: candidates.iter().map(|c| c.to_string()).collect(),
    })
}

/// Null out every cell whose quality is not strictly positive.
///
/// Returns the number of cells masked. Shapes must match.
pub fn apply_quality_mask(ntl: &mut NtlImage, quality: &NtlImage) -> NtlResult<usize> {
    if ntl.dim() != quality.dim() {
        return Err(NtlError::Processing(format!(
            "Quality grid {:?} does not match layer {:?}",
            quality.dim(),
            ntl.dim()
        )));
    }

    let mut masked = 0;
    ndarray::Zip::from(ntl).and(quality).for_each(|v, &q| {
        // NaN quality fails the comparison and masks the cell too
        if !(q > 0.0) {
            *v = f32::NAN;
            masked += 1;
        }
    });

    Ok(masked)
}

/// Reader for Black Marble HDF5 granules
pub struct GranuleReader;

impl GranuleReader {
    /// Subdataset identifiers in the order GDAL reports them
    pub fn list_subdatasets<P: AsRef<Path>>(h5_path: P) -> NtlResult<Vec<String>> {
        let dataset = Dataset::open(h5_path.as_ref())?;
        let entries = dataset.metadata_domain("SUBDATASETS").unwrap_or_default();
        parse_subdataset_entries(&entries)
    }

    /// Return the first matching subdataset name inside the HDF5 file
    pub fn find_subdataset<P: AsRef<Path>>(h5_path: P, candidates: &[&str]) -> NtlResult<String> {
        let h5_path = h5_path.as_ref();
        let subdatasets = Self::list_subdatasets(h5_path)?;
        resolve_subdataset(&display_name(h5_path), &subdatasets, candidates)
    }

    /// Open the nighttime-lights layer of a granule, optionally masked by
    /// its quality layer. A failing quality layer never fails the load.
    pub fn open_ntl_layer<P: AsRef<Path>>(h5_path: P, use_quality_mask: bool) -> NtlResult<NtlLayer> {
        let h5_path = h5_path.as_ref();
        let name = display_name(h5_path);

        let subdatasets = Self::list_subdatasets(h5_path)?;
        Self::load_layer(&name, &subdatasets, use_quality_mask)
    }

    /// Read the nighttime-lights layer out of already listed subdatasets
    /// (any GDAL-readable identifiers) and apply the quality mask if asked.
    pub fn load_layer(name: &str, subdatasets: &[String], use_quality_mask: bool) -> NtlResult<NtlLayer> {
        let ntl_sds = resolve_subdataset(name, subdatasets, &NTL_CANDIDATES)?;
        let mut raster = RasterIo::read(&ntl_sds)?;

        if !use_quality_mask {
            return Ok(NtlLayer { raster, mask: QualityMask::Disabled });
        }

        let mask = match Self::load_quality(name, subdatasets)
            .and_then(|quality| apply_quality_mask(&mut raster.data, &quality.data))
        {
            Ok(masked) => {
                log::debug!("{}: quality mask removed {} pixels", name, masked);
                QualityMask::Applied { masked }
            }
            Err(e) => {
                log::warn!("Quality mask not applied for {} -> {}", name, e);
                QualityMask::Skipped { reason: e.to_string() }
            }
        };

        Ok(NtlLayer { raster, mask })
    }

    fn load_quality(name: &str, subdatasets: &[String]) -> NtlResult<Raster> {
        let q_sds = resolve_subdataset(name, subdatasets, &QUALITY_CANDIDATES)?;
        RasterIo::read(&q_sds)
    }
}

/// Extract identifiers from `SUBDATASET_<n>_NAME=<id>` metadata entries,
/// ordered by `n`.
pub fn parse_subdataset_entries(entries: &[String]) -> NtlResult<Vec<String>> {
    let re = Regex::new(r"^SUBDATASET_(\d+)_NAME=(.*)$")
        .map_err(|e| NtlError::Processing(format!("Invalid subdataset pattern: {}", e)))?;

    let mut named: Vec<(usize, String)> = entries
        .iter()
        .filter_map(|entry| {
            let caps = re.captures(entry)?;
            let index = caps[1].parse::<usize>().ok()?;
            Some((index, caps[2].to_string()))
        })
        .collect();

    named.sort_by_key(|(index, _)| *index);
    Ok(named.into_iter().map(|(_, name)| name).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn sds(names: &[&str]) -> Vec<String> {
        names
            .iter()
            .map(|n| format!("HDF5:\"VNP46A3.A2019001.h11v11.h5\"://HDFEOS/GRIDS/VIIRS_Grid_DNB_2d/Data_Fields/{}", n))
            .collect()
    }

    #[test]
    fn test_resolver_prefers_candidate_order() {
        let subdatasets = sds(&[
            "AllAngle_Composite_Snow_Covered",
            "Lat",
            "NearNadir_Composite_Snow_Free",
            "AllAngle_Composite_Snow_Free_Num",
        ]);

        // First candidate matches the "_Num" layer by fragment, which wins
        let found = resolve_subdataset("g.h5", &subdatasets, &NTL_CANDIDATES).unwrap();
        assert!(found.ends_with("AllAngle_Composite_Snow_Free_Num"));

        let found = resolve_subdataset("g.h5", &subdatasets[..3], &NTL_CANDIDATES).unwrap();
        assert!(found.ends_with("NearNadir_Composite_Snow_Free"));
    }

    #[test]
    fn test_resolver_first_match_within_fragment() {
        let subdatasets = sds(&[
            "Lon",
            "AllAngle_Composite_Snow_Free",
            "AllAngle_Composite_Snow_Free_Quality",
        ]);

        let ntl = resolve_subdataset("g.h5", &subdatasets, &NTL_CANDIDATES).unwrap();
        assert!(ntl.ends_with("/AllAngle_Composite_Snow_Free"));

        let q = resolve_subdataset("g.h5", &subdatasets, &QUALITY_CANDIDATES).unwrap();
        assert!(q.ends_with("AllAngle_Composite_Snow_Free_Quality"));
    }

    #[test]
    fn test_resolver_not_found() {
        let subdatasets = sds(&["Lat", "Lon"]);
        let err = resolve_subdataset("VNP46A3.h5", &subdatasets, &QUALITY_CANDIDATES).unwrap_err();

        match &err {
            NtlError::SubdatasetNotFound { file, candidates } => {
                assert_eq!(file, "VNP46A3.h5");
                assert_eq!(candidates.len(), 3);
                assert_eq!(candidates[0], QUALITY_CANDIDATES[0]);
            }
            other => panic!("unexpected error: {}", other),
        }

        let message = err.to_string();
        assert!(message.contains("VNP46A3.h5"));
        assert!(message.contains("NearNadir_Composite_Snow_Free_Quality"));
    }

    #[test]
    fn test_quality_mask() {
        let mut ntl = array![[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let quality = array![[1.0f32, 0.0, 2.0], [-1.0, 3.0, 1.0]];

        let masked = apply_quality_mask(&mut ntl, &quality).unwrap();
        assert_eq!(masked, 2);
        assert!(ntl[[0, 1]].is_nan());
        assert!(ntl[[1, 0]].is_nan());
        assert_eq!(ntl[[0, 0]], 1.0);
        assert_eq!(ntl[[0, 2]], 3.0);
        assert_eq!(ntl[[1, 1]], 5.0);
        assert_eq!(ntl[[1, 2]], 6.0);
    }

    #[test]
    fn test_quality_mask_shape_mismatch() {
        let mut ntl = array![[1.0f32, 2.0]];
        let quality = array![[1.0f32], [1.0]];
        assert!(apply_quality_mask(&mut ntl, &quality).is_err());
        assert_eq!(ntl, array![[1.0f32, 2.0]]);
    }

    #[test]
    fn test_parse_subdataset_entries() {
        let entries = vec![
            "SUBDATASET_10_NAME=HDF5:\"a.h5\"://ten".to_string(),
            "SUBDATASET_2_DESC=[2400x2400] two (16-bit unsigned integer)".to_string(),
            "SUBDATASET_2_NAME=HDF5:\"a.h5\"://two".to_string(),
            "SUBDATASET_1_NAME=HDF5:\"a.h5\"://one".to_string(),
        ];

        let names = parse_subdataset_entries(&entries).unwrap();
        assert_eq!(
            names,
            vec![
                "HDF5:\"a.h5\"://one".to_string(),
                "HDF5:\"a.h5\"://two".to_string(),
                "HDF5:\"a.h5\"://ten".to_string(),
            ]
        );
    }

    fn write_layer(dir: &std::path::Path, name: &str, data: NtlImage) -> String {
        use crate::types::{BoundingBox, GeoTransform, CRS_WGS84};

        let (rows, cols) = data.dim();
        let transform = GeoTransform::from_bbox(&BoundingBox::new(-75.0, -56.0, -66.0, -17.0), rows, cols);
        let path = dir.join(format!("{}.tif", name));
        RasterIo::write_geotiff(&Raster::new(data, transform, Some(CRS_WGS84.to_string())), &path).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_load_layer_applies_quality_mask() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let subdatasets = vec![
            write_layer(temp_dir.path(), "AllAngle_Composite_Snow_Free", array![[1.0f32, 2.0], [3.0, 4.0]]),
            write_layer(temp_dir.path(), "AllAngle_Composite_Snow_Free_Quality", array![[1.0f32, 0.0], [2.0, -1.0]]),
        ];

        let layer = GranuleReader::load_layer("g.h5", &subdatasets, true).unwrap();
        assert_eq!(layer.mask, QualityMask::Applied { masked: 2 });
        assert_eq!(layer.raster.data[[0, 0]], 1.0);
        assert!(layer.raster.data[[0, 1]].is_nan());
        assert_eq!(layer.raster.data[[1, 0]], 3.0);
        assert!(layer.raster.data[[1, 1]].is_nan());

        let unmasked = GranuleReader::load_layer("g.h5", &subdatasets, false).unwrap();
        assert_eq!(unmasked.mask, QualityMask::Disabled);
        assert_eq!(unmasked.raster.data, array![[1.0f32, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn test_load_layer_without_quality_layer_is_unmasked() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let subdatasets = vec![
            write_layer(temp_dir.path(), "NearNadir_Composite_Snow_Free", array![[5.0f32, 6.0]]),
        ];

        let layer = GranuleReader::load_layer("g.h5", &subdatasets, true).unwrap();
        match &layer.mask {
            QualityMask::Skipped { reason } => assert!(reason.contains("No matching subdataset")),
            other => panic!("unexpected mask outcome: {:?}", other),
        }
        assert_eq!(layer.raster.data, array![[5.0f32, 6.0]]);
    }

    #[test]
    fn test_load_layer_quality_shape_mismatch_is_unmasked() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let subdatasets = vec![
            write_layer(temp_dir.path(), "AllAngle_Composite_Snow_Free", array![[1.0f32, 2.0, 3.0]]),
            write_layer(temp_dir.path(), "AllAngle_Composite_Snow_Free_Quality", array![[0.0f32], [0.0]]),
        ];

        let layer = GranuleReader::load_layer("g.h5", &subdatasets, true).unwrap();
        assert!(matches!(layer.mask, QualityMask::Skipped { .. }));
        assert_eq!(layer.raster.data, array![[1.0f32, 2.0, 3.0]]);
    }

    #[test]
    fn test_load_layer_without_ntl_layer_fails() {
        let subdatasets = sds(&["Lat", "Lon"]);
        let err = GranuleReader::load_layer("g.h5", &subdatasets, true).unwrap_err();
        assert!(matches!(err, NtlError::SubdatasetNotFound { .. }));
    }
}
