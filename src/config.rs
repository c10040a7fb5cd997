//! Study parameters and project directory layout

use crate::types::{BoundingBox, NtlError, NtlResult, CRS_WGS84};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Study years
pub const YEARS: [i32; 3] = [2014, 2019, 2024];

/// Chile bounding box (min_lon, min_lat, max_lon, max_lat)
pub const BBOX_CHILE: BoundingBox = BoundingBox::new(-75.0, -56.0, -66.0, -17.0);

/// Threshold for categorical change (normalized delta)
pub const CHANGE_THRESHOLD: f64 = 0.03;

/// Analysis parameters, overridable from a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub years: Vec<i32>,
    pub bbox: BoundingBox,
    pub crs: String,
    pub change_threshold: f64,
    pub use_quality_mask: bool,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            years: YEARS.to_vec(),
            bbox: BBOX_CHILE,
            crs: CRS_WGS84.to_string(),
            change_threshold: CHANGE_THRESHOLD,
            use_quality_mask: true,
        }
    }
}

impl StudyConfig {
    /// Read and validate a JSON config; missing keys keep their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> NtlResult<Self> {
        let path = path.as_ref();
        log::info!("Loading study config: {}", path.display());
        let file = std::fs::File::open(path)?;
        let config: StudyConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NtlResult<()> {
        if self.years.is_empty() {
            return Err(NtlError::Config("at least one study year is required".to_string()));
        }
        if !self.bbox.is_valid() {
            return Err(NtlError::Config(format!("invalid bounding box {:?}", self.bbox.as_tuple())));
        }
        if !(0.0..=1.0).contains(&self.change_threshold) {
            return Err(NtlError::Config(format!(
                "change_threshold must be within [0, 1], got {}",
                self.change_threshold
            )));
        }
        if self.crs.trim().is_empty() {
            return Err(NtlError::Config("crs must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Repository directory layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub data: PathBuf,
    pub raw: PathBuf,
    pub interim: PathBuf,
    pub processed: PathBuf,
    pub reports: PathBuf,
    pub figures: PathBuf,
    pub results: PathBuf,
}

impl ProjectPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref().to_path_buf();
        let data = root.join("data");
        let reports = root.join("reports");
        Self {
            raw: data.join("raw"),
            interim: data.join("interim"),
            processed: data.join("processed"),
            figures: reports.join("figures"),
            results: reports.join("results"),
            data,
            reports,
            root,
        }
    }

    /// Create every output directory; safe to call repeatedly
    pub fn ensure_dirs(&self) -> NtlResult<()> {
        for dir in [&self.raw, &self.interim, &self.processed, &self.figures, &self.results] {
            std::fs::create_dir_all(dir)?;
        }
        log::debug!("Project directories ready under {}", self.root.display());
        Ok(())
    }

    /// Cached boundary GeoPackage
    pub fn boundary_cache(&self) -> PathBuf {
        self.raw.join("boundaries").join("chile.gpkg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = StudyConfig::default();
        assert_eq!(config.years, vec![2014, 2019, 2024]);
        assert_eq!(config.bbox.as_tuple(), (-75.0, -56.0, -66.0, -17.0));
        assert_eq!(config.crs, "EPSG:4326");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("study.json");
        std::fs::write(&path, r#"{"years": [2019], "use_quality_mask": false}"#).unwrap();

        let config = StudyConfig::from_json_file(&path).unwrap();
        assert_eq!(config.years, vec![2019]);
        assert!(!config.use_quality_mask);
        assert_eq!(config.bbox, BBOX_CHILE);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = StudyConfig::default();
        config.change_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = StudyConfig::default();
        config.years.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ensure_dirs_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let paths = ProjectPaths::new(temp_dir.path());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.raw.is_dir());
        assert!(paths.interim.is_dir());
        assert!(paths.processed.is_dir());
        assert!(paths.figures.is_dir());
        assert!(paths.results.is_dir());
    }
}
