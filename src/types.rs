use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Nighttime-lights radiance grid (rows x cols), `NaN` marks missing cells
pub type NtlImage = Array2<f32>;

/// Working CRS of the study
pub const CRS_WGS84: &str = "EPSG:4326";

/// Geospatial bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub const fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self { min_lon, min_lat, max_lon, max_lat }
    }

    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    /// Box is well-formed when both extents are strictly positive and finite
    pub fn is_valid(&self) -> bool {
        let w = self.width();
        let h = self.height();
        w.is_finite() && h.is_finite() && w > 0.0 && h > 0.0
    }

    /// (min_lon, min_lat, max_lon, max_lat) ordering used by remote search APIs
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.min_lon, self.min_lat, self.max_lon, self.max_lat)
    }
}

impl std::str::FromStr for BoundingBox {
    type Err = NtlError;

    /// Parse `min_lon,min_lat,max_lon,max_lat`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<f64> = s
            .split(',')
            .map(|p| p.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| NtlError::InvalidInput(format!("Invalid bounding box '{}': {}", s, e)))?;

        match parts.as_slice() {
            [min_lon, min_lat, max_lon, max_lat] => {
                Ok(BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat))
            }
            _ => Err(NtlError::InvalidInput(format!(
                "Bounding box needs 4 values, got {}: '{}'",
                parts.len(),
                s
            ))),
        }
    }
}

/// Affine pixel-to-geographic transform (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// GDAL's default for datasets without georeferencing
    pub const IDENTITY: GeoTransform = GeoTransform {
        top_left_x: 0.0,
        pixel_width: 1.0,
        rotation_x: 0.0,
        top_left_y: 0.0,
        rotation_y: 0.0,
        pixel_height: 1.0,
    };

    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        GeoTransform {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// North-up transform spanning `bbox` with `rows x cols` pixels
    pub fn from_bbox(bbox: &BoundingBox, rows: usize, cols: usize) -> Self {
        GeoTransform {
            top_left_x: bbox.min_lon,
            pixel_width: bbox.width() / cols as f64,
            rotation_x: 0.0,
            top_left_y: bbox.max_lat,
            rotation_y: 0.0,
            pixel_height: -bbox.height() / rows as f64,
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Geographic coordinate of a fractional pixel position
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Geographic coordinate of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional (col, row) of a geographic coordinate; north-up grids only
    pub fn invert(&self, x: f64, y: f64) -> (f64, f64) {
        let col = (x - self.top_left_x) / self.pixel_width;
        let row = (y - self.top_left_y) / self.pixel_height;
        (col, row)
    }

    /// Same grid shifted so that pixel (row, col) becomes the origin
    pub fn shifted(&self, row: usize, col: usize) -> Self {
        let (x, y) = self.apply(col as f64, row as f64);
        GeoTransform {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }
}

impl Default for GeoTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Single-band raster held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub data: NtlImage,
    pub transform: GeoTransform,
    /// Any definition GDAL understands (`EPSG:4326`, WKT, PROJ string)
    pub crs: Option<String>,
}

impl Raster {
    pub fn new(data: NtlImage, transform: GeoTransform, crs: Option<String>) -> Self {
        Self { data, transform, crs }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// True when the raster carries neither a CRS nor a real geotransform
    pub fn lacks_georeference(&self) -> bool {
        self.crs.is_none() && self.transform.is_identity()
    }

    pub fn with_crs(mut self, crs: &str) -> Self {
        self.crs = Some(crs.to_string());
        self
    }
}

/// Rectangular sub-grid of a raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

/// Error types for nighttime-lights processing
#[derive(Debug, thiserror::Error)]
pub enum NtlError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("No matching subdataset found in {file}. Tried: {candidates:?}")]
    SubdatasetNotFound { file: String, candidates: Vec<String> },

    #[error("No granules could be read from the provided H5 files.")]
    NoGranules,

    #[error("No valid pixels found in {file}")]
    NoValidPixels { file: String },

    #[error("Download error: {0}")]
    Download(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<reqwest::Error> for NtlError {
    fn from(err: reqwest::Error) -> Self {
        NtlError::Download(err.to_string())
    }
}

impl From<zip::result::ZipError> for NtlError {
    fn from(err: zip::result::ZipError) -> Self {
        NtlError::Processing(format!("ZIP archive error: {}", err))
    }
}

/// Result type for nighttime-lights operations
pub type NtlResult<T> = Result<T, NtlError>;

/// File name of a path for log and error messages
pub fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_parse() {
        let bbox: BoundingBox = "-75.0, -56.0, -66.0, -17.0".parse().unwrap();
        assert_eq!(bbox, BoundingBox::new(-75.0, -56.0, -66.0, -17.0));
        assert!(bbox.is_valid());

        assert!("1,2,3".parse::<BoundingBox>().is_err());
        assert!("a,b,c,d".parse::<BoundingBox>().is_err());
    }

    #[test]
    fn test_geotransform_from_bbox() {
        let gt = GeoTransform::from_bbox(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), 2, 2);
        assert_eq!(gt.pixel_center(0, 0), (2.5, 7.5));
        assert_eq!(gt.pixel_center(1, 1), (7.5, 2.5));

        let (col, row) = gt.invert(7.5, 2.5);
        assert_eq!((col, row), (1.5, 1.5));
    }

    #[test]
    fn test_shifted_transform() {
        let gt = GeoTransform::from_bbox(&BoundingBox::new(0.0, 0.0, 10.0, 10.0), 10, 10);
        let sub = gt.shifted(2, 3);
        assert_eq!(sub.top_left_x, 3.0);
        assert_eq!(sub.top_left_y, 8.0);
        assert_eq!(sub.pixel_width, gt.pixel_width);
    }
}
