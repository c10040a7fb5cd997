//! Bounding-box georeferencing for rasters that carry no usable spatial reference.
//!
//! Pixels are spread linearly across the box, north-up, with coordinates
//! referring to pixel centres. This is an approximation, only meant for
//! sources without real georeferencing.

use crate::io::raster::RasterIo;
use crate::types::{display_name, BoundingBox, GeoTransform, NtlError, NtlResult, Raster};
use std::path::{Path, PathBuf};

/// Attach a bbox-derived transform and `crs` to an in-memory raster
pub fn georef_with_bbox(raster: Raster, bbox: &BoundingBox, crs: &str) -> NtlResult<Raster> {
    if !bbox.is_valid() {
        return Err(NtlError::InvalidInput(format!("Invalid bounding box: {:?}", bbox)));
    }

    let (rows, cols) = raster.shape();
    if rows == 0 || cols == 0 {
        return Err(NtlError::InvalidInput("Cannot georeference an empty raster".to_string()));
    }

    let transform = GeoTransform::from_bbox(bbox, rows, cols);
    log::debug!(
        "Pixel size {:.6} x {:.6} degrees from bbox {:?}",
        transform.pixel_width,
        -transform.pixel_height,
        bbox.as_tuple()
    );

    Ok(Raster::new(raster.data, transform, Some(crs.to_string())))
}

/// Pixel-centre coordinates (x per column, y per row) of a bbox grid
pub fn pixel_center_coords(bbox: &BoundingBox, rows: usize, cols: usize) -> (Vec<f64>, Vec<f64>) {
    let transform = GeoTransform::from_bbox(bbox, rows, cols);
    let xs = (0..cols).map(|c| transform.pixel_center(0, c).0).collect();
    let ys = (0..rows).map(|r| transform.pixel_center(r, 0).1).collect();
    (xs, ys)
}

/// Georeference a raster file with a bounding box and save it as float32 GeoTIFF
pub fn georef_raster_with_bbox<P: AsRef<Path>, Q: AsRef<Path>>(
    in_path: P,
    out_path: Q,
    bbox: &BoundingBox,
    crs: &str,
) -> NtlResult<PathBuf> {
    let in_path = in_path.as_ref();
    let out_path = out_path.as_ref();
    log::info!("Georeferencing {} with bbox {:?}", display_name(in_path), bbox.as_tuple());

    let raster = georef_with_bbox(RasterIo::read(in_path)?, bbox, crs)?;
    RasterIo::write_geotiff(&raster, out_path)?;
    Ok(out_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CRS_WGS84;
    use ndarray::Array2;

    #[test]
    fn test_two_by_two_centres() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let (xs, ys) = pixel_center_coords(&bbox, 2, 2);
        assert_eq!(xs, vec![2.5, 7.5]);
        assert_eq!(ys, vec![7.5, 2.5]);
    }

    #[test]
    fn test_non_square_grid() {
        let bbox = BoundingBox::new(-75.0, -56.0, -66.0, -17.0);
        let raster = Raster::new(Array2::zeros((39, 9)), GeoTransform::IDENTITY, None);

        let out = georef_with_bbox(raster, &bbox, CRS_WGS84).unwrap();
        assert_eq!(out.transform.pixel_width, 1.0);
        assert_eq!(out.transform.pixel_height, -1.0);
        assert_eq!(out.transform.pixel_center(0, 0), (-74.5, -17.5));
        assert_eq!(out.transform.pixel_center(38, 8), (-66.5, -55.5));
        assert_eq!(out.crs.as_deref(), Some(CRS_WGS84));
    }

    #[test]
    fn test_inverted_bbox_rejected() {
        let raster = Raster::new(Array2::zeros((2, 2)), GeoTransform::IDENTITY, None);
        let bbox = BoundingBox::new(10.0, 0.0, 0.0, 10.0);
        assert!(georef_with_bbox(raster, &bbox, CRS_WGS84).is_err());
    }
}
