use crate::io::raster::{same_crs, spatial_ref};
use crate::types::{NtlResult, Raster};
use gdal::spatial_ref::CoordTransform;
use ndarray::Array2;

/// Whether `raster` already sits on the grid of `reference`
pub fn is_aligned(raster: &Raster, reference: &Raster) -> NtlResult<bool> {
    if raster.shape() != reference.shape() || raster.transform != reference.transform {
        return Ok(false);
    }
    match (&raster.crs, &reference.crs) {
        (Some(a), Some(b)) => same_crs(a, b),
        (None, None) => Ok(true),
        _ => Ok(false),
    }
}

/// Resample `source` onto the grid (CRS, transform, shape) of `reference`.
///
/// Nearest-neighbour on target pixel centres. Target cells that fall outside
/// the source grid are NaN. A side without CRS is taken to share the other
/// side's CRS.
pub fn reproject_match(source: &Raster, reference: &Raster) -> NtlResult<Raster> {
    let (target_height, target_width) = reference.shape();
    let (source_height, source_width) = source.shape();
    log::debug!(
        "Resampling {}x{} raster onto {}x{} reference grid",
        source_height,
        source_width,
        target_height,
        target_width
    );

    let mut xs = Vec::with_capacity(target_height * target_width);
    let mut ys = Vec::with_capacity(target_height * target_width);
    for i in 0..target_height {
        for j in 0..target_width {
            let (x, y) = reference.transform.pixel_center(i, j);
            xs.push(x);
            ys.push(y);
        }
    }

    match (&reference.crs, &source.crs) {
        (Some(dst), Some(src)) if !same_crs(dst, src)? => {
            log::debug!("Transforming target coordinates into source CRS");
            let transform = CoordTransform::new(&spatial_ref(dst)?, &spatial_ref(src)?)?;
            let mut zs = vec![0.0; xs.len()];
            transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        }
        (Some(_), None) | (None, Some(_)) => {
            log::warn!("Raster without CRS assumed to share the reference CRS");
        }
        _ => {}
    }

    let mut resampled = Array2::from_elem((target_height, target_width), f32::NAN);
    for i in 0..target_height {
        for j in 0..target_width {
            let k = i * target_width + j;
            let (col, row) = source.transform.invert(xs[k], ys[k]);
            if !col.is_finite() || !row.is_finite() || col < 0.0 || row < 0.0 {
                continue;
            }
            let (c, r) = (col.floor() as usize, row.floor() as usize);
            if r < source_height && c < source_width {
                resampled[[i, j]] = source.data[[r, c]];
            }
        }
    }

    Ok(Raster::new(resampled, reference.transform, reference.crs.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, GeoTransform, CRS_WGS84};
    use ndarray::array;

    fn wgs84(data: Array2<f32>, bbox: BoundingBox) -> Raster {
        let (rows, cols) = data.dim();
        Raster::new(data, GeoTransform::from_bbox(&bbox, rows, cols), Some(CRS_WGS84.to_string()))
    }

    #[test]
    fn test_alignment_check() {
        let a = wgs84(Array2::zeros((2, 2)), BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let b = wgs84(Array2::ones((2, 2)), BoundingBox::new(0.0, 0.0, 2.0, 2.0));
        let c = wgs84(Array2::ones((2, 2)), BoundingBox::new(1.0, 0.0, 3.0, 2.0));
        let d = wgs84(Array2::ones((4, 4)), BoundingBox::new(0.0, 0.0, 2.0, 2.0));

        assert!(is_aligned(&b, &a).unwrap());
        assert!(!is_aligned(&c, &a).unwrap());
        assert!(!is_aligned(&d, &a).unwrap());
    }

    #[test]
    fn test_resample_finer_grid() {
        // 4x4 source at 0.5 degree onto a 2x2 reference at 1 degree
        let source = wgs84(
            array![
                [1.0f32, 1.0, 2.0, 2.0],
                [1.0, 1.0, 2.0, 2.0],
                [3.0, 3.0, 4.0, 4.0],
                [3.0, 3.0, 4.0, 4.0],
            ],
            BoundingBox::new(0.0, 0.0, 2.0, 2.0),
        );
        let reference = wgs84(Array2::zeros((2, 2)), BoundingBox::new(0.0, 0.0, 2.0, 2.0));

        let out = reproject_match(&source, &reference).unwrap();
        assert_eq!(out.shape(), (2, 2));
        assert_eq!(out.transform, reference.transform);
        assert_eq!(out.data, array![[1.0f32, 2.0], [3.0, 4.0]]);
    }

    #[test]
    fn test_resample_shifted_grid_outside_is_nan() {
        // Source covers lon [1, 3), reference covers lon [0, 2)
        let source = wgs84(array![[5.0f32, 6.0], [7.0, 8.0]], BoundingBox::new(1.0, 0.0, 3.0, 2.0));
        let reference = wgs84(Array2::zeros((2, 2)), BoundingBox::new(0.0, 0.0, 2.0, 2.0));

        let out = reproject_match(&source, &reference).unwrap();
        assert!(out.data[[0, 0]].is_nan());
        assert!(out.data[[1, 0]].is_nan());
        assert_eq!(out.data[[0, 1]], 5.0);
        assert_eq!(out.data[[1, 1]], 7.0);
    }
}
