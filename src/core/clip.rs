use crate::io::boundary::Boundary;
use crate::io::raster::{same_crs, spatial_ref, RasterIo};
use crate::types::{display_name, GeoTransform, NtlError, NtlResult, PixelWindow, Raster, CRS_WGS84};
use gdal::raster::{rasterize, RasterizeOptions};
use gdal::vector::Geometry;
use gdal::DriverManager;
use ndarray::{s, Array2};
use std::path::{Path, PathBuf};

/// Assign `crs` when the raster has none.
///
/// This trusts the caller: the data is assumed to already be in `crs`.
pub fn ensure_raster_crs(raster: Raster, crs: &str) -> Raster {
    if raster.crs.is_some() {
        return raster;
    }
    log::warn!("Raster has no CRS, assuming {}", crs);
    raster.with_crs(crs)
}

/// Clip a raster file to a boundary polygon and save it as float32 GeoTIFF
pub fn clip_raster_to_geometry<P: AsRef<Path>, Q: AsRef<Path>>(
    in_path: P,
    out_path: Q,
    boundary: &Boundary,
    raster_crs_fallback: &str,
) -> NtlResult<PathBuf> {
    let in_path = in_path.as_ref();
    let out_path = out_path.as_ref();
    log::info!("Clipping {} to {} boundary", display_name(in_path), boundary.iso_a3);

    let raster = ensure_raster_crs(RasterIo::read(in_path)?, raster_crs_fallback);
    let clipped = clip_raster(&raster, boundary)?;

    RasterIo::write_geotiff(&clipped, out_path)?;
    Ok(out_path.to_path_buf())
}

/// Clip an in-memory raster (which must carry a CRS) to a boundary.
///
/// The result is trimmed to the rows and columns holding at least one cell
/// whose centre lies inside the polygon; remaining outside cells are NaN.
/// A boundary that contains no cell centre is an error.
pub fn clip_raster(raster: &Raster, boundary: &Boundary) -> NtlResult<Raster> {
    let crs = raster
        .crs
        .as_deref()
        .ok_or_else(|| NtlError::InvalidInput("Raster has no CRS to clip in".to_string()))?;

    let mut geometry = boundary.geometry()?;
    if !same_crs(crs, CRS_WGS84)? {
        log::debug!("Reprojecting boundary into raster CRS");
        geometry = geometry.transform_to(&spatial_ref(crs)?)?;
    }

    let env = geometry.envelope();
    let (rows, cols) = raster.shape();
    let window = bounds_window(&raster.transform, rows, cols, (env.MinX, env.MinY, env.MaxX, env.MaxY))
        .ok_or_else(|| NtlError::InvalidInput("Boundary does not overlap the raster".to_string()))?;
    log::debug!("Clip window: {:?}", window);

    let cropped = crop(raster, &window);
    let inside = polygon_mask(&geometry, &cropped.transform, cropped.shape())?;
    let keep = occupied_window(&inside).ok_or_else(|| {
        NtlError::InvalidInput("No raster cell centre falls inside the boundary".to_string())
    })?;
    log::debug!("Trimmed to cells inside the boundary: {:?}", keep);

    let mut clipped = crop(&cropped, &keep);
    let inside = inside.slice(s![
        keep.row_off..keep.row_off + keep.rows,
        keep.col_off..keep.col_off + keep.cols
    ]);

    let mut outside = 0usize;
    ndarray::Zip::from(&mut clipped.data).and(&inside).for_each(|v, &is_inside| {
        if !is_inside {
            *v = f32::NAN;
            outside += 1;
        }
    });
    log::debug!("{} cells outside the boundary set to NaN", outside);

    Ok(clipped)
}

/// Smallest window holding every `true` cell of `mask`
fn occupied_window(mask: &Array2<bool>) -> Option<PixelWindow> {
    let mut rows: Option<(usize, usize)> = None;
    let mut cols: Option<(usize, usize)> = None;
    for ((r, c), &inside) in mask.indexed_iter() {
        if !inside {
            continue;
        }
        rows = Some(rows.map_or((r, r), |(lo, hi)| (lo.min(r), hi.max(r))));
        cols = Some(cols.map_or((c, c), |(lo, hi)| (lo.min(c), hi.max(c))));
    }

    let ((r0, r1), (c0, c1)) = (rows?, cols?);
    Some(PixelWindow { row_off: r0, col_off: c0, rows: r1 - r0 + 1, cols: c1 - c0 + 1 })
}

/// Pixel window covering the bounds `(min_x, min_y, max_x, max_y)` on a
/// north-up grid, clamped to the raster. `None` when nothing overlaps.
pub fn bounds_window(
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
    bounds: (f64, f64, f64, f64),
) -> Option<PixelWindow> {
    const EPS: f64 = 1e-9;
    let (min_x, min_y, max_x, max_y) = bounds;

    let (c0, r0) = transform.invert(min_x, max_y);
    let (c1, r1) = transform.invert(max_x, min_y);

    let col_start = (c0.min(c1) + EPS).floor().max(0.0);
    let col_end = (c0.max(c1) - EPS).ceil().min(cols as f64);
    let row_start = (r0.min(r1) + EPS).floor().max(0.0);
    let row_end = (r0.max(r1) - EPS).ceil().min(rows as f64);

    if !(col_start < col_end && row_start < row_end) {
        return None;
    }

    Some(PixelWindow {
        row_off: row_start as usize,
        col_off: col_start as usize,
        rows: (row_end - row_start) as usize,
        cols: (col_end - col_start) as usize,
    })
}

/// Sub-raster for `window`, with its transform moved to the window origin
pub fn crop(raster: &Raster, window: &PixelWindow) -> Raster {
    let data = raster
        .data
        .slice(s![
            window.row_off..window.row_off + window.rows,
            window.col_off..window.col_off + window.cols
        ])
        .to_owned();
    let transform = raster.transform.shifted(window.row_off, window.col_off);
    Raster::new(data, transform, raster.crs.clone())
}

/// Cells whose centre falls inside `geometry`
fn polygon_mask(
    geometry: &Geometry,
    transform: &GeoTransform,
    shape: (usize, usize),
) -> NtlResult<Array2<bool>> {
    let (height, width) = shape;
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut mask_ds = driver.create_with_band_type::<u8, _>("", width as isize, height as isize, 1)?;
    mask_ds.set_geo_transform(&transform.to_gdal())?;

    rasterize(
        &mut mask_ds,
        &[1],
        &[geometry.clone()],
        &[1.0],
        Some(RasterizeOptions::default()),
    )?;

    let band = mask_ds.rasterband(1)?;
    let buffer = band.read_as::<u8>((0, 0), (width, height), (width, height), None)?;
    let burned = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| NtlError::Processing(format!("Failed to reshape clip mask: {}", e)))?;

    Ok(burned.mapv(|v| v > 0))
}
