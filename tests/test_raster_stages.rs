use approx::assert_relative_eq;
use ndarray::Array2;
use nightlight::config::BBOX_CHILE;
use nightlight::core::{clip_raster_to_geometry, georef_raster_with_bbox, minmax_normalize};
use nightlight::io::{Boundary, RasterIo};
use nightlight::types::{GeoTransform, NtlError, Raster, CRS_WGS84};
use tempfile::TempDir;

/// 39 x 9 grid without georeferencing; over the Chile bbox each cell is 1 degree
fn bare_grid() -> Raster {
    let data = Array2::from_shape_fn((39, 9), |(r, c)| (r * 9 + c) as f32);
    Raster::new(data, GeoTransform::IDENTITY, None)
}

#[test]
fn test_georef_clip_normalize_chain() {
    let _ = env_logger::builder().is_test(true).try_init();

    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let bare = temp_dir.path().join("bare.tif");
    let mean = temp_dir.path().join("interim").join("ntl_2019_mean.tif");
    let clipped = temp_dir.path().join("processed").join("ntl_2019_chile.tif");
    let normalized = temp_dir.path().join("processed").join("ntl_2019_chile_norm.tif");

    RasterIo::write_geotiff(&bare_grid(), &bare).unwrap();

    // Georeference
    georef_raster_with_bbox(&bare, &mean, &BBOX_CHILE, CRS_WGS84).unwrap();
    let georef = RasterIo::read(&mean).unwrap();
    assert!(georef.crs.is_some());
    assert_eq!(georef.transform.pixel_center(0, 0), (-74.5, -17.5));
    assert_eq!(georef.transform.pixel_center(38, 8), (-66.5, -55.5));

    // Clip to a rectangle one to six degrees inside the box
    let boundary = Boundary::new("CHL", "POLYGON ((-74 -50,-68 -50,-68 -20,-74 -20,-74 -50))");
    clip_raster_to_geometry(&mean, &clipped, &boundary, CRS_WGS84).unwrap();
    let clip = RasterIo::read(&clipped).unwrap();
    assert_eq!(clip.shape(), (30, 6));
    assert!(clip.data.iter().all(|v| v.is_finite()));
    assert_eq!(clip.data[[0, 0]], (3 * 9 + 1) as f32);
    assert_eq!(clip.transform.top_left_x, -74.0);
    assert_eq!(clip.transform.top_left_y, -20.0);

    // Normalize
    minmax_normalize(&clipped, &normalized).unwrap();
    let norm = RasterIo::read(&normalized).unwrap();
    assert_eq!(norm.shape(), (30, 6));
    assert_eq!(norm.transform, clip.transform);
    assert_relative_eq!(norm.data[[0, 0]], 0.0);
    assert_relative_eq!(norm.data[[29, 5]], 1.0);
    assert!(norm.data.iter().all(|v| (0.0..=1.0).contains(v)));
}

#[test]
fn test_clip_masks_cells_outside_polygon() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("mean.tif");
    let output = temp_dir.path().join("clip.tif");

    let data = Array2::from_elem((39, 9), 5.0f32);
    let transform = GeoTransform::from_bbox(&BBOX_CHILE, 39, 9);
    RasterIo::write_geotiff(&Raster::new(data, transform, None), &input).unwrap();

    // Right triangle reaching into a fifth column with no cell centre inside;
    // raster CRS comes from the fallback
    let boundary = Boundary::new("CHL", "POLYGON ((-75 -21,-70.8 -21,-75 -16.8,-75 -21))");
    clip_raster_to_geometry(&input, &output, &boundary, CRS_WGS84).unwrap();

    let clip = RasterIo::read(&output).unwrap();
    assert_eq!(clip.shape(), (4, 4));
    assert_eq!(clip.transform.top_left_x, -75.0);
    assert!(clip.crs.is_some());
    // Corner near the hypotenuse's far side is outside, the near corner inside
    assert_eq!(clip.data[[3, 0]], 5.0);
    assert!(clip.data[[0, 3]].is_nan());
}

#[test]
fn test_normalize_edge_cases() {
    let temp_dir = TempDir::new().unwrap();
    let transform = GeoTransform::from_bbox(&BBOX_CHILE, 2, 2);

    let constant = temp_dir.path().join("constant.tif");
    RasterIo::write_geotiff(
        &Raster::new(Array2::from_elem((2, 2), 7.0), transform, Some(CRS_WGS84.to_string())),
        &constant,
    )
    .unwrap();
    let out = minmax_normalize(&constant, temp_dir.path().join("constant_norm.tif")).unwrap();
    let norm = RasterIo::read(&out).unwrap();
    assert!(norm.data.iter().all(|&v| v == 0.0));

    let empty = temp_dir.path().join("empty.tif");
    RasterIo::write_geotiff(
        &Raster::new(Array2::from_elem((2, 2), f32::NAN), transform, Some(CRS_WGS84.to_string())),
        &empty,
    )
    .unwrap();
    let err = minmax_normalize(&empty, temp_dir.path().join("empty_norm.tif")).unwrap_err();
    assert!(matches!(err, NtlError::NoValidPixels { .. }));
}
