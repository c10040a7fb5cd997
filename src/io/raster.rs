use crate::types::{display_name, GeoTransform, NtlError, NtlResult, Raster};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Single-band raster reader/writer backed by GDAL
pub struct RasterIo;

impl RasterIo {
    /// Read band 1 of any GDAL-readable source (file path or subdataset
    /// identifier such as `HDF5:"file.h5"://HDFEOS/...`).
    ///
    /// The band's nodata value becomes `NaN`. Sources without a
    /// geotransform get GDAL's identity transform, sources without a
    /// projection get `crs: None`.
    pub fn read<P: AsRef<Path>>(source: P) -> NtlResult<Raster> {
        let source = source.as_ref();
        log::debug!("Reading raster: {}", source.display());

        let dataset = Dataset::open(source)?;
        Self::read_dataset(&dataset, &display_name(source))
    }

    pub(crate) fn read_dataset(dataset: &Dataset, name: &str) -> NtlResult<Raster> {
        let (width, height) = dataset.raster_size();
        if dataset.raster_count() < 1 {
            return Err(NtlError::InvalidInput(format!("{} has no raster bands", name)));
        }

        let transform = match dataset.geo_transform() {
            Ok(gt) => GeoTransform::from_gdal(&gt),
            Err(_) => {
                log::debug!("{} has no geotransform, using identity", name);
                GeoTransform::IDENTITY
            }
        };

        let projection = dataset.projection();
        let crs = if projection.trim().is_empty() { None } else { Some(projection) };

        let band = dataset.rasterband(1)?;
        let no_data = band.no_data_value();
        let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;

        let mut data = Array2::from_shape_vec((height, width), buffer.data)
            .map_err(|e| NtlError::Processing(format!("Failed to reshape {}: {}", name, e)))?;

        if let Some(nd) = no_data.filter(|v| !v.is_nan()) {
            let nd = nd as f32;
            let mut replaced = 0usize;
            data.mapv_inplace(|v| {
                if v == nd {
                    replaced += 1;
                    f32::NAN
                } else {
                    v
                }
            });
            log::debug!("{}: {} nodata pixels ({}) set to NaN", name, replaced, nd);
        }

        log::debug!("{}: {}x{} pixels, crs set: {}", name, height, width, crs.is_some());
        Ok(Raster::new(data, transform, crs))
    }

    /// Write a raster as a single-band float32 GeoTIFF, creating parent
    /// directories. Missing cells are stored as `NaN` (also the nodata value).
    pub fn write_geotiff<P: AsRef<Path>>(raster: &Raster, output_path: P) -> NtlResult<()> {
        let output_path = output_path.as_ref();
        log::info!("Saving GeoTIFF: {}", output_path.display());

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = raster.shape();

        let mut dataset = driver.create_with_band_type::<f32, _>(
            output_path,
            width as isize,
            height as isize,
            1,
        )?;

        dataset.set_geo_transform(&raster.transform.to_gdal())?;

        if let Some(crs) = &raster.crs {
            let srs = SpatialRef::from_definition(crs)?;
            dataset.set_spatial_ref(&srs)?;
        }

        let mut rasterband = dataset.rasterband(1)?;
        let flat_data: Vec<f32> = raster.data.iter().cloned().collect();
        let buffer = Buffer::new((width, height), flat_data);
        rasterband.write((0, 0), (width, height), &buffer)?;
        rasterband.set_no_data_value(Some(f64::NAN))?;

        log::debug!("Wrote {}x{} float32 pixels", height, width);
        Ok(())
    }
}

/// Build a `SpatialRef` from a user definition with longitude-first axis order
pub fn spatial_ref(definition: &str) -> NtlResult<SpatialRef> {
    let srs = SpatialRef::from_definition(definition)?;
    srs.set_axis_mapping_strategy(
        gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
    );
    Ok(srs)
}

/// Whether two CRS definitions describe the same reference system
pub fn same_crs(a: &str, b: &str) -> NtlResult<bool> {
    if a == b {
        return Ok(true);
    }
    Ok(spatial_ref(a)? == spatial_ref(b)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, CRS_WGS84};
    use approx::assert_relative_eq;
    use ndarray::array;
    use tempfile::TempDir;

    #[test]
    fn test_geotiff_write_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("ntl.tif");

        let data = array![[1.0f32, 2.0, f32::NAN], [4.0, 5.0, 6.0]];
        let transform = GeoTransform::from_bbox(&BoundingBox::new(-75.0, -56.0, -66.0, -17.0), 2, 3);
        let raster = Raster::new(data, transform, Some(CRS_WGS84.to_string()));

        RasterIo::write_geotiff(&raster, &path).unwrap();
        let back = RasterIo::read(&path).unwrap();

        assert_eq!(back.shape(), (2, 3));
        assert_relative_eq!(back.data[[1, 2]], 6.0);
        assert!(back.data[[0, 2]].is_nan());
        assert_relative_eq!(back.transform.pixel_width, 3.0);
        assert_relative_eq!(back.transform.top_left_y, -17.0);
        assert!(same_crs(back.crs.as_deref().unwrap(), CRS_WGS84).unwrap());
    }

    #[test]
    fn test_write_without_crs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plain.tif");

        let raster = Raster::new(array![[0.5f32, 1.5]], GeoTransform::IDENTITY, None);
        RasterIo::write_geotiff(&raster, &path).unwrap();

        let back = RasterIo::read(&path).unwrap();
        assert!(back.crs.is_none());
        assert_eq!(back.shape(), (1, 2));
    }
}
