use crate::io::raster::RasterIo;
use crate::types::{display_name, NtlError, NtlImage, NtlResult};
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Min/max over finite pixels, `None` when there are none
pub fn finite_range(data: &NtlImage) -> Option<(f32, f32)> {
    data.iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Min-max scale to [0, 1] using only finite pixels.
///
/// A constant grid scales to all zeros. Non-finite pixels stay non-finite.
pub fn minmax_scale(data: &NtlImage, name: &str) -> NtlResult<NtlImage> {
    let (vmin, vmax) = finite_range(data).ok_or_else(|| NtlError::NoValidPixels {
        file: name.to_string(),
    })?;
    log::debug!("{}: min {} max {}", name, vmin, vmax);

    if vmax == vmin {
        log::info!("{}: constant raster, writing zeros", name);
        return Ok(Array2::zeros(data.dim()));
    }

    let (vmin, range) = (vmin as f64, (vmax as f64) - (vmin as f64));
    Ok(data.mapv(|v| ((v as f64 - vmin) / range) as f32))
}

/// Min-max normalize a raster file, writing a float32 GeoTIFF
pub fn minmax_normalize<P: AsRef<Path>, Q: AsRef<Path>>(in_path: P, out_path: Q) -> NtlResult<PathBuf> {
    let in_path = in_path.as_ref();
    let out_path = out_path.as_ref();
    let name = display_name(in_path);
    log::info!("Normalizing {}", name);

    let mut raster = RasterIo::read(in_path)?;
    raster.data = minmax_scale(&raster.data, &name)?;

    RasterIo::write_geotiff(&raster, out_path)?;
    Ok(out_path.to_path_buf())
}
