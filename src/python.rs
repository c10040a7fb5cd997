//! Python bindings for notebook use

use crate::config::BBOX_CHILE;
use crate::core::{clip, composite::AnnualCompositor, georef, normalize};
use crate::io::boundary::{load_chile_boundary as load_boundary, Boundary};
use crate::io::download::{BlackMarbleDownloader, EarthdataClient};
use crate::io::granule::GranuleReader;
use crate::io::raster::RasterIo;
use crate::types::{BoundingBox, NtlError, CRS_WGS84};
use numpy::ToPyArray;
use pyo3::exceptions::{PyFileNotFoundError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;
use std::path::PathBuf;

fn to_py_err(err: NtlError) -> PyErr {
    match err {
        NtlError::SubdatasetNotFound { .. } => PyFileNotFoundError::new_err(err.to_string()),
        NtlError::NoValidPixels { .. } | NtlError::InvalidInput(_) | NtlError::Config(_) => {
            PyValueError::new_err(err.to_string())
        }
        _ => PyRuntimeError::new_err(err.to_string()),
    }
}

fn bbox_from_tuple(bbox: Option<(f64, f64, f64, f64)>) -> BoundingBox {
    bbox.map(|(a, b, c, d)| BoundingBox::new(a, b, c, d)).unwrap_or(BBOX_CHILE)
}

/// Return the first matching subdataset name inside the HDF5 file
#[pyfunction]
fn find_subdataset(h5_path: PathBuf, candidates: Vec<String>) -> PyResult<String> {
    let candidates: Vec<&str> = candidates.iter().map(String::as_str).collect();
    GranuleReader::find_subdataset(&h5_path, &candidates).map_err(to_py_err)
}

/// Read band 1 of a raster as a dict with `data`, `transform` and `crs`
#[pyfunction]
fn read_raster(py: Python, path: PathBuf) -> PyResult<PyObject> {
    let raster = RasterIo::read(&path).map_err(to_py_err)?;

    let result = PyDict::new(py);
    result.set_item("data", raster.data.to_pyarray(py))?;
    result.set_item("transform", raster.transform.to_gdal().to_vec())?;
    result.set_item("crs", raster.crs)?;
    Ok(result.into())
}

/// Build an annual mean composite from monthly granules and save it
#[pyfunction]
#[pyo3(signature = (h5_files, out_path, use_quality_mask = true))]
fn annual_mean_ntl(h5_files: Vec<PathBuf>, out_path: PathBuf, use_quality_mask: bool) -> PyResult<PathBuf> {
    let composite = AnnualCompositor::new(use_quality_mask)
        .composite(&h5_files)
        .map_err(to_py_err)?;
    RasterIo::write_geotiff(&composite.raster, &out_path).map_err(to_py_err)?;
    Ok(out_path)
}

/// Clip a raster to a WKT polygon in WGS84 and save it
#[pyfunction]
#[pyo3(signature = (in_path, out_path, boundary_wkt, raster_crs_fallback = CRS_WGS84))]
fn clip_raster_to_boundary(
    in_path: PathBuf,
    out_path: PathBuf,
    boundary_wkt: &str,
    raster_crs_fallback: &str,
) -> PyResult<PathBuf> {
    let boundary = Boundary::new("CHL", boundary_wkt);
    clip::clip_raster_to_geometry(&in_path, &out_path, &boundary, raster_crs_fallback).map_err(to_py_err)
}

/// Assign lon/lat coordinates from a bounding box and write CRS
#[pyfunction]
#[pyo3(signature = (in_path, out_path, bbox = None, crs = CRS_WGS84))]
fn georef_raster_with_bbox(
    in_path: PathBuf,
    out_path: PathBuf,
    bbox: Option<(f64, f64, f64, f64)>,
    crs: &str,
) -> PyResult<PathBuf> {
    let bbox = bbox_from_tuple(bbox);
    georef::georef_raster_with_bbox(&in_path, &out_path, &bbox, crs).map_err(to_py_err)
}

/// Min-max normalize raster values to [0, 1] using only finite pixels
#[pyfunction]
fn minmax_normalize(in_path: PathBuf, out_path: PathBuf) -> PyResult<PathBuf> {
    normalize::minmax_normalize(&in_path, &out_path).map_err(to_py_err)
}

/// Chile boundary as WKT, cached at `out_path`
#[pyfunction]
fn load_chile_boundary(out_path: PathBuf) -> PyResult<String> {
    load_boundary(&out_path).map(|b| b.wkt).map_err(to_py_err)
}

/// Search and download one year of VNP46A3 granules
#[pyfunction]
#[pyo3(signature = (year, raw_dir, bbox = None))]
fn download_year(year: i32, raw_dir: PathBuf, bbox: Option<(f64, f64, f64, f64)>) -> PyResult<Vec<PathBuf>> {
    let bbox = bbox_from_tuple(bbox);
    let client = EarthdataClient::login().map_err(to_py_err)?;
    BlackMarbleDownloader::new(client)
        .download_year(year, &bbox, &raw_dir)
        .map_err(to_py_err)
}

/// Python module definition
#[pymodule]
fn _nightlight(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(find_subdataset, m)?)?;
    m.add_function(wrap_pyfunction!(read_raster, m)?)?;
    m.add_function(wrap_pyfunction!(annual_mean_ntl, m)?)?;
    m.add_function(wrap_pyfunction!(clip_raster_to_boundary, m)?)?;
    m.add_function(wrap_pyfunction!(georef_raster_with_bbox, m)?)?;
    m.add_function(wrap_pyfunction!(minmax_normalize, m)?)?;
    m.add_function(wrap_pyfunction!(load_chile_boundary, m)?)?;
    m.add_function(wrap_pyfunction!(download_year, m)?)?;
    m.add("CHANGE_THRESHOLD", crate::config::CHANGE_THRESHOLD)?;
    Ok(())
}
