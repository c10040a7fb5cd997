use crate::io::raster::spatial_ref;
use crate::types::{NtlError, NtlResult, CRS_WGS84};
use gdal::vector::{FieldValue, Geometry, LayerAccess, OGRFieldType};
use gdal::{Dataset, DriverManager, LayerOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Natural Earth 1:50m admin-0 countries (zipped shapefile)
pub const NATURAL_EARTH_URL: &str =
    "https://naturalearth.s3.amazonaws.com/50m_cultural/ne_50m_admin_0_countries.zip";

/// Layer name inside the cached GeoPackage
pub const BOUNDARY_LAYER: &str = "chile";

const COUNTRY_FIELD: &str = "ADM0_A3";

/// National boundary polygon in WGS84
#[derive(Debug, Clone, PartialEq)]
pub struct Boundary {
    pub iso_a3: String,
    pub wkt: String,
}

impl Boundary {
    pub fn new(iso_a3: &str, wkt: &str) -> Self {
        Self { iso_a3: iso_a3.to_string(), wkt: wkt.to_string() }
    }

    /// OGR geometry tagged with WGS84 (longitude first)
    pub fn geometry(&self) -> NtlResult<Geometry> {
        let mut geometry = Geometry::from_wkt(&self.wkt)?;
        geometry.set_spatial_ref(spatial_ref(CRS_WGS84)?);
        Ok(geometry)
    }
}

/// Where the world boundary archive comes from
pub trait BoundarySource {
    /// Raw bytes of the zipped world admin-0 shapefile
    fn fetch_archive(&self) -> NtlResult<Vec<u8>>;
}

/// Downloads the Natural Earth archive over HTTP
pub struct NaturalEarthSource {
    url: String,
}

impl NaturalEarthSource {
    pub fn new(url: &str) -> Self {
        Self { url: url.to_string() }
    }
}

impl Default for NaturalEarthSource {
    fn default() -> Self {
        Self::new(NATURAL_EARTH_URL)
    }
}

impl BoundarySource for NaturalEarthSource {
    fn fetch_archive(&self) -> NtlResult<Vec<u8>> {
        log::info!("Downloading world boundaries from: {}", self.url);

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .user_agent(concat!("nightlight/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let response = client.get(&self.url).send()?;
        if !response.status().is_success() {
            return Err(NtlError::Download(format!(
                "HTTP {} {}: {}",
                response.status().as_u16(),
                response.status().canonical_reason().unwrap_or(""),
                self.url
            )));
        }

        let content = response.bytes()?;
        log::debug!("Downloaded {} bytes", content.len());
        Ok(content.to_vec())
    }
}

/// Loads the Chile boundary, fetching and caching it on first use
pub struct BoundaryLoader<S: BoundarySource = NaturalEarthSource> {
    source: S,
    iso_a3: String,
}

impl BoundaryLoader<NaturalEarthSource> {
    pub fn new() -> Self {
        Self::with_source(NaturalEarthSource::default())
    }
}

impl Default for BoundaryLoader<NaturalEarthSource> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: BoundarySource> BoundaryLoader<S> {
    pub fn with_source(source: S) -> Self {
        Self { source, iso_a3: "CHL".to_string() }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Return the cached boundary at `out_path`, or fetch, filter, reproject
    /// and cache it there.
    pub fn load<P: AsRef<Path>>(&self, out_path: P) -> NtlResult<Boundary> {
        let out_path = out_path.as_ref();

        if out_path.exists() {
            log::info!("Using cached boundary: {}", out_path.display());
            return read_cached_boundary(out_path, &self.iso_a3);
        }

        let archive = self.source.fetch_archive()?;
        let temp_dir = tempfile::tempdir()?;
        let shapefile = extract_shapefile(&archive, temp_dir.path())?;

        let boundary = select_country(&shapefile, &self.iso_a3)?;
        write_cached_boundary(&boundary, out_path)?;

        log::info!("Cached {} boundary at {}", boundary.iso_a3, out_path.display());
        Ok(boundary)
    }
}

/// Download and return the Chile national boundary, cached at `out_path`
pub fn load_chile_boundary<P: AsRef<Path>>(out_path: P) -> NtlResult<Boundary> {
    BoundaryLoader::new().load(out_path)
}

/// Unpack every shapefile component into `dir`, returning the `.shp` path
fn extract_shapefile(zip_data: &[u8], dir: &Path) -> NtlResult<PathBuf> {
    use std::io::Cursor;
    use zip::ZipArchive;

    let mut archive = ZipArchive::new(Cursor::new(zip_data))?;
    let mut shp_path = None;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let Some(name) = file
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_owned()))
        else {
            continue;
        };

        let target = dir.join(&name);
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        std::fs::write(&target, buffer)?;

        if target.extension().map_or(false, |e| e.eq_ignore_ascii_case("shp")) {
            log::debug!("Extracted shapefile: {}", target.display());
            shp_path = Some(target);
        }
    }

    shp_path.ok_or_else(|| NtlError::Processing("No .shp file found in ZIP archive".to_string()))
}

/// Pick the feature whose `ADM0_A3` equals `iso_a3`, in WGS84
fn select_country(shapefile: &Path, iso_a3: &str) -> NtlResult<Boundary> {
    let dataset = Dataset::open(shapefile)?;
    let mut layer = dataset.layer(0)?;
    let layer_srs = layer.spatial_ref();

    for feature in layer.features() {
        let code = feature.field_as_string_by_name(COUNTRY_FIELD)?;
        if code.as_deref() != Some(iso_a3) {
            continue;
        }

        let geometry = feature
            .geometry()
            .ok_or_else(|| NtlError::Processing(format!("Feature {} has no geometry", iso_a3)))?;

        let wgs84 = spatial_ref(CRS_WGS84)?;
        let geometry = match &layer_srs {
            Some(srs) if *srs != wgs84 => {
                let mut tagged = geometry.clone();
                srs.set_axis_mapping_strategy(
                    gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
                );
                tagged.set_spatial_ref(srs.clone());
                tagged.transform_to(&wgs84)?
            }
            _ => geometry.clone(),
        };

        return Ok(Boundary::new(iso_a3, &geometry.wkt()?));
    }

    Err(NtlError::Processing(format!(
        "No feature with {} = {} in {}",
        COUNTRY_FIELD,
        iso_a3,
        shapefile.display()
    )))
}

fn read_cached_boundary(path: &Path, iso_a3: &str) -> NtlResult<Boundary> {
    let dataset = Dataset::open(path)?;
    let mut layer = dataset.layer_by_name(BOUNDARY_LAYER)?;

    let feature = layer
        .features()
        .next()
        .ok_or_else(|| NtlError::Processing(format!("Empty boundary cache: {}", path.display())))?;
    let geometry = feature
        .geometry()
        .ok_or_else(|| NtlError::Processing(format!("Boundary cache has no geometry: {}", path.display())))?;

    let code = feature
        .field_as_string_by_name(COUNTRY_FIELD)?
        .unwrap_or_else(|| iso_a3.to_string());

    Ok(Boundary::new(&code, &geometry.wkt()?))
}

/// Write the boundary next to `path` first and move it into place once
/// complete, so a failed write never leaves a cache that looks valid.
fn write_cached_boundary(boundary: &Boundary, path: &Path) -> NtlResult<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::tempdir_in(parent)?;
    let partial = staging.path().join("boundary.gpkg");
    write_gpkg(boundary, &partial)?;
    std::fs::rename(&partial, path)?;
    Ok(())
}

fn write_gpkg(boundary: &Boundary, path: &Path) -> NtlResult<()> {
    let driver = DriverManager::get_driver_by_name("GPKG")?;
    let mut dataset = driver.create_vector_only(path)?;
    let srs = spatial_ref(CRS_WGS84)?;
    let geometry = Geometry::from_wkt(&boundary.wkt)?;

    let mut layer = dataset.create_layer(LayerOptions {
        name: BOUNDARY_LAYER,
        srs: Some(&srs),
        ty: geometry.geometry_type(),
        ..Default::default()
    })?;
    layer.create_defn_fields(&[(COUNTRY_FIELD, OGRFieldType::OFTString)])?;

    layer.create_feature_fields(
        geometry,
        &[COUNTRY_FIELD],
        &[FieldValue::StringValue(boundary.iso_a3.clone())],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boundary_geometry_roundtrip() {
        let boundary = Boundary::new("CHL", "POLYGON ((-75 -56,-66 -56,-66 -17,-75 -17,-75 -56))");
        let geometry = boundary.geometry().unwrap();
        let env = geometry.envelope();
        assert_eq!(env.MinX, -75.0);
        assert_eq!(env.MaxY, -17.0);
    }

    #[test]
    fn test_extract_rejects_archive_without_shapefile() {
        use std::io::Write;

        let mut bytes = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut bytes));
            writer
                .start_file("README.txt", zip::write::FileOptions::default())
                .unwrap();
            writer.write_all(b"no shapes here").unwrap();
            writer.finish().unwrap();
        }

        let temp_dir = tempfile::tempdir().unwrap();
        assert!(extract_shapefile(&bytes, temp_dir.path()).is_err());
    }

    #[test]
    fn test_failed_cache_write_leaves_nothing_behind() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = temp_dir.path().join("boundaries").join("chile.gpkg");

        let broken = Boundary::new("CHL", "NOT A GEOMETRY");
        assert!(write_cached_boundary(&broken, &cache).is_err());
        assert!(!cache.exists());

        let leftovers = std::fs::read_dir(cache.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_cache_write_then_read() {
        let temp_dir = tempfile::tempdir().unwrap();
        let cache = temp_dir.path().join("chile.gpkg");
        let boundary = Boundary::new("CHL", "POLYGON ((-75 -56,-66 -56,-66 -17,-75 -17,-75 -56))");

        write_cached_boundary(&boundary, &cache).unwrap();
        let back = read_cached_boundary(&cache, "CHL").unwrap();
        assert_eq!(back.iso_a3, "CHL");
        let env = back.geometry().unwrap().envelope();
        assert_eq!((env.MinX, env.MaxY), (-75.0, -17.0));
    }
}
