//! I/O modules for granules, rasters, boundaries and downloads

pub mod boundary;
pub mod download;
pub mod granule;
pub mod raster;

pub use boundary::{load_chile_boundary, Boundary, BoundaryLoader, BoundarySource, NaturalEarthSource};
pub use download::{BlackMarbleDownloader, EarthdataClient, EarthdataCredentials, GranuleArchive, GranuleRecord};
pub use granule::{GranuleReader, NtlLayer, QualityMask, NTL_CANDIDATES, QUALITY_CANDIDATES};
pub use raster::RasterIo;
