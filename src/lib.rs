//! nightlight: VIIRS Black Marble nighttime-lights preprocessing
//!
//! Downloads monthly VNP46A3 granules over Chile, extracts the
//! nighttime-lights layer with optional quality masking, averages granules
//! into annual composites, clips them to the national boundary and
//! min-max normalizes the result.

pub mod config;
pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;
pub mod utils;

#[cfg(feature = "python")]
mod python;

// Re-export main types
pub use config::{ProjectPaths, StudyConfig};
pub use types::{BoundingBox, GeoTransform, NtlError, NtlImage, NtlResult, Raster};
