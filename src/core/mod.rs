//! Core raster processing modules

pub mod clip;
pub mod composite;
pub mod georef;
pub mod normalize;
pub mod resample;

// Re-export main types
pub use clip::{clip_raster, clip_raster_to_geometry, ensure_raster_crs};
pub use composite::{mean_composite, AnnualCompositor, Composite, GdalLayerSource, LayerSource};
pub use georef::{georef_raster_with_bbox, georef_with_bbox};
pub use normalize::{minmax_normalize, minmax_scale};
pub use resample::reproject_match;
