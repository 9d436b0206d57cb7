//! Scene ingest and result export

pub mod export;
pub mod image_ingest;

pub use export::{display_color, save_mask_png, spills_to_geojson, write_geojson};
#[cfg(feature = "gdal")]
pub use export::save_mask_geotiff;
pub use image_ingest::ImageIngest;
