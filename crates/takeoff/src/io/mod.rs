pub mod geojson;
pub mod svg;

pub use geojson::{counts_from_geojson, detections_to_geojson, detections_to_geojson_string, save_detections_geojson};
