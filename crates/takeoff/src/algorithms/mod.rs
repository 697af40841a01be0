pub mod geometry;
pub mod dedup;
pub mod normalize;
pub mod background;
pub mod colorize;
pub mod raster;
pub mod detection;

pub use dedup::PathDeduplicator;
pub use normalize::StyleNormalizer;
pub use background::BackgroundCompositor;
pub use colorize::{ClassificationRules, PatternColorizer, SymbolMatch};
pub use raster::{Raster, Renderer};
pub use detection::ColorMaskDetector;
