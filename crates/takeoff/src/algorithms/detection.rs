use std::collections::{BTreeMap, btree_map::Entry};

use image::{GrayImage, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::{
    config::PipelineConfig,
    error::Result,
    marker::{DetectedComponent, DetectionResult, MarkerCategory},
    traits::{DetectorStage, ProgressSink},
    types::{BoundingBox, Color},
};

use super::{geometry::oriented_aspect, raster::Raster};

/// Pixel statistics of one connected component, or of several merged ones
#[derive(Debug, Clone)]
struct Blob {
    area: u32,
    sum_x: f64,
    sum_y: f64,
    min: [u32; 2],
    max: [u32; 2],
    /// Leftmost and rightmost pixel per row, enough to recover the convex hull
    rows: BTreeMap<u32, (u32, u32)>,
}

impl Blob {
    fn at(x: u32, y: u32) -> Self {
        Self {
            area: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            min: [x, y],
            max: [x, y],
            rows: BTreeMap::new(),
        }
    }

    fn add(&mut self, x: u32, y: u32) {
        self.area += 1;
        self.sum_x += x as f64;
        self.sum_y += y as f64;
        self.min = [self.min[0].min(x), self.min[1].min(y)];
        self.max = [self.max[0].max(x), self.max[1].max(y)];
        self.extend_row(y, x, x);
    }

    fn extend_row(&mut self, y: u32, left: u32, right: u32) {
        self.rows
            .entry(y)
            .and_modify(|span| *span = (span.0.min(left), span.1.max(right)))
            .or_insert((left, right));
    }

    fn absorb(&mut self, other: &Blob) {
        self.area += other.area;
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.min = [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])];
        self.max = [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])];
        for (&y, &(left, right)) in &other.rows {
            self.extend_row(y, left, right);
        }
    }

    fn centroid(&self) -> [f32; 2] {
        let area = self.area.max(1) as f64;
        [(self.sum_x / area) as f32 + 0.5, (self.sum_y / area) as f32 + 0.5]
    }

    /// Pixel extents, counting the last row and column
    fn bounds(&self) -> BoundingBox {
        BoundingBox {
            min: [self.min[0] as f32, self.min[1] as f32],
            max: [self.max[0] as f32 + 1.0, self.max[1] as f32 + 1.0],
        }
    }

    /// Outer corners of the extreme pixel in every row
    fn outline(&self) -> impl Iterator<Item = [f32; 2]> + '_ {
        self.rows.iter().flat_map(|(&y, &(left, right))| {
            let (top, bottom) = (y as f32, y as f32 + 1.0);
            let (left, right) = (left as f32, right as f32 + 1.0);
            [[left, top], [left, bottom], [right, top], [right, bottom]]
        })
    }

    /// Aspect of the minimum-area enclosing rectangle, whatever the rotation
    fn aspect(&self) -> f32 {
        oriented_aspect(self.outline()).unwrap_or_else(|| self.bounds().aspect_ratio())
    }
}

/// Disjoint-set forest over component indices
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self { parent: (0..len).collect() }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Stages 5-8: counts one marker category by masking its canonical color,
/// labelling connected components, merging fragments of the same symbol and
/// filtering what remains by size and shape.
#[derive(Debug, Clone)]
pub struct ColorMaskDetector {
    pub category: MarkerCategory,
    /// Maximum RGB distance from the marker color
    pub color_tolerance: f32,
    /// Minimum merged pixel area
    pub min_area: u32,
    /// Centroid merge radius in drawing units
    pub merge_epsilon: f32,
    /// Accepted range of aspect ratios (long side over short side) of the
    /// smallest rotated rectangle around a component
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl ColorMaskDetector {
    pub fn new(category: MarkerCategory) -> Self {
        Self::from_config(category, &PipelineConfig::default())
    }

    pub fn from_config(category: MarkerCategory, config: &PipelineConfig) -> Self {
        let slack = config.detector_aspect_slack;
        let (min_aspect, max_aspect) = match category {
            MarkerCategory::BlueX => (1.0, config.x_aspect_tolerance + slack),
            MarkerCategory::RedSquare => (1.0, config.square_side_ratio + slack),
            // Halfway between a perfect square and the colorizer's square limit
            MarkerCategory::GreenRectangle => (1.0 + (config.square_side_ratio - 1.0) / 2.0, f32::INFINITY),
            MarkerCategory::PinkShape => (1.0, f32::INFINITY),
        };
        Self {
            category,
            color_tolerance: config.color_tolerance,
            min_area: config.marker_min_area,
            merge_epsilon: config.merge_epsilon,
            min_aspect,
            max_aspect,
        }
    }

    pub fn target(&self) -> Color {
        self.category.color()
    }

    /// Binary mask, 255 where the pixel matches the marker color
    pub fn mask(&self, raster: &Raster) -> GrayImage {
        let target = self.target();
        GrayImage::from_fn(raster.image.width(), raster.image.height(), |x, y| {
            let [r, g, b] = raster.image.get_pixel(x, y).0;
            if Color::rgb(r, g, b).distance(&target) <= self.color_tolerance {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        })
    }

    fn blobs(&self, mask: &GrayImage) -> Vec<Blob> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        let mut blobs: BTreeMap<u32, Blob> = BTreeMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            blobs.entry(label).or_insert_with(|| Blob::at(x, y)).add(x, y);
        }
        blobs.into_values().collect()
    }

    /// Merge blobs whose centroids lie within `radius` pixels of each other
    fn merge(blobs: Vec<Blob>, radius: f32) -> Vec<Blob> {
        let mut sets = UnionFind::new(blobs.len());
        let centroids: Vec<[f32; 2]> = blobs.iter().map(Blob::centroid).collect();
        for i in 0..blobs.len() {
            for j in i + 1..blobs.len() {
                let (dx, dy) = (centroids[i][0] - centroids[j][0], centroids[i][1] - centroids[j][1]);
                if (dx * dx + dy * dy).sqrt() <= radius {
                    sets.union(i, j);
                }
            }
        }

        let mut merged: BTreeMap<usize, Blob> = BTreeMap::new();
        for (i, blob) in blobs.into_iter().enumerate() {
            match merged.entry(sets.find(i)) {
                Entry::Occupied(mut group) => group.get_mut().absorb(&blob),
                Entry::Vacant(slot) => {
                    slot.insert(blob);
                }
            }
        }
        merged.into_values().collect()
    }

    fn plausible(&self, blob: &Blob) -> bool {
        if blob.area < self.min_area {
            return false;
        }
        let aspect = blob.aspect();
        aspect >= self.min_aspect && aspect <= self.max_aspect
    }
}

impl DetectorStage for ColorMaskDetector {
    fn name(&self) -> &'static str {
        self.category.detector_name()
    }

    fn category(&self) -> MarkerCategory {
        self.category
    }

    fn detect(&self, raster: &Raster, progress: &dyn ProgressSink) -> Result<DetectionResult> {
        let mask = self.mask(raster);
        let blobs = self.blobs(&mask);
        let labelled = blobs.len();
        let merged = Self::merge(blobs, self.merge_epsilon * raster.scale);
        let grouped = merged.len();

        let components: Vec<DetectedComponent> = merged
            .into_iter()
            .filter(|blob| self.plausible(blob))
            .map(|blob| {
                let bounds = blob.bounds();
                DetectedComponent {
                    centroid: raster.to_drawing_units(blob.centroid()),
                    bbox: BoundingBox {
                        min: raster.to_drawing_units(bounds.min),
                        max: raster.to_drawing_units(bounds.max),
                    },
                    area_px: blob.area,
                }
            })
            .collect();

        tracing::debug!(
            category = %self.category,
            labelled,
            grouped,
            counted = components.len(),
            "color mask detection"
        );
        let result = DetectionResult::new(self.category, components);
        progress.narrate(
            self.name(),
            &format!("found {} {} markers", result.count, self.category),
        );
        Ok(result)
    }

    fn render_mask(&self, raster: &Raster) -> Option<GrayImage> {
        Some(self.mask(raster))
    }
}
