use std::collections::{BTreeMap, HashSet};

use crate::{
    config::PipelineConfig,
    error::{Result, TakeoffError},
    marker::MarkerCategory,
    traits::{ProgressSink, TransformStage},
    types::{BoundingBox, Color, Drawing, Element, ElementId, Geometry},
};

use super::geometry::{
    Point, Segment, angle_at, angle_between, crossing_point, length, oriented_aspect,
    parameter_along, polygon_area, remove_collinear,
};

/// Crossing must fall in the middle part of both strokes to read as an X
const X_CROSSING_RANGE: std::ops::RangeInclusive<f32> = 0.2..=0.8;

/// Turning angle below which a vertex is treated as lying on a straight side
const COLLINEAR_TOLERANCE_DEG: f32 = 3.0;

/// Geometric thresholds used to recognize symbols
#[derive(Debug, Clone)]
pub struct ClassificationRules {
    pub angle_tolerance_deg: f32,
    pub square_side_ratio: f32,
    pub x_aspect_tolerance: f32,
    pub symbol_min_size: f32,
    pub symbol_max_size: f32,
    pub irregular_min_area: f32,
    pub irregular_requires_fill: bool,
    /// Unmatched colors this close to a marker color are neutralized
    pub color_tolerance: f32,
    pub neutral_tone: Color,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self::from(&PipelineConfig::default())
    }
}

impl From<&PipelineConfig> for ClassificationRules {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            angle_tolerance_deg: config.angle_tolerance_deg,
            square_side_ratio: config.square_side_ratio,
            x_aspect_tolerance: config.x_aspect_tolerance,
            symbol_min_size: config.symbol_min_size,
            symbol_max_size: config.symbol_max_size,
            irregular_min_area: config.irregular_min_area,
            irregular_requires_fill: config.irregular_requires_fill,
            color_tolerance: config.color_tolerance,
            neutral_tone: config.light_tone,
        }
    }
}

impl ClassificationRules {
    fn symbol_sized(&self, bbox: &BoundingBox) -> bool {
        let extent = bbox.max_extent();
        extent >= self.symbol_min_size && extent <= self.symbol_max_size
    }

    fn is_right_angle(&self, degrees: f32) -> bool {
        (degrees - 90.0).abs() <= self.angle_tolerance_deg
    }

    /// Two strokes crossing near their midpoints at roughly a right angle
    /// inside a near-square footprint
    pub fn is_x_mark(&self, first: &Segment, second: &Segment) -> bool {
        let Some(bbox) = BoundingBox::from_points(first.iter().chain(second.iter())) else {
            return false;
        };
        if !self.symbol_sized(&bbox) {
            return false;
        }
        let footprint = oriented_aspect(first.iter().chain(second.iter()).copied()).unwrap_or(f32::INFINITY);
        if footprint > self.x_aspect_tolerance {
            return false;
        }
        if !self.is_right_angle(angle_between(first, second)) {
            return false;
        }
        crossing_point(first, second).is_some_and(|p| {
            X_CROSSING_RANGE.contains(&parameter_along(first, p))
                && X_CROSSING_RANGE.contains(&parameter_along(second, p))
        })
    }

    /// Square or rectangle for a four-sided ring with right-angle corners
    pub fn classify_quad(&self, quad: &[Point; 4]) -> Option<MarkerCategory> {
        let bbox = BoundingBox::from_points(quad.iter())?;
        if !self.symbol_sized(&bbox) {
            return None;
        }
        let right_corners = (0..4).all(|i| {
            let angle = angle_at(quad[(i + 3) % 4], quad[i], quad[(i + 1) % 4]);
            self.is_right_angle(angle)
        });
        if !right_corners {
            return None;
        }

        let sides: Vec<f32> = (0..4).map(|i| length(quad[i], quad[(i + 1) % 4])).collect();
        if sides.iter().any(|&side| side <= f32::EPSILON) {
            return None;
        }
        let ratio = (0..4)
            .map(|i| {
                let (a, b) = (sides[i], sides[(i + 1) % 4]);
                a.max(b) / a.min(b)
            })
            .fold(1.0f32, f32::max);

        if ratio <= self.square_side_ratio {
            Some(MarkerCategory::RedSquare)
        } else {
            Some(MarkerCategory::GreenRectangle)
        }
    }

    /// Fallback for closed shapes that are not right-angled quads
    pub fn is_irregular(&self, ring: &[Point], filled: bool) -> bool {
        if ring.len() < 3 || (self.irregular_requires_fill && !filled) {
            return false;
        }
        let Some(bbox) = BoundingBox::from_points(ring.iter()) else {
            return false;
        };
        self.symbol_sized(&bbox) && polygon_area(ring) >= self.irregular_min_area
    }
}

/// A recognized symbol and the elements it consumed
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolMatch {
    pub category: MarkerCategory,
    pub elements: Vec<ElementId>,
}

fn open_segments(geometry: &Geometry) -> Option<Vec<Segment>> {
    let subpaths = geometry.subpaths();
    if subpaths.is_empty() || subpaths.iter().any(|s| s.is_closed()) {
        return None;
    }
    Some(geometry.segments())
}

fn single_ring(geometry: &Geometry) -> Option<Vec<Point>> {
    match geometry.subpaths().as_slice() {
        [subpath] if subpath.is_closed() => Some(subpath.ring()),
        _ => None,
    }
}

/// Stage 4: recognizes domain symbols and paints each with its category's
/// canonical marker color. Priority is X-mark, square, rectangle, then the
/// irregular fallback; an element joins at most one symbol.
#[derive(Debug, Clone, Default)]
pub struct PatternColorizer {
    pub rules: ClassificationRules,
}

impl PatternColorizer {
    pub fn new(rules: ClassificationRules) -> Self {
        Self { rules }
    }

    fn classify_element(&self, element: &Element) -> Option<MarkerCategory> {
        let rules = &self.rules;

        if let Some(segments) = open_segments(&element.geometry) {
            return match segments.as_slice() {
                [first, second] if rules.is_x_mark(first, second) => Some(MarkerCategory::BlueX),
                _ => None,
            };
        }

        let ring = single_ring(&element.geometry)?;
        let simplified = remove_collinear(&ring, COLLINEAR_TOLERANCE_DEG);
        if let Ok(quad) = <[Point; 4]>::try_from(simplified.as_slice()) {
            if let Some(category) = rules.classify_quad(&quad) {
                return Some(category);
            }
        }

        rules
            .is_irregular(&ring, element.style.fill.is_some())
            .then_some(MarkerCategory::PinkShape)
    }

    /// Find every symbol without modifying the drawing
    pub fn classify(&self, drawing: &Drawing) -> Vec<SymbolMatch> {
        let mut matches = Vec::new();
        let mut consumed: HashSet<ElementId> = HashSet::new();

        for element in drawing.content() {
            if let Some(category) = self.classify_element(element) {
                consumed.insert(element.id);
                matches.push(SymbolMatch {
                    category,
                    elements: vec![element.id],
                });
            }
        }

        // X-marks drawn as two separate strokes
        let lone_strokes: Vec<(ElementId, Segment, BoundingBox)> = drawing
            .content()
            .filter(|e| !consumed.contains(&e.id))
            .filter_map(|e| match open_segments(&e.geometry)?.as_slice() {
                [segment] => {
                    let bbox = BoundingBox::from_points(segment.iter())?;
                    Some((e.id, *segment, bbox))
                }
                _ => None,
            })
            .collect();

        for (i, (first_id, first, first_box)) in lone_strokes.iter().enumerate() {
            if consumed.contains(first_id) {
                continue;
            }
            let partner = lone_strokes[i + 1..].iter().find(|(id, segment, bbox)| {
                !consumed.contains(id)
                    && first_box.intersects(bbox)
                    && self.rules.is_x_mark(first, segment)
            });
            if let Some((second_id, _, _)) = partner {
                consumed.insert(*first_id);
                consumed.insert(*second_id);
                matches.push(SymbolMatch {
                    category: MarkerCategory::BlueX,
                    elements: vec![*first_id, *second_id],
                });
            }
        }

        matches
    }
}

impl TransformStage for PatternColorizer {
    fn name(&self) -> &'static str {
        "color_code_patterns"
    }

    fn apply(&self, drawing: &mut Drawing, progress: &dyn ProgressSink) -> Result<()> {
        if drawing.background_count() != 1 {
            return Err(TakeoffError::stage(
                self.name(),
                format!("expected one background element, found {}", drawing.background_count()),
            ));
        }

        let matches = self.classify(drawing);
        let mut assigned: BTreeMap<ElementId, MarkerCategory> = BTreeMap::new();
        let mut counts: BTreeMap<MarkerCategory, usize> = BTreeMap::new();
        for symbol in &matches {
            *counts.entry(symbol.category).or_default() += 1;
            for id in &symbol.elements {
                assigned.insert(*id, symbol.category);
            }
        }

        let marker_colors: Vec<Color> = MarkerCategory::all().map(MarkerCategory::color).collect();
        let collides = |color: Color| {
            marker_colors
                .iter()
                .any(|marker| marker.distance(&color) <= self.rules.color_tolerance)
        };

        let mut neutralized = 0usize;
        for element in drawing.elements.iter_mut().filter(|e| !e.is_background()) {
            match assigned.get(&element.id) {
                Some(category) => {
                    let color = category.color();
                    element.style.stroke = Some(color);
                    element.style.stroke_width = element.style.stroke_width.max(1.0);
                    if element.style.fill.is_some() {
                        element.style.fill = Some(color);
                    }
                }
                None => {
                    // Only recognized symbols may carry a marker color
                    for paint in [&mut element.style.stroke, &mut element.style.fill] {
                        if paint.is_some_and(collides) {
                            *paint = Some(self.rules.neutral_tone);
                            neutralized += 1;
                        }
                    }
                }
            }
        }

        for category in MarkerCategory::all() {
            let found = counts.get(&category).copied().unwrap_or(0);
            progress.narrate(self.name(), &format!("colored {found} {category} symbols"));
        }
        tracing::debug!(symbols = matches.len(), neutralized, "colorized patterns");
        Ok(())
    }
}
