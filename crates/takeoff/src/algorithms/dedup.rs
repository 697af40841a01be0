use std::collections::HashMap;

use crate::{
    error::{Result, TakeoffError},
    traits::{ProgressSink, TransformStage},
    types::{Drawing, Geometry, Subpath},
};

use super::geometry::Point;

type CellKey = (i64, i64);

/// Canonical form of an element's geometry: every subpath normalized for start
/// point and direction, then the subpaths sorted.
#[derive(Debug, Clone, PartialEq)]
struct Signature {
    layout: Vec<(bool, usize)>,
    points: Vec<Point>,
}

impl Signature {
    fn new(geometry: &Geometry, cell: f32) -> Self {
        let mut subpaths: Vec<(bool, Vec<CellKey>, Vec<Point>)> = geometry
            .subpaths()
            .iter()
            .map(|subpath| canonical_subpath(subpath, cell))
            .filter(|(_, _, points)| !points.is_empty())
            .collect();
        subpaths.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));

        let layout = subpaths.iter().map(|(closed, _, points)| (*closed, points.len())).collect();
        let points = subpaths.into_iter().flat_map(|(_, _, points)| points).collect();
        Self { layout, points }
    }

    fn anchor(&self, cell: f32) -> CellKey {
        self.points.first().map(|&p| quantize(p, cell)).unwrap_or((0, 0))
    }

    fn matches(&self, other: &Signature, tolerance: f32) -> bool {
        self.layout == other.layout
            && self
                .points
                .iter()
                .zip(&other.points)
                .all(|(a, b)| (a[0] - b[0]).abs() <= tolerance && (a[1] - b[1]).abs() <= tolerance)
    }
}

fn quantize(p: Point, cell: f32) -> CellKey {
    ((p[0] / cell).round() as i64, (p[1] / cell).round() as i64)
}

fn canonical_subpath(subpath: &Subpath, cell: f32) -> (bool, Vec<CellKey>, Vec<Point>) {
    let closed = subpath.is_closed();
    let raw = if closed { subpath.ring() } else { subpath.points.clone() };

    // Re-emitted strokes often repeat a vertex
    let mut points: Vec<Point> = Vec::with_capacity(raw.len());
    for p in raw {
        if points.last().is_some_and(|q: &Point| quantize(*q, cell) == quantize(p, cell)) {
            continue;
        }
        points.push(p);
    }
    if points.is_empty() {
        return (closed, Vec::new(), points);
    }

    let mut candidates: Vec<Vec<Point>> = Vec::new();
    let reversed: Vec<Point> = points.iter().rev().copied().collect();
    if closed {
        let min_key = points.iter().map(|&p| quantize(p, cell)).min().unwrap_or((0, 0));
        for direction in [&points, &reversed] {
            for start in 0..direction.len() {
                if quantize(direction[start], cell) == min_key {
                    let mut rotated = direction[start..].to_vec();
                    rotated.extend_from_slice(&direction[..start]);
                    candidates.push(rotated);
                }
            }
        }
    } else {
        candidates.push(points.clone());
        candidates.push(reversed);
    }

    let (keys, best) = candidates
        .into_iter()
        .map(|candidate| {
            let keys: Vec<CellKey> = candidate.iter().map(|&p| quantize(p, cell)).collect();
            (keys, candidate)
        })
        .min_by(|a, b| a.0.cmp(&b.0))
        .unwrap_or_default();
    (closed, keys, best)
}

/// Stage 1: drops elements whose geometry repeats an earlier element's within
/// `tolerance`. The first occurrence wins and keeps its id.
#[derive(Debug, Clone)]
pub struct PathDeduplicator {
    pub tolerance: f32,
}

impl Default for PathDeduplicator {
    fn default() -> Self {
        Self { tolerance: 0.5 }
    }
}

impl PathDeduplicator {
    fn cell(&self) -> f32 {
        self.tolerance.max(1e-3)
    }
}

impl TransformStage for PathDeduplicator {
    fn name(&self) -> &'static str {
        "remove_duplicate_paths"
    }

    fn apply(&self, drawing: &mut Drawing, progress: &dyn ProgressSink) -> Result<()> {
        if let Some(element) = drawing.elements.iter().find(|e| !e.geometry.is_finite()) {
            return Err(TakeoffError::stage(
                self.name(),
                format!("element {} has non-finite coordinates", element.id),
            ));
        }

        let cell = self.cell();
        let before = drawing.elements.len();
        let mut kept: Vec<Signature> = Vec::new();
        let mut index: HashMap<CellKey, Vec<usize>> = HashMap::new();

        drawing.elements.retain(|element| {
            if element.is_background() {
                return true;
            }
            let signature = Signature::new(&element.geometry, cell);
            let (ax, ay) = signature.anchor(cell);

            let duplicate = (-1..=1).any(|dx| {
                (-1..=1).any(|dy| {
                    index.get(&(ax + dx, ay + dy)).is_some_and(|slots| {
                        slots
                            .iter()
                            .any(|&slot| kept[slot].matches(&signature, self.tolerance))
                    })
                })
            });
            if duplicate {
                tracing::trace!(element = %element.id, "dropping duplicate path");
                return false;
            }

            index.entry((ax, ay)).or_default().push(kept.len());
            kept.push(signature);
            true
        });

        let removed = before - drawing.elements.len();
        tracing::debug!(removed, remaining = drawing.elements.len(), "deduplicated paths");
        progress.narrate(
            self.name(),
            &format!("removed {removed} duplicate paths, {} elements remain", drawing.elements.len()),
        );
        Ok(())
    }
}
