//! Small planar geometry helpers shared by the classification stages.

use geo::{
    Area, MinimumRotatedRect,
    algorithm::line_intersection::{LineIntersection, line_intersection},
};
use geo_types::{Coord, Line, LineString, MultiPoint, Polygon};

pub type Point = [f32; 2];
pub type Segment = [Point; 2];

fn sub(a: Point, b: Point) -> Point {
    [a[0] - b[0], a[1] - b[1]]
}

fn dot(a: Point, b: Point) -> f32 {
    a[0] * b[0] + a[1] * b[1]
}

pub fn length(a: Point, b: Point) -> f32 {
    let d = sub(b, a);
    dot(d, d).sqrt()
}

/// Angle in degrees at vertex `at` between the rays to `a` and `b`
pub fn angle_at(a: Point, at: Point, b: Point) -> f32 {
    let u = sub(a, at);
    let v = sub(b, at);
    let denom = dot(u, u).sqrt() * dot(v, v).sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    (dot(u, v) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Undirected angle between two segments, in `[0, 90]` degrees
pub fn angle_between(s: &Segment, t: &Segment) -> f32 {
    let u = sub(s[1], s[0]);
    let v = sub(t[1], t[0]);
    let denom = dot(u, u).sqrt() * dot(v, v).sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    let angle = (dot(u, v).abs() / denom).clamp(0.0, 1.0).acos().to_degrees();
    angle.min(90.0)
}

fn to_line(s: &Segment) -> Line<f32> {
    Line::new(
        Coord { x: s[0][0], y: s[0][1] },
        Coord { x: s[1][0], y: s[1][1] },
    )
}

/// Proper crossing point of two segments, if they intersect at a single point
pub fn crossing_point(s: &Segment, t: &Segment) -> Option<Point> {
    match line_intersection(to_line(s), to_line(t))? {
        LineIntersection::SinglePoint { intersection, .. } => {
            Some([intersection.x, intersection.y])
        }
        LineIntersection::Collinear { .. } => None,
    }
}

/// Position of `p` along segment `s`, 0 at the start and 1 at the end
pub fn parameter_along(s: &Segment, p: Point) -> f32 {
    let d = sub(s[1], s[0]);
    let len2 = dot(d, d);
    if len2 <= f32::EPSILON {
        return 0.0;
    }
    dot(sub(p, s[0]), d) / len2
}

/// Drop vertices whose turning angle is within `tolerance_deg` of straight
pub fn remove_collinear(ring: &[Point], tolerance_deg: f32) -> Vec<Point> {
    let mut points: Vec<Point> = Vec::with_capacity(ring.len());
    for &p in ring {
        if points.last().is_some_and(|&q| length(p, q) <= 1e-4) {
            continue;
        }
        points.push(p);
    }

    let mut changed = true;
    while changed && points.len() > 3 {
        changed = false;
        let n = points.len();
        for i in 0..n {
            let prev = points[(i + n - 1) % n];
            let next = points[(i + 1) % n];
            let straight = 180.0 - angle_at(prev, points[i], next);
            if straight <= tolerance_deg {
                points.remove(i);
                changed = true;
                break;
            }
        }
    }
    points
}

pub fn polygon_area(ring: &[Point]) -> f32 {
    if ring.len() < 3 {
        return 0.0;
    }
    let coords: Vec<Coord<f32>> = ring.iter().map(|&[x, y]| Coord { x, y }).collect();
    Polygon::new(LineString::new(coords), vec![]).unsigned_area()
}

/// Long side over short side of the minimum-area rectangle enclosing the
/// points, so the ratio does not depend on how the shape is rotated
pub fn oriented_aspect(points: impl IntoIterator<Item = Point>) -> Option<f32> {
    let cloud: MultiPoint<f64> = points
        .into_iter()
        .map(|[x, y]| (x as f64, y as f64))
        .collect::<Vec<_>>()
        .into();
    let rect = cloud.minimum_rotated_rect()?;
    let corners = &rect.exterior().0;
    if corners.len() < 3 {
        return None;
    }
    let side = |a: Coord<f64>, b: Coord<f64>| (b.x - a.x).hypot(b.y - a.y);
    let (first, second) = (side(corners[0], corners[1]), side(corners[1], corners[2]));
    let (long, short) = (first.max(second), first.min(second));
    if short <= 1e-9 {
        return Some(f32::INFINITY);
    }
    Some((long / short) as f32)
}
