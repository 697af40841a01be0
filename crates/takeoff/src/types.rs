use std::{fmt, fs, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TakeoffError};

/// An opaque sRGB color, serialized as `#rrggbb`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const LIGHT_GRAY: Color = Color::rgb(211, 211, 211);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Relative luminance in `[0, 1]` (Rec. 709 weights on the encoded channels)
    pub fn luminance(&self) -> f32 {
        (0.2126 * self.r as f32 + 0.7152 * self.g as f32 + 0.0722 * self.b as f32) / 255.0
    }

    /// Euclidean distance in RGB space
    pub fn distance(&self, other: &Color) -> f32 {
        let dr = self.r as f32 - other.r as f32;
        let dg = self.g as f32 - other.g as f32;
        let db = self.b as f32 - other.b as f32;
        (dr * dr + dg * dg + db * db).sqrt()
    }

    pub fn to_rgb(self) -> image::Rgb<u8> {
        image::Rgb([self.r, self.g, self.b])
    }

    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl FromStr for Color {
    type Err = TakeoffError;

    fn from_str(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "black" => return Ok(Color::BLACK),
            "white" => return Ok(Color::WHITE),
            "lightgray" | "lightgrey" => return Ok(Color::LIGHT_GRAY),
            _ => {}
        }

        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);
        let invalid = || TakeoffError::InvalidConfig(format!("invalid color '{value}'"));
        let channel = |range: std::ops::Range<usize>| {
            hex.get(range)
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or_else(invalid)
        };

        match hex.len() {
            6 => Ok(Color::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?)),
            3 => {
                let expand = |c: u8| c * 17;
                Ok(Color::rgb(
                    expand(channel(0..1)?),
                    expand(channel(1..2)?),
                    expand(channel(2..3)?),
                ))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = TakeoffError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.hex()
    }
}

/// Stable element identifier, preserved across every stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl BoundingBox {
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 2]>) -> Option<Self> {
        let mut iter = points.into_iter();
        let &[x, y] = iter.next()?;
        let mut bbox = BoundingBox { min: [x, y], max: [x, y] };
        for &[x, y] in iter {
            bbox.min[0] = bbox.min[0].min(x);
            bbox.min[1] = bbox.min[1].min(y);
            bbox.max[0] = bbox.max[0].max(x);
            bbox.max[1] = bbox.max[1].max(y);
        }
        Some(bbox)
    }

    pub fn width(&self) -> f32 {
        self.max[0] - self.min[0]
    }

    pub fn height(&self) -> f32 {
        self.max[1] - self.min[1]
    }

    pub fn center(&self) -> [f32; 2] {
        [(self.min[0] + self.max[0]) / 2.0, (self.min[1] + self.max[1]) / 2.0]
    }

    /// Long side over short side, `INFINITY` for degenerate boxes
    pub fn aspect_ratio(&self) -> f32 {
        let (w, h) = (self.width(), self.height());
        let (long, short) = if w >= h { (w, h) } else { (h, w) };
        if short <= f32::EPSILON {
            f32::INFINITY
        } else {
            long / short
        }
    }

    pub fn max_extent(&self) -> f32 {
        self.width().max(self.height())
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min: [self.min[0].min(other.min[0]), self.min[1].min(other.min[1])],
            max: [self.max[0].max(other.max[0]), self.max[1].max(other.max[1])],
        }
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min[0] <= other.max[0]
            && other.min[0] <= self.max[0]
            && self.min[1] <= other.max[1]
            && other.min[1] <= self.max[1]
    }
}

/// One continuous run of points inside a path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subpath {
    pub points: Vec<[f32; 2]>,
    #[serde(default)]
    pub closed: bool,
}

impl Subpath {
    pub fn open(points: Vec<[f32; 2]>) -> Self {
        Self { points, closed: false }
    }

    pub fn closed(points: Vec<[f32; 2]>) -> Self {
        Self { points, closed: true }
    }

    /// Closed either explicitly or because the last point returns to the first
    pub fn is_closed(&self) -> bool {
        if self.closed {
            return true;
        }
        match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) if self.points.len() > 3 => {
                (first[0] - last[0]).abs() <= 1e-3 && (first[1] - last[1]).abs() <= 1e-3
            }
            _ => false,
        }
    }

    /// Vertices of a closed ring without the repeated closing point
    pub fn ring(&self) -> Vec<[f32; 2]> {
        let mut points = self.points.clone();
        while points.len() > 1 {
            let (first, last) = (points[0], points[points.len() - 1]);
            if (first[0] - last[0]).abs() <= 1e-3 && (first[1] - last[1]).abs() <= 1e-3 {
                points.pop();
            } else {
                break;
            }
        }
        points
    }

    pub fn segments(&self) -> Vec<[[f32; 2]; 2]> {
        let mut segments: Vec<[[f32; 2]; 2]> =
            self.points.windows(2).map(|w| [w[0], w[1]]).collect();
        if self.closed && self.points.len() > 2 {
            if let (Some(&first), Some(&last)) = (self.points.first(), self.points.last()) {
                if first != last {
                    segments.push([last, first]);
                }
            }
        }
        segments
    }
}

const CIRCLE_SEGMENTS: usize = 24;

/// Geometry of a drawing element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    Path { subpaths: Vec<Subpath> },
    Rect { x: f32, y: f32, width: f32, height: f32 },
    Circle { cx: f32, cy: f32, r: f32 },
}

impl Geometry {
    pub fn line(from: [f32; 2], to: [f32; 2]) -> Self {
        Geometry::Path {
            subpaths: vec![Subpath::open(vec![from, to])],
        }
    }

    pub fn polyline(points: Vec<[f32; 2]>) -> Self {
        Geometry::Path {
            subpaths: vec![Subpath::open(points)],
        }
    }

    pub fn polygon(points: Vec<[f32; 2]>) -> Self {
        Geometry::Path {
            subpaths: vec![Subpath::closed(points)],
        }
    }

    pub fn rect(x: f32, y: f32, width: f32, height: f32) -> Self {
        Geometry::Rect { x, y, width, height }
    }

    /// Normalizes every primitive into point runs
    pub fn subpaths(&self) -> Vec<Subpath> {
        match self {
            Geometry::Path { subpaths } => subpaths.clone(),
            Geometry::Rect { x, y, width, height } => vec![Subpath::closed(vec![
                [*x, *y],
                [x + width, *y],
                [x + width, y + height],
                [*x, y + height],
            ])],
            Geometry::Circle { cx, cy, r } => {
                let points = (0..CIRCLE_SEGMENTS)
                    .map(|i| {
                        let theta = i as f32 / CIRCLE_SEGMENTS as f32 * std::f32::consts::TAU;
                        [cx + r * theta.cos(), cy + r * theta.sin()]
                    })
                    .collect();
                vec![Subpath::closed(points)]
            }
        }
    }

    pub fn segments(&self) -> Vec<[[f32; 2]; 2]> {
        self.subpaths().iter().flat_map(Subpath::segments).collect()
    }

    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let subpaths = self.subpaths();
        BoundingBox::from_points(subpaths.iter().flat_map(|s| s.points.iter()))
    }

    pub fn is_finite(&self) -> bool {
        self.subpaths()
            .iter()
            .flat_map(|s| s.points.iter())
            .all(|[x, y]| x.is_finite() && y.is_finite())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default)]
    pub stroke: Option<Color>,
    #[serde(default)]
    pub fill: Option<Color>,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f32,
}

fn default_stroke_width() -> f32 {
    1.0
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke: Some(Color::BLACK),
            fill: None,
            stroke_width: default_stroke_width(),
        }
    }
}

impl Style {
    pub fn stroked(color: Color) -> Self {
        Self {
            stroke: Some(color),
            ..Self::default()
        }
    }

    pub fn filled(fill: Color) -> Self {
        Self {
            stroke: None,
            fill: Some(fill),
            stroke_width: default_stroke_width(),
        }
    }

    pub fn with_fill(mut self, fill: Color) -> Self {
        self.fill = Some(fill);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementRole {
    #[default]
    Content,
    Background,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    pub geometry: Geometry,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub role: ElementRole,
}

impl Element {
    pub fn is_background(&self) -> bool {
        self.role == ElementRole::Background
    }
}

/// In-memory vector drawing: an ordered list of elements painted back to front
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub width: f32,
    pub height: f32,
    pub elements: Vec<Element>,
}

impl Drawing {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            elements: Vec::new(),
        }
    }

    /// One past the largest id in use
    pub fn next_id(&self) -> Result<ElementId> {
        match self.elements.iter().map(|e| e.id.0).max() {
            None => Ok(ElementId(0)),
            Some(max) => max.checked_add(1).map(ElementId).ok_or_else(|| {
                TakeoffError::InvalidDrawing(format!("element id {max} leaves no room for a new element"))
            }),
        }
    }

    /// Smallest id not used by any element
    fn lowest_free_id(&self) -> ElementId {
        let used: std::collections::HashSet<u64> = self.elements.iter().map(|e| e.id.0).collect();
        ElementId((0..).find(|id| !used.contains(id)).unwrap_or_default())
    }

    /// Append an element and return its freshly allocated id
    pub fn push(&mut self, geometry: Geometry, style: Style) -> ElementId {
        let id = self.next_id().unwrap_or_else(|_| self.lowest_free_id());
        self.elements.push(Element {
            id,
            geometry,
            style,
            role: ElementRole::Content,
        });
        id
    }

    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.iter().find(|e| e.id == id)
    }

    pub fn content(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|e| !e.is_background())
    }

    pub fn background_count(&self) -> usize {
        self.elements.iter().filter(|e| e.is_background()).count()
    }

    /// Elements whose stroke or fill is exactly `color`
    pub fn elements_colored(&self, color: Color) -> Vec<&Element> {
        self.content()
            .filter(|e| e.style.stroke == Some(color) || e.style.fill == Some(color))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
        {
            return Err(TakeoffError::InvalidDrawing(format!(
                "canvas size {}x{} is not positive",
                self.width, self.height
            )));
        }
        if let Some(element) = self.elements.iter().find(|e| !e.geometry.is_finite()) {
            return Err(TakeoffError::InvalidDrawing(format!(
                "element {} has non-finite coordinates",
                element.id
            )));
        }
        Ok(())
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}
