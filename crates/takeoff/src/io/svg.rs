use std::fmt::Write;

use crate::types::{Drawing, Element, Geometry, Style};

fn paint(color: Option<crate::types::Color>) -> String {
    color.map_or_else(|| "none".to_string(), |c| c.hex())
}

fn style_attributes(style: &Style) -> String {
    format!(
        r#"stroke="{}" fill="{}" stroke-width="{}""#,
        paint(style.stroke),
        paint(style.fill),
        style.stroke_width
    )
}

fn path_data(geometry: &Geometry) -> String {
    let mut data = String::new();
    for subpath in geometry.subpaths() {
        let closed = subpath.is_closed();
        let points = if closed { subpath.ring() } else { subpath.points.clone() };
        for (i, [x, y]) in points.iter().enumerate() {
            let command = if i == 0 { 'M' } else { 'L' };
            let _ = write!(data, "{command}{x} {y} ");
        }
        if closed {
            data.push_str("Z ");
        }
    }
    data.trim_end().to_string()
}

fn element_svg(element: &Element) -> String {
    let id = element.id;
    let attributes = style_attributes(&element.style);
    match &element.geometry {
        Geometry::Rect { x, y, width, height } => format!(
            r#"<rect id="{id}" x="{x}" y="{y}" width="{width}" height="{height}" {attributes}/>"#
        ),
        Geometry::Circle { cx, cy, r } => {
            format!(r#"<circle id="{id}" cx="{cx}" cy="{cy}" r="{r}" {attributes}/>"#)
        }
        Geometry::Path { .. } => format!(
            r#"<path id="{id}" d="{}" {attributes}/>"#,
            path_data(&element.geometry)
        ),
    }
}

impl Drawing {
    /// Standalone SVG document of the drawing, elements painted in order
    pub fn to_svg(&self) -> String {
        let mut svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
            w = self.width,
            h = self.height
        );
        svg.push('\n');
        for element in &self.elements {
            svg.push_str("  ");
            svg.push_str(&element_svg(element));
            svg.push('\n');
        }
        svg.push_str("</svg>\n");
        svg
    }
}
