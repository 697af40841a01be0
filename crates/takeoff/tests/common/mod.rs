#![allow(dead_code)]

use takeoff::{Color, Drawing, Geometry, Style, Subpath};

pub const GRAY: Color = Color::rgb(150, 150, 150);

pub fn x_mark(x: f32, y: f32, size: f32) -> Geometry {
    Geometry::Path {
        subpaths: vec![
            Subpath::open(vec![[x, y], [x + size, y + size]]),
            Subpath::open(vec![[x, y + size], [x + size, y]]),
        ],
    }
}

pub fn pentagon(x: f32, y: f32) -> Geometry {
    Geometry::polygon(vec![
        [x + 5.0, y],
        [x + 25.0, y - 5.0],
        [x + 30.0, y + 15.0],
        [x + 10.0, y + 20.0],
        [x, y + 10.0],
    ])
}

/// A `w` by `h` rectangle turned `degrees` about its center
pub fn rotated_rect(cx: f32, cy: f32, w: f32, h: f32, degrees: f32) -> Geometry {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let corners = [[-w, -h], [w, -h], [w, h], [-w, h]]
        .into_iter()
        .map(|[x, y]| [cx + (x * cos - y * sin) / 2.0, cy + (x * sin + y * cos) / 2.0])
        .collect();
    Geometry::polygon(corners)
}

/// Linework every scenario carries: a border, a dimension line and a note underline
fn add_linework(drawing: &mut Drawing) {
    drawing.push(Geometry::rect(5.0, 5.0, drawing.width - 10.0, drawing.height - 10.0), Style::stroked(Color::BLACK));
    drawing.push(Geometry::line([20.0, 200.0], [300.0, 200.0]), Style::stroked(GRAY));
    drawing.push(Geometry::line([250.0, 30.0], [370.0, 30.0]), Style::stroked(Color::rgb(40, 40, 60)));
}

/// 3 X-marks (one of them drawn as two separate strokes), 5 squares,
/// no irregular shapes, 2 rectangles, plus duplicates and plain linework
pub fn scenario_drawing() -> Drawing {
    let mut drawing = Drawing::new(400.0, 240.0);
    add_linework(&mut drawing);

    let ink = Style::stroked(Color::BLACK);
    drawing.push(x_mark(20.0, 20.0, 12.0), ink.clone());
    drawing.push(x_mark(80.0, 20.0, 12.0), ink.clone());
    drawing.push(Geometry::line([140.0, 20.0], [152.0, 32.0]), ink.clone());
    drawing.push(Geometry::line([140.0, 32.0], [152.0, 20.0]), ink.clone());

    for i in 0..5 {
        drawing.push(Geometry::rect(20.0 + 40.0 * i as f32, 80.0, 12.0, 12.0), ink.clone());
    }
    drawing.push(Geometry::rect(20.0, 140.0, 30.0, 12.0), ink.clone());
    drawing.push(Geometry::rect(80.0, 140.0, 30.0, 12.0), ink.clone());

    // Conversion artifacts: exact re-emissions of a mark and a square
    drawing.push(x_mark(20.0, 20.0, 12.0), ink.clone());
    drawing.push(Geometry::rect(20.0, 80.0, 12.0, 12.0), ink);
    drawing
}

/// Exactly one symbol per category
pub fn one_of_each() -> Drawing {
    let mut drawing = Drawing::new(400.0, 240.0);
    add_linework(&mut drawing);

    let ink = Style::stroked(Color::BLACK);
    drawing.push(x_mark(20.0, 40.0, 12.0), ink.clone());
    drawing.push(Geometry::rect(80.0, 40.0, 12.0, 12.0), ink.clone());
    drawing.push(pentagon(140.0, 40.0), ink.clone().with_fill(Color::LIGHT_GRAY));
    drawing.push(Geometry::rect(220.0, 40.0, 30.0, 12.0), ink);
    drawing
}
