use image::{Rgb, RgbImage};
use imageproc::{
    drawing::{draw_line_segment_mut, draw_polygon_mut},
    point::Point as PixelPoint,
};

use crate::{
    error::{Result, TakeoffError},
    types::{Drawing, Element},
};

use super::geometry::Point;

/// A render of a drawing, shared read-only by every detector
#[derive(Debug, Clone)]
pub struct Raster {
    pub image: RgbImage,
    /// Pixels per drawing unit
    pub scale: f32,
}

impl Raster {
    pub fn to_drawing_units(&self, pixel: [f32; 2]) -> [f32; 2] {
        [pixel[0] / self.scale, pixel[1] / self.scale]
    }
}

/// Rasterizes drawings without anti-aliasing so marker colors stay exact
#[derive(Debug, Clone)]
pub struct Renderer {
    pub scale: f32,
    pub max_pixels: u64,
}

impl Default for Renderer {
    fn default() -> Self {
        Self {
            scale: 1.0,
            max_pixels: 64_000_000,
        }
    }
}

impl Renderer {
    pub fn render(&self, drawing: &Drawing) -> Result<Raster> {
        drawing.validate()?;
        let (width, height) = self.pixel_size(drawing)?;

        // Transparent areas render as black until a background is composited
        let mut image = RgbImage::new(width, height);
        for element in &drawing.elements {
            self.paint(&mut image, element);
        }

        tracing::debug!(width, height, elements = drawing.elements.len(), "rendered drawing");
        Ok(Raster {
            image,
            scale: self.scale,
        })
    }

    /// Raster dimensions, rejected before any allocation when out of range
    fn pixel_size(&self, drawing: &Drawing) -> Result<(u32, u32)> {
        let width = (drawing.width as f64 * self.scale as f64).ceil();
        let height = (drawing.height as f64 * self.scale as f64).ceil();
        let fits = width.is_finite()
            && height.is_finite()
            && width >= 1.0
            && height >= 1.0
            && width <= u32::MAX as f64
            && height <= u32::MAX as f64
            && width * height <= self.max_pixels as f64;
        if !fits {
            return Err(TakeoffError::InvalidDrawing(format!(
                "raster of {width}x{height} pixels is outside the allowed size"
            )));
        }
        Ok((width as u32, height as u32))
    }

    fn to_pixels(&self, p: Point) -> Point {
        [p[0] * self.scale, p[1] * self.scale]
    }

    fn paint(&self, image: &mut RgbImage, element: &Element) {
        let subpaths = element.geometry.subpaths();

        if let Some(fill) = element.style.fill {
            for subpath in subpaths.iter().filter(|s| s.is_closed()) {
                let ring: Vec<Point> = subpath.ring().into_iter().map(|p| self.to_pixels(p)).collect();
                fill_polygon(image, &ring, fill.to_rgb());
            }
        }

        if let Some(stroke) = element.style.stroke {
            let thickness = element.style.stroke_width * self.scale;
            for subpath in &subpaths {
                for [a, b] in subpath.segments() {
                    stroke_segment(image, self.to_pixels(a), self.to_pixels(b), thickness, stroke.to_rgb());
                }
            }
        }
    }
}

fn pixel_polygon(points: &[Point]) -> Vec<PixelPoint<i32>> {
    let mut pixels: Vec<PixelPoint<i32>> = Vec::with_capacity(points.len());
    for p in points {
        let pixel = PixelPoint::new(p[0].round() as i32, p[1].round() as i32);
        if pixels.last() != Some(&pixel) {
            pixels.push(pixel);
        }
    }
    // imageproc rejects polygons that repeat their first point at the end
    while pixels.len() > 1 && pixels.first() == pixels.last() {
        pixels.pop();
    }
    pixels
}

fn fill_polygon(image: &mut RgbImage, ring: &[Point], color: Rgb<u8>) {
    let pixels = pixel_polygon(ring);
    if pixels.len() >= 3 {
        draw_polygon_mut(image, &pixels, color);
    } else if let [a, b] = ring {
        draw_line_segment_mut(image, (a[0], a[1]), (b[0], b[1]), color);
    }
}

fn stroke_segment(image: &mut RgbImage, a: Point, b: Point, thickness: f32, color: Rgb<u8>) {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len = (dx * dx + dy * dy).sqrt();
    if thickness <= 1.5 || len <= f32::EPSILON {
        draw_line_segment_mut(image, (a[0], a[1]), (b[0], b[1]), color);
        return;
    }

    let (nx, ny) = (-dy / len * thickness / 2.0, dx / len * thickness / 2.0);
    let quad = [
        [a[0] + nx, a[1] + ny],
        [b[0] + nx, b[1] + ny],
        [b[0] - nx, b[1] - ny],
        [a[0] - nx, a[1] - ny],
    ];
    let pixels = pixel_polygon(&quad);
    if pixels.len() >= 3 {
        draw_polygon_mut(image, &pixels, color);
    }
    draw_line_segment_mut(image, (a[0], a[1]), (b[0], b[1]), color);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Color, ElementRole, Geometry, Style};

    fn with_background(mut drawing: Drawing) -> Drawing {
        let id = drawing.next_id().unwrap();
        drawing.elements.insert(0, Element {
            id,
            geometry: Geometry::rect(0.0, 0.0, drawing.width, drawing.height),
            style: Style::filled(Color::WHITE),
            role: ElementRole::Background,
        });
        drawing
    }

    #[test]
    fn test_render_size_follows_scale() {
        let drawing = Drawing::new(50.0, 20.0);
        let raster = Renderer { scale: 2.0, ..Default::default() }.render(&drawing).unwrap();
        assert_eq!(raster.image.dimensions(), (100, 40));
        assert_eq!(raster.to_drawing_units([10.0, 4.0]), [5.0, 2.0]);
    }

    #[test]
    fn test_background_and_fill() {
        let mut drawing = Drawing::new(40.0, 40.0);
        drawing.push(Geometry::rect(10.0, 10.0, 10.0, 10.0), Style::filled(Color::rgb(255, 0, 0)));
        let raster = Renderer::default().render(&with_background(drawing)).unwrap();
        assert_eq!(raster.image.get_pixel(2, 2), &Rgb([255, 255, 255]));
        assert_eq!(raster.image.get_pixel(15, 15), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_stroke_is_drawn() {
        let mut drawing = Drawing::new(40.0, 40.0);
        drawing.push(Geometry::line([5.0, 20.0], [35.0, 20.0]), Style::stroked(Color::rgb(0, 0, 255)));
        let raster = Renderer::default().render(&with_background(drawing)).unwrap();
        assert_eq!(raster.image.get_pixel(20, 20), &Rgb([0, 0, 255]));
        assert_eq!(raster.image.get_pixel(20, 25), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_thick_stroke_covers_width() {
        let mut drawing = Drawing::new(40.0, 40.0);
        let mut style = Style::stroked(Color::BLACK);
        style.stroke_width = 6.0;
        drawing.push(Geometry::line([5.0, 20.0], [35.0, 20.0]), style);
        let raster = Renderer::default().render(&with_background(drawing)).unwrap();
        assert_eq!(raster.image.get_pixel(20, 22), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_oversized_render_rejected() {
        let drawing = Drawing::new(1000.0, 1000.0);
        let renderer = Renderer { scale: 1.0, max_pixels: 10_000 };
        assert!(renderer.render(&drawing).is_err());
    }

    #[test]
    fn test_huge_canvas_is_an_error() {
        let mut drawing = Drawing::new(1e30, 1e30);
        drawing.push(Geometry::rect(10.0, 10.0, 12.0, 12.0), Style::stroked(Color::BLACK));
        assert!(matches!(Renderer::default().render(&drawing), Err(TakeoffError::InvalidDrawing(_))));

        let unbounded = Renderer { scale: 1.0, max_pixels: u64::MAX };
        assert!(matches!(unbounded.render(&Drawing::new(5e9, 1.0)), Err(TakeoffError::InvalidDrawing(_))));
    }
}
