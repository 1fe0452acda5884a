//! Raster surface backed by an RGBA image (image)

use std::path::Path as FsPath;

use image::{ImageBuffer, ImageResult, Rgba, RgbaImage, imageops};

use crate::color::{Paint, ResolvedGradient, parse_css_color};
use crate::geometry::{Path, Point, Rect};
use crate::surface::{CompositeOp, DrawState, StateStack, Surface, SurfaceError, SurfaceProvider};

/// Largest pixel count a canvas may allocate.
const MAX_PIXELS: u64 = 16384 * 16384;

/// Request for a raster surface of a given size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}

impl SurfaceProvider for Canvas {
    type Surface = RasterSurface;

    fn acquire(self) -> Result<RasterSurface, SurfaceError> {
        let pixels = u64::from(self.width) * u64::from(self.height);
        if pixels == 0 || pixels > MAX_PIXELS {
            return Err(SurfaceError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(RasterSurface::new(self.width, self.height))
    }
}

/// Software 2D surface drawing into an `RgbaImage`.
///
/// Pixels are sampled at their centers without anti-aliasing. Text is not
/// rasterized since no font is bundled.
pub struct RasterSurface {
    image: RgbaImage,
    states: StateStack,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: ImageBuffer::new(width, height),
            states: StateStack::default(),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Write the current frame, format chosen from the extension.
    pub fn write_to(&self, path: &FsPath) -> ImageResult<()> {
        self.image.save(path)
    }

    /// Pixel bounds writable under the current clip, as `[x0, x1) x [y0, y1)`.
    fn bounds(&self) -> Bounds {
        let (w, h) = self.image.dimensions();
        let mut b = Bounds {
            x0: 0,
            y0: 0,
            x1: w,
            y1: h,
        };
        if let Some(clip) = self.states.current().clip {
            b.x0 = center_index(clip.x, w);
            b.y0 = center_index(clip.y, h);
            b.x1 = center_index(clip.right(), w);
            b.y1 = center_index(clip.bottom(), h);
        }
        b
    }

    fn shader(&self, paint: &Paint) -> Option<Shader> {
        match paint {
            Paint::Solid(css) => parse_css_color(css).map(Shader::Solid),
            Paint::Gradient(gradient) => Some(Shader::Gradient(gradient.resolve())),
        }
    }

    fn paint_coverage(&mut self, coverage: &Coverage, paint: &Paint) {
        let Some(shader) = self.shader(paint) else {
            log::trace!("skipping unparseable paint {:?}", paint);
            return;
        };
        let state = self.states.current().clone();
        let b = coverage.bounds;
        for y in b.y0..b.y1 {
            for x in b.x0..b.x1 {
                if coverage.covered(x, y) {
                    let src = shader.sample(x as f32 + 0.5, y as f32 + 0.5);
                    blend(self.image.get_pixel_mut(x, y), src, &state);
                }
            }
        }
    }

    /// Blend a whole layer of the same size under the current state.
    fn blend_layer(&mut self, layer: &RgbaImage) {
        let state = self.states.current().clone();
        let b = self.bounds();
        for y in b.y0..b.y1 {
            for x in b.x0..b.x1 {
                blend(self.image.get_pixel_mut(x, y), *layer.get_pixel(x, y), &state);
            }
        }
    }
}

/// First pixel whose center lies at or after `edge`, clamped to `0..=limit`.
fn center_index(edge: f32, limit: u32) -> u32 {
    let index = (edge - 0.5).ceil();
    if index.is_nan() || index <= 0.0 {
        0
    } else {
        (index as u32).min(limit)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Bounds {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl Bounds {
    fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }
}

enum Shader {
    Solid(Rgba<u8>),
    Gradient(ResolvedGradient),
}

impl Shader {
    fn sample(&self, x: f32, y: f32) -> Rgba<u8> {
        match self {
            Self::Solid(color) => *color,
            Self::Gradient(gradient) => gradient.sample(x, y),
        }
    }
}

/// Pixel mask over a bounded region.
struct Coverage {
    bounds: Bounds,
    mask: Vec<bool>,
}

impl Coverage {
    fn new(bounds: Bounds) -> Self {
        let len = bounds.width() as usize * bounds.height() as usize;
        Self {
            bounds,
            mask: vec![false; len],
        }
    }

    fn covered(&self, x: u32, y: u32) -> bool {
        let b = self.bounds;
        let i = (y - b.y0) as usize * b.width() as usize + (x - b.x0) as usize;
        self.mask[i]
    }

    fn set_span(&mut self, y: u32, from: f32, to: f32) {
        let b = self.bounds;
        let start = center_index(from, b.x1).max(b.x0);
        let end = center_index(to, b.x1);
        let row = (y - b.y0) as usize * b.width() as usize;
        for x in start..end {
            self.mask[row + (x - b.x0) as usize] = true;
        }
    }

    fn add_rect(&mut self, rect: Rect) {
        let b = self.bounds;
        let y0 = center_index(rect.y, b.y1).max(b.y0);
        let y1 = center_index(rect.bottom(), b.y1);
        for y in y0..y1 {
            self.set_span(y, rect.x, rect.right());
        }
    }

    /// Scanline fill of `polygons` together under the nonzero winding rule.
    fn add_polygons(&mut self, polygons: &[Vec<Point>]) {
        let (mut min_y, mut max_y) = (f32::INFINITY, f32::NEG_INFINITY);
        for p in polygons.iter().flatten() {
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        if !min_y.is_finite() || !max_y.is_finite() {
            return;
        }
        let b = self.bounds;
        let y0 = center_index(min_y, b.y1).max(b.y0);
        let y1 = center_index(max_y, b.y1);
        let mut crossings: Vec<(f32, i32)> = Vec::new();
        for y in y0..y1 {
            let scan = y as f32 + 0.5;
            crossings.clear();
            for polygon in polygons {
                for (i, &a) in polygon.iter().enumerate() {
                    let next = polygon[(i + 1) % polygon.len()];
                    if (a.y <= scan) != (next.y <= scan) {
                        let t = (scan - a.y) / (next.y - a.y);
                        let direction = if next.y > a.y { 1 } else { -1 };
                        crossings.push((a.x + t * (next.x - a.x), direction));
                    }
                }
            }
            crossings.sort_by(|a, b| a.0.total_cmp(&b.0));
            let mut winding = 0;
            let mut span_start = 0.0;
            for &(x, direction) in &crossings {
                let before = winding;
                winding += direction;
                if before == 0 && winding != 0 {
                    span_start = x;
                } else if before != 0 && winding == 0 {
                    self.set_span(y, span_start, x);
                }
            }
        }
    }

    /// Stroke a polyline: one quad per segment plus square joins at vertices.
    fn add_stroke(&mut self, points: &[Point], closed: bool, line_width: f32) {
        let half = line_width / 2.0;
        let mut segments: Vec<(Point, Point)> = points.windows(2).map(|w| (w[0], w[1])).collect();
        if closed {
            if let (Some(&first), Some(&last)) = (points.first(), points.last()) {
                segments.push((last, first));
            }
        }
        for (a, b) in segments {
            let (dx, dy) = (b.x - a.x, b.y - a.y);
            let len = dx.hypot(dy);
            if len == 0.0 {
                continue;
            }
            let (nx, ny) = (-dy / len * half, dx / len * half);
            self.add_polygons(&[vec![
                Point::new(a.x + nx, a.y + ny),
                Point::new(b.x + nx, b.y + ny),
                Point::new(b.x - nx, b.y - ny),
                Point::new(a.x - nx, a.y - ny),
            ]]);
        }
        let joints = if closed {
            points
        } else {
            points.get(1..points.len().saturating_sub(1)).unwrap_or(&[])
        };
        for p in joints {
            self.add_rect(Rect::new(p.x - half, p.y - half, line_width, line_width));
        }
    }
}

/// Composite `src` onto `dst` with the state's alpha and operator.
fn blend(dst: &mut Rgba<u8>, src: Rgba<u8>, state: &DrawState) {
    let src_a = f32::from(src.0[3]) / 255.0 * state.global_alpha.clamp(0.0, 1.0);
    if src_a <= 0.0 {
        return;
    }
    let dst_a = f32::from(dst.0[3]) / 255.0;
    let out_a = match state.composite {
        CompositeOp::SourceOver => src_a + dst_a * (1.0 - src_a),
        CompositeOp::Lighter => (src_a + dst_a).min(1.0),
    };
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for i in 0..3 {
        let s = f32::from(src.0[i]) / 255.0 * src_a;
        let d = f32::from(dst.0[i]) / 255.0 * dst_a;
        let premultiplied = match state.composite {
            CompositeOp::SourceOver => s + d * (1.0 - src_a),
            CompositeOp::Lighter => (s + d).min(1.0),
        };
        dst.0[i] = ((premultiplied / out_a).clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    dst.0[3] = (out_a * 255.0).round() as u8;
}

impl Surface for RasterSurface {
    fn width(&self) -> u32 {
        self.image.width()
    }

    fn height(&self) -> u32 {
        self.image.height()
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.image = ImageBuffer::new(width, height);
        self.states.reset();
    }

    fn state(&self) -> &DrawState {
        self.states.current()
    }

    fn state_mut(&mut self) -> &mut DrawState {
        self.states.current_mut()
    }

    fn save(&mut self) {
        self.states.save();
    }

    fn restore(&mut self) {
        self.states.restore();
    }

    fn clear(&mut self) {
        for pixel in self.image.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    fn fill_rect(&mut self, rect: Rect, paint: &Paint) {
        let mut coverage = Coverage::new(self.bounds());
        coverage.add_rect(rect);
        self.paint_coverage(&coverage, paint);
    }

    fn stroke_rect(&mut self, rect: Rect, paint: &Paint, line_width: f32) {
        if !(line_width > 0.0) {
            return;
        }
        let corners = [
            Point::new(rect.x, rect.y),
            Point::new(rect.right(), rect.y),
            Point::new(rect.right(), rect.bottom()),
            Point::new(rect.x, rect.bottom()),
        ];
        let mut coverage = Coverage::new(self.bounds());
        coverage.add_stroke(&corners, true, line_width);
        self.paint_coverage(&coverage, paint);
    }

    fn fill_path(&mut self, path: &Path, paint: &Paint) {
        let polygons: Vec<Vec<Point>> = path.flatten().into_iter().map(|(points, _)| points).collect();
        let mut coverage = Coverage::new(self.bounds());
        coverage.add_polygons(&polygons);
        self.paint_coverage(&coverage, paint);
    }

    fn stroke_path(&mut self, path: &Path, paint: &Paint, line_width: f32) {
        if !(line_width > 0.0) {
            return;
        }
        let mut coverage = Coverage::new(self.bounds());
        for (points, closed) in path.flatten() {
            coverage.add_stroke(&points, closed, line_width);
        }
        self.paint_coverage(&coverage, paint);
    }

    fn fill_text(&mut self, text: &str, at: Point, _font_px: f32, _paint: &Paint) {
        log::trace!("text {:?} at ({}, {}) not rasterized", text, at.x, at.y);
    }

    fn composite_self(&mut self) {
        let source = self.image.clone();
        let state = self.states.current().clone();
        let shadow = state.shadow_color.as_deref().and_then(parse_css_color);
        if let Some(Rgba([r, g, b, a])) = shadow.filter(|c| c.0[3] > 0 && state.shadow_blur > 0.0) {
            let tint = RgbaImage::from_fn(source.width(), source.height(), |x, y| {
                let alpha = u16::from(source.get_pixel(x, y).0[3]) * u16::from(a) / 255;
                Rgba([r, g, b, alpha as u8])
            });
            let shadow_layer = imageops::blur(&tint, state.shadow_blur / 2.0);
            self.blend_layer(&shadow_layer);
        }
        self.blend_layer(&source);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(surface: &RasterSurface, x: u32, y: u32) -> [u8; 4] {
        surface.image().get_pixel(x, y).0
    }

    #[test]
    fn canvas_rejects_empty_size() {
        assert!(Canvas { width: 0, height: 10 }.acquire().is_err());
        let surface = Canvas { width: 8, height: 4 }.acquire().unwrap();
        assert_eq!((surface.width(), surface.height()), (8, 4));
    }

    #[test]
    fn fill_rect_covers_pixel_centers() {
        let mut s = RasterSurface::new(10, 10);
        s.fill_rect(Rect::new(2.0, 3.0, 4.0, 2.0), &Paint::solid("#ff0000"));
        assert_eq!(px(&s, 2, 3), [255, 0, 0, 255]);
        assert_eq!(px(&s, 5, 4), [255, 0, 0, 255]);
        assert_eq!(px(&s, 6, 4), [0, 0, 0, 0]);
        assert_eq!(px(&s, 2, 5), [0, 0, 0, 0]);
    }

    #[test]
    fn clip_limits_fill() {
        let mut s = RasterSurface::new(10, 10);
        s.save();
        s.clip_rect(Rect::new(0.0, 0.0, 3.0, 10.0));
        s.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &Paint::solid("white"));
        s.restore();
        assert_eq!(px(&s, 2, 9), [255, 255, 255, 255]);
        assert_eq!(px(&s, 3, 0), [0, 0, 0, 0]);
        assert!(s.state().clip.is_none());
    }

    #[test]
    fn fill_path_closes_polygon() {
        let mut s = RasterSurface::new(10, 10);
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 0.0));
        path.line_to(Point::new(10.0, 0.0));
        path.line_to(Point::new(10.0, 10.0));
        s.fill_path(&path, &Paint::solid("#00ff00"));
        // lower-left triangle stays empty
        assert_eq!(px(&s, 8, 1), [0, 255, 0, 255]);
        assert_eq!(px(&s, 1, 8), [0, 0, 0, 0]);
    }

    #[test]
    fn stroke_path_draws_line_of_given_width() {
        let mut s = RasterSurface::new(20, 10);
        let mut path = Path::new();
        path.move_to(Point::new(0.0, 5.0));
        path.line_to(Point::new(20.0, 5.0));
        s.stroke_path(&path, &Paint::solid("blue"), 2.0);
        assert_eq!(px(&s, 10, 4), [0, 0, 255, 255]);
        assert_eq!(px(&s, 10, 5), [0, 0, 255, 255]);
        assert_eq!(px(&s, 10, 3), [0, 0, 0, 0]);
        assert_eq!(px(&s, 10, 6), [0, 0, 0, 0]);
    }

    #[test]
    fn gradient_fill_varies_horizontally() {
        let mut s = RasterSurface::new(100, 1);
        let mut g = crate::color::LinearGradient::horizontal(100.0);
        g.add_color_stop(0.0, "#000000");
        g.add_color_stop(1.0, "#ffffff");
        s.fill_rect(Rect::new(0.0, 0.0, 100.0, 1.0), &Paint::Gradient(g));
        assert!(px(&s, 0, 0)[0] < 5);
        assert!(px(&s, 99, 0)[0] > 250);
        assert!(px(&s, 30, 0)[0] < px(&s, 60, 0)[0]);
    }

    #[test]
    fn global_alpha_blends_source_over() {
        let mut s = RasterSurface::new(2, 2);
        s.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), &Paint::solid("black"));
        s.state_mut().global_alpha = 0.5;
        s.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), &Paint::solid("white"));
        assert_eq!(px(&s, 0, 0), [128, 128, 128, 255]);
    }

    #[test]
    fn lighter_composite_adds_channels() {
        let mut s = RasterSurface::new(4, 4);
        s.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), &Paint::solid("rgb(100, 50, 0)"));
        s.state_mut().composite = CompositeOp::Lighter;
        s.composite_self();
        assert_eq!(px(&s, 1, 1), [200, 100, 0, 255]);
    }

    #[test]
    fn unparseable_paint_draws_nothing() {
        let mut s = RasterSurface::new(4, 4);
        s.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), &Paint::solid("not-a-color"));
        assert_eq!(px(&s, 1, 1), [0, 0, 0, 0]);
    }

    #[test]
    fn resize_resets_pixels_and_state() {
        let mut s = RasterSurface::new(4, 4);
        s.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), &Paint::solid("white"));
        s.state_mut().global_alpha = 0.2;
        s.resize(6, 3);
        assert_eq!(s.image().dimensions(), (6, 3));
        assert_eq!(px(&s, 0, 0), [0, 0, 0, 0]);
        assert_eq!(s.state().global_alpha, 1.0);
    }
}
