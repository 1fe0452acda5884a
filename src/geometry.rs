//! Magnitude windowing and mapping to curve points, bar rectangles and paths

use crate::config::FrequencyRange;

/// Largest value a magnitude bin can hold.
pub const MAX_MAGNITUDE: f32 = 255.0;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn midpoint(self, other: Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// Overlap of two rectangles; empty (zero-sized) when they are disjoint.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
    }
}

/// Contiguous range of bins selected for rendering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrequencyWindow {
    pub start: usize,
    pub end: usize,
}

impl FrequencyWindow {
    /// `[floor(count * start), floor(count * end))`, kept inside `0..=count`.
    pub fn from_range(count: usize, range: &FrequencyRange) -> Self {
        let bound = |fraction: f32| {
            let index = (count as f64 * f64::from(fraction)).floor();
            if index.is_nan() || index < 0.0 {
                0
            } else {
                (index as usize).min(count)
            }
        };
        let start = bound(range.start);
        let end = bound(range.end).max(start);
        Self { start, end }
    }

    /// Number of usable bins.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pixel budget for the tallest element: `max_height` percent of the surface height.
pub fn max_height_px(surface_height: f32, max_height_percent: f32) -> f32 {
    surface_height * max_height_percent / 100.0
}

/// Maps magnitudes to pixel heights on a surface of a given size.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mapping {
    pub width: f32,
    pub height: f32,
    pub max_height_px: f32,
    pub amplification: f32,
}

impl Mapping {
    /// `min(raw * amplification, 255) / 255 * max_height_px`.
    ///
    /// Amplifying before the clamp only compresses the top of the range.
    pub fn bar_height(&self, raw: u8) -> f32 {
        let value = (f32::from(raw) * self.amplification).clamp(0.0, MAX_MAGNITUDE);
        value / MAX_MAGNITUDE * self.max_height_px
    }

    fn height_at(&self, snapshot: &[u8], index: usize) -> f32 {
        snapshot.get(index).map_or(0.0, |&raw| self.bar_height(raw))
    }

    /// One point per usable bin plus a right-edge point repeating the last height.
    ///
    /// Fewer than two bins produce a flat segment across the surface.
    pub fn curve_points(&self, snapshot: &[u8], window: FrequencyWindow) -> Vec<Point> {
        let usable = window.len();
        if usable < 2 {
            let h = if usable == 1 {
                self.height_at(snapshot, window.start)
            } else {
                0.0
            };
            let y = self.height - h;
            // the boundary point lets the smoothed curve end at the right edge
            return vec![Point::new(0.0, y), Point::new(self.width, y), Point::new(self.width, y)];
        }

        let step = self.width / (usable - 1) as f32;
        let mut points: Vec<Point> = (0..usable)
            .map(|i| {
                let h = self.height_at(snapshot, window.start + i);
                Point::new(i as f32 * step, self.height - h)
            })
            .collect();
        let last = self.height_at(snapshot, window.end - 1);
        points.push(Point::new(self.width, self.height - last));
        points
    }

    /// Bar rectangles, one per slot, anchored to the bottom of the surface.
    pub fn bar_rects(
        &self,
        snapshot: &[u8],
        window: FrequencyWindow,
        bar_width: f32,
        bar_spacing: f32,
    ) -> Vec<Rect> {
        let slots = slot_count(self.width, bar_width, bar_spacing);
        let stride = bar_width + bar_spacing;
        let usable = window.len();
        (0..slots)
            .map(|slot| {
                let h = if usable == 0 {
                    0.0
                } else {
                    let offset = (slot as f64 / slots as f64 * usable as f64).floor() as usize;
                    self.height_at(snapshot, window.start + offset)
                };
                Rect::new(slot as f32 * stride, self.height - h, bar_width, h)
            })
            .collect()
    }
}

/// `floor(width / (bar_width + bar_spacing))`, zero for a non-positive stride.
pub fn slot_count(width: f32, bar_width: f32, bar_spacing: f32) -> usize {
    let stride = bar_width + bar_spacing;
    if !(stride > 0.0) || !(width > 0.0) {
        return 0;
    }
    (width / stride).floor() as usize
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathOp {
    MoveTo(Point),
    LineTo(Point),
    QuadTo { control: Point, to: Point },
    Close,
}

/// A vector path made of lines and quadratic curves.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Path {
    ops: Vec<PathOp>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn move_to(&mut self, to: Point) {
        self.ops.push(PathOp::MoveTo(to));
    }

    pub fn line_to(&mut self, to: Point) {
        self.ops.push(PathOp::LineTo(to));
    }

    pub fn quad_to(&mut self, control: Point, to: Point) {
        self.ops.push(PathOp::QuadTo { control, to });
    }

    pub fn close(&mut self) {
        self.ops.push(PathOp::Close);
    }

    pub fn ops(&self) -> &[PathOp] {
        &self.ops
    }

    /// Smoothed curve through `points`: each segment uses the previous raw point as
    /// control and ends at the midpoint between consecutive points.
    pub fn smooth_curve(points: &[Point]) -> Self {
        let mut path = Self::new();
        let Some(&first) = points.first() else {
            return path;
        };
        path.move_to(first);
        for pair in points.windows(2) {
            path.quad_to(pair[0], pair[0].midpoint(pair[1]));
        }
        path
    }

    /// Approximate the path with polylines, one per subpath, plus a closed flag each.
    pub fn flatten(&self) -> Vec<(Vec<Point>, bool)> {
        let mut subpaths = Vec::new();
        let mut current: Vec<Point> = Vec::new();
        let mut start = Point::default();
        for op in &self.ops {
            match *op {
                PathOp::MoveTo(p) => {
                    if current.len() > 1 {
                        subpaths.push((std::mem::take(&mut current), false));
                    }
                    current.clear();
                    current.push(p);
                    start = p;
                }
                PathOp::LineTo(p) => {
                    if current.is_empty() {
                        current.push(start);
                    }
                    current.push(p);
                }
                PathOp::QuadTo { control, to } => {
                    let from = *current.last().unwrap_or(&start);
                    if current.is_empty() {
                        current.push(from);
                    }
                    let estimate = from.distance(control) + control.distance(to);
                    let segments = ((estimate / 4.0).ceil() as usize).clamp(1, 32);
                    for i in 1..=segments {
                        let t = i as f32 / segments as f32;
                        let u = 1.0 - t;
                        current.push(Point::new(
                            u * u * from.x + 2.0 * u * t * control.x + t * t * to.x,
                            u * u * from.y + 2.0 * u * t * control.y + t * t * to.y,
                        ));
                    }
                }
                PathOp::Close => {
                    if current.len() > 1 {
                        subpaths.push((std::mem::take(&mut current), true));
                    }
                    current.push(start);
                }
            }
        }
        if current.len() > 1 {
            subpaths.push((current, false));
        }
        subpaths
    }
}
