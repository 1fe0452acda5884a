//! Gradient and hue-cycling color resolution, CSS color parsing

use image::Rgba;

use crate::config::{ColorMode, VisualizerOptions};

/// Wrap any hue into [0, 360).
pub fn wrap_hue(hue: f32) -> f32 {
    if !hue.is_finite() {
        return 0.0;
    }
    let wrapped = hue.rem_euclid(360.0);
    // rem_euclid rounds tiny negatives up to exactly 360.0
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

/// Format an HSL color the way the gradient literals are written.
pub fn hsl_string(hue: f32, saturation: f32, lightness: f32) -> String {
    format!("hsl({}, {}%, {}%)", hue, saturation, lightness)
}

/// Rotate the hue of an `hsl(<int>, <int>%, <int>%)` literal.
///
/// Returns `None` when `literal` does not contain such a literal.
pub fn rotate_hsl_literal(literal: &str, shift: f32) -> Option<String> {
    literal.match_indices("hsl(").find_map(|(at, _)| {
        let (h, s, l) = parse_int_hsl(&literal[at + 4..])?;
        Some(hsl_string(wrap_hue(h as f32 + shift), s as f32, l as f32))
    })
}

/// Parses `<int>,\s*<int>%,\s*<int>%)`.
fn parse_int_hsl(rest: &str) -> Option<(u32, u32, u32)> {
    let (hue, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix(',')?.trim_start();
    let (saturation, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix("%,")?.trim_start();
    let (lightness, rest) = take_digits(rest)?;
    rest.strip_prefix("%)")?;
    Some((hue, saturation, lightness))
}

fn take_digits(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((s[..end].parse().ok()?, &s[end..]))
}

/// HSL (degrees, percent, percent) to 8-bit RGB.
pub fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> [u8; 3] {
    let h = wrap_hue(hue) / 360.0;
    let s = (saturation / 100.0).clamp(0.0, 1.0);
    let l = (lightness / 100.0).clamp(0.0, 1.0);
    if s == 0.0 {
        let v = to_byte(l);
        return [v, v, v];
    }
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        to_byte(hue_channel(p, q, h + 1.0 / 3.0)),
        to_byte(hue_channel(p, q, h)),
        to_byte(hue_channel(p, q, h - 1.0 / 3.0)),
    ]
}

fn hue_channel(p: f32, q: f32, t: f32) -> f32 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}

fn to_byte(unit: f32) -> u8 {
    (unit.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Parse a CSS color literal.
///
/// Supports hex (`#rgb`, `#rrggbb`, `#rrggbbaa`), `rgb()`, `rgba()`, `hsl()`,
/// `hsla()` and a handful of named colors.
pub fn parse_css_color(literal: &str) -> Option<Rgba<u8>> {
    let s = literal.trim().to_ascii_lowercase();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex);
    }
    if let Some(args) = function_args(&s, "rgba").or_else(|| function_args(&s, "rgb")) {
        let parts = split_args(args);
        if parts.len() < 3 {
            return None;
        }
        let channel = |p: &str| -> Option<u8> {
            let v = match p.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f32>().ok()? / 100.0 * 255.0,
                None => p.parse::<f32>().ok()?,
            };
            Some(v.clamp(0.0, 255.0).round() as u8)
        };
        let alpha = parse_alpha(parts.get(3).copied())?;
        return Some(Rgba([channel(parts[0])?, channel(parts[1])?, channel(parts[2])?, alpha]));
    }
    if let Some(args) = function_args(&s, "hsla").or_else(|| function_args(&s, "hsl")) {
        let parts = split_args(args);
        if parts.len() < 3 {
            return None;
        }
        let hue = parts[0].trim_end_matches("deg").parse::<f32>().ok()?;
        let saturation = parts[1].trim_end_matches('%').parse::<f32>().ok()?;
        let lightness = parts[2].trim_end_matches('%').parse::<f32>().ok()?;
        let [r, g, b] = hsl_to_rgb(hue, saturation, lightness);
        return Some(Rgba([r, g, b, parse_alpha(parts.get(3).copied())?]));
    }
    let named = match s.as_str() {
        "transparent" => [0, 0, 0, 0],
        "black" => [0, 0, 0, 255],
        "white" => [255, 255, 255, 255],
        "red" => [255, 0, 0, 255],
        "lime" => [0, 255, 0, 255],
        "green" => [0, 128, 0, 255],
        "blue" => [0, 0, 255, 255],
        "yellow" => [255, 255, 0, 255],
        "cyan" | "aqua" => [0, 255, 255, 255],
        "magenta" | "fuchsia" => [255, 0, 255, 255],
        "gray" | "grey" => [128, 128, 128, 255],
        "orange" => [255, 165, 0, 255],
        _ => return None,
    };
    Some(Rgba(named))
}

fn function_args<'a>(s: &'a str, name: &str) -> Option<&'a str> {
    s.strip_prefix(name)?
        .trim_start()
        .strip_prefix('(')?
        .strip_suffix(')')
}

fn split_args(args: &str) -> Vec<&str> {
    args.split(|c: char| c == ',' || c == '/' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_alpha(part: Option<&str>) -> Option<u8> {
    let Some(part) = part else {
        return Some(255);
    };
    let alpha = match part.strip_suffix('%') {
        Some(pct) => pct.parse::<f32>().ok()? / 100.0,
        None => part.parse::<f32>().ok()?,
    };
    Some(to_byte(alpha))
}

fn parse_hex(hex: &str) -> Option<Rgba<u8>> {
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..i + 1], 16).ok().map(|v| v * 17);
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    match hex.len() {
        3 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255])),
        4 => Some(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?])),
        6 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
        8 => Some(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
        _ => None,
    }
}

/// Format a color as a CSS `rgba()` literal.
pub fn css_rgba(color: Rgba<u8>) -> String {
    let Rgba([r, g, b, a]) = color;
    format!("rgba({}, {}, {}, {})", r, g, b, f32::from(a) / 255.0)
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColorStop {
    pub position: f32,
    pub color: String,
}

/// Linear gradient between two points, stops kept in declared order.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearGradient {
    pub from: (f32, f32),
    pub to: (f32, f32),
    pub stops: Vec<ColorStop>,
}

impl LinearGradient {
    pub fn horizontal(width: f32) -> Self {
        Self {
            from: (0.0, 0.0),
            to: (width, 0.0),
            stops: Vec::new(),
        }
    }

    pub fn add_color_stop(&mut self, position: f32, color: impl Into<String>) {
        self.stops.push(ColorStop {
            position,
            color: color.into(),
        });
    }

    /// Parse the stops once for repeated sampling. Unparseable stops are skipped.
    pub fn resolve(&self) -> ResolvedGradient {
        ResolvedGradient {
            from: self.from,
            to: self.to,
            stops: self
                .stops
                .iter()
                .filter_map(|s| Some((s.position.clamp(0.0, 1.0), parse_css_color(&s.color)?)))
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResolvedGradient {
    from: (f32, f32),
    to: (f32, f32),
    stops: Vec<(f32, Rgba<u8>)>,
}

impl ResolvedGradient {
    /// Color at a point, projected onto the gradient axis and clamped to its ends.
    pub fn sample(&self, x: f32, y: f32) -> Rgba<u8> {
        let (first, last) = match (self.stops.first(), self.stops.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Rgba([0, 0, 0, 0]),
        };
        let (dx, dy) = (self.to.0 - self.from.0, self.to.1 - self.from.1);
        let len_sq = dx * dx + dy * dy;
        if len_sq == 0.0 {
            return last.1;
        }
        let t = ((x - self.from.0) * dx + (y - self.from.1) * dy) / len_sq;
        if t <= first.0 {
            return first.1;
        }
        for pair in self.stops.windows(2) {
            let ((p0, c0), (p1, c1)) = (pair[0], pair[1]);
            if t <= p1 {
                let span = p1 - p0;
                let f = if span > 0.0 { ((t - p0) / span).clamp(0.0, 1.0) } else { 1.0 };
                return lerp_color(c0, c1, f);
            }
        }
        last.1
    }
}

fn lerp_color(a: Rgba<u8>, b: Rgba<u8>, t: f32) -> Rgba<u8> {
    let mut out = [0u8; 4];
    for (i, channel) in out.iter_mut().enumerate() {
        let v = f32::from(a.0[i]) + (f32::from(b.0[i]) - f32::from(a.0[i])) * t;
        *channel = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// Fill or stroke style handed to a surface.
#[derive(Clone, Debug, PartialEq)]
pub enum Paint {
    /// CSS color literal.
    Solid(String),
    Gradient(LinearGradient),
}

impl Paint {
    pub fn solid(color: impl Into<String>) -> Self {
        Self::Solid(color.into())
    }
}

/// Resolves colors for one frame from the options and current hue offset.
#[derive(Clone, Copy, Debug)]
pub struct ColorResolver<'a> {
    options: &'a VisualizerOptions,
    hue_offset: f32,
    width: f32,
}

impl<'a> ColorResolver<'a> {
    pub fn new(options: &'a VisualizerOptions, hue_offset: f32, width: f32) -> Self {
        Self {
            options,
            hue_offset,
            width,
        }
    }

    /// Hue rotation currently in effect (zero when animation is off).
    pub fn hue_shift(&self) -> f32 {
        if self.options.hsl_animation.enabled {
            self.hue_offset
        } else {
            0.0
        }
    }

    /// Left-to-right gradient over the surface width built from the stops.
    pub fn gradient(&self) -> LinearGradient {
        let shift = self.hue_shift();
        let mut gradient = LinearGradient::horizontal(self.width);
        for stop in &self.options.gradient.colors {
            let color =
                rotate_hsl_literal(&stop.color, shift).unwrap_or_else(|| stop.color.clone());
            gradient.add_color_stop(stop.position, color);
        }
        gradient
    }

    /// Hue for the element at `index`, always in [0, 360).
    pub fn indexed_hue(&self, index: usize) -> f32 {
        let animation = &self.options.hsl_animation;
        wrap_hue(self.options.hsl_base.hue + self.hue_shift() + index as f32 * animation.hue_step)
    }

    /// HSL color for the element at `index`.
    pub fn indexed(&self, index: usize) -> String {
        let base = &self.options.hsl_base;
        hsl_string(self.indexed_hue(index), base.saturation, base.lightness)
    }

    /// Per-element color honoring the color mode; `x` is the element's horizontal center.
    pub fn element(&self, index: usize, x: f32) -> String {
        match self.options.color_mode {
            ColorMode::Hsl => self.indexed(index),
            ColorMode::Rgb => css_rgba(self.gradient().resolve().sample(x, 0.0)),
        }
    }

    /// Shared gradient when `is_gradient`, otherwise the indexed color.
    pub fn color(&self, index: usize, is_gradient: bool) -> Paint {
        if is_gradient {
            Paint::Gradient(self.gradient())
        } else {
            Paint::Solid(self.indexed(index))
        }
    }
}
