//! Visualizer options, partial updates and TOML loading (serde, toml)

use std::fmt;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::renderer::CustomRenderer;

/// Smallest and largest analysis sizes an analyser node accepts.
pub const MIN_FFT_SIZE: usize = 32;
pub const MAX_FFT_SIZE: usize = 32768;

/// Errors raised while loading options from a file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid options file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Which built-in drawing strategy a frame uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisualizationKind {
    #[default]
    Smooth,
    Bars,
    Custom,
}

impl fmt::Display for VisualizationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Smooth => "smooth",
            Self::Bars => "bars",
            Self::Custom => "custom",
        })
    }
}

/// How per-index colors are derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Per-bar colors are sampled from the static gradient.
    Rgb,
    /// Per-bar colors cycle through hue from `hsl_base`.
    #[default]
    Hsl,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GradientStop {
    /// Position along the surface width (0.0–1.0).
    pub position: f32,
    /// CSS color literal.
    pub color: String,
}

impl GradientStop {
    pub fn new(position: f32, color: impl Into<String>) -> Self {
        Self {
            position,
            color: color.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Gradient {
    pub colors: Vec<GradientStop>,
}

impl Default for Gradient {
    fn default() -> Self {
        Self {
            colors: vec![
                GradientStop::new(0.0, "hsl(0, 80%, 50%)"),
                GradientStop::new(0.2, "hsl(72, 80%, 50%)"),
                GradientStop::new(0.4, "hsl(144, 80%, 50%)"),
                GradientStop::new(0.6, "hsl(216, 80%, 50%)"),
                GradientStop::new(0.8, "hsl(288, 80%, 50%)"),
                GradientStop::new(1.0, "hsl(360, 80%, 50%)"),
            ],
        }
    }
}

/// Fractions of the bin range that get rendered.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct FrequencyRange {
    pub start: f32,
    pub end: f32,
}

impl Default for FrequencyRange {
    fn default() -> Self {
        Self { start: 0.0, end: 0.7 }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct HslBase {
    /// Degrees (0–360).
    pub hue: f32,
    /// Percent (0–100).
    pub saturation: f32,
    /// Percent (0–100).
    pub lightness: f32,
}

impl Default for HslBase {
    fn default() -> Self {
        Self {
            hue: 0.0,
            saturation: 80.0,
            lightness: 50.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HslAnimation {
    pub enabled: bool,
    /// Hue added per bar/point index (degrees).
    pub hue_step: f32,
    /// Hue rotation speed (degrees per second).
    pub speed: f32,
}

impl Default for HslAnimation {
    fn default() -> Self {
        Self {
            enabled: true,
            hue_step: 10.0,
            speed: 30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct GlowEffect {
    pub enabled: bool,
    pub color: String,
    /// Shadow blur radius (pixels).
    pub blur: f32,
    /// Alpha used when compositing the surface onto itself (0.0–1.0).
    pub intensity: f32,
}

impl Default for GlowEffect {
    fn default() -> Self {
        Self {
            enabled: false,
            color: "rgba(255, 255, 255, 0.7)".to_string(),
            blur: 15.0,
            intensity: 0.5,
        }
    }
}

/// Complete visualizer configuration. Every field has a default.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VisualizerOptions {
    /// Analysis resolution (power of two); the source exposes half as many bins.
    pub fft_size: usize,
    /// Temporal smoothing of the analysis node (0.0–1.0).
    pub smoothing_time_constant: f32,
    pub show_fill: bool,
    pub show_line: bool,
    pub line_width: f32,
    /// Explicit stroke color; `None` derives it from the gradient.
    pub line_color: Option<String>,
    /// Explicit fill color, available to custom renderers.
    pub fill_color: Option<String>,
    pub visualization_type: VisualizationKind,
    pub bar_width: f32,
    pub bar_spacing: f32,
    pub gradient: Gradient,
    pub frequency_range: FrequencyRange,
    /// Multiplier applied to raw magnitudes before clamping to 255.
    pub amplification: f32,
    /// Percentage of the surface height the tallest bar may use.
    pub max_height: f32,
    pub color_mode: ColorMode,
    pub hsl_base: HslBase,
    pub hsl_animation: HslAnimation,
    pub glow_effect: GlowEffect,
    /// Painted after each clear; `None` leaves the surface transparent.
    pub background_color: Option<String>,
}

impl Default for VisualizerOptions {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing_time_constant: 0.85,
            show_fill: true,
            show_line: true,
            line_width: 2.0,
            line_color: None,
            fill_color: None,
            visualization_type: VisualizationKind::Smooth,
            bar_width: 4.0,
            bar_spacing: 1.0,
            gradient: Gradient::default(),
            frequency_range: FrequencyRange::default(),
            amplification: 1.2,
            max_height: 100.0,
            color_mode: ColorMode::Hsl,
            hsl_base: HslBase::default(),
            hsl_animation: HslAnimation::default(),
            glow_effect: GlowEffect::default(),
            background_color: None,
        }
    }
}

impl VisualizerOptions {
    /// Defaults with `patch` merged on top.
    pub fn with_patch(patch: &OptionsPatch) -> Self {
        let mut options = Self::default();
        options.apply(patch);
        options
    }

    /// Merge `patch` field by field, then bring values back into range.
    pub fn apply(&mut self, patch: &OptionsPatch) {
        set(&mut self.fft_size, patch.fft_size);
        set(&mut self.smoothing_time_constant, patch.smoothing_time_constant);
        set(&mut self.show_fill, patch.show_fill);
        set(&mut self.show_line, patch.show_line);
        set(&mut self.line_width, patch.line_width);
        if let Some(color) = &patch.line_color {
            self.line_color = color.clone();
        }
        if let Some(color) = &patch.fill_color {
            self.fill_color = color.clone();
        }
        set(&mut self.visualization_type, patch.visualization_type);
        set(&mut self.bar_width, patch.bar_width);
        set(&mut self.bar_spacing, patch.bar_spacing);
        if let Some(gradient) = &patch.gradient {
            self.gradient = gradient.clone();
        }
        if let Some(range) = &patch.frequency_range {
            set(&mut self.frequency_range.start, range.start);
            set(&mut self.frequency_range.end, range.end);
        }
        set(&mut self.amplification, patch.amplification);
        set(&mut self.max_height, patch.max_height);
        set(&mut self.color_mode, patch.color_mode);
        if let Some(base) = &patch.hsl_base {
            set(&mut self.hsl_base.hue, base.hue);
            set(&mut self.hsl_base.saturation, base.saturation);
            set(&mut self.hsl_base.lightness, base.lightness);
        }
        if let Some(animation) = &patch.hsl_animation {
            set(&mut self.hsl_animation.enabled, animation.enabled);
            set(&mut self.hsl_animation.hue_step, animation.hue_step);
            set(&mut self.hsl_animation.speed, animation.speed);
        }
        if let Some(glow) = &patch.glow_effect {
            set(&mut self.glow_effect.enabled, glow.enabled);
            if let Some(color) = &glow.color {
                self.glow_effect.color = color.clone();
            }
            set(&mut self.glow_effect.blur, glow.blur);
            set(&mut self.glow_effect.intensity, glow.intensity);
        }
        if let Some(color) = &patch.background_color {
            self.background_color = color.clone();
        }
        self.normalize();
    }

    /// Clamp out-of-range values so every frame can be drawn.
    fn normalize(&mut self) {
        let fft_size = self
            .fft_size
            .clamp(MIN_FFT_SIZE, MAX_FFT_SIZE)
            .next_power_of_two();
        if fft_size != self.fft_size {
            log::warn!("fftSize {} adjusted to {}", self.fft_size, fft_size);
            self.fft_size = fft_size;
        }
        self.smoothing_time_constant = clamp_unit(self.smoothing_time_constant);
        self.glow_effect.intensity = clamp_unit(self.glow_effect.intensity);

        let range = &mut self.frequency_range;
        range.start = clamp_unit(range.start);
        range.end = clamp_unit(range.end);
        if range.start > range.end {
            log::warn!(
                "frequencyRange start {} exceeds end {}, swapping",
                range.start,
                range.end
            );
            std::mem::swap(&mut range.start, &mut range.end);
        }

        if !(self.amplification.is_finite() && self.amplification >= 0.0) {
            log::warn!("amplification {} reset to 0", self.amplification);
            self.amplification = 0.0;
        }
        if !self.hsl_animation.speed.is_finite() {
            log::warn!("hslAnimation speed {} reset to 0", self.hsl_animation.speed);
            self.hsl_animation.speed = 0.0;
        }
        if !(self.max_height > 0.0 && self.max_height <= 100.0) {
            let clamped = if self.max_height > 100.0 { 100.0 } else { 1.0 };
            log::warn!("maxHeight {} clamped to {}", self.max_height, clamped);
            self.max_height = clamped;
        }
        self.line_width = non_negative("lineWidth", self.line_width);
        self.bar_width = non_negative("barWidth", self.bar_width);
        self.bar_spacing = non_negative("barSpacing", self.bar_spacing);
        self.glow_effect.blur = non_negative("glowEffect blur", self.glow_effect.blur);

        let stops = &self.gradient.colors;
        if stops.windows(2).any(|w| w[1].position < w[0].position) {
            log::warn!("gradient stop positions are not in ascending order");
        }
    }
}

fn set<T: Copy>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Finite and at least zero; anything else becomes zero.
fn non_negative(name: &str, value: f32) -> f32 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        log::warn!("{} {} reset to 0", name, value);
        0.0
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

/// Deserializes a present key as `Some(value)`, so `Option<Option<T>>` can tell
/// "missing" from "explicitly cleared".
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrequencyRangePatch {
    pub start: Option<f32>,
    pub end: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HslBasePatch {
    pub hue: Option<f32>,
    pub saturation: Option<f32>,
    pub lightness: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HslAnimationPatch {
    pub enabled: Option<bool>,
    pub hue_step: Option<f32>,
    pub speed: Option<f32>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlowEffectPatch {
    pub enabled: Option<bool>,
    pub color: Option<String>,
    pub blur: Option<f32>,
    pub intensity: Option<f32>,
}

/// Partial options; `None` leaves the current value untouched.
///
/// Nested groups merge key by key, `gradient` replaces the whole stop list.
/// Nullable colors use `Some(None)` to clear an explicit value.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OptionsPatch {
    pub fft_size: Option<usize>,
    pub smoothing_time_constant: Option<f32>,
    pub show_fill: Option<bool>,
    pub show_line: Option<bool>,
    pub line_width: Option<f32>,
    #[serde(default, deserialize_with = "present")]
    pub line_color: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub fill_color: Option<Option<String>>,
    pub visualization_type: Option<VisualizationKind>,
    pub bar_width: Option<f32>,
    pub bar_spacing: Option<f32>,
    pub gradient: Option<Gradient>,
    pub frequency_range: Option<FrequencyRangePatch>,
    pub amplification: Option<f32>,
    pub max_height: Option<f32>,
    pub color_mode: Option<ColorMode>,
    pub hsl_base: Option<HslBasePatch>,
    pub hsl_animation: Option<HslAnimationPatch>,
    pub glow_effect: Option<GlowEffectPatch>,
    #[serde(default, deserialize_with = "present")]
    pub background_color: Option<Option<String>>,
    /// Strategy used when the visualization kind is `Custom`.
    #[serde(skip)]
    pub custom_renderer: Option<Rc<dyn CustomRenderer>>,
}

impl fmt::Debug for OptionsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsPatch")
            .field("fft_size", &self.fft_size)
            .field("smoothing_time_constant", &self.smoothing_time_constant)
            .field("visualization_type", &self.visualization_type)
            .field("amplification", &self.amplification)
            .field("custom_renderer", &self.custom_renderer.is_some())
            .finish_non_exhaustive()
    }
}

impl OptionsPatch {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read a patch from a TOML file using the option names of the schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Whether the patch changes analysis resolution or smoothing.
    pub fn touches_analysis(&self) -> bool {
        self.fft_size.is_some() || self.smoothing_time_constant.is_some()
    }
}
