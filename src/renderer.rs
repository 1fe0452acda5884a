//! Per-tick drawing: animation clock, strategy dispatch and the glow pass

use crate::color::{ColorResolver, Paint, wrap_hue};
use crate::config::{GlowEffect, VisualizationKind, VisualizerOptions};
use crate::geometry::{FrequencyWindow, Mapping, Path, Point, Rect, max_height_px};
use crate::source::FrequencySource;
use crate::surface::{CompositeOp, Scoped, Surface};

/// Message painted while no source is bound.
pub const PLACEHOLDER_TEXT: &str = "not connected";
const PLACEHOLDER_OVERLAY: &str = "rgba(0, 0, 0, 0.5)";
const PLACEHOLDER_FONT_PX: f32 = 16.0;
const BAR_OUTLINE_WIDTH: f32 = 1.0;

/// Hue phase and the clock reading it was last advanced at.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AnimationState {
    /// Degrees, always in [0, 360).
    pub hue_offset: f32,
    /// `None` until the first tick after construction or a restart.
    pub last_timestamp_ms: Option<f64>,
}

impl AnimationState {
    /// Advance the hue by `speed` degrees per second of elapsed clock time.
    ///
    /// The first reading after a reset contributes no delta.
    pub fn advance(&mut self, timestamp_ms: f64, speed: f32) {
        let delta_secs = self
            .last_timestamp_ms
            .map_or(0.0, |last| ((timestamp_ms - last) / 1000.0).max(0.0));
        self.hue_offset = wrap_hue(self.hue_offset + speed * delta_secs as f32);
        self.last_timestamp_ms = Some(timestamp_ms);
    }

    /// Forget the previous timestamp so the next tick starts from zero delta.
    pub fn reset_clock(&mut self) {
        self.last_timestamp_ms = None;
    }
}

/// What a custom strategy receives besides the surface and the raw snapshot.
pub struct CustomFrame<'a> {
    pub window: FrequencyWindow,
    pub max_height_px: f32,
    pub options: &'a VisualizerOptions,
    /// Color lookup bound to this frame's hue offset and surface width.
    pub colors: ColorResolver<'a>,
}

/// Caller-supplied drawing strategy for [`VisualizationKind::Custom`].
pub trait CustomRenderer {
    fn render(&self, surface: &mut dyn Surface, snapshot: &[u8], frame: &CustomFrame<'_>);
}

impl<F> CustomRenderer for F
where
    F: Fn(&mut dyn Surface, &[u8], &CustomFrame<'_>),
{
    fn render(&self, surface: &mut dyn Surface, snapshot: &[u8], frame: &CustomFrame<'_>) {
        self(surface, snapshot, frame)
    }
}

/// The drawing strategy chosen for one tick.
#[derive(Clone, Copy)]
pub enum Strategy<'a> {
    SmoothCurve,
    BarChart,
    Custom(&'a dyn CustomRenderer),
}

impl<'a> Strategy<'a> {
    /// `None` when the kind is custom but no renderer is installed.
    pub fn select(kind: VisualizationKind, custom: Option<&'a dyn CustomRenderer>) -> Option<Self> {
        match kind {
            VisualizationKind::Smooth => Some(Self::SmoothCurve),
            VisualizationKind::Bars => Some(Self::BarChart),
            VisualizationKind::Custom => custom.map(Self::Custom),
        }
    }
}

/// Result of one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// No source was bound; only the placeholder was painted.
    Placeholder,
    Rendered {
        window: FrequencyWindow,
        max_height_px: f32,
        /// Tallest mapped height inside the window.
        peak_px: f32,
    },
}

/// Draws frames and owns the animation state between them.
#[derive(Debug, Default)]
pub struct FrameRenderer {
    animation: AnimationState,
    snapshot: Vec<u8>,
}

impl FrameRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn animation(&self) -> &AnimationState {
        &self.animation
    }

    pub fn animation_mut(&mut self) -> &mut AnimationState {
        &mut self.animation
    }

    /// Magnitudes read on the last rendered tick.
    pub fn snapshot(&self) -> &[u8] {
        &self.snapshot
    }

    /// Run one tick against `surface`.
    pub fn render_tick(
        &mut self,
        surface: &mut dyn Surface,
        source: Option<&mut dyn FrequencySource>,
        options: &VisualizerOptions,
        custom: Option<&dyn CustomRenderer>,
        timestamp_ms: f64,
    ) -> TickOutcome {
        let Some(source) = source else {
            draw_placeholder(surface);
            return TickOutcome::Placeholder;
        };

        let animation = &options.hsl_animation;
        let speed = if animation.enabled { animation.speed } else { 0.0 };
        self.animation.advance(timestamp_ms, speed);

        let count = source.sample_count();
        self.snapshot.resize(count, 0);
        source.read_magnitudes(&mut self.snapshot);

        surface.clear();
        let width = surface.width() as f32;
        let height = surface.height() as f32;
        if let Some(background) = &options.background_color {
            surface.fill_rect(Rect::new(0.0, 0.0, width, height), &Paint::solid(background.as_str()));
        }

        let window = FrequencyWindow::from_range(count, &options.frequency_range);
        let mapping = Mapping {
            width,
            height,
            max_height_px: max_height_px(height, options.max_height),
            amplification: options.amplification,
        };
        let colors = ColorResolver::new(options, self.animation.hue_offset, width);

        match Strategy::select(options.visualization_type, custom) {
            Some(Strategy::SmoothCurve) => {
                draw_smooth(surface, &mapping, &self.snapshot, window, options, &colors)
            }
            Some(Strategy::BarChart) => {
                draw_bars(surface, &mapping, &self.snapshot, window, options, &colors)
            }
            Some(Strategy::Custom(renderer)) => {
                let frame = CustomFrame {
                    window,
                    max_height_px: mapping.max_height_px,
                    options,
                    colors,
                };
                renderer.render(surface, &self.snapshot, &frame);
            }
            None => log::trace!("custom visualization selected without a renderer"),
        }

        if options.glow_effect.enabled {
            apply_glow(surface, &options.glow_effect);
        }

        let peak_px = self
            .snapshot
            .get(window.start..window.end)
            .unwrap_or(&[])
            .iter()
            .map(|&raw| mapping.bar_height(raw))
            .fold(0.0, f32::max);
        TickOutcome::Rendered {
            window,
            max_height_px: mapping.max_height_px,
            peak_px,
        }
    }
}

fn draw_placeholder(surface: &mut dyn Surface) {
    let width = surface.width() as f32;
    let height = surface.height() as f32;
    surface.clear();
    surface.fill_rect(Rect::new(0.0, 0.0, width, height), &Paint::solid(PLACEHOLDER_OVERLAY));
    surface.fill_text(
        PLACEHOLDER_TEXT,
        Point::new(width / 2.0, height / 2.0),
        PLACEHOLDER_FONT_PX,
        &Paint::solid("white"),
    );
}

fn line_paint(options: &VisualizerOptions, fallback: impl FnOnce() -> Paint) -> Paint {
    match &options.line_color {
        Some(color) => Paint::solid(color.as_str()),
        None => fallback(),
    }
}

fn draw_smooth(
    surface: &mut dyn Surface,
    mapping: &Mapping,
    snapshot: &[u8],
    window: FrequencyWindow,
    options: &VisualizerOptions,
    colors: &ColorResolver<'_>,
) {
    let points = mapping.curve_points(snapshot, window);
    let curve = Path::smooth_curve(&points);

    if options.show_fill {
        let mut area = curve.clone();
        area.line_to(Point::new(mapping.width, mapping.height));
        area.line_to(Point::new(0.0, mapping.height));
        area.close();
        surface.fill_path(&area, &colors.color(0, true));
    }

    if options.show_line {
        let paint = line_paint(options, || colors.color(0, true));
        surface.stroke_path(&curve, &paint, options.line_width);
    }
}

fn draw_bars(
    surface: &mut dyn Surface,
    mapping: &Mapping,
    snapshot: &[u8],
    window: FrequencyWindow,
    options: &VisualizerOptions,
    colors: &ColorResolver<'_>,
) {
    let bars = mapping.bar_rects(snapshot, window, options.bar_width, options.bar_spacing);
    let fill = colors.color(0, true);

    for (index, bar) in bars.iter().enumerate() {
        if options.show_fill {
            // one surface-wide gradient, clipped to the bar
            let mut scoped = Scoped::new(&mut *surface);
            scoped.clip_rect(*bar);
            scoped.fill_rect(Rect::new(0.0, bar.y, mapping.width, bar.height), &fill);
        }
        if options.show_line {
            let paint = line_paint(options, || {
                Paint::Solid(colors.element(index, bar.x + bar.width / 2.0))
            });
            surface.stroke_rect(*bar, &paint, BAR_OUTLINE_WIDTH);
        }
    }
}

fn apply_glow(surface: &mut dyn Surface, glow: &GlowEffect) {
    let mut scoped = Scoped::new(surface);
    let state = scoped.state_mut();
    state.shadow_color = Some(glow.color.clone());
    state.shadow_blur = glow.blur;
    state.global_alpha = glow.intensity;
    state.composite = CompositeOp::Lighter;
    scoped.composite_self();
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::OptionsPatch;
    use crate::geometry::PathOp;
    use crate::source::testing::MockSource;
    use crate::source::AnalysisParams;
    use crate::surface::{DrawCommand, DrawState, Recorder};

    fn connected(magnitude: u8, fft_size: usize) -> MockSource {
        let mut source = MockSource::new(magnitude);
        source.connect(AnalysisParams {
            fft_size,
            smoothing: 0.0,
        });
        source
    }

    fn options(patch: OptionsPatch) -> VisualizerOptions {
        VisualizerOptions::with_patch(&patch)
    }

    fn tick(
        renderer: &mut FrameRenderer,
        surface: &mut Recorder,
        source: &mut MockSource,
        options: &VisualizerOptions,
        timestamp_ms: f64,
    ) -> TickOutcome {
        renderer.render_tick(surface, Some(source), options, None, timestamp_ms)
    }

    fn lowest_y(path: &Path) -> f32 {
        path.ops()
            .iter()
            .filter_map(|op| match *op {
                PathOp::MoveTo(p) | PathOp::LineTo(p) => Some(p.y),
                PathOp::QuadTo { to, .. } => Some(to.y),
                PathOp::Close => None,
            })
            .fold(f32::INFINITY, f32::min)
    }

    #[test]
    fn first_tick_applies_zero_delta() {
        let mut state = AnimationState::default();
        state.advance(5000.0, 30.0);
        assert_eq!(state.hue_offset, 0.0);
        state.advance(6000.0, 30.0);
        assert!((state.hue_offset - 30.0).abs() < 1e-4);
        state.advance(18000.0, 30.0);
        assert!((state.hue_offset - 30.0).abs() < 1e-3);
    }

    #[test]
    fn reset_clock_avoids_a_jump() {
        let mut state = AnimationState::default();
        state.advance(0.0, 90.0);
        state.advance(1000.0, 90.0);
        state.reset_clock();
        state.advance(60_000.0, 90.0);
        assert!((state.hue_offset - 90.0).abs() < 1e-4);
    }

    #[test]
    fn unbound_tick_paints_placeholder() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(200, 100);
        let outcome = renderer.render_tick(&mut surface, None, &VisualizerOptions::default(), None, 16.0);
        assert_eq!(outcome, TickOutcome::Placeholder);

        let commands = surface.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], DrawCommand::Clear);
        assert!(matches!(
            &commands[1],
            DrawCommand::FillRect { paint: Paint::Solid(c), .. } if c == PLACEHOLDER_OVERLAY
        ));
        match &commands[2] {
            DrawCommand::FillText { text, at, font_px, .. } => {
                assert_eq!(text, PLACEHOLDER_TEXT);
                assert_eq!(*at, Point::new(100.0, 50.0));
                assert_eq!(*font_px, 16.0);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(renderer.animation().last_timestamp_ms, None);
    }

    #[test]
    fn smooth_curve_fills_then_strokes_with_gradient() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(400, 200);
        let mut source = connected(128, 256);
        let options = VisualizerOptions::default();

        let outcome = tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        let TickOutcome::Rendered { window, max_height_px, .. } = outcome else {
            panic!("expected a rendered frame");
        };
        assert_eq!(window, FrequencyWindow { start: 0, end: 89 });
        assert_eq!(max_height_px, 200.0);

        let commands = surface.commands();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], DrawCommand::Clear);
        match &commands[1] {
            DrawCommand::FillPath { path, paint, .. } => {
                assert!(matches!(paint, Paint::Gradient(_)));
                assert_eq!(path.ops().last(), Some(&PathOp::Close));
            }
            other => panic!("unexpected command {:?}", other),
        }
        match &commands[2] {
            DrawCommand::StrokePath { path, paint, line_width, .. } => {
                assert!(matches!(paint, Paint::Gradient(_)));
                assert_eq!(*line_width, 2.0);
                assert_ne!(path.ops().last(), Some(&PathOp::Close));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn explicit_line_color_overrides_gradient() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(100, 50);
        let mut source = connected(10, 64);
        let options = options(OptionsPatch {
            show_fill: Some(false),
            line_color: Some(Some("#ff0000".into())),
            ..Default::default()
        });
        tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        let commands = surface.commands();
        assert_eq!(commands.len(), 2);
        assert!(matches!(
            &commands[1],
            DrawCommand::StrokePath { paint: Paint::Solid(c), .. } if c == "#ff0000"
        ));
    }

    #[test]
    fn full_scale_snapshot_reaches_max_height_every_tick() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(300, 120);
        let mut source = connected(255, 256);
        let options = options(OptionsPatch {
            amplification: Some(1.0),
            max_height: Some(50.0),
            ..Default::default()
        });

        for i in 0..10 {
            surface.take_commands();
            let outcome = tick(&mut renderer, &mut surface, &mut source, &options, i as f64 * 16.0);
            assert_eq!(
                outcome,
                TickOutcome::Rendered {
                    window: FrequencyWindow { start: 0, end: 89 },
                    max_height_px: 60.0,
                    peak_px: 60.0,
                }
            );
            let stroke = surface.commands().iter().find_map(|c| match c {
                DrawCommand::StrokePath { path, .. } => Some(path.clone()),
                _ => None,
            });
            let stroke = stroke.expect("curve stroked");
            assert_eq!(lowest_y(&stroke), 120.0 - 60.0);
        }
        assert_eq!(source.state().reads, 10);
    }

    #[test]
    fn single_bin_window_strokes_across_the_whole_surface() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(400, 100);
        let mut source = connected(20, 64);
        let options = options(OptionsPatch {
            frequency_range: Some(crate::config::FrequencyRangePatch {
                end: Some(0.04),
                ..Default::default()
            }),
            ..Default::default()
        });
        let outcome = tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        assert!(matches!(
            outcome,
            TickOutcome::Rendered { window, .. } if window == FrequencyWindow { start: 0, end: 1 }
        ));

        let stroke = surface
            .commands()
            .iter()
            .find_map(|c| match c {
                DrawCommand::StrokePath { path, .. } => Some(path.clone()),
                _ => None,
            })
            .expect("curve stroked");
        let end = match stroke.ops().last() {
            Some(PathOp::QuadTo { to, .. }) => *to,
            other => panic!("unexpected path end {:?}", other),
        };
        assert_eq!(end.x, 400.0);
        assert_eq!(lowest_y(&stroke), end.y);
    }

    #[test]
    fn bars_clip_a_shared_gradient_and_outline_each_slot() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(20, 100);
        let mut source = connected(255, 64);
        let options = options(OptionsPatch {
            visualization_type: Some(VisualizationKind::Bars),
            amplification: Some(1.0),
            hsl_animation: Some(crate::config::HslAnimationPatch {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });

        let outcome = tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        assert!(matches!(outcome, TickOutcome::Rendered { peak_px, .. } if peak_px == 100.0));
        assert_eq!(surface.save_depth(), 0);

        let fills: Vec<_> = surface
            .commands()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::FillRect { rect, paint, state } => Some((rect, paint, state)),
                _ => None,
            })
            .collect();
        assert_eq!(fills.len(), 4);
        let first_gradient = fills[0].1.clone();
        for (slot, (rect, paint, state)) in fills.iter().enumerate() {
            assert_eq!(**rect, Rect::new(0.0, 0.0, 20.0, 100.0));
            assert_eq!(**paint, first_gradient);
            assert_eq!(state.clip, Some(Rect::new(slot as f32 * 5.0, 0.0, 4.0, 100.0)));
        }

        let strokes: Vec<_> = surface
            .commands()
            .iter()
            .filter_map(|c| match c {
                DrawCommand::StrokeRect { paint, line_width, state, .. } => {
                    Some((paint.clone(), *line_width, state.clip))
                }
                _ => None,
            })
            .collect();
        assert_eq!(strokes.len(), 4);
        assert_eq!(strokes[0], (Paint::solid("hsl(0, 80%, 50%)"), 1.0, None));
        assert_eq!(strokes[1].0, Paint::solid("hsl(10, 80%, 50%)"));
    }

    #[test]
    fn glow_composites_additively_and_restores_state() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(50, 50);
        let mut source = connected(100, 64);
        let options = options(OptionsPatch {
            glow_effect: Some(crate::config::GlowEffectPatch {
                enabled: Some(true),
                intensity: Some(0.4),
                ..Default::default()
            }),
            ..Default::default()
        });
        tick(&mut renderer, &mut surface, &mut source, &options, 0.0);

        match surface.commands().last() {
            Some(DrawCommand::CompositeSelf { state }) => {
                assert_eq!(state.composite, CompositeOp::Lighter);
                assert_eq!(state.global_alpha, 0.4);
                assert_eq!(state.shadow_blur, 15.0);
                assert_eq!(state.shadow_color.as_deref(), Some("rgba(255, 255, 255, 0.7)"));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(surface.state(), &DrawState::default());
        assert_eq!(surface.save_depth(), 0);
    }

    #[test]
    fn custom_strategy_takes_over_drawing() {
        let calls = Cell::new(0);
        let renderer_fn = |surface: &mut dyn Surface, snapshot: &[u8], frame: &CustomFrame<'_>| {
            calls.set(calls.get() + 1);
            assert_eq!(snapshot.len(), 32);
            assert_eq!(frame.window, FrequencyWindow { start: 0, end: 22 });
            assert_eq!(frame.max_height_px, 40.0);
            assert_eq!(frame.colors.indexed(1), "hsl(10, 80%, 50%)");
            surface.fill_rect(Rect::new(0.0, 0.0, 1.0, 1.0), &Paint::solid("red"));
        };

        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(80, 40);
        let mut source = connected(1, 64);
        let options = options(OptionsPatch {
            visualization_type: Some(VisualizationKind::Custom),
            ..Default::default()
        });
        renderer.render_tick(&mut surface, Some(&mut source), &options, Some(&renderer_fn), 0.0);

        assert_eq!(calls.get(), 1);
        assert_eq!(surface.commands().len(), 2);
        assert_eq!(surface.commands()[0], DrawCommand::Clear);
    }

    #[test]
    fn custom_kind_without_renderer_only_clears() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(80, 40);
        let mut source = connected(1, 64);
        let options = options(OptionsPatch {
            visualization_type: Some(VisualizationKind::Custom),
            ..Default::default()
        });
        tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        assert_eq!(surface.commands(), &[DrawCommand::Clear]);
    }

    #[test]
    fn background_is_painted_after_clear() {
        let mut renderer = FrameRenderer::new();
        let mut surface = Recorder::new(80, 40);
        let mut source = connected(1, 64);
        let options = options(OptionsPatch {
            background_color: Some(Some("#000000".into())),
            show_fill: Some(false),
            show_line: Some(false),
            ..Default::default()
        });
        tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        assert_eq!(surface.commands().len(), 2);
        assert!(matches!(
            &surface.commands()[1],
            DrawCommand::FillRect { rect, paint: Paint::Solid(c), .. }
                if *rect == Rect::new(0.0, 0.0, 80.0, 40.0) && c == "#000000"
        ));
    }

    #[test]
    fn disabled_animation_keeps_hue_but_tracks_time() {
        let mut renderer = FrameRenderer::new();
        renderer.animation_mut().hue_offset = 42.0;
        let mut surface = Recorder::new(10, 10);
        let mut source = connected(1, 64);
        let options = options(OptionsPatch {
            hsl_animation: Some(crate::config::HslAnimationPatch {
                enabled: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
        tick(&mut renderer, &mut surface, &mut source, &options, 0.0);
        tick(&mut renderer, &mut surface, &mut source, &options, 2000.0);
        assert_eq!(renderer.animation().hue_offset, 42.0);
        assert_eq!(renderer.animation().last_timestamp_ms, Some(2000.0));
    }
}
