//! Public controller: configuration, loop lifecycle and the media source binding

use std::rc::Rc;

use log::{debug, error, info, trace};
use thiserror::Error;

use crate::analysis::{BandAnalyzer, BandLevels};
use crate::config::{OptionsPatch, VisualizationKind, VisualizerOptions};
use crate::geometry::{FrequencyWindow, max_height_px};
use crate::renderer::{CustomRenderer, FrameRenderer, TickOutcome};
use crate::scheduler::{FixedIntervalScheduler, Frame, FrameHandle, Scheduler};
use crate::source::{AnalysisParams, FrequencySource, PlaybackEvent, SourceError};
use crate::surface::{Surface, SurfaceError, SurfaceProvider};

#[derive(Debug, Error)]
pub enum VisualizerError {
    #[error("drawing surface unavailable: {0}")]
    SurfaceUnavailable(#[from] SurfaceError),
}

/// Snapshot together with the window and height budget the renderer would use.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedAudio {
    pub data: Vec<u8>,
    pub window: FrequencyWindow,
    pub max_height_px: f32,
}

/// The bound source; its analysis graph lives exactly as long as the binding.
#[derive(Default)]
struct Binding {
    source: Option<Box<dyn FrequencySource>>,
}

impl Binding {
    fn attach(&mut self, mut source: Box<dyn FrequencySource>, params: AnalysisParams) {
        source.connect(params);
        // events queued before the binding are not ours to react to
        while source.poll_event().is_some() {}
        self.source = Some(source);
    }

    fn detach(&mut self) -> Option<Box<dyn FrequencySource>> {
        let mut source = self.source.take()?;
        source.disconnect();
        Some(source)
    }

    fn get(&self) -> Option<&dyn FrequencySource> {
        self.source.as_deref().map(|s| s as &dyn FrequencySource)
    }

    fn get_mut(&mut self) -> Option<&mut dyn FrequencySource> {
        self.source.as_deref_mut().map(|s| s as &mut dyn FrequencySource)
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Drives a [`FrameRenderer`] from a [`Scheduler`] against a bound source.
///
/// The loop is running while a frame request is pending. Every fired frame
/// draws one tick and requests the next, so only [`Visualizer::stop`] ends
/// the chain.
pub struct Visualizer<D: Surface, S: Scheduler> {
    surface: D,
    scheduler: S,
    options: VisualizerOptions,
    custom: Option<Rc<dyn CustomRenderer>>,
    renderer: FrameRenderer,
    binding: Binding,
    pending: Option<FrameHandle>,
    bands: BandAnalyzer,
}

impl<D: Surface, S: Scheduler> Visualizer<D, S> {
    /// Acquire the surface and bind `source` if given.
    ///
    /// A source that is already playing starts the loop right away.
    pub fn new<P>(
        provider: P,
        scheduler: S,
        source: Option<Box<dyn FrequencySource>>,
        patch: &OptionsPatch,
    ) -> Result<Self, VisualizerError>
    where
        P: SurfaceProvider<Surface = D>,
    {
        let surface = provider.acquire()?;
        let mut visualizer = Self {
            surface,
            scheduler,
            options: VisualizerOptions::with_patch(patch),
            custom: patch.custom_renderer.clone(),
            renderer: FrameRenderer::new(),
            binding: Binding::default(),
            pending: None,
            bands: BandAnalyzer::default(),
        };
        if let Some(source) = source {
            visualizer.set_media_source(source);
        }
        Ok(visualizer)
    }

    fn analysis_params(&self) -> AnalysisParams {
        AnalysisParams {
            fft_size: self.options.fft_size,
            smoothing: self.options.smoothing_time_constant,
        }
    }

    /// Enter the running state. Does nothing more than resume the graph when
    /// a frame is already pending.
    pub fn start(&mut self) {
        if let Some(source) = self.binding.get_mut() {
            if source.is_suspended() {
                debug!("resuming suspended audio graph");
                source.resume();
            }
        }
        if self.pending.is_none() {
            self.renderer.animation_mut().reset_clock();
            self.pending = Some(self.scheduler.request_frame());
            debug!("animation loop started");
        }
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.pending.take() {
            self.scheduler.cancel_frame(handle);
            debug!("animation loop stopped");
        }
    }

    /// Handle a frame fired by the scheduler.
    ///
    /// Frames other than the one currently requested are ignored and yield `None`.
    pub fn on_frame(&mut self, frame: Frame) -> Option<TickOutcome> {
        if self.pending != Some(frame.handle) {
            trace!("ignoring stale frame {:?}", frame.handle);
            return None;
        }
        self.pending = None;

        let outcome = self.renderer.render_tick(
            &mut self.surface,
            self.binding.get_mut(),
            &self.options,
            self.custom.as_deref(),
            frame.timestamp_ms,
        );
        if let TickOutcome::Rendered { .. } = outcome {
            self.bands.update(self.renderer.snapshot());
        }

        self.pending = Some(self.scheduler.request_frame());
        Some(outcome)
    }

    /// Apply queued playback events: play starts the loop, pause and end stop it.
    pub fn pump_playback_events(&mut self) {
        while let Some(event) = self.binding.get_mut().and_then(|s| s.poll_event()) {
            debug!("playback event {:?}", event);
            match event {
                PlaybackEvent::Play => self.start(),
                PlaybackEvent::Pause | PlaybackEvent::Ended => self.stop(),
            }
        }
    }

    /// Merge `patch` into the configuration.
    ///
    /// Analysis settings reach the source only when the patch changes them.
    pub fn update_options(&mut self, patch: &OptionsPatch) {
        self.options.apply(patch);
        if let Some(renderer) = &patch.custom_renderer {
            self.custom = Some(Rc::clone(renderer));
        }
        if patch.touches_analysis() {
            self.push_analysis_params();
        }
    }

    /// Back to the documented defaults, dropping any custom renderer.
    pub fn reset_options(&mut self) {
        self.options = VisualizerOptions::default();
        self.custom = None;
        self.push_analysis_params();
    }

    fn push_analysis_params(&mut self) {
        let params = self.analysis_params();
        if let Some(source) = self.binding.get_mut() {
            source.set_analysis_parameters(params);
        }
    }

    pub fn options(&self) -> &VisualizerOptions {
        &self.options
    }

    /// Swap the media source.
    ///
    /// The loop stops and the old graph is torn down before the new one is
    /// wired; the loop restarts only if the new source is already playing.
    /// Returns the old, disconnected source.
    pub fn set_media_source(
        &mut self,
        source: Box<dyn FrequencySource>,
    ) -> Option<Box<dyn FrequencySource>> {
        self.stop();
        let old = self.binding.detach();
        info!(
            "binding media source ({} previous)",
            if old.is_some() { "replacing" } else { "no" }
        );
        self.binding.attach(source, self.analysis_params());
        if self.binding.get().is_some_and(|s| s.is_playing()) {
            self.start();
        }
        old
    }

    /// Stop the loop and release the bound source, disconnected.
    pub fn detach_media_source(&mut self) -> Option<Box<dyn FrequencySource>> {
        self.stop();
        let old = self.binding.detach();
        if old.is_some() {
            info!("media source detached");
        }
        old
    }

    pub fn media_source(&self) -> Option<&dyn FrequencySource> {
        self.binding.get()
    }

    /// Ask the bound source to start playback.
    ///
    /// Loop state is driven by the resulting playback event, not by this call.
    pub fn play(&mut self) -> Result<(), SourceError> {
        let source = self.binding.get_mut().ok_or(SourceError::Unbound)?;
        source.play().inspect_err(|e| error!("playback failed: {}", e))
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.surface.resize(width, height);
    }

    /// Fresh magnitude snapshot, `None` when unbound.
    pub fn audio_data(&mut self) -> Option<Vec<u8>> {
        let source = self.binding.get_mut()?;
        let mut data = vec![0; source.sample_count()];
        source.read_magnitudes(&mut data);
        Some(data)
    }

    pub fn processed_audio_data(&mut self) -> Option<ProcessedAudio> {
        let data = self.audio_data()?;
        Some(ProcessedAudio {
            window: FrequencyWindow::from_range(data.len(), &self.options.frequency_range),
            max_height_px: max_height_px(self.surface.height() as f32, self.options.max_height),
            data,
        })
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.binding.get().map_or(0, |s| s.sample_count())
    }

    /// Whether the animation loop is running.
    pub fn is_playing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn visualization_kind(&self) -> VisualizationKind {
        self.options.visualization_type
    }

    pub fn set_visualization_kind(&mut self, kind: VisualizationKind) {
        self.options.visualization_type = kind;
    }

    /// Install a custom strategy and switch to it.
    pub fn set_custom_renderer(&mut self, renderer: Rc<dyn CustomRenderer>) {
        self.custom = Some(renderer);
        self.options.visualization_type = VisualizationKind::Custom;
    }

    /// Flip the loop, or force it on/off. Returns whether it is running afterwards.
    pub fn toggle_visualization(&mut self, force: Option<bool>) -> bool {
        let wanted = force.unwrap_or(!self.is_playing());
        if wanted && !self.is_playing() {
            self.start();
        } else if !wanted && self.is_playing() {
            self.stop();
        }
        self.is_playing()
    }

    pub fn surface(&self) -> &D {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut D {
        &mut self.surface
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn hue_offset(&self) -> f32 {
        self.renderer.animation().hue_offset
    }

    /// Smoothed band summary, updated on every rendered tick.
    pub fn band_levels(&self) -> BandLevels {
        self.bands.levels()
    }
}

impl<D: Surface> Visualizer<D, FixedIntervalScheduler> {
    /// Apply playback events, advance the clock one interval and run whatever fired.
    pub fn step(&mut self) -> Vec<TickOutcome> {
        self.pump_playback_events();
        let frames = self.scheduler.advance();
        frames
            .into_iter()
            .filter_map(|frame| self.on_frame(frame))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::{FrequencyRangePatch, GradientStop};
    use crate::renderer::CustomFrame;
    use crate::source::testing::MockSource;
    use crate::surface::{DrawCommand, Recorder};

    type TestVisualizer = Visualizer<Recorder, FixedIntervalScheduler>;

    fn visualizer(source: Option<&MockSource>, patch: &OptionsPatch) -> TestVisualizer {
        let source = source.map(|s| Box::new(s.clone()) as Box<dyn FrequencySource>);
        Visualizer::new(
            Recorder::new(800, 200),
            FixedIntervalScheduler::from_fps(50),
            source,
            patch,
        )
        .unwrap()
    }

    #[test]
    fn construction_fails_without_a_surface() {
        let result: Result<TestVisualizer, _> = Visualizer::new(
            Recorder::new(0, 0),
            FixedIntervalScheduler::from_fps(30),
            None,
            &OptionsPatch::default(),
        );
        assert!(matches!(result, Err(VisualizerError::SurfaceUnavailable(_))));
    }

    #[test]
    fn unbound_loop_paints_placeholder_and_keeps_going() {
        let mut v = visualizer(None, &OptionsPatch::default());
        assert!(!v.is_playing());
        v.start();
        for _ in 0..3 {
            assert_eq!(v.step(), vec![TickOutcome::Placeholder]);
            assert!(v.is_playing());
            assert_eq!(v.scheduler().pending().len(), 1);
        }
        assert_eq!(v.audio_data(), None);
        assert_eq!(v.processed_audio_data(), None);
        assert_eq!(v.frequency_bin_count(), 0);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut v = visualizer(None, &OptionsPatch::default());
        v.start();
        v.start();
        assert_eq!(v.scheduler().pending().len(), 1);
        assert_eq!(v.step().len(), 1);

        v.stop();
        v.stop();
        assert!(!v.is_playing());
        assert!(v.scheduler().pending().is_empty());
        assert!(v.step().is_empty());
    }

    #[test]
    fn stale_frame_is_ignored_after_stop() {
        let source = MockSource::new(200);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        v.start();
        let handle = v.scheduler().pending()[0];
        v.stop();

        let outcome = v.on_frame(Frame {
            handle,
            timestamp_ms: 16.0,
        });
        assert_eq!(outcome, None);
        assert!(!v.is_playing());
        assert_eq!(source.state().reads, 0);
    }

    #[test]
    fn full_scale_ticks_reach_max_height() {
        let source = MockSource::new(255);
        let patch = OptionsPatch {
            amplification: Some(1.0),
            visualization_type: Some(VisualizationKind::Bars),
            ..Default::default()
        };
        let mut v = visualizer(Some(&source), &patch);
        v.start();
        for _ in 0..10 {
            let outcomes = v.step();
            assert_eq!(outcomes.len(), 1);
            match outcomes[0] {
                TickOutcome::Rendered {
                    window,
                    max_height_px,
                    peak_px,
                } => {
                    assert_eq!(window, FrequencyWindow { start: 0, end: 89 });
                    assert_eq!(max_height_px, 200.0);
                    assert_eq!(peak_px, max_height_px);
                }
                TickOutcome::Placeholder => panic!("source is bound"),
            }
        }
        assert_eq!(source.state().reads, 10);
    }

    #[test]
    fn rebinding_while_running_stops_when_new_source_is_idle() {
        let old = MockSource::playing(10);
        let mut v = visualizer(Some(&old), &OptionsPatch::default());
        assert!(v.is_playing());
        assert!(old.state().connected);

        let new = MockSource::new(20);
        let returned = v.set_media_source(Box::new(new.clone()));

        assert!(returned.is_some_and(|s| !s.is_connected()));
        assert!(!old.state().connected);
        assert_eq!(old.state().disconnects, 1);
        assert!(new.state().connected);
        assert_eq!(new.state().params.map(|p| p.fft_size), Some(256));
        assert!(!v.is_playing());
        assert!(v.scheduler().pending().is_empty());
    }

    #[test]
    fn rebinding_to_a_playing_source_resumes() {
        let old = MockSource::new(10);
        let mut v = visualizer(Some(&old), &OptionsPatch::default());
        v.start();
        let new = MockSource::playing(30);
        v.set_media_source(Box::new(new.clone()));
        assert!(v.is_playing());
        assert_eq!(v.scheduler().pending().len(), 1);
        v.step();
        assert_eq!(new.state().reads, 1);
        assert_eq!(old.state().reads, 0);
    }

    #[test]
    fn update_options_merges_and_pushes_analysis_settings() {
        let source = MockSource::new(0);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        v.update_options(&OptionsPatch {
            fft_size: Some(1024),
            smoothing_time_constant: Some(0.3),
            ..Default::default()
        });
        assert_eq!(
            source.state().params,
            Some(AnalysisParams {
                fft_size: 1024,
                smoothing: 0.3,
            })
        );
        assert_eq!(v.frequency_bin_count(), 512);

        v.update_options(&OptionsPatch {
            frequency_range: Some(FrequencyRangePatch {
                end: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        });
        let o = v.options();
        assert_eq!(o.fft_size, 1024);
        assert_eq!(o.frequency_range.start, 0.0);
        assert_eq!(o.frequency_range.end, 0.5);
        assert_eq!(o.amplification, 1.2);
    }

    #[test]
    fn drawing_only_patch_leaves_analysis_alone() {
        let source = MockSource::new(0);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        source.state().params = None;
        v.update_options(&OptionsPatch {
            amplification: Some(2.0),
            ..Default::default()
        });
        assert_eq!(source.state().params, None);
        assert_eq!(v.options().amplification, 2.0);
    }

    #[test]
    fn update_options_without_source_only_changes_config() {
        let mut v = visualizer(None, &OptionsPatch::default());
        v.update_options(&OptionsPatch {
            fft_size: Some(512),
            ..Default::default()
        });
        assert_eq!(v.options().fft_size, 512);
        assert_eq!(v.frequency_bin_count(), 0);
    }

    #[test]
    fn reset_options_restores_defaults() {
        let source = MockSource::new(0);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        v.update_options(&OptionsPatch {
            fft_size: Some(4096),
            gradient: Some(crate::config::Gradient {
                colors: vec![GradientStop::new(0.0, "red")],
            }),
            ..Default::default()
        });
        v.reset_options();
        assert_eq!(v.options(), &VisualizerOptions::default());
        assert_eq!(source.state().params.map(|p| p.fft_size), Some(256));
    }

    #[test]
    fn playback_events_drive_the_loop() {
        let source = MockSource::new(50);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        assert!(!v.is_playing());

        v.play().unwrap();
        assert_eq!(v.step().len(), 1);
        assert!(v.is_playing());

        source.state().events.push_back(PlaybackEvent::Pause);
        assert!(v.step().is_empty());
        assert!(!v.is_playing());

        source.state().events.push_back(PlaybackEvent::Play);
        v.pump_playback_events();
        assert!(v.is_playing());
        source.state().events.push_back(PlaybackEvent::Ended);
        v.pump_playback_events();
        assert!(!v.is_playing());
    }

    #[test]
    fn events_queued_before_binding_are_dropped() {
        let source = MockSource::new(0);
        source.state().events.push_back(PlaybackEvent::Play);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        v.pump_playback_events();
        assert!(!v.is_playing());
    }

    #[test]
    fn rejected_playback_is_reported_without_touching_the_loop() {
        let mut v = visualizer(None, &OptionsPatch::default());
        assert!(matches!(v.play(), Err(SourceError::Unbound)));

        let source = MockSource::new(0);
        source.state().reject_play = true;
        v.set_media_source(Box::new(source.clone()));
        v.start();
        assert!(matches!(v.play(), Err(SourceError::PlaybackRejected(_))));
        assert!(v.is_playing());
    }

    #[test]
    fn start_resumes_a_suspended_graph() {
        let source = MockSource::new(0);
        source.state().suspended = true;
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        v.start();
        v.start();
        assert!(!source.state().suspended);
        assert_eq!(source.state().resumes, 1);
    }

    #[test]
    fn toggle_flips_or_forces_the_loop() {
        let mut v = visualizer(None, &OptionsPatch::default());
        assert!(v.toggle_visualization(None));
        assert!(v.toggle_visualization(Some(true)));
        assert_eq!(v.scheduler().pending().len(), 1);
        assert!(!v.toggle_visualization(None));
        assert!(!v.toggle_visualization(Some(false)));
    }

    #[test]
    fn processed_audio_data_uses_current_options() {
        let source = MockSource::new(7);
        let patch = OptionsPatch {
            max_height: Some(50.0),
            frequency_range: Some(FrequencyRangePatch {
                start: Some(0.25),
                end: Some(0.75),
            }),
            ..Default::default()
        };
        let mut v = visualizer(Some(&source), &patch);
        let processed = v.processed_audio_data().unwrap();
        assert_eq!(processed.data, vec![7; 128]);
        assert_eq!(processed.window, FrequencyWindow { start: 32, end: 96 });
        assert_eq!(processed.max_height_px, 100.0);
        assert_eq!(v.frequency_bin_count(), 128);
    }

    #[test]
    fn custom_renderer_switches_kind_and_draws() {
        let source = MockSource::new(1);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        assert_eq!(v.visualization_kind(), VisualizationKind::Smooth);

        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        v.set_custom_renderer(Rc::new(
            move |_: &mut dyn Surface, _: &[u8], _: &CustomFrame<'_>| counter.set(counter.get() + 1),
        ));
        assert_eq!(v.visualization_kind(), VisualizationKind::Custom);

        v.start();
        v.step();
        v.step();
        assert_eq!(calls.get(), 2);

        v.set_visualization_kind(VisualizationKind::Bars);
        v.step();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn hue_survives_restart_and_rebinding_without_jumping() {
        let source = MockSource::new(1);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        v.start();
        for _ in 0..51 {
            v.step();
        }
        // 50 intervals of 20 ms at 30 deg/s
        let hue = v.hue_offset();
        assert!((hue - 30.0).abs() < 1e-3, "hue {}", hue);

        v.stop();
        for _ in 0..100 {
            v.step();
        }
        v.start();
        v.step();
        assert!((v.hue_offset() - hue).abs() < 1e-3);

        v.set_media_source(Box::new(MockSource::playing(1)));
        v.step();
        assert!((v.hue_offset() - hue).abs() < 1e-3);
    }

    #[test]
    fn resize_changes_live_dimensions() {
        let source = MockSource::new(255);
        let patch = OptionsPatch {
            amplification: Some(1.0),
            ..Default::default()
        };
        let mut v = visualizer(Some(&source), &patch);
        v.resize(100, 50);
        v.start();
        let outcomes = v.step();
        assert!(matches!(
            outcomes[0],
            TickOutcome::Rendered { max_height_px, .. } if max_height_px == 50.0
        ));
        assert!(
            v.surface()
                .commands()
                .iter()
                .any(|c| matches!(c, DrawCommand::StrokePath { .. }))
        );
    }

    #[test]
    fn band_levels_follow_rendered_ticks() {
        let source = MockSource::new(90);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        assert_eq!(v.band_levels(), BandLevels::default());
        v.start();
        v.step();
        assert!(v.band_levels().bass_percent > 0.0);
    }

    #[test]
    fn dropping_the_visualizer_disconnects_the_source() {
        let source = MockSource::new(0);
        let v = visualizer(Some(&source), &OptionsPatch::default());
        assert!(source.state().connected);
        drop(v);
        assert!(!source.state().connected);
        assert_eq!(source.state().disconnects, 1);
    }

    #[test]
    fn detaching_stops_and_releases_the_source() {
        let source = MockSource::playing(0);
        let mut v = visualizer(Some(&source), &OptionsPatch::default());
        assert!(v.is_playing());
        let released = v.detach_media_source();
        assert!(released.is_some());
        assert!(!v.is_playing());
        assert!(v.media_source().is_none());
        assert!(!source.state().connected);
        assert!(v.detach_media_source().is_none());
    }
}
