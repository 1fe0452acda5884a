//! Frequency sample source contract consumed by the renderer

use thiserror::Error;

/// Errors reported by a media source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),
    #[error("no media source bound")]
    Unbound,
}

/// Analysis node tunables.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnalysisParams {
    /// Power of two; the node exposes `fft_size / 2` bins.
    pub fft_size: usize,
    /// Temporal smoothing between snapshots (0.0–1.0).
    pub smoothing: f32,
}

/// Playback lifecycle transitions a source reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    Play,
    Pause,
    Ended,
}

/// A playable media source with an attached frequency analysis node.
pub trait FrequencySource {
    /// Number of magnitude bins in a snapshot.
    fn sample_count(&self) -> usize;

    /// Fill `out` with a fresh snapshot of magnitudes (0–255).
    ///
    /// `out` holds at least `sample_count()` entries.
    fn read_magnitudes(&mut self, out: &mut [u8]);

    /// Takes effect from the next snapshot.
    fn set_analysis_parameters(&mut self, params: AnalysisParams);

    /// Build the source → analyser → output graph.
    fn connect(&mut self, params: AnalysisParams);

    /// Tear the analysis graph down. Safe to call when not connected.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn is_playing(&self) -> bool;

    /// Start playback.
    fn play(&mut self) -> Result<(), SourceError>;

    fn pause(&mut self);

    /// Next pending lifecycle event, if any.
    fn poll_event(&mut self) -> Option<PlaybackEvent>;

    /// Whether the audio graph is suspended and needs `resume` before it produces data.
    fn is_suspended(&self) -> bool {
        false
    }

    fn resume(&mut self) {}
}
