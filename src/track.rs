//! Decoded track exposed as a playable frequency source

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::decode::DecodedAudio;
use crate::source::{AnalysisParams, FrequencySource, PlaybackEvent, SourceError};
use crate::spectrum::Analyser;

/// Shared playback position in seconds, advanced by whoever drives the clock.
#[derive(Clone, Debug, Default)]
pub struct Playhead(Rc<Cell<f64>>);

impl Playhead {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> f64 {
        self.0.get()
    }

    pub fn set(&self, secs: f64) {
        self.0.set(secs.max(0.0));
    }
}

/// In-memory track with an analyser node attached while connected.
pub struct TrackSource {
    audio: DecodedAudio,
    playhead: Playhead,
    params: AnalysisParams,
    analyser: Option<Analyser>,
    playing: bool,
    events: VecDeque<PlaybackEvent>,
}

impl TrackSource {
    pub fn new(audio: DecodedAudio, playhead: Playhead) -> Self {
        Self {
            audio,
            playhead,
            params: AnalysisParams {
                fft_size: 2048,
                smoothing: 0.8,
            },
            analyser: None,
            playing: false,
            events: VecDeque::new(),
        }
    }

    pub fn playhead(&self) -> &Playhead {
        &self.playhead
    }

    pub fn duration_secs(&self) -> f64 {
        self.audio.duration_secs()
    }

    fn check_ended(&mut self) {
        if self.playing && self.playhead.get() >= self.duration_secs() {
            self.playing = false;
            self.events.push_back(PlaybackEvent::Ended);
        }
    }
}

impl FrequencySource for TrackSource {
    fn sample_count(&self) -> usize {
        self.analyser
            .as_ref()
            .map_or(self.params.fft_size / 2, Analyser::frequency_bin_count)
    }

    fn read_magnitudes(&mut self, out: &mut [u8]) {
        let Some(analyser) = self.analyser.as_mut() else {
            out.fill(0);
            return;
        };
        // a paused element feeds silence, so the analyser decays
        let history: &[f32] = if self.playing {
            &self.audio.samples[..self.audio.index_at(self.playhead.get())]
        } else {
            &[]
        };
        analyser.byte_frequency_data(history, out);
    }

    fn set_analysis_parameters(&mut self, params: AnalysisParams) {
        self.params = params;
        if let Some(analyser) = self.analyser.as_mut() {
            analyser.set_params(params);
        }
    }

    fn connect(&mut self, params: AnalysisParams) {
        self.params = params;
        self.analyser = Some(Analyser::new(params));
    }

    fn disconnect(&mut self) {
        self.analyser = None;
    }

    fn is_connected(&self) -> bool {
        self.analyser.is_some()
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn play(&mut self) -> Result<(), SourceError> {
        if self.audio.samples.is_empty() {
            return Err(SourceError::PlaybackRejected("track has no samples".into()));
        }
        if self.playhead.get() >= self.duration_secs() {
            self.playhead.set(0.0);
        }
        if !self.playing {
            self.playing = true;
            self.events.push_back(PlaybackEvent::Play);
        }
        Ok(())
    }

    fn pause(&mut self) {
        if self.playing {
            self.playing = false;
            self.events.push_back(PlaybackEvent::Pause);
        }
    }

    fn poll_event(&mut self) -> Option<PlaybackEvent> {
        self.check_ended();
        self.events.pop_front()
    }
}
