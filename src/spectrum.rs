//! Frequency analysis node over PCM windows (rustfft)

use std::f32::consts::PI;
use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::config::{MAX_FFT_SIZE, MIN_FFT_SIZE};
use crate::source::AnalysisParams;

/// Decibel level mapped to magnitude 0.
pub const MIN_DECIBELS: f32 = -100.0;
/// Decibel level mapped to magnitude 255.
pub const MAX_DECIBELS: f32 = -30.0;

/// Byte-valued spectrum analyser.
///
/// Each snapshot windows the latest `fft_size` samples (Blackman), takes the
/// FFT, smooths magnitudes over time with the smoothing constant and maps the
/// result from `[MIN_DECIBELS, MAX_DECIBELS]` onto 0–255.
pub struct Analyser {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl Analyser {
    pub fn new(params: AnalysisParams) -> Self {
        let fft_size = valid_fft_size(params.fft_size);
        let mut planner = FftPlanner::new();
        Self {
            fft_size,
            smoothing: params.smoothing.clamp(0.0, 1.0),
            fft: planner.plan_fft_forward(fft_size),
            window: (0..fft_size).map(|i| blackman_window(i, fft_size)).collect(),
            smoothed: vec![0.0; fft_size / 2],
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    /// Apply new parameters; a size change re-plans the FFT and drops smoothing history.
    pub fn set_params(&mut self, params: AnalysisParams) {
        let fft_size = valid_fft_size(params.fft_size);
        if fft_size != self.fft_size {
            *self = Self::new(AnalysisParams {
                fft_size,
                smoothing: params.smoothing,
            });
        } else {
            self.smoothing = params.smoothing.clamp(0.0, 1.0);
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Analyse the most recent samples (`samples` ends at "now") into `out`.
    ///
    /// Missing history is treated as silence.
    pub fn byte_frequency_data(&mut self, samples: &[f32], out: &mut [u8]) {
        let n = self.fft_size;
        let recent = &samples[samples.len().saturating_sub(n)..];
        let pad = n - recent.len();
        for (i, slot) in self.buffer.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { recent[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.buffer);

        let scale = 1.0 / n as f32;
        let tau = self.smoothing;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        for (k, (smoothed, out)) in self.smoothed.iter_mut().zip(out.iter_mut()).enumerate() {
            let magnitude = self.buffer[k].norm() * scale;
            let value = tau * *smoothed + (1.0 - tau) * magnitude;
            *smoothed = if value.is_finite() { value } else { 0.0 };
            *out = if *smoothed > 0.0 {
                let db = 20.0 * smoothed.log10();
                (255.0 / range * (db - MIN_DECIBELS)).floor().clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }
    }
}

fn valid_fft_size(requested: usize) -> usize {
    requested.clamp(MIN_FFT_SIZE, MAX_FFT_SIZE).next_power_of_two()
}

/// Blackman window (alpha 0.16).
pub fn blackman_window(i: usize, n: usize) -> f32 {
    let x = 2.0 * PI * i as f32 / n as f32;
    0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos()
}
