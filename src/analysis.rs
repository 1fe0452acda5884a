//! Smoothed band summary of magnitude snapshots

/// Weight of the previous value when smoothing band levels.
pub const DEFAULT_SMOOTHING: f32 = 0.85;

/// Share of spectral energy per band plus two spectral shape measures.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandLevels {
    /// Percent of total energy in the lowest eighth of the bins.
    pub bass_percent: f32,
    /// Percent of total energy from one eighth up to half of the bins.
    pub mid_percent: f32,
    /// Percent of total energy in the upper half of the bins.
    pub high_percent: f32,
    /// Magnitude-weighted mean bin position, 0.0 (lowest) to 1.0 (highest).
    pub spectral_centroid: f32,
    /// Geometric over arithmetic mean; near 0 for tones, near 1 for noise.
    pub spectral_flatness: f32,
}

impl BandLevels {
    /// Unsmoothed levels of one snapshot.
    pub fn measure(snapshot: &[u8]) -> Self {
        let n = snapshot.len();
        if n == 0 {
            return Self::default();
        }
        let bass_end = (n / 8).max(1);
        let mid_end = (n / 2).max(bass_end);

        let energy = |bins: &[u8]| bins.iter().map(|&m| f32::from(m)).sum::<f32>();
        let total = energy(snapshot);
        if total <= 0.0 {
            return Self::default();
        }
        let percent = |bins: &[u8]| energy(bins) / total * 100.0;

        let weighted: f32 = snapshot
            .iter()
            .enumerate()
            .map(|(i, &m)| i as f32 * f32::from(m))
            .sum();
        let spectral_centroid = if n > 1 {
            weighted / total / (n - 1) as f32
        } else {
            0.0
        };

        Self {
            bass_percent: percent(&snapshot[..bass_end]),
            mid_percent: percent(&snapshot[bass_end..mid_end]),
            high_percent: percent(&snapshot[mid_end..]),
            spectral_centroid,
            spectral_flatness: flatness(snapshot),
        }
    }

    /// Spectral centroid in Hz for bins spanning `0..sample_rate / 2`.
    pub fn centroid_hz(&self, sample_rate: u32) -> f32 {
        self.spectral_centroid * sample_rate as f32 / 2.0
    }
}

fn flatness(snapshot: &[u8]) -> f32 {
    let nonzero: Vec<f32> = snapshot
        .iter()
        .filter(|&&m| m > 0)
        .map(|&m| f32::from(m))
        .collect();
    // silent bins make the geometric mean zero
    if nonzero.len() < snapshot.len() || nonzero.is_empty() {
        return 0.0;
    }
    let count = nonzero.len() as f32;
    let log_mean = nonzero.iter().map(|m| m.ln()).sum::<f32>() / count;
    let mean = nonzero.iter().sum::<f32>() / count;
    (log_mean.exp() / mean).clamp(0.0, 1.0)
}

/// Keeps an exponentially smoothed [`BandLevels`] across frames.
#[derive(Clone, Debug)]
pub struct BandAnalyzer {
    smoothing: f32,
    levels: BandLevels,
}

impl Default for BandAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl BandAnalyzer {
    pub fn new(smoothing: f32) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            levels: BandLevels::default(),
        }
    }

    pub fn levels(&self) -> BandLevels {
        self.levels
    }

    pub fn reset(&mut self) {
        self.levels = BandLevels::default();
    }

    /// Blend the levels of `snapshot` into the running values.
    pub fn update(&mut self, snapshot: &[u8]) -> BandLevels {
        let next = BandLevels::measure(snapshot);
        let k = self.smoothing;
        let blend = |old: f32, new: f32| k * old + (1.0 - k) * new;
        let l = &mut self.levels;
        l.bass_percent = blend(l.bass_percent, next.bass_percent);
        l.mid_percent = blend(l.mid_percent, next.mid_percent);
        l.high_percent = blend(l.high_percent, next.high_percent);
        l.spectral_centroid = blend(l.spectral_centroid, next.spectral_centroid);
        l.spectral_flatness = blend(l.spectral_flatness, next.spectral_flatness);
        self.levels
    }
}
