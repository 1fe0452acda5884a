//! Mono PCM → 16-bit WAV export for muxing (hound)

use std::path::Path;

use thiserror::Error;

use crate::decode::DecodedAudio;

#[derive(Debug, Error)]
pub enum WavError {
    #[error("cannot write an empty track")]
    Empty,
    #[error("WAV error: {0}")]
    Hound(#[from] hound::Error),
}

/// Write mono f32 samples (-1.0 to 1.0) as 16-bit PCM.
pub fn write_wav(path: &Path, audio: &DecodedAudio) -> Result<(), WavError> {
    if audio.samples.is_empty() || audio.sample_rate == 0 {
        return Err(WavError::Empty);
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: audio.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &s in &audio.samples {
        writer.write_sample(to_i16(s))?;
    }
    writer.finalize()?;
    Ok(())
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}
