//! Audio file → mono PCM decoding (symphonia)

use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;

/// Errors that can occur while decoding an input file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no audio track found")]
    NoAudioTrack,
    #[error("missing {0} in stream parameters")]
    MissingParameter(&'static str),
    #[error("decode error: {0}")]
    Decode(#[from] SymphoniaError),
}

/// Decoded audio (mono PCM and sample rate).
#[derive(Clone, Debug, Default)]
pub struct DecodedAudio {
    /// Mono PCM samples (f32, -1.0 to 1.0).
    pub samples: Vec<f32>,
    /// Sample rate (Hz).
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    /// Sample index for a time offset, clamped to the track.
    pub fn index_at(&self, secs: f64) -> usize {
        let index = (secs.max(0.0) * f64::from(self.sample_rate)).floor() as usize;
        index.min(self.samples.len())
    }

    /// Copy of the `[start, start + duration)` section; `None` runs to the end.
    pub fn clip(&self, start_secs: f64, duration_secs: Option<f64>) -> DecodedAudio {
        let from = self.index_at(start_secs);
        let to = duration_secs.map_or(self.samples.len(), |d| self.index_at(start_secs + d));
        DecodedAudio {
            samples: self.samples[from..to.max(from)].to_vec(),
            sample_rate: self.sample_rate,
        }
    }
}

/// Decode an audio file (MP3, WAV, FLAC) and return mono PCM.
/// Multi-channel audio is averaged down to mono.
pub fn decode_file(path: &Path) -> Result<DecodedAudio, DecodeError> {
    let src = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mut probe_result =
        get_probe().format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())?;

    let track = probe_result
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or(DecodeError::NoAudioTrack)?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let mut decoder = get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let sample_rate = codec_params
        .sample_rate
        .ok_or(DecodeError::MissingParameter("sample rate"))?;
    let channels = codec_params
        .channels
        .ok_or(DecodeError::MissingParameter("channel layout"))?
        .count()
        .max(1);

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match probe_result.format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                log::debug!("skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        let mut sample_buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buffer.copy_interleaved_ref(decoded);

        let interleaved = sample_buffer.samples();
        if channels == 1 {
            samples.extend_from_slice(interleaved);
        } else {
            samples.extend(
                interleaved
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    log::debug!(
        "decoded {:?}: {} samples at {} Hz",
        path,
        samples.len(),
        sample_rate
    );
    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}
