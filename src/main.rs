use std::io::Read;
use std::path::PathBuf;
use std::process::Stdio;

use audio_spectrum_visualizer::config::GlowEffectPatch;
use audio_spectrum_visualizer::decode::decode_file;
use audio_spectrum_visualizer::draw::Canvas;
use audio_spectrum_visualizer::track::{Playhead, TrackSource};
use audio_spectrum_visualizer::wav::write_wav;
use audio_spectrum_visualizer::{FixedIntervalScheduler, OptionsPatch, VisualizationKind, Visualizer};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Style {
    Smooth,
    Bars,
}

impl From<Style> for VisualizationKind {
    fn from(style: Style) -> Self {
        match style {
            Style::Smooth => VisualizationKind::Smooth,
            Style::Bars => VisualizationKind::Bars,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "audio-spectrum-visualizer")]
#[command(about = "Render an animated audio spectrum video (MP4) from an audio file")]
struct Args {
    /// Input audio file (MP3, WAV, FLAC)
    input: PathBuf,

    /// Output MP4 file
    #[arg(short, long)]
    output: PathBuf,

    /// Resolution (e.g. 1920x1080). Overrides --width / --height when set
    #[arg(long, value_parser = parse_resolution)]
    resolution: Option<(u32, u32)>,

    /// Video width (pixels)
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Video height (pixels)
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Frame rate (fps)
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u32).range(1..))]
    fps: u32,

    /// Start offset into the input (seconds)
    #[arg(long, default_value_t = 0.0)]
    start: f64,

    /// Length of the rendered section (seconds); runs to the end when omitted
    #[arg(long)]
    duration: Option<f64>,

    /// Visualizer options file (TOML, same keys as the options schema)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Visualization style
    #[arg(long, value_enum)]
    style: Option<Style>,

    /// Enable the glow pass
    #[arg(long)]
    glow: bool,

    /// Magnitude amplification
    #[arg(long)]
    amplification: Option<f32>,

    /// Background color (CSS). Defaults to black unless the config sets one
    #[arg(long)]
    background: Option<String>,
}

/// `WIDTHxHEIGHT`, both positive.
fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    let side = |text: &str, name: &str| match text.trim().parse::<u32>() {
        Ok(0) => Err(format!("{} must be positive", name)),
        Ok(value) => Ok(value),
        Err(e) => Err(format!("bad {} {:?}: {}", name, text, e)),
    };
    Ok((side(w, "width")?, side(h, "height")?))
}

/// Config file first, then command-line overrides on top.
fn options_patch(args: &Args) -> Result<OptionsPatch, BoxError> {
    let mut patch = match &args.config {
        Some(path) => {
            info!("Loading options: {:?}", path);
            OptionsPatch::load(path)?
        }
        None => OptionsPatch::default(),
    };
    if let Some(style) = args.style {
        patch.visualization_type = Some(style.into());
    }
    if args.glow {
        patch
            .glow_effect
            .get_or_insert_with(GlowEffectPatch::default)
            .enabled = Some(true);
    }
    if let Some(amplification) = args.amplification {
        patch.amplification = Some(amplification);
    }
    if let Some(background) = &args.background {
        patch.background_color = Some(Some(background.clone()));
    } else if patch.background_color.is_none() {
        // video frames have no page behind them
        patch.background_color = Some(Some("#000000".to_string()));
    }
    Ok(patch)
}

fn progress_bar(len: u64, template: &str) -> Result<ProgressBar, BoxError> {
    let pb = ProgressBar::new(len);
    pb.set_style(ProgressStyle::default_bar().template(template)?.progress_chars("=>-"));
    Ok(pb)
}

/// Highest `frame=` counter in a chunk of ffmpeg status output.
fn encoded_frames(status: &str) -> Option<u64> {
    status
        .split("frame=")
        .skip(1)
        .filter_map(|rest| {
            let rest = rest.trim_start();
            let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            rest[..end].parse().ok()
        })
        .max()
}

/// Follow ffmpeg's status lines on `stderr` and move `pb` along with them.
fn track_encoding(
    mut stderr: impl Read + Send + 'static,
    pb: ProgressBar,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut chunk = [0u8; 1024];
        // status lines end in '\r', so a count can straddle two reads
        let mut carry = String::new();
        loop {
            let n = match stderr.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            carry.push_str(&String::from_utf8_lossy(&chunk[..n]));
            if let Some(frames) = encoded_frames(&carry) {
                pb.set_position(frames.min(pb.length().unwrap_or(frames)).max(pb.position()));
            }
            if let Some(cut) = carry.rfind(['\r', '\n']) {
                carry.drain(..=cut);
            }
        }
    })
}

fn main() -> Result<(), BoxError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if std::process::Command::new("ffmpeg").arg("-version").output().is_err() {
        return Err("ffmpeg not found. Please install ffmpeg and add it to your PATH.".into());
    }

    let (width, height) = args.resolution.unwrap_or((args.width, args.height));
    let patch = options_patch(&args)?;

    info!("Decoding: {:?}", args.input);
    let decoded = decode_file(&args.input)?;
    info!(
        "Decoded {} samples at {} Hz",
        decoded.samples.len(),
        decoded.sample_rate
    );
    let clip = decoded.clip(args.start, args.duration);
    if clip.samples.is_empty() {
        return Err("selected section contains no audio".into());
    }
    let total_frames = (clip.duration_secs() * f64::from(args.fps)).ceil().max(1.0) as usize;
    info!(
        "Rendering {:.2}s as {} frames at {} fps",
        clip.duration_secs(),
        total_frames,
        args.fps
    );

    let temp_dir = std::env::temp_dir().join("audio-spectrum-visualizer");
    std::fs::create_dir_all(&temp_dir)?;
    let frames_dir = temp_dir.join("frames");
    std::fs::create_dir_all(&frames_dir)?;
    let wav_path = temp_dir.join("audio.wav");

    let cleanup = || {
        let _ = std::fs::remove_dir_all(&frames_dir);
        let _ = std::fs::remove_file(&wav_path);
    };

    info!("Writing WAV: {:?}", wav_path);
    write_wav(&wav_path, &clip)?;

    let playhead = Playhead::new();
    let track = TrackSource::new(clip, playhead.clone());
    let mut visualizer = Visualizer::new(
        Canvas { width, height },
        FixedIntervalScheduler::from_fps(args.fps),
        Some(Box::new(track)),
        &patch,
    )?;
    visualizer.play()?;

    let pb_render = progress_bar(
        total_frames as u64,
        "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} frames",
    )?;
    pb_render.set_message("Rendering frames");
    let frame_secs = 1.0 / f64::from(args.fps);
    for frame_index in 0..total_frames {
        playhead.set(frame_index as f64 * frame_secs);
        visualizer.step();
        let path = frames_dir.join(format!("frame_{:06}.png", frame_index));
        visualizer.surface().write_to(&path)?;
        pb_render.inc(1);
    }
    pb_render.finish_with_message("Rendering done");

    let pb_ffmpeg = progress_bar(
        total_frames as u64,
        "[{elapsed_precise}] {bar:40.green/black} {pos}/{len} encoding",
    )?;
    pb_ffmpeg.set_message("Encoding MP4 with ffmpeg");

    let mut child = std::process::Command::new("ffmpeg")
        .args(["-y", "-framerate", &args.fps.to_string(), "-i"])
        .arg(frames_dir.join("frame_%06d.png"))
        .arg("-i")
        .arg(&wav_path)
        .args([
            "-c:v", "libx264", "-c:a", "aac", "-shortest", "-pix_fmt", "yuv420p",
        ])
        .arg(args.output.as_os_str())
        .stderr(Stdio::piped())
        .spawn()?;

    let stderr = child.stderr.take().ok_or("ffmpeg stderr was not captured")?;
    let reader = track_encoding(stderr, pb_ffmpeg.clone());

    let status = child.wait()?;
    reader.join().ok();
    pb_ffmpeg.finish_with_message("Encoding done");

    cleanup();

    if !status.success() {
        return Err("ffmpeg failed (rerun ffmpeg by hand to see its output)".into());
    }

    info!("Done: {:?}", args.output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_accepts_either_separator() {
        assert_eq!(parse_resolution("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_resolution(" 640 X 480 "), Ok((640, 480)));
    }

    #[test]
    fn resolution_rejects_zero_and_garbage() {
        assert!(parse_resolution("1920").is_err());
        assert!(parse_resolution("0x1080").is_err());
        assert!(parse_resolution("1920x").is_err());
        assert!(parse_resolution("wide x tall").is_err());
    }

    #[test]
    fn encoded_frames_takes_the_latest_counter() {
        let status = "frame=   12 fps=0.0 q=28.0\rframe=  140 fps=93 q=28.0 size=256kB\r";
        assert_eq!(encoded_frames(status), Some(140));
        assert_eq!(encoded_frames("Input #0, image2"), None);
        assert_eq!(encoded_frames("frame= "), None);
    }
}
