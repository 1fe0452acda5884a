//! Frame-synchronized audio spectrum visualizer.
//!
//! A [`Visualizer`] pulls magnitude snapshots from a [`FrequencySource`] once
//! per [`Scheduler`] frame and draws a smoothed curve, a bar chart or a custom
//! strategy onto a [`Surface`], with animated hue cycling and an optional glow
//! pass. [`draw::Canvas`] rasterizes into an RGBA image and
//! [`track::TrackSource`] exposes a decoded audio file as a source.

pub mod analysis;
pub mod color;
pub mod config;
pub mod decode;
pub mod draw;
pub mod geometry;
pub mod renderer;
pub mod scheduler;
pub mod source;
pub mod spectrum;
pub mod surface;
pub mod track;
pub mod visualizer;
pub mod wav;

pub use config::{ColorMode, OptionsPatch, VisualizationKind, VisualizerOptions};
pub use renderer::{CustomFrame, CustomRenderer, TickOutcome};
pub use scheduler::{FixedIntervalScheduler, Frame, FrameHandle, Scheduler};
pub use source::{AnalysisParams, FrequencySource, PlaybackEvent, SourceError};
pub use surface::{Surface, SurfaceError, SurfaceProvider};
pub use visualizer::{ProcessedAudio, Visualizer, VisualizerError};
