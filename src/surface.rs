//! Drawing-surface contract, state stack and a display-list recorder

use std::ops::{Deref, DerefMut};

use thiserror::Error;

use crate::color::Paint;
use crate::geometry::{Path, Point, Rect};

/// Why a drawing surface could not be obtained.
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("invalid surface size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
    #[error("no 2d context available: {0}")]
    Unavailable(String),
}

/// How new pixels combine with what is already on the surface.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompositeOp {
    #[default]
    SourceOver,
    /// Additive blending.
    Lighter,
}

/// Mutable drawing state, saved and restored as a unit.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawState {
    pub global_alpha: f32,
    pub composite: CompositeOp,
    pub shadow_color: Option<String>,
    pub shadow_blur: f32,
    pub clip: Option<Rect>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            global_alpha: 1.0,
            composite: CompositeOp::SourceOver,
            shadow_color: None,
            shadow_blur: 0.0,
            clip: None,
        }
    }
}

/// Current state plus the saved ones. Restoring with nothing saved is a no-op.
#[derive(Clone, Debug, Default)]
pub struct StateStack {
    current: DrawState,
    saved: Vec<DrawState>,
}

impl StateStack {
    pub fn current(&self) -> &DrawState {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut DrawState {
        &mut self.current
    }

    pub fn save(&mut self) {
        self.saved.push(self.current.clone());
    }

    pub fn restore(&mut self) {
        if let Some(state) = self.saved.pop() {
            self.current = state;
        }
    }

    pub fn depth(&self) -> usize {
        self.saved.len()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// A 2D paint context the renderer draws into.
pub trait Surface {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    /// Change the size; drawing state is reset as well.
    fn resize(&mut self, width: u32, height: u32);

    fn state(&self) -> &DrawState;
    fn state_mut(&mut self) -> &mut DrawState;
    fn save(&mut self);
    fn restore(&mut self);

    /// Clear every pixel to transparent.
    fn clear(&mut self);
    fn fill_rect(&mut self, rect: Rect, paint: &Paint);
    fn stroke_rect(&mut self, rect: Rect, paint: &Paint, line_width: f32);
    /// Fill with the nonzero rule; open subpaths are closed implicitly.
    fn fill_path(&mut self, path: &Path, paint: &Paint);
    fn stroke_path(&mut self, path: &Path, paint: &Paint, line_width: f32);
    /// Centered text.
    fn fill_text(&mut self, text: &str, at: Point, font_px: f32, paint: &Paint);
    /// Draw the surface's own current content onto itself at the origin.
    fn composite_self(&mut self);

    /// Intersect the clip region with `rect`.
    fn clip_rect(&mut self, rect: Rect) {
        let state = self.state_mut();
        state.clip = Some(match state.clip {
            Some(clip) => clip.intersect(&rect),
            None => rect,
        });
    }
}

/// Hands out a surface; the only fallible step of building a visualizer.
pub trait SurfaceProvider {
    type Surface: Surface;

    fn acquire(self) -> Result<Self::Surface, SurfaceError>;
}

/// Saves the state on creation and restores it on drop, even while unwinding.
pub struct Scoped<'a, S: Surface + ?Sized> {
    surface: &'a mut S,
}

impl<'a, S: Surface + ?Sized> Scoped<'a, S> {
    pub fn new(surface: &'a mut S) -> Self {
        surface.save();
        Self { surface }
    }
}

impl<S: Surface + ?Sized> Deref for Scoped<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.surface
    }
}

impl<S: Surface + ?Sized> DerefMut for Scoped<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.surface
    }
}

impl<S: Surface + ?Sized> Drop for Scoped<'_, S> {
    fn drop(&mut self) {
        self.surface.restore();
    }
}

/// One recorded drawing call with the state it was issued under.
#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Clear,
    FillRect { rect: Rect, paint: Paint, state: DrawState },
    StrokeRect { rect: Rect, paint: Paint, line_width: f32, state: DrawState },
    FillPath { path: Path, paint: Paint, state: DrawState },
    StrokePath { path: Path, paint: Paint, line_width: f32, state: DrawState },
    FillText { text: String, at: Point, font_px: f32, paint: Paint, state: DrawState },
    CompositeSelf { state: DrawState },
}

/// Surface that records calls instead of rasterizing them.
#[derive(Clone, Debug)]
pub struct Recorder {
    width: u32,
    height: u32,
    states: StateStack,
    commands: Vec<DrawCommand>,
}

impl Recorder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            states: StateStack::default(),
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of `save` calls not yet matched by `restore`.
    pub fn save_depth(&self) -> usize {
        self.states.depth()
    }

    fn record(&mut self, command: DrawCommand) {
        self.commands.push(command);
    }

    fn snapshot(&self) -> DrawState {
        self.states.current().clone()
    }
}

impl SurfaceProvider for Recorder {
    type Surface = Recorder;

    fn acquire(self) -> Result<Recorder, SurfaceError> {
        if self.width == 0 || self.height == 0 {
            return Err(SurfaceError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(self)
    }
}

impl Surface for Recorder {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.states.reset();
    }

    fn state(&self) -> &DrawState {
        self.states.current()
    }

    fn state_mut(&mut self) -> &mut DrawState {
        self.states.current_mut()
    }

    fn save(&mut self) {
        self.states.save();
    }

    fn restore(&mut self) {
        self.states.restore();
    }

    fn clear(&mut self) {
        self.record(DrawCommand::Clear);
    }

    fn fill_rect(&mut self, rect: Rect, paint: &Paint) {
        let state = self.snapshot();
        self.record(DrawCommand::FillRect { rect, paint: paint.clone(), state });
    }

    fn stroke_rect(&mut self, rect: Rect, paint: &Paint, line_width: f32) {
        let state = self.snapshot();
        self.record(DrawCommand::StrokeRect { rect, paint: paint.clone(), line_width, state });
    }

    fn fill_path(&mut self, path: &Path, paint: &Paint) {
        let state = self.snapshot();
        self.record(DrawCommand::FillPath { path: path.clone(), paint: paint.clone(), state });
    }

    fn stroke_path(&mut self, path: &Path, paint: &Paint, line_width: f32) {
        let state = self.snapshot();
        self.record(DrawCommand::StrokePath {
            path: path.clone(),
            paint: paint.clone(),
            line_width,
            state,
        });
    }

    fn fill_text(&mut self, text: &str, at: Point, font_px: f32, paint: &Paint) {
        let state = self.snapshot();
        self.record(DrawCommand::FillText {
            text: text.to_string(),
            at,
            font_px,
            paint: paint.clone(),
            state,
        });
    }

    fn composite_self(&mut self) {
        let state = self.snapshot();
        self.record(DrawCommand::CompositeSelf { state });
    }
}
