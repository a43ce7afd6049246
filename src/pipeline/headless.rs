//! CPU renderer backend
//!
//! Mirrors uploaded vertex data into its own arrays the way a GPU backend
//! copies it into device buffers, and records which passes each frame ran.
//! The CLI uses it when no GPU backend is selected.

use tracing::trace;

use super::{Frame, FrameRenderer, FrameUniforms, Viewport};
use crate::buffer::{GeometryBuffers, VertexBuffer};
use crate::error::{Error, Result};

/// Renderer that keeps device-side copies in host memory
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    surface: Option<(u32, u32)>,
    points: Vec<f32>,
    lines: Vec<f32>,
    uploads: u64,
    frames: u64,
    executed: Vec<&'static str>,
    last_uniforms: Option<FrameUniforms>,
    released: bool,
}

impl HeadlessRenderer {
    /// Create an uninitialised renderer
    pub fn new() -> Self {
        Self::default()
    }

    /// Point positions as last uploaded
    pub fn points(&self) -> &[f32] {
        &self.points
    }

    /// Line endpoints as last uploaded
    pub fn lines(&self) -> &[f32] {
        &self.lines
    }

    /// Number of buffer uploads performed
    pub fn uploads(&self) -> u64 {
        self.uploads
    }

    /// Number of frames rendered
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Pass labels executed by the latest frame, in order
    pub fn executed_passes(&self) -> &[&'static str] {
        &self.executed
    }

    /// Uniforms of the latest frame
    pub fn last_uniforms(&self) -> Option<&FrameUniforms> {
        self.last_uniforms.as_ref()
    }

    /// Output surface size in physical pixels
    pub fn surface_size(&self) -> Option<(u32, u32)> {
        self.surface
    }

    /// Whether `release` has run
    pub fn is_released(&self) -> bool {
        self.released
    }

    fn upload(mirror: &mut [f32], buffer: &mut VertexBuffer, uploads: &mut u64) -> Result<()> {
        if !buffer.is_dirty() {
            return Ok(());
        }
        if mirror.len() != buffer.len() {
            return Err(Error::PreconditionViolation(format!(
                "device buffer holds {} floats, host buffer {}",
                mirror.len(),
                buffer.len()
            )));
        }
        mirror.copy_from_slice(buffer.as_slice());
        buffer.mark_uploaded();
        *uploads += 1;
        Ok(())
    }
}

impl FrameRenderer for HeadlessRenderer {
    fn initialize(&mut self, viewport: &Viewport, buffers: &GeometryBuffers) -> Result<()> {
        self.surface = Some(viewport.physical_size());
        self.points = vec![0.0; buffers.points.len()];
        self.lines = vec![0.0; buffers.lines.len()];
        Ok(())
    }

    fn resize(&mut self, viewport: &Viewport) -> Result<()> {
        self.surface = Some(viewport.physical_size());
        Ok(())
    }

    fn render(&mut self, frame: Frame<'_>) -> Result<()> {
        if self.released {
            return Err(Error::PreconditionViolation(
                "render called after release".to_string(),
            ));
        }
        if self.surface.is_none() {
            return Err(Error::PreconditionViolation(
                "render called before initialize".to_string(),
            ));
        }

        Self::upload(&mut self.points, &mut frame.buffers.points, &mut self.uploads)?;
        Self::upload(&mut self.lines, &mut frame.buffers.lines, &mut self.uploads)?;

        self.executed.clear();
        self.executed.extend(frame.passes.iter().map(|p| p.label()));
        self.last_uniforms = Some(frame.uniforms);
        self.frames += 1;
        trace!(frame = frame.index, passes = ?self.executed, "headless frame");
        Ok(())
    }

    fn release(&mut self) {
        self.released = true;
        self.points = Vec::new();
        self.lines = Vec::new();
    }
}
