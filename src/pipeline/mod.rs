//! Per-frame render pipeline
//!
//! [`RenderPipeline`] is the single owner of everything a frame touches: the
//! interpolation scheduler, the geometry buffers, the camera and its orbit
//! controls, the rotating scene group, the pass list and the renderer
//! backend. Each call to [`RenderPipeline::run_frame`] runs the same fixed
//! sequence:
//!
//! 1. advance the scheduler (blend positions, rewrite buffers)
//! 2. rotate the scene group
//! 3. apply queued control input to the camera
//! 4. hand the frame to the [`FrameRenderer`]
//! 5. record frame statistics
//!
//! Backends implement [`FrameRenderer`]. [`HeadlessRenderer`] keeps its
//! "device" copies in host memory; the wgpu backend lives in
//! `crate::gpu` behind the `gpu` feature.

mod camera;
mod controls;
mod headless;
mod passes;

use std::f32::consts::TAU;

use tracing::{debug, info, trace, warn};

use crate::buffer::GeometryBuffers;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::field::{FieldGenerator, FieldState};
use crate::scheduler::{InterpolationScheduler, TargetSource};

pub use camera::{
    Camera3D, IDENTITY, MIN_DISTANCE, Mat4, look_at, perspective, rotation_y, transform_point,
};
pub use controls::{ControlInput, OrbitControls};
pub use headless::HeadlessRenderer;
pub use passes::{Composer, Pass};

/// Output surface size and device pixel ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    width: u32,
    height: u32,
    pixel_ratio: f32,
}

impl Viewport {
    /// Logical size in device-independent pixels plus the device pixel ratio.
    ///
    /// A zero dimension or a non-positive ratio is a [`Error::SetupFailure`].
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::SetupFailure(format!(
                "viewport must be non-empty, got {}x{}",
                width, height
            )));
        }
        if !pixel_ratio.is_finite() || pixel_ratio <= 0.0 {
            return Err(Error::SetupFailure(format!(
                "pixel ratio must be positive, got {}",
                pixel_ratio
            )));
        }
        Ok(Self {
            width,
            height,
            pixel_ratio,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_ratio(&self) -> f32 {
        self.pixel_ratio
    }

    /// Width over height
    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    /// Render target size in physical pixels
    pub fn physical_size(&self) -> (u32, u32) {
        let scale = |v: u32| ((v as f32 * self.pixel_ratio).round() as u32).max(1);
        (scale(self.width), scale(self.height))
    }
}

/// Rotation shared by points and lines
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SceneGroup {
    /// Angle about the vertical axis, radians in [0, 2pi)
    pub rotation_y: f32,
}

impl SceneGroup {
    /// Turn about the vertical axis
    pub fn rotate(&mut self, delta: f32) {
        self.rotation_y = (self.rotation_y + delta).rem_euclid(TAU);
    }

    /// Model matrix for both draw calls
    pub fn model_matrix(&self) -> Mat4 {
        rotation_y(self.rotation_y)
    }
}

/// Material settings in linear colour space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneStyle {
    pub point_size: f32,
    pub point_color: [f32; 3],
    pub line_color: [f32; 3],
    pub background: [f32; 3],
}

impl SceneStyle {
    pub fn from_config(config: &Config) -> Self {
        Self {
            point_size: config.point_size,
            point_color: config.point_color.linear(),
            line_color: config.line_color.linear(),
            background: config.background_color.linear(),
        }
    }
}

/// Camera and model transforms for one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub model: Mat4,
    pub camera_position: [f32; 3],
    /// Physical render target size
    pub viewport: [f32; 2],
}

/// Everything a backend needs to draw one frame
#[derive(Debug)]
pub struct Frame<'a> {
    pub uniforms: FrameUniforms,
    pub passes: &'a [Pass],
    pub style: &'a SceneStyle,
    /// Dirty buffers must be uploaded and marked clean before drawing
    pub buffers: &'a mut GeometryBuffers,
    pub index: u64,
}

/// A rendering backend
pub trait FrameRenderer {
    /// Allocate targets for `viewport` and device buffers sized for `buffers`
    fn initialize(&mut self, viewport: &Viewport, buffers: &GeometryBuffers) -> Result<()>;

    /// Recreate size-dependent targets; vertex buffers are kept
    fn resize(&mut self, viewport: &Viewport) -> Result<()>;

    /// Upload dirty buffers and execute `frame.passes` in order
    fn render(&mut self, frame: Frame<'_>) -> Result<()>;

    /// Free device resources; no frame may follow
    fn release(&mut self) {}
}

/// What one call to [`RenderPipeline::run_frame`] did
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    /// Zero-based frame index
    pub frame: u64,
    pub elapsed_ms: f64,
    /// Blend factor applied this frame
    pub progress: f32,
    /// Cycle boundaries crossed this frame
    pub regenerations: u32,
    pub rotation_y: f32,
    pub inputs_applied: usize,
}

/// Totals collected across frames
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameStats {
    pub frames: u64,
    pub total_elapsed_ms: f64,
    pub cycles_completed: u64,
    pub regenerations: u64,
    pub inputs_applied: u64,
}

impl FrameStats {
    /// Average frames per second of animation time
    pub fn fps(&self) -> f64 {
        if self.total_elapsed_ms > 0.0 {
            self.frames as f64 * 1000.0 / self.total_elapsed_ms
        } else {
            0.0
        }
    }
}

/// Owns the animation state and drives a [`FrameRenderer`]
pub struct RenderPipeline<R, S = FieldGenerator> {
    scheduler: InterpolationScheduler<S>,
    buffers: GeometryBuffers,
    camera: Camera3D,
    controls: OrbitControls,
    group: SceneGroup,
    composer: Composer,
    style: SceneStyle,
    viewport: Viewport,
    rotation_rate: f32,
    renderer: R,
    last_timestamp_ms: f64,
    stats: FrameStats,
}

impl<R: FrameRenderer> RenderPipeline<R, FieldGenerator> {
    /// Generate the initial field from `config` and set everything up.
    ///
    /// With `config.seed` unset the field differs on every run.
    pub fn from_config(config: &Config, viewport: Viewport, renderer: R) -> Result<Self> {
        config.validate()?;
        let mut generator = match config.seed {
            Some(seed) => FieldGenerator::seeded(seed, config.node_count, config.extent),
            None => FieldGenerator::from_entropy(config.node_count, config.extent),
        };
        let initial = generator.generate(true)?;
        Self::new(config, viewport, initial, generator, renderer)
    }
}

impl<R: FrameRenderer, S: TargetSource> RenderPipeline<R, S> {
    /// Assemble a pipeline around an existing field and target source
    pub fn new(
        config: &Config,
        viewport: Viewport,
        initial: FieldState,
        source: S,
        mut renderer: R,
    ) -> Result<Self> {
        config.validate()?;
        let buffers = GeometryBuffers::for_field(&initial)?;
        let (nodes, links) = (initial.node_count(), initial.link_count());
        let scheduler = InterpolationScheduler::new(initial, source, config.cycle_duration_ms)?;

        let camera = Camera3D::from_config(&config.camera, viewport.aspect());
        let controls = OrbitControls::new(&camera);
        renderer.initialize(&viewport, &buffers)?;

        let (width, height) = viewport.physical_size();
        info!(nodes, links, width, height, "render pipeline ready");

        Ok(Self {
            scheduler,
            buffers,
            camera,
            controls,
            group: SceneGroup::default(),
            composer: Composer::bloom(&config.bloom),
            style: SceneStyle::from_config(config),
            viewport,
            rotation_rate: config.rotation_rate_rad_per_sec,
            renderer,
            last_timestamp_ms: 0.0,
            stats: FrameStats::default(),
        })
    }

    /// Run one frame that advances the animation by `elapsed_ms`
    pub fn run_frame(&mut self, elapsed_ms: f64) -> Result<FrameReport> {
        let elapsed_ms = if elapsed_ms.is_finite() && elapsed_ms >= 0.0 {
            elapsed_ms
        } else {
            warn!(elapsed_ms, "bad frame delta; treating as 0");
            0.0
        };

        let tick = self.scheduler.advance(elapsed_ms, &mut self.buffers)?;
        self.group.rotate(self.rotation_rate * (elapsed_ms / 1000.0) as f32);
        let inputs_applied = self
            .controls
            .update(&mut self.camera, self.viewport.height() as f32);

        let (width, height) = self.viewport.physical_size();
        let uniforms = FrameUniforms {
            view: self.camera.view_matrix(),
            projection: self.camera.projection_matrix(),
            model: self.group.model_matrix(),
            camera_position: self.camera.position(),
            viewport: [width as f32, height as f32],
        };
        let index = self.stats.frames;
        self.renderer.render(Frame {
            uniforms,
            passes: self.composer.passes(),
            style: &self.style,
            buffers: &mut self.buffers,
            index,
        })?;

        self.stats.frames += 1;
        self.stats.total_elapsed_ms += elapsed_ms;
        self.stats.cycles_completed = self.scheduler.cycles_completed();
        self.stats.regenerations += u64::from(tick.regenerations);
        self.stats.inputs_applied += inputs_applied as u64;

        trace!(
            frame = index,
            elapsed_ms,
            progress = tick.progress,
            rotation = self.group.rotation_y,
            "frame"
        );
        Ok(FrameReport {
            frame: index,
            elapsed_ms,
            progress: tick.progress,
            regenerations: tick.regenerations,
            rotation_y: self.group.rotation_y,
            inputs_applied,
        })
    }

    /// Run one frame from an absolute host timestamp.
    ///
    /// Timestamps start at 0 like a display refresh callback; one earlier
    /// than the previous frame counts as no time passing.
    pub fn frame(&mut self, timestamp_ms: f64) -> Result<FrameReport> {
        let elapsed = (timestamp_ms - self.last_timestamp_ms).max(0.0);
        if timestamp_ms.is_finite() {
            self.last_timestamp_ms = timestamp_ms;
        }
        self.run_frame(elapsed)
    }

    /// React to a new logical surface size. A zero dimension is ignored.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            warn!(width, height, "ignoring resize to an empty surface");
            return Ok(());
        }
        let viewport = Viewport::new(width, height, self.viewport.pixel_ratio())?;
        self.renderer.resize(&viewport)?;
        self.camera.set_aspect(viewport.aspect());
        self.viewport = viewport;
        debug!(width, height, aspect = viewport.aspect(), "resized");
        Ok(())
    }

    /// Queue control input; it takes effect at the next frame
    pub fn push_input(&mut self, input: ControlInput) {
        self.controls.push(input);
    }

    /// Replace the pass list
    pub fn set_composer(&mut self, composer: Composer) {
        self.composer = composer;
    }

    /// Stop the animation and free renderer resources.
    ///
    /// The released renderer is handed back with the totals; it rejects
    /// further frames.
    pub fn teardown(mut self) -> (FrameStats, R) {
        self.renderer.release();
        info!(
            frames = self.stats.frames,
            cycles = self.stats.cycles_completed,
            "render pipeline torn down"
        );
        (self.stats, self.renderer)
    }

    pub fn scheduler(&self) -> &InterpolationScheduler<S> {
        &self.scheduler
    }

    pub fn buffers(&self) -> &GeometryBuffers {
        &self.buffers
    }

    pub fn camera(&self) -> &Camera3D {
        &self.camera
    }

    pub fn group(&self) -> &SceneGroup {
        &self.group
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn style(&self) -> &SceneStyle {
        &self.style
    }

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn stats(&self) -> &FrameStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{Link, Node};
    use std::f32::consts::PI;

    fn small_config() -> Config {
        Config {
            node_count: 8,
            cycle_duration_ms: 1000.0,
            seed: Some(7),
            ..Config::default()
        }
    }

    fn pipeline(width: u32, height: u32) -> RenderPipeline<HeadlessRenderer> {
        let viewport = Viewport::new(width, height, 1.0).unwrap();
        RenderPipeline::from_config(&small_config(), viewport, HeadlessRenderer::new()).unwrap()
    }

    /// First target is valid; every later one has a node missing.
    struct Shrinking {
        calls: u32,
    }

    impl TargetSource for Shrinking {
        fn next_target(&mut self) -> Result<FieldState> {
            self.calls += 1;
            let count = if self.calls == 1 { 4 } else { 3 };
            Ok(FieldState {
                nodes: vec![Node::new(1.0, 1.0, 1.0); count],
                links: Vec::new(),
            })
        }
    }

    /// Accepts setup, then refuses every resize
    #[derive(Default)]
    struct FixedSurface(HeadlessRenderer);

    impl FrameRenderer for FixedSurface {
        fn initialize(&mut self, viewport: &Viewport, buffers: &GeometryBuffers) -> Result<()> {
            self.0.initialize(viewport, buffers)
        }

        fn resize(&mut self, _viewport: &Viewport) -> Result<()> {
            Err(Error::SetupFailure("surface cannot change size".to_string()))
        }

        fn render(&mut self, frame: Frame<'_>) -> Result<()> {
            self.0.render(frame)
        }
    }

    #[test]
    fn empty_viewport_is_a_setup_failure() {
        assert!(matches!(Viewport::new(0, 300, 1.0), Err(Error::SetupFailure(_))));
        assert!(matches!(Viewport::new(400, 0, 1.0), Err(Error::SetupFailure(_))));
        assert!(matches!(Viewport::new(400, 300, 0.0), Err(Error::SetupFailure(_))));
        assert!(matches!(
            Viewport::new(400, 300, f32::NAN),
            Err(Error::SetupFailure(_))
        ));
    }

    #[test]
    fn physical_size_applies_pixel_ratio() {
        let viewport = Viewport::new(400, 300, 2.0).unwrap();
        assert_eq!(viewport.physical_size(), (800, 600));
        let tiny = Viewport::new(1, 1, 0.25).unwrap();
        assert_eq!(tiny.physical_size(), (1, 1));
    }

    #[test]
    fn resize_updates_aspect_but_not_geometry() {
        let mut p = pipeline(400, 300);
        p.run_frame(16.0).unwrap();
        let nodes = p.scheduler().displayed().to_vec();
        let links = p.scheduler().links().to_vec();
        let points = p.buffers().points.as_slice().to_vec();

        p.resize(800, 600).unwrap();

        assert_eq!(p.camera().aspect, 800.0 / 600.0);
        assert_eq!(p.renderer().surface_size(), Some((800, 600)));
        assert_eq!(p.scheduler().displayed(), nodes.as_slice());
        assert_eq!(p.scheduler().links(), links.as_slice());
        assert_eq!(p.buffers().points.as_slice(), points.as_slice());
    }

    #[test]
    fn failed_resize_keeps_camera_and_viewport() {
        let viewport = Viewport::new(400, 300, 1.0).unwrap();
        let mut p =
            RenderPipeline::from_config(&small_config(), viewport, FixedSurface::default())
                .unwrap();

        let err = p.resize(800, 400).unwrap_err();

        assert!(matches!(err, Error::SetupFailure(_)));
        assert_eq!(p.viewport(), &viewport);
        assert_eq!(p.camera().aspect, 400.0 / 300.0);
        assert_eq!(p.renderer().0.surface_size(), Some((400, 300)));
    }

    #[test]
    fn zero_resize_is_ignored() {
        let mut p = pipeline(400, 300);
        p.resize(0, 600).unwrap();
        assert_eq!(p.viewport().width(), 400);
        assert_eq!(p.camera().aspect, 400.0 / 300.0);
    }

    #[test]
    fn frame_uploads_buffers_and_runs_passes_in_order() {
        let mut p = pipeline(400, 300);
        assert!(p.buffers().is_dirty());

        p.run_frame(250.0).unwrap();

        assert!(!p.buffers().is_dirty());
        assert_eq!(p.renderer().uploads(), 2);
        assert_eq!(p.renderer().points(), p.buffers().points.as_slice());
        assert_eq!(p.renderer().lines(), p.buffers().lines.as_slice());
        assert_eq!(
            p.renderer().executed_passes(),
            ["scene", "bloom-extract", "bloom-composite"]
        );
        // 8 nodes give 12 links under the divisor-2 rule
        assert_eq!(p.renderer().lines().len(), 12 * 6);
    }

    #[test]
    fn scene_only_composer_skips_bloom() {
        let mut p = pipeline(400, 300);
        p.set_composer(Composer::scene_only());
        p.run_frame(16.0).unwrap();
        assert_eq!(p.renderer().executed_passes(), ["scene"]);
    }

    #[test]
    fn group_turns_a_twelfth_of_pi_per_second() {
        let mut p = pipeline(400, 300);
        let report = p.run_frame(1000.0).unwrap();
        assert!((report.rotation_y - PI / 12.0).abs() < 1e-6);
        let model = p.renderer().last_uniforms().unwrap().model;
        assert_eq!(model, rotation_y(PI / 12.0));
    }

    #[test]
    fn input_is_applied_before_the_frame_is_drawn() {
        let mut p = pipeline(400, 300);
        let before = p.camera().distance;
        p.push_input(ControlInput::Zoom { steps: 2.0 });

        let report = p.run_frame(16.0).unwrap();

        assert_eq!(report.inputs_applied, 1);
        assert!(p.camera().distance < before);
        let uniforms = p.renderer().last_uniforms().unwrap();
        assert_eq!(uniforms.view, p.camera().view_matrix());
        assert_eq!(uniforms.camera_position, p.camera().position());
    }

    #[test]
    fn timestamps_become_deltas() {
        let mut p = pipeline(400, 300);
        assert_eq!(p.frame(16.0).unwrap().elapsed_ms, 16.0);
        assert_eq!(p.frame(48.0).unwrap().elapsed_ms, 32.0);
        assert_eq!(p.frame(40.0).unwrap().elapsed_ms, 0.0);
        assert_eq!(p.frame(56.0).unwrap().elapsed_ms, 16.0);
    }

    #[test]
    fn bad_delta_counts_as_no_time() {
        let mut p = pipeline(400, 300);
        let report = p.run_frame(f64::NAN).unwrap();
        assert_eq!(report.elapsed_ms, 0.0);
        assert_eq!(report.rotation_y, 0.0);
    }

    #[test]
    fn cycle_boundaries_are_counted() {
        let mut p = pipeline(400, 300);
        for _ in 0..4 {
            p.run_frame(500.0).unwrap();
        }
        let (stats, _) = p.teardown();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.cycles_completed, 2);
        assert_eq!(stats.regenerations, 2);
        assert_eq!(stats.total_elapsed_ms, 2000.0);
        assert_eq!(stats.fps(), 2.0);
    }

    #[test]
    fn teardown_releases_the_renderer() {
        let mut p = pipeline(400, 300);
        p.run_frame(16.0).unwrap();
        let uniforms = *p.renderer().last_uniforms().unwrap();
        let style = *p.style();
        let mut buffers = p.buffers().clone();

        let (stats, mut renderer) = p.teardown();

        assert_eq!(stats.frames, 1);
        assert!(renderer.is_released());
        assert!(renderer.points().is_empty());
        let late = renderer.render(Frame {
            uniforms,
            passes: Composer::scene_only().passes(),
            style: &style,
            buffers: &mut buffers,
            index: 1,
        });
        assert!(matches!(late, Err(Error::PreconditionViolation(_))));
        assert_eq!(renderer.frames(), 1);
    }

    #[test]
    fn bad_target_stops_the_frame_before_rendering() {
        let initial = FieldState {
            nodes: vec![Node::default(); 4],
            links: vec![Link::new(0, 3)],
        };
        let viewport = Viewport::new(400, 300, 1.0).unwrap();
        let mut p = RenderPipeline::new(
            &small_config(),
            viewport,
            initial,
            Shrinking { calls: 0 },
            HeadlessRenderer::new(),
        )
        .unwrap();

        let err = p.run_frame(1000.0).unwrap_err();
        assert!(matches!(err, Error::PreconditionViolation(_)));
        assert_eq!(p.renderer().frames(), 0);
    }
}
