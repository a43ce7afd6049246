//! GPU rendering backend (feature `gpu`)
//!
//! [`GpuRenderer`] implements [`FrameRenderer`](crate::pipeline::FrameRenderer)
//! with wgpu, drawing the field offscreen and running the bloom chain on the
//! GPU.
//!
//! # Example
//!
//! ```rust,ignore
//! use bloomfield::config::Config;
//! use bloomfield::gpu::GpuRenderer;
//! use bloomfield::pipeline::{RenderPipeline, Viewport};
//!
//! let renderer = GpuRenderer::headless()?;
//! let viewport = Viewport::new(800, 600, 1.0)?;
//! let mut pipeline = RenderPipeline::from_config(&Config::default(), viewport, renderer)?;
//! pipeline.run_frame(16.0)?;
//! let rgba = pipeline.renderer().read_pixels()?;
//! ```
//!
//! # Passes
//!
//! - **Scene**: lines, then size-attenuated point quads, into an HDR target
//! - **Bloom extract**: luminance high-pass at half resolution, then a
//!   separable Gaussian blur over [`BLOOM_MIP_LEVELS`] halving levels
//! - **Bloom composite**: scene plus weighted blur levels into an sRGB output

mod renderer;
mod shaders;
mod types;

pub use renderer::{GpuRenderer, create_render_device};
pub use shaders::{composite_shader, filter_shader, scene_shader};
pub use types::{
    BLOOM_FACTORS, BLOOM_KERNEL_SIZES, BLOOM_KNEE, BLOOM_MIP_LEVELS, PostUniforms, SceneUniforms,
    level_weight,
};
