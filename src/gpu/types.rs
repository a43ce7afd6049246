//! Uniform buffer layouts shared with the WGSL shaders
//!
//! All types are `repr(C)` and `Pod` so they can be written to GPU buffers
//! with `bytemuck::bytes_of`. Field order and padding mirror the WGSL
//! structs in `shaders.rs`.

use bytemuck::{Pod, Zeroable};

use crate::pipeline::{FrameUniforms, SceneStyle};

/// Number of blur levels in the bloom chain
pub const BLOOM_MIP_LEVELS: usize = 5;

/// Contribution of each blur level before the radius mix, finest first
pub const BLOOM_FACTORS: [f32; BLOOM_MIP_LEVELS] = [1.0, 0.8, 0.6, 0.4, 0.2];

/// Gaussian kernel size per blur level; sigma equals the size
pub const BLOOM_KERNEL_SIZES: [u32; BLOOM_MIP_LEVELS] = [3, 5, 7, 9, 11];

/// Luminance range over which the bright pass fades in above the threshold
pub const BLOOM_KNEE: f32 = 0.01;

/// Camera, model and material data for the scene pass
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SceneUniforms {
    /// World to camera space
    pub view: [[f32; 4]; 4],
    /// Camera to clip space
    pub projection: [[f32; 4]; 4],
    /// Scene group rotation
    pub model: [[f32; 4]; 4],
    /// Linear RGBA
    pub point_color: [f32; 4],
    /// Linear RGBA
    pub line_color: [f32; 4],
    /// Render target size in pixels
    pub viewport: [f32; 2],
    /// Point size in pixels at a depth of half the viewport height
    pub point_size: f32,
    pub _padding: f32,
}

impl SceneUniforms {
    pub fn new(frame: &FrameUniforms, style: &SceneStyle) -> Self {
        let [pr, pg, pb] = style.point_color;
        let [lr, lg, lb] = style.line_color;
        Self {
            view: frame.view,
            projection: frame.projection,
            model: frame.model,
            point_color: [pr, pg, pb, 1.0],
            line_color: [lr, lg, lb, 1.0],
            viewport: frame.viewport,
            point_size: style.point_size,
            _padding: 0.0,
        }
    }
}

/// Parameters for one full-screen post-processing draw
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct PostUniforms {
    /// One texel of the target, in UV units
    pub texel_size: [f32; 2],
    /// Blur axis, (1, 0) or (0, 1)
    pub direction: [f32; 2],
    pub threshold: f32,
    pub knee: f32,
    pub strength: f32,
    pub kernel_radius: f32,
    pub sigma: f32,
    pub _padding: [f32; 3],
    /// Composite weight of each blur level, finest first, four per vec4
    pub level_weights: [[f32; 4]; 2],
}

impl PostUniforms {
    /// Bright pass keeping luminance above `threshold`
    pub fn bright(threshold: f32) -> Self {
        Self {
            threshold,
            knee: BLOOM_KNEE,
            ..Self::default()
        }
    }

    /// One direction of the blur at `level`, drawn into a `size` target
    pub fn blur(level: usize, size: (u32, u32), direction: [f32; 2]) -> Self {
        let kernel = BLOOM_KERNEL_SIZES[level.min(BLOOM_MIP_LEVELS - 1)] as f32;
        Self {
            texel_size: [1.0 / size.0 as f32, 1.0 / size.1 as f32],
            direction,
            kernel_radius: kernel,
            sigma: kernel,
            ..Self::default()
        }
    }

    /// Composite of the scene and the blur levels
    pub fn composite(strength: f32, radius: f32) -> Self {
        let mut level_weights = [[0.0; 4]; 2];
        for level in 0..BLOOM_MIP_LEVELS {
            level_weights[level / 4][level % 4] = level_weight(level, radius);
        }
        Self {
            strength,
            level_weights,
            ..Self::default()
        }
    }
}

/// Weight of blur level `level` for a given bloom radius
pub fn level_weight(level: usize, radius: f32) -> f32 {
    let factor = BLOOM_FACTORS[level];
    factor + (1.2 - 2.0 * factor) * radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::IDENTITY;

    #[test]
    fn uniform_sizes_match_wgsl() {
        assert_eq!(std::mem::size_of::<SceneUniforms>(), 240);
        assert_eq!(std::mem::size_of::<PostUniforms>(), 80);
        assert_eq!(std::mem::size_of::<SceneUniforms>() % 16, 0);
        assert_eq!(std::mem::size_of::<PostUniforms>() % 16, 0);
    }

    #[test]
    fn scene_uniforms_carry_frame_and_style() {
        let frame = FrameUniforms {
            view: IDENTITY,
            projection: IDENTITY,
            model: IDENTITY,
            camera_position: [0.0, 0.0, 10.0],
            viewport: [800.0, 600.0],
        };
        let style = SceneStyle {
            point_size: 5.0,
            point_color: [0.0, 1.0, 1.0],
            line_color: [0.1, 0.1, 0.1],
            background: [0.0; 3],
        };
        let u = SceneUniforms::new(&frame, &style);
        assert_eq!(u.point_color, [0.0, 1.0, 1.0, 1.0]);
        assert_eq!(u.line_color, [0.1, 0.1, 0.1, 1.0]);
        assert_eq!(u.viewport, [800.0, 600.0]);
        assert_eq!(u.point_size, 5.0);
    }

    #[test]
    fn radius_mixes_level_weights() {
        // radius 0 keeps the factors, radius 1 mirrors them around 0.6
        assert_eq!(level_weight(0, 0.0), 1.0);
        assert!((level_weight(0, 1.0) - 0.2).abs() < 1e-6);
        assert!((level_weight(4, 1.0) - 1.0).abs() < 1e-6);
        assert!((level_weight(2, 0.5) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn composite_uniforms_carry_level_weights() {
        let u = PostUniforms::composite(1.5, 0.25);
        assert_eq!(u.strength, 1.5);
        let flat: Vec<f32> = u.level_weights.iter().flatten().copied().collect();
        for (level, weight) in flat.iter().take(BLOOM_MIP_LEVELS).enumerate() {
            assert_eq!(*weight, level_weight(level, 0.25));
        }
        assert!(flat[BLOOM_MIP_LEVELS..].iter().all(|w| *w == 0.0));
    }

    #[test]
    fn blur_uniforms_use_level_kernel() {
        let u = PostUniforms::blur(3, (100, 50), [1.0, 0.0]);
        assert_eq!(u.kernel_radius, 9.0);
        assert_eq!(u.sigma, 9.0);
        assert_eq!(u.texel_size, [0.01, 0.02]);
    }
}
