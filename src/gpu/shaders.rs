//! WGSL shaders for the scene and bloom passes
//!
//! The scene shader draws lines and camera-facing point quads into an HDR
//! target. The post shaders run on a full-screen triangle: a bright pass,
//! a separable Gaussian blur and the final composite.

/// Scene uniform struct, bound at group 0 binding 0
pub const SCENE_UNIFORMS: &str = r#"
struct SceneUniforms {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    model: mat4x4<f32>,
    point_color: vec4<f32>,
    line_color: vec4<f32>,
    viewport: vec2<f32>,
    point_size: f32,
    _padding: f32,
}

@group(0) @binding(0) var<uniform> scene: SceneUniforms;
"#;

/// Line list straight from the line buffer
pub const LINE_SHADER: &str = r#"
@vertex
fn vs_line(@location(0) position: vec3<f32>) -> @builtin(position) vec4<f32> {
    return scene.projection * scene.view * scene.model * vec4<f32>(position, 1.0);
}

@fragment
fn fs_line() -> @location(0) vec4<f32> {
    return scene.line_color;
}
"#;

/// Instanced screen-facing quads, one instance per point
///
/// Size shrinks with depth: `point_size` pixels at a view depth of half the
/// viewport height.
pub const POINT_SHADER: &str = r#"
@vertex
fn vs_point(
    @builtin(vertex_index) vertex: u32,
    @location(0) center: vec3<f32>,
) -> @builtin(position) vec4<f32> {
    var corners = array<vec2<f32>, 6>(
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, 1.0),
    );

    let view_pos = scene.view * scene.model * vec4<f32>(center, 1.0);
    let clip = scene.projection * view_pos;
    let pixels = scene.point_size * scene.viewport.y * 0.5 / max(-view_pos.z, 0.001);
    let offset = corners[vertex] * pixels / scene.viewport * clip.w;
    return vec4<f32>(clip.xy + offset, clip.zw);
}

@fragment
fn fs_point() -> @location(0) vec4<f32> {
    return scene.point_color;
}
"#;

/// Full-screen triangle with UVs, origin top-left
pub const FULLSCREEN_VERTEX: &str = r#"
struct FullscreenOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) vertex: u32) -> FullscreenOutput {
    let x = f32((vertex << 1u) & 2u);
    let y = f32(vertex & 2u);
    var out: FullscreenOutput;
    out.position = vec4<f32>(x * 2.0 - 1.0, 1.0 - y * 2.0, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}
"#;

/// Post-processing uniform struct, bound at group 0 binding 0
pub const POST_UNIFORMS: &str = r#"
struct PostUniforms {
    texel_size: vec2<f32>,
    direction: vec2<f32>,
    threshold: f32,
    knee: f32,
    strength: f32,
    kernel_radius: f32,
    sigma: f32,
    _padding0: f32,
    _padding1: f32,
    _padding2: f32,
    level_weights: array<vec4<f32>, 2>,
}

@group(0) @binding(0) var<uniform> post: PostUniforms;
@group(0) @binding(1) var linear_sampler: sampler;
"#;

/// Bright pass and separable blur, both reading one source texture
pub const FILTER_SHADER: &str = r#"
@group(0) @binding(2) var source: texture_2d<f32>;

@fragment
fn fs_bright(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let texel = textureSample(source, linear_sampler, in.uv);
    let luma = dot(texel.rgb, vec3<f32>(0.299, 0.587, 0.114));
    let keep = smoothstep(post.threshold, post.threshold + post.knee, luma);
    return vec4<f32>(texel.rgb * keep, 1.0);
}

fn gaussian(x: f32, sigma: f32) -> f32 {
    return 0.39894 * exp(-0.5 * x * x / (sigma * sigma)) / sigma;
}

@fragment
fn fs_blur(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let stride = post.direction * post.texel_size;
    var weight_sum = gaussian(0.0, post.sigma);
    var sum = textureSample(source, linear_sampler, in.uv).rgb * weight_sum;
    let taps = i32(post.kernel_radius);
    for (var i = 1; i < taps; i++) {
        let x = f32(i);
        let w = gaussian(x, post.sigma);
        let offset = stride * x;
        sum += textureSample(source, linear_sampler, in.uv + offset).rgb * w;
        sum += textureSample(source, linear_sampler, in.uv - offset).rgb * w;
        weight_sum += 2.0 * w;
    }
    return vec4<f32>(sum / weight_sum, 1.0);
}
"#;

/// Scene plus weighted blur levels
pub const COMPOSITE_SHADER: &str = r#"
@group(0) @binding(2) var scene_texture: texture_2d<f32>;
@group(0) @binding(3) var blur0: texture_2d<f32>;
@group(0) @binding(4) var blur1: texture_2d<f32>;
@group(0) @binding(5) var blur2: texture_2d<f32>;
@group(0) @binding(6) var blur3: texture_2d<f32>;
@group(0) @binding(7) var blur4: texture_2d<f32>;

fn level_weight(level: u32) -> f32 {
    return post.level_weights[level / 4u][level % 4u];
}

@fragment
fn fs_composite(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let base = textureSample(scene_texture, linear_sampler, in.uv).rgb;
    let bloom = level_weight(0u) * textureSample(blur0, linear_sampler, in.uv).rgb
        + level_weight(1u) * textureSample(blur1, linear_sampler, in.uv).rgb
        + level_weight(2u) * textureSample(blur2, linear_sampler, in.uv).rgb
        + level_weight(3u) * textureSample(blur3, linear_sampler, in.uv).rgb
        + level_weight(4u) * textureSample(blur4, linear_sampler, in.uv).rgb;
    return vec4<f32>(base + post.strength * bloom, 1.0);
}
"#;

/// Lines and points
pub fn scene_shader() -> String {
    format!("{}{}{}", SCENE_UNIFORMS, LINE_SHADER, POINT_SHADER)
}

/// Bright pass and blur
pub fn filter_shader() -> String {
    format!("{}{}{}", FULLSCREEN_VERTEX, POST_UNIFORMS, FILTER_SHADER)
}

/// Final composite
pub fn composite_shader() -> String {
    format!("{}{}{}", FULLSCREEN_VERTEX, POST_UNIFORMS, COMPOSITE_SHADER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_shader_has_both_draws() {
        let src = scene_shader();
        for entry in ["fn vs_line", "fn fs_line", "fn vs_point", "fn fs_point"] {
            assert!(src.contains(entry), "missing {}", entry);
        }
        assert!(src.contains("struct SceneUniforms"));
    }

    #[test]
    fn post_shaders_share_the_fullscreen_triangle() {
        for src in [filter_shader(), composite_shader()] {
            assert!(src.contains("fn vs_fullscreen"));
            assert!(src.contains("struct PostUniforms"));
        }
        assert!(filter_shader().contains("fn fs_bright"));
        assert!(filter_shader().contains("fn fs_blur"));
        assert!(composite_shader().contains("fn fs_composite"));
    }

    #[test]
    fn composite_reads_every_blur_level() {
        let src = composite_shader();
        for level in 0..crate::gpu::BLOOM_MIP_LEVELS {
            assert!(src.contains(&format!("var blur{}:", level)));
            assert!(src.contains(&format!("level_weight({}u)", level)));
        }
        // Weights come from the uniforms, not from literals in the shader
        assert!(src.contains("post.level_weights"));
        assert!(!src.contains("0.8"));
    }
}
