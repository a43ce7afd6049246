//! wgpu backend for the render pipeline
//!
//! Draws into offscreen textures: the scene goes into an `Rgba16Float` HDR
//! target, bloom runs a bright pass and a blur chain at half resolution and
//! below, and the composite writes an `Rgba8UnormSrgb` output that
//! [`GpuRenderer::read_pixels`] can copy back.

use std::sync::Arc;

use tracing::{debug, info, trace};
use wgpu::util::DeviceExt;

use crate::buffer::{GeometryBuffers, VertexBuffer};
use crate::error::{Error, Result};
use crate::gpu::shaders::{composite_shader, filter_shader, scene_shader};
use crate::gpu::types::{BLOOM_MIP_LEVELS, PostUniforms, SceneUniforms};
use crate::pipeline::{Frame, FrameRenderer, Pass, Viewport};

const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

/// Bytes in one xyz position
const POSITION_STRIDE: u64 = 12;

/// Smallest device buffer created, so empty topologies still bind
const MIN_BUFFER_SIZE: u64 = 16;

/// A texture and its default view
struct Target {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
}

/// Horizontal then vertical blur at one resolution
struct BlurLevel {
    horizontal: Target,
    vertical: Target,
    horizontal_bind: wgpu::BindGroup,
    vertical_bind: wgpu::BindGroup,
    // Bind groups reference these; keep them alive alongside
    _horizontal_uniforms: wgpu::Buffer,
    _vertical_uniforms: wgpu::Buffer,
}

/// Everything that depends on the surface size
struct Targets {
    scene: Target,
    bright: Target,
    levels: Vec<BlurLevel>,
    output: Target,
    bright_uniforms: wgpu::Buffer,
    bright_bind: wgpu::BindGroup,
    composite_uniforms: wgpu::Buffer,
    composite_bind: wgpu::BindGroup,
    staging: wgpu::Buffer,
    padded_bytes_per_row: u32,
}

/// Device copies of the point and line buffers, sized once
struct DeviceGeometry {
    points: wgpu::Buffer,
    lines: wgpu::Buffer,
    point_floats: usize,
    line_floats: usize,
}

/// Offscreen wgpu renderer with a bloom post-process chain
pub struct GpuRenderer {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,

    line_pipeline: wgpu::RenderPipeline,
    point_pipeline: wgpu::RenderPipeline,
    bright_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,

    scene_buffer: wgpu::Buffer,
    scene_bind: wgpu::BindGroup,
    filter_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    geometry: Option<DeviceGeometry>,
    targets: Option<Targets>,
    background: wgpu::Color,
    frames: u64,
}

impl GpuRenderer {
    /// Compile the shaders and build the pipelines. Buffers and render
    /// targets are created by [`FrameRenderer::initialize`].
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let scene_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scene Shader"),
            source: wgpu::ShaderSource::Wgsl(scene_shader().into()),
        });
        let filter_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bloom Filter Shader"),
            source: wgpu::ShaderSource::Wgsl(filter_shader().into()),
        });
        let composite_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Bloom Composite Shader"),
            source: wgpu::ShaderSource::Wgsl(composite_shader().into()),
        });

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[uniform_entry(
                0,
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            )],
        });
        let filter_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Filter Bind Group Layout"),
            entries: &[
                uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
                sampler_entry(1),
                texture_entry(2),
            ],
        });
        let mut composite_entries = vec![
            uniform_entry(0, wgpu::ShaderStages::FRAGMENT),
            sampler_entry(1),
            texture_entry(2),
        ];
        composite_entries.extend((0..BLOOM_MIP_LEVELS as u32).map(|i| texture_entry(3 + i)));
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Composite Bind Group Layout"),
            entries: &composite_entries,
        });

        let scene_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Scene Pipeline Layout"),
            bind_group_layouts: &[&scene_layout],
            push_constant_ranges: &[],
        });
        let filter_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Bloom Filter Pipeline Layout"),
                bind_group_layouts: &[&filter_layout],
                push_constant_ranges: &[],
            });
        let composite_pipeline_layout =
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("Bloom Composite Pipeline Layout"),
                bind_group_layouts: &[&composite_layout],
                push_constant_ranges: &[],
            });

        let position_attributes = [wgpu::VertexAttribute {
            format: wgpu::VertexFormat::Float32x3,
            offset: 0,
            shader_location: 0,
        }];

        // Lines: two vertices per link, read straight from the line buffer
        let line_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Line Pipeline"),
            layout: Some(&scene_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &scene_module,
                entry_point: Some("vs_line"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: POSITION_STRIDE,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &position_attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &scene_module,
                entry_point: Some("fs_line"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Points: one instanced quad per node
        let point_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Point Pipeline"),
            layout: Some(&scene_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &scene_module,
                entry_point: Some("vs_point"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: POSITION_STRIDE,
                    step_mode: wgpu::VertexStepMode::Instance,
                    attributes: &position_attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &scene_module,
                entry_point: Some("fs_point"),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: HDR_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let bright_pipeline = fullscreen_pipeline(
            &device,
            "Bloom Bright Pipeline",
            &filter_pipeline_layout,
            &filter_module,
            "fs_bright",
            HDR_FORMAT,
        );
        let blur_pipeline = fullscreen_pipeline(
            &device,
            "Bloom Blur Pipeline",
            &filter_pipeline_layout,
            &filter_module,
            "fs_blur",
            HDR_FORMAT,
        );
        let composite_pipeline = fullscreen_pipeline(
            &device,
            "Bloom Composite Pipeline",
            &composite_pipeline_layout,
            &composite_module,
            "fs_composite",
            OUTPUT_FORMAT,
        );

        let scene_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Scene Uniform Buffer"),
            size: std::mem::size_of::<SceneUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let scene_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scene Bind Group"),
            layout: &scene_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: scene_buffer.as_entire_binding(),
            }],
        });

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Bloom Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            line_pipeline,
            point_pipeline,
            bright_pipeline,
            blur_pipeline,
            composite_pipeline,
            scene_buffer,
            scene_bind,
            filter_layout,
            composite_layout,
            sampler,
            geometry: None,
            targets: None,
            background: wgpu::Color::BLACK,
            frames: 0,
        }
    }

    /// Create a device with [`create_render_device`] and a renderer on it
    pub fn headless() -> Result<Self> {
        let (device, queue) = pollster::block_on(create_render_device())?;
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Output texture size in pixels, once initialised
    pub fn output_size(&self) -> Option<(u32, u32)> {
        self.targets.as_ref().map(|t| t.output.size)
    }

    /// Number of frames submitted
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Read back the composited image as tightly packed RGBA8 (sRGB) rows.
    ///
    /// Blocks until the GPU has finished the copy.
    pub fn read_pixels(&self) -> Result<Vec<u8>> {
        let targets = self.targets.as_ref().ok_or_else(|| {
            Error::PreconditionViolation("read_pixels called before initialize".to_string())
        })?;
        let (width, height) = targets.output.size;
        let unpadded_bytes_per_row = width * 4;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &targets.output.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &targets.staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(targets.padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            extent(targets.output.size),
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = targets.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| Error::SetupFailure(format!("readback channel closed: {}", e)))?
            .map_err(|e| Error::SetupFailure(format!("failed to map readback buffer: {}", e)))?;

        let data = slice.get_mapped_range();
        let mut pixels = Vec::with_capacity((unpadded_bytes_per_row * height) as usize);
        for row in 0..height {
            let start = (row * targets.padded_bytes_per_row) as usize;
            pixels.extend_from_slice(&data[start..start + unpadded_bytes_per_row as usize]);
        }
        drop(data);
        targets.staging.unmap();
        Ok(pixels)
    }

    fn create_geometry(&self, buffers: &GeometryBuffers) -> DeviceGeometry {
        let create = |label: &str, host: &VertexBuffer| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: (host.byte_len() as u64).max(MIN_BUFFER_SIZE),
                usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        DeviceGeometry {
            points: create("Point Vertex Buffer", &buffers.points),
            lines: create("Line Vertex Buffer", &buffers.lines),
            point_floats: buffers.points.len(),
            line_floats: buffers.lines.len(),
        }
    }

    fn create_targets(&self, size: (u32, u32)) -> Targets {
        let sampled = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING;
        let scene = self.target("Scene HDR Target", size, HDR_FORMAT, sampled);
        let bright_size = half(size);
        let bright = self.target("Bloom Bright Target", bright_size, HDR_FORMAT, sampled);
        let output = self.target(
            "Output Target",
            size,
            OUTPUT_FORMAT,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );

        let bright_uniforms = self.uniform_buffer("Bloom Bright Uniforms", &PostUniforms::default());
        let bright_bind = self.filter_bind("Bloom Bright Bind Group", &bright_uniforms, &scene.view);

        let mut levels: Vec<BlurLevel> = Vec::with_capacity(BLOOM_MIP_LEVELS);
        let mut level_size = bright_size;
        for level in 0..BLOOM_MIP_LEVELS {
            let horizontal = self.target("Bloom Blur Horizontal", level_size, HDR_FORMAT, sampled);
            let vertical = self.target("Bloom Blur Vertical", level_size, HDR_FORMAT, sampled);
            let h_uniforms = self.uniform_buffer(
                "Bloom Blur Horizontal Uniforms",
                &PostUniforms::blur(level, level_size, [1.0, 0.0]),
            );
            let v_uniforms = self.uniform_buffer(
                "Bloom Blur Vertical Uniforms",
                &PostUniforms::blur(level, level_size, [0.0, 1.0]),
            );
            // Each level blurs the previous level's result, downsampling as it reads
            let source = match levels.last() {
                Some(previous) => &previous.vertical.view,
                None => &bright.view,
            };
            let horizontal_bind =
                self.filter_bind("Bloom Blur Horizontal Bind Group", &h_uniforms, source);
            let vertical_bind =
                self.filter_bind("Bloom Blur Vertical Bind Group", &v_uniforms, &horizontal.view);
            levels.push(BlurLevel {
                horizontal,
                vertical,
                horizontal_bind,
                vertical_bind,
                _horizontal_uniforms: h_uniforms,
                _vertical_uniforms: v_uniforms,
            });
            level_size = half(level_size);
        }

        let composite_uniforms =
            self.uniform_buffer("Bloom Composite Uniforms", &PostUniforms::default());
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: composite_uniforms.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(&self.sampler),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(&scene.view),
            },
        ];
        entries.extend(levels.iter().zip(3u32..).map(|(level, binding)| {
            wgpu::BindGroupEntry {
                binding,
                resource: wgpu::BindingResource::TextureView(&level.vertical.view),
            }
        }));
        let composite_bind = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Composite Bind Group"),
            layout: &self.composite_layout,
            entries: &entries,
        });

        let padded_bytes_per_row = padded_bytes_per_row(size.0);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size: padded_bytes_per_row as u64 * size.1 as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        debug!(width = size.0, height = size.1, "created render targets");
        Targets {
            scene,
            bright,
            levels,
            output,
            bright_uniforms,
            bright_bind,
            composite_uniforms,
            composite_bind,
            staging,
            padded_bytes_per_row,
        }
    }

    fn target(
        &self,
        label: &str,
        size: (u32, u32),
        format: wgpu::TextureFormat,
        usage: wgpu::TextureUsages,
    ) -> Target {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(size),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Target {
            texture,
            view,
            size,
        }
    }

    fn uniform_buffer(&self, label: &str, uniforms: &PostUniforms) -> wgpu::Buffer {
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(uniforms),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            })
    }

    fn filter_bind(
        &self,
        label: &str,
        uniforms: &wgpu::Buffer,
        source: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.filter_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(source),
                },
            ],
        })
    }

    fn encode_scene(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        targets: &Targets,
        geometry: &DeviceGeometry,
        buffers: &GeometryBuffers,
    ) {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(Pass::Scene.label()),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &targets.scene.view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.background),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        // Lines first so points draw over them
        let line_vertices = buffers.lines.vertex_count() as u32;
        if line_vertices > 0 {
            pass.set_pipeline(&self.line_pipeline);
            pass.set_bind_group(0, &self.scene_bind, &[]);
            pass.set_vertex_buffer(0, geometry.lines.slice(..));
            pass.draw(0..line_vertices, 0..1);
        }

        let point_count = buffers.points.vertex_count() as u32;
        if point_count > 0 {
            pass.set_pipeline(&self.point_pipeline);
            pass.set_bind_group(0, &self.scene_bind, &[]);
            pass.set_vertex_buffer(0, geometry.points.slice(..));
            pass.draw(0..6, 0..point_count);
        }
    }

    fn encode_bloom(&self, encoder: &mut wgpu::CommandEncoder, targets: &Targets) {
        fullscreen_pass(
            encoder,
            "bloom-bright",
            &self.bright_pipeline,
            &targets.bright_bind,
            &targets.bright.view,
        );
        for level in &targets.levels {
            fullscreen_pass(
                encoder,
                "bloom-blur-horizontal",
                &self.blur_pipeline,
                &level.horizontal_bind,
                &level.horizontal.view,
            );
            fullscreen_pass(
                encoder,
                "bloom-blur-vertical",
                &self.blur_pipeline,
                &level.vertical_bind,
                &level.vertical.view,
            );
        }
    }

    fn encode_composite(&self, encoder: &mut wgpu::CommandEncoder, targets: &Targets) {
        fullscreen_pass(
            encoder,
            "bloom-composite",
            &self.composite_pipeline,
            &targets.composite_bind,
            &targets.output.view,
        );
    }
}

impl FrameRenderer for GpuRenderer {
    fn initialize(&mut self, viewport: &Viewport, buffers: &GeometryBuffers) -> Result<()> {
        let limits = self.device.limits();
        check_buffer_size(&limits, "point", buffers.points.byte_len() as u64)?;
        check_buffer_size(&limits, "line", buffers.lines.byte_len() as u64)?;
        check_target_size(&limits, viewport.physical_size())?;

        self.geometry = Some(self.create_geometry(buffers));
        self.targets = Some(self.create_targets(viewport.physical_size()));
        let (width, height) = viewport.physical_size();
        info!(
            width,
            height,
            points = buffers.points.vertex_count(),
            line_vertices = buffers.lines.vertex_count(),
            "gpu renderer initialised"
        );
        Ok(())
    }

    fn resize(&mut self, viewport: &Viewport) -> Result<()> {
        let size = viewport.physical_size();
        match &self.targets {
            None => Err(Error::PreconditionViolation(
                "resize called before initialize".to_string(),
            )),
            Some(targets) if targets.output.size == size => Ok(()),
            Some(_) => {
                check_target_size(&self.device.limits(), size)?;
                self.targets = Some(self.create_targets(size));
                Ok(())
            }
        }
    }

    fn render(&mut self, frame: Frame<'_>) -> Result<()> {
        let (Some(geometry), Some(targets)) = (&self.geometry, &self.targets) else {
            return Err(Error::PreconditionViolation(
                "render called before initialize or after release".to_string(),
            ));
        };

        upload(&self.queue, &geometry.points, geometry.point_floats, &mut frame.buffers.points)?;
        upload(&self.queue, &geometry.lines, geometry.line_floats, &mut frame.buffers.lines)?;

        let [r, g, b] = frame.style.background;
        self.background = wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: 1.0,
        };
        self.queue.write_buffer(
            &self.scene_buffer,
            0,
            bytemuck::bytes_of(&SceneUniforms::new(&frame.uniforms, frame.style)),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });

        let mut composited = false;
        for pass in frame.passes {
            match *pass {
                Pass::Scene => self.encode_scene(&mut encoder, targets, geometry, frame.buffers),
                Pass::BloomExtract { threshold } => {
                    self.queue.write_buffer(
                        &targets.bright_uniforms,
                        0,
                        bytemuck::bytes_of(&PostUniforms::bright(threshold)),
                    );
                    self.encode_bloom(&mut encoder, targets);
                }
                Pass::BloomComposite { strength, radius } => {
                    self.queue.write_buffer(
                        &targets.composite_uniforms,
                        0,
                        bytemuck::bytes_of(&PostUniforms::composite(strength, radius)),
                    );
                    self.encode_composite(&mut encoder, targets);
                    composited = true;
                }
            }
        }
        // Without a composite pass the scene is still copied to the output
        if !composited {
            self.queue.write_buffer(
                &targets.composite_uniforms,
                0,
                bytemuck::bytes_of(&PostUniforms::composite(0.0, 0.0)),
            );
            self.encode_composite(&mut encoder, targets);
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        self.frames += 1;
        trace!(frame = frame.index, "gpu frame submitted");
        Ok(())
    }

    fn release(&mut self) {
        self.targets = None;
        self.geometry = None;
        debug!(frames = self.frames, "gpu renderer released");
    }
}

/// Queue a dirty host buffer for upload and mark it clean
fn upload(
    queue: &wgpu::Queue,
    device_buffer: &wgpu::Buffer,
    capacity_floats: usize,
    host: &mut VertexBuffer,
) -> Result<()> {
    if !host.is_dirty() {
        return Ok(());
    }
    if host.len() != capacity_floats {
        return Err(Error::PreconditionViolation(format!(
            "device buffer holds {} floats, host buffer {}",
            capacity_floats,
            host.len()
        )));
    }
    if !host.is_empty() {
        queue.write_buffer(device_buffer, 0, bytemuck::cast_slice(host.as_slice()));
    }
    host.mark_uploaded();
    Ok(())
}

fn fullscreen_pass(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
    target: &wgpu::TextureView,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    pass.set_pipeline(pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..3, 0..1);
}

fn fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    fragment_entry: &str,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_fullscreen"),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn uniform_entry(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn extent((width, height): (u32, u32)) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

fn half((width, height): (u32, u32)) -> (u32, u32) {
    ((width / 2).max(1), (height / 2).max(1))
}

/// Readback row length in bytes, padded to the copy alignment
fn padded_bytes_per_row(width: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    (width * 4).div_ceil(align) * align
}

/// Render targets and the readback buffer must fit the device limits;
/// wgpu panics on oversized resources instead of returning an error.
fn check_target_size(limits: &wgpu::Limits, (width, height): (u32, u32)) -> Result<()> {
    let max = limits.max_texture_dimension_2d;
    if width > max || height > max {
        return Err(Error::SetupFailure(format!(
            "render target {}x{} exceeds the device limit of {} pixels",
            width, height, max
        )));
    }
    check_buffer_size(
        limits,
        "readback",
        padded_bytes_per_row(width) as u64 * height as u64,
    )
}

fn check_buffer_size(limits: &wgpu::Limits, label: &str, bytes: u64) -> Result<()> {
    if bytes > limits.max_buffer_size {
        return Err(Error::SetupFailure(format!(
            "{} buffer needs {} bytes, device allows {}",
            label, bytes, limits.max_buffer_size
        )));
    }
    Ok(())
}

/// Create a device and queue with no surface attached.
///
/// Adapter or device failures are reported as [`Error::SetupFailure`].
pub async fn create_render_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .ok_or_else(|| Error::SetupFailure("no GPU adapter available".to_string()))?;

    adapter
        .request_device(&wgpu::DeviceDescriptor::default(), None)
        .await
        .map_err(|e| Error::SetupFailure(format!("failed to create GPU device: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Color, Config};
    use crate::field::{FieldState, Link, Node};
    use crate::pipeline::{Composer, RenderPipeline};
    use crate::scheduler::TargetSource;

    /// Keeps handing out the same positions
    struct Still(FieldState);

    impl TargetSource for Still {
        fn next_target(&mut self) -> Result<FieldState> {
            Ok(FieldState {
                nodes: self.0.nodes.clone(),
                links: Vec::new(),
            })
        }
    }

    fn renderer() -> Option<GpuRenderer> {
        match GpuRenderer::headless() {
            Ok(r) => Some(r),
            Err(e) => {
                eprintln!("skipping GPU test: {}", e);
                None
            }
        }
    }

    fn field() -> FieldState {
        FieldState {
            nodes: vec![Node::new(0.0, 0.0, 0.0), Node::new(200.0, 0.0, 0.0)],
            links: vec![Link::new(0, 1)],
        }
    }

    fn pipeline(
        renderer: GpuRenderer,
        width: u32,
        height: u32,
    ) -> RenderPipeline<GpuRenderer, Still> {
        let config = Config {
            point_size: 100.0,
            ..Config::default()
        };
        let viewport = Viewport::new(width, height, 1.0).unwrap();
        let initial = field();
        let source = Still(initial.clone());
        RenderPipeline::new(&config, viewport, initial, source, renderer).unwrap()
    }

    #[test]
    fn target_sizes_are_checked_against_device_limits() {
        let limits = wgpu::Limits::default();
        assert!(check_target_size(&limits, (800, 600)).is_ok());
        assert!(check_target_size(&limits, (8192, 8192)).is_ok());
        assert!(matches!(
            check_target_size(&limits, (10_000, 600)),
            Err(Error::SetupFailure(_))
        ));
        assert!(matches!(
            check_target_size(&limits, (600, 10_000)),
            Err(Error::SetupFailure(_))
        ));
    }

    #[test]
    fn buffer_sizes_are_checked_against_device_limits() {
        let limits = wgpu::Limits::default();
        assert!(check_buffer_size(&limits, "line", limits.max_buffer_size).is_ok());
        let err = check_buffer_size(&limits, "line", limits.max_buffer_size + 1).unwrap_err();
        assert!(matches!(err, Error::SetupFailure(_)));
        assert!(err.to_string().contains("line buffer"));
    }

    #[test]
    fn readback_rows_are_padded() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn oversized_viewport_fails_setup() {
        let Some(renderer) = renderer() else {
            return;
        };
        let max = renderer.device.limits().max_texture_dimension_2d;
        let viewport = Viewport::new(max + 1, 16, 1.0).unwrap();
        let initial = field();
        let source = Still(initial.clone());
        let result = RenderPipeline::new(&Config::default(), viewport, initial, source, renderer);
        assert!(matches!(result, Err(Error::SetupFailure(_))));
    }

    #[test]
    fn render_before_initialize_fails() {
        let Some(mut renderer) = renderer() else {
            return;
        };
        let viewport = Viewport::new(64, 64, 1.0).unwrap();
        assert!(renderer.resize(&viewport).is_err());
        assert!(renderer.read_pixels().is_err());
    }

    #[test]
    fn frame_renders_bloomed_points_over_black() {
        let Some(renderer) = renderer() else {
            return;
        };
        let mut p = pipeline(renderer, 160, 120);
        p.run_frame(16.0).unwrap();

        assert!(!p.buffers().is_dirty());
        assert_eq!(p.renderer().frames(), 1);

        let pixels = p.renderer().read_pixels().unwrap();
        assert_eq!(pixels.len(), 160 * 120 * 4);
        let lit = pixels.chunks(4).filter(|px| px[1] > 32 || px[2] > 32).count();
        assert!(lit > 0, "expected cyan pixels from the points");
        // Cyan carries no red; bloom adds only cyan too
        assert!(pixels.chunks(4).all(|px| px[0] <= px[1].max(px[2])));
    }

    #[test]
    fn scene_only_frame_still_reaches_the_output() {
        let Some(renderer) = renderer() else {
            return;
        };
        let mut p = pipeline(renderer, 96, 96);
        p.set_composer(Composer::scene_only());
        p.run_frame(16.0).unwrap();
        let pixels = p.renderer().read_pixels().unwrap();
        assert!(pixels.chunks(4).any(|px| px[2] > 32));
    }

    #[test]
    fn resize_recreates_targets_only() {
        let Some(renderer) = renderer() else {
            return;
        };
        let mut p = pipeline(renderer, 64, 48);
        p.run_frame(16.0).unwrap();
        p.resize(128, 96).unwrap();
        assert_eq!(p.renderer().output_size(), Some((128, 96)));

        p.run_frame(16.0).unwrap();
        let pixels = p.renderer().read_pixels().unwrap();
        assert_eq!(pixels.len(), 128 * 96 * 4);
    }

    #[test]
    fn teardown_releases_device_resources() {
        let Some(renderer) = renderer() else {
            return;
        };
        let mut p = pipeline(renderer, 32, 32);
        p.run_frame(16.0).unwrap();
        let (stats, renderer) = p.teardown();
        assert_eq!(stats.frames, 1);
        assert_eq!(renderer.output_size(), None);
        assert!(renderer.read_pixels().is_err());
    }

    #[test]
    fn overlapping_points_do_not_brighten() {
        let Some(renderer) = renderer() else {
            return;
        };
        let config = Config {
            point_size: 100.0,
            point_color: Color::from_hex(0x404040),
            ..Config::default()
        };
        let initial = FieldState {
            nodes: vec![Node::new(0.0, 0.0, 0.0); 2],
            links: Vec::new(),
        };
        let source = Still(initial.clone());
        let viewport = Viewport::new(64, 64, 1.0).unwrap();
        let mut p = RenderPipeline::new(&config, viewport, initial, source, renderer).unwrap();
        p.set_composer(Composer::scene_only());
        p.run_frame(16.0).unwrap();

        let pixels = p.renderer().read_pixels().unwrap();
        let center = (32 * 64 + 32) * 4;
        // One point's colour, not the sum of two
        assert!(pixels[center].abs_diff(0x40) <= 2, "got {}", pixels[center]);
    }
}
