//! Caster rasterization and technique encode passes.
//!
//! All techniques share one rasterization path: the caller's draw callback
//! records caster draws into a [`CasterPass`] whose per-cascade uniform is
//! selected by a dynamic offset. DepthOnly rasterizes straight into the
//! slice. Moment techniques rasterize into the shared scratch depth buffer
//! and then run a fullscreen encode pass that writes the slice.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use umbra_math::Aabb;
use umbra_shadow::{Cascade, CascadeSet, MAX_CASCADES, ShadowTechnique, TechniqueParams};
use wgpu::util::DeviceExt;

use crate::binding::{BindingSet, BindingTracker, Keyed};
use crate::shadow_map::{SHADOW_DEPTH_FORMAT, ShadowMapArray};

/// Fragments of cutout casters with alpha below this are discarded.
pub const DEFAULT_ALPHA_CUTOFF: f32 = 0.5;

/// Depth cleared into every slice before casters draw; nothing lies
/// farther from the light.
pub const DEPTH_CLEAR_VALUE: f32 = 1.0;

/// WGSL source for caster rasterization.
pub const CASTER_SHADER_SOURCE: &str = r#"
struct CasterUniform {
    view_proj: mat4x4<f32>,
    // x: alpha cutoff
    params: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> caster: CasterUniform;

@group(1) @binding(0)
var cutout_texture: texture_2d<f32>;

@group(1) @binding(1)
var cutout_sampler: sampler;

struct CasterInput {
    @location(0) position: vec3<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) model_0: vec4<f32>,
    @location(3) model_1: vec4<f32>,
    @location(4) model_2: vec4<f32>,
    @location(5) model_3: vec4<f32>,
};

struct CasterOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_caster(in: CasterInput) -> CasterOutput {
    let model = mat4x4<f32>(in.model_0, in.model_1, in.model_2, in.model_3);
    var out: CasterOutput;
    out.clip_position = caster.view_proj * model * vec4<f32>(in.position, 1.0);
    out.uv = in.uv;
    return out;
}

@fragment
fn fs_cutout(in: CasterOutput) {
    let alpha = textureSample(cutout_texture, cutout_sampler, in.uv).a;
    if alpha < caster.params.x {
        discard;
    }
}
"#;

/// WGSL source for the encode passes: one fragment entry per moment
/// technique, each reading the scratch depth buffer.
pub const ENCODE_SHADER_SOURCE: &str = r#"
struct EncodeParams {
    // x: ESM exponent, y: EVSM positive exponent, z: EVSM negative exponent
    exponents: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> params: EncodeParams;

@group(1) @binding(0)
var scratch_depth: texture_depth_2d;

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
};

@vertex
fn vs_fullscreen(@builtin(vertex_index) idx: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    return out;
}

fn load_depth(position: vec4<f32>) -> f32 {
    return textureLoad(scratch_depth, vec2<i32>(position.xy), 0);
}

// Both components increase with depth.
fn warp_depth(depth: f32) -> vec2<f32> {
    let d = 2.0 * depth - 1.0;
    return vec2<f32>(exp(params.exponents.y * d), -exp(-params.exponents.z * d));
}

@fragment
fn fs_vsm(in: VertexOutput) -> @location(0) vec2<f32> {
    let d = load_depth(in.position);
    return vec2<f32>(d, d * d);
}

// Stored as the exponent c * d; decode and blur work in that log form.
@fragment
fn fs_esm(in: VertexOutput) -> @location(0) f32 {
    return params.exponents.x * load_depth(in.position);
}

@fragment
fn fs_evsm2(in: VertexOutput) -> @location(0) vec2<f32> {
    let w = warp_depth(load_depth(in.position));
    return vec2<f32>(w.x, w.x * w.x);
}

@fragment
fn fs_evsm4(in: VertexOutput) -> @location(0) vec4<f32> {
    let w = warp_depth(load_depth(in.position));
    return vec4<f32>(w.x, w.x * w.x, w.y, w.y * w.y);
}
"#;

/// Fragment entry point of the encode pass, `None` for DepthOnly.
pub fn encode_entry_point(technique: ShadowTechnique) -> Option<&'static str> {
    match technique {
        ShadowTechnique::DepthOnly => None,
        ShadowTechnique::Vsm => Some("fs_vsm"),
        ShadowTechnique::Esm => Some("fs_esm"),
        ShadowTechnique::Evsm2 => Some("fs_evsm2"),
        ShadowTechnique::Evsm4 => Some("fs_evsm4"),
    }
}

/// Caster vertex: object-space position and cutout texture coordinate.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CasterVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl CasterVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] = [
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        },
        wgpu::VertexAttribute {
            offset: 12,
            shader_location: 1,
            format: wgpu::VertexFormat::Float32x2,
        },
    ];

    pub fn new(position: [f32; 3], uv: [f32; 2]) -> Self {
        Self { position, uv }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<CasterVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Per-instance object-to-world transform.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CasterInstance {
    pub model: [[f32; 4]; 4],
}

impl CasterInstance {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = [
        wgpu::VertexAttribute {
            offset: 0,
            shader_location: 2,
            format: wgpu::VertexFormat::Float32x4,
        },
        wgpu::VertexAttribute {
            offset: 16,
            shader_location: 3,
            format: wgpu::VertexFormat::Float32x4,
        },
        wgpu::VertexAttribute {
            offset: 32,
            shader_location: 4,
            format: wgpu::VertexFormat::Float32x4,
        },
        wgpu::VertexAttribute {
            offset: 48,
            shader_location: 5,
            format: wgpu::VertexFormat::Float32x4,
        },
    ];

    pub fn new(model: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
        }
    }

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<CasterInstance>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Per-cascade caster uniform, one copy per cascade at a dynamic offset.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct CasterUniform {
    pub view_proj: [[f32; 4]; 4],
    pub params: [f32; 4],
}

/// Encode-pass exponents.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct EncodeParams {
    pub exponents: [f32; 4],
}

impl From<&TechniqueParams> for EncodeParams {
    fn from(params: &TechniqueParams) -> Self {
        Self {
            exponents: [
                params.esm_exponent,
                params.evsm_positive_exponent,
                params.evsm_negative_exponent,
                0.0,
            ],
        }
    }
}

/// Caster geometry uploaded once and drawn into any cascade.
pub struct CasterMesh {
    vertices: Keyed<wgpu::Buffer>,
    indices: Option<Keyed<wgpu::Buffer>>,
    vertex_count: u32,
    index_count: u32,
    bounds: Option<Aabb>,
}

impl CasterMesh {
    /// Upload `vertices` and optional u32 `indices`.
    pub fn new(device: &wgpu::Device, label: &str, vertices: &[CasterVertex], indices: Option<&[u32]>) -> Self {
        let vertex_label = format!("{label}-vertices");
        let index_label = format!("{label}-indices");
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&vertex_label),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        let index_buffer = indices.map(|data| {
            Keyed::new(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(&index_label),
                contents: bytemuck::cast_slice(data),
                usage: wgpu::BufferUsages::INDEX | wgpu::BufferUsages::COPY_DST,
            }))
        });
        Self {
            vertices: Keyed::new(vertex_buffer),
            indices: index_buffer,
            vertex_count: vertices.len() as u32,
            index_count: indices.map_or(0, |i| i.len() as u32),
            bounds: Aabb::from_points(vertices.iter().map(|v| glam::Vec3::from(v.position))),
        }
    }

    /// Object-space bounds, `None` for an empty mesh.
    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }
}

/// A buffer of caster instance transforms.
pub struct CasterInstances {
    buffer: Keyed<wgpu::Buffer>,
    count: u32,
}

impl CasterInstances {
    pub fn new(device: &wgpu::Device, label: &str, transforms: &[Mat4]) -> Self {
        let instances: Vec<CasterInstance> = transforms.iter().copied().map(CasterInstance::new).collect();
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&instances),
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
        });
        Self {
            buffer: Keyed::new(buffer),
            count: instances.len() as u32,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

/// How a caster's fragments are treated.
#[derive(Clone, Copy)]
pub enum CasterMaterial<'a> {
    /// Every covered fragment writes depth.
    Opaque,
    /// Fragments whose texture alpha is below the cutoff are discarded.
    /// The bind group must come from [`ShadowCasterRenderer::create_cutout_material`].
    Cutout(&'a Keyed<wgpu::BindGroup>),
}

/// Raster pipelines, per-cascade uniforms, and the encode pass for one
/// technique. Rebuilt whenever the shadow map array is reallocated.
pub struct ShadowCasterRenderer {
    technique: ShadowTechnique,
    unclipped_depth: bool,
    cutout_layout: wgpu::BindGroupLayout,
    opaque_pipeline: Keyed<wgpu::RenderPipeline>,
    cutout_pipeline: Keyed<wgpu::RenderPipeline>,
    cascade_buffer: wgpu::Buffer,
    cascade_bind_group: Keyed<wgpu::BindGroup>,
    cascade_stride: u32,
    identity_instances: CasterInstances,
    alpha_cutoff: f32,
    encode: Option<EncodeStage>,
}

struct EncodeStage {
    pipeline: Keyed<wgpu::RenderPipeline>,
    params_buffer: wgpu::Buffer,
    params_bind_group: Keyed<wgpu::BindGroup>,
    source_bind_group: Keyed<wgpu::BindGroup>,
}

impl ShadowCasterRenderer {
    /// Build pipelines matching the technique and targets of `maps`.
    pub fn new(device: &wgpu::Device, maps: &ShadowMapArray) -> Self {
        let technique = maps.desc().technique;
        let unclipped_depth = device.features().contains(wgpu::Features::DEPTH_CLIP_CONTROL);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow-caster-shader"),
            source: wgpu::ShaderSource::Wgsl(CASTER_SHADER_SOURCE.into()),
        });

        let cascade_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-caster-cascade-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<CasterUniform>() as u64),
                },
                count: None,
            }],
        });

        let cutout_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-caster-cutout-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let opaque_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-caster-opaque-layout"),
            bind_group_layouts: &[&cascade_layout],
            immediate_size: 0,
        });
        let cutout_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-caster-cutout-layout"),
            bind_group_layouts: &[&cascade_layout, &cutout_layout],
            immediate_size: 0,
        });

        // DepthOnly keeps the raster slope bias and renders back faces of
        // closed casters; moment techniques store the nearest surface.
        let (cull_mode, bias) = if technique.uses_moments() {
            (Some(wgpu::Face::Back), wgpu::DepthBiasState::default())
        } else {
            (
                Some(wgpu::Face::Front),
                wgpu::DepthBiasState {
                    constant: 1,
                    slope_scale: 1.5,
                    clamp: 0.0,
                },
            )
        };

        let opaque_pipeline = create_caster_pipeline(
            device,
            &shader,
            &opaque_layout,
            None,
            cull_mode,
            bias,
            unclipped_depth,
            "shadow-caster-opaque",
        );
        let cutout_pipeline = create_caster_pipeline(
            device,
            &shader,
            &cutout_pipeline_layout,
            Some("fs_cutout"),
            None,
            bias,
            unclipped_depth,
            "shadow-caster-cutout",
        );

        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let cascade_stride = wgpu::util::align_to(std::mem::size_of::<CasterUniform>() as u32, alignment);
        let cascade_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow-caster-cascades"),
            size: u64::from(cascade_stride) * MAX_CASCADES as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let cascade_bind_group = Keyed::new(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-caster-cascade-bg"),
            layout: &cascade_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &cascade_buffer,
                    offset: 0,
                    size: NonZeroU64::new(std::mem::size_of::<CasterUniform>() as u64),
                }),
            }],
        }));

        let identity_instances = CasterInstances::new(device, "shadow-caster-identity", &[Mat4::IDENTITY]);
        let encode = EncodeStage::new(device, maps);

        log::debug!(
            "Built shadow caster pipelines for {technique:?} (unclipped depth: {unclipped_depth}, stride {cascade_stride})"
        );

        Self {
            technique,
            unclipped_depth,
            cutout_layout,
            opaque_pipeline,
            cutout_pipeline,
            cascade_buffer,
            cascade_bind_group,
            cascade_stride,
            identity_instances,
            alpha_cutoff: DEFAULT_ALPHA_CUTOFF,
            encode,
        }
    }

    pub fn technique(&self) -> ShadowTechnique {
        self.technique
    }

    /// Whether casters in front of the light's near plane are clamped onto
    /// it instead of clipped.
    pub fn unclipped_depth(&self) -> bool {
        self.unclipped_depth
    }

    /// Byte distance between consecutive per-cascade uniforms.
    pub fn cascade_stride(&self) -> u32 {
        self.cascade_stride
    }

    pub fn set_alpha_cutoff(&mut self, cutoff: f32) {
        self.alpha_cutoff = cutoff;
    }

    /// Layout of the bind group a cutout caster supplies.
    pub fn cutout_layout(&self) -> &wgpu::BindGroupLayout {
        &self.cutout_layout
    }

    /// Bind an alpha texture and sampler for [`CasterMaterial::Cutout`].
    pub fn create_cutout_material(
        &self,
        device: &wgpu::Device,
        texture: &wgpu::TextureView,
        sampler: &wgpu::Sampler,
    ) -> Keyed<wgpu::BindGroup> {
        Keyed::new(device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-caster-cutout-bg"),
            layout: &self.cutout_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(texture),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(sampler),
                },
            ],
        }))
    }

    /// Upload the per-cascade view-projections and encode exponents.
    pub fn write_cascades(&self, queue: &wgpu::Queue, cascades: &CascadeSet, params: &TechniqueParams) {
        for cascade in cascades.iter().take(MAX_CASCADES) {
            let uniform = CasterUniform {
                view_proj: cascade.view_projection.to_cols_array_2d(),
                params: [self.alpha_cutoff, 0.0, 0.0, 0.0],
            };
            let offset = u64::from(self.cascade_stride) * cascade.index as u64;
            queue.write_buffer(&self.cascade_buffer, offset, bytemuck::bytes_of(&uniform));
        }
        if let Some(encode) = &self.encode {
            queue.write_buffer(
                &encode.params_buffer,
                0,
                bytemuck::bytes_of(&EncodeParams::from(params)),
            );
        }
    }

    /// Begin the raster pass for `cascade`: its slice for DepthOnly, the
    /// scratch depth buffer otherwise. Depth is cleared to
    /// [`DEPTH_CLEAR_VALUE`].
    pub fn begin_cascade<'e>(
        &'e self,
        encoder: &'e mut wgpu::CommandEncoder,
        maps: &ShadowMapArray,
        cascade: &Cascade,
    ) -> Option<CasterPass<'e>> {
        let target = if self.technique.uses_moments() {
            &maps.scratch_depth()?.view
        } else {
            maps.slice_view(cascade.index)?
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("shadow-caster"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(DEPTH_CLEAR_VALUE),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        let viewport = cascade.viewport;
        pass.set_viewport(
            viewport.x as f32,
            viewport.y as f32,
            viewport.width as f32,
            viewport.height as f32,
            0.0,
            1.0,
        );
        Some(CasterPass {
            pass,
            renderer: self,
            tracker: BindingTracker::new(),
            cascade_index: cascade.index,
            cascade_offset: self.cascade_stride * cascade.index as u32,
            draws: 0,
        })
    }

    /// Encode the scratch depth of the cascade just rasterized into slice
    /// `index`. No-op for DepthOnly.
    pub fn encode_slice(&self, encoder: &mut wgpu::CommandEncoder, maps: &ShadowMapArray, index: usize) {
        let (Some(encode), Some(target)) = (&self.encode, maps.slice_view(index)) else {
            return;
        };
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("shadow-encode"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        let set = BindingSet::new(&encode.pipeline)
            .bind_group(0, &encode.params_bind_group, None)
            .bind_group(1, &encode.source_bind_group, None);
        BindingTracker::new().apply(&mut pass, &set);
        pass.draw(0..3, 0..1);
    }
}

impl EncodeStage {
    fn new(device: &wgpu::Device, maps: &ShadowMapArray) -> Option<Self> {
        let entry_point = encode_entry_point(maps.desc().technique)?;
        let scratch = maps.scratch_depth()?;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow-encode-shader"),
            source: wgpu::ShaderSource::Wgsl(ENCODE_SHADER_SOURCE.into()),
        });

        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-encode-params-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(16),
                },
                count: None,
            }],
        });
        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-encode-source-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-encode-layout"),
            bind_group_layouts: &[&params_layout, &source_layout],
            immediate_size: 0,
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("shadow-encode"),
            layout: Some(&layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some(entry_point),
                targets: &[Some(wgpu::ColorTargetState {
                    format: maps.format(),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            multiview_mask: None,
            cache: None,
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow-encode-params"),
            size: std::mem::size_of::<EncodeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let params_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-encode-params-bg"),
            layout: &params_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: params_buffer.as_entire_binding(),
            }],
        });
        let source_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("shadow-encode-source-bg"),
            layout: &source_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&scratch.view),
            }],
        });

        Some(Self {
            pipeline: Keyed::new(pipeline),
            params_buffer,
            params_bind_group: Keyed::new(params_bind_group),
            source_bind_group: Keyed::new(source_bind_group),
        })
    }
}

/// Raster pass of one cascade, handed to the caller's draw callback.
pub struct CasterPass<'e> {
    pass: wgpu::RenderPass<'e>,
    renderer: &'e ShadowCasterRenderer,
    tracker: BindingTracker,
    cascade_index: usize,
    cascade_offset: u32,
    draws: u32,
}

impl CasterPass<'_> {
    /// Cascade this pass renders.
    pub fn cascade_index(&self) -> usize {
        self.cascade_index
    }

    /// Draw `mesh` once per instance transform, or once untransformed when
    /// `instances` is `None`.
    pub fn draw(&mut self, mesh: &CasterMesh, instances: Option<&CasterInstances>, material: CasterMaterial<'_>) {
        let renderer = self.renderer;
        let instances = instances.unwrap_or(&renderer.identity_instances);
        let set = match material {
            CasterMaterial::Opaque => BindingSet::new(&renderer.opaque_pipeline),
            CasterMaterial::Cutout(group) => BindingSet::new(&renderer.cutout_pipeline).bind_group(1, group, None),
        };
        let mut set = set
            .bind_group(0, &renderer.cascade_bind_group, Some(self.cascade_offset))
            .vertex_buffer(0, &mesh.vertices)
            .vertex_buffer(1, &instances.buffer);
        if let Some(indices) = &mesh.indices {
            set = set.index_buffer(indices, wgpu::IndexFormat::Uint32);
        }
        self.tracker.apply(&mut self.pass, &set);

        if mesh.indices.is_some() {
            self.pass.draw_indexed(0..mesh.index_count, 0, 0..instances.count);
        } else {
            self.pass.draw(0..mesh.vertex_count, 0..instances.count);
        }
        self.draws += 1;
    }

    /// Draws recorded so far.
    pub fn draw_count(&self) -> u32 {
        self.draws
    }

    /// Binding statistics of this pass.
    pub fn tracker(&self) -> &BindingTracker {
        &self.tracker
    }
}

#[allow(clippy::too_many_arguments)]
fn create_caster_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    fragment_entry: Option<&str>,
    cull_mode: Option<wgpu::Face>,
    bias: wgpu::DepthBiasState,
    unclipped_depth: bool,
    label: &str,
) -> Keyed<wgpu::RenderPipeline> {
    Keyed::new(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
            entry_point: Some("vs_caster"),
            buffers: &[CasterVertex::layout(), CasterInstance::layout()],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode,
            unclipped_depth,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: SHADOW_DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias,
        }),
        multisample: wgpu::MultisampleState::default(),
        fragment: fragment_entry.map(|entry| wgpu::FragmentState {
            module: shader,
            entry_point: Some(entry),
            targets: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    }))
}
