//! Separable blur and mip generation over encoded slices.
//!
//! The horizontal pass reads a slice and writes the shared scratch colour
//! texture; the vertical pass reads the scratch texture and writes the
//! slice back. ESM slices hold `c * d` and are filtered with log-sum-exp;
//! every other moment technique filters linearly. DepthOnly slices are
//! never filtered.

use std::num::NonZeroU64;

use bytemuck::{Pod, Zeroable};
use umbra_shadow::{BlurDomain, GaussianKernel, ShadowSettings};

use crate::binding::{BindingSet, BindingTracker, Keyed};
use crate::shadow_map::ShadowMapArray;

/// WGSL source for the blur and mip passes.
pub const FILTER_SHADER_SOURCE: &str = r#"
struct BlurParams {
    // Weights for offsets 0..=radius, four per vector.
    weights: array<vec4<f32>, 2>,
    direction: vec2<i32>,
    radius: u32,
    _pad: u32,
};

@group(0) @binding(0)
var source: texture_2d<f32>;

@group(1) @binding(0)
var<uniform> blur: BlurParams;

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

fn load_clamped(p: vec2<i32>) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(source));
    return textureLoad(source, clamp(p, vec2<i32>(0), size - vec2<i32>(1)), 0);
}

fn blur_weight(i: u32) -> f32 {
    return blur.weights[i / 4u][i % 4u];
}

@fragment
fn fs_blur_linear(in: VertexOutput) -> @location(0) vec4<f32> {
    let center = vec2<i32>(in.position.xy);
    var sum = load_clamped(center) * blur_weight(0u);
    for (var i = 1u; i <= blur.radius; i++) {
        let offset = blur.direction * i32(i);
        sum += (load_clamped(center + offset) + load_clamped(center - offset)) * blur_weight(i);
    }
    return sum;
}

// Texels hold logarithms; shift by the largest before exponentiating.
@fragment
fn fs_blur_log(in: VertexOutput) -> @location(0) vec4<f32> {
    let center = vec2<i32>(in.position.xy);
    var peak = load_clamped(center).x;
    for (var i = 1u; i <= blur.radius; i++) {
        let offset = blur.direction * i32(i);
        peak = max(peak, max(load_clamped(center + offset).x, load_clamped(center - offset).x));
    }
    var sum = blur_weight(0u) * exp(load_clamped(center).x - peak);
    for (var i = 1u; i <= blur.radius; i++) {
        let offset = blur.direction * i32(i);
        let pair = exp(load_clamped(center + offset).x - peak) + exp(load_clamped(center - offset).x - peak);
        sum += blur_weight(i) * pair;
    }
    return vec4<f32>(peak + log(sum), 0.0, 0.0, 0.0);
}

@fragment
fn fs_mip_linear(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = vec2<i32>(in.position.xy) * 2;
    let sum = load_clamped(base)
        + load_clamped(base + vec2<i32>(1, 0))
        + load_clamped(base + vec2<i32>(0, 1))
        + load_clamped(base + vec2<i32>(1, 1));
    return sum * 0.25;
}

@fragment
fn fs_mip_log(in: VertexOutput) -> @location(0) vec4<f32> {
    let base = vec2<i32>(in.position.xy) * 2;
    let a = load_clamped(base).x;
    let b = load_clamped(base + vec2<i32>(1, 0)).x;
    let c = load_clamped(base + vec2<i32>(0, 1)).x;
    let d = load_clamped(base + vec2<i32>(1, 1)).x;
    let peak = max(max(a, b), max(c, d));
    let sum = 0.25 * (exp(a - peak) + exp(b - peak) + exp(c - peak) + exp(d - peak));
    return vec4<f32>(peak + log(sum), 0.0, 0.0, 0.0);
}
"#;

/// Blur entry point and mip entry point for a domain.
pub fn filter_entry_points(domain: BlurDomain) -> (&'static str, &'static str) {
    match domain {
        BlurDomain::Linear => ("fs_blur_linear", "fs_mip_linear"),
        BlurDomain::Log => ("fs_blur_log", "fs_mip_log"),
    }
}

/// GPU uniform for one blur direction. Total size: 32 + 8 + 4 + 4 = 48 bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct BlurParams {
    pub weights: [[f32; 4]; 2],
    pub direction: [i32; 2],
    pub radius: u32,
    pub _pad: u32,
}

impl BlurParams {
    fn new(kernel: &GaussianKernel, direction: [i32; 2]) -> Self {
        Self {
            weights: kernel.packed(),
            direction,
            radius: kernel.radius() as u32,
            _pad: 0,
        }
    }
}

/// Blur and mip pipelines for one moment technique, with bind groups over
/// every slice view of the current shadow map array.
pub struct ShadowFilters {
    domain: BlurDomain,
    kernel: GaussianKernel,
    blur_pipeline: Keyed<wgpu::RenderPipeline>,
    mip_pipeline: Keyed<wgpu::RenderPipeline>,
    horizontal_buffer: wgpu::Buffer,
    vertical_buffer: wgpu::Buffer,
    horizontal: Keyed<wgpu::BindGroup>,
    vertical: Keyed<wgpu::BindGroup>,
    /// `level_sources[slice][level]` reads that slice at that mip.
    level_sources: Vec<Vec<Keyed<wgpu::BindGroup>>>,
    scratch_source: Keyed<wgpu::BindGroup>,
}

impl ShadowFilters {
    /// Filters for the array's technique; `None` when it is not filtered.
    pub fn new(device: &wgpu::Device, maps: &ShadowMapArray, settings: &ShadowSettings) -> Option<Self> {
        let domain = maps.desc().technique.blur_domain()?;
        let scratch = maps.scratch_color()?;
        let (blur_entry, mip_entry) = filter_entry_points(domain);

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("shadow-filter-shader"),
            source: wgpu::ShaderSource::Wgsl(FILTER_SHADER_SOURCE.into()),
        });

        let source_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-filter-source-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            }],
        });
        let params_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("shadow-filter-params-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<BlurParams>() as u64),
                },
                count: None,
            }],
        });

        let blur_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-blur-layout"),
            bind_group_layouts: &[&source_layout, &params_layout],
            immediate_size: 0,
        });
        let mip_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("shadow-mip-layout"),
            bind_group_layouts: &[&source_layout],
            immediate_size: 0,
        });

        let format = maps.format();
        let blur_pipeline = create_filter_pipeline(device, &shader, &blur_layout, blur_entry, format, "shadow-blur");
        let mip_pipeline = create_filter_pipeline(device, &shader, &mip_layout, mip_entry, format, "shadow-mip");

        let kernel = kernel_for(settings);
        let horizontal_buffer = create_params_buffer(device, "shadow-blur-horizontal", &BlurParams::new(&kernel, [1, 0]));
        let vertical_buffer = create_params_buffer(device, "shadow-blur-vertical", &BlurParams::new(&kernel, [0, 1]));
        let horizontal = create_params_group(device, &params_layout, &horizontal_buffer);
        let vertical = create_params_group(device, &params_layout, &vertical_buffer);

        let level_sources = (0..maps.cascade_count() as usize)
            .map(|slice| {
                (0..maps.mip_level_count())
                    .filter_map(|level| maps.mip_view(slice, level))
                    .map(|view| create_source_group(device, &source_layout, view))
                    .collect()
            })
            .collect();
        let scratch_source = create_source_group(device, &source_layout, &scratch.view);

        Some(Self {
            domain,
            kernel,
            blur_pipeline,
            mip_pipeline,
            horizontal_buffer,
            vertical_buffer,
            horizontal,
            vertical,
            level_sources,
            scratch_source,
        })
    }

    pub fn domain(&self) -> BlurDomain {
        self.domain
    }

    pub fn kernel(&self) -> &GaussianKernel {
        &self.kernel
    }

    /// Rebuild the kernel from `settings` and upload it when it changed.
    pub fn write_kernel(&mut self, queue: &wgpu::Queue, settings: &ShadowSettings) {
        let kernel = kernel_for(settings);
        if kernel == self.kernel {
            return;
        }
        queue.write_buffer(
            &self.horizontal_buffer,
            0,
            bytemuck::bytes_of(&BlurParams::new(&kernel, [1, 0])),
        );
        queue.write_buffer(
            &self.vertical_buffer,
            0,
            bytemuck::bytes_of(&BlurParams::new(&kernel, [0, 1])),
        );
        self.kernel = kernel;
    }

    /// Horizontal pass into the scratch texture, vertical pass back into
    /// slice `index`.
    pub fn blur_slice(&self, encoder: &mut wgpu::CommandEncoder, maps: &ShadowMapArray, index: usize) {
        let (Some(source), Some(scratch), Some(target)) = (
            self.source(index, 0),
            maps.scratch_color(),
            maps.slice_view(index),
        ) else {
            return;
        };
        let horizontal = BindingSet::new(&self.blur_pipeline)
            .bind_group(0, source, None)
            .bind_group(1, &self.horizontal, None);
        run_fullscreen(encoder, &scratch.view, &horizontal, "shadow-blur-horizontal");

        let vertical = BindingSet::new(&self.blur_pipeline)
            .bind_group(0, &self.scratch_source, None)
            .bind_group(1, &self.vertical, None);
        run_fullscreen(encoder, target, &vertical, "shadow-blur-vertical");
    }

    /// Fill mips 1.. of slice `index`, each from the level above it.
    pub fn generate_mips(&self, encoder: &mut wgpu::CommandEncoder, maps: &ShadowMapArray, index: usize) {
        for level in 1..maps.mip_level_count() {
            let (Some(source), Some(target)) = (self.source(index, level - 1), maps.mip_view(index, level)) else {
                return;
            };
            let set = BindingSet::new(&self.mip_pipeline).bind_group(0, source, None);
            run_fullscreen(encoder, target, &set, "shadow-mip");
        }
    }

    fn source(&self, slice: usize, level: u32) -> Option<&Keyed<wgpu::BindGroup>> {
        self.level_sources.get(slice)?.get(level as usize)
    }
}

fn kernel_for(settings: &ShadowSettings) -> GaussianKernel {
    let settings = settings.sanitized();
    GaussianKernel::new(settings.blur_kernel, settings.blur_sigma)
}

fn run_fullscreen(encoder: &mut wgpu::CommandEncoder, target: &wgpu::TextureView, set: &BindingSet<'_>, label: &str) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
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
    BindingTracker::new().apply(&mut pass, set);
    pass.draw(0..3, 0..1);
}

fn create_filter_pipeline(
    device: &wgpu::Device,
    shader: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    fragment_entry: &str,
    format: wgpu::TextureFormat,
    label: &str,
) -> Keyed<wgpu::RenderPipeline> {
    Keyed::new(device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module: shader,
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
            module: shader,
            entry_point: Some(fragment_entry),
            targets: &[Some(wgpu::ColorTargetState {
                format,
                blend: None,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    }))
}

fn create_params_buffer(device: &wgpu::Device, label: &str, params: &BlurParams) -> wgpu::Buffer {
    use wgpu::util::DeviceExt;
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(params),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

fn create_params_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
) -> Keyed<wgpu::BindGroup> {
    Keyed::new(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("shadow-blur-params-bg"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: buffer.as_entire_binding(),
        }],
    }))
}

fn create_source_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
) -> Keyed<wgpu::BindGroup> {
    Keyed::new(device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("shadow-filter-source-bg"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::TextureView(view),
        }],
    }))
}
