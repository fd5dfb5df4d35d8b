//! Shading-time shadow lookup for the consumer's fragment shader.
//!
//! [`SHADOW_SAMPLING_WGSL`] is prepended to the consumer's shader source.
//! It declares the shadow bind group at [`SHADOW_BIND_GROUP`] and exposes
//! `shadow_visibility(world_pos, eye_depth)` plus `shadow_debug_tint`. The
//! layout never changes with the technique: whichever texture binding the
//! technique does not use holds a 1×1 placeholder.

use std::num::NonZeroU64;

use umbra_shadow::ShadowUniform;

/// Bind group index the sampling library declares its bindings at.
pub const SHADOW_BIND_GROUP: u32 = 2;

/// WGSL sampling library. Selection, blending, bias and decode mirror
/// `umbra_shadow::CascadeSampler`.
pub const SHADOW_SAMPLING_WGSL: &str = r#"
struct ShadowUniform {
    light_view: mat4x4<f32>,
    cascade_scale: array<vec4<f32>, 8>,
    cascade_offset: array<vec4<f32>, 8>,
    boundaries: array<vec4<f32>, 3>,
    // technique, cascade count, selection policy, PCF kernel width
    config: vec4<u32>,
    // blend fraction, bias constant, bias slope scale, bias max
    blend_bias: vec4<f32>,
    // light-bleeding reduction, ESM exponent, EVSM exponents
    decode: vec4<f32>,
    // resolution, min variance, debug tint, gradient bias
    misc: vec4<f32>,
};

@group(2) @binding(0)
var<uniform> shadow_params: ShadowUniform;
@group(2) @binding(1)
var shadow_depth: texture_depth_2d_array;
@group(2) @binding(2)
var shadow_compare: sampler_comparison;
@group(2) @binding(3)
var shadow_moments: texture_2d_array<f32>;

fn shadow_boundary(i: u32) -> f32 {
    return shadow_params.boundaries[i / 4u][i % 4u];
}

fn shadow_cascade_count() -> u32 {
    return max(shadow_params.config.y, 1u);
}

fn shadow_resolution() -> f32 {
    return max(shadow_params.misc.x, 1.0);
}

fn shadow_select(eye_depth: f32) -> u32 {
    let count = shadow_cascade_count();
    var index = 0u;
    if shadow_params.config.z == 0u {
        // Map: first cascade whose far boundary lies beyond the depth.
        index = count - 1u;
        for (var i = 0u; i + 1u < count; i++) {
            if eye_depth < shadow_boundary(i + 1u) {
                index = i;
                break;
            }
        }
    } else {
        // Interval: count interior boundaries at or below the depth.
        for (var i = 1u; i < count; i++) {
            if shadow_boundary(i) <= eye_depth {
                index += 1u;
            }
        }
    }
    return index;
}

// 1 outside the band before the far boundary, falling to 0 at it.
fn shadow_blend_weight(index: u32, eye_depth: f32) -> f32 {
    if index + 1u >= shadow_cascade_count() {
        return 1.0;
    }
    let near = shadow_boundary(index);
    let far = shadow_boundary(index + 1u);
    let band = shadow_params.blend_bias.x * (far - near);
    if band <= 0.0 || eye_depth <= far - band {
        return 1.0;
    }
    return clamp((far - eye_depth) / band, 0.0, 1.0);
}

fn shadow_coord(light_pos: vec3<f32>, index: u32) -> vec3<f32> {
    return light_pos * shadow_params.cascade_scale[index].xyz + shadow_params.cascade_offset[index].xyz;
}

// Shadow depth change per texel along u and v.
fn shadow_depth_gradient(dcoord_dx: vec3<f32>, dcoord_dy: vec3<f32>) -> vec2<f32> {
    let det = dcoord_dx.x * dcoord_dy.y - dcoord_dx.y * dcoord_dy.x;
    if abs(det) < 1e-12 {
        return vec2<f32>(0.0);
    }
    let ddepth_du = (dcoord_dy.y * dcoord_dx.z - dcoord_dx.y * dcoord_dy.z) / det;
    let ddepth_dv = (dcoord_dx.x * dcoord_dy.z - dcoord_dy.x * dcoord_dx.z) / det;
    return vec2<f32>(ddepth_du, ddepth_dv) / shadow_resolution();
}

fn shadow_pcf(index: u32, coord: vec3<f32>, gradient: vec2<f32>) -> f32 {
    var g = gradient;
    if shadow_params.misc.w == 0.0 {
        g = vec2<f32>(0.0);
    }
    let slope = max(abs(g.x), abs(g.y));
    let bias = min(shadow_params.blend_bias.y + shadow_params.blend_bias.z * slope, shadow_params.blend_bias.w);
    let res = shadow_resolution();
    let r = i32(shadow_params.config.w / 2u);
    var sum = 0.0;
    for (var j = -r; j <= r; j++) {
        for (var i = -r; i <= r; i++) {
            let offset = vec2<f32>(f32(i), f32(j));
            let reference = coord.z + dot(g, offset) - bias;
            sum += textureSampleCompareLevel(shadow_depth, shadow_compare, coord.xy + offset / res, i32(index), reference);
        }
    }
    let taps = f32((2 * r + 1) * (2 * r + 1));
    return sum / taps;
}

fn shadow_mip_level(duv_dx: vec2<f32>, duv_dy: vec2<f32>) -> i32 {
    let levels = i32(textureNumLevels(shadow_moments));
    let texels = max(length(duv_dx), length(duv_dy)) * shadow_resolution();
    let lod = log2(max(texels, 1.0));
    return clamp(i32(round(lod)), 0, levels - 1);
}

fn shadow_load(index: u32, p: vec2<i32>, level: i32) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(shadow_moments, level));
    return textureLoad(shadow_moments, clamp(p, vec2<i32>(0), size - vec2<i32>(1)), i32(index), level);
}

// Manual bilinear; log-stored texels are combined with log-sum-exp.
fn shadow_sample_moments(index: u32, uv: vec2<f32>, level: i32, log_domain: bool) -> vec4<f32> {
    let size = vec2<f32>(textureDimensions(shadow_moments, level));
    let p = uv * size - vec2<f32>(0.5);
    let base = floor(p);
    let t = p - base;
    let b = vec2<i32>(base);
    let s00 = shadow_load(index, b, level);
    let s10 = shadow_load(index, b + vec2<i32>(1, 0), level);
    let s01 = shadow_load(index, b + vec2<i32>(0, 1), level);
    let s11 = shadow_load(index, b + vec2<i32>(1, 1), level);
    var result = mix(mix(s00, s10, t.x), mix(s01, s11, t.x), t.y);
    if log_domain {
        let w = vec4<f32>((1.0 - t.x) * (1.0 - t.y), t.x * (1.0 - t.y), (1.0 - t.x) * t.y, t.x * t.y);
        let v = vec4<f32>(s00.x, s10.x, s01.x, s11.x);
        let peak = max(max(v.x, v.y), max(v.z, v.w));
        result = vec4<f32>(peak + log(dot(w, exp(v - vec4<f32>(peak)))), 0.0, 0.0, 0.0);
    }
    return result;
}

fn shadow_chebyshev(moments: vec2<f32>, t: f32, min_variance: f32) -> f32 {
    let mean = moments.x;
    if t <= mean {
        return 1.0;
    }
    let variance = max(moments.y - mean * mean, min_variance);
    let d = t - mean;
    return clamp(variance / (variance + d * d), 0.0, 1.0);
}

fn shadow_reduce_bleeding(p: f32, amount: f32) -> f32 {
    if amount <= 0.0 {
        return p;
    }
    return clamp((p - amount) / (1.0 - amount), 0.0, 1.0);
}

fn shadow_warp(depth: f32) -> vec2<f32> {
    let d = 2.0 * depth - 1.0;
    return vec2<f32>(exp(shadow_params.decode.z * d), -exp(-shadow_params.decode.w * d));
}

fn shadow_decode(technique: u32, stored: vec4<f32>, depth: f32) -> f32 {
    let bleeding = shadow_params.decode.x;
    let min_variance = shadow_params.misc.y;
    var visibility = 1.0;
    switch technique {
        case 1u: {
            visibility = shadow_reduce_bleeding(shadow_chebyshev(stored.xy, depth, min_variance), bleeding);
        }
        case 2u: {
            visibility = clamp(exp(stored.x - shadow_params.decode.y * depth), 0.0, 1.0);
        }
        case 3u, 4u: {
            let w = shadow_warp(depth);
            let slope = vec2<f32>(shadow_params.decode.z * w.x, shadow_params.decode.w * w.y);
            let floor_variance = slope * slope * (min_variance * 1e-3);
            var p = shadow_chebyshev(stored.xy, w.x, floor_variance.x);
            if technique == 4u {
                p = min(p, shadow_chebyshev(stored.zw, w.y, floor_variance.y));
            }
            visibility = shadow_reduce_bleeding(p, bleeding);
        }
        default: {}
    }
    return visibility;
}

// Visibility from cascade `index`, or `fallback` outside its window.
fn shadow_cascade_visibility(
    index: u32,
    light_pos: vec3<f32>,
    dlight_dx: vec3<f32>,
    dlight_dy: vec3<f32>,
    fallback: f32,
) -> f32 {
    let coord = shadow_coord(light_pos, index);
    if any(coord.xy < vec2<f32>(0.0)) || any(coord.xy > vec2<f32>(1.0)) {
        return fallback;
    }
    let depth = clamp(coord.z, 0.0, 1.0);
    let scale = shadow_params.cascade_scale[index].xyz;
    let technique = shadow_params.config.x;
    var visibility = 1.0;
    if technique == 0u {
        let gradient = shadow_depth_gradient(dlight_dx * scale, dlight_dy * scale);
        visibility = shadow_pcf(index, vec3<f32>(coord.xy, depth), gradient);
    } else {
        let level = shadow_mip_level(dlight_dx.xy * scale.xy, dlight_dy.xy * scale.xy);
        let stored = shadow_sample_moments(index, coord.xy, level, technique == 2u);
        visibility = shadow_decode(technique, stored, depth);
    }
    return visibility;
}

// Visibility with caller-supplied screen derivatives of the light-view
// position, for use outside uniform control flow.
fn shadow_visibility_grad(
    light_pos: vec3<f32>,
    eye_depth: f32,
    dlight_dx: vec3<f32>,
    dlight_dy: vec3<f32>,
) -> f32 {
    let index = shadow_select(eye_depth);
    let current = shadow_cascade_visibility(index, light_pos, dlight_dx, dlight_dy, 1.0);
    let weight = shadow_blend_weight(index, eye_depth);
    var visibility = current;
    if weight < 1.0 {
        let next = shadow_cascade_visibility(index + 1u, light_pos, dlight_dx, dlight_dy, current);
        visibility = next + (current - next) * weight;
    }
    return visibility;
}

// Must be called from uniform control flow.
fn shadow_visibility(world_pos: vec3<f32>, eye_depth: f32) -> f32 {
    let light_pos = (shadow_params.light_view * vec4<f32>(world_pos, 1.0)).xyz;
    return shadow_visibility_grad(light_pos, eye_depth, dpdx(light_pos), dpdy(light_pos));
}

fn shadow_tint(index: u32) -> vec3<f32> {
    var tint = vec3<f32>(0.6, 0.6, 0.6);
    switch index % 8u {
        case 0u: { tint = vec3<f32>(1.0, 0.3, 0.3); }
        case 1u: { tint = vec3<f32>(0.3, 1.0, 0.3); }
        case 2u: { tint = vec3<f32>(0.3, 0.3, 1.0); }
        case 3u: { tint = vec3<f32>(1.0, 1.0, 0.3); }
        case 4u: { tint = vec3<f32>(1.0, 0.3, 1.0); }
        case 5u: { tint = vec3<f32>(0.3, 1.0, 1.0); }
        case 6u: { tint = vec3<f32>(1.0, 0.6, 0.2); }
        default: {}
    }
    return tint;
}

fn shadow_debug_enabled() -> bool {
    return shadow_params.misc.z > 0.5;
}

// Cascade colour for a receiver, blended like the visibility.
fn shadow_debug_tint(eye_depth: f32) -> vec3<f32> {
    let index = shadow_select(eye_depth);
    let current = shadow_tint(index);
    let weight = shadow_blend_weight(index, eye_depth);
    var tint = current;
    if weight < 1.0 {
        tint = mix(shadow_tint(index + 1u), current, weight);
    }
    return tint;
}
"#;

/// Layout of the bind group the sampling library expects at
/// [`SHADOW_BIND_GROUP`]: uniform, depth array, comparison sampler,
/// moment array.
pub fn create_shadow_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("shadow-sampling-bgl"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: NonZeroU64::new(std::mem::size_of::<ShadowUniform>() as u64),
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Depth,
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                    multisampled: false,
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 2,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison),
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 3,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2Array,
                    multisampled: false,
                },
                count: None,
            },
        ],
    })
}

/// Bilinear comparison sampler for DepthOnly PCF taps. A tap passes when
/// the reference is at or in front of the stored depth.
pub fn create_comparison_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("shadow-compare-sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::MipmapFilterMode::Nearest,
        compare: Some(wgpu::CompareFunction::LessEqual),
        ..Default::default()
    })
}
