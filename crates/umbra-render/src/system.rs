//! Per-frame driver for the cascaded shadow subsystem.
//!
//! Owns the shadow map array, the caster and filter pipelines and the
//! sampling bind group. A frame is [`CascadedShadows::prepare`] followed by
//! [`CascadedShadows::render`]; the consumer then binds
//! [`CascadedShadows::bind_group`] at [`crate::SHADOW_BIND_GROUP`].

use bytemuck::Zeroable;
use umbra_math::Aabb;
use umbra_shadow::{
    Cascade, CascadeSet, LightCamera, ShadowSettings, ShadowUniform, TechniqueParams, ViewerCamera,
    compute_cascades,
};

use crate::caster::{CasterPass, ShadowCasterRenderer};
use crate::filter::ShadowFilters;
use crate::sampling::{create_comparison_sampler, create_shadow_bind_group_layout};
use crate::shadow_map::{ShadowMapArray, ShadowMapError};

/// Cascaded shadows for one directional light.
pub struct CascadedShadows {
    settings: ShadowSettings,
    maps: ShadowMapArray,
    caster: ShadowCasterRenderer,
    filters: Option<ShadowFilters>,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    uniform: ShadowUniform,
    cascades: Option<CascadeSet>,
}

impl CascadedShadows {
    /// Allocate the shadow map array and build every pipeline for `settings`.
    pub fn new(device: &wgpu::Device, settings: &ShadowSettings) -> Result<Self, ShadowMapError> {
        let settings = settings.sanitized();
        let maps = ShadowMapArray::new(device, &settings)?;
        log::info!(
            "Shadow maps: {:?} x{} at {}px, {} mips, {:.1} MiB",
            settings.technique,
            maps.cascade_count(),
            maps.resolution(),
            maps.mip_level_count(),
            maps.desc().memory_bytes() as f64 / (1024.0 * 1024.0)
        );

        let caster = ShadowCasterRenderer::new(device, &maps);
        let filters = ShadowFilters::new(device, &maps, &settings);
        let layout = create_shadow_bind_group_layout(device);
        let sampler = create_comparison_sampler(device);
        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("shadow-uniform"),
            size: std::mem::size_of::<ShadowUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = create_sampling_bind_group(device, &layout, &uniform_buffer, &sampler, &maps);

        Ok(Self {
            settings,
            maps,
            caster,
            filters,
            layout,
            sampler,
            uniform_buffer,
            bind_group,
            uniform: ShadowUniform::zeroed(),
            cascades: None,
        })
    }

    /// Apply new settings. Returns `true` when the shadow map array was
    /// reallocated, in which case pipelines and the sampling bind group were
    /// rebuilt and any bind group the caller cached is stale.
    pub fn set_settings(&mut self, device: &wgpu::Device, settings: &ShadowSettings) -> Result<bool, ShadowMapError> {
        let settings = settings.sanitized();
        let reallocated = self.maps.ensure(device, &settings)?;
        if reallocated {
            log::info!(
                "Shadow maps reallocated: {:?} x{} at {}px (generation {})",
                settings.technique,
                self.maps.cascade_count(),
                self.maps.resolution(),
                self.maps.generation()
            );
            self.caster = ShadowCasterRenderer::new(device, &self.maps);
            self.filters = ShadowFilters::new(device, &self.maps, &settings);
            self.bind_group =
                create_sampling_bind_group(device, &self.layout, &self.uniform_buffer, &self.sampler, &self.maps);
            self.cascades = None;
        }
        self.settings = settings;
        Ok(reallocated)
    }

    /// Compute this frame's cascades and upload every uniform the caster,
    /// filter and sampling passes read.
    pub fn prepare(
        &mut self,
        queue: &wgpu::Queue,
        viewer: &ViewerCamera,
        light: &LightCamera,
        scene: Option<&Aabb>,
    ) -> &CascadeSet {
        let cascades = compute_cascades(viewer, light, scene, &self.settings);
        self.uniform = ShadowUniform::new(&cascades, &self.settings);
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&self.uniform));
        self.caster
            .write_cascades(queue, &cascades, &TechniqueParams::from(&self.settings));
        if let Some(filters) = &mut self.filters {
            filters.write_kernel(queue, &self.settings);
        }
        for stats in cascades.stats() {
            log::trace!(
                "cascade {}: [{:.2}, {:.2}] coverage {:.2}x{:.2} texel {:.4} depth {:.2}",
                stats.index,
                stats.near,
                stats.far,
                stats.coverage.x,
                stats.coverage.y,
                stats.texel_world_size,
                stats.depth_range
            );
        }
        self.cascades.insert(cascades)
    }

    /// Record every cascade: rasterize casters through `draw`, then encode,
    /// blur and mip the slice. Cascades are recorded one after another and
    /// share the scratch targets. Returns the number of caster draws.
    pub fn render<F>(&self, encoder: &mut wgpu::CommandEncoder, mut draw: F) -> u32
    where
        F: FnMut(&mut CasterPass<'_>, &Cascade),
    {
        let Some(cascades) = &self.cascades else {
            log::warn!("Shadow render skipped: prepare() has not run since the last reallocation");
            return 0;
        };
        let mut draws = 0;
        for cascade in cascades {
            {
                let Some(mut pass) = self.caster.begin_cascade(encoder, &self.maps, cascade) else {
                    continue;
                };
                draw(&mut pass, cascade);
                draws += pass.draw_count();
                log::trace!(
                    "cascade {}: {} caster draws, {} binding calls, {} skipped",
                    cascade.index,
                    pass.draw_count(),
                    pass.tracker().applied(),
                    pass.tracker().skipped()
                );
            }
            self.caster.encode_slice(encoder, &self.maps, cascade.index);
            if let Some(filters) = &self.filters {
                if filters.kernel().radius() > 0 {
                    filters.blur_slice(encoder, &self.maps, cascade.index);
                }
                filters.generate_mips(encoder, &self.maps, cascade.index);
            }
        }
        draws
    }

    /// Cascades from the last [`prepare`](Self::prepare).
    pub fn cascades(&self) -> Option<&CascadeSet> {
        self.cascades.as_ref()
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    pub fn shadow_map(&self) -> &ShadowMapArray {
        &self.maps
    }

    pub fn caster(&self) -> &ShadowCasterRenderer {
        &self.caster
    }

    pub fn caster_mut(&mut self) -> &mut ShadowCasterRenderer {
        &mut self.caster
    }

    /// Layout for the consumer's pipeline at [`crate::SHADOW_BIND_GROUP`].
    pub fn bind_group_layout(&self) -> &wgpu::BindGroupLayout {
        &self.layout
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    /// Uniform uploaded by the last [`prepare`](Self::prepare).
    pub fn uniform(&self) -> &ShadowUniform {
        &self.uniform
    }
}

fn create_sampling_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    uniform_buffer: &wgpu::Buffer,
    sampler: &wgpu::Sampler,
    maps: &ShadowMapArray,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("shadow-sampling-bg"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::TextureView(maps.depth_binding()),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
            wgpu::BindGroupEntry {
                binding: 3,
                resource: wgpu::BindingResource::TextureView(maps.moments_binding()),
            },
        ],
    })
}
