//! Shadow map texture array and its scratch targets.
//!
//! One array layer per cascade. DepthOnly slices are `Depth32Float` and the
//! casters render straight into them; moment techniques keep a colour slice
//! per cascade plus a shared scratch depth buffer for rasterization and a
//! shared scratch colour texture for the two-pass blur. Cascades are
//! rendered one after another, so one set of scratch targets serves them all.

use umbra_shadow::{ShadowSettings, ShadowTechnique};

/// Depth format for DepthOnly slices and the scratch depth buffer.
pub const SHADOW_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

/// Errors that can occur when allocating the shadow map array.
#[derive(Debug, thiserror::Error)]
pub enum ShadowMapError {
    /// Slice resolution exceeds the device's 2D texture limit.
    #[error("shadow resolution {resolution} exceeds device limit {limit}")]
    ResolutionExceedsLimit { resolution: u32, limit: u32 },

    /// More cascades than the device allows array layers.
    #[error("{count} cascades exceed device array layer limit {limit}")]
    TooManyCascades { count: u32, limit: u32 },
}

/// Slice format per technique.
pub fn slice_format(technique: ShadowTechnique) -> wgpu::TextureFormat {
    match technique {
        ShadowTechnique::DepthOnly => SHADOW_DEPTH_FORMAT,
        ShadowTechnique::Vsm | ShadowTechnique::Evsm2 => wgpu::TextureFormat::Rg32Float,
        ShadowTechnique::Esm => wgpu::TextureFormat::R32Float,
        ShadowTechnique::Evsm4 => wgpu::TextureFormat::Rgba32Float,
    }
}

/// The allocation-relevant part of the settings. A change in any field
/// forces reallocation; everything else in [`ShadowSettings`] is uniform data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowMapDesc {
    pub technique: ShadowTechnique,
    pub cascade_count: u32,
    pub resolution: u32,
    pub mip_level_count: u32,
}

impl ShadowMapDesc {
    pub fn from_settings(settings: &ShadowSettings) -> Self {
        let settings = settings.sanitized();
        Self {
            technique: settings.technique,
            cascade_count: settings.cascade_count,
            resolution: settings.resolution,
            mip_level_count: settings.mip_level_count(),
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        slice_format(self.technique)
    }

    /// Approximate GPU memory of the slices and scratch targets in bytes.
    pub fn memory_bytes(&self) -> u64 {
        let texel = u64::from(self.format().block_copy_size(None).unwrap_or(4));
        let base = u64::from(self.resolution) * u64::from(self.resolution) * texel;
        // A full mip chain adds a third.
        let slice = if self.mip_level_count > 1 { base + base / 3 } else { base };
        let scratch = if self.technique.uses_moments() {
            u64::from(self.resolution) * u64::from(self.resolution) * 4 + base
        } else {
            0
        };
        slice * u64::from(self.cascade_count) + scratch
    }

    fn validate(&self, limits: &wgpu::Limits) -> Result<(), ShadowMapError> {
        if self.resolution > limits.max_texture_dimension_2d {
            return Err(ShadowMapError::ResolutionExceedsLimit {
                resolution: self.resolution,
                limit: limits.max_texture_dimension_2d,
            });
        }
        if self.cascade_count > limits.max_texture_array_layers {
            return Err(ShadowMapError::TooManyCascades {
                count: self.cascade_count,
                limit: limits.max_texture_array_layers,
            });
        }
        Ok(())
    }
}

/// A texture with its default view.
pub struct ScratchTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
}

/// GPU storage for all cascades.
pub struct ShadowMapArray {
    desc: ShadowMapDesc,
    texture: wgpu::Texture,
    /// `mip_views[slice][level]`: single-layer, single-level views.
    mip_views: Vec<Vec<wgpu::TextureView>>,
    array_view: wgpu::TextureView,
    scratch_depth: Option<ScratchTarget>,
    scratch_color: Option<ScratchTarget>,
    /// 1x1 stand-ins so the sampling bind group always has both textures.
    placeholder_depth: wgpu::TextureView,
    placeholder_moments: wgpu::TextureView,
    generation: u64,
}

impl ShadowMapArray {
    /// Allocate storage for `settings`.
    pub fn new(device: &wgpu::Device, settings: &ShadowSettings) -> Result<Self, ShadowMapError> {
        let desc = ShadowMapDesc::from_settings(settings);
        desc.validate(&device.limits())?;
        Ok(Self::allocate(device, desc, 0))
    }

    /// Reallocate if `settings` changed an allocation-relevant field.
    /// Returns whether the textures were replaced, in which case every
    /// bind group referencing the old views must be rebuilt.
    pub fn ensure(&mut self, device: &wgpu::Device, settings: &ShadowSettings) -> Result<bool, ShadowMapError> {
        let desc = ShadowMapDesc::from_settings(settings);
        if desc == self.desc {
            return Ok(false);
        }
        desc.validate(&device.limits())?;
        *self = Self::allocate(device, desc, self.generation + 1);
        Ok(true)
    }

    fn allocate(device: &wgpu::Device, desc: ShadowMapDesc, generation: u64) -> Self {
        let format = desc.format();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("shadow-map-array"),
            size: wgpu::Extent3d {
                width: desc.resolution,
                height: desc.resolution,
                depth_or_array_layers: desc.cascade_count,
            },
            mip_level_count: desc.mip_level_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let mip_views = (0..desc.cascade_count)
            .map(|layer| {
                (0..desc.mip_level_count)
                    .map(|level| {
                        texture.create_view(&wgpu::TextureViewDescriptor {
                            label: Some("shadow-slice"),
                            dimension: Some(wgpu::TextureViewDimension::D2),
                            base_mip_level: level,
                            mip_level_count: Some(1),
                            base_array_layer: layer,
                            array_layer_count: Some(1),
                            ..Default::default()
                        })
                    })
                    .collect()
            })
            .collect();

        let array_view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("shadow-map-array-view"),
            dimension: Some(wgpu::TextureViewDimension::D2Array),
            ..Default::default()
        });

        let (scratch_depth, scratch_color) = if desc.technique.uses_moments() {
            (
                Some(create_scratch(device, "shadow-scratch-depth", SHADOW_DEPTH_FORMAT, desc.resolution)),
                Some(create_scratch(device, "shadow-scratch-color", format, desc.resolution)),
            )
        } else {
            (None, None)
        };

        let placeholder_depth = create_placeholder(device, "shadow-placeholder-depth", SHADOW_DEPTH_FORMAT);
        let placeholder_moments =
            create_placeholder(device, "shadow-placeholder-moments", wgpu::TextureFormat::Rgba32Float);

        log::info!(
            "Allocated shadow map array: {} x {}x{} {:?}, {} mips (~{} KiB)",
            desc.cascade_count,
            desc.resolution,
            desc.resolution,
            format,
            desc.mip_level_count,
            desc.memory_bytes() / 1024
        );

        Self {
            desc,
            texture,
            mip_views,
            array_view,
            scratch_depth,
            scratch_color,
            placeholder_depth,
            placeholder_moments,
            generation,
        }
    }

    pub fn desc(&self) -> &ShadowMapDesc {
        &self.desc
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.desc.format()
    }

    pub fn resolution(&self) -> u32 {
        self.desc.resolution
    }

    pub fn cascade_count(&self) -> u32 {
        self.desc.cascade_count
    }

    pub fn mip_level_count(&self) -> u32 {
        self.desc.mip_level_count
    }

    /// Bumped on every reallocation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Render target view of slice `index` at mip 0. Also usable as a
    /// single-slice sample view for debug display.
    pub fn slice_view(&self, index: usize) -> Option<&wgpu::TextureView> {
        self.mip_view(index, 0)
    }

    /// Slice `index` at mip `level`.
    pub fn mip_view(&self, index: usize, level: u32) -> Option<&wgpu::TextureView> {
        self.mip_views.get(index)?.get(level as usize)
    }

    /// All slices and mips, for sampling every cascade in one pass.
    pub fn array_view(&self) -> &wgpu::TextureView {
        &self.array_view
    }

    pub fn scratch_depth(&self) -> Option<&ScratchTarget> {
        self.scratch_depth.as_ref()
    }

    pub fn scratch_color(&self) -> Option<&ScratchTarget> {
        self.scratch_color.as_ref()
    }

    /// Depth array to bind for sampling: the slices for DepthOnly, a
    /// placeholder otherwise.
    pub fn depth_binding(&self) -> &wgpu::TextureView {
        if self.desc.technique.uses_moments() {
            &self.placeholder_depth
        } else {
            &self.array_view
        }
    }

    /// Moment array to bind for sampling: the slices for moment techniques,
    /// a placeholder for DepthOnly.
    pub fn moments_binding(&self) -> &wgpu::TextureView {
        if self.desc.technique.uses_moments() {
            &self.array_view
        } else {
            &self.placeholder_moments
        }
    }
}

fn create_scratch(device: &wgpu::Device, label: &str, format: wgpu::TextureFormat, resolution: u32) -> ScratchTarget {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: resolution,
            height: resolution,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    ScratchTarget { texture, view }
}

fn create_placeholder(device: &wgpu::Device, label: &str, format: wgpu::TextureFormat) -> wgpu::TextureView {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    texture.create_view(&wgpu::TextureViewDescriptor {
        label: Some(label),
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        ..Default::default()
    })
}
