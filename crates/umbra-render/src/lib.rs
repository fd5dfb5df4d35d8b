//! wgpu side of the cascaded shadow subsystem: shadow map array, caster
//! rasterization, moment encode and prefilter passes, and the WGSL sampling
//! library bound by the consumer's shading pass.

pub mod binding;
pub mod caster;
pub mod context;
pub mod filter;
pub mod sampling;
pub mod shadow_map;
pub mod system;

pub use binding::{BindingChanges, BindingKey, BindingSet, BindingState, BindingTracker, Keyed};
pub use caster::{
    CASTER_SHADER_SOURCE, CasterInstance, CasterInstances, CasterMaterial, CasterMesh, CasterPass, CasterVertex,
    DEFAULT_ALPHA_CUTOFF, DEPTH_CLEAR_VALUE, ENCODE_SHADER_SOURCE, ShadowCasterRenderer,
};
pub use context::{GpuContext, GpuContextError, OPTIONAL_FEATURES, init_headless_blocking};
pub use filter::{FILTER_SHADER_SOURCE, ShadowFilters};
pub use sampling::{
    SHADOW_BIND_GROUP, SHADOW_SAMPLING_WGSL, create_comparison_sampler, create_shadow_bind_group_layout,
};
pub use shadow_map::{SHADOW_DEPTH_FORMAT, ScratchTarget, ShadowMapArray, ShadowMapDesc, ShadowMapError, slice_format};
pub use system::CascadedShadows;
