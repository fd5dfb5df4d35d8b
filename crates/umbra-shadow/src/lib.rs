//! Cascaded shadow-map math: frustum partitioning, light volume fitting,
//! texel snapping, technique encode/decode, prefilter kernels and the
//! shading-time sampler. Everything here is pure CPU code; the GPU side
//! lives in `umbra-render`.

mod camera;
mod cascade;
pub mod filter;
mod fit;
mod image;
mod partition;
pub mod sampler;
mod settings;
mod snap;
pub mod technique;
mod uniform;

pub use camera::{LightCamera, ViewerCamera};
pub use cascade::{Cascade, CascadeSet, CascadeStats, Viewport, compute_cascades};
pub use filter::{GaussianKernel, blur_separable, downsample};
pub use fit::{LightVolume, fit_cascade, slice_diameter};
pub use image::ShadowImage;
pub use partition::{CascadeInterval, CascadePartition, partition, practical_split_weights};
pub use sampler::{CASCADE_TINTS, CascadeSampler, ShadowReceiver, ShadowTexels};
pub use settings::{
    BlurDomain, CascadeSelection, DepthBias, MAX_CASCADES, MAX_RESOLUTION, MIN_RESOLUTION,
    NearFarFit, ShadowSettings, ShadowTechnique, XyFit,
};
pub use snap::TexelSnapper;
pub use technique::{DECODERS, ENCODERS, TechniqueParams, decode, encode};
pub use uniform::ShadowUniform;
