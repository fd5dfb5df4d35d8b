//! Headless GPU device setup.
//!
//! The shadow subsystem never owns a window; tests and the demo binary use
//! [`GpuContext`] to get a device, while a host renderer passes its own.

/// Error type for device initialization failures.
#[derive(Debug, thiserror::Error)]
pub enum GpuContextError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),
}

/// Owns the instance, adapter, device, and queue of a headless device.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

/// Optional features the shadow passes take advantage of when present.
pub const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::DEPTH_CLIP_CONTROL;

impl GpuContext {
    /// Request an adapter without a surface and open a device on it.
    pub async fn new_headless() -> Result<Self, GpuContextError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = match instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
        {
            Ok(adapter) => adapter,
            Err(_) => return Err(GpuContextError::NoAdapter),
        };

        let info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let required_features = adapter.features() & OPTIONAL_FEATURES;
        if !required_features.contains(wgpu::Features::DEPTH_CLIP_CONTROL) {
            log::debug!("DEPTH_CLIP_CONTROL unavailable, casters will be clipped at the light near plane");
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("umbra-device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }

    /// Whether caster pipelines can clamp depth instead of clipping.
    pub fn supports_unclipped_depth(&self) -> bool {
        self.device
            .features()
            .contains(wgpu::Features::DEPTH_CLIP_CONTROL)
    }
}

/// Initialize a headless device synchronously using `pollster`.
pub fn init_headless_blocking() -> Result<GpuContext, GpuContextError> {
    pollster::block_on(GpuContext::new_headless())
}
