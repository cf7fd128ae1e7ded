//! Parameter structs for instance, device and swapchain creation.
//!
//! All parameters are plain builder-style structs: start from `new()` (or
//! `Default`) and adjust with `with_*` methods.

use crate::backend::BackendType;
use crate::descriptor::DescriptorPoolSize;
use crate::error::CheckPolicy;
use crate::swapchain::{ColorSpace, CompositeAlpha, PresentMode, SurfaceFormat, SurfaceTransform};
use crate::types::{Extent2d, TextureFormat, TextureUsage};

pub use crate::device::ExtensionRequests;

/// Default number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: u32 = 3;

/// Default capacity of one descriptor pool chain link.
pub const DEFAULT_MAX_SETS_PER_POOL: u32 = 64;

/// Default command ceiling before a timeline command buffer splits.
pub const DEFAULT_MAX_COMMANDS_PER_BUFFER: u32 = 4096;

/// Parameters for creating a graphics instance and its backend.
#[derive(Debug, Clone)]
pub struct InstanceParameters {
    /// Which backend to bring up.
    pub backend: BackendType,
    /// Enable API validation layers and route their output into `log`.
    pub validation: bool,
    /// Application name reported to the driver.
    pub application_name: String,
    /// Instance-level extensions, `{name: is_optional}`.
    pub instance_extensions: ExtensionRequests,
    /// Device-level extensions, `{name: is_optional}`.
    pub device_extensions: ExtensionRequests,
}

impl InstanceParameters {
    /// Create parameters with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Select the backend.
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Enable or disable validation.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation = enabled;
        self
    }

    /// Set the application name.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Replace the instance extension requests.
    pub fn with_instance_extensions(mut self, extensions: ExtensionRequests) -> Self {
        self.instance_extensions = extensions;
        self
    }

    /// Replace the device extension requests.
    pub fn with_device_extensions(mut self, extensions: ExtensionRequests) -> Self {
        self.device_extensions = extensions;
        self
    }
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            validation: cfg!(debug_assertions),
            application_name: "RedLilium".to_string(),
            instance_extensions: ExtensionRequests::new(),
            device_extensions: ExtensionRequests::new(),
        }
    }
}

/// Parameters for creating a [`GraphicsDevice`](crate::device::GraphicsDevice).
#[derive(Debug, Clone)]
pub struct DeviceParameters {
    /// Frames that may be in flight at once; also the deferred destruction depth.
    pub frames_in_flight: u32,
    /// How failed API calls are treated.
    pub check_policy: CheckPolicy,
    /// Timeout for fence waits, in nanoseconds.
    pub fence_timeout: u64,
    /// Sets per descriptor pool chain link.
    pub max_sets_per_pool: u32,
    /// Per-type descriptor counts of each chain link.
    pub descriptor_pool_sizes: Vec<DescriptorPoolSize>,
    /// Commands recorded into one buffer before a timeline command buffer splits.
    pub max_commands_per_buffer: u32,
}

impl DeviceParameters {
    /// Create parameters with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of frames in flight (at least 1).
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    /// Set the check policy.
    pub fn with_check_policy(mut self, policy: CheckPolicy) -> Self {
        self.check_policy = policy;
        self
    }

    /// Set the fence timeout in nanoseconds.
    pub fn with_fence_timeout(mut self, timeout_ns: u64) -> Self {
        self.fence_timeout = timeout_ns;
        self
    }

    /// Set the descriptor pool link capacity (at least 1).
    pub fn with_max_sets_per_pool(mut self, max_sets: u32) -> Self {
        self.max_sets_per_pool = max_sets.max(1);
        self
    }

    /// Set the per-type descriptor counts.
    pub fn with_descriptor_pool_sizes(mut self, sizes: Vec<DescriptorPoolSize>) -> Self {
        self.descriptor_pool_sizes = sizes;
        self
    }

    /// Set the split ceiling for timeline command buffers (at least 1).
    pub fn with_max_commands_per_buffer(mut self, max_commands: u32) -> Self {
        self.max_commands_per_buffer = max_commands.max(1);
        self
    }
}

impl Default for DeviceParameters {
    fn default() -> Self {
        Self {
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
            check_policy: CheckPolicy::default(),
            fence_timeout: u64::MAX,
            max_sets_per_pool: DEFAULT_MAX_SETS_PER_POOL,
            descriptor_pool_sizes: DescriptorPoolSize::default_sizes(),
            max_commands_per_buffer: DEFAULT_MAX_COMMANDS_PER_BUFFER,
        }
    }
}

/// Requested swapchain properties and the fallback priority lists.
///
/// Every value is a request; negotiation against the surface may substitute
/// any of them.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapchainConfig {
    /// Requested number of images.
    pub image_count: u32,
    /// Requested extent; a zero dimension means "use the surface's extent".
    pub extent: Extent2d,
    /// Requested surface format.
    pub format: SurfaceFormat,
    /// Formats to try, in order, when `format` is unavailable.
    pub format_priority: Vec<SurfaceFormat>,
    /// Requested present mode.
    pub present_mode: PresentMode,
    /// Present modes to try, in order, when `present_mode` is unavailable.
    pub present_mode_priority: Vec<PresentMode>,
    /// Requested image usage.
    pub image_usage: TextureUsage,
    /// Requested pre-transform.
    pub transform: SurfaceTransform,
    /// Requested composite alpha mode.
    pub composite_alpha: CompositeAlpha,
    /// Requested array layers.
    pub array_layers: u32,
}

impl SwapchainConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the requested extent.
    pub fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.extent = Extent2d::new(width, height);
        self
    }

    /// Set the requested image count.
    pub fn with_image_count(mut self, count: u32) -> Self {
        self.image_count = count;
        self
    }

    /// Set the requested surface format.
    pub fn with_format(mut self, format: SurfaceFormat) -> Self {
        self.format = format;
        self
    }

    /// Replace the format priority list.
    pub fn with_format_priority(mut self, priority: Vec<SurfaceFormat>) -> Self {
        self.format_priority = priority;
        self
    }

    /// Set the requested present mode.
    pub fn with_present_mode(mut self, mode: PresentMode) -> Self {
        self.present_mode = mode;
        self
    }

    /// Replace the present mode priority list.
    pub fn with_present_mode_priority(mut self, priority: Vec<PresentMode>) -> Self {
        self.present_mode_priority = priority;
        self
    }

    /// Set the requested image usage.
    pub fn with_image_usage(mut self, usage: TextureUsage) -> Self {
        self.image_usage = usage;
        self
    }

    /// Set the requested pre-transform.
    pub fn with_transform(mut self, transform: SurfaceTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Set the requested composite alpha mode.
    pub fn with_composite_alpha(mut self, alpha: CompositeAlpha) -> Self {
        self.composite_alpha = alpha;
        self
    }
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        let srgb = |format| SurfaceFormat::new(format, ColorSpace::SrgbNonlinear);
        Self {
            image_count: 3,
            extent: Extent2d::new(0, 0),
            format: srgb(TextureFormat::Bgra8UnormSrgb),
            format_priority: vec![
                srgb(TextureFormat::Bgra8UnormSrgb),
                srgb(TextureFormat::Rgba8UnormSrgb),
                srgb(TextureFormat::Bgra8Unorm),
                srgb(TextureFormat::Rgba8Unorm),
            ],
            present_mode: PresentMode::Fifo,
            present_mode_priority: vec![
                PresentMode::Mailbox,
                PresentMode::Immediate,
                PresentMode::Fifo,
            ],
            image_usage: TextureUsage::RENDER_ATTACHMENT,
            transform: SurfaceTransform::Identity,
            composite_alpha: CompositeAlpha::Opaque,
            array_layers: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_parameter_defaults() {
        let params = DeviceParameters::default();
        assert_eq!(params.frames_in_flight, 3);
        assert_eq!(params.fence_timeout, u64::MAX);
        assert_eq!(params.max_sets_per_pool, 64);
        assert_eq!(params.max_commands_per_buffer, 4096);
        assert_eq!(params.descriptor_pool_sizes.len(), 11);
    }

    #[test]
    fn test_frames_in_flight_never_zero() {
        let params = DeviceParameters::new().with_frames_in_flight(0);
        assert_eq!(params.frames_in_flight, 1);
    }

    #[test]
    fn test_swapchain_config_defaults() {
        let config = SwapchainConfig::default();
        assert_eq!(config.image_count, 3);
        assert_eq!(config.format.format, TextureFormat::Bgra8UnormSrgb);
        assert_eq!(config.present_mode, PresentMode::Fifo);
        assert_eq!(config.format_priority.len(), 4);
        assert_eq!(config.present_mode_priority.last(), Some(&PresentMode::Fifo));
    }
}
