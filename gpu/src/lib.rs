//! # RedLilium GPU
//!
//! Command and resource lifecycle manager for an explicit GPU API.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`GraphicsInstance`] / [`GraphicsDevice`] - backend selection, queue
//!   routing and the resource factory
//! - [`CommandPool`] / [`FencePool`] / [`SemaphorePool`] - recycling of
//!   command buffers and synchronization primitives
//! - [`DescriptorPool`] / [`DescriptorSetCache`] - chained descriptor
//!   allocation and per-object set packs
//! - [`GraphicsPipeline`] / [`ComputePipeline`] - pipelines built from SPIR-V
//!   with reflected bindings
//! - [`RenderTarget`] / [`RenderContext`] - offscreen passes and the
//!   swapchain frame loop
//! - Deferred destruction: objects dropped while the GPU may still use them
//!   are released `frames_in_flight` frames later
//!
//! Two backends are available: Vulkan (through `ash`) and a dummy backend
//! that runs everything on the CPU for tests.
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_gpu::{DeviceParameters, GraphicsInstance, InstanceParameters, SwapchainConfig};
//!
//! let instance = GraphicsInstance::new(InstanceParameters::new())?;
//! let device = instance.create_device(DeviceParameters::new())?;
//! let surface = instance.create_surface(&window)?;
//! let mut context = RenderContext::new(&device, surface, SwapchainConfig::new())?;
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod profiling;
pub mod render_target;
pub mod resources;
pub mod swapchain;
pub mod sync;
pub mod types;

// Re-export main types for convenience
pub use backend::{BackendType, DummyBackend, RenderBackend};
pub use command::{
    CommandBuffer, CommandBufferLevel, CommandBufferState, CommandBufferUsage, CommandPool,
    ResetMode, Submission, TimelineCommandBuffer,
};
pub use config::{DeviceParameters, InstanceParameters, SwapchainConfig};
pub use context::RenderContext;
pub use descriptor::{DescriptorPool, DescriptorSetCache, DescriptorType};
pub use device::{ExtensionRequests, GraphicsDevice, QueueRole};
pub use error::{CheckPolicy, GraphicsError, GraphicsResult, OrAbort};
pub use instance::{AdapterInfo, AdapterType, GraphicsInstance, Surface};
pub use pipeline::{ComputePipeline, GraphicsPipeline, PipelineDescriptor, Shader};
pub use render_target::{RenderTarget, RenderTargetDescriptor};
pub use resources::{Buffer, Sampler, Texture};
pub use swapchain::{PresentMode, PresentStatus, Swapchain};
pub use sync::{FencePool, FrameSync, SemaphorePool, Timeline};
pub use types::{
    BufferDescriptor, BufferUsage, ClearValue, Extent2d, Extent3d, SamplerDescriptor,
    TextureDescriptor, TextureFormat, TextureLayout, TextureUsage,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging-related state and report the build.
///
/// Call once before creating an instance.
pub fn init() {
    log::info!(
        "RedLilium GPU v{} initialized (vulkan: {})",
        VERSION,
        backend::has_gpu_backend()
    );
}

static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_dummy_backend() {
        let backend = DummyBackend::new();
        assert_eq!(backend.name(), "Dummy");
    }
}
