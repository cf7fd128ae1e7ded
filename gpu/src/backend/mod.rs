//! GPU backend abstraction layer.
//!
//! This module provides a trait-based abstraction for GPU backends, allowing
//! the pools, pipelines and frame loop to work against different GPU APIs.
//!
//! # Available Backends
//!
//! - `dummy` (default): Bookkeeping-only backend for testing and tooling
//! - `vulkan-backend`: Native Vulkan backend using ash and gpu-allocator
//!
//! # Architecture
//!
//! Each backend implements [`RenderBackend`], a thin binding layer limited to
//! the operations the higher layers actually use:
//! - Synchronization primitives (fences, binary and timeline semaphores)
//! - Command pools, command buffers, recording and submission
//! - Buffers, images, views, samplers, render passes and framebuffers
//! - Descriptor layouts, pools and sets
//! - Shader modules, pipeline layouts and pipelines
//! - Surface queries, swapchain creation, acquire and present
//!
//! The backend is chosen once at startup through [`create_backend`] and then
//! passed explicitly to every object that needs it.

pub mod dummy;
mod handle;

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

use std::sync::Arc;

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::command::{
    CommandBufferLevel, CommandBufferUsage, RenderPassBegin, ResetMode, Submission,
};
use crate::config::InstanceParameters;
use crate::descriptor::{DescriptorBinding, DescriptorPoolSize, DescriptorWrite};
use crate::device::{QueueFamilyInfo, QueueInfo, QueueRole};
use crate::error::GraphicsResult;
use crate::instance::AdapterInfo;
use crate::pipeline::{GraphicsPipelineState, ImageBarrier, PipelineBindPoint, PushConstantRange};
use crate::render_target::RenderPassLayout;
use crate::swapchain::{
    PresentMode, PresentStatus, SurfaceCapabilities, SurfaceFormat, SwapchainProperties,
};
use crate::sync::SemaphoreKind;
use crate::types::{
    BufferCopy, BufferDescriptor, Extent2d, Extent3d, FormatFeatures, IndexType,
    SamplerDescriptor, ScissorRect, ShaderStages, TextureDescriptor, TextureFormat, Viewport,
};

pub use dummy::{DummyBackend, DummyCommand};
pub use handle::{
    BufferHandle, CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FramebufferHandle, ImageHandle,
    ImageViewHandle, PipelineHandle, PipelineLayoutHandle, QueueHandle, RenderPassHandle,
    SamplerHandle, SemaphoreHandle, ShaderModuleHandle, SurfaceHandle, SwapchainHandle,
};

/// Which backend to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Prefer Vulkan, fall back to the dummy backend.
    #[default]
    Auto,
    /// Native Vulkan; fails if unavailable.
    Vulkan,
    /// Dummy backend.
    Dummy,
}

/// GPU backend trait for abstracting different GPU APIs.
///
/// All methods take `&self`; backends use interior mutability where the
/// native API needs it. Methods that record into a command buffer never fail:
/// recording errors surface when the buffer is ended.
pub trait RenderBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Which backend this is.
    fn backend_type(&self) -> BackendType;

    /// Information about the selected adapter.
    fn adapter_info(&self) -> AdapterInfo;

    // ------------------------------------------------------------------
    // Device and queues
    // ------------------------------------------------------------------

    /// Queue families exposed by the adapter.
    fn queue_families(&self) -> Vec<QueueFamilyInfo>;

    /// The queue serving `role`.
    fn queue(&self, role: QueueRole) -> QueueInfo;

    /// Device extensions that were enabled at device creation.
    fn enabled_extensions(&self) -> Vec<String>;

    /// Format capabilities for optimal-tiling images.
    fn format_features(&self, format: TextureFormat) -> FormatFeatures;

    /// Block until `queue` has finished all submitted work.
    fn queue_wait_idle(&self, queue: QueueHandle) -> GraphicsResult<()>;

    /// Block until the whole device is idle.
    fn wait_idle(&self) -> GraphicsResult<()>;

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    /// Create a fence, optionally in the signaled state.
    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle>;

    /// Destroy a fence.
    fn destroy_fence(&self, fence: FenceHandle);

    /// Wait until all `fences` are signaled.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    fn wait_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> GraphicsResult<bool>;

    /// Return `fences` to the unsignaled state.
    fn reset_fences(&self, fences: &[FenceHandle]) -> GraphicsResult<()>;

    /// Non-blocking fence status query.
    fn fence_signaled(&self, fence: FenceHandle) -> GraphicsResult<bool>;

    /// Create a binary or timeline semaphore.
    fn create_semaphore(&self, kind: SemaphoreKind) -> GraphicsResult<SemaphoreHandle>;

    /// Destroy a semaphore.
    fn destroy_semaphore(&self, semaphore: SemaphoreHandle);

    /// Current counter value of a timeline semaphore.
    fn semaphore_value(&self, semaphore: SemaphoreHandle) -> GraphicsResult<u64>;

    /// Wait until a timeline semaphore reaches `value`.
    ///
    /// Returns `Ok(false)` if the timeout elapsed first.
    fn wait_semaphore(
        &self,
        semaphore: SemaphoreHandle,
        value: u64,
        timeout_ns: u64,
    ) -> GraphicsResult<bool>;

    /// Signal a timeline semaphore from the host.
    fn signal_semaphore(&self, semaphore: SemaphoreHandle, value: u64) -> GraphicsResult<()>;

    // ------------------------------------------------------------------
    // Command pools and buffers
    // ------------------------------------------------------------------

    /// Create a command pool whose flags match `reset_mode`.
    fn create_command_pool(
        &self,
        queue_family: u32,
        reset_mode: ResetMode,
    ) -> GraphicsResult<CommandPoolHandle>;

    /// Destroy a command pool and every buffer allocated from it.
    fn destroy_command_pool(&self, pool: CommandPoolHandle);

    /// Reset every buffer of a pool at once.
    fn reset_command_pool(&self, pool: CommandPoolHandle) -> GraphicsResult<()>;

    /// Allocate one command buffer.
    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> GraphicsResult<CommandBufferHandle>;

    /// Return command buffers to their pool.
    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]);

    /// Start recording.
    fn begin_command_buffer(
        &self,
        buffer: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> GraphicsResult<()>;

    /// Finish recording.
    fn end_command_buffer(&self, buffer: CommandBufferHandle) -> GraphicsResult<()>;

    /// Reset a single command buffer.
    fn reset_command_buffer(&self, buffer: CommandBufferHandle) -> GraphicsResult<()>;

    /// Submit work to a queue, optionally signaling `fence` on completion.
    fn submit(
        &self,
        queue: QueueHandle,
        submission: &Submission,
        fence: Option<FenceHandle>,
    ) -> GraphicsResult<()>;

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    /// Record image layout transitions.
    fn cmd_pipeline_barrier(&self, buffer: CommandBufferHandle, barriers: &[ImageBarrier]);

    /// Begin a render pass instance.
    fn cmd_begin_render_pass(&self, buffer: CommandBufferHandle, begin: &RenderPassBegin);

    /// End the current render pass instance.
    fn cmd_end_render_pass(&self, buffer: CommandBufferHandle);

    /// Bind a pipeline.
    fn cmd_bind_pipeline(
        &self,
        buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    );

    /// Bind one descriptor set at `set_index`.
    fn cmd_bind_descriptor_set(
        &self,
        buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    );

    /// Update push constants.
    fn cmd_push_constants(
        &self,
        buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    );

    /// Bind a vertex buffer at binding 0.
    fn cmd_bind_vertex_buffer(&self, buffer: CommandBufferHandle, vertex: BufferHandle, offset: u64);

    /// Bind an index buffer.
    fn cmd_bind_index_buffer(
        &self,
        buffer: CommandBufferHandle,
        index: BufferHandle,
        offset: u64,
        index_type: IndexType,
    );

    /// Set the dynamic viewport.
    fn cmd_set_viewport(&self, buffer: CommandBufferHandle, viewport: &Viewport);

    /// Set the dynamic scissor.
    fn cmd_set_scissor(&self, buffer: CommandBufferHandle, scissor: &ScissorRect);

    /// Non-indexed draw.
    fn cmd_draw(
        &self,
        buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    );

    /// Indexed draw.
    fn cmd_draw_indexed(
        &self,
        buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    );

    /// Compute dispatch.
    fn cmd_dispatch(&self, buffer: CommandBufferHandle, x: u32, y: u32, z: u32);

    /// Copy regions between buffers.
    fn cmd_copy_buffer(
        &self,
        buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    );

    /// Copy tightly packed buffer data into an image in `TransferDst` layout.
    fn cmd_copy_buffer_to_image(
        &self,
        buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        format: TextureFormat,
        extent: Extent3d,
        array_layers: u32,
    );

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    /// Create a buffer and bind memory to it.
    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle>;

    /// Write host data into a host-visible buffer.
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()>;

    /// Read back a host-visible buffer.
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> GraphicsResult<Vec<u8>>;

    /// Destroy a buffer and free its memory.
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Create an image and bind device-local memory to it.
    fn create_image(&self, descriptor: &TextureDescriptor) -> GraphicsResult<ImageHandle>;

    /// Destroy an image and free its memory.
    fn destroy_image(&self, image: ImageHandle);

    /// Create a view covering all layers of `image`.
    fn create_image_view(
        &self,
        image: ImageHandle,
        format: TextureFormat,
        array_layers: u32,
    ) -> GraphicsResult<ImageViewHandle>;

    /// Destroy an image view.
    fn destroy_image_view(&self, view: ImageViewHandle);

    /// Create a sampler.
    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GraphicsResult<SamplerHandle>;

    /// Destroy a sampler.
    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Create a render pass for the given attachment layout.
    fn create_render_pass(&self, layout: &RenderPassLayout) -> GraphicsResult<RenderPassHandle>;

    /// Destroy a render pass.
    fn destroy_render_pass(&self, render_pass: RenderPassHandle);

    /// Create a framebuffer over `attachments` (colors first, then depth).
    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2d,
    ) -> GraphicsResult<FramebufferHandle>;

    /// Destroy a framebuffer.
    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle);

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    /// Create a descriptor set layout.
    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> GraphicsResult<DescriptorSetLayoutHandle>;

    /// Destroy a descriptor set layout.
    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle);

    /// Create one fixed-capacity descriptor pool.
    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> GraphicsResult<DescriptorPoolHandle>;

    /// Destroy a descriptor pool and every set allocated from it.
    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle);

    /// Allocate one set per layout from `pool`.
    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> GraphicsResult<Vec<DescriptorSetHandle>>;

    /// Write resource references into a set.
    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]);

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    /// Create a shader module from SPIR-V words.
    fn create_shader_module(&self, spirv: &[u32]) -> GraphicsResult<ShaderModuleHandle>;

    /// Destroy a shader module.
    fn destroy_shader_module(&self, module: ShaderModuleHandle);

    /// Create a pipeline layout.
    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> GraphicsResult<PipelineLayoutHandle>;

    /// Destroy a pipeline layout.
    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle);

    /// Create a graphics pipeline.
    fn create_graphics_pipeline(
        &self,
        state: &GraphicsPipelineState<'_>,
    ) -> GraphicsResult<PipelineHandle>;

    /// Create a compute pipeline.
    fn create_compute_pipeline(
        &self,
        layout: PipelineLayoutHandle,
        module: ShaderModuleHandle,
        entry_point: &str,
    ) -> GraphicsResult<PipelineHandle>;

    /// Destroy a pipeline.
    fn destroy_pipeline(&self, pipeline: PipelineHandle);

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    /// Create a presentation surface for a native window.
    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GraphicsResult<SurfaceHandle>;

    /// Destroy a surface.
    fn destroy_surface(&self, surface: SurfaceHandle);

    /// Query surface capabilities.
    fn surface_capabilities(&self, surface: SurfaceHandle) -> GraphicsResult<SurfaceCapabilities>;

    /// Query supported surface formats.
    fn surface_formats(&self, surface: SurfaceHandle) -> GraphicsResult<Vec<SurfaceFormat>>;

    /// Query supported present modes.
    fn surface_present_modes(&self, surface: SurfaceHandle) -> GraphicsResult<Vec<PresentMode>>;

    /// Create a swapchain, passing the previous one as a recreation hint.
    fn create_swapchain(
        &self,
        surface: SurfaceHandle,
        properties: &SwapchainProperties,
        old_swapchain: Option<SwapchainHandle>,
    ) -> GraphicsResult<SwapchainHandle>;

    /// Destroy a swapchain.
    fn destroy_swapchain(&self, swapchain: SwapchainHandle);

    /// Presentable images owned by a swapchain.
    fn swapchain_images(&self, swapchain: SwapchainHandle) -> GraphicsResult<Vec<ImageHandle>>;

    /// Acquire the next presentable image, signaling `signal` when it is ready.
    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout_ns: u64,
    ) -> GraphicsResult<(u32, PresentStatus)>;

    /// Queue an image for presentation after `wait` semaphores signal.
    fn present(
        &self,
        queue: QueueHandle,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> GraphicsResult<PresentStatus>;
}

static_assertions::assert_obj_safe!(RenderBackend);

/// Selects and creates the backend requested by `params`.
///
/// With [`BackendType::Auto`], a failure to bring up Vulkan is logged and the
/// dummy backend is used instead.
pub fn create_backend(params: &InstanceParameters) -> GraphicsResult<Arc<dyn RenderBackend>> {
    match params.backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(DummyBackend::with_params(params)?))
        }
        BackendType::Vulkan => create_vulkan(params),
        BackendType::Auto => match create_vulkan(params) {
            Ok(backend) => Ok(backend),
            Err(e) => {
                log::warn!("Failed to create Vulkan backend: {}", e);
                log::info!("Using dummy backend");
                Ok(Arc::new(DummyBackend::with_params(params)?))
            }
        },
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan(params: &InstanceParameters) -> GraphicsResult<Arc<dyn RenderBackend>> {
    let backend = vulkan::VulkanBackend::with_params(params)?;
    log::info!("Using Vulkan backend (ash)");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan(_params: &InstanceParameters) -> GraphicsResult<Arc<dyn RenderBackend>> {
    Err(crate::error::GraphicsError::FeatureNotSupported(
        "crate built without the vulkan-backend feature".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_dummy_backend() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let backend = create_backend(&params).unwrap();
        assert_eq!(backend.backend_type(), BackendType::Dummy);
        assert_eq!(backend.name(), "Dummy");
    }
}
