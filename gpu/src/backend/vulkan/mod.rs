//! Vulkan backend built on `ash` and `gpu-allocator`.
//!
//! [`VulkanBackend`] owns the instance, the logical device, one queue per
//! role and the memory allocator. Every other native object is created and
//! destroyed on request through [`RenderBackend`]; lifetime management lives
//! in the owning wrappers of the crate, never here.
//!
//! Buffers and images keep their memory allocations in side tables keyed by
//! the native handle so they can be freed when the handle is destroyed.

mod allocator;
mod conversion;
mod debug;
mod device;
mod instance;
mod pipeline;
mod swapchain;

use std::collections::HashMap;
use std::mem::ManuallyDrop;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, Allocator};
use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::command::{
    CommandBufferLevel, CommandBufferUsage, RenderPassBegin, ResetMode, Submission,
};
use crate::config::InstanceParameters;
use crate::descriptor::{DescriptorBinding, DescriptorPoolSize, DescriptorResource, DescriptorWrite};
use crate::device::{QueueFamilyInfo, QueueInfo, QueueRole};
use crate::error::{GraphicsError, GraphicsResult};
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

use self::conversion::*;
use self::debug::DebugMessenger;
use self::swapchain::PresentLoaders;
use super::{
    BackendType, BufferHandle, CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FramebufferHandle, ImageHandle,
    ImageViewHandle, PipelineHandle, PipelineLayoutHandle, QueueHandle, RenderBackend,
    RenderPassHandle, SamplerHandle, SemaphoreHandle, ShaderModuleHandle, SurfaceHandle,
    SwapchainHandle,
};

/// Unwraps a crate handle into the native Vulkan handle.
trait Native {
    type Raw;
    fn native(self) -> Self::Raw;
}

macro_rules! native_handle {
    ($($handle:ident => $vk:ident),* $(,)?) => {
        $(
            impl Native for $handle {
                type Raw = vk::$vk;

                fn native(self) -> vk::$vk {
                    match self {
                        $handle::Vulkan(raw) => raw,
                        $handle::Dummy(id) => {
                            log::error!(
                                "{} {} does not belong to the Vulkan backend",
                                stringify!($handle),
                                id
                            );
                            vk::$vk::null()
                        }
                    }
                }
            }
        )*
    };
}

native_handle!(
    QueueHandle => Queue,
    FenceHandle => Fence,
    SemaphoreHandle => Semaphore,
    CommandPoolHandle => CommandPool,
    CommandBufferHandle => CommandBuffer,
    BufferHandle => Buffer,
    ImageHandle => Image,
    ImageViewHandle => ImageView,
    SamplerHandle => Sampler,
    RenderPassHandle => RenderPass,
    FramebufferHandle => Framebuffer,
    DescriptorSetLayoutHandle => DescriptorSetLayout,
    DescriptorPoolHandle => DescriptorPool,
    DescriptorSetHandle => DescriptorSet,
    ShaderModuleHandle => ShaderModule,
    PipelineLayoutHandle => PipelineLayout,
    PipelineHandle => Pipeline,
    SurfaceHandle => SurfaceKHR,
    SwapchainHandle => SwapchainKHR,
);

fn native_all<H: Native + Copy>(handles: &[H]) -> Vec<H::Raw> {
    handles.iter().map(|h| h.native()).collect()
}

/// Map a failed Vulkan call to the crate error space.
fn vk_error(what: &str, e: vk::Result) -> GraphicsError {
    match e {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY
        | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
        | vk::Result::ERROR_OUT_OF_POOL_MEMORY
        | vk::Result::ERROR_FRAGMENTED_POOL => GraphicsError::OutOfMemory,
        vk::Result::ERROR_SURFACE_LOST_KHR => GraphicsError::SurfaceLost,
        other => GraphicsError::Internal(format!("{} failed: {:?}", what, other)),
    }
}

fn creation_error(what: &str, e: vk::Result) -> GraphicsError {
    match vk_error(what, e) {
        GraphicsError::Internal(_) => {
            GraphicsError::ResourceCreationFailed(format!("Failed to create {}: {:?}", what, e))
        }
        other => other,
    }
}

/// Vulkan implementation of [`RenderBackend`].
pub struct VulkanBackend {
    entry: ash::Entry,
    instance: ash::Instance,
    debug: Option<DebugMessenger>,
    physical_device: vk::PhysicalDevice,
    adapter: AdapterInfo,
    families: Vec<QueueFamilyInfo>,
    queues: [QueueInfo; 3],
    device: ash::Device,
    extensions: Vec<String>,
    present: PresentLoaders,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    buffers: Mutex<HashMap<vk::Buffer, Allocation>>,
    images: Mutex<HashMap<vk::Image, Allocation>>,
}

impl VulkanBackend {
    /// Bring up Vulkan for `params`.
    ///
    /// Loads the driver, creates the instance with the resolved instance
    /// extensions, picks the best adapter, resolves one queue family per
    /// role and creates the logical device with the resolved device
    /// extensions.
    pub fn with_params(params: &InstanceParameters) -> GraphicsResult<Self> {
        let entry = unsafe { ash::Entry::load() }.map_err(|e| {
            GraphicsError::InitializationFailed(format!("Failed to load Vulkan: {}", e))
        })?;

        let bundle = instance::create_instance(&entry, params)?;
        let instance = bundle.instance;
        let debug = bundle.debug;
        let destroy_instance = |instance: &ash::Instance, debug: &Option<DebugMessenger>| unsafe {
            if let Some(debug) = debug {
                debug.destroy();
            }
            instance.destroy_instance(None);
        };

        let (adapter, device, extensions) = match Self::open_device(&instance, params) {
            Ok(opened) => opened,
            Err(e) => {
                destroy_instance(&instance, &debug);
                return Err(e);
            }
        };

        let allocator =
            match allocator::create_allocator(&instance, adapter.physical_device, device.clone()) {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    destroy_instance(&instance, &debug);
                    return Err(e);
                }
            };

        let queues = QueueRole::ALL.map(|role| {
            let family = adapter.queue_families.family(role);
            let queue = unsafe { device.get_device_queue(family, 0) };
            QueueInfo {
                family,
                handle: QueueHandle::Vulkan(queue),
            }
        });

        let present = PresentLoaders::new(&entry, &instance, &device);

        log::info!(
            "Vulkan backend initialized on {} (graphics family {}, compute family {}, transfer family {}, validation: {})",
            adapter.info.name,
            queues[0].family,
            queues[1].family,
            queues[2].family,
            debug.is_some()
        );

        Ok(Self {
            entry,
            instance,
            debug,
            physical_device: adapter.physical_device,
            adapter: adapter.info,
            families: adapter.families,
            queues,
            device,
            extensions,
            present,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            buffers: Mutex::new(HashMap::new()),
            images: Mutex::new(HashMap::new()),
        })
    }

    fn open_device(
        instance: &ash::Instance,
        params: &InstanceParameters,
    ) -> GraphicsResult<(device::SelectedAdapter, ash::Device, Vec<String>)> {
        let adapter = device::select_physical_device(instance)?;
        let available = device::available_device_extensions(instance, adapter.physical_device)?;
        let extensions = device::device_requests(params).resolve(&available)?;
        log::debug!("Enabling device extensions: {:?}", extensions);
        let device = device::create_logical_device(instance, &adapter, &extensions)?;
        Ok((adapter, device, extensions))
    }

    /// The logical device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The instance.
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The selected physical device.
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    fn allocate_memory(
        &self,
        name: &str,
        requirements: vk::MemoryRequirements,
        location: MemoryLocation,
        linear: bool,
    ) -> GraphicsResult<Allocation> {
        let mut allocator = self.allocator.lock();
        allocator::allocate(&mut allocator, name, requirements, location, linear)
    }

    fn free_memory(&self, allocation: Allocation) {
        let mut allocator = self.allocator.lock();
        allocator::free(&mut allocator, allocation);
    }
}

impl RenderBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Vulkan
    }

    fn adapter_info(&self) -> AdapterInfo {
        self.adapter.clone()
    }

    fn queue_families(&self) -> Vec<QueueFamilyInfo> {
        self.families.clone()
    }

    fn queue(&self, role: QueueRole) -> QueueInfo {
        self.queues[role.index()]
    }

    fn enabled_extensions(&self) -> Vec<String> {
        self.extensions.clone()
    }

    fn format_features(&self, format: TextureFormat) -> FormatFeatures {
        let properties = unsafe {
            self.instance.get_physical_device_format_properties(
                self.physical_device,
                convert_texture_format(format),
            )
        };
        format_features_from_vk(properties.optimal_tiling_features)
    }

    fn queue_wait_idle(&self, queue: QueueHandle) -> GraphicsResult<()> {
        unsafe { self.device.queue_wait_idle(queue.native()) }
            .map_err(|e| vk_error("queue_wait_idle", e))
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        unsafe { self.device.device_wait_idle() }.map_err(|e| vk_error("device_wait_idle", e))
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        unsafe { self.device.create_fence(&create_info, None) }
            .map(FenceHandle::Vulkan)
            .map_err(|e| creation_error("fence", e))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        unsafe { self.device.destroy_fence(fence.native(), None) };
    }

    fn wait_fences(&self, fences: &[FenceHandle], timeout_ns: u64) -> GraphicsResult<bool> {
        if fences.is_empty() {
            return Ok(true);
        }
        let raw = native_all(fences);
        match unsafe { self.device.wait_for_fences(&raw, true, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("wait_for_fences", e)),
        }
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> GraphicsResult<()> {
        if fences.is_empty() {
            return Ok(());
        }
        let raw = native_all(fences);
        unsafe { self.device.reset_fences(&raw) }.map_err(|e| vk_error("reset_fences", e))
    }

    fn fence_signaled(&self, fence: FenceHandle) -> GraphicsResult<bool> {
        unsafe { self.device.get_fence_status(fence.native()) }
            .map_err(|e| vk_error("get_fence_status", e))
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> GraphicsResult<SemaphoreHandle> {
        let semaphore = match kind {
            SemaphoreKind::Binary => {
                let create_info = vk::SemaphoreCreateInfo::default();
                unsafe { self.device.create_semaphore(&create_info, None) }
            }
            SemaphoreKind::Timeline { initial } => {
                let mut type_info = vk::SemaphoreTypeCreateInfo::default()
                    .semaphore_type(vk::SemaphoreType::TIMELINE)
                    .initial_value(initial);
                let create_info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
                unsafe { self.device.create_semaphore(&create_info, None) }
            }
        };
        semaphore
            .map(SemaphoreHandle::Vulkan)
            .map_err(|e| creation_error("semaphore", e))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        unsafe { self.device.destroy_semaphore(semaphore.native(), None) };
    }

    fn semaphore_value(&self, semaphore: SemaphoreHandle) -> GraphicsResult<u64> {
        unsafe { self.device.get_semaphore_counter_value(semaphore.native()) }
            .map_err(|e| vk_error("get_semaphore_counter_value", e))
    }

    fn wait_semaphore(
        &self,
        semaphore: SemaphoreHandle,
        value: u64,
        timeout_ns: u64,
    ) -> GraphicsResult<bool> {
        let semaphores = [semaphore.native()];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(e) => Err(vk_error("wait_semaphores", e)),
        }
    }

    fn signal_semaphore(&self, semaphore: SemaphoreHandle, value: u64) -> GraphicsResult<()> {
        let signal_info = vk::SemaphoreSignalInfo::default()
            .semaphore(semaphore.native())
            .value(value);
        unsafe { self.device.signal_semaphore(&signal_info) }
            .map_err(|e| vk_error("signal_semaphore", e))
    }

    // ------------------------------------------------------------------
    // Command pools and buffers
    // ------------------------------------------------------------------

    fn create_command_pool(
        &self,
        queue_family: u32,
        reset_mode: ResetMode,
    ) -> GraphicsResult<CommandPoolHandle> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(command_pool_flags(reset_mode));
        unsafe { self.device.create_command_pool(&create_info, None) }
            .map(CommandPoolHandle::Vulkan)
            .map_err(|e| creation_error("command pool", e))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        unsafe { self.device.destroy_command_pool(pool.native(), None) };
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) -> GraphicsResult<()> {
        unsafe {
            self.device
                .reset_command_pool(pool.native(), vk::CommandPoolResetFlags::empty())
        }
        .map_err(|e| vk_error("reset_command_pool", e))
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> GraphicsResult<CommandBufferHandle> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(pool.native())
            .level(convert_command_buffer_level(level))
            .command_buffer_count(1);
        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(|e| creation_error("command buffer", e))?;
        buffers
            .into_iter()
            .next()
            .map(CommandBufferHandle::Vulkan)
            .ok_or_else(|| GraphicsError::Internal("driver returned no command buffer".to_string()))
    }

    fn free_command_buffers(&self, pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        if buffers.is_empty() {
            return;
        }
        let raw = native_all(buffers);
        unsafe { self.device.free_command_buffers(pool.native(), &raw) };
    }

    fn begin_command_buffer(
        &self,
        buffer: CommandBufferHandle,
        usage: CommandBufferUsage,
    ) -> GraphicsResult<()> {
        let begin_info =
            vk::CommandBufferBeginInfo::default().flags(convert_command_buffer_usage(usage));
        unsafe { self.device.begin_command_buffer(buffer.native(), &begin_info) }
            .map_err(|e| vk_error("begin_command_buffer", e))
    }

    fn end_command_buffer(&self, buffer: CommandBufferHandle) -> GraphicsResult<()> {
        unsafe { self.device.end_command_buffer(buffer.native()) }
            .map_err(|e| vk_error("end_command_buffer", e))
    }

    fn reset_command_buffer(&self, buffer: CommandBufferHandle) -> GraphicsResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(buffer.native(), vk::CommandBufferResetFlags::empty())
        }
        .map_err(|e| vk_error("reset_command_buffer", e))
    }

    fn submit(
        &self,
        queue: QueueHandle,
        submission: &Submission,
        fence: Option<FenceHandle>,
    ) -> GraphicsResult<()> {
        let wait_semaphores: Vec<vk::Semaphore> = submission
            .waits()
            .iter()
            .map(|w| w.semaphore.native())
            .collect();
        let wait_stages: Vec<vk::PipelineStageFlags> = submission
            .waits()
            .iter()
            .map(|w| convert_stages(w.stage))
            .collect();
        let wait_values: Vec<u64> = submission.waits().iter().map(|w| w.value).collect();
        let signal_semaphores: Vec<vk::Semaphore> = submission
            .signals()
            .iter()
            .map(|s| s.semaphore.native())
            .collect();
        let signal_values: Vec<u64> = submission.signals().iter().map(|s| s.value).collect();
        let command_buffers = native_all(submission.command_buffers());

        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);

        let mut submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        if submission.has_timeline_values() {
            submit_info = submit_info.push_next(&mut timeline_info);
        }

        let fence = fence.map(Native::native).unwrap_or(vk::Fence::null());
        unsafe {
            self.device
                .queue_submit(queue.native(), std::slice::from_ref(&submit_info), fence)
        }
        .map_err(|e| vk_error("queue_submit", e))
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    fn cmd_pipeline_barrier(&self, buffer: CommandBufferHandle, barriers: &[ImageBarrier]) {
        if barriers.is_empty() {
            return;
        }
        let mut src_stage = vk::PipelineStageFlags::empty();
        let mut dst_stage = vk::PipelineStageFlags::empty();
        let image_barriers: Vec<vk::ImageMemoryBarrier> = barriers
            .iter()
            .map(|barrier| {
                src_stage |= convert_stages(barrier.src_stage);
                dst_stage |= convert_stages(barrier.dst_stage);
                vk::ImageMemoryBarrier::default()
                    .old_layout(convert_layout(barrier.old_layout))
                    .new_layout(convert_layout(barrier.new_layout))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(barrier.image.native())
                    .subresource_range(
                        vk::ImageSubresourceRange::default()
                            .aspect_mask(aspect_mask(barrier.format))
                            .base_mip_level(0)
                            .level_count(vk::REMAINING_MIP_LEVELS)
                            .base_array_layer(0)
                            .layer_count(vk::REMAINING_ARRAY_LAYERS),
                    )
                    .src_access_mask(convert_access(barrier.src_access))
                    .dst_access_mask(convert_access(barrier.dst_access))
            })
            .collect();

        unsafe {
            self.device.cmd_pipeline_barrier(
                buffer.native(),
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &image_barriers,
            );
        }
    }

    fn cmd_begin_render_pass(&self, buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        let clear_values: Vec<vk::ClearValue> =
            begin.clear_values.iter().map(convert_clear_value).collect();
        let begin_info = vk::RenderPassBeginInfo::default()
            .render_pass(begin.render_pass.native())
            .framebuffer(begin.framebuffer.native())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D {
                    width: begin.extent.width,
                    height: begin.extent.height,
                },
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.cmd_begin_render_pass(
                buffer.native(),
                &begin_info,
                vk::SubpassContents::INLINE,
            );
        }
    }

    fn cmd_end_render_pass(&self, buffer: CommandBufferHandle) {
        unsafe { self.device.cmd_end_render_pass(buffer.native()) };
    }

    fn cmd_bind_pipeline(
        &self,
        buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        unsafe {
            self.device.cmd_bind_pipeline(
                buffer.native(),
                convert_bind_point(bind_point),
                pipeline.native(),
            );
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                buffer.native(),
                convert_bind_point(bind_point),
                layout.native(),
                set_index,
                &[set.native()],
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &self,
        buffer: CommandBufferHandle,
        layout: PipelineLayoutHandle,
        stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            self.device.cmd_push_constants(
                buffer.native(),
                layout.native(),
                convert_shader_stages(stages),
                offset,
                data,
            );
        }
    }

    fn cmd_bind_vertex_buffer(&self, buffer: CommandBufferHandle, vertex: BufferHandle, offset: u64) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(buffer.native(), 0, &[vertex.native()], &[offset]);
        }
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: CommandBufferHandle,
        index: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        unsafe {
            self.device.cmd_bind_index_buffer(
                buffer.native(),
                index.native(),
                offset,
                convert_index_type(index_type),
            );
        }
    }

    fn cmd_set_viewport(&self, buffer: CommandBufferHandle, viewport: &Viewport) {
        let vk_viewport = vk::Viewport {
            x: viewport.x,
            y: viewport.y,
            width: viewport.width,
            height: viewport.height,
            min_depth: viewport.min_depth,
            max_depth: viewport.max_depth,
        };
        unsafe { self.device.cmd_set_viewport(buffer.native(), 0, &[vk_viewport]) };
    }

    fn cmd_set_scissor(&self, buffer: CommandBufferHandle, scissor: &ScissorRect) {
        let rect = vk::Rect2D {
            offset: vk::Offset2D {
                x: scissor.x,
                y: scissor.y,
            },
            extent: vk::Extent2D {
                width: scissor.width,
                height: scissor.height,
            },
        };
        unsafe { self.device.cmd_set_scissor(buffer.native(), 0, &[rect]) };
    }

    fn cmd_draw(
        &self,
        buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw(
                buffer.native(),
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    fn cmd_draw_indexed(
        &self,
        buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        unsafe {
            self.device.cmd_draw_indexed(
                buffer.native(),
                index_count,
                instance_count,
                first_index,
                vertex_offset,
                first_instance,
            );
        }
    }

    fn cmd_dispatch(&self, buffer: CommandBufferHandle, x: u32, y: u32, z: u32) {
        unsafe { self.device.cmd_dispatch(buffer.native(), x, y, z) };
    }

    fn cmd_copy_buffer(
        &self,
        buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        let vk_regions: Vec<vk::BufferCopy> = regions
            .iter()
            .map(|region| vk::BufferCopy {
                src_offset: region.src_offset,
                dst_offset: region.dst_offset,
                size: region.size,
            })
            .collect();
        unsafe {
            self.device
                .cmd_copy_buffer(buffer.native(), src.native(), dst.native(), &vk_regions);
        }
    }

    fn cmd_copy_buffer_to_image(
        &self,
        buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        format: TextureFormat,
        extent: Extent3d,
        array_layers: u32,
    ) {
        // Copies address a single aspect.
        let aspect = if format.is_depth_stencil() {
            vk::ImageAspectFlags::DEPTH
        } else {
            vk::ImageAspectFlags::COLOR
        };
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(aspect)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(array_layers),
            )
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: extent.depth,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                buffer.native(),
                src.native(),
                dst.native(),
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size.max(1))
            .usage(convert_buffer_usage(descriptor.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| creation_error("buffer", e))?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };
        let name = descriptor.label.as_deref().unwrap_or("buffer");
        let allocation = match self.allocate_memory(
            name,
            requirements,
            allocator::buffer_location(descriptor.usage),
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let bind = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bind {
            unsafe { self.device.destroy_buffer(buffer, None) };
            self.free_memory(allocation);
            return Err(creation_error("buffer memory binding", e));
        }

        self.buffers.lock().insert(buffer, allocation);
        Ok(BufferHandle::Vulkan(buffer))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut buffers = self.buffers.lock();
        let allocation = buffers
            .get_mut(&buffer.native())
            .ok_or_else(|| GraphicsError::InvalidParameter("unknown buffer".to_string()))?;
        let mapped = allocation.mapped_slice_mut().ok_or_else(|| {
            GraphicsError::InvalidParameter("buffer is not host visible".to_string())
        })?;
        let start = offset as usize;
        let end = start + data.len();
        let target = mapped.get_mut(start..end).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "write of {} bytes at offset {} exceeds the buffer",
                data.len(),
                offset
            ))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> GraphicsResult<Vec<u8>> {
        let buffers = self.buffers.lock();
        let allocation = buffers
            .get(&buffer.native())
            .ok_or_else(|| GraphicsError::InvalidParameter("unknown buffer".to_string()))?;
        let mapped = allocation.mapped_slice().ok_or_else(|| {
            GraphicsError::InvalidParameter("buffer is not host visible".to_string())
        })?;
        let start = offset as usize;
        mapped
            .get(start..start + size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "read of {} bytes at offset {} exceeds the buffer",
                    size, offset
                ))
            })
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let raw = buffer.native();
        let allocation = self.buffers.lock().remove(&raw);
        unsafe { self.device.destroy_buffer(raw, None) };
        if let Some(allocation) = allocation {
            self.free_memory(allocation);
        }
    }

    fn create_image(&self, descriptor: &TextureDescriptor) -> GraphicsResult<ImageHandle> {
        let size = descriptor.size;
        let mut flags = vk::ImageCreateFlags::empty();
        if descriptor.array_layers == 6 && size.width == size.height {
            flags |= vk::ImageCreateFlags::CUBE_COMPATIBLE;
        }

        let image_info = vk::ImageCreateInfo::default()
            .flags(flags)
            .image_type(vk::ImageType::TYPE_2D)
            .format(convert_texture_format(descriptor.format))
            .extent(vk::Extent3D {
                width: size.width,
                height: size.height,
                depth: size.depth.max(1),
            })
            .mip_levels(descriptor.mip_level_count.max(1))
            .array_layers(descriptor.array_layers.max(1))
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(convert_texture_usage(descriptor.usage, descriptor.format))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| creation_error("image", e))?;

        let requirements = unsafe { self.device.get_image_memory_requirements(image) };
        let name = descriptor.label.as_deref().unwrap_or("image");
        let allocation =
            match self.allocate_memory(name, requirements, MemoryLocation::GpuOnly, false) {
                Ok(allocation) => allocation,
                Err(e) => {
                    unsafe { self.device.destroy_image(image, None) };
                    return Err(e);
                }
            };

        let bind = unsafe {
            self.device
                .bind_image_memory(image, allocation.memory(), allocation.offset())
        };
        if let Err(e) = bind {
            unsafe { self.device.destroy_image(image, None) };
            self.free_memory(allocation);
            return Err(creation_error("image memory binding", e));
        }

        self.images.lock().insert(image, allocation);
        Ok(ImageHandle::Vulkan(image))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let raw = image.native();
        let allocation = self.images.lock().remove(&raw);
        unsafe { self.device.destroy_image(raw, None) };
        if let Some(allocation) = allocation {
            self.free_memory(allocation);
        }
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        format: TextureFormat,
        array_layers: u32,
    ) -> GraphicsResult<ImageViewHandle> {
        let view_type = if array_layers > 1 {
            vk::ImageViewType::TYPE_2D_ARRAY
        } else {
            vk::ImageViewType::TYPE_2D
        };
        let create_info = vk::ImageViewCreateInfo::default()
            .image(image.native())
            .view_type(view_type)
            .format(convert_texture_format(format))
            .components(vk::ComponentMapping::default())
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask(format))
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(array_layers.max(1)),
            );
        unsafe { self.device.create_image_view(&create_info, None) }
            .map(ImageViewHandle::Vulkan)
            .map_err(|e| creation_error("image view", e))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        unsafe { self.device.destroy_image_view(view.native(), None) };
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GraphicsResult<SamplerHandle> {
        let address_mode = convert_address_mode(descriptor.address_mode);
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(convert_filter(descriptor.mag_filter))
            .min_filter(convert_filter(descriptor.min_filter))
            .mipmap_mode(convert_mipmap_mode(descriptor.mipmap_filter))
            .address_mode_u(address_mode)
            .address_mode_v(address_mode)
            .address_mode_w(address_mode)
            .mip_lod_bias(0.0)
            .anisotropy_enable(descriptor.anisotropy_clamp > 1)
            .max_anisotropy(f32::from(descriptor.anisotropy_clamp.max(1)))
            .compare_enable(descriptor.compare.is_some())
            .compare_op(
                descriptor
                    .compare
                    .map(convert_compare_function)
                    .unwrap_or(vk::CompareOp::ALWAYS),
            )
            .min_lod(0.0)
            .max_lod(descriptor.lod_max_clamp)
            .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK)
            .unnormalized_coordinates(false);

        unsafe { self.device.create_sampler(&sampler_info, None) }
            .map(SamplerHandle::Vulkan)
            .map_err(|e| creation_error("sampler", e))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        unsafe { self.device.destroy_sampler(sampler.native(), None) };
    }

    fn create_render_pass(&self, layout: &RenderPassLayout) -> GraphicsResult<RenderPassHandle> {
        pipeline::create_render_pass(&self.device, layout).map(RenderPassHandle::Vulkan)
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        unsafe { self.device.destroy_render_pass(render_pass.native(), None) };
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        extent: Extent2d,
    ) -> GraphicsResult<FramebufferHandle> {
        let views = native_all(attachments);
        let create_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass.native())
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        unsafe { self.device.create_framebuffer(&create_info, None) }
            .map(FramebufferHandle::Vulkan)
            .map_err(|e| creation_error("framebuffer", e))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        unsafe { self.device.destroy_framebuffer(framebuffer.native(), None) };
    }

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> GraphicsResult<DescriptorSetLayoutHandle> {
        pipeline::create_descriptor_set_layout(&self.device, bindings)
            .map(DescriptorSetLayoutHandle::Vulkan)
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(layout.native(), None)
        };
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> GraphicsResult<DescriptorPoolHandle> {
        pipeline::create_descriptor_pool(&self.device, max_sets, sizes)
            .map(DescriptorPoolHandle::Vulkan)
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        unsafe { self.device.destroy_descriptor_pool(pool.native(), None) };
    }

    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> GraphicsResult<Vec<DescriptorSetHandle>> {
        let raw_layouts = native_all(layouts);
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.native())
            .set_layouts(&raw_layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| vk_error("allocate_descriptor_sets", e))?;
        Ok(sets.into_iter().map(DescriptorSetHandle::Vulkan).collect())
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        let mut buffer_infos = Vec::with_capacity(writes.len());
        let mut image_infos = Vec::with_capacity(writes.len());
        for write in writes {
            match write.resource {
                DescriptorResource::Buffer {
                    buffer,
                    offset,
                    range,
                } => buffer_infos.push(
                    vk::DescriptorBufferInfo::default()
                        .buffer(buffer.native())
                        .offset(offset)
                        .range(range),
                ),
                DescriptorResource::Image {
                    view,
                    sampler,
                    layout,
                } => image_infos.push(
                    vk::DescriptorImageInfo::default()
                        .image_view(view.native())
                        .sampler(sampler.map(Native::native).unwrap_or(vk::Sampler::null()))
                        .image_layout(convert_layout(layout)),
                ),
            }
        }

        let raw_set = set.native();
        let mut next_buffer = 0;
        let mut next_image = 0;
        let mut vk_writes = Vec::with_capacity(writes.len());
        for write in writes {
            let base = vk::WriteDescriptorSet::default()
                .dst_set(raw_set)
                .dst_binding(write.binding)
                .dst_array_element(0)
                .descriptor_type(convert_descriptor_type(write.ty));
            let vk_write = match write.resource {
                DescriptorResource::Buffer { .. } => {
                    next_buffer += 1;
                    base.buffer_info(&buffer_infos[next_buffer - 1..next_buffer])
                }
                DescriptorResource::Image { .. } => {
                    next_image += 1;
                    base.image_info(&image_infos[next_image - 1..next_image])
                }
            };
            vk_writes.push(vk_write);
        }

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    // ------------------------------------------------------------------
    // Pipelines
    // ------------------------------------------------------------------

    fn create_shader_module(&self, spirv: &[u32]) -> GraphicsResult<ShaderModuleHandle> {
        if spirv.is_empty() {
            return Err(GraphicsError::InvalidParameter(
                "empty SPIR-V module".to_string(),
            ));
        }
        let create_info = vk::ShaderModuleCreateInfo::default().code(spirv);
        unsafe { self.device.create_shader_module(&create_info, None) }
            .map(ShaderModuleHandle::Vulkan)
            .map_err(|e| creation_error("shader module", e))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        unsafe { self.device.destroy_shader_module(module.native(), None) };
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> GraphicsResult<PipelineLayoutHandle> {
        let raw_layouts = native_all(set_layouts);
        pipeline::create_pipeline_layout(&self.device, &raw_layouts, push_constants)
            .map(PipelineLayoutHandle::Vulkan)
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        unsafe { self.device.destroy_pipeline_layout(layout.native(), None) };
    }

    fn create_graphics_pipeline(
        &self,
        state: &GraphicsPipelineState<'_>,
    ) -> GraphicsResult<PipelineHandle> {
        let modules: Vec<vk::ShaderModule> =
            state.stages.iter().map(|stage| stage.module.native()).collect();
        pipeline::create_graphics_pipeline(
            &self.device,
            state,
            state.layout.native(),
            state.pass.render_pass.native(),
            &modules,
        )
        .map(PipelineHandle::Vulkan)
    }

    fn create_compute_pipeline(
        &self,
        layout: PipelineLayoutHandle,
        module: ShaderModuleHandle,
        entry_point: &str,
    ) -> GraphicsResult<PipelineHandle> {
        pipeline::create_compute_pipeline(&self.device, layout.native(), module.native(), entry_point)
            .map(PipelineHandle::Vulkan)
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        unsafe { self.device.destroy_pipeline(pipeline.native(), None) };
    }

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GraphicsResult<SurfaceHandle> {
        let surface = self
            .present
            .create_surface(&self.entry, &self.instance, display, window)?;
        let graphics_family = self.queues[QueueRole::Graphics.index()].family;
        match self
            .present
            .supports_present(self.physical_device, graphics_family, surface)
        {
            Ok(true) => Ok(SurfaceHandle::Vulkan(surface)),
            Ok(false) => {
                self.present.destroy_surface(surface);
                Err(GraphicsError::FeatureNotSupported(format!(
                    "graphics queue family {} cannot present to this surface",
                    graphics_family
                )))
            }
            Err(e) => {
                self.present.destroy_surface(surface);
                Err(e)
            }
        }
    }

    fn destroy_surface(&self, surface: SurfaceHandle) {
        self.present.destroy_surface(surface.native());
    }

    fn surface_capabilities(&self, surface: SurfaceHandle) -> GraphicsResult<SurfaceCapabilities> {
        self.present
            .capabilities(self.physical_device, surface.native())
    }

    fn surface_formats(&self, surface: SurfaceHandle) -> GraphicsResult<Vec<SurfaceFormat>> {
        self.present.formats(self.physical_device, surface.native())
    }

    fn surface_present_modes(&self, surface: SurfaceHandle) -> GraphicsResult<Vec<PresentMode>> {
        self.present
            .present_modes(self.physical_device, surface.native())
    }

    fn create_swapchain(
        &self,
        surface: SurfaceHandle,
        properties: &SwapchainProperties,
        old_swapchain: Option<SwapchainHandle>,
    ) -> GraphicsResult<SwapchainHandle> {
        let old = old_swapchain
            .map(Native::native)
            .unwrap_or(vk::SwapchainKHR::null());
        self.present
            .create_swapchain(surface.native(), properties, old)
            .map(SwapchainHandle::Vulkan)
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        self.present.destroy_swapchain(swapchain.native());
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> GraphicsResult<Vec<ImageHandle>> {
        let images = self.present.images(swapchain.native())?;
        Ok(images.into_iter().map(ImageHandle::Vulkan).collect())
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        signal: SemaphoreHandle,
        timeout_ns: u64,
    ) -> GraphicsResult<(u32, PresentStatus)> {
        self.present
            .acquire(swapchain.native(), signal.native(), timeout_ns)
    }

    fn present(
        &self,
        queue: QueueHandle,
        swapchain: SwapchainHandle,
        image_index: u32,
        wait: &[SemaphoreHandle],
    ) -> GraphicsResult<PresentStatus> {
        let wait_semaphores = native_all(wait);
        self.present
            .present(queue.native(), swapchain.native(), image_index, &wait_semaphores)
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::error!("device_wait_idle failed during shutdown: {:?}", e);
            }

            let leaked_buffers: Vec<_> = self.buffers.get_mut().drain().collect();
            let leaked_images: Vec<_> = self.images.get_mut().drain().collect();
            if !leaked_buffers.is_empty() || !leaked_images.is_empty() {
                log::warn!(
                    "Vulkan backend dropped with {} buffers and {} images alive",
                    leaked_buffers.len(),
                    leaked_images.len()
                );
            }
            let memory = self.allocator.get_mut();
            for (buffer, allocation) in leaked_buffers {
                self.device.destroy_buffer(buffer, None);
                allocator::free(memory, allocation);
            }
            for (image, allocation) in leaked_images {
                self.device.destroy_image(image, None);
                allocator::free(memory, allocation);
            }

            // The allocator frees its memory blocks through the device.
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
            if let Some(debug) = &self.debug {
                debug.destroy();
            }
            self.instance.destroy_instance(None);
        }
    }
}
