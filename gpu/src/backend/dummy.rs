//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to a GPU. It hands out unique ids, keeps track
//! of which objects are alive, stores buffer contents in host memory and
//! "executes" submitted command buffers by replaying their copies and
//! barriers. That is enough to test pooling, deferred destruction, uploads
//! and the frame loop without hardware.
//!
//! Submissions complete immediately: fences are signaled and timeline
//! semaphores advanced as part of [`RenderBackend::submit`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::command::{
    CommandBufferLevel, CommandBufferUsage, RenderPassBegin, ResetMode, Submission,
};
use crate::config::InstanceParameters;
use crate::descriptor::{DescriptorBinding, DescriptorPoolSize, DescriptorType, DescriptorWrite};
use crate::device::{QueueFamilies, QueueFamilyInfo, QueueFlags, QueueInfo, QueueRole};
use crate::error::{GraphicsError, GraphicsResult};
use crate::instance::{AdapterInfo, AdapterType};
use crate::pipeline::{GraphicsPipelineState, ImageBarrier, PipelineBindPoint, PushConstantRange};
use crate::render_target::RenderPassLayout;
use crate::swapchain::{
    ColorSpace, CompositeAlphaModes, PresentMode, PresentStatus,
    SurfaceCapabilities, SurfaceFormat, SurfaceSupport, SurfaceTransform, SurfaceTransforms,
    SwapchainProperties,
};
use crate::sync::SemaphoreKind;
use crate::types::{
    BufferCopy, BufferDescriptor, Extent2d, Extent3d, FormatFeatures, IndexType,
    SamplerDescriptor, ScissorRect, ShaderStages, TextureDescriptor, TextureFormat,
    TextureLayout, Viewport,
};

use super::{
    BackendType, BufferHandle, CommandBufferHandle, CommandPoolHandle, DescriptorPoolHandle,
    DescriptorSetHandle, DescriptorSetLayoutHandle, FenceHandle, FramebufferHandle, ImageHandle,
    ImageViewHandle, PipelineHandle, PipelineLayoutHandle, QueueHandle, RenderBackend,
    RenderPassHandle, SamplerHandle, SemaphoreHandle, ShaderModuleHandle, SurfaceHandle,
    SwapchainHandle,
};

/// Ids are unique across every dummy backend in the process, so handles from
/// two backends never compare equal.
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Instance extensions the dummy driver pretends to offer.
pub const AVAILABLE_INSTANCE_EXTENSIONS: &[&str] = &[
    "VK_KHR_surface",
    "VK_KHR_win32_surface",
    "VK_KHR_xlib_surface",
    "VK_KHR_wayland_surface",
    "VK_EXT_metal_surface",
    "VK_EXT_debug_utils",
    "VK_KHR_get_physical_device_properties2",
    "VK_KHR_portability_enumeration",
];

/// Device extensions the dummy driver pretends to offer.
pub const AVAILABLE_DEVICE_EXTENSIONS: &[&str] = &[
    "VK_KHR_swapchain",
    "VK_KHR_timeline_semaphore",
    "VK_KHR_synchronization2",
    "VK_KHR_maintenance1",
    "VK_EXT_descriptor_indexing",
    "VK_KHR_portability_subset",
];

/// A command recorded into a dummy command buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum DummyCommand {
    /// One image layout transition.
    Barrier {
        image: ImageHandle,
        old_layout: TextureLayout,
        new_layout: TextureLayout,
    },
    BeginRenderPass {
        render_pass: RenderPassHandle,
        framebuffer: FramebufferHandle,
        extent: Extent2d,
    },
    EndRenderPass,
    BindPipeline {
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    },
    BindDescriptorSet {
        set_index: u32,
        set: DescriptorSetHandle,
    },
    PushConstants {
        offset: u32,
        size: usize,
    },
    BindVertexBuffer {
        buffer: BufferHandle,
        offset: u64,
    },
    BindIndexBuffer {
        buffer: BufferHandle,
        offset: u64,
        index_type: IndexType,
    },
    SetViewport(Viewport),
    SetScissor(ScissorRect),
    Draw {
        vertex_count: u32,
        instance_count: u32,
    },
    DrawIndexed {
        index_count: u32,
        instance_count: u32,
    },
    Dispatch {
        x: u32,
        y: u32,
        z: u32,
    },
    CopyBuffer {
        src: BufferHandle,
        dst: BufferHandle,
        regions: Vec<BufferCopy>,
    },
    CopyBufferToImage {
        src: BufferHandle,
        image: ImageHandle,
        extent: Extent3d,
        array_layers: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectKind {
    Fence,
    Semaphore,
    CommandPool,
    CommandBuffer,
    Buffer,
    Image,
    ImageView,
    Sampler,
    RenderPass,
    Framebuffer,
    DescriptorSetLayout,
    DescriptorPool,
    ShaderModule,
    PipelineLayout,
    Pipeline,
    Surface,
    Swapchain,
}

#[derive(Debug, Default)]
struct RecordedBuffer {
    pool: u64,
    recording: bool,
    commands: Vec<DummyCommand>,
}

#[derive(Debug)]
struct PoolCapacity {
    sets: u32,
    descriptors: HashMap<DescriptorType, u32>,
}

#[derive(Debug)]
struct DummySwapchain {
    images: Vec<ImageHandle>,
    next_image: u32,
}

#[derive(Debug)]
struct State {
    live: HashMap<u64, ObjectKind>,
    buffers: HashMap<u64, Vec<u8>>,
    images: HashMap<u64, TextureDescriptor>,
    fences: HashMap<u64, bool>,
    timelines: HashMap<u64, u64>,
    command_buffers: HashMap<u64, RecordedBuffer>,
    set_layouts: HashMap<u64, Vec<(DescriptorType, u32)>>,
    descriptor_pools: HashMap<u64, PoolCapacity>,
    swapchains: HashMap<u64, DummySwapchain>,
    surface_support: SurfaceSupport,
    transitions: HashMap<u64, Vec<(TextureLayout, TextureLayout)>>,
    executed: Vec<DummyCommand>,
    out_of_date: bool,
}

impl State {
    fn insert(&mut self, kind: ObjectKind) -> u64 {
        let id = next_id();
        self.live.insert(id, kind);
        id
    }

    fn remove(&mut self, id: u64, kind: ObjectKind) {
        match self.live.remove(&id) {
            Some(found) if found == kind => {}
            Some(found) => log::warn!(
                "DummyBackend: destroying {:?} {} through the {:?} path",
                found,
                id,
                kind
            ),
            None => log::warn!("DummyBackend: {:?} {} destroyed twice or never created", kind, id),
        }
    }

    fn expect_alive(&self, id: u64, kind: ObjectKind) -> GraphicsResult<()> {
        match self.live.get(&id) {
            Some(found) if *found == kind => Ok(()),
            _ => Err(GraphicsError::InvalidParameter(format!(
                "{:?} {} is not alive",
                kind, id
            ))),
        }
    }

    fn execute(&mut self, command: &DummyCommand) {
        match command {
            DummyCommand::Barrier {
                image,
                old_layout,
                new_layout,
            } => {
                self.transitions
                    .entry(image.raw())
                    .or_default()
                    .push((*old_layout, *new_layout));
            }
            DummyCommand::CopyBuffer { src, dst, regions } => {
                for region in regions {
                    let Some(data) = self.buffers.get(&src.raw()).and_then(|src_data| {
                        let start = region.src_offset as usize;
                        src_data.get(start..start + region.size as usize).map(<[u8]>::to_vec)
                    }) else {
                        log::warn!("DummyBackend: copy source {:?} out of range", src);
                        continue;
                    };
                    let start = region.dst_offset as usize;
                    match self
                        .buffers
                        .get_mut(&dst.raw())
                        .and_then(|dst_data| dst_data.get_mut(start..start + data.len()))
                    {
                        Some(target) => target.copy_from_slice(&data),
                        None => log::warn!("DummyBackend: copy destination {:?} out of range", dst),
                    }
                }
            }
            _ => {}
        }
        self.executed.push(command.clone());
    }
}

/// The surface every new dummy backend reports until
/// [`DummyBackend::set_surface_support`] replaces it.
pub fn default_surface_support() -> SurfaceSupport {
    SurfaceSupport {
        capabilities: SurfaceCapabilities {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: Extent2d::new(800, 600),
            min_extent: Extent2d::new(1, 1),
            max_extent: Extent2d::new(8192, 8192),
            max_array_layers: 1,
            supported_transforms: SurfaceTransforms::IDENTITY,
            current_transform: SurfaceTransform::Identity,
            supported_composite_alpha: CompositeAlphaModes::OPAQUE
                | CompositeAlphaModes::PRE_MULTIPLIED,
            supported_usage: crate::types::TextureUsage::RENDER_ATTACHMENT
                | crate::types::TextureUsage::COPY_SRC
                | crate::types::TextureUsage::COPY_DST
                | crate::types::TextureUsage::TEXTURE_BINDING
                | crate::types::TextureUsage::STORAGE_BINDING,
        },
        formats: vec![
            SurfaceFormat::new(TextureFormat::Bgra8UnormSrgb, ColorSpace::SrgbNonlinear),
            SurfaceFormat::new(TextureFormat::Bgra8Unorm, ColorSpace::SrgbNonlinear),
        ],
        present_modes: vec![PresentMode::Fifo, PresentMode::Mailbox],
    }
}

/// Default queue families: one universal family, one async compute family
/// and one dedicated transfer family.
pub fn default_queue_families() -> Vec<QueueFamilyInfo> {
    vec![
        QueueFamilyInfo::new(
            0,
            QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            1,
        ),
        QueueFamilyInfo::new(1, QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1),
        QueueFamilyInfo::new(2, QueueFlags::TRANSFER, 1),
    ]
}

/// Dummy GPU backend.
pub struct DummyBackend {
    families: Vec<QueueFamilyInfo>,
    queues: [QueueInfo; 3],
    extensions: Vec<String>,
    state: Mutex<State>,
}

impl DummyBackend {
    /// Create a dummy backend with the default queue families and only
    /// `VK_KHR_swapchain` enabled.
    pub fn new() -> Self {
        let resolved = QueueFamilies {
            graphics: 0,
            compute: 1,
            transfer: 2,
        };
        Self::from_parts(
            default_queue_families(),
            resolved,
            vec!["VK_KHR_swapchain".to_string()],
        )
    }

    /// Create a dummy backend, resolving the requested extensions against the
    /// dummy driver's list.
    pub fn with_params(params: &InstanceParameters) -> GraphicsResult<Self> {
        let instance = params
            .instance_extensions
            .resolve(AVAILABLE_INSTANCE_EXTENSIONS)?;
        let mut device_requests = params.device_extensions.clone();
        device_requests.insert("VK_KHR_swapchain".to_string(), false);
        let device = device_requests.resolve(AVAILABLE_DEVICE_EXTENSIONS)?;
        log::debug!(
            "DummyBackend: instance extensions {:?}, device extensions {:?}",
            instance,
            device
        );
        Self::build(default_queue_families(), device)
    }

    /// Create a dummy backend exposing `families`.
    ///
    /// # Errors
    ///
    /// Fails if no family supports graphics.
    pub fn with_queue_families(families: Vec<QueueFamilyInfo>) -> GraphicsResult<Self> {
        Self::build(families, vec!["VK_KHR_swapchain".to_string()])
    }

    fn build(families: Vec<QueueFamilyInfo>, extensions: Vec<String>) -> GraphicsResult<Self> {
        let resolved = QueueFamilies::resolve(&families).ok_or_else(|| {
            GraphicsError::InitializationFailed("no graphics queue family".to_string())
        })?;
        Ok(Self::from_parts(families, resolved, extensions))
    }

    fn from_parts(
        families: Vec<QueueFamilyInfo>,
        resolved: QueueFamilies,
        extensions: Vec<String>,
    ) -> Self {
        let handles: HashMap<u32, QueueHandle> = resolved
            .unique()
            .into_iter()
            .map(|family| (family, QueueHandle::Dummy(next_id())))
            .collect();
        let queues = QueueRole::ALL.map(|role| {
            let family = resolved.family(role);
            QueueInfo {
                family,
                handle: handles[&family],
            }
        });
        Self {
            families,
            queues,
            extensions,
            state: Mutex::new(State {
                live: HashMap::new(),
                buffers: HashMap::new(),
                images: HashMap::new(),
                fences: HashMap::new(),
                timelines: HashMap::new(),
                command_buffers: HashMap::new(),
                set_layouts: HashMap::new(),
                descriptor_pools: HashMap::new(),
                swapchains: HashMap::new(),
                surface_support: default_surface_support(),
                transitions: HashMap::new(),
                executed: Vec::new(),
                out_of_date: false,
            }),
        }
    }

    /// Number of objects created and not yet destroyed.
    ///
    /// Queues, descriptor sets and swapchain images are owned by their parent
    /// and not counted.
    pub fn live_object_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Whether the object with this raw id is still alive.
    pub fn is_alive(&self, raw: u64) -> bool {
        self.state.lock().live.contains_key(&raw)
    }

    /// Make every subsequent acquire and present report `OutOfDate` until a
    /// swapchain is created.
    pub fn set_out_of_date(&self, out_of_date: bool) {
        self.state.lock().out_of_date = out_of_date;
    }

    /// Replace what surface queries report.
    pub fn set_surface_support(&self, support: SurfaceSupport) {
        self.state.lock().surface_support = support;
    }

    /// Commands currently recorded in `buffer`.
    pub fn recorded_commands(&self, buffer: CommandBufferHandle) -> Vec<DummyCommand> {
        self.state
            .lock()
            .command_buffers
            .get(&buffer.raw())
            .map(|recorded| recorded.commands.clone())
            .unwrap_or_default()
    }

    /// Every command executed by a submission so far, in order.
    pub fn executed_commands(&self) -> Vec<DummyCommand> {
        self.state.lock().executed.clone()
    }

    /// Layout transitions executed on `image`, in order.
    pub fn image_transitions(&self, image: ImageHandle) -> Vec<(TextureLayout, TextureLayout)> {
        self.state
            .lock()
            .transitions
            .get(&image.raw())
            .cloned()
            .unwrap_or_default()
    }

    /// 2D size an image was created with.
    pub fn image_extent(&self, image: ImageHandle) -> Option<Extent2d> {
        self.state
            .lock()
            .images
            .get(&image.raw())
            .map(|descriptor| descriptor.size.to_2d())
    }

    fn record(&self, buffer: CommandBufferHandle, command: DummyCommand) {
        let mut state = self.state.lock();
        match state.command_buffers.get_mut(&buffer.raw()) {
            Some(recorded) if recorded.recording => recorded.commands.push(command),
            Some(_) => log::warn!("DummyBackend: {:?} recorded outside begin/end", command),
            None => log::warn!("DummyBackend: recording into unknown {:?}", buffer),
        }
    }

    fn destroy(&self, id: u64, kind: ObjectKind) {
        self.state.lock().remove(id, kind);
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DummyBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyBackend")
            .field("live_objects", &self.live_object_count())
            .finish()
    }
}

impl RenderBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Dummy
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            name: "Dummy Adapter".to_string(),
            vendor_id: 0,
            device_id: 0,
            device_type: AdapterType::Software,
            max_image_dimension_2d: 16384,
        }
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
        if format.is_depth_stencil() {
            FormatFeatures::SAMPLED | FormatFeatures::DEPTH_STENCIL_ATTACHMENT
        } else if format.is_srgb() {
            FormatFeatures::SAMPLED | FormatFeatures::COLOR_ATTACHMENT
        } else {
            FormatFeatures::SAMPLED | FormatFeatures::COLOR_ATTACHMENT | FormatFeatures::STORAGE
        }
    }

    fn queue_wait_idle(&self, _queue: QueueHandle) -> GraphicsResult<()> {
        Ok(())
    }

    fn wait_idle(&self) -> GraphicsResult<()> {
        Ok(())
    }

    // ------------------------------------------------------------------
    // Synchronization
    // ------------------------------------------------------------------

    fn create_fence(&self, signaled: bool) -> GraphicsResult<FenceHandle> {
        let mut state = self.state.lock();
        let id = state.insert(ObjectKind::Fence);
        state.fences.insert(id, signaled);
        Ok(FenceHandle::Dummy(id))
    }

    fn destroy_fence(&self, fence: FenceHandle) {
        let mut state = self.state.lock();
        state.fences.remove(&fence.raw());
        state.remove(fence.raw(), ObjectKind::Fence);
    }

    fn wait_fences(&self, fences: &[FenceHandle], _timeout_ns: u64) -> GraphicsResult<bool> {
        let state = self.state.lock();
        let mut all = true;
        for fence in fences {
            match state.fences.get(&fence.raw()) {
                Some(signaled) => all &= *signaled,
                None => {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "unknown fence {:?}",
                        fence
                    )));
                }
            }
        }
        // Nothing will ever signal an unsubmitted fence, so waiting is pointless.
        Ok(all)
    }

    fn reset_fences(&self, fences: &[FenceHandle]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        for fence in fences {
            match state.fences.get_mut(&fence.raw()) {
                Some(signaled) => *signaled = false,
                None => {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "unknown fence {:?}",
                        fence
                    )));
                }
            }
        }
        Ok(())
    }

    fn fence_signaled(&self, fence: FenceHandle) -> GraphicsResult<bool> {
        self.state
            .lock()
            .fences
            .get(&fence.raw())
            .copied()
            .ok_or_else(|| GraphicsError::InvalidParameter(format!("unknown fence {:?}", fence)))
    }

    fn create_semaphore(&self, kind: SemaphoreKind) -> GraphicsResult<SemaphoreHandle> {
        let mut state = self.state.lock();
        let id = state.insert(ObjectKind::Semaphore);
        if let SemaphoreKind::Timeline { initial } = kind {
            state.timelines.insert(id, initial);
        }
        Ok(SemaphoreHandle::Dummy(id))
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreHandle) {
        let mut state = self.state.lock();
        state.timelines.remove(&semaphore.raw());
        state.remove(semaphore.raw(), ObjectKind::Semaphore);
    }

    fn semaphore_value(&self, semaphore: SemaphoreHandle) -> GraphicsResult<u64> {
        self.state
            .lock()
            .timelines
            .get(&semaphore.raw())
            .copied()
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("{:?} is not a timeline", semaphore))
            })
    }

    fn wait_semaphore(
        &self,
        semaphore: SemaphoreHandle,
        value: u64,
        _timeout_ns: u64,
    ) -> GraphicsResult<bool> {
        Ok(self.semaphore_value(semaphore)? >= value)
    }

    fn signal_semaphore(&self, semaphore: SemaphoreHandle, value: u64) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let current = state.timelines.get_mut(&semaphore.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("{:?} is not a timeline", semaphore))
        })?;
        if value <= *current {
            return Err(GraphicsError::InvalidParameter(format!(
                "timeline value must increase ({} -> {})",
                current, value
            )));
        }
        *current = value;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Command pools and buffers
    // ------------------------------------------------------------------

    fn create_command_pool(
        &self,
        queue_family: u32,
        reset_mode: ResetMode,
    ) -> GraphicsResult<CommandPoolHandle> {
        if !self.families.iter().any(|family| family.index == queue_family) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown queue family {}",
                queue_family
            )));
        }
        let id = self.state.lock().insert(ObjectKind::CommandPool);
        log::trace!(
            "DummyBackend: command pool {} on family {} ({:?})",
            id,
            queue_family,
            reset_mode
        );
        Ok(CommandPoolHandle::Dummy(id))
    }

    fn destroy_command_pool(&self, pool: CommandPoolHandle) {
        let mut state = self.state.lock();
        let owned: Vec<u64> = state
            .command_buffers
            .iter()
            .filter(|(_, recorded)| recorded.pool == pool.raw())
            .map(|(id, _)| *id)
            .collect();
        for id in owned {
            state.command_buffers.remove(&id);
            state.live.remove(&id);
        }
        state.remove(pool.raw(), ObjectKind::CommandPool);
    }

    fn reset_command_pool(&self, pool: CommandPoolHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        state.expect_alive(pool.raw(), ObjectKind::CommandPool)?;
        for recorded in state.command_buffers.values_mut() {
            if recorded.pool == pool.raw() {
                recorded.recording = false;
                recorded.commands.clear();
            }
        }
        Ok(())
    }

    fn allocate_command_buffer(
        &self,
        pool: CommandPoolHandle,
        level: CommandBufferLevel,
    ) -> GraphicsResult<CommandBufferHandle> {
        let mut state = self.state.lock();
        state.expect_alive(pool.raw(), ObjectKind::CommandPool)?;
        let id = state.insert(ObjectKind::CommandBuffer);
        state.command_buffers.insert(
            id,
            RecordedBuffer {
                pool: pool.raw(),
                ..Default::default()
            },
        );
        log::trace!("DummyBackend: {:?} command buffer {}", level, id);
        Ok(CommandBufferHandle::Dummy(id))
    }

    fn free_command_buffers(&self, _pool: CommandPoolHandle, buffers: &[CommandBufferHandle]) {
        let mut state = self.state.lock();
        for buffer in buffers {
            state.command_buffers.remove(&buffer.raw());
            state.remove(buffer.raw(), ObjectKind::CommandBuffer);
        }
    }

    fn begin_command_buffer(
        &self,
        buffer: CommandBufferHandle,
        _usage: CommandBufferUsage,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let recorded = state.command_buffers.get_mut(&buffer.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown command buffer {:?}", buffer))
        })?;
        recorded.commands.clear();
        recorded.recording = true;
        Ok(())
    }

    fn end_command_buffer(&self, buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let recorded = state.command_buffers.get_mut(&buffer.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown command buffer {:?}", buffer))
        })?;
        recorded.recording = false;
        Ok(())
    }

    fn reset_command_buffer(&self, buffer: CommandBufferHandle) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let recorded = state.command_buffers.get_mut(&buffer.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown command buffer {:?}", buffer))
        })?;
        recorded.recording = false;
        recorded.commands.clear();
        Ok(())
    }

    fn submit(
        &self,
        queue: QueueHandle,
        submission: &Submission,
        fence: Option<FenceHandle>,
    ) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let mut commands = Vec::new();
        for buffer in submission.command_buffers() {
            let recorded = state.command_buffers.get(&buffer.raw()).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown command buffer {:?}", buffer))
            })?;
            if recorded.recording {
                return Err(GraphicsError::InvalidParameter(format!(
                    "{:?} submitted while recording",
                    buffer
                )));
            }
            commands.extend(recorded.commands.iter().cloned());
        }
        for command in &commands {
            state.execute(command);
        }

        for signal in submission.signals() {
            if let Some(value) = state.timelines.get_mut(&signal.semaphore.raw()) {
                *value = (*value).max(signal.value);
            }
        }
        if let Some(fence) = fence {
            match state.fences.get_mut(&fence.raw()) {
                Some(signaled) => *signaled = true,
                None => {
                    return Err(GraphicsError::InvalidParameter(format!(
                        "unknown fence {:?}",
                        fence
                    )));
                }
            }
        }
        log::trace!(
            "DummyBackend: executed {} commands from {} buffers on {:?}",
            commands.len(),
            submission.command_buffers().len(),
            queue
        );
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    fn cmd_pipeline_barrier(&self, buffer: CommandBufferHandle, barriers: &[ImageBarrier]) {
        for barrier in barriers {
            self.record(
                buffer,
                DummyCommand::Barrier {
                    image: barrier.image,
                    old_layout: barrier.old_layout,
                    new_layout: barrier.new_layout,
                },
            );
        }
    }

    fn cmd_begin_render_pass(&self, buffer: CommandBufferHandle, begin: &RenderPassBegin) {
        self.record(
            buffer,
            DummyCommand::BeginRenderPass {
                render_pass: begin.render_pass,
                framebuffer: begin.framebuffer,
                extent: begin.extent,
            },
        );
    }

    fn cmd_end_render_pass(&self, buffer: CommandBufferHandle) {
        self.record(buffer, DummyCommand::EndRenderPass);
    }

    fn cmd_bind_pipeline(
        &self,
        buffer: CommandBufferHandle,
        bind_point: PipelineBindPoint,
        pipeline: PipelineHandle,
    ) {
        self.record(
            buffer,
            DummyCommand::BindPipeline {
                bind_point,
                pipeline,
            },
        );
    }

    fn cmd_bind_descriptor_set(
        &self,
        buffer: CommandBufferHandle,
        _bind_point: PipelineBindPoint,
        _layout: PipelineLayoutHandle,
        set_index: u32,
        set: DescriptorSetHandle,
    ) {
        self.record(buffer, DummyCommand::BindDescriptorSet { set_index, set });
    }

    fn cmd_push_constants(
        &self,
        buffer: CommandBufferHandle,
        _layout: PipelineLayoutHandle,
        _stages: ShaderStages,
        offset: u32,
        data: &[u8],
    ) {
        self.record(
            buffer,
            DummyCommand::PushConstants {
                offset,
                size: data.len(),
            },
        );
    }

    fn cmd_bind_vertex_buffer(&self, buffer: CommandBufferHandle, vertex: BufferHandle, offset: u64) {
        self.record(
            buffer,
            DummyCommand::BindVertexBuffer {
                buffer: vertex,
                offset,
            },
        );
    }

    fn cmd_bind_index_buffer(
        &self,
        buffer: CommandBufferHandle,
        index: BufferHandle,
        offset: u64,
        index_type: IndexType,
    ) {
        self.record(
            buffer,
            DummyCommand::BindIndexBuffer {
                buffer: index,
                offset,
                index_type,
            },
        );
    }

    fn cmd_set_viewport(&self, buffer: CommandBufferHandle, viewport: &Viewport) {
        self.record(buffer, DummyCommand::SetViewport(*viewport));
    }

    fn cmd_set_scissor(&self, buffer: CommandBufferHandle, scissor: &ScissorRect) {
        self.record(buffer, DummyCommand::SetScissor(*scissor));
    }

    fn cmd_draw(
        &self,
        buffer: CommandBufferHandle,
        vertex_count: u32,
        instance_count: u32,
        _first_vertex: u32,
        _first_instance: u32,
    ) {
        self.record(
            buffer,
            DummyCommand::Draw {
                vertex_count,
                instance_count,
            },
        );
    }

    fn cmd_draw_indexed(
        &self,
        buffer: CommandBufferHandle,
        index_count: u32,
        instance_count: u32,
        _first_index: u32,
        _vertex_offset: i32,
        _first_instance: u32,
    ) {
        self.record(
            buffer,
            DummyCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        );
    }

    fn cmd_dispatch(&self, buffer: CommandBufferHandle, x: u32, y: u32, z: u32) {
        self.record(buffer, DummyCommand::Dispatch { x, y, z });
    }

    fn cmd_copy_buffer(
        &self,
        buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: BufferHandle,
        regions: &[BufferCopy],
    ) {
        self.record(
            buffer,
            DummyCommand::CopyBuffer {
                src,
                dst,
                regions: regions.to_vec(),
            },
        );
    }

    fn cmd_copy_buffer_to_image(
        &self,
        buffer: CommandBufferHandle,
        src: BufferHandle,
        dst: ImageHandle,
        _format: TextureFormat,
        extent: Extent3d,
        array_layers: u32,
    ) {
        self.record(
            buffer,
            DummyCommand::CopyBufferToImage {
                src,
                image: dst,
                extent,
                array_layers,
            },
        );
    }

    // ------------------------------------------------------------------
    // Resources
    // ------------------------------------------------------------------

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> GraphicsResult<BufferHandle> {
        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size must be non-zero".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let id = state.insert(ObjectKind::Buffer);
        state.buffers.insert(id, vec![0; descriptor.size as usize]);
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        Ok(BufferHandle::Dummy(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> GraphicsResult<()> {
        let mut state = self.state.lock();
        let contents = state.buffers.get_mut(&buffer.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {:?}", buffer))
        })?;
        let start = offset as usize;
        let target = contents.get_mut(start..start + data.len()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "write of {} bytes at {} overruns buffer",
                data.len(),
                offset
            ))
        })?;
        target.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> GraphicsResult<Vec<u8>> {
        let state = self.state.lock();
        let contents = state.buffers.get(&buffer.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {:?}", buffer))
        })?;
        let start = offset as usize;
        contents
            .get(start..start + size as usize)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "read of {} bytes at {} overruns buffer",
                    size, offset
                ))
            })
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        let mut state = self.state.lock();
        state.buffers.remove(&buffer.raw());
        state.remove(buffer.raw(), ObjectKind::Buffer);
    }

    fn create_image(&self, descriptor: &TextureDescriptor) -> GraphicsResult<ImageHandle> {
        if descriptor.size.width == 0 || descriptor.size.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "image dimensions must be non-zero".to_string(),
            ));
        }
        let mut state = self.state.lock();
        let id = state.insert(ObjectKind::Image);
        state.images.insert(id, descriptor.clone());
        log::trace!(
            "DummyBackend: creating image {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.size.width,
            descriptor.size.height,
            descriptor.size.depth
        );
        Ok(ImageHandle::Dummy(id))
    }

    fn destroy_image(&self, image: ImageHandle) {
        let mut state = self.state.lock();
        state.images.remove(&image.raw());
        state.transitions.remove(&image.raw());
        state.remove(image.raw(), ObjectKind::Image);
    }

    fn create_image_view(
        &self,
        image: ImageHandle,
        _format: TextureFormat,
        _array_layers: u32,
    ) -> GraphicsResult<ImageViewHandle> {
        let mut state = self.state.lock();
        if !state.images.contains_key(&image.raw()) {
            return Err(GraphicsError::InvalidParameter(format!(
                "unknown image {:?}",
                image
            )));
        }
        Ok(ImageViewHandle::Dummy(state.insert(ObjectKind::ImageView)))
    }

    fn destroy_image_view(&self, view: ImageViewHandle) {
        self.destroy(view.raw(), ObjectKind::ImageView);
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> GraphicsResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", descriptor.label);
        Ok(SamplerHandle::Dummy(self.state.lock().insert(ObjectKind::Sampler)))
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.destroy(sampler.raw(), ObjectKind::Sampler);
    }

    fn create_render_pass(&self, layout: &RenderPassLayout) -> GraphicsResult<RenderPassHandle> {
        if layout.attachment_count() == 0 {
            return Err(GraphicsError::InvalidParameter(
                "render pass needs at least one attachment".to_string(),
            ));
        }
        Ok(RenderPassHandle::Dummy(
            self.state.lock().insert(ObjectKind::RenderPass),
        ))
    }

    fn destroy_render_pass(&self, render_pass: RenderPassHandle) {
        self.destroy(render_pass.raw(), ObjectKind::RenderPass);
    }

    fn create_framebuffer(
        &self,
        render_pass: RenderPassHandle,
        attachments: &[ImageViewHandle],
        _extent: Extent2d,
    ) -> GraphicsResult<FramebufferHandle> {
        let mut state = self.state.lock();
        state.expect_alive(render_pass.raw(), ObjectKind::RenderPass)?;
        for view in attachments {
            state.expect_alive(view.raw(), ObjectKind::ImageView)?;
        }
        Ok(FramebufferHandle::Dummy(state.insert(ObjectKind::Framebuffer)))
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferHandle) {
        self.destroy(framebuffer.raw(), ObjectKind::Framebuffer);
    }

    // ------------------------------------------------------------------
    // Descriptors
    // ------------------------------------------------------------------

    fn create_descriptor_set_layout(
        &self,
        bindings: &[DescriptorBinding],
    ) -> GraphicsResult<DescriptorSetLayoutHandle> {
        let mut state = self.state.lock();
        let id = state.insert(ObjectKind::DescriptorSetLayout);
        state.set_layouts.insert(
            id,
            bindings
                .iter()
                .map(|binding| (binding.ty, binding.count))
                .collect(),
        );
        Ok(DescriptorSetLayoutHandle::Dummy(id))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayoutHandle) {
        let mut state = self.state.lock();
        state.set_layouts.remove(&layout.raw());
        state.remove(layout.raw(), ObjectKind::DescriptorSetLayout);
    }

    fn create_descriptor_pool(
        &self,
        max_sets: u32,
        sizes: &[DescriptorPoolSize],
    ) -> GraphicsResult<DescriptorPoolHandle> {
        let mut descriptors = HashMap::new();
        for size in sizes {
            *descriptors.entry(size.ty).or_insert(0) += size.count;
        }
        let mut state = self.state.lock();
        let id = state.insert(ObjectKind::DescriptorPool);
        state.descriptor_pools.insert(
            id,
            PoolCapacity {
                sets: max_sets,
                descriptors,
            },
        );
        Ok(DescriptorPoolHandle::Dummy(id))
    }

    fn destroy_descriptor_pool(&self, pool: DescriptorPoolHandle) {
        let mut state = self.state.lock();
        state.descriptor_pools.remove(&pool.raw());
        state.remove(pool.raw(), ObjectKind::DescriptorPool);
    }

    fn allocate_descriptor_sets(
        &self,
        pool: DescriptorPoolHandle,
        layouts: &[DescriptorSetLayoutHandle],
    ) -> GraphicsResult<Vec<DescriptorSetHandle>> {
        let mut state = self.state.lock();
        let mut needed: HashMap<DescriptorType, u32> = HashMap::new();
        for layout in layouts {
            let bindings = state.set_layouts.get(&layout.raw()).ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown set layout {:?}", layout))
            })?;
            for (ty, count) in bindings {
                *needed.entry(*ty).or_insert(0) += count;
            }
        }
        let capacity = state.descriptor_pools.get_mut(&pool.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown descriptor pool {:?}", pool))
        })?;
        let fits = capacity.sets as usize >= layouts.len()
            && needed
                .iter()
                .all(|(ty, count)| capacity.descriptors.get(ty).copied().unwrap_or(0) >= *count);
        if !fits {
            return Err(GraphicsError::OutOfMemory);
        }
        capacity.sets -= layouts.len() as u32;
        for (ty, count) in needed {
            if let Some(left) = capacity.descriptors.get_mut(&ty) {
                *left -= count;
            }
        }
        Ok(layouts
            .iter()
            .map(|_| DescriptorSetHandle::Dummy(next_id()))
            .collect())
    }

    fn update_descriptor_set(&self, set: DescriptorSetHandle, writes: &[DescriptorWrite]) {
        log::trace!("DummyBackend: {} writes into {:?}", writes.len(), set);
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
        Ok(ShaderModuleHandle::Dummy(
            self.state.lock().insert(ObjectKind::ShaderModule),
        ))
    }

    fn destroy_shader_module(&self, module: ShaderModuleHandle) {
        self.destroy(module.raw(), ObjectKind::ShaderModule);
    }

    fn create_pipeline_layout(
        &self,
        set_layouts: &[DescriptorSetLayoutHandle],
        _push_constants: &[PushConstantRange],
    ) -> GraphicsResult<PipelineLayoutHandle> {
        let mut state = self.state.lock();
        for layout in set_layouts {
            state.expect_alive(layout.raw(), ObjectKind::DescriptorSetLayout)?;
        }
        Ok(PipelineLayoutHandle::Dummy(
            state.insert(ObjectKind::PipelineLayout),
        ))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayoutHandle) {
        self.destroy(layout.raw(), ObjectKind::PipelineLayout);
    }

    fn create_graphics_pipeline(
        &self,
        state: &GraphicsPipelineState<'_>,
    ) -> GraphicsResult<PipelineHandle> {
        let mut guard = self.state.lock();
        guard.expect_alive(state.layout.raw(), ObjectKind::PipelineLayout)?;
        guard.expect_alive(state.pass.render_pass.raw(), ObjectKind::RenderPass)?;
        for stage in state.stages {
            guard.expect_alive(stage.module.raw(), ObjectKind::ShaderModule)?;
        }
        Ok(PipelineHandle::Dummy(guard.insert(ObjectKind::Pipeline)))
    }

    fn create_compute_pipeline(
        &self,
        layout: PipelineLayoutHandle,
        module: ShaderModuleHandle,
        entry_point: &str,
    ) -> GraphicsResult<PipelineHandle> {
        let mut state = self.state.lock();
        state.expect_alive(layout.raw(), ObjectKind::PipelineLayout)?;
        state.expect_alive(module.raw(), ObjectKind::ShaderModule)?;
        log::trace!("DummyBackend: compute pipeline entry {}", entry_point);
        Ok(PipelineHandle::Dummy(state.insert(ObjectKind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) {
        self.destroy(pipeline.raw(), ObjectKind::Pipeline);
    }

    // ------------------------------------------------------------------
    // Presentation
    // ------------------------------------------------------------------

    fn create_surface(
        &self,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> GraphicsResult<SurfaceHandle> {
        log::trace!("DummyBackend: surface for {:?} on {:?}", window, display);
        Ok(SurfaceHandle::Dummy(self.state.lock().insert(ObjectKind::Surface)))
    }

    fn destroy_surface(&self, surface: SurfaceHandle) {
        self.destroy(surface.raw(), ObjectKind::Surface);
    }

    fn surface_capabilities(&self, surface: SurfaceHandle) -> GraphicsResult<SurfaceCapabilities> {
        let state = self.state.lock();
        state.expect_alive(surface.raw(), ObjectKind::Surface)?;
        Ok(state.surface_support.capabilities)
    }

    fn surface_formats(&self, surface: SurfaceHandle) -> GraphicsResult<Vec<SurfaceFormat>> {
        let state = self.state.lock();
        state.expect_alive(surface.raw(), ObjectKind::Surface)?;
        Ok(state.surface_support.formats.clone())
    }

    fn surface_present_modes(&self, surface: SurfaceHandle) -> GraphicsResult<Vec<PresentMode>> {
        let state = self.state.lock();
        state.expect_alive(surface.raw(), ObjectKind::Surface)?;
        Ok(state.surface_support.present_modes.clone())
    }

    fn create_swapchain(
        &self,
        surface: SurfaceHandle,
        properties: &SwapchainProperties,
        old_swapchain: Option<SwapchainHandle>,
    ) -> GraphicsResult<SwapchainHandle> {
        let mut state = self.state.lock();
        state.expect_alive(surface.raw(), ObjectKind::Surface)?;
        if let Some(old) = old_swapchain {
            state.expect_alive(old.raw(), ObjectKind::Swapchain)?;
        }
        let id = state.insert(ObjectKind::Swapchain);
        let descriptor = TextureDescriptor::new_2d(
            properties.extent.width,
            properties.extent.height,
            properties.surface_format.format,
            properties.image_usage,
        )
        .with_label(format!("swapchain {}", id));
        let images: Vec<ImageHandle> = (0..properties.image_count)
            .map(|_| {
                let image = next_id();
                state.images.insert(image, descriptor.clone());
                ImageHandle::Dummy(image)
            })
            .collect();
        state.swapchains.insert(
            id,
            DummySwapchain {
                images,
                next_image: 0,
            },
        );
        state.out_of_date = false;
        log::trace!(
            "DummyBackend: swapchain {} ({} images, {}x{})",
            id,
            properties.image_count,
            properties.extent.width,
            properties.extent.height
        );
        Ok(SwapchainHandle::Dummy(id))
    }

    fn destroy_swapchain(&self, swapchain: SwapchainHandle) {
        let mut state = self.state.lock();
        if let Some(destroyed) = state.swapchains.remove(&swapchain.raw()) {
            for image in destroyed.images {
                state.images.remove(&image.raw());
                state.transitions.remove(&image.raw());
            }
        }
        state.remove(swapchain.raw(), ObjectKind::Swapchain);
    }

    fn swapchain_images(&self, swapchain: SwapchainHandle) -> GraphicsResult<Vec<ImageHandle>> {
        self.state
            .lock()
            .swapchains
            .get(&swapchain.raw())
            .map(|chain| chain.images.clone())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown swapchain {:?}", swapchain))
            })
    }

    fn acquire_next_image(
        &self,
        swapchain: SwapchainHandle,
        _signal: SemaphoreHandle,
        _timeout_ns: u64,
    ) -> GraphicsResult<(u32, PresentStatus)> {
        let mut state = self.state.lock();
        if state.out_of_date {
            return Ok((0, PresentStatus::OutOfDate));
        }
        let chain = state.swapchains.get_mut(&swapchain.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown swapchain {:?}", swapchain))
        })?;
        let index = chain.next_image;
        chain.next_image = (index + 1) % chain.images.len().max(1) as u32;
        Ok((index, PresentStatus::Optimal))
    }

    fn present(
        &self,
        _queue: QueueHandle,
        swapchain: SwapchainHandle,
        image_index: u32,
        _wait: &[SemaphoreHandle],
    ) -> GraphicsResult<PresentStatus> {
        let state = self.state.lock();
        if state.out_of_date {
            return Ok(PresentStatus::OutOfDate);
        }
        let chain = state.swapchains.get(&swapchain.raw()).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown swapchain {:?}", swapchain))
        })?;
        if image_index as usize >= chain.images.len() {
            return Err(GraphicsError::InvalidParameter(format!(
                "image index {} out of range",
                image_index
            )));
        }
        Ok(PresentStatus::Optimal)
    }
}

static_assertions::assert_impl_all!(DummyBackend: Send, Sync);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::command::CommandPool;
    use crate::types::BufferUsage;

    #[test]
    fn test_default_queue_resolution() {
        let backend = DummyBackend::new();
        assert_eq!(backend.queue(QueueRole::Graphics).family, 0);
        assert_eq!(backend.queue(QueueRole::Compute).family, 1);
        assert_eq!(backend.queue(QueueRole::Transfer).family, 2);
        assert_eq!(backend.live_object_count(), 0);
    }

    #[test]
    fn test_single_family_shares_queue() {
        let backend = DummyBackend::with_queue_families(vec![QueueFamilyInfo::new(
            0,
            QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER,
            1,
        )])
        .unwrap();
        let graphics = backend.queue(QueueRole::Graphics);
        assert_eq!(backend.queue(QueueRole::Transfer), graphics);
        assert_eq!(backend.queue(QueueRole::Compute), graphics);
    }

    #[test]
    fn test_no_graphics_family_fails() {
        let result = DummyBackend::with_queue_families(vec![QueueFamilyInfo::new(
            0,
            QueueFlags::TRANSFER,
            1,
        )]);
        assert!(matches!(result, Err(GraphicsError::InitializationFailed(_))));
    }

    #[test]
    fn test_submit_executes_copies_and_signals() {
        let backend = Arc::new(DummyBackend::new());
        let src = backend
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::MAP_WRITE))
            .unwrap();
        let dst = backend
            .create_buffer(&BufferDescriptor::new(8, BufferUsage::MAP_WRITE))
            .unwrap();
        backend.write_buffer(src, 0, &[9, 8, 7, 6]).unwrap();

        let mut pool = CommandPool::new(backend.clone(), 0, ResetMode::ResetIndividually).unwrap();
        let mut cmd = pool.request(CommandBufferLevel::Primary).unwrap();
        cmd.begin(CommandBufferUsage::OneTimeSubmit).unwrap();
        cmd.copy_buffer(
            src,
            dst,
            &[BufferCopy {
                src_offset: 0,
                dst_offset: 4,
                size: 4,
            }],
        );
        cmd.end().unwrap();
        let handle = cmd.handle();
        assert_eq!(backend.recorded_commands(handle).len(), 1);

        let fence = backend.create_fence(false).unwrap();
        let timeline = backend
            .create_semaphore(SemaphoreKind::Timeline { initial: 0 })
            .unwrap();
        let mut submission = Submission::new().signal_timeline(timeline, 3);
        submission.push(&mut cmd).unwrap();
        backend
            .submit(backend.queue(QueueRole::Graphics).handle, &submission, Some(fence))
            .unwrap();

        assert_eq!(backend.read_buffer(dst, 4, 4).unwrap(), vec![9, 8, 7, 6]);
        assert!(backend.fence_signaled(fence).unwrap());
        assert_eq!(backend.semaphore_value(timeline).unwrap(), 3);

        pool.discard(cmd).unwrap();
        drop(pool);
        assert!(!backend.is_alive(handle.raw()));
    }

    #[test]
    fn test_descriptor_pool_capacity() {
        let backend = DummyBackend::new();
        let layout = backend
            .create_descriptor_set_layout(&[DescriptorBinding::new(
                0,
                "lights",
                DescriptorType::StorageBuffer,
                ShaderStages::FRAGMENT,
            )])
            .unwrap();
        let pool = backend
            .create_descriptor_pool(
                4,
                &[DescriptorPoolSize {
                    ty: DescriptorType::StorageBuffer,
                    count: 2,
                }],
            )
            .unwrap();
        assert_eq!(backend.allocate_descriptor_sets(pool, &[layout; 2]).unwrap().len(), 2);
        assert_eq!(
            backend.allocate_descriptor_sets(pool, &[layout]),
            Err(GraphicsError::OutOfMemory)
        );
    }

    #[test]
    fn test_with_params_resolves_extensions() {
        let params = InstanceParameters::new().with_device_extensions(
            crate::config::ExtensionRequests::new()
                .require("VK_KHR_timeline_semaphore")
                .request_optional("VK_EXT_mesh_shader"),
        );
        let backend = DummyBackend::with_params(&params).unwrap();
        let enabled = backend.enabled_extensions();
        assert!(enabled.contains(&"VK_KHR_swapchain".to_string()));
        assert!(enabled.contains(&"VK_KHR_timeline_semaphore".to_string()));
        assert!(!enabled.contains(&"VK_EXT_mesh_shader".to_string()));
    }
}
