//! Graphics device.
//!
//! The [`GraphicsDevice`] is the resource factory, queue router and
//! destruction-safety boundary. It is created by
//! [`GraphicsInstance::create_device`](crate::instance::GraphicsInstance::create_device)
//! and shared as `Arc<GraphicsDevice>`; every resource keeps a reference to
//! the device that created it.

mod deferred;
mod extensions;
mod queue;

pub use deferred::{DeferredDestructor, DeferredResource};
pub use extensions::ExtensionRequests;
pub use queue::{
    QueueFamilies, QueueFamilyInfo, QueueFlags, QueueInfo, QueueRole, select_queue_family,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::backend::{BufferHandle, FenceHandle, RenderBackend, SemaphoreHandle, SurfaceHandle};
use crate::command::{
    CommandBuffer, CommandBufferLevel, CommandBufferUsage, CommandPool, ResetMode, Submission,
    TimelineCommandBuffer,
};
use crate::config::{DeviceParameters, SwapchainConfig};
use crate::descriptor::DescriptorPool;
use crate::error::{CheckPolicy, GraphicsError, GraphicsResult};
use crate::instance::AdapterInfo;
use crate::pipeline::{ComputePipeline, GraphicsPipeline, PassInfo, PipelineDescriptor, Shader};
use crate::render_target::{RenderTarget, RenderTargetDescriptor};
use crate::resources::{Buffer, Sampler, Texture};
use crate::swapchain::Swapchain;
use crate::sync::{FencePool, SemaphorePool, Timeline};
use crate::types::{BufferDescriptor, BufferUsage, SamplerDescriptor, TextureDescriptor};

/// A graphics device for creating GPU resources and submitting work.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync`. Pools are guarded by short-held locks;
/// recording and submission are expected to happen on one thread.
///
/// # Example
///
/// ```ignore
/// let device = instance.create_device()?;
///
/// let vertices = device.create_buffer(
///     &BufferDescriptor::new(1024, BufferUsage::VERTEX),
///     Some(bytemuck::cast_slice(&positions)),
/// )?;
/// let target = device.create_render_target(&RenderTargetDescriptor::color(
///     Extent2d::new(1920, 1080),
///     TextureFormat::Rgba8Unorm,
/// ))?;
/// ```
pub struct GraphicsDevice {
    backend: Arc<dyn RenderBackend>,
    params: DeviceParameters,
    queues: [QueueInfo; 3],
    command_pools: [Mutex<CommandPool>; 3],
    fences: Mutex<FencePool>,
    semaphores: Mutex<SemaphorePool>,
    deferred: DeferredDestructor,
    frame: AtomicU64,
}

impl GraphicsDevice {
    /// Create a device on `backend`.
    pub fn new(backend: Arc<dyn RenderBackend>, params: DeviceParameters) -> GraphicsResult<Arc<Self>> {
        let queues = QueueRole::ALL.map(|role| backend.queue(role));
        let [graphics, compute, transfer] = queues;
        let command_pools = [
            Mutex::new(CommandPool::new(backend.clone(), graphics.family, ResetMode::ResetIndividually)?),
            Mutex::new(CommandPool::new(backend.clone(), compute.family, ResetMode::ResetIndividually)?),
            Mutex::new(CommandPool::new(backend.clone(), transfer.family, ResetMode::ResetIndividually)?),
        ];

        let adapter = backend.adapter_info();
        log::info!(
            "Created graphics device on {} ({}), queue families g={} c={} t={}, {} frames in flight",
            adapter.name,
            backend.name(),
            graphics.family,
            compute.family,
            transfer.family,
            params.frames_in_flight
        );

        Ok(Arc::new(Self {
            fences: Mutex::new(FencePool::new(backend.clone())),
            semaphores: Mutex::new(SemaphorePool::new(backend.clone())),
            deferred: DeferredDestructor::new(params.frames_in_flight as usize),
            frame: AtomicU64::new(0),
            backend,
            params,
            queues,
            command_pools,
        }))
    }

    /// The backend every call goes through.
    pub fn backend(&self) -> &Arc<dyn RenderBackend> {
        &self.backend
    }

    /// Parameters the device was created with.
    pub fn parameters(&self) -> &DeviceParameters {
        &self.params
    }

    /// Adapter the device runs on.
    pub fn adapter_info(&self) -> AdapterInfo {
        self.backend.adapter_info()
    }

    /// Policy applied to failed API calls.
    pub fn check_policy(&self) -> CheckPolicy {
        self.params.check_policy
    }

    /// Apply the check policy to a call that produces a value.
    pub fn checked<T>(&self, what: &str, result: GraphicsResult<T>) -> GraphicsResult<T> {
        self.params.check_policy.check_value(what, result)
    }

    /// Apply the check policy to a status-only call.
    pub fn check(&self, what: &str, result: GraphicsResult<()>) -> GraphicsResult<()> {
        self.params.check_policy.check(what, result)
    }

    /// Queue serving `role`.
    pub fn queue(&self, role: QueueRole) -> QueueInfo {
        self.queues[role.index()]
    }

    // ------------------------------------------------------------------
    // Deferred destruction
    // ------------------------------------------------------------------

    /// Destroy `resource` once every frame that might still use it has retired.
    pub fn destroy_async(&self, resource: impl Into<DeferredResource>) {
        let resource = resource.into();
        let backend = self.backend.clone();
        self.deferred.push(move || resource.destroy(backend.as_ref()));
    }

    /// Run `task` after the same delay as [`destroy_async`](Self::destroy_async).
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.deferred.push(task);
    }

    /// Cross a frame boundary: release what aged out of the destruction ring.
    ///
    /// Call once per frame after waiting for the fence of the frame slot
    /// about to be reused. Returns the number of objects released.
    pub fn advance_frame(&self) -> usize {
        self.frame.fetch_add(1, Ordering::Relaxed);
        let released = self.deferred.advance();
        crate::profile_plot!("pending_destruction", self.deferred.pending_count());
        released
    }

    /// Frame boundaries crossed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame.load(Ordering::Relaxed)
    }

    /// Objects waiting in the destruction ring.
    pub fn pending_destruction_count(&self) -> usize {
        self.deferred.pending_count()
    }

    // ------------------------------------------------------------------
    // Pools
    // ------------------------------------------------------------------

    /// A fresh descriptor pool chain sized from the device parameters.
    pub fn new_descriptor_pool(&self) -> GraphicsResult<DescriptorPool> {
        self.checked(
            "create_descriptor_pool",
            DescriptorPool::new(
                self.backend.clone(),
                self.params.max_sets_per_pool,
                self.params.descriptor_pool_sizes.clone(),
            ),
        )
    }

    /// A command pool on the family of `role`, owned by the caller.
    pub fn create_command_pool(&self, role: QueueRole, reset_mode: ResetMode) -> GraphicsResult<CommandPool> {
        self.checked(
            "create_command_pool",
            CommandPool::new(self.backend.clone(), self.queue(role).family, reset_mode),
        )
    }

    /// A timeline command buffer on `role`, splitting at the configured ceiling.
    pub fn create_timeline_command_buffer(&self, role: QueueRole) -> GraphicsResult<TimelineCommandBuffer> {
        let pool = self.create_command_pool(role, ResetMode::ResetIndividually)?;
        Ok(TimelineCommandBuffer::new(pool, self.params.max_commands_per_buffer))
    }

    /// Lease a command buffer from the device pool of `role`.
    pub fn request_command_buffer(&self, role: QueueRole, level: CommandBufferLevel) -> GraphicsResult<CommandBuffer> {
        let result = self.command_pools[role.index()].lock().request(level);
        self.checked("allocate_command_buffer", result)
    }

    /// Return a leased command buffer to the device pool of `role`.
    pub fn discard_command_buffer(&self, role: QueueRole, buffer: CommandBuffer) -> GraphicsResult<()> {
        let result = self.command_pools[role.index()].lock().discard(buffer);
        self.check("discard_command_buffer", result)
    }

    /// Buffers of `level` leased from the device pool of `role`.
    pub fn active_command_buffers(&self, role: QueueRole, level: CommandBufferLevel) -> usize {
        self.command_pools[role.index()].lock().active_count(level)
    }

    /// Take a fence from the pool.
    pub fn request_fence(&self) -> GraphicsResult<FenceHandle> {
        let result = self.fences.lock().request();
        self.checked("create_fence", result)
    }

    /// Reset a fence and return it to the pool.
    pub fn discard_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let result = self.fences.lock().discard(fence);
        self.check("reset_fences", result)
    }

    /// Block until `fence` signals or the configured timeout elapses.
    pub fn wait_fence(&self, fence: FenceHandle) -> GraphicsResult<()> {
        let signaled = self.checked(
            "wait_fences",
            self.backend.wait_fences(&[fence], self.params.fence_timeout),
        )?;
        if !signaled {
            log::error!(
                "Fence {:?} not signaled within {} ns",
                fence,
                self.params.fence_timeout
            );
            return Err(GraphicsError::Timeout);
        }
        Ok(())
    }

    /// Take a binary semaphore from the pool.
    pub fn request_semaphore(&self) -> GraphicsResult<SemaphoreHandle> {
        let result = self.semaphores.lock().request();
        self.checked("create_semaphore", result)
    }

    /// Return a binary semaphore to the pool.
    pub fn discard_semaphore(&self, semaphore: SemaphoreHandle) -> GraphicsResult<()> {
        let result = self.semaphores.lock().discard(semaphore);
        self.check("discard_semaphore", result)
    }

    /// Create a timeline semaphore starting at `initial`.
    pub fn create_timeline(&self, initial: u64) -> GraphicsResult<Timeline> {
        let result = self.semaphores.lock().create_timeline(initial);
        self.checked("create_semaphore", result)
    }

    // ------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------

    /// Submit to the queue of `role`.
    pub fn submit(&self, role: QueueRole, submission: &Submission, fence: Option<FenceHandle>) -> GraphicsResult<()> {
        crate::profile_scope!("submit");
        self.check(
            "submit",
            self.backend
                .submit(self.queue(role).handle, submission, fence),
        )
    }

    /// Record `f` into a one-shot buffer on `role`, submit it and wait.
    ///
    /// The command buffer and fence come from the device pools and are
    /// returned to them before this returns.
    pub fn submit_once<R>(
        &self,
        role: QueueRole,
        f: impl FnOnce(&mut CommandBuffer) -> GraphicsResult<R>,
    ) -> GraphicsResult<R> {
        crate::profile_scope!("submit_once");
        let mut cmd = self.request_command_buffer(role, CommandBufferLevel::Primary)?;
        let result = self.record_and_wait(role, &mut cmd, f);
        let discarded = self.discard_command_buffer(role, cmd);
        let value = result?;
        discarded?;
        Ok(value)
    }

    fn record_and_wait<R>(
        &self,
        role: QueueRole,
        cmd: &mut CommandBuffer,
        f: impl FnOnce(&mut CommandBuffer) -> GraphicsResult<R>,
    ) -> GraphicsResult<R> {
        cmd.begin(CommandBufferUsage::OneTimeSubmit)?;
        let value = f(cmd)?;
        cmd.end()?;

        let mut submission = Submission::new();
        submission.push(cmd)?;
        let fence = self.request_fence()?;
        let completed = self
            .submit(role, &submission, Some(fence))
            .and_then(|()| self.wait_fence(fence));
        self.discard_fence(fence)?;
        completed?;
        Ok(value)
    }

    /// One-shot work on the transfer queue.
    pub fn transfer<R>(&self, f: impl FnOnce(&mut CommandBuffer) -> GraphicsResult<R>) -> GraphicsResult<R> {
        self.submit_once(QueueRole::Transfer, f)
    }

    /// One-shot work on the compute queue.
    pub fn compute<R>(&self, f: impl FnOnce(&mut CommandBuffer) -> GraphicsResult<R>) -> GraphicsResult<R> {
        self.submit_once(QueueRole::Compute, f)
    }

    /// Copy `data` into a temporary host-visible buffer and record `f` with it
    /// on `role`. The staging buffer is destroyed once the work completed.
    pub(crate) fn upload_via_staging(
        &self,
        role: QueueRole,
        data: &[u8],
        f: impl FnOnce(&mut CommandBuffer, BufferHandle),
    ) -> GraphicsResult<()> {
        let staging = self.checked(
            "create_buffer",
            self.backend.create_buffer(
                &BufferDescriptor::new(data.len() as u64, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC)
                    .with_label("staging"),
            ),
        )?;
        let result = self
            .checked("write_buffer", self.backend.write_buffer(staging, 0, data))
            .and_then(|()| {
                self.submit_once(role, |cmd| {
                    f(cmd, staging);
                    Ok(())
                })
            });
        self.backend.destroy_buffer(staging);
        result
    }

    /// Wait until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> GraphicsResult<()> {
        self.check("wait_idle", self.backend.wait_idle())
    }

    // ------------------------------------------------------------------
    // Resource factories
    // ------------------------------------------------------------------

    /// Create a buffer, optionally filled with `data`.
    pub fn create_buffer(self: &Arc<Self>, descriptor: &BufferDescriptor, data: Option<&[u8]>) -> GraphicsResult<Buffer> {
        Buffer::new(self, descriptor, data)
    }

    /// Create a texture, optionally filled with `data` (tightly packed base level).
    pub fn create_texture(self: &Arc<Self>, descriptor: &TextureDescriptor, data: Option<&[u8]>) -> GraphicsResult<Texture> {
        Texture::new(self, descriptor, data)
    }

    /// Load an image file into an sRGB RGBA texture.
    #[cfg(feature = "image-loading")]
    pub fn create_texture_from_path(self: &Arc<Self>, path: impl AsRef<std::path::Path>) -> GraphicsResult<Texture> {
        Texture::from_path(self, path.as_ref())
    }

    /// Create a sampler.
    pub fn create_sampler(self: &Arc<Self>, descriptor: &SamplerDescriptor) -> GraphicsResult<Sampler> {
        Sampler::new(self, descriptor)
    }

    /// Create a render target.
    pub fn create_render_target(self: &Arc<Self>, descriptor: &RenderTargetDescriptor) -> GraphicsResult<RenderTarget> {
        RenderTarget::new(self, descriptor)
    }

    /// Create a graphics pipeline for passes shaped like `pass`.
    pub fn create_graphics_pipeline(
        self: &Arc<Self>,
        shader: &Shader,
        descriptor: &PipelineDescriptor,
        pass: PassInfo,
    ) -> GraphicsResult<GraphicsPipeline> {
        GraphicsPipeline::new(self, shader, descriptor, pass)
    }

    /// Create a compute pipeline.
    pub fn create_compute_pipeline(self: &Arc<Self>, shader: &Shader) -> GraphicsResult<ComputePipeline> {
        ComputePipeline::new(self, shader)
    }

    /// Create a swapchain for `surface`.
    pub fn create_swapchain(self: &Arc<Self>, surface: SurfaceHandle, config: SwapchainConfig) -> GraphicsResult<Swapchain> {
        Swapchain::new(self, surface, config)
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if let Err(e) = self.backend.wait_idle() {
            log::error!("Failed to idle device on shutdown: {}", e);
        }
        let released = self.deferred.drain_all();
        log::debug!("Device dropped, released {} deferred objects", released);
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("backend", &self.backend.name())
            .field("frame", &self.frame_index())
            .field("pending_destruction", &self.pending_destruction_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::types::BufferCopy;

    fn device(frames: u32) -> (Arc<DummyBackend>, Arc<GraphicsDevice>) {
        let backend = Arc::new(DummyBackend::new());
        let device = GraphicsDevice::new(
            backend.clone(),
            DeviceParameters::new()
                .with_frames_in_flight(frames)
                .with_check_policy(CheckPolicy::Propagate),
        )
        .unwrap();
        (backend, device)
    }

    #[test]
    fn test_destroy_async_waits_for_frames_in_flight() {
        let (backend, device) = device(3);
        let buffer = backend
            .create_buffer(&BufferDescriptor::new(64, BufferUsage::UNIFORM))
            .unwrap();
        device.destroy_async(buffer);

        device.advance_frame();
        device.advance_frame();
        assert!(backend.is_alive(buffer.raw()));
        assert_eq!(device.pending_destruction_count(), 1);

        assert_eq!(device.advance_frame(), 1);
        assert!(!backend.is_alive(buffer.raw()));
        assert_eq!(device.advance_frame(), 0);
    }

    #[test]
    fn test_transfer_returns_leases() {
        let (backend, device) = device(2);
        let src = backend
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC))
            .unwrap();
        let dst = backend
            .create_buffer(&BufferDescriptor::new(4, BufferUsage::MAP_WRITE | BufferUsage::COPY_DST))
            .unwrap();
        backend.write_buffer(src, 0, &[1, 2, 3, 4]).unwrap();

        device
            .transfer(|cmd| {
                cmd.copy_buffer(src, dst, &[BufferCopy { src_offset: 0, dst_offset: 0, size: 4 }]);
                Ok(())
            })
            .unwrap();

        assert_eq!(backend.read_buffer(dst, 0, 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(
            device.active_command_buffers(QueueRole::Transfer, CommandBufferLevel::Primary),
            0
        );
        assert_eq!(device.fences.lock().active_count(), 0);
        assert_eq!(device.fences.lock().free_count(), 1);
    }

    #[test]
    fn test_failed_recording_still_returns_buffer() {
        let (_backend, device) = device(2);
        let result: GraphicsResult<()> =
            device.compute(|_| Err(GraphicsError::InvalidParameter("bad".to_string())));
        assert!(result.is_err());
        assert_eq!(
            device.active_command_buffers(QueueRole::Compute, CommandBufferLevel::Primary),
            0
        );
    }

    #[test]
    fn test_drop_drains_deferred() {
        let (backend, device) = device(3);
        let image = backend
            .create_image(&TextureDescriptor::new_2d(
                4,
                4,
                crate::types::TextureFormat::Rgba8Unorm,
                crate::types::TextureUsage::TEXTURE_BINDING,
            ))
            .unwrap();
        device.destroy_async(image);
        drop(device);
        assert!(!backend.is_alive(image.raw()));
        assert_eq!(backend.live_object_count(), 0);
    }
}
