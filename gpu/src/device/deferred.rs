//! Deferred destruction.
//!
//! GPU objects may still be referenced by command buffers in flight when
//! their owner drops them. Instead of destroying them immediately, the device
//! queues the destruction in a ring of buckets and drains one bucket per frame
//! boundary, so an object is released exactly `N` frames after the request.

use parking_lot::Mutex;

use crate::backend::{
    BufferHandle, DescriptorPoolHandle, DescriptorSetLayoutHandle, FenceHandle, FramebufferHandle,
    ImageHandle, ImageViewHandle, PipelineHandle, PipelineLayoutHandle, RenderBackend,
    RenderPassHandle, SamplerHandle, SemaphoreHandle, ShaderModuleHandle, SwapchainHandle,
};

/// A native object whose destruction can be deferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeferredResource {
    Buffer(BufferHandle),
    Image(ImageHandle),
    ImageView(ImageViewHandle),
    Sampler(SamplerHandle),
    RenderPass(RenderPassHandle),
    Framebuffer(FramebufferHandle),
    Pipeline(PipelineHandle),
    PipelineLayout(PipelineLayoutHandle),
    DescriptorSetLayout(DescriptorSetLayoutHandle),
    DescriptorPool(DescriptorPoolHandle),
    ShaderModule(ShaderModuleHandle),
    Swapchain(SwapchainHandle),
    Semaphore(SemaphoreHandle),
    Fence(FenceHandle),
}

impl DeferredResource {
    /// Destroy the object now.
    pub fn destroy(self, backend: &dyn RenderBackend) {
        match self {
            Self::Buffer(h) => backend.destroy_buffer(h),
            Self::Image(h) => backend.destroy_image(h),
            Self::ImageView(h) => backend.destroy_image_view(h),
            Self::Sampler(h) => backend.destroy_sampler(h),
            Self::RenderPass(h) => backend.destroy_render_pass(h),
            Self::Framebuffer(h) => backend.destroy_framebuffer(h),
            Self::Pipeline(h) => backend.destroy_pipeline(h),
            Self::PipelineLayout(h) => backend.destroy_pipeline_layout(h),
            Self::DescriptorSetLayout(h) => backend.destroy_descriptor_set_layout(h),
            Self::DescriptorPool(h) => backend.destroy_descriptor_pool(h),
            Self::ShaderModule(h) => backend.destroy_shader_module(h),
            Self::Swapchain(h) => backend.destroy_swapchain(h),
            Self::Semaphore(h) => backend.destroy_semaphore(h),
            Self::Fence(h) => backend.destroy_fence(h),
        }
    }
}

macro_rules! deferred_from {
    ($($handle:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$handle> for DeferredResource {
                fn from(handle: $handle) -> Self {
                    Self::$variant(handle)
                }
            }
        )*
    };
}

deferred_from!(
    BufferHandle => Buffer,
    ImageHandle => Image,
    ImageViewHandle => ImageView,
    SamplerHandle => Sampler,
    RenderPassHandle => RenderPass,
    FramebufferHandle => Framebuffer,
    PipelineHandle => Pipeline,
    PipelineLayoutHandle => PipelineLayout,
    DescriptorSetLayoutHandle => DescriptorSetLayout,
    DescriptorPoolHandle => DescriptorPool,
    ShaderModuleHandle => ShaderModule,
    SwapchainHandle => Swapchain,
    SemaphoreHandle => Semaphore,
    FenceHandle => Fence,
);

type Task = Box<dyn FnOnce() + Send>;

struct Ring {
    buckets: Vec<Vec<Task>>,
    current: usize,
    pending: usize,
}

/// Ring of `N` destruction buckets.
///
/// [`push`](Self::push) appends to the current bucket. [`advance`](Self::advance)
/// moves to the next bucket and runs it; after `N` advances the ring is back
/// at the bucket a task was pushed into, which is when it runs. The lock is
/// held only while a bucket is taken out, never while tasks run.
pub struct DeferredDestructor {
    ring: Mutex<Ring>,
    depth: usize,
}

impl DeferredDestructor {
    /// Create a ring of `depth` buckets (at least 1).
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            ring: Mutex::new(Ring {
                buckets: (0..depth).map(|_| Vec::new()).collect(),
                current: 0,
                pending: 0,
            }),
            depth,
        }
    }

    /// Number of frame boundaries a task waits for.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Queue `task` to run `depth` frame boundaries from now.
    pub fn push(&self, task: impl FnOnce() + Send + 'static) {
        let mut ring = self.ring.lock();
        let current = ring.current;
        ring.buckets[current].push(Box::new(task));
        ring.pending += 1;
    }

    /// Cross one frame boundary, running the bucket that aged out.
    ///
    /// Returns the number of tasks run.
    pub fn advance(&self) -> usize {
        let expired = {
            let mut ring = self.ring.lock();
            ring.current = (ring.current + 1) % self.depth;
            let current = ring.current;
            let expired = std::mem::take(&mut ring.buckets[current]);
            ring.pending -= expired.len();
            expired
        };
        let count = expired.len();
        for task in expired {
            task();
        }
        if count > 0 {
            log::trace!("Deferred destruction released {} objects", count);
        }
        count
    }

    /// Run every queued task now, oldest first.
    ///
    /// Only safe once the device is idle.
    pub fn drain_all(&self) -> usize {
        let mut total = 0;
        for _ in 0..self.depth {
            total += self.advance();
        }
        total
    }

    /// Tasks waiting to run.
    pub fn pending_count(&self) -> usize {
        self.ring.lock().pending
    }
}

impl std::fmt::Debug for DeferredDestructor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredDestructor")
            .field("depth", &self.depth)
            .field("pending", &self.pending_count())
            .finish()
    }
}
