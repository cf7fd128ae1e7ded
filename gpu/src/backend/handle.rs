//! Backend object handles.
//!
//! Every native object is referred to by a small `Copy` handle. The dummy
//! backend hands out unique ids; the Vulkan backend wraps the raw `vk` handle.
//! Owning wrappers elsewhere in the crate decide when a handle is destroyed.

#[cfg(feature = "vulkan-backend")]
use ash::vk;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident => $vk:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            /// Dummy backend object id.
            Dummy(u64),
            /// Vulkan backend object.
            #[cfg(feature = "vulkan-backend")]
            Vulkan(vk::$vk),
        }

        impl $name {
            /// Backend-independent identity, usable as a map key or in logs.
            pub fn raw(&self) -> u64 {
                match self {
                    Self::Dummy(id) => *id,
                    #[cfg(feature = "vulkan-backend")]
                    Self::Vulkan(handle) => vk::Handle::as_raw(*handle),
                }
            }
        }
    };
}

gpu_handle!(
    /// A device queue.
    QueueHandle => Queue
);
gpu_handle!(
    /// A CPU-waitable fence.
    FenceHandle => Fence
);
gpu_handle!(
    /// A binary or timeline semaphore.
    SemaphoreHandle => Semaphore
);
gpu_handle!(
    /// A native command pool.
    CommandPoolHandle => CommandPool
);
gpu_handle!(
    /// A native command buffer.
    CommandBufferHandle => CommandBuffer
);
gpu_handle!(
    /// A GPU buffer.
    BufferHandle => Buffer
);
gpu_handle!(
    /// A GPU image.
    ImageHandle => Image
);
gpu_handle!(
    /// A view onto an image.
    ImageViewHandle => ImageView
);
gpu_handle!(
    /// A sampler object.
    SamplerHandle => Sampler
);
gpu_handle!(
    /// A render pass.
    RenderPassHandle => RenderPass
);
gpu_handle!(
    /// A framebuffer bound to a render pass.
    FramebufferHandle => Framebuffer
);
gpu_handle!(
    /// A descriptor set layout.
    DescriptorSetLayoutHandle => DescriptorSetLayout
);
gpu_handle!(
    /// A native descriptor pool (one link of a descriptor pool chain).
    DescriptorPoolHandle => DescriptorPool
);
gpu_handle!(
    /// A descriptor set.
    DescriptorSetHandle => DescriptorSet
);
gpu_handle!(
    /// A shader module.
    ShaderModuleHandle => ShaderModule
);
gpu_handle!(
    /// A pipeline layout.
    PipelineLayoutHandle => PipelineLayout
);
gpu_handle!(
    /// A graphics or compute pipeline.
    PipelineHandle => Pipeline
);
gpu_handle!(
    /// A presentation surface.
    SurfaceHandle => SurfaceKHR
);
gpu_handle!(
    /// A swapchain.
    SwapchainHandle => SwapchainKHR
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dummy_handle_raw() {
        assert_eq!(FenceHandle::Dummy(42).raw(), 42);
        assert_ne!(FenceHandle::Dummy(1), FenceHandle::Dummy(2));
    }
}
