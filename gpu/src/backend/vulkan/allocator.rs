//! GPU memory allocation through gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

use crate::error::{GraphicsError, GraphicsResult};
use crate::types::BufferUsage;

/// Create a memory allocator for the Vulkan device.
pub fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> GraphicsResult<Allocator> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| {
        GraphicsError::InitializationFailed(format!("Failed to create memory allocator: {}", e))
    })
}

/// Where a buffer with `usage` lives.
///
/// Host-writable buffers are mapped for their whole lifetime.
pub fn buffer_location(usage: BufferUsage) -> MemoryLocation {
    if usage.is_host_visible() {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// Allocate memory for a resource with the given requirements.
pub fn allocate(
    allocator: &mut Allocator,
    name: &str,
    requirements: vk::MemoryRequirements,
    location: MemoryLocation,
    linear: bool,
) -> GraphicsResult<Allocation> {
    allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(|e| match e {
            gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
            other => GraphicsError::ResourceCreationFailed(format!(
                "Failed to allocate memory for {}: {}",
                name, other
            )),
        })
}

/// Return an allocation to the allocator, logging failures.
pub fn free(allocator: &mut Allocator, allocation: Allocation) {
    if let Err(e) = allocator.free(allocation) {
        log::error!("Failed to free GPU memory: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_location() {
        assert_eq!(
            buffer_location(BufferUsage::UNIFORM | BufferUsage::MAP_WRITE),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            buffer_location(BufferUsage::VERTEX | BufferUsage::COPY_DST),
            MemoryLocation::GpuOnly
        );
    }
}
