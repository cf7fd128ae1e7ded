//! Descriptor pools, descriptor-set packs and descriptor writes.
//!
//! - [`DescriptorPool`]: chain of fixed-capacity native pools that grows
//!   instead of failing
//! - [`DescriptorSetPack`]: six sets handed out round-robin for one draw object
//! - [`DescriptorSetCache`]: packs keyed by object identity, with a free list
//! - [`DescriptorWrites`]: bound resources per slot and the readiness check

mod cache;
mod pack;
mod pool;
mod writes;

pub use cache::{DescriptorSetCache, object_identity};
pub use pack::{DESCRIPTOR_PACK_SIZE, DescriptorSetPack};
pub use pool::DescriptorPool;
pub use writes::DescriptorWrites;

use crate::backend::{BufferHandle, ImageViewHandle, SamplerHandle};
use crate::types::{ShaderStages, TextureLayout};

/// Kind of resource a descriptor binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// Standalone sampler.
    Sampler,
    /// Image and sampler in one descriptor.
    CombinedImageSampler,
    /// Image read through a separate sampler.
    SampledImage,
    /// Image written or read without sampling.
    StorageImage,
    /// Read-only texel buffer.
    UniformTexelBuffer,
    /// Read-write texel buffer.
    StorageTexelBuffer,
    /// Uniform buffer.
    UniformBuffer,
    /// Storage buffer.
    StorageBuffer,
    /// Uniform buffer with a dynamic offset.
    UniformBufferDynamic,
    /// Storage buffer with a dynamic offset.
    StorageBufferDynamic,
    /// Render pass input attachment.
    InputAttachment,
}

impl DescriptorType {
    /// Every descriptor type.
    pub const ALL: [DescriptorType; 11] = [
        Self::Sampler,
        Self::CombinedImageSampler,
        Self::SampledImage,
        Self::StorageImage,
        Self::UniformTexelBuffer,
        Self::StorageTexelBuffer,
        Self::UniformBuffer,
        Self::StorageBuffer,
        Self::UniformBufferDynamic,
        Self::StorageBufferDynamic,
        Self::InputAttachment,
    ];

    /// Whether the binding takes an image or sampler rather than a buffer.
    pub fn is_image(self) -> bool {
        matches!(
            self,
            Self::Sampler
                | Self::CombinedImageSampler
                | Self::SampledImage
                | Self::StorageImage
                | Self::InputAttachment
        )
    }

    /// Human-readable kind used in warnings.
    pub fn kind_name(self) -> &'static str {
        if self.is_image() {
            "image/sampler"
        } else {
            "buffer"
        }
    }
}

/// One binding of a descriptor set layout, as reported by shader reflection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot.
    pub binding: u32,
    /// Name of the shader variable.
    pub name: String,
    /// Descriptor type.
    pub ty: DescriptorType,
    /// Array size.
    pub count: u32,
    /// Stages that access the binding.
    pub stages: ShaderStages,
}

impl DescriptorBinding {
    /// Create a single-element binding.
    pub fn new(binding: u32, name: impl Into<String>, ty: DescriptorType, stages: ShaderStages) -> Self {
        Self {
            binding,
            name: name.into(),
            ty,
            count: 1,
            stages,
        }
    }
}

/// Capacity of one descriptor type in a native pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorPoolSize {
    /// Descriptor type.
    pub ty: DescriptorType,
    /// Number of descriptors of this type.
    pub count: u32,
}

impl DescriptorPoolSize {
    /// Default per-type capacity of a chain link.
    pub const DEFAULT_COUNT: u32 = 1000;

    /// One entry per descriptor type with [`Self::DEFAULT_COUNT`] each.
    pub fn default_sizes() -> Vec<Self> {
        DescriptorType::ALL
            .iter()
            .map(|&ty| Self {
                ty,
                count: Self::DEFAULT_COUNT,
            })
            .collect()
    }
}

/// Resource referenced by a descriptor write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DescriptorResource {
    /// Range of a buffer.
    Buffer {
        /// Buffer to bind.
        buffer: BufferHandle,
        /// Start of the range.
        offset: u64,
        /// Size of the range.
        range: u64,
    },
    /// Image view with optional sampler.
    Image {
        /// View to bind.
        view: ImageViewHandle,
        /// Sampler, for combined image samplers.
        sampler: Option<SamplerHandle>,
        /// Layout the image will be in when accessed.
        layout: TextureLayout,
    },
}

/// A single descriptor update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorWrite {
    /// Binding slot.
    pub binding: u32,
    /// Declared type of the binding.
    pub ty: DescriptorType,
    /// Resource to reference.
    pub resource: DescriptorResource,
}
