//! Common types and descriptors for graphics resources.
//!
//! This module contains format enums, usage flags, layouts and descriptor
//! structs used throughout the graphics system.

mod buffer;
mod common;
mod layout;
mod sampler;
mod texture;

pub use buffer::{BufferCopy, BufferDescriptor, BufferUsage, IndexType};
pub use common::{ClearValue, Extent2d, Extent3d, ScissorRect, Viewport};
pub use layout::{AccessFlags, PipelineStages, ShaderStages, TextureLayout};
pub use sampler::{AddressMode, CompareFunction, FilterMode, SamplerDescriptor};
pub use texture::{FormatFeatures, TextureDescriptor, TextureFormat, TextureUsage};
